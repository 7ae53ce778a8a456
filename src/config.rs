use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{ImageSpec, RegistryTarget};

/// Operator variables read without the `STACKPILOT_` prefix.
const RAW_ENV: [&str; 5] = [
    "POSTGRES_PASSWORD",
    "POSTGRES_PASSWORD_FILE",
    "DOCKER_REGISTRY",
    "DOCKER_USERNAME",
    "DOCKER_PASSWORD",
];

/// A named config object and the file its payload is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    pub stack_name: String,
    pub manifest: PathBuf,
    pub secret_name: String,
    pub postgres_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres_password_file: Option<PathBuf>,
    pub configs: Vec<ConfigFile>,
    pub images: Vec<ImageSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_password: Option<String>,
    pub default_registry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
    pub docker_binary: PathBuf,
    pub converge_timeout_secs: u64,
    pub remove_timeout_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub lease_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_name: "insurance".into(),
            manifest: "docker-stack.yml".into(),
            secret_name: "postgres_password".into(),
            postgres_password: "postgres".into(),
            postgres_password_file: None,
            configs: vec![
                ConfigFile {
                    name: "postgres_init".into(),
                    path: "database/init.sql".into(),
                },
                ConfigFile {
                    name: "nginx_config".into(),
                    path: "nginx/nginx.conf".into(),
                },
            ],
            images: vec![
                ImageSpec {
                    name: "insurance-api".into(),
                    context: "backend-api".into(),
                    dockerfile: "backend-api/Dockerfile".into(),
                },
                ImageSpec {
                    name: "insurance-frontend".into(),
                    context: "frontend".into(),
                    dockerfile: "frontend/Dockerfile".into(),
                },
            ],
            docker_registry: None,
            docker_username: None,
            docker_password: None,
            default_registry: "docker.io".into(),
            advertise_addr: None,
            docker_binary: "docker".into(),
            converge_timeout_secs: 120,
            remove_timeout_secs: 60,
            poll_initial_ms: 500,
            poll_max_ms: 8_000,
            lease_ttl_secs: 900,
        }
    }
}

// Hand-written so credentials never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("stack_name", &self.stack_name)
            .field("manifest", &self.manifest)
            .field("secret_name", &self.secret_name)
            .field("postgres_password", &"<redacted>")
            .field("postgres_password_file", &self.postgres_password_file)
            .field("configs", &self.configs)
            .field("images", &self.images)
            .field("docker_registry", &self.docker_registry)
            .field("docker_username", &self.docker_username)
            .field(
                "docker_password",
                &self.docker_password.as_ref().map(|_| "<redacted>"),
            )
            .field("default_registry", &self.default_registry)
            .field("advertise_addr", &self.advertise_addr)
            .field("docker_binary", &self.docker_binary)
            .field("converge_timeout_secs", &self.converge_timeout_secs)
            .field("remove_timeout_secs", &self.remove_timeout_secs)
            .field("lease_ttl_secs", &self.lease_ttl_secs)
            .finish()
    }
}

impl Config {
    pub fn figment(path: Option<&Path>) -> Figment {
        let toml = path.unwrap_or_else(|| Path::new("stackpilot.toml"));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(toml))
            .merge(Json::file("stackpilot.json"))
            .merge(Env::prefixed("STACKPILOT_"))
            .merge(Env::raw().only(&RAW_ENV))
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: Config = Self::figment(path)
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Blank variables mean "unset", matching how the deploy
        // environment is usually exported.
        for value in [
            &mut config.docker_registry,
            &mut config.docker_username,
            &mut config.docker_password,
            &mut config.advertise_addr,
        ] {
            if value.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *value = None;
            }
        }
        if config
            .postgres_password_file
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            config.postgres_password_file = None;
        }

        Ok(config)
    }

    pub fn registry_target(&self) -> Option<RegistryTarget> {
        RegistryTarget::from_parts(
            self.docker_registry.as_deref(),
            self.docker_username.as_deref(),
            &self.default_registry,
        )
    }

    pub fn converge_timeout(&self) -> Duration {
        Duration::from_secs(self.converge_timeout_secs)
    }

    pub fn remove_timeout(&self) -> Duration {
        Duration::from_secs(self.remove_timeout_secs)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}
