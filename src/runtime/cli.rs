//! Thin async wrapper around the `docker` command line.
//!
//! Used for the operations the Engine API client does not cover directly:
//! image builds from a local context, registry login with the CLI's
//! credential store, swarm config objects and `docker stack deploy`.

use super::ImageRuntime;
use crate::types::ObjectRef;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    /// Runs a command to completion, returning stdout or an error that
    /// carries stderr.
    async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        debug!("Running {:?}", cmd.as_std());
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Like [`run`](Self::run), with `input` written to the child's stdin.
    async fn run_with_input<I, S>(&self, args: I, input: &[u8]) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        debug!("Running {:?}", cmd.as_std());
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.binary.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
            // Dropping stdin closes the pipe so the command can proceed.
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Lists swarm config objects with their labels.
    pub async fn config_list(&self) -> Result<Vec<ObjectRef>> {
        let ids = self.run(["config", "ls", "--quiet"]).await?;
        let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["config", "inspect"];
        args.extend(ids);
        let inspected = self.run(args).await?;
        parse_inspected(&inspected)
    }

    /// Creates a config object from `payload`, returning its id.
    pub async fn config_create(
        &self,
        name: &str,
        payload: &[u8],
        labels: &HashMap<String, String>,
    ) -> Result<String> {
        let mut args = vec!["config".to_string(), "create".to_string()];
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(name.to_string());
        // `-` reads the payload from stdin.
        args.push("-".to_string());
        let id = self.run_with_input(args, payload).await?;
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("config create for {} printed no id", name));
        }
        Ok(id.to_string())
    }

    pub async fn config_remove(&self, id: &str) -> Result<()> {
        self.run(["config", "rm", id]).await.map(|_| ())
    }

    /// Runs `docker stack deploy` for the manifest at `manifest`.
    pub async fn stack_deploy(
        &self,
        stack: &str,
        manifest: &Path,
        with_registry_auth: bool,
    ) -> Result<()> {
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("stack"),
            OsStr::new("deploy"),
            OsStr::new("--compose-file"),
            manifest.as_os_str(),
        ];
        if with_registry_auth {
            args.push(OsStr::new("--with-registry-auth"));
        }
        args.push(OsStr::new(stack));
        self.run(args).await.map(|_| ())
    }
}

/// The subset of `docker config inspect` output the cluster runtime needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedObject {
    #[serde(rename = "ID")]
    id: String,
    spec: InspectedSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedSpec {
    name: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

fn parse_inspected(json: &str) -> Result<Vec<ObjectRef>> {
    let objects: Vec<InspectedObject> =
        serde_json::from_str(json).context("Failed to parse docker inspect output")?;
    Ok(objects
        .into_iter()
        .map(|o| ObjectRef {
            id: o.id,
            name: o.spec.name,
            labels: o.spec.labels.unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl ImageRuntime for DockerCli {
    async fn build(&self, reference: &str, dockerfile: &Path, context: &Path) -> Result<()> {
        let args: [&OsStr; 6] = [
            OsStr::new("build"),
            OsStr::new("--tag"),
            OsStr::new(reference),
            OsStr::new("--file"),
            dockerfile.as_os_str(),
            context.as_os_str(),
        ];
        self.run(args).await.map(|_| ())
    }

    async fn login(&self, registry: &str, username: &str, password: Option<&str>) -> Result<()> {
        match password {
            Some(password) => self
                .run_with_input(
                    ["login", registry, "--username", username, "--password-stdin"],
                    password.as_bytes(),
                )
                .await
                .map(|_| ()),
            None => {
                // Interactive: the CLI owns the terminal for the password prompt.
                let status = self
                    .command(["login", registry, "--username", username])
                    .status()
                    .await
                    .with_context(|| format!("Failed to execute {}", self.binary.display()))?;
                if !status.success() {
                    return Err(anyhow!("interactive login exited with {}", status));
                }
                Ok(())
            }
        }
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.run(["tag", source, target]).await.map(|_| ())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.run(["push", reference]).await.map(|_| ())
    }
}
