//! Maps subcommands to their ordered call sequences.

use std::io::Write;

use clap::Subcommand;
use log::{error, info, warn};

use crate::cluster;
use crate::config::Config;
use crate::confirm::Confirm;
use crate::deployer::StackDeployer;
use crate::error::{DeployError, Result};
use crate::images;
use crate::lease::{self, Lease};
use crate::objects::{self, SecretSource};
use crate::runtime::{ClusterRuntime, ImageRuntime};
use crate::status;
use crate::teardown::{StackObjects, Teardown};
use crate::wait::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Provision secrets and configs, build and publish images, deploy the stack
    Deploy,
    /// Remove the stack, keeping secrets, configs and volumes
    Down,
    /// Remove the stack, its secrets and configs, and optionally its volumes
    Clean,
    /// Show services and tasks of the stack
    Status,
}

/// What a run left behind that did not abort it.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub deferred: Vec<DeployError>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.deferred.is_empty()
    }
}

pub struct Orchestrator<'a> {
    pub config: &'a Config,
    pub cluster: &'a dyn ClusterRuntime,
    pub images: &'a dyn ImageRuntime,
    pub confirm: &'a dyn Confirm,
    pub json: bool,
}

impl<'a> Orchestrator<'a> {
    fn backoff(&self, timeout: std::time::Duration) -> Backoff {
        Backoff::new(self.config.poll_initial(), self.config.poll_max(), timeout)
    }

    pub async fn run(&self, command: Command, out: &mut dyn Write) -> Result<RunSummary> {
        info!("Running {:?} for stack {}", command, self.config.stack_name);
        match command {
            Command::Status => self.status(out).await.map(|_| RunSummary::default()),
            Command::Deploy => self.with_lease(self.deploy(out), true).await,
            Command::Down => {
                if !cluster::is_active(self.cluster).await? {
                    info!("Swarm not active, nothing to remove");
                    return Ok(RunSummary::default());
                }
                self.with_lease(self.down(), false).await
            }
            Command::Clean => {
                if !cluster::is_active(self.cluster).await? {
                    info!("Swarm not active, nothing to clean");
                    return Ok(RunSummary::default());
                }
                self.with_lease(self.clean(), false).await
            }
        }
    }

    /// Runs `step` while holding the stack lease, releasing it afterwards
    /// whatever the outcome.
    async fn with_lease<F>(&self, step: F, ensure_cluster: bool) -> Result<RunSummary>
    where
        F: std::future::Future<Output = Result<RunSummary>>,
    {
        if ensure_cluster {
            cluster::ensure_active(self.cluster, self.config.advertise_addr.as_deref()).await?;
        }
        let lease = Lease::acquire(
            self.cluster,
            &self.config.stack_name,
            &lease::holder_id(),
            self.config.lease_ttl(),
        )
        .await?;
        let result = step.await;
        lease.release(self.cluster).await;
        result
    }

    async fn deploy(&self, out: &mut dyn Write) -> Result<RunSummary> {
        let config = self.config;
        let mut summary = RunSummary::default();

        let source = SecretSource::select(
            config.postgres_password_file.as_deref(),
            &config.postgres_password,
        );
        objects::publish_secret(self.cluster, &config.secret_name, source).await?;
        for file in &config.configs {
            objects::publish_config(self.cluster, &file.name, &file.path).await?;
        }

        for image in &config.images {
            images::build(self.images, image).await?;
        }

        let target = config.registry_target();
        if let Err(e) = images::publish(
            self.images,
            &config.images,
            target.as_ref(),
            config.docker_password.as_deref(),
        )
        .await
        {
            if !e.is_deferred() {
                return Err(e);
            }
            error!("{}", e);
            summary.deferred.push(e);
        }

        let names: Vec<&str> = config.images.iter().map(|i| i.name.as_str()).collect();
        StackDeployer::new(
            self.cluster,
            &config.stack_name,
            self.backoff(config.converge_timeout()),
        )
        .deploy(&config.manifest, &names, target.as_ref(), out)
        .await?;

        Ok(summary)
    }

    async fn down(&self) -> Result<RunSummary> {
        let services = self
            .cluster
            .list_stack_services(&self.config.stack_name)
            .await?;
        if services.is_empty() {
            info!("Stack {} is not deployed", self.config.stack_name);
            return Ok(RunSummary::default());
        }
        self.teardown().remove_stack().await?;
        Ok(RunSummary::default())
    }

    async fn clean(&self) -> Result<RunSummary> {
        let secrets = [self.config.secret_name.as_str()];
        let configs: Vec<&str> = self.config.configs.iter().map(|c| c.name.as_str()).collect();
        self.teardown()
            .clean(
                StackObjects {
                    secrets: &secrets,
                    configs: &configs,
                },
                self.confirm,
            )
            .await?;
        Ok(RunSummary::default())
    }

    async fn status(&self, out: &mut dyn Write) -> Result<()> {
        if !cluster::is_active(self.cluster).await? {
            warn!("Swarm not active, stack {} is not deployed", self.config.stack_name);
            return Ok(());
        }
        let report = status::report(self.cluster, &self.config.stack_name).await?;
        if report.services.is_empty() {
            info!("Stack {} has no services", self.config.stack_name);
        }
        let written = if self.json {
            serde_json::to_writer_pretty(&mut *out, &report)
                .map_err(std::io::Error::from)
                .and_then(|_| writeln!(out))
        } else {
            report.render(out)
        };
        written.map_err(|e| DeployError::Runtime(e.into()))
    }

    fn teardown(&self) -> Teardown<'_> {
        Teardown::new(
            self.cluster,
            &self.config.stack_name,
            self.backoff(self.config.remove_timeout()),
        )
    }
}
