//! Stack deployment: render, submit, wait for convergence, report.

use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::manifest;
use crate::runtime::ClusterRuntime;
use crate::status::{self, StackReport};
use crate::types::{RegistryTarget, StackPhase};
use crate::wait::{poll_until, Backoff, Poll};

pub struct StackDeployer<'a> {
    runtime: &'a dyn ClusterRuntime,
    stack: &'a str,
    backoff: Backoff,
}

impl<'a> StackDeployer<'a> {
    pub fn new(runtime: &'a dyn ClusterRuntime, stack: &'a str, backoff: Backoff) -> Self {
        Self {
            runtime,
            stack,
            backoff,
        }
    }

    /// Submits the manifest and waits until every service runs its desired
    /// number of tasks.
    ///
    /// The status report is written to `out` whether or not the stack
    /// converged; a stack that does not converge in time is an error.
    pub async fn deploy(
        &self,
        manifest_path: &Path,
        images: &[&str],
        target: Option<&RegistryTarget>,
        out: &mut dyn Write,
    ) -> Result<StackReport> {
        let rendered = manifest::render(manifest_path, images, target)?;
        if rendered.is_derived() {
            debug!("Submitting derived manifest {}", rendered.path().display());
        }
        info!(
            "Stack {}: {} -> {}",
            self.stack,
            StackPhase::Absent,
            StackPhase::Deploying
        );
        let submitted = self
            .runtime
            .deploy_stack(self.stack, rendered.path(), target.is_some())
            .await;
        // The derived copy is deleted here, before the outcome is inspected.
        drop(rendered);
        submitted.map_err(|e| DeployError::StackSubmit(format!("{:#}", e)))?;

        let runtime = self.runtime;
        let stack = self.stack;
        let outcome = poll_until(self.backoff, "stack convergence", || async move {
            let services = runtime.list_stack_services(stack).await?;
            Ok::<_, DeployError>((StackPhase::observe(&services) == StackPhase::Running, ()))
        })
        .await?;

        let report = status::report(self.runtime, self.stack).await?;
        if let Err(e) = report.render(out) {
            warn!("Failed to write status report: {}", e);
        }

        match outcome {
            Poll::Ready(()) => {
                info!(
                    "Stack {}: {} -> {}",
                    self.stack,
                    StackPhase::Deploying,
                    StackPhase::Running
                );
                Ok(report)
            }
            Poll::TimedOut(()) => Err(DeployError::DeployTimedOut {
                stack: self.stack.to_string(),
                waited: self.backoff.timeout,
            }),
        }
    }
}
