//! Stack removal and cleanup.
//!
//! Volumes hold the database and broker data, so they are only removed
//! after an explicit "yes" from the operator.

use log::{info, warn};

use crate::confirm::Confirm;
use crate::error::{DeployError, Result};
use crate::objects;
use crate::runtime::ClusterRuntime;
use crate::types::{ObjectKind, StackPhase};
use crate::wait::{poll_until, Backoff, Poll};

/// Named objects published alongside the stack.
#[derive(Debug, Clone, Copy)]
pub struct StackObjects<'a> {
    pub secrets: &'a [&'a str],
    pub configs: &'a [&'a str],
}

pub struct Teardown<'a> {
    runtime: &'a dyn ClusterRuntime,
    stack: &'a str,
    backoff: Backoff,
}

impl<'a> Teardown<'a> {
    pub fn new(runtime: &'a dyn ClusterRuntime, stack: &'a str, backoff: Backoff) -> Self {
        Self {
            runtime,
            stack,
            backoff,
        }
    }

    /// Removes the stack's services, waits for them to disappear, then
    /// removes its networks.
    pub async fn remove_stack(&self) -> Result<()> {
        let services = self.runtime.list_stack_services(self.stack).await?;
        self.remove_from(StackPhase::observe(&services)).await
    }

    async fn remove_from(&self, from: StackPhase) -> Result<()> {
        info!(
            "Stack {}: {} -> {}",
            self.stack,
            from,
            StackPhase::Removing
        );
        self.runtime.remove_stack(self.stack).await?;

        let runtime = self.runtime;
        let stack = self.stack;
        let outcome = poll_until(self.backoff, "stack removal", || async move {
            let services = runtime.list_stack_services(stack).await?;
            Ok::<_, DeployError>((services.is_empty(), services.len()))
        })
        .await?;

        if let Poll::TimedOut(remaining) = outcome {
            warn!("{} service(s) of {} still present", remaining, self.stack);
            return Err(DeployError::RemoveTimedOut {
                stack: self.stack.to_string(),
                waited: self.backoff.timeout,
            });
        }

        if let Err(e) = self.runtime.remove_stack_networks(self.stack).await {
            warn!("Failed to remove networks of {}: {}", self.stack, e);
        }
        info!(
            "Stack {}: {} -> {}",
            self.stack,
            StackPhase::Removing,
            StackPhase::Absent
        );
        Ok(())
    }

    /// Removes the stack if present, its secrets and configs, and, only
    /// when confirmed, its volumes.
    ///
    /// Objects and volumes are still handled when the stack could not be
    /// removed; that failure is returned afterwards.
    pub async fn clean(&self, objects: StackObjects<'_>, confirm: &dyn Confirm) -> Result<()> {
        let removal = match self.runtime.list_stack_services(self.stack).await {
            Ok(services) if services.is_empty() => {
                info!("Stack {} is not deployed", self.stack);
                Ok(())
            }
            Ok(services) => self.remove_from(StackPhase::observe(&services)).await,
            Err(e) => Err(DeployError::from(e)),
        };
        if let Err(e) = &removal {
            warn!("Stack {} was not removed: {}", self.stack, e);
        }

        for name in objects.secrets {
            objects::remove_named(self.runtime, ObjectKind::Secret, name).await;
        }
        for name in objects.configs {
            objects::remove_named(self.runtime, ObjectKind::Config, name).await;
        }

        let volumes = self.clean_volumes(confirm).await;
        removal.and(volumes)
    }

    async fn clean_volumes(&self, confirm: &dyn Confirm) -> Result<()> {
        let volumes = self.runtime.list_stack_volumes(self.stack).await?;
        if volumes.is_empty() {
            info!("No volumes found for stack {}", self.stack);
            return Ok(());
        }

        let prompt = format!(
            "Remove {} volume(s) of stack {} ({})? All stored data will be lost",
            volumes.len(),
            self.stack,
            volumes.join(", ")
        );
        if !confirm.confirm(&prompt) {
            info!("Keeping volumes of stack {}", self.stack);
            return Ok(());
        }

        for volume in &volumes {
            match self.runtime.remove_volume(volume).await {
                Ok(()) => info!("Removed volume {}", volume),
                Err(e) => warn!("Failed to remove volume {}: {}", volume, e),
            }
        }
        Ok(())
    }
}
