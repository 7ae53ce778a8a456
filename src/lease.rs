//! Advisory lease guarding mutating runs against concurrent operators.
//!
//! The lease is a config object named after the stack.  Config names are
//! unique in the cluster, so creation is the atomic acquire step.  A lease
//! older than its time-to-live is treated as abandoned and taken over.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::{DeployError, Result};
use crate::runtime::ClusterRuntime;
use crate::types::{ObjectKind, ObjectRef};

const HOLDER_LABEL: &str = "com.stackpilot.lease.holder";
const ACQUIRED_LABEL: &str = "com.stackpilot.lease.acquired";

pub fn lease_name(stack: &str) -> String {
    format!("{}_stackpilot_lease", stack)
}

/// Identifies this process to other operators.
pub fn holder_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into());
    format!("{}:{}", host, std::process::id())
}

#[derive(Debug)]
pub struct Lease {
    name: String,
    id: String,
}

impl Lease {
    pub async fn acquire(
        runtime: &dyn ClusterRuntime,
        stack: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let name = lease_name(stack);
        let now = Utc::now();

        let existing: Vec<ObjectRef> = runtime
            .list_objects(ObjectKind::Config)
            .await?
            .into_iter()
            .filter(|o| o.name == name)
            .collect();
        for lease in &existing {
            let owner = lease
                .labels
                .get(HOLDER_LABEL)
                .cloned()
                .unwrap_or_else(|| "unknown".into());
            let acquired = lease
                .labels
                .get(ACQUIRED_LABEL)
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            let expired = match acquired {
                Some(at) => (now - at).to_std().map(|age| age > ttl).unwrap_or(false),
                // Unreadable timestamps cannot be trusted to expire.
                None => false,
            };
            if !expired {
                return Err(DeployError::LeaseHeld {
                    stack: stack.to_string(),
                    holder: owner,
                    since: acquired
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "an unknown time".into()),
                });
            }
            warn!("Taking over expired lease of {} held by {}", stack, owner);
            runtime.remove_object(ObjectKind::Config, &lease.id).await?;
        }

        let labels = HashMap::from([
            (HOLDER_LABEL.to_string(), holder.to_string()),
            (ACQUIRED_LABEL.to_string(), now.to_rfc3339()),
        ]);
        let id = runtime
            .create_object(ObjectKind::Config, &name, holder.as_bytes(), labels)
            .await
            // Another operator won the race between our list and create.
            .map_err(|e| {
                warn!("Failed to create lease {}: {}", name, e);
                DeployError::LeaseHeld {
                    stack: stack.to_string(),
                    holder: "another operator".into(),
                    since: now.to_rfc3339(),
                }
            })?;
        info!("Acquired lease {} as {}", name, holder);
        Ok(Self { name, id })
    }

    /// Releases the lease.  Failures are logged; the TTL reclaims it.
    pub async fn release(self, runtime: &dyn ClusterRuntime) {
        match runtime.remove_object(ObjectKind::Config, &self.id).await {
            Ok(()) => info!("Released lease {}", self.name),
            Err(e) => warn!("Failed to release lease {}: {}", self.name, e),
        }
    }
}
