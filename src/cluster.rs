//! Cluster gate: makes sure the local node is a swarm manager.

use log::info;

use crate::error::{DeployError, Result};
use crate::runtime::ClusterRuntime;
use crate::types::ClusterState;

/// Initializes a single-node cluster if the node is not part of one.
///
/// Never re-initializes an active cluster.  Any failure here is fatal,
/// since every later step needs the cluster.
pub async fn ensure_active(
    runtime: &dyn ClusterRuntime,
    advertise_addr: Option<&str>,
) -> Result<()> {
    match runtime.cluster_state().await? {
        ClusterState::Active => {
            info!("Swarm already active");
            return Ok(());
        }
        ClusterState::Unavailable(state) => {
            return Err(DeployError::ClusterInit(format!(
                "node is in swarm state '{}'",
                state
            )));
        }
        ClusterState::Uninitialized => {}
    }

    info!("Swarm not initialized, creating a single-node cluster");
    runtime
        .init_cluster(advertise_addr)
        .await
        .map_err(|e| DeployError::ClusterInit(e.to_string()))?;

    match runtime.cluster_state().await? {
        ClusterState::Active => Ok(()),
        other => Err(DeployError::ClusterInit(format!(
            "node still not active after init ({:?})",
            other
        ))),
    }
}

/// Read-only check used by subcommands that must not create a cluster.
pub async fn is_active(runtime: &dyn ClusterRuntime) -> Result<bool> {
    Ok(runtime.cluster_state().await? == ClusterState::Active)
}
