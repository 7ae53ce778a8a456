//! Image pipeline: local builds and optional registry publishing.

use log::{error, info, warn};

use crate::error::{DeployError, Result};
use crate::runtime::ImageRuntime;
use crate::types::{ImageSpec, RegistryTarget};

/// Builds one image as `name:latest`.  Failure is fatal for the run.
pub async fn build(runtime: &dyn ImageRuntime, image: &ImageSpec) -> Result<()> {
    let reference = image.local_ref();
    info!(
        "Building {} from {} ({})",
        reference,
        image.context.display(),
        image.dockerfile.display()
    );
    runtime
        .build(&reference, &image.dockerfile, &image.context)
        .await
        .map_err(|e| DeployError::ImageBuild {
            image: reference,
            reason: e.to_string(),
        })
}

/// Tags and pushes every image under the registry account.
///
/// Without a target this is a no-op, which keeps fully local deployments
/// working.  Pushes are independent: a failure is logged and the next
/// image is still attempted; the failed references are reported together
/// at the end.
pub async fn publish(
    runtime: &dyn ImageRuntime,
    images: &[ImageSpec],
    target: Option<&RegistryTarget>,
    password: Option<&str>,
) -> Result<Vec<String>> {
    let Some(target) = target else {
        warn!("DOCKER_REGISTRY or DOCKER_USERNAME not set, skipping image publish");
        return Ok(Vec::new());
    };

    if password.is_none() {
        info!("DOCKER_PASSWORD not set, falling back to interactive login");
    }
    runtime
        .login(&target.registry, &target.username, password)
        .await
        .map_err(|e| DeployError::RegistryLogin {
            registry: target.registry.clone(),
            reason: e.to_string(),
        })?;

    let mut pushed = Vec::new();
    let mut failed = Vec::new();
    for image in images {
        let reference = target.qualify(&image.name);
        let outcome = match runtime.tag(&image.local_ref(), &reference).await {
            Ok(()) => runtime.push(&reference).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                info!("Pushed {}", reference);
                pushed.push(reference);
            }
            Err(e) => {
                error!("Failed to publish {}: {}", reference, e);
                failed.push(reference);
            }
        }
    }

    if failed.is_empty() {
        Ok(pushed)
    } else {
        Err(DeployError::PublishFailed(failed))
    }
}
