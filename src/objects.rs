//! Secret and config publishing.
//!
//! Both object kinds are immutable once created, so a new payload is
//! published by deleting any object with the same name and creating it
//! again.  The cluster is queried first on every call; nothing about
//! previous runs is remembered locally.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{DeployError, Result};
use crate::runtime::ClusterRuntime;
use crate::types::{ObjectKind, DIGEST_LABEL};

/// Where a secret's payload comes from.  A file source carries the bytes
/// read when it was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource<'a> {
    File(&'a Path, Vec<u8>),
    Inline(&'a str),
}

impl<'a> SecretSource<'a> {
    /// Prefers the file when one is configured and readable.
    pub fn select(file: Option<&'a Path>, inline: &'a str) -> Self {
        let Some(path) = file else {
            return SecretSource::Inline(inline);
        };
        if !path.is_file() {
            warn!(
                "Secret file {} not found, using inline value",
                path.display()
            );
            return SecretSource::Inline(inline);
        }
        match std::fs::read(path) {
            Ok(contents) => SecretSource::File(path, contents),
            Err(e) => {
                warn!(
                    "Secret file {} is not readable ({}), using inline value",
                    path.display(),
                    e
                );
                SecretSource::Inline(inline)
            }
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            SecretSource::File(_, contents) => contents,
            SecretSource::Inline(value) => value.as_bytes(),
        }
    }
}

fn digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Replaces the named object so that exactly one exists, holding `payload`.
async fn replace(
    runtime: &dyn ClusterRuntime,
    kind: ObjectKind,
    name: &str,
    payload: &[u8],
) -> Result<String> {
    let digest = digest(payload);
    let existing = runtime.list_objects(kind).await?;

    for object in existing.iter().filter(|o| o.name == name) {
        match object.labels.get(DIGEST_LABEL) {
            Some(previous) if *previous == digest => {
                debug!("{} {} content unchanged, recreating", kind, name)
            }
            Some(_) => info!("{} {} content changed", kind, name),
            None => debug!("{} {} has no digest label", kind, name),
        }
        // The create below reports the real error if this one mattered.
        if let Err(e) = runtime.remove_object(kind, &object.id).await {
            warn!("Failed to remove existing {} {}: {}", kind, name, e);
        }
    }

    let labels = HashMap::from([(DIGEST_LABEL.to_string(), digest)]);
    let id = runtime.create_object(kind, name, payload, labels).await?;
    info!("Created {} {} ({})", kind, name, id);
    Ok(id)
}

/// Publishes the secret `name` from a file or an inline value.
pub async fn publish_secret(
    runtime: &dyn ClusterRuntime,
    name: &str,
    source: SecretSource<'_>,
) -> Result<String> {
    replace(runtime, ObjectKind::Secret, name, source.payload()).await
}

/// Publishes the config `name` with the current contents of `path`.
///
/// A missing file means a broken checkout, so it fails before touching
/// the cluster.
pub async fn publish_config(
    runtime: &dyn ClusterRuntime,
    name: &str,
    path: &Path,
) -> Result<String> {
    if !path.is_file() {
        return Err(DeployError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let payload = std::fs::read(path).map_err(|source| DeployError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    replace(runtime, ObjectKind::Config, name, &payload).await
}

/// Removes every object called `name`, tolerating absence.
///
/// Returns how many objects were removed.
pub async fn remove_named(runtime: &dyn ClusterRuntime, kind: ObjectKind, name: &str) -> usize {
    let existing = match runtime.list_objects(kind).await {
        Ok(objects) => objects,
        Err(e) => {
            warn!("Failed to list {}s: {}", kind, e);
            return 0;
        }
    };
    let mut removed = 0;
    for object in existing.iter().filter(|o| o.name == name) {
        match runtime.remove_object(kind, &object.id).await {
            Ok(()) => {
                info!("Removed {} {}", kind, name);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {} {}: {}", kind, name, e),
        }
    }
    if removed == 0 {
        debug!("No {} named {} to remove", kind, name);
    }
    removed
}
