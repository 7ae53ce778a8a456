//! Stack manifest rendering.
//!
//! The manifest on disk is canonical.  When publishing to a registry a
//! derived copy is produced with the `image` field of each service that
//! runs a locally built image rewritten to its registry-qualified
//! reference.  Only `services.<name>.image` values are touched; anything
//! else in the document passes through unchanged.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_yaml::Value;
use tempfile::NamedTempFile;

use crate::error::{DeployError, Result};
use crate::types::{RegistryTarget, IMAGE_TAG};

/// The manifest handed to the cluster.
///
/// A derived manifest lives in a temporary file that is deleted when this
/// value is dropped, whether or not submission succeeded.
#[derive(Debug)]
pub enum RenderedManifest {
    Canonical(PathBuf),
    Derived(NamedTempFile),
}

impl RenderedManifest {
    pub fn path(&self) -> &Path {
        match self {
            RenderedManifest::Canonical(path) => path,
            RenderedManifest::Derived(file) => file.path(),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, RenderedManifest::Derived(_))
    }
}

fn manifest_error(path: &Path, reason: impl ToString) -> DeployError {
    DeployError::Manifest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Which built image, if any, an `image:` value refers to.
///
/// `name:latest` and bare `name` match; any other tag does not.
fn local_image<'a>(reference: &str, images: &[&'a str]) -> Option<&'a str> {
    let (name, tag) = match reference.rsplit_once(':') {
        // A colon inside a registry host:port is not a tag separator.
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, IMAGE_TAG),
    };
    if tag != IMAGE_TAG {
        return None;
    }
    images.iter().copied().find(|image| *image == name)
}

/// Rewrites image references of built images in a manifest document.
///
/// Returns the serialized document and the number of rewritten services.
pub fn qualify_images(
    document: &str,
    images: &[&str],
    target: &RegistryTarget,
) -> std::result::Result<(String, usize), String> {
    let mut root: Value = serde_yaml::from_str(document).map_err(|e| e.to_string())?;
    let services = root
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| "no services section".to_string())?;

    let mut rewritten = 0;
    for (service, definition) in services.iter_mut() {
        let Some(image) = definition.get_mut("image") else {
            continue;
        };
        let Some(reference) = image.as_str() else {
            continue;
        };
        if let Some(name) = local_image(reference, images) {
            let qualified = target.qualify(name);
            debug!(
                "Service {}: {} -> {}",
                service.as_str().unwrap_or("?"),
                reference,
                qualified
            );
            *image = Value::String(qualified);
            rewritten += 1;
        }
    }

    let rendered = serde_yaml::to_string(&root).map_err(|e| e.to_string())?;
    Ok((rendered, rewritten))
}

/// Produces the manifest to submit: the canonical file when not
/// publishing, otherwise a derived copy beside it so relative paths in the
/// document still resolve.
pub fn render(
    path: &Path,
    images: &[&str],
    target: Option<&RegistryTarget>,
) -> Result<RenderedManifest> {
    if !path.is_file() {
        return Err(DeployError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let Some(target) = target else {
        return Ok(RenderedManifest::Canonical(path.to_path_buf()));
    };

    let document = std::fs::read_to_string(path).map_err(|source| DeployError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let (rendered, rewritten) =
        qualify_images(&document, images, target).map_err(|e| manifest_error(path, e))?;
    info!(
        "Qualified {} image reference(s) for {}/{}",
        rewritten, target.registry, target.username
    );

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::Builder::new()
        .prefix(".stack-derived-")
        .suffix(".yml")
        .tempfile_in(dir)
        .map_err(|e| manifest_error(path, e))?;
    std::io::Write::write_all(&mut file, rendered.as_bytes())
        .map_err(|e| manifest_error(path, e))?;
    Ok(RenderedManifest::Derived(file))
}
