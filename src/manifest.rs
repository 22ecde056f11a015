//! Manifest loading
//!
//! Reads YAML manifest files into typed Kubernetes objects. A file may hold
//! several documents separated by `---`; empty documents are skipped.
//!
//! # Example
//!
//! ```ignore
//! use kubetest::manifest::{load_path, Manifest};
//!
//! for manifest in load_path("tests/configs/nginx-ingress.yaml")? {
//!     println!("{}", manifest.reference());
//! }
//! ```

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors from reading or decoding a manifest file
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {reason}")]
    InvalidYaml { path: PathBuf, reason: String },

    #[error("document {index} in {path} has no 'kind'")]
    MissingKind { path: PathBuf, index: usize },

    #[error("unsupported kind '{kind}' in {path}")]
    UnsupportedKind { path: PathBuf, kind: String },

    #[error("expected a {expected} in {path}, found {found}")]
    KindMismatch {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("manifest {0} contains no documents")]
    Empty(PathBuf),

    #[error("{kind} in {path} has no metadata.name")]
    MissingName { path: PathBuf, kind: String },
}

/// One decoded manifest document
#[derive(Debug, Clone)]
pub enum Manifest {
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
    Pod(Pod),
    ConfigMap(ConfigMap),
}

impl Manifest {
    /// The `kind` of this document
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::Deployment(_) => "Deployment",
            Manifest::Service(_) => "Service",
            Manifest::Ingress(_) => "Ingress",
            Manifest::Pod(_) => "Pod",
            Manifest::ConfigMap(_) => "ConfigMap",
        }
    }

    /// `metadata.name`, if set
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        let meta = match self {
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::Ingress(o) => &o.metadata,
            Manifest::Pod(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
        };
        meta.name.as_deref()
    }

    /// kubectl-style reference, e.g. `deployment/echo`
    #[must_use]
    pub fn reference(&self) -> String {
        format!(
            "{}/{}",
            self.kind().to_lowercase(),
            self.name().unwrap_or("<unnamed>")
        )
    }
}

/// Load every document of a manifest file
pub fn load_path(path: impl AsRef<Path>) -> Result<Vec<Manifest>, ManifestError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ManifestError::NotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let manifests = parse_documents(&text, path)?;
    if manifests.is_empty() {
        return Err(ManifestError::Empty(path.to_path_buf()));
    }

    debug!(path = %path.display(), documents = manifests.len(), "Loaded manifest");
    Ok(manifests)
}

/// Load several files from one directory, in the given order
pub fn load_dir<S: AsRef<str>>(
    dir: impl AsRef<Path>,
    files: &[S],
) -> Result<Vec<Manifest>, ManifestError> {
    let dir = dir.as_ref();
    let mut all = Vec::new();
    for file in files {
        all.extend(load_path(dir.join(file.as_ref()))?);
    }
    Ok(all)
}

/// Load a file that must contain exactly one object of kind `K`
///
/// Extra documents are ignored after the first; a first document of a
/// different kind is a [`ManifestError::KindMismatch`].
pub(crate) fn load_single<K>(path: &Path) -> Result<K, ManifestError>
where
    K: k8s_openapi::Resource + FromManifest,
{
    let first = load_path(path)?
        .into_iter()
        .next()
        .ok_or_else(|| ManifestError::Empty(path.to_path_buf()))?;

    K::from_manifest(first).map_err(|found| ManifestError::KindMismatch {
        path: path.to_path_buf(),
        expected: K::KIND,
        found: found.kind().to_string(),
    })
}

/// Extract a typed object back out of a [`Manifest`]
pub trait FromManifest: Sized {
    /// Returns the manifest unchanged when it is a different kind
    fn from_manifest(manifest: Manifest) -> Result<Self, Manifest>;
}

macro_rules! impl_from_manifest {
    ($($ty:ident),* $(,)?) => {
        $(
            impl FromManifest for $ty {
                fn from_manifest(manifest: Manifest) -> Result<Self, Manifest> {
                    match manifest {
                        Manifest::$ty(obj) => Ok(obj),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_from_manifest!(Deployment, Service, Ingress, Pod, ConfigMap);

fn parse_documents(text: &str, path: &Path) -> Result<Vec<Manifest>, ManifestError> {
    let mut manifests = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            ManifestError::InvalidYaml {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        if value.is_null() {
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .ok_or_else(|| ManifestError::MissingKind {
                path: path.to_path_buf(),
                index,
            })?
            .to_string();

        let manifest = decode(&kind, value, path)?;
        if manifest.name().is_none() {
            return Err(ManifestError::MissingName {
                path: path.to_path_buf(),
                kind,
            });
        }
        manifests.push(manifest);
    }

    Ok(manifests)
}

fn decode(kind: &str, value: serde_yaml::Value, path: &Path) -> Result<Manifest, ManifestError> {
    let invalid = |e: serde_yaml::Error| ManifestError::InvalidYaml {
        path: path.to_path_buf(),
        reason: format!("{kind}: {e}"),
    };

    let manifest = match kind {
        "Deployment" => Manifest::Deployment(serde_yaml::from_value(value).map_err(invalid)?),
        "Service" => Manifest::Service(serde_yaml::from_value(value).map_err(invalid)?),
        "Ingress" => Manifest::Ingress(serde_yaml::from_value(value).map_err(invalid)?),
        "Pod" => Manifest::Pod(serde_yaml::from_value(value).map_err(invalid)?),
        "ConfigMap" => Manifest::ConfigMap(serde_yaml::from_value(value).map_err(invalid)?),
        other => {
            return Err(ManifestError::UnsupportedKind {
                path: path.to_path_buf(),
                kind: other.to_string(),
            })
        }
    };

    Ok(manifest)
}
