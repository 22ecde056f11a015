//! Test-scoped cluster harness
//!
//! A [`Harness`] owns a client and one namespace. Everything a test creates
//! goes into that namespace, and deleting the namespace at teardown removes
//! it all.
//!
//! # Errors
//!
//! Fallible methods return [`HarnessError`]. Kubernetes API failures carry a
//! message naming the resource kind and name; manifest, wait and proxy
//! failures keep their typed source.

#![allow(clippy::missing_errors_doc)]

mod crud;
mod diagnostics;
mod lifecycle;
mod loading;
mod registration;

pub use lifecycle::TEST_NAMESPACE_LABEL;
pub use registration::Registered;

use crate::config::{ConfigError, HarnessConfig};
use crate::manifest::ManifestError;
use crate::proxy::ProxyError;
use crate::wait::WaitError;
use kube::Client;
use std::sync::Mutex;

/// Cluster connection plus an isolated namespace, one per test
///
/// ```ignore
/// use kubetest::Harness;
/// use std::time::Duration;
///
/// let kube = Harness::new().await?;
/// let mut deployment = kube.load_deployment("tests/configs/deployment.yaml")?;
/// kube.create(&mut deployment).await?;
/// deployment.wait_until_ready(Duration::from_secs(20)).await?;
/// kube.cleanup().await?;
/// ```
pub struct Harness {
    /// Kubernetes client
    pub client: Client,
    /// Namespace every operation targets
    pub namespace: String,
    config: HarnessConfig,
    /// Created by this harness, so deleted by [`Harness::cleanup`]
    owns_namespace: bool,
    registered: Mutex<Vec<Registered>>,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("namespace", &self.namespace)
            .field("owns_namespace", &self.owns_namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Errors from harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("Failed to create namespace: {0}")]
    NamespaceError(String),

    #[error("Failed to cleanup namespace: {0}")]
    CleanupError(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("{kind} '{name}' already exists in namespace '{namespace}'")]
    Conflict {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Failed to create resource: {0}")]
    CreateError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("Failed to delete resource: {0}")]
    DeleteError(String),

    #[error("Failed to list resources: {0}")]
    ListError(String),

    #[error("Failed to get logs: {0}")]
    LogsError(String),

    #[error("{0}")]
    WaitTimeout(#[from] WaitError),

    #[error("Proxy request failed: {0}")]
    Proxy(#[from] ProxyError),

    #[error("{kind} '{name}' has not been created on the cluster")]
    NotCreated { kind: String, name: String },
}

/// Rewrite a kube error into a message naming the resource
pub(crate) fn improve_error_message(
    err: &kube::Error,
    resource_kind: &str,
    resource_name: &str,
) -> String {
    if let kube::Error::Api(response) = err {
        match response.code {
            404 => return format!("{resource_kind} '{resource_name}' not found in namespace"),
            409 => return format!("{resource_kind} '{resource_name}' already exists"),
            403 => {
                return format!(
                    "{resource_kind} '{resource_name}': permission denied (check RBAC): {}",
                    response.message
                )
            }
            422 => {
                return format!(
                    "{resource_kind} '{resource_name}' rejected as invalid: {}",
                    response.message
                )
            }
            _ => {}
        }
    }

    let raw = err.to_string();
    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }
    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{resource_kind} '{resource_name}': operation timed out");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}

/// Whether `err` is the API server reporting HTTP `code`
pub(crate) fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}
