//! kubetest - Kubernetes integration testing
//!
//! Each test gets a [`Harness`] bound to a fresh namespace. Through it the
//! test loads manifests, creates the objects, waits for them to become
//! ready, talks HTTP to pods through the API server proxy and reads
//! container logs. The namespace is deleted afterwards.
//!
//! # Example
//!
//! ```ignore
//! use kubetest::Harness;
//! use std::time::Duration;
//!
//! #[kubetest::test]
//! async fn echo_deployment(kube: Harness) {
//!     let mut deployment = kube.load_deployment("tests/configs/deployment.yaml").unwrap();
//!     kube.create(&mut deployment).await.unwrap();
//!     deployment.wait_until_ready(Duration::from_secs(20)).await.unwrap();
//!
//!     let pods = deployment.get_pods().await.unwrap();
//!     let response = pods[0].http_proxy_get("/test/get", [("abc", 123)]).await.unwrap();
//!     assert_eq!(response.status, 200);
//! }
//! ```
//!
//! Manifests can also be applied before the body runs; the attribute waits
//! for all of them to be ready first:
//!
//! ```ignore
//! #[kubetest::test(apply_manifests(dir = "tests/configs", files = ["nginx-ingress.yaml"]))]
//! async fn nginx_ingress(kube: Harness) {
//!     let deployments = kube.get_deployments().await.unwrap();
//!     assert!(deployments.get("echo-deployment").is_some());
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod harness;
pub mod manifest;
pub mod objects;
pub mod proxy;
pub mod telemetry;
pub mod wait;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, HarnessConfig};
pub use diagnostics::Diagnostics;
pub use harness::{Harness, HarnessError, Registered};
pub use manifest::{Manifest, ManifestError};
pub use objects::{Container, Lifecycle, ManagedKind, ManagedResource, Named, ResourceCollection};
pub use proxy::{HttpResponse, ProxyError};
pub use wait::{WaitError, WaitEvent};

pub use kubetest_macros::test;

/// Used by code generated from `#[kubetest::test]`
#[doc(hidden)]
pub mod __private {
    pub use futures;
    pub use tokio;
}
