use super::{Harness, HarnessError};
use crate::manifest::{load_single, FromManifest};
use crate::objects::{ManagedKind, ManagedResource};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::path::Path;
use tracing::debug;

impl Harness {
    /// Load a Deployment manifest into the harness namespace
    ///
    /// Nothing is sent to the cluster until [`Harness::create`].
    pub fn load_deployment(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ManagedResource<Deployment>, HarnessError> {
        self.load(path.as_ref())
    }

    /// Load an Ingress manifest into the harness namespace
    pub fn load_ingress(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ManagedResource<Ingress>, HarnessError> {
        self.load(path.as_ref())
    }

    /// Load a Service manifest into the harness namespace
    pub fn load_service(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ManagedResource<Service>, HarnessError> {
        self.load(path.as_ref())
    }

    /// Load a Pod manifest into the harness namespace
    pub fn load_pod(&self, path: impl AsRef<Path>) -> Result<ManagedResource<Pod>, HarnessError> {
        self.load(path.as_ref())
    }

    fn load<K: ManagedKind + FromManifest>(
        &self,
        path: &Path,
    ) -> Result<ManagedResource<K>, HarnessError> {
        let object: K = load_single(path)?;
        let resource = self.adopt(object);
        debug!(
            namespace = %self.namespace,
            resource = %resource.reference(),
            path = %path.display(),
            "Loaded resource"
        );
        Ok(resource)
    }

    /// Wrap an in-memory object, retargeted at the harness namespace
    pub(crate) fn adopt<K: ManagedKind>(&self, object: K) -> ManagedResource<K> {
        ManagedResource::loaded(
            self.client.clone(),
            &self.namespace,
            object,
            self.config.poll_interval,
        )
    }
}
