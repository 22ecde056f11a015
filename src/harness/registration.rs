use super::{Harness, HarnessError};
use crate::manifest::{load_dir, Manifest};
use crate::objects::{Lifecycle, ManagedResource, Named};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::path::Path;
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use tracing::info;

/// A resource created by [`Harness::apply_manifests`]
#[derive(Debug, Clone)]
pub enum Registered {
    Deployment(ManagedResource<Deployment>),
    Service(ManagedResource<Service>),
    Ingress(ManagedResource<Ingress>),
    Pod(ManagedResource<Pod>),
    ConfigMap(ManagedResource<ConfigMap>),
}

macro_rules! each_variant {
    ($value:expr, $resource:ident => $body:expr) => {
        match $value {
            Registered::Deployment($resource) => $body,
            Registered::Service($resource) => $body,
            Registered::Ingress($resource) => $body,
            Registered::Pod($resource) => $body,
            Registered::ConfigMap($resource) => $body,
        }
    };
}

impl Registered {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        each_variant!(self, r => r.kind())
    }

    /// kubectl-style reference, e.g. `service/echo-service`
    #[must_use]
    pub fn reference(&self) -> String {
        each_variant!(self, r => r.reference())
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        each_variant!(self, r => r.lifecycle())
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        each_variant!(self, r => r.wait_until_ready(timeout).await)
    }
}

impl Named for Registered {
    fn name(&self) -> &str {
        each_variant!(self, r => r.name())
    }
}

impl Harness {
    /// Create every object in `files` (relative to `dir`) and register it
    ///
    /// Files are applied in order, documents within a file top to bottom.
    /// Registered resources are what [`Harness::wait_for_registered`] waits
    /// on.
    pub async fn apply_manifests<S: AsRef<str>>(
        &self,
        dir: impl AsRef<Path>,
        files: &[S],
    ) -> Result<Vec<Registered>, HarnessError> {
        let manifests = load_dir(dir.as_ref(), files)?;
        let mut applied = Vec::with_capacity(manifests.len());

        for manifest in manifests {
            let registered = match manifest {
                Manifest::Deployment(o) => Registered::Deployment(self.create_adopted(o).await?),
                Manifest::Service(o) => Registered::Service(self.create_adopted(o).await?),
                Manifest::Ingress(o) => Registered::Ingress(self.create_adopted(o).await?),
                Manifest::Pod(o) => Registered::Pod(self.create_adopted(o).await?),
                Manifest::ConfigMap(o) => Registered::ConfigMap(self.create_adopted(o).await?),
            };

            self.registered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(registered.clone());
            applied.push(registered);
        }

        info!(
            namespace = %self.namespace,
            dir = %dir.as_ref().display(),
            count = applied.len(),
            "Applied manifests"
        );

        Ok(applied)
    }

    /// Snapshot of everything registered so far
    #[must_use]
    pub fn registered(&self) -> Vec<Registered> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until every registered resource is ready
    ///
    /// `timeout` is one deadline shared by all resources, not a per-resource
    /// budget. Fails with the first resource still unready at the deadline.
    /// Every resource waited on is recorded with its latest observed state,
    /// including the one that timed out.
    pub async fn wait_for_registered(&self, timeout: Duration) -> Result<(), HarnessError> {
        let start = Instant::now();
        let pending = self.registered();

        info!(
            namespace = %self.namespace,
            count = pending.len(),
            timeout = ?timeout,
            "Waiting for registered resources"
        );

        for (index, mut resource) in pending.into_iter().enumerate() {
            let remaining = timeout.saturating_sub(start.elapsed());
            let outcome = resource.wait_until_ready(remaining).await;

            // only ever appended to, so the index is stable
            if let Some(slot) = self
                .registered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(index)
            {
                *slot = resource;
            }
            outcome?;
        }

        info!(
            namespace = %self.namespace,
            elapsed = ?start.elapsed(),
            "All registered resources ready"
        );
        Ok(())
    }

    async fn create_adopted<K: crate::objects::ManagedKind>(
        &self,
        object: K,
    ) -> Result<ManagedResource<K>, HarnessError> {
        let mut resource = self.adopt(object);
        self.create(&mut resource).await?;
        Ok(resource)
    }
}
