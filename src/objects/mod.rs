//! Typed handles to cluster objects
//!
//! A [`ManagedResource`] pairs the spec a test loaded (or listed) with the
//! latest status observed on the cluster. Readiness and deletion waits only
//! observe the object; the control plane is what moves it forward.
//!
//! ```text
//! Loaded ──create──▶ Created ──(observed ready)──▶ Ready
//!    │                  │                            │
//!    └──────────────delete──────────────────────────┘
//!                       ▼
//!                   Deleting ──(observed gone)──▶ Deleted
//! ```

mod collection;
mod pod;
mod workload;

pub use collection::{Named, ResourceCollection};
pub use pod::Container;

use crate::harness::{improve_error_message, HarnessError};
use crate::wait::{ResourceState, WaitError, WaitEvent};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Event, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where a resource is in its lifecycle, as far as this process knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Parsed from a manifest, not yet submitted
    Loaded,
    /// Accepted by the API server
    Created,
    /// Readiness predicate observed to hold
    Ready,
    /// Deletion requested
    Deleting,
    /// Observed absent after deletion
    Deleted,
}

/// Result of one readiness evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// Human-readable observed state, reported on timeout
    pub state: String,
}

impl Readiness {
    fn of<K: ResourceState>(ready: bool, object: &K) -> Self {
        Self {
            ready,
            state: object.state_description(),
        }
    }
}

/// Kinds the harness can create, poll and delete
#[async_trait]
pub trait ManagedKind:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + k8s_openapi::Resource
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + ResourceState
    + Send
    + Sync
    + 'static
{
    /// Evaluate the readiness predicate against an observed copy
    async fn readiness(&self, client: &Client, namespace: &str)
        -> Result<Readiness, HarnessError>;
}

#[async_trait]
impl ManagedKind for Deployment {
    /// Desired replicas are all available and the controller has seen the
    /// current generation
    async fn readiness(&self, _: &Client, _: &str) -> Result<Readiness, HarnessError> {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = self.status.as_ref();
        let available = status.and_then(|s| s.available_replicas).unwrap_or(0);
        let observed = status.and_then(|s| s.observed_generation);
        let generation_seen = match (self.metadata.generation, observed) {
            (Some(generation), Some(observed)) => observed >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        };

        Ok(Readiness::of(generation_seen && available == desired, self))
    }
}

#[async_trait]
impl ManagedKind for Pod {
    async fn readiness(&self, _: &Client, _: &str) -> Result<Readiness, HarnessError> {
        let running = self.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");
        let containers_ready = self
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .is_some_and(|statuses| !statuses.is_empty() && statuses.iter().all(|c| c.ready));

        Ok(Readiness::of(running && containers_ready, self))
    }
}

#[async_trait]
impl ManagedKind for Ingress {
    async fn readiness(&self, _: &Client, _: &str) -> Result<Readiness, HarnessError> {
        let assigned = self
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|e| e.ip.is_some() || e.hostname.is_some())
            });

        Ok(Readiness::of(assigned, self))
    }
}

#[async_trait]
impl ManagedKind for Service {
    /// Ready once the same-named Endpoints object has a ready address.
    /// `ExternalName` services have no endpoints and are ready on sight.
    async fn readiness(&self, client: &Client, namespace: &str) -> Result<Readiness, HarnessError> {
        let external = self.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("ExternalName");
        if external {
            return Ok(Readiness::of(true, self));
        }

        let name = self.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Endpoints> = Api::namespaced(client.clone(), namespace);
        let endpoints = match api.get(name).await {
            Ok(ep) => ep,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Ok(Readiness {
                    ready: false,
                    state: format!("{}, no endpoints yet", self.state_description()),
                })
            }
            Err(e) => {
                return Err(HarnessError::GetError(improve_error_message(
                    &e, "Endpoints", name,
                )))
            }
        };

        let populated = endpoints.subsets.iter().flatten().any(|subset| {
            subset
                .addresses
                .as_ref()
                .is_some_and(|addresses| !addresses.is_empty())
        });

        Ok(Readiness {
            ready: populated,
            state: format!(
                "{}, {}",
                self.state_description(),
                endpoints.state_description()
            ),
        })
    }
}

#[async_trait]
impl ManagedKind for ConfigMap {
    async fn readiness(&self, _: &Client, _: &str) -> Result<Readiness, HarnessError> {
        Ok(Readiness::of(true, self))
    }
}

/// A cluster object tracked by the harness
#[derive(Clone)]
pub struct ManagedResource<K> {
    client: Client,
    namespace: String,
    poll_interval: Duration,
    desired: K,
    observed: Option<K>,
    lifecycle: Lifecycle,
    /// Set once the object is known to exist on the cluster
    created: bool,
}

impl<K: Debug> Debug for ManagedResource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedResource")
            .field("namespace", &self.namespace)
            .field("lifecycle", &self.lifecycle)
            .field("desired", &self.desired)
            .field("observed", &self.observed)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedKind> ManagedResource<K> {
    /// Wrap an object parsed from a manifest
    pub(crate) fn loaded(client: Client, namespace: &str, mut object: K, poll: Duration) -> Self {
        object.meta_mut().namespace = Some(namespace.to_string());
        Self {
            client,
            namespace: namespace.to_string(),
            poll_interval: poll,
            desired: object,
            observed: None,
            lifecycle: Lifecycle::Loaded,
            created: false,
        }
    }

    /// Wrap an object read back from the cluster
    pub(crate) fn existing(client: Client, namespace: &str, object: K, poll: Duration) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            poll_interval: poll,
            desired: object.clone(),
            observed: Some(object),
            lifecycle: Lifecycle::Created,
            created: true,
        }
    }

    /// `Kind` as the API server names it
    #[must_use]
    pub fn kind(&self) -> &'static str {
        K::KIND
    }

    /// `metadata.name`
    #[must_use]
    pub fn name(&self) -> &str {
        self.desired.meta().name.as_deref().unwrap_or_default()
    }

    /// Namespace the resource lives in
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// kubectl-style reference, e.g. `deployment/echo`
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", K::KIND.to_lowercase(), self.name())
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The spec as loaded, before any server defaulting
    #[must_use]
    pub fn desired(&self) -> &K {
        &self.desired
    }

    /// Latest observed copy, or the desired spec if never observed
    #[must_use]
    pub fn object(&self) -> &K {
        self.observed.as_ref().unwrap_or(&self.desired)
    }

    /// Latest observed copy, if any
    #[must_use]
    pub fn observed(&self) -> Option<&K> {
        self.observed.as_ref()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn api(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub(crate) fn mark_created(&mut self, observed: K) {
        self.observed = Some(observed);
        self.lifecycle = Lifecycle::Created;
        self.created = true;
    }

    pub(crate) fn mark_deleting(&mut self) {
        self.lifecycle = Lifecycle::Deleting;
    }

    /// A readiness observation never revives a resource being deleted
    fn mark_ready(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Created | Lifecycle::Ready) {
            self.lifecycle = Lifecycle::Ready;
        }
    }

    fn ensure_created(&self) -> Result<(), HarnessError> {
        if !self.created {
            return Err(HarnessError::NotCreated {
                kind: K::KIND.to_string(),
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Re-read the observed copy from the cluster
    ///
    /// The desired spec is left as loaded.
    pub async fn refresh(&mut self) -> Result<(), HarnessError> {
        self.ensure_created()?;
        let name = self.name().to_string();
        let latest = self
            .api()
            .get(&name)
            .await
            .map_err(|e| HarnessError::GetError(improve_error_message(&e, K::KIND, &name)))?;
        self.observed = Some(latest);
        Ok(())
    }

    /// Refresh and evaluate the readiness predicate once
    pub async fn is_ready(&mut self) -> Result<bool, HarnessError> {
        self.refresh().await?;
        let readiness = self
            .object()
            .readiness(&self.client, &self.namespace)
            .await?;
        if readiness.ready {
            self.mark_ready();
        }
        Ok(readiness.ready)
    }

    /// Poll until the readiness predicate holds
    ///
    /// # Errors
    ///
    /// `NotCreated` if the resource was never created, `WaitTimeout` with the
    /// last observed state if `timeout` elapses first.
    pub async fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        self.ensure_created()?;
        let name = self.name().to_string();
        let api = self.api();
        let start = Instant::now();

        debug!(
            namespace = %self.namespace,
            resource = %self.reference(),
            timeout = ?timeout,
            "Waiting for resource to be ready"
        );

        loop {
            let last_state = match api.get(&name).await {
                Ok(latest) => {
                    let readiness = latest.readiness(&self.client, &self.namespace).await?;
                    self.observed = Some(latest);
                    if readiness.ready {
                        self.mark_ready();
                        info!(
                            namespace = %self.namespace,
                            resource = %self.reference(),
                            elapsed = ?start.elapsed(),
                            "Resource is ready"
                        );
                        return Ok(());
                    }
                    debug!(
                        resource = %self.reference(),
                        state = %readiness.state,
                        elapsed = ?start.elapsed(),
                        "Resource not ready yet"
                    );
                    readiness.state
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!(
                        resource = %self.reference(),
                        elapsed = ?start.elapsed(),
                        "Resource doesn't exist yet, waiting..."
                    );
                    "not found".to_string()
                }
                Err(e) => {
                    return Err(HarnessError::GetError(improve_error_message(
                        &e,
                        K::KIND,
                        &name,
                    )))
                }
            };

            if start.elapsed() >= timeout {
                let events = recent_events(&self.client, &self.namespace, &name).await;
                return Err(WaitError::new(self.reference(), timeout, start.elapsed())
                    .with_state(last_state)
                    .with_events(events)
                    .into());
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll until the resource is gone from the cluster
    pub async fn wait_until_deleted(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        let name = self.name().to_string();
        let api = self.api();
        let start = Instant::now();

        debug!(
            namespace = %self.namespace,
            resource = %self.reference(),
            timeout = ?timeout,
            "Waiting for resource to be deleted"
        );

        loop {
            match api.get(&name).await {
                Ok(latest) => {
                    debug!(
                        resource = %self.reference(),
                        elapsed = ?start.elapsed(),
                        "Resource still exists, waiting for deletion..."
                    );
                    self.observed = Some(latest);
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    self.lifecycle = Lifecycle::Deleted;
                    self.observed = None;
                    info!(
                        namespace = %self.namespace,
                        resource = %self.reference(),
                        elapsed = ?start.elapsed(),
                        "Resource deleted"
                    );
                    return Ok(());
                }
                Err(e) => {
                    return Err(HarnessError::GetError(improve_error_message(
                        &e,
                        K::KIND,
                        &name,
                    )))
                }
            }

            if start.elapsed() >= timeout {
                let state = self
                    .observed
                    .as_ref()
                    .map_or_else(|| "still exists".to_string(), |o| {
                        format!("still exists ({})", o.state_description())
                    });
                return Err(WaitError::new(self.reference(), timeout, start.elapsed())
                    .with_state(state)
                    .into());
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl<K: ManagedKind> Named for ManagedResource<K> {
    fn name(&self) -> &str {
        ManagedResource::name(self)
    }
}

/// Last few events involving `name`, newest last; empty if they can't be read
async fn recent_events(client: &Client, namespace: &str, name: &str) -> Vec<WaitEvent> {
    let api: Api<Event> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().fields(&format!("involvedObject.name={name}"));

    match api.list(&params).await {
        Ok(list) => {
            let skip = list.items.len().saturating_sub(5);
            list.items.iter().skip(skip).map(WaitEvent::from).collect()
        }
        Err(e) => {
            debug!(resource = %name, error = %e, "Could not read events for wait error");
            Vec::new()
        }
    }
}
