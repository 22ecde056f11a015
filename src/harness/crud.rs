use super::{improve_error_message, is_status, Harness, HarnessError};
use crate::objects::{ManagedKind, ManagedResource, ResourceCollection};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::{debug, info};

impl Harness {
    /// Submit a loaded resource to the cluster
    ///
    /// The object always lands in the harness namespace. On success the
    /// server's copy becomes the observed state.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Conflict`] if an object with the same name already
    /// exists in the namespace.
    pub async fn create<K: ManagedKind>(
        &self,
        resource: &mut ManagedResource<K>,
    ) -> Result<(), HarnessError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut object = resource.desired().clone();
        object.meta_mut().namespace = Some(self.namespace.clone());
        let name = resource.name().to_string();

        let created = match api.create(&PostParams::default(), &object).await {
            Ok(created) => created,
            Err(e) if is_status(&e, 409) => {
                return Err(HarnessError::Conflict {
                    kind: K::KIND.to_string(),
                    name,
                    namespace: self.namespace.clone(),
                })
            }
            Err(e) => {
                return Err(HarnessError::CreateError(improve_error_message(
                    &e,
                    K::KIND,
                    &name,
                )))
            }
        };

        info!(
            namespace = %self.namespace,
            resource = %resource.reference(),
            "Created resource"
        );

        resource.mark_created(created);
        Ok(())
    }

    /// Request deletion without waiting for it
    ///
    /// Pair with `wait_until_deleted` to block until the object is gone. A
    /// resource that no longer exists is not an error.
    pub async fn delete<K: ManagedKind>(
        &self,
        resource: &mut ManagedResource<K>,
    ) -> Result<(), HarnessError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), resource.namespace());
        let name = resource.name().to_string();

        match api.delete(&name, &DeleteParams::foreground()).await {
            Ok(_) => {
                info!(
                    namespace = %resource.namespace(),
                    resource = %resource.reference(),
                    "Deleted resource"
                );
            }
            Err(e) if is_status(&e, 404) => {
                debug!(
                    resource = %resource.reference(),
                    "Resource already gone"
                );
            }
            Err(e) => {
                return Err(HarnessError::DeleteError(improve_error_message(
                    &e,
                    K::KIND,
                    &name,
                )))
            }
        }

        resource.mark_deleting();
        Ok(())
    }

    /// All Deployments in the test namespace
    pub async fn get_deployments(
        &self,
    ) -> Result<ResourceCollection<ManagedResource<Deployment>>, HarnessError> {
        self.list_all().await
    }

    /// All Ingresses in the test namespace
    pub async fn get_ingresses(
        &self,
    ) -> Result<ResourceCollection<ManagedResource<Ingress>>, HarnessError> {
        self.list_all().await
    }

    /// All Services in the test namespace
    pub async fn get_services(
        &self,
    ) -> Result<ResourceCollection<ManagedResource<Service>>, HarnessError> {
        self.list_all().await
    }

    /// All Pods in the test namespace
    pub async fn get_pods(&self) -> Result<ResourceCollection<ManagedResource<Pod>>, HarnessError> {
        self.list_all().await
    }

    /// Events recorded in the test namespace, oldest first
    pub async fn get_namespace_events(&self) -> Result<Vec<Event>, HarnessError> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut events = api
            .list(&ListParams::default())
            .await
            .map_err(|e| HarnessError::ListError(format!("events: {e}")))?
            .items;

        events.sort_by(|a, b| event_time(a).cmp(&event_time(b)));
        Ok(events)
    }

    async fn list_all<K: ManagedKind>(
        &self,
    ) -> Result<ResourceCollection<ManagedResource<K>>, HarnessError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| HarnessError::ListError(format!("{}: {e}", K::KIND)))?;

        debug!(
            namespace = %self.namespace,
            kind = K::KIND,
            count = list.items.len(),
            "Listed resources"
        );

        Ok(ResourceCollection::new(
            list.items
                .into_iter()
                .map(|object| {
                    ManagedResource::existing(
                        self.client.clone(),
                        &self.namespace,
                        object,
                        self.config.poll_interval,
                    )
                })
                .collect(),
        ))
    }
}

/// Most specific timestamp an event carries
fn event_time(event: &Event) -> Option<k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::objects::Lifecycle;
    use crate::testing::{mock_client, not_found, ok_json, status, MockCall};
    use http::Method;
    use serde_json::json;

    fn deployment() -> Deployment {
        serde_json::from_value(json!({
            "metadata": { "name": "echo" },
            "spec": {
                "selector": { "matchLabels": { "app": "echo" } },
                "template": { "spec": { "containers": [{ "name": "echo", "image": "echo:1" }] } }
            }
        }))
        .unwrap()
    }

    fn created_json() -> serde_json::Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "echo", "namespace": "kubetest-0a1b2c3d", "uid": "u-1", "resourceVersion": "7" },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": "echo" } },
                "template": { "spec": { "containers": [{ "name": "echo", "image": "echo:1" }] } }
            }
        })
    }

    #[tokio::test]
    async fn test_create_posts_into_harness_namespace() {
        let (client, calls) = mock_client(|_| ok_json(created_json()));
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        let mut resource = harness.adopt(deployment());

        harness.create(&mut resource).await.unwrap();

        assert_eq!(resource.lifecycle(), Lifecycle::Created);
        assert_eq!(
            resource.observed().unwrap().metadata.uid.as_deref(),
            Some("u-1")
        );

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].method, Method::POST);
        assert!(calls[0]
            .uri
            .starts_with("/apis/apps/v1/namespaces/kubetest-0a1b2c3d/deployments"));
        assert_eq!(calls[0].json()["metadata"]["namespace"], "kubetest-0a1b2c3d");
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let (client, _) = mock_client(|_| status(409, "AlreadyExists"));
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        let mut resource = harness.adopt(deployment());

        let err = harness.create(&mut resource).await.unwrap_err();
        match err {
            HarnessError::Conflict { kind, name, .. } => {
                assert_eq!(kind, "Deployment");
                assert_eq!(name, "echo");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(resource.lifecycle(), Lifecycle::Loaded);
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_is_ok() {
        let (client, calls) = mock_client(|_| not_found());
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        let mut resource = harness.adopt(deployment());

        harness.delete(&mut resource).await.unwrap();

        assert_eq!(resource.lifecycle(), Lifecycle::Deleting);
        assert_eq!(calls.lock().unwrap()[0].method, Method::DELETE);
    }

    #[tokio::test]
    async fn test_deleted_before_create_cannot_become_ready() {
        let (client, calls) = mock_client(|_| not_found());
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        let mut resource = harness.adopt(deployment());
        harness.delete(&mut resource).await.unwrap();

        let err = resource
            .wait_until_ready(std::time::Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::NotCreated { .. }));
        assert_eq!(resource.lifecycle(), Lifecycle::Deleting);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_surfaces() {
        let (client, _) = mock_client(|_| status(403, "Forbidden"));
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        let mut resource = harness.adopt(deployment());

        let err = harness.delete(&mut resource).await.unwrap_err();
        assert!(matches!(err, HarnessError::DeleteError(ref msg) if msg.contains("RBAC")));
    }

    #[tokio::test]
    async fn test_get_deployments_lists_namespace() {
        let (client, calls) = mock_client(|call: &MockCall| {
            assert!(call
                .uri
                .starts_with("/apis/apps/v1/namespaces/kubetest-0a1b2c3d/deployments"));
            ok_json(json!({
                "apiVersion": "apps/v1",
                "kind": "DeploymentList",
                "metadata": {},
                "items": [created_json()]
            }))
        });
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());

        let deployments = harness.get_deployments().await.unwrap();
        assert_eq!(deployments.len(), 1);
        let echo = deployments.get("echo").unwrap();
        assert_eq!(echo.lifecycle(), Lifecycle::Created);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_are_sorted() {
        let (client, _) = mock_client(|_| {
            ok_json(json!({
                "apiVersion": "v1",
                "kind": "EventList",
                "metadata": {},
                "items": [
                    {
                        "metadata": { "name": "b" },
                        "involvedObject": {},
                        "reason": "Started",
                        "lastTimestamp": "2024-01-01T00:00:05Z"
                    },
                    {
                        "metadata": { "name": "a" },
                        "involvedObject": {},
                        "reason": "Scheduled",
                        "lastTimestamp": "2024-01-01T00:00:01Z"
                    }
                ]
            }))
        });
        let harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());

        let events = harness.get_namespace_events().await.unwrap();
        let reasons: Vec<_> = events.iter().filter_map(|e| e.reason.as_deref()).collect();
        assert_eq!(reasons, vec!["Scheduled", "Started"]);
    }
}
