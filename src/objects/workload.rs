use super::{ManagedResource, ResourceCollection};
use crate::harness::{improve_error_message, HarnessError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams};
use std::collections::BTreeMap;
use tracing::debug;

impl ManagedResource<Deployment> {
    /// Pods matching the deployment's selector
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pods = deployment.get_pods().await?;
    /// assert_eq!(pods.len(), 3);
    /// ```
    pub async fn get_pods(&self) -> Result<ResourceCollection<ManagedResource<Pod>>, HarnessError> {
        let selector = self
            .object()
            .spec
            .as_ref()
            .map(|s| label_selector_string(&s.selector))
            .unwrap_or_default();

        list_pods(self, &selector).await
    }

    /// Desired replica count (defaults to 1)
    #[must_use]
    pub fn replicas(&self) -> i32 {
        self.object()
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1)
    }
}

impl ManagedResource<Service> {
    /// Pods selected by the service
    ///
    /// A service without a selector selects no pods.
    pub async fn get_pods(&self) -> Result<ResourceCollection<ManagedResource<Pod>>, HarnessError> {
        let Some(labels) = self
            .object()
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .filter(|labels| !labels.is_empty())
        else {
            return Ok(ResourceCollection::default());
        };

        list_pods(self, &labels_string(labels)).await
    }
}

async fn list_pods<K: super::ManagedKind>(
    owner: &ManagedResource<K>,
    selector: &str,
) -> Result<ResourceCollection<ManagedResource<Pod>>, HarnessError> {
    let pods: Api<Pod> = Api::namespaced(owner.client().clone(), owner.namespace());
    let list = pods
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|e| {
            HarnessError::ListError(format!(
                "pods of {}: {}",
                owner.reference(),
                improve_error_message(&e, "Pod", selector)
            ))
        })?;

    debug!(
        namespace = %owner.namespace(),
        owner = %owner.reference(),
        selector = %selector,
        count = list.items.len(),
        "Listed pods"
    );

    Ok(ResourceCollection::new(
        list.items
            .into_iter()
            .map(|pod| {
                ManagedResource::existing(
                    owner.client().clone(),
                    owner.namespace(),
                    pod,
                    owner.poll_interval,
                )
            })
            .collect(),
    ))
}

fn labels_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a `LabelSelector` in the API's query syntax
pub(crate) fn label_selector_string(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        let part = match expr.operator.as_str() {
            "In" => format!("{} in ({values})", expr.key),
            "NotIn" => format!("{} notin ({values})", expr.key),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => {
                debug!(operator = %other, key = %expr.key, "Skipping unknown selector operator");
                continue;
            }
        };
        parts.push(part);
    }

    parts.join(",")
}
