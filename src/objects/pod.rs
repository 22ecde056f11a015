use super::{ManagedResource, Named, ResourceCollection};
use crate::harness::{improve_error_message, HarnessError};
use crate::proxy::{encode_body, primary_port, stringify_query, HttpResponse, ProxyTarget};
use http::Method;
use k8s_openapi::api::core::v1::{Container as ContainerSpec, ContainerStatus, Pod};
use kube::api::{Api, LogParams};
use kube::Client;
use serde::Serialize;
use tracing::debug;

impl ManagedResource<Pod> {
    /// Containers declared by the pod, paired with their observed status
    #[must_use]
    pub fn get_containers(&self) -> ResourceCollection<Container> {
        let pod = self.object();
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();

        let containers = pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .map(|spec| Container {
                client: self.client.clone(),
                namespace: self.namespace.clone(),
                pod: self.name().to_string(),
                status: statuses.iter().find(|s| s.name == spec.name).cloned(),
                spec: spec.clone(),
            })
            .collect();

        ResourceCollection::new(containers)
    }

    /// Whether every container reports ready, as last observed
    #[must_use]
    pub fn containers_ready(&self) -> bool {
        let containers = self.get_containers();
        !containers.is_empty() && containers.iter().all(Container::is_ready)
    }

    /// GET `path` on the pod's first declared port via the API server proxy
    ///
    /// Query values are stringified before sending.
    ///
    /// ```ignore
    /// let response = pod.http_proxy_get("/test/get", [("abc", 123)]).await?;
    /// assert_eq!(response.status, 200);
    /// ```
    pub async fn http_proxy_get<I, K, V>(
        &self,
        path: &str,
        query: I,
    ) -> Result<HttpResponse, HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        self.ensure_created()?;
        let target = self.proxy_target();
        let response = target
            .send(&self.client, Method::GET, path, &stringify_query(query), None)
            .await?;
        Ok(response)
    }

    /// POST `data` as JSON to `path` on the pod via the API server proxy
    pub async fn http_proxy_post<I, K, V, T>(
        &self,
        path: &str,
        query: I,
        data: &T,
    ) -> Result<HttpResponse, HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
        T: Serialize + ?Sized,
    {
        self.ensure_created()?;
        let body = encode_body(data)?;
        let target = self.proxy_target();
        let response = target
            .send(
                &self.client,
                Method::POST,
                path,
                &stringify_query(query),
                Some(body),
            )
            .await?;
        Ok(response)
    }

    /// Logs of the pod's first container
    pub async fn get_logs(&self) -> Result<String, HarnessError> {
        self.ensure_created()?;
        let first = self
            .object()
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .map(|c| c.name.as_str());
        fetch_logs(&self.client, &self.namespace, self.name(), first).await
    }

    fn proxy_target(&self) -> ProxyTarget {
        ProxyTarget {
            namespace: self.namespace.clone(),
            pod: self.name().to_string(),
            port: primary_port(self.object()),
        }
    }
}

/// One container of a pod
#[derive(Clone)]
pub struct Container {
    client: Client,
    namespace: String,
    pod: String,
    spec: ContainerSpec,
    status: Option<ContainerStatus>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("pod", &self.pod)
            .field("name", &self.spec.name)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Container {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Name of the owning pod
    #[must_use]
    pub fn pod_name(&self) -> &str {
        &self.pod
    }

    #[must_use]
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Observed status, absent until the kubelet reports one
    #[must_use]
    pub fn status(&self) -> Option<&ContainerStatus> {
        self.status.as_ref()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    #[must_use]
    pub fn restart_count(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.restart_count)
    }

    /// Full log output of this container
    pub async fn get_logs(&self) -> Result<String, HarnessError> {
        fetch_logs(&self.client, &self.namespace, &self.pod, Some(self.name())).await
    }
}

impl Named for Container {
    fn name(&self) -> &str {
        Container::name(self)
    }
}

async fn fetch_logs(
    client: &Client,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
) -> Result<String, HarnessError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = LogParams {
        container: container.map(str::to_string),
        ..Default::default()
    };

    debug!(namespace = %namespace, pod = %pod, container = ?container, "Fetching logs");

    pods.logs(pod, &params)
        .await
        .map_err(|e| HarnessError::LogsError(improve_error_message(&e, "Pod", pod)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_client, not_found, ok_json, ok_text, MockCall};
    use serde_json::json;
    use std::time::Duration;

    fn echo_pod() -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": "echo-7d9f", "namespace": "ns" },
            "spec": {
                "containers": [
                    { "name": "echo", "image": "echo:1", "ports": [{ "containerPort": 8080 }] },
                    { "name": "sidecar", "image": "busybox" }
                ]
            },
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    { "name": "sidecar", "ready": false, "restartCount": 2, "image": "busybox", "imageID": "" },
                    { "name": "echo", "ready": true, "restartCount": 0, "image": "echo:1", "imageID": "" }
                ]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_containers_pair_spec_with_status() {
        let (client, _) = mock_client(|_| not_found());
        let pod = ManagedResource::existing(client, "ns", echo_pod(), Duration::from_millis(1));

        let containers = pod.get_containers();
        assert_eq!(containers.names(), vec!["echo", "sidecar"]);
        assert!(containers.get("echo").unwrap().is_ready());
        assert_eq!(containers.get("sidecar").unwrap().restart_count(), 2);
        assert!(!pod.containers_ready());
    }

    #[tokio::test]
    async fn test_proxy_get_stringifies_query() {
        let (client, calls) = mock_client(|call: &MockCall| {
            assert_eq!(call.method, Method::GET);
            ok_json(json!({ "path": "/test/get", "method": "GET", "body": "", "query": { "abc": "123" } }))
        });
        let pod = ManagedResource::existing(client, "ns", echo_pod(), Duration::from_millis(1));

        let response = pod.http_proxy_get("/test/get", [("abc", 123)]).await.unwrap();
        assert_eq!(response.status, 200);
        let data: serde_json::Value = response.json().unwrap();
        assert_eq!(data["query"]["abc"], "123");

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[0].uri,
            "/api/v1/namespaces/ns/pods/echo-7d9f:8080/proxy/test/get?abc=123"
        );
    }

    #[tokio::test]
    async fn test_proxy_post_sends_json_body() {
        let (client, calls) = mock_client(|_| ok_json(json!({ "ok": true })));
        let pod = ManagedResource::existing(client, "ns", echo_pod(), Duration::from_millis(1));

        let response = pod
            .http_proxy_post("/test/post", [("abc", 123)], "foobar")
            .await
            .unwrap();
        assert!(response.is_success());

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(calls[0].body, br#""foobar""#.to_vec());
        assert!(calls[0].uri.ends_with("/proxy/test/post?abc=123"));
    }

    #[tokio::test]
    async fn test_proxy_before_create_is_rejected() {
        let (client, calls) = mock_client(|_| not_found());
        let pod = ManagedResource::loaded(client, "ns", echo_pod(), Duration::from_millis(1));

        let err = pod
            .http_proxy_get("/", std::iter::empty::<(&str, &str)>())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotCreated { .. }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_container_logs_name_the_container() {
        let (client, calls) = mock_client(|_| ok_text("listening on 8080\n"));
        let pod = ManagedResource::existing(client, "ns", echo_pod(), Duration::from_millis(1));

        let containers = pod.get_containers();
        let logs = containers[0].get_logs().await.unwrap();
        assert_eq!(logs, "listening on 8080\n");

        let calls = calls.lock().unwrap();
        assert!(calls[0].uri.starts_with("/api/v1/namespaces/ns/pods/echo-7d9f/log?"));
        assert!(calls[0].uri.contains("container=echo"));
    }

    #[tokio::test]
    async fn test_logs_of_missing_pod() {
        let (client, _) = mock_client(|_| not_found());
        let pod = ManagedResource::existing(client, "ns", echo_pod(), Duration::from_millis(1));

        let err = pod.get_logs().await.unwrap_err();
        assert!(matches!(err, HarnessError::LogsError(_)));
    }
}
