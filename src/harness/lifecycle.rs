use super::{is_status, Harness, HarnessError};
use crate::config::HarnessConfig;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::sync::Mutex;
use tracing::info;

/// Label put on every namespace the harness creates
pub const TEST_NAMESPACE_LABEL: &str = "kubetest.io/test";

impl Harness {
    /// Connect with the default kubeconfig and create a fresh namespace
    ///
    /// Configuration comes from `KUBETEST_*` environment variables.
    pub async fn new() -> Result<Self, HarnessError> {
        Self::with_config(HarnessConfig::from_env()?).await
    }

    /// Connect with the default kubeconfig using `config`
    ///
    /// When `config.namespace` is set that namespace is used as-is and never
    /// deleted; otherwise `<prefix>-<8 hex>` is created.
    pub async fn with_config(config: HarnessConfig) -> Result<Self, HarnessError> {
        let client = Client::try_default()
            .await
            .map_err(|e| HarnessError::ClientError(e.to_string()))?;

        if let Some(namespace) = config.namespace.clone() {
            info!(namespace = %namespace, "Using existing namespace");
            return Ok(Self::from_client(client, namespace, config));
        }

        let namespace = generate_namespace(&config.namespace_prefix);
        create_namespace(&client, &namespace).await?;

        let mut harness = Self::from_client(client, namespace, config);
        harness.owns_namespace = true;
        Ok(harness)
    }

    /// Wrap an existing client and namespace without creating anything
    ///
    /// [`Harness::cleanup`] will not delete a namespace it did not create.
    pub fn from_client(client: Client, namespace: impl Into<String>, config: HarnessConfig) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            config,
            owns_namespace: false,
            registered: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Whether [`Harness::cleanup`] deletes the namespace
    #[must_use]
    pub fn owns_namespace(&self) -> bool {
        self.owns_namespace
    }

    /// Delete the test namespace, and with it everything the test created
    ///
    /// A namespace that is already gone is not an error.
    pub async fn cleanup(&self) -> Result<(), HarnessError> {
        if !self.owns_namespace {
            info!(namespace = %self.namespace, "Leaving namespace in place, not created by harness");
            return Ok(());
        }

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces
            .delete(&self.namespace, &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(HarnessError::CleanupError(e.to_string())),
        }

        info!(namespace = %self.namespace, "Deleted test namespace");
        Ok(())
    }
}

fn generate_namespace(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

async fn create_namespace(client: &Client, name: &str) -> Result<(), HarnessError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(TEST_NAMESPACE_LABEL.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };

    namespaces
        .create(&PostParams::default(), &ns)
        .await
        .map_err(|e| HarnessError::NamespaceError(format!("{name}: {e}")))?;

    info!(namespace = %name, "Created test namespace");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_client, not_found, ok_json, MockCall};
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_generated_namespace_shape() {
        let ns = generate_namespace("kubetest");
        let (prefix, id) = ns.rsplit_once('-').unwrap();
        assert_eq!(prefix, "kubetest");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(ns, generate_namespace("kubetest"));
    }

    #[tokio::test]
    async fn test_create_namespace_is_labelled() {
        let (client, calls) = mock_client(|call: &MockCall| ok_json(call.json()));

        create_namespace(&client, "kubetest-0a1b2c3d").await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].method, Method::POST);
        assert!(calls[0].uri.starts_with("/api/v1/namespaces"));
        let body = calls[0].json();
        assert_eq!(body["metadata"]["name"], "kubetest-0a1b2c3d");
        assert_eq!(body["metadata"]["labels"][TEST_NAMESPACE_LABEL], "true");
    }

    #[tokio::test]
    async fn test_cleanup_skips_borrowed_namespace() {
        let (client, calls) = mock_client(|_| not_found());
        let harness = Harness::from_client(client, "shared", HarnessConfig::default());

        harness.cleanup().await.unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_owned_namespace() {
        let (client, calls) = mock_client(|_| {
            ok_json(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": "kubetest-0a1b2c3d" },
                "status": { "phase": "Terminating" }
            }))
        });
        let mut harness = Harness::from_client(client, "kubetest-0a1b2c3d", HarnessConfig::default());
        harness.owns_namespace = true;

        harness.cleanup().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].method, Method::DELETE);
        assert!(calls[0].uri.starts_with("/api/v1/namespaces/kubetest-0a1b2c3d"));
    }

    #[tokio::test]
    async fn test_cleanup_of_vanished_namespace() {
        let (client, _) = mock_client(|_| not_found());
        let mut harness = Harness::from_client(client, "kubetest-gone", HarnessConfig::default());
        harness.owns_namespace = true;

        harness.cleanup().await.unwrap();
    }
}
