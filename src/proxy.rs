//! HTTP requests into pods through the API server proxy
//!
//! Requests are routed via
//! `/api/v1/namespaces/{ns}/pods/{pod}:{port}/proxy/{path}` so no local port
//! or network route to the pod is needed.
//!
//! Query values are sent as strings, so `("abc", 123)` is observed by the
//! pod as `abc=123` and an echo server reflects it back as `"123"`. Request
//! bodies are JSON-encoded: posting the string `foobar` sends `"foobar"`.

use http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Port used when a pod declares no container ports
pub const DEFAULT_PROXY_PORT: i32 = 80;

/// Errors reaching a pod through the proxy
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to build proxy request: {0}")]
    Request(String),

    #[error("proxy tunnel to pod '{pod}' failed: {reason}")]
    Tunnel { pod: String, reason: String },

    #[error("failed to read proxied response body: {0}")]
    Body(String),

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("response is not valid JSON: {0}")]
    Decode(String),
}

/// Response returned by a pod through the proxy
///
/// Non-2xx statuses are returned as-is, not as errors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// True for 2xx statuses
    #[must_use]
    pub fn is_success(&self) -> bool {
        StatusCode::from_u16(self.status).is_ok_and(|s| s.is_success())
    }

    /// Body as UTF-8, lossily
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProxyError> {
        serde_json::from_slice(&self.body).map_err(|e| ProxyError::Decode(e.to_string()))
    }
}

/// Address of one pod port behind the API server proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProxyTarget {
    pub namespace: String,
    pub pod: String,
    pub port: i32,
}

impl ProxyTarget {
    /// Build the API server URI for `path` with `query` appended
    pub fn uri(&self, path: &str, query: &[(String, String)]) -> String {
        let path = path.trim_start_matches('/');
        let mut uri = format!(
            "/api/v1/namespaces/{}/pods/{}:{}/proxy/{}",
            self.namespace, self.pod, self.port, path
        );

        if !query.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter())
                .finish();
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&encoded);
        }

        uri
    }

    /// Send one request and collect the full response
    pub async fn send(
        &self,
        client: &Client,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ProxyError> {
        let uri = self.uri(path, query);

        debug!(
            namespace = %self.namespace,
            pod = %self.pod,
            port = self.port,
            method = %method,
            uri = %uri,
            "Proxying request to pod"
        );

        let mut builder = Request::builder().method(method).uri(&uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Body::from(body.unwrap_or_default()))
            .map_err(|e| ProxyError::Request(e.to_string()))?;

        let response = client
            .send(request)
            .await
            .map_err(|e| ProxyError::Tunnel {
                pod: self.pod.clone(),
                reason: e.to_string(),
            })?;

        let (parts, body) = response.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body: collected.to_bytes().to_vec(),
        })
    }
}

/// Stringify query parameters
pub(crate) fn stringify_query<I, K, V>(params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: ToString,
{
    params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.to_string()))
        .collect()
}

/// JSON-encode a request body
pub(crate) fn encode_body<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, ProxyError> {
    serde_json::to_vec(data).map_err(|e| ProxyError::Encode(e.to_string()))
}

/// First declared container port of the pod, or [`DEFAULT_PROXY_PORT`]
pub(crate) fn primary_port(pod: &k8s_openapi::api::core::v1::Pod) -> i32 {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(DEFAULT_PROXY_PORT, |p| p.container_port)
}
