//! Mocked API server for unit tests
//!
//! Every request is recorded and answered by a closure, so tests can script
//! polling sequences without a cluster.

use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// One request seen by the mock API server
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: Method,
    /// Path and query
    pub uri: String,
    pub body: Vec<u8>,
}

impl MockCall {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Scripted response
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

pub fn ok_json(value: Value) -> MockReply {
    reply(StatusCode::OK, &value)
}

pub fn ok_text(text: &str) -> MockReply {
    MockReply {
        status: StatusCode::OK,
        body: text.as_bytes().to_vec(),
    }
}

pub fn reply(status: StatusCode, value: &Value) -> MockReply {
    MockReply {
        status,
        body: serde_json::to_vec(value).unwrap(),
    }
}

/// `metav1.Status` failure body
pub fn status(code: u16, reason: &str) -> MockReply {
    reply(
        StatusCode::from_u16(code).unwrap(),
        &json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": format!("mock {reason}"),
            "reason": reason,
            "code": code
        }),
    )
}

pub fn not_found() -> MockReply {
    status(404, "NotFound")
}

/// Client whose every request is answered by `respond`
pub fn mock_client<F>(mut respond: F) -> (Client, Arc<Mutex<Vec<MockCall>>>)
where
    F: FnMut(&MockCall) -> MockReply + Send + 'static,
{
    let (service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();

    tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            let (parts, body) = request.into_parts();
            let body = body.collect().await.unwrap().to_bytes().to_vec();
            let call = MockCall {
                method: parts.method,
                uri: parts
                    .uri
                    .path_and_query()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                body,
            };

            let answer = respond(&call);
            recorded.lock().unwrap().push(call);
            send.send_response(
                Response::builder()
                    .status(answer.status)
                    .body(Body::from(answer.body))
                    .unwrap(),
            );
        }
    });

    (Client::new(service, "default"), calls)
}
