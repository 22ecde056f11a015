//! End-to-end scenarios against a live cluster
//!
//! Run with `cargo test -- --ignored` against a cluster with an ingress
//! controller that assigns load balancer addresses.

use kubetest::{Harness, ResourceCollection};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

fn config(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("configs")
        .join(name)
}

#[kubetest::test]
#[ignore] // Requires real cluster
async fn test_deployment(kube: Harness) {
    let mut deployment = kube.load_deployment(config("deployment.yaml")).unwrap();
    kube.create(&mut deployment).await.unwrap();

    deployment
        .wait_until_ready(Duration::from_secs(20))
        .await
        .unwrap();
    deployment.refresh().await.unwrap();

    let mut pods = deployment.get_pods().await.unwrap();
    assert_eq!(pods.len(), 1);

    let pod = pods.iter_mut().next().unwrap();
    pod.wait_until_ready(Duration::from_secs(10)).await.unwrap();

    // the image echoes the request back as JSON
    let response = pod
        .http_proxy_get("/test/get", [("abc", 123)])
        .await
        .unwrap();
    let data: Value = response.json().unwrap();
    assert_eq!(data["path"], "/test/get");
    assert_eq!(data["method"], "GET");
    assert_eq!(data["body"], "");
    assert_eq!(data["query"], serde_json::json!({ "abc": "123" }));

    let response = pod
        .http_proxy_post("/test/post", [("abc", 123)], "foobar")
        .await
        .unwrap();
    let data: Value = response.json().unwrap();
    assert_eq!(data["path"], "/test/post");
    assert_eq!(data["method"], "POST");
    assert_eq!(data["body"], "\"foobar\"");
    assert_eq!(data["query"], serde_json::json!({ "abc": "123" }));

    let containers = pod.get_containers();
    let logs = containers[0].get_logs().await.unwrap();
    assert!(!logs.is_empty());

    kube.delete(&mut deployment).await.unwrap();
    deployment
        .wait_until_deleted(Duration::from_secs(20))
        .await
        .unwrap();
    assert!(!kube.get_deployments().await.unwrap().contains("echo"));
}

#[kubetest::test]
#[ignore] // Requires real cluster
async fn test_ingress(kube: Harness) {
    let mut ingress = kube.load_ingress(config("ingress.yaml")).unwrap();
    kube.create(&mut ingress).await.unwrap();

    ingress
        .wait_until_ready(Duration::from_secs(20))
        .await
        .unwrap();
    ingress.refresh().await.unwrap();

    let ingresses = kube.get_ingresses().await.unwrap();
    assert_eq!(ingresses.len(), 1);

    kube.delete(&mut ingress).await.unwrap();
    ingress
        .wait_until_deleted(Duration::from_secs(20))
        .await
        .unwrap();
}

#[kubetest::test(apply_manifests(dir = "tests/configs", files = ["nginx-ingress.yaml"], timeout_secs = 30))]
#[ignore] // Requires real cluster
async fn test_nginx(kube: Harness) {
    kube.wait_for_registered(Duration::from_secs(30))
        .await
        .unwrap();

    let mut deployments = kube.get_deployments().await.unwrap();
    let echo = deployments.get_mut("echo-deployment").unwrap();
    assert!(echo.is_ready().await.unwrap());

    let pods = echo.get_pods().await.unwrap();
    assert_eq!(pods.len(), 3, "echo should deploy with three replicas");

    for pod in &pods {
        let containers = pod.get_containers();
        assert_eq!(containers.len(), 1, "echo pod should have one container");

        let response = pod
            .http_proxy_get("/", std::iter::empty::<(&str, &str)>())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    let mut services = kube.get_services().await.unwrap();
    let service = services.get_mut("echo-service").unwrap();
    assert!(service.is_ready().await.unwrap());

    let mut ingresses = kube.get_ingresses().await.unwrap();
    let ingress = ingresses.get_mut("echo-ingress").unwrap();
    assert!(ingress.is_ready().await.unwrap());

    let registered: ResourceCollection<_> = ResourceCollection::new(kube.registered());
    assert_eq!(
        registered.names(),
        vec!["echo-deployment", "echo-service", "echo-ingress"]
    );
}
