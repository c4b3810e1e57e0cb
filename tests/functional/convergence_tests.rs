//! Convergence behavior against a mocked API service.
//!
//! Runs real reconciliation passes with the Kubernetes client backed
//! by a `tower_test` mock, verifying the abort-on-first-error contract
//! without a live cluster.

use std::sync::Arc;
use std::time::Duration;

use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::{client::Body, Client};
use tower_test::mock;

use chia_operator::controller::{context::Context, node_reconciler};

use crate::fixtures::ChiaNodeBuilder;

type MockHandle = mock::Handle<Request<Body>, Response<Body>>;

/// Respond to an apply by echoing the submitted manifest back.
async fn accept_apply(handle: &mut MockHandle, expected_path_suffix: &str) {
    let (request, send) = handle.next_request().await.expect("expected an apply call");
    assert_eq!(request.method(), Method::PATCH);
    assert!(
        request.uri().path().ends_with(expected_path_suffix),
        "unexpected path: {}",
        request.uri().path()
    );
    let body = request.into_body().collect().await.unwrap().to_bytes();
    send.send_response(Response::builder().body(Body::from(body.to_vec())).unwrap());
}

/// Respond to an apply with a server-side failure.
async fn reject_apply(handle: &mut MockHandle, expected_path_suffix: &str) {
    let (request, send) = handle.next_request().await.expect("expected an apply call");
    assert!(
        request.uri().path().ends_with(expected_path_suffix),
        "unexpected path: {}",
        request.uri().path()
    );
    let status = serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "internal error",
        "reason": "InternalError",
        "code": 500
    });
    send.send_response(
        Response::builder()
            .status(500)
            .body(Body::from(serde_json::to_vec(&status).unwrap()))
            .unwrap(),
    );
}

/// Acknowledge any remaining requests (e.g. event posts) by echoing.
async fn drain(mut handle: MockHandle) {
    while let Some((request, send)) = handle.next_request().await {
        let status = request.uri().path().contains("/events").then_some(201);
        let body = request.into_body().collect().await.unwrap().to_bytes();
        send.send_response(
            Response::builder()
                .status(status.unwrap_or(200))
                .body(Body::from(body.to_vec()))
                .unwrap(),
        );
    }
}

#[tokio::test]
async fn test_second_child_failure_aborts_pass() {
    let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "default");
    let ctx = Arc::new(Context::new(client, None));
    let node = Arc::new(ChiaNodeBuilder::new("alpha").build());

    let server = tokio::spawn(async move {
        // first child converges
        accept_apply(&mut handle, "/services/alpha-node").await;
        // second child fails; the pass must abort here
        reject_apply(&mut handle, "/services/alpha-node-internal").await;
        // only the warning event post may follow, never the remaining children
        drain(handle).await;
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        node_reconciler::reconcile(node, ctx),
    )
    .await
    .expect("reconcile pass timed out");

    let error = result.expect_err("reconcile should surface the convergence failure");
    let message = error.to_string();
    assert!(message.contains("alpha-node-internal"), "{message}");
    assert!(message.contains("ChiaNode default/alpha"), "{message}");

    server.await.unwrap();
}

#[tokio::test]
async fn test_successful_pass_marks_ready() {
    let (mock_service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "default");
    let ctx = Arc::new(Context::new(client, None));
    let node = Arc::new(ChiaNodeBuilder::new("alpha").build());

    let server = tokio::spawn(async move {
        accept_apply(&mut handle, "/services/alpha-node").await;
        accept_apply(&mut handle, "/services/alpha-node-internal").await;
        accept_apply(&mut handle, "/services/alpha-node-headless").await;
        accept_apply(&mut handle, "/services/alpha-node-metrics").await;
        accept_apply(&mut handle, "/statefulsets/alpha-node").await;

        // status subresource patch carries ready=true
        let (request, send) = handle
            .next_request()
            .await
            .expect("expected a status patch");
        assert!(
            request.uri().path().ends_with("/chianodes/alpha/status"),
            "unexpected path: {}",
            request.uri().path()
        );
        let body = request.into_body().collect().await.unwrap().to_bytes();
        let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(patch["status"]["ready"], serde_json::json!(true));

        let object = serde_json::json!({
            "apiVersion": "k8s.chia.net/v1",
            "kind": "ChiaNode",
            "metadata": { "name": "alpha", "namespace": "default" },
            "spec": { "chia": { "caSecretName": "chia-ca" } },
            "status": { "ready": true }
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&object).unwrap()))
                .unwrap(),
        );

        // the first successful pass publishes a Ready event
        drain(handle).await;
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        node_reconciler::reconcile(node, ctx),
    )
    .await
    .expect("reconcile pass timed out");

    result.expect("reconcile should succeed");
    server.await.unwrap();
}
