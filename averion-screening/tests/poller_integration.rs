//! End-to-end polling against the mock backend

mod helpers;

use averion_common::{ModelType, SessionContext};
use averion_screening::{
    ImageUpload, JobHandle, JobPoller, JobResult, PollFailure, PollerConfig, PollerPhase,
    Remediation, ScreeningClient,
};
use axum::http::StatusCode;
use helpers::{completed_prediction, processing, spawn_backend, ACCESS_TOKEN};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fast_config(max_attempts: u32) -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(20),
        max_attempts,
        fail_fast_on_not_found: true,
    }
}

async fn setup(max_attempts: u32) -> (Arc<ScreeningClient>, JobPoller, Arc<helpers::MockBackend>) {
    let (url, backend) = spawn_backend().await;
    let client = Arc::new(
        ScreeningClient::new(url, SessionContext::with_token(ACCESS_TOKEN))
            .expect("Failed to build client"),
    );
    let poller = JobPoller::new(client.clone(), fast_config(max_attempts));
    (client, poller, backend)
}

#[tokio::test]
async fn test_submit_and_poll_to_completion() {
    let (client, poller, backend) = setup(20).await;
    for _ in 0..3 {
        backend.queue_prediction_status(StatusCode::OK, processing());
    }
    backend.queue_prediction_status(StatusCode::OK, completed_prediction(94.2));

    let upload = ImageUpload::from_bytes("xray.png", vec![1, 2, 3, 4]);
    let submit_client = client.clone();
    let mut handle = poller.submit_and_watch(async move {
        submit_client
            .submit_prediction(&upload, ModelType::Pneumonia)
            .await
            .map(|s| s.handle)
    });

    let snapshot = handle.wait_for_terminal().await;
    assert_eq!(snapshot.phase, PollerPhase::Succeeded);
    assert_eq!(snapshot.handle, Some(JobHandle::single("p-1")));
    assert_eq!(snapshot.rounds, 4);
    assert_eq!(snapshot.attempt_count, 3);
    assert_eq!(backend.status_calls(), 4);

    match snapshot.result {
        Some(JobResult::Single(result)) => assert_eq!(result.confidence, 94.2),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_attempt_ceiling_stops_polling() {
    let (_client, poller, backend) = setup(5).await;

    let start = std::time::Instant::now();
    let mut handle = poller.watch(JobHandle::single("p-slow"));
    let snapshot = handle.wait_for_terminal().await;

    // Either the ceiling or the overall deadline ends it, whichever is first
    assert!(matches!(snapshot.failure, Some(PollFailure::Timeout { .. })));
    assert!(start.elapsed() < Duration::from_millis(100) + Duration::from_millis(50));
    let calls = backend.status_calls();
    assert!(calls >= 1 && calls <= 5);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.status_calls(), calls);
}

#[tokio::test]
async fn test_flat_completed_body_succeeds() {
    let (_client, poller, backend) = setup(20).await;
    backend.queue_prediction_status(StatusCode::OK, processing());
    backend.queue_prediction_status(
        StatusCode::OK,
        json!({
            "status": "completed",
            "model_type": "pneumonia",
            "prediction": "PNEUMONIA",
            "confidence": 94.2
        }),
    );

    let mut handle = poller.watch(JobHandle::single("p-1"));
    let snapshot = handle.wait_for_terminal().await;

    assert_eq!(snapshot.phase, PollerPhase::Succeeded);
    assert_eq!(backend.status_calls(), 2);
    match snapshot.result {
        Some(JobResult::Single(result)) => {
            assert_eq!(result.prediction, "PNEUMONIA");
            assert_eq!(result.confidence, 94.2);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_job_fails_fast() {
    let (_client, poller, backend) = setup(20).await;
    backend.queue_prediction_status(StatusCode::NOT_FOUND, json!({"detail": "Not found"}));

    let mut handle = poller.watch(JobHandle::single("p-gone"));
    let snapshot = handle.wait_for_terminal().await;

    assert_eq!(snapshot.failure, Some(PollFailure::NotFound));
    assert_eq!(backend.status_calls(), 1);
}

#[tokio::test]
async fn test_expired_token_during_poll() {
    let (client, poller, backend) = setup(20).await;
    backend.queue_prediction_status(StatusCode::OK, processing());
    backend.queue_prediction_status(StatusCode::UNAUTHORIZED, json!({"detail": "Token expired"}));

    let mut handle = poller.watch(JobHandle::single("p-1"));
    let snapshot = handle.wait_for_terminal().await;

    let failure = snapshot.failure.expect("Poll should have failed");
    assert_eq!(failure.remediation(), Remediation::SignIn);
    assert_eq!(backend.status_calls(), 2);
    assert!(!client.session().is_authenticated().await);
}

#[tokio::test]
async fn test_server_failure_is_terminal() {
    let (_client, poller, backend) = setup(20).await;
    backend.queue_prediction_status(
        StatusCode::OK,
        json!({"status": "failed", "error": "Model crashed"}),
    );

    let mut handle = poller.watch(JobHandle::single("p-1"));
    let snapshot = handle.wait_for_terminal().await;

    assert_eq!(
        snapshot.failure,
        Some(PollFailure::Server("Model crashed".to_string()))
    );
    assert_eq!(
        snapshot.failure.map(|f| f.remediation()),
        Some(Remediation::ContactSupport)
    );
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() {
    let (_client, poller, backend) = setup(20).await;
    backend.queue_prediction_status(StatusCode::SERVICE_UNAVAILABLE, json!({}));
    backend.queue_prediction_status(StatusCode::OK, completed_prediction(70.0));

    let mut handle = poller.watch(JobHandle::single("p-1"));
    let snapshot = handle.wait_for_terminal().await;

    assert_eq!(snapshot.phase, PollerPhase::Succeeded);
    assert_eq!(backend.status_calls(), 2);
}

#[tokio::test]
async fn test_batch_poll_partial_results() {
    let (_client, poller, backend) = setup(20).await;
    backend.queue_batch_status(StatusCode::OK, json!({"status": "processing"}));
    backend.queue_batch_status(
        StatusCode::OK,
        json!({
            "status": "partial",
            "model_type": "skin_cancer",
            "results": [
                {"file_index": 0, "filename": "a.png", "success": true,
                 "prediction": "Benign", "confidence": 88.0},
                {"file_index": 1, "filename": "b.png", "success": false,
                 "error_message": "Not a skin image"}
            ],
            "credits_remaining": 46
        }),
    );

    let mut handle = poller.watch(JobHandle::batch("b-1"));
    let snapshot = handle.wait_for_terminal().await;

    assert_eq!(snapshot.phase, PollerPhase::Succeeded);
    match snapshot.result {
        Some(JobResult::Batch(batch)) => {
            assert_eq!(batch.model_type, Some(ModelType::SkinCancer));
            assert_eq!(batch.credits_remaining, Some(46));
            assert_eq!(batch.summary.successful_predictions, 1);
            assert_eq!(batch.failed_files().count(), 1);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_dropping_handle_stops_network_traffic() {
    let (_client, poller, backend) = setup(20).await;

    let handle = poller.watch(JobHandle::single("p-1"));
    let mut updates = handle.subscribe();
    while updates.borrow().rounds < 2 {
        updates.changed().await.unwrap();
    }
    drop(handle);

    // Let any already-running request settle before sampling
    tokio::time::sleep(Duration::from_millis(10)).await;
    let calls = backend.status_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.status_calls(), calls);
}
