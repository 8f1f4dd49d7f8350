//! Failure-injection tests: flaky backends, dead backends, and circuit
//! breaker behavior under sustained failure.

mod common;

use common::{start_mock_service, test_config, MockResponse};
use serde_json::json;
use skillswap_comms::{CircuitStatus, CommsError, ServiceCommunicator};

#[tokio::test]
async fn test_transient_500s_are_retried_until_success() {
    let backend = start_mock_service(|_req, index| {
        if index < 2 {
            MockResponse::json(500, json!({"error": "boom"}))
        } else {
            MockResponse::json(200, json!({"success": true, "data": {"id": "7"}}))
        }
    })
    .await;

    let config = test_config(&[("skills", &backend)]);
    let comm = ServiceCommunicator::new(config).unwrap();

    let result: Option<serde_json::Value> =
        comm.get("skills", "/api/skills/7", &[]).await.unwrap();
    assert_eq!(result, Some(json!({"id": "7"})));
    assert_eq!(backend.hits(), 3);

    let snapshot = comm.metrics().snapshot("skills").unwrap();
    assert_eq!(snapshot.retries, 2);
    assert_eq!(snapshot.successful, 1);
}

#[tokio::test]
async fn test_non_retryable_status_fails_on_first_attempt() {
    let backend =
        start_mock_service(|_req, _index| MockResponse::json(404, json!({"error": "nope"}))).await;

    let config = test_config(&[("skills", &backend)]);
    let comm = ServiceCommunicator::new(config).unwrap();

    let err = comm.get::<serde_json::Value>("skills", "/api/skills/404", &[]).await.unwrap_err();
    assert!(matches!(err, CommsError::Status { status: 404, .. }));
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_surfaces_transient_error() {
    let backend =
        start_mock_service(|_req, _index| MockResponse::json(503, json!({"error": "down"}))).await;

    let mut config = test_config(&[("skills", &backend)]);
    config.retry.max_attempts = 3;
    let comm = ServiceCommunicator::new(config).unwrap();

    let err = comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    assert!(matches!(err, CommsError::Transient { status: Some(503), .. }));
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Ephemeral port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = start_mock_service(|_req, _index| MockResponse::empty(200)).await;
    let mut config = test_config(&[("skills", &backend)]);
    config.services[0].base_url = format!("http://{dead_addr}");
    config.retry.max_attempts = 2;
    let comm = ServiceCommunicator::new(config).unwrap();

    let err = comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    assert!(matches!(err, CommsError::Transient { status: None, .. }));
    assert_eq!(comm.metrics().snapshot("skills").unwrap().retries, 1);
}

#[tokio::test]
async fn test_circuit_opens_after_sustained_failure() {
    let backend =
        start_mock_service(|_req, _index| MockResponse::json(500, json!({"error": "down"}))).await;

    let mut config = test_config(&[("skills", &backend)]);
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.minimum_throughput = 3;
    config.circuit_breaker.window_size = 5;
    let comm = ServiceCommunicator::new(config).unwrap();

    for _ in 0..3 {
        let err = comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
        assert!(err.is_retryable());
    }
    assert_eq!(comm.circuit_status("skills"), CircuitStatus::Open);
    let served_before_open = backend.hits();
    assert_eq!(served_before_open, 3);

    // Open circuit fails fast without touching the backend.
    let err = comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    assert!(matches!(err, CommsError::CircuitOpen { .. }));
    assert_eq!(backend.hits(), served_before_open);

    let snapshot = comm.metrics().snapshot("skills").unwrap();
    assert_eq!(snapshot.circuit_transitions.get("closed->open"), Some(&1));
    assert_eq!(snapshot.error_kinds.get("circuit_open"), Some(&1));
}

#[tokio::test]
async fn test_failures_below_minimum_throughput_keep_circuit_closed() {
    let backend =
        start_mock_service(|_req, _index| MockResponse::json(500, json!({"error": "down"}))).await;

    let mut config = test_config(&[("skills", &backend)]);
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.minimum_throughput = 10;
    let comm = ServiceCommunicator::new(config).unwrap();

    for _ in 0..3 {
        comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    }
    assert_eq!(comm.circuit_status("skills"), CircuitStatus::Closed);
}

#[tokio::test]
async fn test_whole_retry_sequence_is_one_breaker_trial() {
    // Each call burns 2 attempts; the breaker must count calls, not attempts.
    let backend =
        start_mock_service(|_req, _index| MockResponse::json(502, json!({"error": "bad"}))).await;

    let mut config = test_config(&[("skills", &backend)]);
    config.retry.max_attempts = 2;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.minimum_throughput = 3;
    let comm = ServiceCommunicator::new(config).unwrap();

    for _ in 0..2 {
        comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    }
    // 2 calls = 4 attempts, but only 2 trial outcomes: still closed.
    assert_eq!(backend.hits(), 4);
    assert_eq!(comm.circuit_status("skills"), CircuitStatus::Closed);

    comm.get::<serde_json::Value>("skills", "/api/skills", &[]).await.unwrap_err();
    assert_eq!(comm.circuit_status("skills"), CircuitStatus::Open);
}
