//! HTTP transport tests against a local mock agent.

use peerlink_client::HttpTransport;
use peerlink_core::{
    AgentTransport, CoreConfig, Message, PeerlinkError, Role, Task,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> HttpTransport {
    let config = CoreConfig {
        probe_timeout_secs: 1,
        dispatch_timeout_secs: 1,
        ..CoreConfig::default()
    };
    HttpTransport::new(config)
}

fn sample_task() -> Task {
    Task::new(
        Message::text(Role::User, "translate this"),
        vec!["translate".to_string()],
    )
}

#[tokio::test]
async fn fetch_card_parses_discovery_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "translator",
            "description": "translates text",
            "url": "http://stale-address.invalid",
            "capabilities": [
                { "name": "translate", "description": "translate text" }
            ]
        })))
        .mount(&server)
        .await;

    let card = transport().fetch_card(&server.uri()).await.unwrap();
    assert_eq!(card.name, "translator");
    assert_eq!(card.capabilities.len(), 1);
    // The URL we reached the agent at wins over the one in the document.
    assert_eq!(card.url, server.uri());
}

#[tokio::test]
async fn fetch_card_rejects_missing_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = transport().fetch_card(&server.uri()).await.unwrap_err();
    assert!(matches!(err, PeerlinkError::InvalidDescriptor(_)));
}

#[tokio::test]
async fn fetch_card_rejects_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = transport().fetch_card(&server.uri()).await.unwrap_err();
    assert!(matches!(err, PeerlinkError::InvalidDescriptor(_)));
}

#[tokio::test]
async fn dispatch_sends_envelope_and_returns_payload() {
    let server = MockServer::start().await;
    let task = sample_task();

    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .and(body_partial_json(serde_json::json!({
            "a2a_protocol": {
                "version": "1.0",
                "message_type": "task_request",
                "source_agent": "peerlink",
                "correlation_id": task.id,
            },
            "payload": {
                "task_id": task.id,
                "required_capabilities": ["translate"],
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "accepted",
            "result": "bonjour"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = transport().dispatch(&server.uri(), &task).await.unwrap();
    assert_eq!(payload["result"], "bonjour");
}

#[tokio::test]
async fn dispatch_error_status_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(serde_json::json!({ "error": "unsupported capability" })),
        )
        .mount(&server)
        .await;

    let err = transport()
        .dispatch(&server.uri(), &sample_task())
        .await
        .unwrap_err();
    match err {
        PeerlinkError::Rejected(msg) => assert!(msg.contains("422")),
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert!(!PeerlinkError::Rejected(String::new()).is_retryable());
}

#[tokio::test]
async fn dispatch_timeout_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&server)
        .await;

    let err = transport()
        .dispatch(&server.uri(), &sample_task())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerlinkError::Timeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_endpoint_is_retryable() {
    // Nothing listens here.
    let err = transport()
        .dispatch("http://127.0.0.1:9", &sample_task())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerlinkError::Unreachable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn probe_maps_status_to_liveness() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(transport().probe(&server.uri()).await.is_ok());

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = transport().probe(&server.uri()).await.unwrap_err();
    assert!(matches!(err, PeerlinkError::Unreachable(_)));
}

#[tokio::test]
async fn cancel_posts_and_swallows_failures() {
    let server = MockServer::start().await;
    let task_id = sample_task().id;
    Mock::given(method("POST"))
        .and(path(format!("/api/tasks/{task_id}/cancel")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    transport().cancel(&server.uri(), task_id).await;

    // A dead endpoint must not panic or error.
    transport().cancel("http://127.0.0.1:9", task_id).await;
}
