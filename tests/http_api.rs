mod common;

use anthropic_lb::config::LoadBalancingConfig;
use anthropic_lb::handler::{AppState, router};
use anthropic_lb::manager::ProviderManager;
use anthropic_lb::models::StreamChunk;
use anthropic_lb::provider::Provider;
use anthropic_lb::streaming::DONE_EVENT;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{Behavior, MockProvider, response_body};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(providers: Vec<Arc<MockProvider>>) -> Router {
    let manager = ProviderManager::default();
    for provider in providers {
        manager.add_provider(provider).unwrap();
    }
    let state = AppState::new(Arc::new(manager), LoadBalancingConfig::default());
    router(Arc::new(state))
}

fn message_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_providers_route_returns_stats_snapshot() {
    let first = MockProvider::new("first", 1);
    let second = MockProvider::new("second", 2);
    second.state().mark_exhausted(Duration::from_secs(60));
    let app = app(vec![first, second]);

    let response = app
        .clone()
        .oneshot(message_request(json!({"messages": [{"role": "user", "content": "Hi"}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/v1/providers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = body_json(response).await;
    assert_eq!(stats["total_providers"], 2);
    assert_eq!(stats["healthy_providers"], 2);
    assert_eq!(stats["available_providers"], 1);
    assert_eq!(stats["total_usage"], 1);
    assert_eq!(stats["usage_last_hour"], 1);
    assert!(stats["timestamp"].as_u64().unwrap() > 0);
    assert_eq!(stats["providers"][0]["name"], "first");
    assert_eq!(stats["providers"][0]["type"], "subscription");
    assert_eq!(stats["providers"][1]["exhausted"], true);
}

#[tokio::test]
async fn test_dashboard_reports_load_balancer_settings() {
    let app = app(vec![MockProvider::new("first", 1)]);

    let body = body_json(app.oneshot(get("/dashboard")).await.unwrap()).await;
    assert_eq!(body["load_balancer"]["strategy"], "priority");
    assert_eq!(body["load_balancer"]["exhaustion_cooldown"], 300);
    assert_eq!(body["providers"][0]["name"], "first");
}

#[tokio::test]
async fn test_health_route_summarizes_providers() {
    let limited = MockProvider::new("limited", 1);
    limited.state().mark_exhausted(Duration::from_secs(120));
    let app = app(vec![limited, MockProvider::new("backup", 2)]);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["providers"]["total"], 2);
    assert_eq!(health["providers"]["available"], 1);

    let details = health["providers"]["details"].as_array().unwrap();
    assert_eq!(details[0]["name"], "limited");
    assert_eq!(details[0]["exhausted"], true);
    assert!(details[0]["retry_in_seconds"].as_u64().unwrap() > 0);
    assert_eq!(details[1]["usage"]["total"], 0);
    assert!(details[1].get("retry_in_seconds").is_none());
}

#[tokio::test]
async fn test_message_without_providers_is_503() {
    let app = app(Vec::new());

    let response = app
        .oneshot(message_request(json!({"messages": [{"role": "user", "content": "Hi"}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "overloaded_error");
}

#[tokio::test]
async fn test_message_fails_over_to_next_provider() {
    let primary = MockProvider::with_behavior("primary", 1, Behavior::UsageLimit);
    let backup = MockProvider::new("backup", 2);
    let app = app(vec![primary.clone(), backup.clone()]);

    let response = app
        .oneshot(message_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 16,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, response_body("backup"));
    assert!(primary.state().is_exhausted());
    assert_eq!(backup.calls(), 1);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let app = app(vec![MockProvider::new("first", 1)]);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_streaming_message_is_event_stream() {
    let provider = MockProvider::with_behavior(
        "streamer",
        1,
        Behavior::Stream(vec![StreamChunk::Event(
            "data: {\"type\":\"message_start\"}\n\n".to_string(),
        )]),
    );
    let app = app(vec![provider]);

    let response = app
        .oneshot(message_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let body = body_text(response).await;
    assert!(body.starts_with("data: {\"type\":\"message_start\"}\n\n"));
    assert!(body.ends_with(DONE_EVENT));
    assert_eq!(body.matches("[DONE]").count(), 1);
}

#[tokio::test]
async fn test_streaming_without_providers_reports_error_in_band() {
    let app = app(Vec::new());

    let response = app
        .oneshot(message_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true,
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains("\"type\":\"error\""));
    assert!(body.ends_with(DONE_EVENT));
}
