use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::config::LoadBalancingConfig;
use crate::error::{GatewayError, Result};
use crate::manager::ProviderManager;
use crate::models::{MessageRequest, MessageResponse, message::merge_query_params};
use crate::stats::{GatewayStats, unix_now};
use crate::streaming::{SseStream, normalize_response, stream_message};

pub struct AppState {
    pub manager: Arc<ProviderManager>,
    pub load_balancing: LoadBalancingConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<ProviderManager>, load_balancing: LoadBalancingConfig) -> Self {
        Self {
            manager,
            load_balancing,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/models", get(handle_models))
        .route("/v1/providers", get(handle_providers))
        .route("/dashboard", get(handle_dashboard))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn handle_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("request", %request_id);

    async move {
        match create_message(&state, query, &headers, &body).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Error creating message");
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn create_message(
    state: &AppState,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response> {
    let mut body: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;

    if !query.is_empty() {
        info!(params = ?query, "Merging query parameters");
        merge_query_params(&mut body, query);
    }

    let request = MessageRequest::from_body(body, header_map(headers))?;

    if request.stream {
        return Ok(sse_response(stream_message(
            Arc::clone(&state.manager),
            request,
        )));
    }

    match state.manager.route_create_message(&request).await? {
        MessageResponse::Complete(body) => Ok(Json(body).into_response()),
        // Upstream streamed anyway
        response @ MessageResponse::Stream(_) => Ok(sse_response(normalize_response(response))),
    }
}

pub async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    match state.manager.get_models().await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => {
            error!(error = %e, "Error getting models");
            let status = match &e {
                GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            error_response(status, &e)
        }
    }
}

/// Raw stats snapshot: aggregate totals plus one entry per provider
pub async fn handle_providers(State(state): State<Arc<AppState>>) -> Json<GatewayStats> {
    Json(state.manager.get_provider_stats())
}

pub async fn handle_dashboard(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.manager.get_provider_stats();

    Json(json!({
        "status": "healthy",
        "timestamp": stats.timestamp,
        "load_balancer": {
            "strategy": "priority",
            "health_check_interval": state.load_balancing.health_check_interval_secs,
            "exhaustion_cooldown": state.load_balancing.exhaustion_cooldown_secs,
            "quota_aware": state.load_balancing.quota_aware,
        },
        "providers": stats.providers,
    }))
}

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.manager.get_provider_stats();

    let details: Vec<Value> = stats
        .providers
        .iter()
        .map(|p| {
            let mut info = json!({
                "name": p.name,
                "type": p.provider_type,
                "priority": p.priority,
                "enabled": p.enabled,
                "healthy": p.healthy,
                "available": p.available,
                "usage": {
                    "total": p.usage_count_total,
                    "last_hour": p.usage_count_last_hour,
                    "limit": p.usage_limit,
                },
            });

            if p.exhausted {
                info["exhausted"] = json!(true);
                if let Some(retry_in) = p.exhaustion_remaining_seconds {
                    info["retry_in_seconds"] = json!(retry_in);
                }
            }
            if let Some(ago) = p.last_health_check_seconds_ago {
                info["last_health_check_seconds_ago"] = json!(ago);
            }
            info
        })
        .collect();

    Json(json!({
        "status": "healthy",
        "timestamp": unix_now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "providers": {
            "total": stats.total_providers,
            "healthy": stats.healthy_providers,
            "available": stats.available_providers,
            "details": details,
        },
    }))
}

fn sse_response(events: SseStream) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(events.map(Ok::<_, Infallible>)),
    )
        .into_response()
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn error_response(status: StatusCode, err: &GatewayError) -> Response {
    let body = json!({
        "type": "error",
        "error": {
            "type": err.error_type(),
            "message": err.to_string(),
        }
    });
    (status, Json(body)).into_response()
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoHealthyProviders => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UsageLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), &self)
    }
}
