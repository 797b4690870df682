//! Inbound HTTP gateway.
//!
//! - `POST /api/messages` takes a raw channel event, normalizes it and applies
//!   the action. The response is always `200` with an [`ActionAck`] body, so
//!   the channel never retries an event we have already seen.
//! - `GET /health` reports guard state and cache statistics.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::action::{self, Extraction};
use crate::config::GatewayConfig;
use crate::cycle::{ActionAck, CycleOrchestrator};
use crate::error::{NotifyError, Result};

#[derive(Clone)]
struct GatewayState {
    orchestrator: Arc<CycleOrchestrator>,
    bearer_token: Option<String>,
}

/// Build the gateway router. Blank bearer tokens disable the check.
pub fn router(orchestrator: Arc<CycleOrchestrator>, bearer_token: Option<String>) -> Router {
    let bearer_token = bearer_token
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty());
    let state = GatewayState {
        orchestrator,
        bearer_token,
    };
    Router::new()
        .route("/health", get(gateway_health))
        .route("/api/messages", post(inbound_message))
        .with_state(state)
}

pub async fn run_gateway(config: GatewayConfig, orchestrator: Arc<CycleOrchestrator>) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| NotifyError::Gateway(format!("bind {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;

    let app = router(orchestrator, config.bearer_token);

    tracing::info!("inbound gateway listening on http://{local_addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| NotifyError::Gateway(e.to_string()))?;
    Ok(())
}

async fn gateway_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.orchestrator.health())
}

fn bearer_is_valid(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    candidate == expected_token
}

async fn inbound_message(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, state.bearer_token.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    // Unparseable bodies get the same treatment as unrecognized shapes.
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "inbound body is not JSON");
        serde_json::Value::Null
    });

    let ack = match action::extract(&payload) {
        Extraction::Action(request) => state.orchestrator.apply_action(request).await,
        Extraction::Unextractable => {
            tracing::info!(
                activity_type = payload.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
                "inbound event carried no action"
            );
            ActionAck::unextractable()
        }
    };
    (StatusCode::OK, Json(ack)).into_response()
}
