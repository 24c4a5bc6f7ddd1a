//! HTTP surface: webhook intake, the encrypted form endpoint, and health.
//!
//! The webhook is always acknowledged with 200 once parsed; per-message
//! failures are logged, never surfaced, so the transport does not retry a
//! poison message forever. The encrypted form endpoint answers 421 on any
//! decryption failure, which tells the client to refresh its key material,
//! and deliberately sends no body there.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::crypto::FlowCrypto;
use crate::engine::ConversationEngine;
use crate::flow::FlowRouter;
use crate::inbound::normalize_webhook;

/// Shared handler state.
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub flow: Arc<FlowRouter>,
    /// Absent when no private key is configured; the form endpoints then
    /// answer 503.
    pub crypto: Option<Arc<FlowCrypto>>,
    pub service_name: String,
    pub webhook_verify_token: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/flow", post(handle_flow))
        .route("/flow/raw", post(handle_flow_raw))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": state.service_name
    }))
}

/// Transport subscription handshake: echo the challenge when the verify
/// token matches.
async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned();

    if mode == Some("subscribe")
        && !state.webhook_verify_token.is_empty()
        && token == Some(state.webhook_verify_token.as_str())
    {
        info!("Webhook subscription verified");
        challenge.unwrap_or_default().into_response()
    } else {
        warn!(?mode, "Webhook verification rejected");
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let messages = normalize_webhook(&payload);
    for message in &messages {
        if let Err(e) = state.engine.handle(message).await {
            error!(message_id = %message.id, error = %e, "Message handling failed");
        }
    }
    Json(json!({ "status": "ok" }))
}

/// JSON framing: `{"encrypted_response": "<base64>"}`.
async fn handle_flow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    match encrypted_exchange(&state, &payload).await {
        Ok(sealed) => Json(json!({ "encrypted_response": sealed })).into_response(),
        Err(response) => response,
    }
}

/// Raw framing: the base64 response as the plain body. Some client
/// versions expect this instead of the JSON wrapper.
async fn handle_flow_raw(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    match encrypted_exchange(&state, &payload).await {
        Ok(sealed) => sealed.into_response(),
        Err(response) => response,
    }
}

/// The decrypt, route, encrypt cycle shared by both framings.
async fn encrypted_exchange(state: &AppState, payload: &Value) -> Result<String, Response> {
    let Some(crypto) = &state.crypto else {
        warn!("Form request received but no private key is configured");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Encrypted channel unavailable" })),
        )
            .into_response());
    };

    let fields = (
        payload.get("encrypted_aes_key").and_then(Value::as_str),
        payload.get("initial_vector").and_then(Value::as_str),
        payload.get("encrypted_flow_data").and_then(Value::as_str),
    );
    let (Some(key), Some(iv), Some(data)) = fields else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing encryption parameters" })),
        )
            .into_response());
    };

    let (request, context) = match crypto.decrypt(key, iv, data) {
        Ok(opened) => opened,
        Err(e) => {
            // 421 without a body: the client re-fetches the public key.
            warn!(error = %e, "Form request could not be opened");
            return Err(StatusCode::MISDIRECTED_REQUEST.into_response());
        }
    };

    let response = match state.flow.route(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Malformed form envelope");
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Malformed flow payload" })),
            )
                .into_response());
        }
    };

    crypto.encrypt(&response, &context).map_err(|e| {
        error!(error = %e, "Response sealing failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
