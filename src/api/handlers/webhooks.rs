use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{api::state::AppState, payments::WebhookOutcome};

/// Header carrying the hex HMAC-SHA256 of the raw request body.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Gateway webhook endpoint. Signature verification runs on the raw bytes
/// before anything is parsed; malformed or unrelated events are acknowledged
/// as ignored so the gateway does not retry them, while internal failures
/// return 500 so it does.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payment_service = &state.service_context.payment_service;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let Some(signature) = signature else {
        tracing::warn!("webhook request missing signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing signature" })),
        )
            .into_response();
    };

    if !payment_service.verify_webhook_signature(&body, signature) {
        tracing::warn!("webhook signature verification failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid signature" })),
        )
            .into_response();
    }

    let event: Value = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::info!(error = %e, "ignoring unparseable webhook body");
            return (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response();
        }
    };

    match payment_service.handle_webhook_event(&event).await {
        Ok(WebhookOutcome::Processed) => {
            (StatusCode::OK, Json(json!({ "status": "success" }))).into_response()
        }
        Ok(WebhookOutcome::Ignored(reason)) => {
            tracing::info!(reason, "webhook event ignored");
            (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Processing failed" })),
            )
                .into_response()
        }
    }
}
