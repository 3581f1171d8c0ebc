// ABOUTME: Payment webhook HTTP route adapting the processor to axum
// ABOUTME: Maps processor outcomes to the provider-facing JSON status contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payment webhook endpoint
//!
//! `POST /webhooks/payments` with the provider's notification body.
//! Responses are `200` for processed-or-ignored, `400` for
//! malformed/unverifiable, `500` for internal failure — the processor
//! decides, this route only translates.

use super::ServerResources;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use serde_json::Value;
use std::sync::Arc;

/// Create the webhook routes
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(resources)
}

async fn payment_webhook(
    State(resources): State<Arc<ServerResources>>,
    Json(payload): Json<Value>,
) -> Response {
    let outcome = resources.processor.process(&payload).await;
    let status = StatusCode::from_u16(outcome.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.body())).into_response()
}
