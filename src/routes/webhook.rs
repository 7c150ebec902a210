// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook route for Stripe checkout events.

use crate::error::{AppError, Result};
use crate::services::payments::{verify_webhook_signature, WebhookEvent};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::sync::Arc;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/stripe", post(handle_event))
}

/// What a checkout event asks us to do.
#[derive(Debug, PartialEq, Eq)]
enum EventAction {
    Confirm,
    Release(&'static str),
    Ignore,
}

fn classify(event_type: &str) -> EventAction {
    match event_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            EventAction::Confirm
        }
        "checkout.session.expired" => EventAction::Release("session expired"),
        "checkout.session.async_payment_failed" => EventAction::Release("payment failed"),
        _ => EventAction::Ignore,
    }
}

/// Handle incoming webhook events (POST).
///
/// Non-2xx responses make Stripe retry, so only signature and payload
/// problems are rejected outright; settlement is idempotent.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    if let Err(e) = verify_webhook_signature(
        &state.config.stripe_webhook_secret,
        &body,
        signature,
        chrono::Utc::now().timestamp(),
    ) {
        tracing::warn!(error = %e, "Security Alert: Stripe webhook signature rejected");
        return Err(e.into());
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {}", e)))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    let action = classify(&event.event_type);
    if action == EventAction::Ignore {
        return Ok(StatusCode::OK);
    }

    let session_id = event
        .session_id()
        .ok_or_else(|| AppError::BadRequest("Event has no session id".to_string()))?;

    let settled = match action {
        EventAction::Confirm => state.checkout.confirm_session(session_id).await?,
        EventAction::Release(reason) => state.checkout.release_session(session_id, reason).await?,
        EventAction::Ignore => None,
    };

    if let Some(booking) = settled {
        tracing::info!(
            booking_id = %booking.booking_id,
            state = booking.state.as_str(),
            "Webhook settled booking"
        );
    }

    Ok(StatusCode::OK)
}
