// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe client for hosted checkout sessions and payment intents.
//!
//! Handles:
//! - Checkout session create / retrieve / expire
//! - Standalone payment intents for the embedded card form
//! - Webhook signature verification
//!
//! A mock mode stands in for Stripe in tests and offline development.

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use subtle::ConstantTimeEq;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Webhook timestamps further than this from now are rejected.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Payment boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("request to payment processor failed: {0}")]
    Transport(String),

    #[error("payment processor returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid webhook signature: {0}")]
    Signature(String),
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Signature(msg) => crate::error::AppError::BadRequest(msg),
            other => crate::error::AppError::Upstream(other.to_string()),
        }
    }
}

/// Stripe's view of whether a checkout session was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

/// Lifecycle of a hosted checkout session.
///
/// `Complete` with an unpaid status means an async payment method (bank
/// debit) is still settling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Hosted checkout session (subset of Stripe's object).
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Redirect URL; absent once the session is complete or expired
    pub url: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
}

/// Payment intent (subset of Stripe's object).
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Parameters for a one-line-item hosted checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub amount_cents: i64,
    /// Line item name shown on the Stripe page
    pub name: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Our booking ID, echoed back in webhooks
    pub client_reference_id: String,
}

/// Configurable stand-in for Stripe.
struct MockProcessor {
    next_id: AtomicU64,
    fail_sessions: AtomicBool,
    fail_retrieve: AtomicBool,
    payment_status: Mutex<PaymentStatus>,
    /// Overrides the status derived from `payment_status`
    session_status: Mutex<Option<SessionStatus>>,
    sessions: DashMap<String, CheckoutSession>,
    expired: DashMap<String, ()>,
}

impl MockProcessor {
    /// Current view of a session, as Stripe would report it.
    fn current(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        let mut session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| PaymentError::Api {
                status: 404,
                message: format!("No such checkout session: {}", session_id),
            })?;

        if self.expired.contains_key(session_id) {
            session.status = SessionStatus::Expired;
            session.payment_status = PaymentStatus::Unpaid;
            session.url = None;
            return Ok(session);
        }

        session.payment_status = self
            .payment_status
            .lock()
            .map(|s| *s)
            .unwrap_or(PaymentStatus::Unpaid);
        let forced = self.session_status.lock().ok().and_then(|s| *s);
        session.status = forced.unwrap_or(match session.payment_status {
            PaymentStatus::Paid | PaymentStatus::NoPaymentRequired => SessionStatus::Complete,
            _ => SessionStatus::Open,
        });
        if session.status != SessionStatus::Open {
            session.url = None;
        }
        Ok(session)
    }
}

enum Mode {
    Stripe {
        http: reqwest::Client,
        base_url: String,
        secret_key: String,
    },
    Mock(MockProcessor),
}

/// Payment processor client.
pub struct PaymentService {
    mode: Mode,
}

impl PaymentService {
    /// Create a client for the live (or test-mode) Stripe API.
    pub fn new(secret_key: String) -> Self {
        Self {
            mode: Mode::Stripe {
                http: reqwest::Client::new(),
                base_url: STRIPE_API_BASE.to_string(),
                secret_key,
            },
        }
    }

    /// Create a mock processor (offline mode).
    ///
    /// Sessions succeed and report `Paid` until told otherwise.
    pub fn new_mock() -> Self {
        Self {
            mode: Mode::Mock(MockProcessor {
                next_id: AtomicU64::new(1),
                fail_sessions: AtomicBool::new(false),
                fail_retrieve: AtomicBool::new(false),
                payment_status: Mutex::new(PaymentStatus::Paid),
                session_status: Mutex::new(None),
                sessions: DashMap::new(),
                expired: DashMap::new(),
            }),
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.mode, Mode::Mock(_))
    }

    /// Mock: make session creation fail.
    pub fn set_mock_fail_sessions(&self, fail: bool) {
        if let Mode::Mock(mock) = &self.mode {
            mock.fail_sessions.store(fail, Ordering::SeqCst);
        }
    }

    /// Mock: make session retrieval fail as if Stripe were unreachable.
    pub fn set_mock_fail_retrieve(&self, fail: bool) {
        if let Mode::Mock(mock) = &self.mode {
            mock.fail_retrieve.store(fail, Ordering::SeqCst);
        }
    }

    /// Mock: session status reported for every unexpired session.
    ///
    /// Without an override, paid sessions are `Complete` and the rest `Open`.
    pub fn set_mock_session_status(&self, status: SessionStatus) {
        if let Mode::Mock(mock) = &self.mode {
            if let Ok(mut guard) = mock.session_status.lock() {
                *guard = Some(status);
            }
        }
    }

    /// Mock: payment status reported for every session.
    pub fn set_mock_payment_status(&self, status: PaymentStatus) {
        if let Mode::Mock(mock) = &self.mode {
            if let Ok(mut guard) = mock.payment_status.lock() {
                *guard = status;
            }
        }
    }

    /// Mock: whether a session was expired through this client.
    pub fn mock_session_expired(&self, session_id: &str) -> bool {
        match &self.mode {
            Mode::Mock(mock) => mock.expired.contains_key(session_id),
            Mode::Stripe { .. } => false,
        }
    }

    /// Create a hosted checkout session for one line item.
    pub async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        match &self.mode {
            Mode::Mock(mock) => {
                if mock.fail_sessions.load(Ordering::SeqCst) {
                    tracing::warn!("Mock checkout session failure");
                    return Err(PaymentError::Api {
                        status: 402,
                        message: "mock session failure".to_string(),
                    });
                }
                let id = format!("cs_test_mock_{}", mock.next_id.fetch_add(1, Ordering::SeqCst));
                let session = CheckoutSession {
                    url: Some(format!("https://checkout.stripe.com/c/pay/{}", id)),
                    id: id.clone(),
                    status: SessionStatus::Open,
                    payment_status: PaymentStatus::Unpaid,
                };
                mock.sessions.insert(id, session.clone());
                Ok(session)
            }
            Mode::Stripe {
                http,
                base_url,
                secret_key,
            } => {
                let form = [
                    ("mode", "payment".to_string()),
                    ("success_url", req.success_url.clone()),
                    ("cancel_url", req.cancel_url.clone()),
                    ("client_reference_id", req.client_reference_id.clone()),
                    ("line_items[0][quantity]", "1".to_string()),
                    ("line_items[0][price_data][currency]", "usd".to_string()),
                    (
                        "line_items[0][price_data][unit_amount]",
                        req.amount_cents.to_string(),
                    ),
                    (
                        "line_items[0][price_data][product_data][name]",
                        req.name.clone(),
                    ),
                    (
                        "line_items[0][price_data][product_data][description]",
                        req.description.clone(),
                    ),
                    ("metadata[booking_id]", req.client_reference_id.clone()),
                ];

                let response = http
                    .post(format!("{}/checkout/sessions", base_url))
                    .bearer_auth(secret_key)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| PaymentError::Transport(e.to_string()))?;

                let session: CheckoutSession = check_response_json(response).await?;
                tracing::info!(
                    session_id = %session.id,
                    amount_cents = req.amount_cents,
                    "Checkout session created"
                );
                Ok(session)
            }
        }
    }

    /// Fetch the current state of a checkout session.
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, PaymentError> {
        match &self.mode {
            Mode::Mock(mock) => {
                if mock.fail_retrieve.load(Ordering::SeqCst) {
                    return Err(PaymentError::Transport("mock processor unreachable".to_string()));
                }
                mock.current(session_id)
            }
            Mode::Stripe {
                http,
                base_url,
                secret_key,
            } => {
                let response = http
                    .get(format!(
                        "{}/checkout/sessions/{}",
                        base_url,
                        urlencoding::encode(session_id)
                    ))
                    .bearer_auth(secret_key)
                    .send()
                    .await
                    .map_err(|e| PaymentError::Transport(e.to_string()))?;

                check_response_json(response).await
            }
        }
    }

    /// Expire an open checkout session so it can no longer be paid.
    ///
    /// Stripe refuses once the session is complete.
    pub async fn expire_checkout_session(&self, session_id: &str) -> Result<(), PaymentError> {
        match &self.mode {
            Mode::Mock(mock) => {
                if mock.fail_retrieve.load(Ordering::SeqCst) {
                    return Err(PaymentError::Transport("mock processor unreachable".to_string()));
                }
                if mock.current(session_id)?.status == SessionStatus::Complete {
                    return Err(PaymentError::Api {
                        status: 400,
                        message: "Only open checkout sessions can be expired".to_string(),
                    });
                }
                mock.expired.insert(session_id.to_string(), ());
                Ok(())
            }
            Mode::Stripe {
                http,
                base_url,
                secret_key,
            } => {
                let response = http
                    .post(format!(
                        "{}/checkout/sessions/{}/expire",
                        base_url,
                        urlencoding::encode(session_id)
                    ))
                    .bearer_auth(secret_key)
                    .send()
                    .await
                    .map_err(|e| PaymentError::Transport(e.to_string()))?;

                let _: CheckoutSession = check_response_json(response).await?;
                tracing::info!(session_id, "Checkout session expired");
                Ok(())
            }
        }
    }

    /// Create a USD payment intent for the embedded card form.
    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
    ) -> Result<PaymentIntent, PaymentError> {
        match &self.mode {
            Mode::Mock(mock) => {
                let n = mock.next_id.fetch_add(1, Ordering::SeqCst);
                Ok(PaymentIntent {
                    id: format!("pi_mock_{}", n),
                    client_secret: format!("pi_mock_{}_secret_mock", n),
                })
            }
            Mode::Stripe {
                http,
                base_url,
                secret_key,
            } => {
                let response = http
                    .post(format!("{}/payment_intents", base_url))
                    .bearer_auth(secret_key)
                    .form(&[
                        ("amount", amount_cents.to_string()),
                        ("currency", "usd".to_string()),
                        ("automatic_payment_methods[enabled]", "true".to_string()),
                    ])
                    .send()
                    .await
                    .map_err(|e| PaymentError::Transport(e.to_string()))?;

                check_response_json(response).await
            }
        }
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, PaymentError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);
        return Err(PaymentError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| PaymentError::Transport(format!("JSON parse error: {}", e)))
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: String,
}

// ─── Webhooks ────────────────────────────────────────────────

/// Stripe webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// ID of the checkout session this event is about, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// The header looks like `t=1700000000,v1=<hex>[,v1=<hex>...]`. The
/// signature is HMAC-SHA256 over `"{t}.{payload}"` keyed by the endpoint
/// secret.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now_unix: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::Signature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(PaymentError::Signature("no v1 signature".to_string()));
    }
    if (now_unix - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(PaymentError::Signature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = sign_payload(secret, timestamp, payload)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

    if matched {
        Ok(())
    } else {
        Err(PaymentError::Signature("signature mismatch".to_string()))
    }
}

/// Compute the v1 signature bytes for a payload.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, PaymentError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}
