// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{header, Request};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use spot_share::config::Config;
use spot_share::db::FirestoreDb;
use spot_share::middleware::auth::create_jwt;
use spot_share::routes::create_router;
use spot_share::services::{GoogleOidcVerifier, IdentityResolver, PaymentService, VehicleCatalog};
use spot_share::AppState;
use std::sync::Arc;

/// Secret the test verifier accepts Google ID tokens under.
#[allow(dead_code)]
pub const GOOGLE_TEST_SECRET: &[u8] = b"google-id-token-test-secret";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create an app over the in-memory store, mock Stripe and a static
/// vehicle catalog. Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let verifier = GoogleOidcVerifier::new_with_shared_secret(
        config.google_client_id.clone(),
        GOOGLE_TEST_SECRET,
    )
    .expect("verifier");
    let identity = IdentityResolver::new(config.jwt_signing_key.clone(), verifier);
    let vehicles = VehicleCatalog::new_static([
        ("Honda", &["Civic", "Accord"][..]),
        ("Toyota", &["Prius", "Camry"][..]),
    ]);

    let state = Arc::new(AppState::new(
        config,
        FirestoreDb::new_in_memory(),
        identity,
        Arc::new(PaymentService::new_mock()),
        vehicles,
    ));

    (create_router(state.clone()), state)
}

/// Session token for `user_id` signed with the app's key.
#[allow(dead_code)]
pub fn session_token(state: &AppState, user_id: &str) -> String {
    create_jwt(user_id, "Test User", &state.config.jwt_signing_key).unwrap()
}

/// A Google ID token the test verifier will accept.
#[allow(dead_code)]
pub fn google_credential(state: &AppState, sub: &str, name: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": state.config.google_client_id,
        "sub": sub,
        "iat": now,
        "exp": now + 600,
        "email": format!("{}@example.com", sub),
        "email_verified": true,
        "name": name,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(GOOGLE_TEST_SECRET),
    )
    .unwrap()
}

/// JSON request with an optional Bearer token.
#[allow(dead_code)]
pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Bodiless request with an optional Bearer token.
#[allow(dead_code)]
pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create a profile for `user_id` directly through the store.
#[allow(dead_code)]
pub async fn seed_profile(state: &AppState, user_id: &str, first_name: &str, plate: &str) {
    use spot_share::services::ProfileFields;
    state
        .profiles
        .create_profile_if_absent(
            Some(user_id),
            ProfileFields {
                first_name: first_name.to_string(),
                last_name: "Tester".to_string(),
                color: "Gray".to_string(),
                make: "Honda".to_string(),
                model: "Civic".to_string(),
                plate: plate.to_string(),
            },
        )
        .await
        .unwrap();
}

/// Seller lists a spot, buyer pays for it; returns the confirmed booking ID.
#[allow(dead_code)]
pub async fn completed_booking(state: &AppState, buyer: &str, seller: &str) -> String {
    use spot_share::services::{BeginCheckout, NewListing};

    let listing = state
        .listings
        .create_listing(
            Some(seller),
            NewListing {
                latitude: 33.966787,
                longitude: -118.417631,
                price: 4,
                time_window: "14:00".to_string(),
            },
        )
        .await
        .unwrap()
        .unwrap();
    let started = state
        .checkout
        .begin(
            Some(buyer),
            BeginCheckout {
                spot_id: listing.spot_id,
                spot_name: None,
                hours: 1,
                quoted_amount_cents: None,
            },
        )
        .await
        .unwrap();
    state.checkout.confirm(&started.booking_id).await.unwrap();
    started.booking_id
}
