// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and session tests.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{
    body_json, create_test_app, get_request, google_credential, json_request, session_token,
};
use tower::ServiceExt; // for oneshot

#[tokio::test]
async fn test_protected_route_requires_auth() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get_request("/api/me", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(get_request("/api/me", Some("invalid.token.here")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_key_rejected() {
    let (app, _) = create_test_app();
    let token = spot_share::middleware::auth::create_jwt(
        "user-1",
        "Mallory",
        b"some_other_key_32_bytes_long!!!",
    )
    .unwrap();

    let response = app
        .oneshot(get_request("/api/me", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_token_reaches_handler() {
    let (app, state) = create_test_app();
    let token = session_token(&state, "user-1");

    let response = app
        .oneshot(get_request("/api/me", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], "user-1");
    assert_eq!(body["profile_exists"], false);
    assert_eq!(body["first_name"], "N/A");
    assert_eq!(body["plate"], "N/A");
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/spots")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // OPTIONS should return 200 (CORS preflight success)
    assert_eq!(response.status(), StatusCode::OK);

    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/spots")
                .header(header::ORIGIN, "https://evil.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_public_route_no_auth_required() {
    let (app, _) = create_test_app();

    let response = app.oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_google_sign_in_sets_session_cookie() {
    let (app, state) = create_test_app();
    let credential = google_credential(&state, "google-sub-1", "Ada Lovelace");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/google",
            None,
            serde_json::json!({ "credential": credential }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("spot_share_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));

    let body = body_json(response).await;
    assert_eq!(body["user_id"], "google-sub-1");
    assert_eq!(body["display_name"], "Ada Lovelace");
    assert_eq!(body["profile_exists"], false);

    // The cookie alone authenticates later requests
    let pair = cookie.split(';').next().unwrap().to_string();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header(header::COOKIE, pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], "google-sub-1");
    assert_eq!(body["display_name"], "Ada Lovelace");
}

#[tokio::test]
async fn test_sign_in_reports_existing_profile() {
    let (app, state) = create_test_app();
    common::seed_profile(&state, "google-sub-2", "Grace", "abc123").await;
    let credential = google_credential(&state, "google-sub-2", "Grace Hopper");

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/google",
            None,
            serde_json::json!({ "credential": credential }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["profile_exists"], true);
}

#[tokio::test]
async fn test_sign_in_rejects_forged_credential() {
    let (app, state) = create_test_app();
    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &serde_json::json!({
            "iss": "https://accounts.google.com",
            "aud": state.config.google_client_id,
            "sub": "attacker",
            "exp": chrono::Utc::now().timestamp() + 600,
        }),
        &jsonwebtoken::EncodingKey::from_secret(b"not-the-google-secret"),
    )
    .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/google",
            None,
            serde_json::json!({ "credential": forged }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_in_rejects_wrong_audience() {
    let (app, _) = create_test_app();
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &serde_json::json!({
            "iss": "https://accounts.google.com",
            "aud": "someone-else.apps.googleusercontent.com",
            "sub": "user",
            "exp": chrono::Utc::now().timestamp() + 600,
        }),
        &jsonwebtoken::EncodingKey::from_secret(common::GOOGLE_TEST_SECRET),
    )
    .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/google",
            None,
            serde_json::json!({ "credential": token }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_cookie_and_notifies() {
    let (app, state) = create_test_app();
    let token = session_token(&state, "user-9");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = state.identity.subscribe(move |user_id, identity| {
        let _ = tx.send((user_id.to_string(), identity.is_some()));
    });

    let response = app
        .oneshot(json_request("POST", "/auth/logout", Some(&token), serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(cookie.starts_with("spot_share_token="));
    assert!(cookie.contains("Max-Age=0"));

    let (user_id, signed_in) = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user_id, "user-9");
    assert!(!signed_in);
}

#[tokio::test]
async fn test_cookie_logout_expires_cookie() {
    let (app, state) = create_test_app();
    let token = session_token(&state, "user-10");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::COOKIE, format!("spot_share_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookies: Vec<_> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("spot_share_token=;"));
    assert!(cookies[0].contains("Max-Age=0"));
}
