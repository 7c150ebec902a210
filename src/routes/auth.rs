// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google sign-in and logout routes.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::Result;
use crate::middleware::auth::{session_token, SESSION_COOKIE, SESSION_TTL_SECS};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google", post(sign_in))
        .route("/auth/logout", post(logout))
}

/// Body posted by the Google Identity Services button.
#[derive(Deserialize, Validate)]
pub struct GoogleSignInRequest {
    /// Google ID token
    #[validate(length(min = 1))]
    pub credential: String,
}

/// Sign-in result.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SignInResponse {
    pub user_id: String,
    pub display_name: String,
    /// False means the client should show the sign-up form
    pub profile_exists: bool,
    /// Session token, also set as an HttpOnly cookie
    pub token: String,
    /// Name parts from Google, for pre-filling the sign-up form
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// Exchange a Google credential for a session.
async fn sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<GoogleSignInRequest>,
) -> Result<(CookieJar, Json<SignInResponse>)> {
    body.validate()?;

    let signed_in = state.identity.sign_in(&body.credential).await?;
    let profile_exists = state
        .profiles
        .exists(Some(&signed_in.identity.user_id))
        .await?;

    let secure = state.config.frontend_url.starts_with("https://");
    let cookie = Cookie::build((SESSION_COOKIE, signed_in.token.clone()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(SESSION_TTL_SECS as i64));

    tracing::info!(
        user_id = %signed_in.identity.user_id,
        profile_exists,
        "Session issued"
    );

    Ok((
        jar.add(cookie),
        Json(SignInResponse {
            user_id: signed_in.identity.user_id,
            display_name: signed_in.identity.display_name,
            profile_exists,
            token: signed_in.token,
            given_name: signed_in.given_name,
            family_name: signed_in.family_name,
        }),
    ))
}

/// Clear the session cookie and notify identity subscribers.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
) -> (CookieJar, StatusCode) {
    if let Some(identity) = session_token(&jar, &headers).and_then(|t| state.identity.resolve(&t)) {
        state.identity.sign_out(&identity);
    }

    // Sent whether or not the request carried the cookie.
    let expired = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO);
    (jar.add(expired), StatusCode::NO_CONTENT)
}
