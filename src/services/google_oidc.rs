// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google ID token verification for "Sign in with Google".
//!
//! The browser runs the consent popup and hands us the resulting ID token
//! (the `credential`). We check its signature against Google's published
//! keys and its audience against our OAuth client ID.

use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Google account facts taken from a verified ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleAccount {
    /// Stable Google account ID (`sub`)
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

impl GoogleAccount {
    /// Best available human-readable name.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let joined = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.trim().is_empty() {
            return joined;
        }
        self.email.clone().unwrap_or_else(|| "User".to_string())
    }
}

/// ID token verification failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OidcError {
    /// The credential is malformed, expired, or not meant for us.
    #[error("invalid credential: {0}")]
    Invalid(String),
    /// Google's key endpoint could not be reached or parsed.
    #[error("key fetch failed: {0}")]
    Transient(String),
}

#[derive(Clone)]
enum VerifierMode {
    /// RS256 tokens checked against Google's JWKS.
    Google,
    /// HS256 tokens signed with a shared secret (local development and tests).
    SharedSecret(Arc<DecodingKey>),
}

struct KeyCache {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Google-issued ID tokens.
pub struct GoogleOidcVerifier {
    http_client: reqwest::Client,
    client_id: String,
    mode: VerifierMode,
    keys: RwLock<Option<KeyCache>>,
    refresh_lock: Mutex<()>,
}

impl GoogleOidcVerifier {
    /// Create a production verifier that fetches and caches Google's signing keys.
    pub fn new(client_id: impl Into<String>) -> anyhow::Result<Self> {
        let client_id = client_id.into();
        tracing::info!(client_id = %client_id, "Initialized Google ID token verifier");
        Self::with_mode(client_id, VerifierMode::Google)
    }

    /// Create a verifier that accepts HS256 tokens signed with `secret`.
    pub fn new_with_shared_secret(
        client_id: impl Into<String>,
        secret: &[u8],
    ) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("shared ID token secret must not be empty");
        }
        Self::with_mode(
            client_id.into(),
            VerifierMode::SharedSecret(Arc::new(DecodingKey::from_secret(secret))),
        )
    }

    fn with_mode(client_id: String, mode: VerifierMode) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        Ok(Self {
            http_client,
            client_id,
            mode,
            keys: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Verify a sign-in credential and return the account it names.
    pub async fn verify_credential(&self, credential: &str) -> Result<GoogleAccount, OidcError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(OidcError::Invalid("credential is empty".to_string()));
        }

        let header = decode_header(credential)
            .map_err(|e| OidcError::Invalid(format!("invalid JWT header: {e}")))?;

        let (algorithm, key) = match &self.mode {
            VerifierMode::SharedSecret(key) => (Algorithm::HS256, key.clone()),
            VerifierMode::Google => {
                let kid = header
                    .kid
                    .ok_or_else(|| OidcError::Invalid("missing JWT kid".to_string()))?;
                (Algorithm::RS256, self.key_for_kid(&kid).await?)
            }
        };

        if header.alg != algorithm {
            return Err(OidcError::Invalid(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }

        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<GoogleIdTokenClaims>(credential, key.as_ref(), &validation)
            .map_err(|e| OidcError::Invalid(format!("JWT validation failed: {e}")))?
            .claims;

        if claims.email_verified == Some(false) {
            return Err(OidcError::Invalid("email is not verified".to_string()));
        }

        tracing::debug!(subject = %claims.sub, "Verified Google ID token");

        Ok(GoogleAccount {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            given_name: claims.given_name,
            family_name: claims.family_name,
        })
    }

    async fn key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        // Google rotates keys; an unknown kid forces one refetch past the TTL.
        for force in [false, true] {
            self.refresh_keys(force).await?;
            if let Some(key) = self.cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(OidcError::Invalid(format!("unknown JWT kid: {kid}")))
    }

    async fn cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.keys.read().await;
        cache
            .as_ref()
            .filter(|c| c.expires_at > Instant::now())
            .and_then(|c| c.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_keys(&self, force: bool) -> Result<(), OidcError> {
        let _guard = self.refresh_lock.lock().await;

        if !force
            && self
                .keys
                .read()
                .await
                .as_ref()
                .is_some_and(|c| c.expires_at > Instant::now())
        {
            return Ok(());
        }

        let response = self
            .http_client
            .get(GOOGLE_CERTS_URL)
            .send()
            .await
            .map_err(|e| OidcError::Transient(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Transient(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_KEY_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| OidcError::Transient(format!("invalid JWKS JSON: {e}")))?;

        let keys_by_kid: HashMap<String, Arc<DecodingKey>> = jwks
            .keys
            .into_iter()
            .filter(Jwk::is_rs256_signing_key)
            .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => Some((jwk.kid, Arc::new(key))),
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA key");
                    None
                }
            })
            .collect();

        if keys_by_kid.is_empty() {
            return Err(OidcError::Transient(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        tracing::debug!(
            keys = keys_by_kid.len(),
            ttl_secs = ttl.as_secs(),
            "Google signing keys refreshed"
        );

        *self.keys.write().await = Some(KeyCache {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        });
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

impl Jwk {
    fn is_rs256_signing_key(&self) -> bool {
        self.kty == "RSA"
            && !self.kid.trim().is_empty()
            && self.alg.as_deref().is_none_or(|a| a == "RS256")
            && self.use_.as_deref().is_none_or(|u| u == "sig")
    }
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
}

/// Extract `max-age` seconds from a Cache-Control header value.
fn max_age_secs(value: &str) -> Option<u64> {
    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse().ok())
}
