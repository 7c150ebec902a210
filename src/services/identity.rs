// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity resolution for the current session.
//!
//! Sessions are HS256 JWTs minted after a verified Google sign-in. Resolving
//! a token is synchronous and never touches the network; sign-in and
//! sign-out transitions are published to subscribers over a broadcast
//! channel.

use super::google_oidc::{GoogleOidcVerifier, OidcError};
use crate::error::AppError;
use crate::middleware::auth::{create_jwt, Claims};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const TRANSITION_BUFFER: usize = 64;

/// The signed-in user behind a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub identity: Identity,
    /// Session JWT for the cookie / Bearer header
    pub token: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[derive(Debug, Clone)]
struct Transition {
    user_id: String,
    identity: Option<Identity>,
}

/// Handle for an identity-change subscription. Delivery stops when dropped.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolves session tokens and tracks sign-in/sign-out transitions.
pub struct IdentityResolver {
    signing_key: Vec<u8>,
    verifier: GoogleOidcVerifier,
    transitions: broadcast::Sender<Transition>,
}

impl IdentityResolver {
    pub fn new(signing_key: Vec<u8>, verifier: GoogleOidcVerifier) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            signing_key,
            verifier,
            transitions,
        }
    }

    /// Identity for a session token, or `None` if the token is missing,
    /// expired, or was not signed by us.
    pub fn resolve(&self, token: &str) -> Option<Identity> {
        let key = DecodingKey::from_secret(&self.signing_key);
        let validation = Validation::new(Algorithm::HS256);

        let claims = decode::<Claims>(token, &key, &validation).ok()?.claims;
        if claims.sub.is_empty() {
            return None;
        }

        Some(Identity {
            user_id: claims.sub,
            display_name: claims.name,
        })
    }

    pub fn current_user_id(&self, token: &str) -> Option<String> {
        self.resolve(token).map(|i| i.user_id)
    }

    pub fn display_name(&self, token: &str) -> Option<String> {
        self.resolve(token).map(|i| i.display_name)
    }

    /// Mint a session token for an identity.
    pub fn issue_session(&self, identity: &Identity) -> Result<String, AppError> {
        Ok(create_jwt(
            &identity.user_id,
            &identity.display_name,
            &self.signing_key,
        )?)
    }

    /// Exchange a Google ID token for a session.
    pub async fn sign_in(&self, credential: &str) -> Result<SignedIn, AppError> {
        let account = self
            .verifier
            .verify_credential(credential)
            .await
            .map_err(|e| match e {
                OidcError::Invalid(reason) => {
                    tracing::warn!(reason = %reason, "Rejected sign-in credential");
                    AppError::InvalidToken
                }
                OidcError::Transient(reason) => AppError::Upstream(reason),
            })?;

        let identity = Identity {
            display_name: account.display_name(),
            user_id: account.subject,
        };
        let token = self.issue_session(&identity)?;

        tracing::info!(user_id = %identity.user_id, "User signed in");
        self.publish(&identity.user_id, Some(identity.clone()));

        Ok(SignedIn {
            identity,
            token,
            given_name: account.given_name,
            family_name: account.family_name,
        })
    }

    pub fn sign_out(&self, identity: &Identity) {
        tracing::info!(user_id = %identity.user_id, "User signed out");
        self.publish(&identity.user_id, None);
    }

    /// Invoke `callback` on every sign-in (`Some`) and sign-out (`None`).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, Option<&Identity>) + Send + 'static,
    {
        let mut rx = self.transitions.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(t) => callback(&t.user_id, t.identity.as_ref()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Identity subscriber fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    fn publish(&self, user_id: &str, identity: Option<Identity>) {
        // No receivers is fine.
        let _ = self.transitions.send(Transition {
            user_id: user_id.to_string(),
            identity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SESSION_KEY: &[u8] = b"session-key-for-unit-tests-32byt";
    const GOOGLE_SECRET: &[u8] = b"google-secret";
    const CLIENT_ID: &str = "client.apps.googleusercontent.com";

    fn resolver() -> IdentityResolver {
        let verifier =
            GoogleOidcVerifier::new_with_shared_secret(CLIENT_ID, GOOGLE_SECRET).unwrap();
        IdentityResolver::new(SESSION_KEY.to_vec(), verifier)
    }

    fn credential(sub: &str) -> String {
        let claims = serde_json::json!({
            "iss": "https://accounts.google.com",
            "aud": CLIENT_ID,
            "sub": sub,
            "exp": chrono::Utc::now().timestamp() + 600,
            "name": "Josh Miller",
            "given_name": "Josh",
            "family_name": "Miller"
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(GOOGLE_SECRET),
        )
        .unwrap()
    }

    #[test]
    fn resolve_round_trips_issued_session() {
        let resolver = resolver();
        let identity = Identity {
            user_id: "u1".to_string(),
            display_name: "Josh Miller".to_string(),
        };
        let token = resolver.issue_session(&identity).unwrap();

        assert_eq!(resolver.resolve(&token), Some(identity));
        assert_eq!(resolver.current_user_id(&token).as_deref(), Some("u1"));
        assert_eq!(
            resolver.display_name(&token).as_deref(),
            Some("Josh Miller")
        );
    }

    #[test]
    fn resolve_rejects_foreign_and_garbage_tokens() {
        let resolver = resolver();
        let foreign = create_jwt("u1", "x", b"some-other-key").unwrap();

        assert!(resolver.resolve(&foreign).is_none());
        assert!(resolver.resolve("garbage").is_none());
        assert!(resolver.current_user_id("").is_none());
    }

    #[tokio::test]
    async fn sign_in_and_out_notify_subscribers() {
        let resolver = resolver();
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
        let sink = seen.clone();
        let _sub = resolver.subscribe(move |user_id, identity| {
            sink.lock()
                .unwrap()
                .push((user_id.to_string(), identity.is_some()));
        });

        let signed_in = resolver.sign_in(&credential("g-42")).await.unwrap();
        assert_eq!(signed_in.identity.user_id, "g-42");
        assert_eq!(signed_in.given_name.as_deref(), Some("Josh"));
        resolver.sign_out(&signed_in.identity);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("g-42".to_string(), true), ("g-42".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let resolver = resolver();
        let seen: Arc<Mutex<usize>> = Arc::default();
        let sink = seen.clone();
        let sub = resolver.subscribe(move |_, _| *sink.lock().unwrap() += 1);
        sub.unsubscribe();

        resolver.sign_in(&credential("g-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn sign_in_rejects_bad_credential() {
        let resolver = resolver();
        assert!(matches!(
            resolver.sign_in("nope").await,
            Err(AppError::InvalidToken)
        ));
    }
}
