// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spot Share API Server
//!
//! Backend for a peer-to-peer parking spot marketplace: sign-in, profiles,
//! listings near the buyer, and Stripe checkout that holds a spot while the
//! buyer pays.

use spot_share::{
    config::Config,
    db::FirestoreDb,
    services::{GoogleOidcVerifier, IdentityResolver, PaymentService, Sweeper, VehicleCatalog},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Spot Share API");

    // Initialize database
    let db = if config.in_memory_db {
        tracing::warn!("Using in-memory document store; data is lost on restart");
        FirestoreDb::new_in_memory()
    } else {
        FirestoreDb::new(&config.gcp_project_id).await?
    };

    let verifier = GoogleOidcVerifier::new(config.google_client_id.clone())?;
    let identity = IdentityResolver::new(config.jwt_signing_key.clone(), verifier);

    let payments = Arc::new(PaymentService::new(config.stripe_secret_key.clone()));
    tracing::info!("Stripe client initialized");

    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        identity,
        payments,
        VehicleCatalog::new(),
    ));

    // Audit trail of session transitions
    let _identity_log = state.identity.subscribe(|user_id, identity| match identity {
        Some(identity) => tracing::info!(
            user_id,
            display_name = %identity.display_name,
            "Identity transition: signed in"
        ),
        None => tracing::info!(user_id, "Identity transition: signed out"),
    });

    // Expire stale listings and release abandoned reservations
    let sweeper = Sweeper::new(&config, state.listings.clone(), state.checkout.clone());
    let _sweeper_task = sweeper.spawn();

    // Build router
    let app = spot_share::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spot_share=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
