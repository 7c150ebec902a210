// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spot Share: a peer-to-peer parking spot marketplace
//!
//! This crate provides the backend API: Google sign-in, user profiles,
//! spot listings sorted by distance, and Stripe-backed checkout that
//! reserves a spot while the buyer pays.

pub mod config;
pub mod db;
pub mod error;
pub mod geo_utils;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{
    CheckoutOrchestrator, IdentityResolver, ListingStore, PaymentService, ProfileStore,
    VehicleCatalog,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub identity: IdentityResolver,
    pub profiles: ProfileStore,
    pub listings: ListingStore,
    pub checkout: CheckoutOrchestrator,
    pub payments: Arc<PaymentService>,
    pub vehicles: VehicleCatalog,
}

impl AppState {
    /// Wire the stores and orchestrator on top of the given backends.
    pub fn new(
        config: Config,
        db: FirestoreDb,
        identity: IdentityResolver,
        payments: Arc<PaymentService>,
        vehicles: VehicleCatalog,
    ) -> Self {
        let profiles = ProfileStore::new(db.clone());
        let listings = ListingStore::new(db.clone(), profiles.clone());
        let checkout = CheckoutOrchestrator::new(
            db.clone(),
            listings.clone(),
            payments.clone(),
            config.frontend_url.clone(),
        );

        Self {
            config,
            db,
            identity,
            profiles,
            listings,
            checkout,
            payments,
            vehicles,
        }
    }
}
