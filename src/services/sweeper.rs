// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic housekeeping: expire stale listings and release reservations
//! that never received a payment outcome.

use super::checkout::CheckoutOrchestrator;
use super::listings::ListingStore;
use crate::config::Config;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub listings_expired: usize,
    pub reservations_released: usize,
}

/// Background sweeper over listings and bookings.
#[derive(Clone)]
pub struct Sweeper {
    listings: ListingStore,
    checkout: CheckoutOrchestrator,
    listing_ttl: chrono::Duration,
    reservation_timeout: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(config: &Config, listings: ListingStore, checkout: CheckoutOrchestrator) -> Self {
        Self {
            listings,
            checkout,
            listing_ttl: chrono::Duration::hours(config.listing_ttl_hours),
            reservation_timeout: chrono::Duration::minutes(config.reservation_timeout_minutes),
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Run one pass. Failures in one half don't stop the other.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.checkout.release_stale(now, self.reservation_timeout).await {
            Ok(n) => report.reservations_released = n,
            Err(e) => tracing::error!(error = %e, "Stale reservation sweep failed"),
        }

        match self.listings.expire_listings(now, self.listing_ttl).await {
            Ok(n) => report.listings_expired = n,
            Err(e) => tracing::error!(error = %e, "Listing expiry sweep failed"),
        }

        if report != SweepReport::default() {
            tracing::info!(
                listings_expired = report.listings_expired,
                reservations_released = report.reservations_released,
                "Sweep completed"
            );
        }
        report
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper started");

            loop {
                ticker.tick().await;
                self.sweep_once(Utc::now()).await;
            }
        })
    }
}
