// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Parking spot listing model.

use crate::geo_utils::Coordinates;
use crate::time_utils::parse_rfc3339_utc;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Lifecycle of a listing. `available` is only ever true while `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ListingState {
    #[default]
    Open,
    /// A booking for this spot was paid for
    Sold,
    /// The time window passed without a sale
    Expired,
}

/// Stored spot listing in Firestore.
///
/// Stored at: `spots/{spot_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotListing {
    /// Generated document ID
    pub spot_id: String,
    /// Owning seller's user ID
    pub seller_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Whole US dollars per hour
    pub price: u32,
    /// When the spot frees up: RFC3339 timestamp or "HH:MM"
    pub time_window: String,
    /// Whether the spot can currently be booked
    pub available: bool,
    #[serde(default)]
    pub state: ListingState,
    /// Set when a checkout reserved this spot (ISO 8601)
    #[serde(default)]
    pub reserved_at: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl SpotListing {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Price for `hours` of parking in cents.
    pub fn amount_cents(&self, hours: u32) -> i64 {
        i64::from(self.price) * 100 * i64::from(hours)
    }

    /// Whether a buyer may start a checkout for this listing.
    pub fn is_bookable(&self) -> bool {
        self.available && self.state == ListingState::Open
    }

    /// Absolute start of the time window, if it was given as a timestamp.
    ///
    /// Time-of-day windows recur daily and have no absolute instant.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        parse_rfc3339_utc(&self.time_window)
    }
}

/// Check that a time window is an RFC3339 timestamp or an "HH:MM" time of day.
pub fn is_valid_time_window(raw: &str) -> bool {
    parse_rfc3339_utc(raw).is_some() || NaiveTime::parse_from_str(raw, "%H:%M").is_ok()
}
