// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Booking records that persist the checkout state machine.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Checkout state for a single booking attempt.
///
/// ```text
/// Idle -> SessionRequested -> AvailabilityReserved -> Confirmed
///                                                  \-> ReservationReleased
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum CheckoutState {
    Idle,
    SessionRequested,
    AvailabilityReserved,
    Confirmed,
    ReservationReleased,
}

impl CheckoutState {
    /// Stored string form, as produced by serde.
    pub fn as_str(self) -> &'static str {
        match self {
            CheckoutState::Idle => "idle",
            CheckoutState::SessionRequested => "session_requested",
            CheckoutState::AvailabilityReserved => "availability_reserved",
            CheckoutState::Confirmed => "confirmed",
            CheckoutState::ReservationReleased => "reservation_released",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckoutState::Idle | CheckoutState::Confirmed | CheckoutState::ReservationReleased
        )
    }
}

/// Stored booking in Firestore.
///
/// Stored at: `bookings/{booking_id}`. Only reserved bookings are persisted;
/// the Idle and SessionRequested states live in the orchestrator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub spot_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    /// Payment processor checkout session ID
    pub session_id: String,
    pub amount_cents: i64,
    pub hours: u32,
    pub state: CheckoutState,
    /// Buyer has rated the seller for this booking
    #[serde(default)]
    pub buyer_rated: bool,
    /// Seller has rated the buyer for this booking
    #[serde(default)]
    pub seller_rated: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Booking {
    /// Whether the two users are this booking's buyer and seller, either way round.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.buyer_id == a && self.seller_id == b) || (self.buyer_id == b && self.seller_id == a)
    }

    /// Whether `rater` may still rate `rated` for this booking.
    pub fn can_rate(&self, rater: &str, rated: &str) -> bool {
        if self.state != CheckoutState::Confirmed || !self.is_between(rater, rated) {
            return false;
        }
        if self.buyer_id == rater {
            !self.buyer_rated
        } else {
            !self.seller_rated
        }
    }

    /// Record that `rater` used their rating for this booking.
    pub fn mark_rated(&mut self, rater: &str) {
        if self.buyer_id == rater {
            self.buyer_rated = true;
        } else if self.seller_id == rater {
            self.seller_rated = true;
        }
    }
}
