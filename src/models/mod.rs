// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod booking;
pub mod listing;
pub mod profile;

pub use booking::{Booking, CheckoutState};
pub use listing::{ListingState, SpotListing};
pub use profile::UserProfile;
