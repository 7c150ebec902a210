// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document store.
//!
//! Mirrors the Firestore collections with one `DashMap` per collection.
//! Used for offline development (`IN_MEMORY_DB=1`) and tests. Conditional
//! writes hold the shard lock for the entry between the check and the write,
//! which gives them the same atomicity as a Firestore transaction.

use super::firestore::{AvailabilityOutcome, ReserveOutcome};
use crate::models::{Booking, CheckoutState, ListingState, SpotListing, UserProfile};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Document store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, UserProfile>,
    spots: DashMap<String, SpotListing>,
    bookings: DashMap<String, Booking>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Users ───────────────────────────────────────────────────

    pub fn get_profile(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).map(|p| p.clone())
    }

    /// Insert unless a profile already exists. Returns whether it was created.
    pub fn insert_profile(&self, profile: &UserProfile) -> bool {
        match self.users.entry(profile.user_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                true
            }
        }
    }

    pub fn update_location(&self, user_id: &str, lat: f64, lng: f64, now: &str) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut profile) => {
                profile.latitude = lat;
                profile.longitude = lng;
                profile.updated_at = now.to_string();
                true
            }
            None => false,
        }
    }

    pub fn append_rating(&self, user_id: &str, rating: u8, now: &str) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut profile) => {
                profile.ratings.push(rating);
                profile.updated_at = now.to_string();
                true
            }
            None => false,
        }
    }

    // ─── Spots ───────────────────────────────────────────────────

    pub fn insert_listing(&self, listing: &SpotListing) {
        self.spots.insert(listing.spot_id.clone(), listing.clone());
    }

    pub fn get_listing(&self, spot_id: &str) -> Option<SpotListing> {
        self.spots.get(spot_id).map(|l| l.clone())
    }

    pub fn list_listings(&self) -> Vec<SpotListing> {
        self.spots.iter().map(|l| l.value().clone()).collect()
    }

    pub fn listings_for_seller(&self, seller_id: &str) -> Vec<SpotListing> {
        self.spots
            .iter()
            .filter(|l| l.seller_id == seller_id)
            .map(|l| l.value().clone())
            .collect()
    }

    pub fn set_seller_availability(
        &self,
        spot_id: &str,
        seller_id: &str,
        available: bool,
        now: &str,
    ) -> AvailabilityOutcome {
        let Some(mut listing) = self.spots.get_mut(spot_id) else {
            return AvailabilityOutcome::NotFound;
        };
        let outcome = AvailabilityOutcome::check(&listing, seller_id);
        if outcome == AvailabilityOutcome::Updated {
            listing.available = available;
            listing.updated_at = now.to_string();
        }
        outcome
    }

    pub fn release_listing(&self, spot_id: &str, now: &str) -> bool {
        match self.spots.get_mut(spot_id) {
            Some(mut listing) => {
                listing.available = listing.state == ListingState::Open;
                listing.reserved_at = None;
                listing.updated_at = now.to_string();
                true
            }
            None => false,
        }
    }

    pub fn reserve(&self, spot_id: &str, now: &str) -> ReserveOutcome {
        match self.spots.get_mut(spot_id) {
            Some(mut listing) => {
                if !listing.is_bookable() {
                    return ReserveOutcome::Unavailable;
                }
                listing.available = false;
                listing.reserved_at = Some(now.to_string());
                listing.updated_at = now.to_string();
                ReserveOutcome::Reserved(listing.clone())
            }
            None => ReserveOutcome::NotFound,
        }
    }

    pub fn set_listing_state(&self, spot_id: &str, state: ListingState, now: &str) -> bool {
        match self.spots.get_mut(spot_id) {
            Some(mut listing) => {
                listing.state = state;
                if state != ListingState::Open {
                    listing.available = false;
                }
                listing.reserved_at = None;
                listing.updated_at = now.to_string();
                true
            }
            None => false,
        }
    }

    // ─── Bookings ────────────────────────────────────────────────

    pub fn insert_booking(&self, booking: &Booking) {
        self.bookings.insert(booking.booking_id.clone(), booking.clone());
    }

    pub fn get_booking(&self, booking_id: &str) -> Option<Booking> {
        self.bookings.get(booking_id).map(|b| b.clone())
    }

    pub fn booking_by_session(&self, session_id: &str) -> Option<Booking> {
        self.bookings
            .iter()
            .find(|b| b.session_id == session_id)
            .map(|b| b.value().clone())
    }

    pub fn bookings_in_state(&self, state: CheckoutState) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|b| b.state == state)
            .map(|b| b.value().clone())
            .collect()
    }

    pub fn bookings_between(&self, a: &str, b: &str) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|booking| booking.is_between(a, b))
            .map(|booking| booking.value().clone())
            .collect()
    }

    /// Mark the rater's side of a booking and append the rating. The booking
    /// guard is held across both writes; lock order is bookings then users.
    pub fn rate_for_booking(
        &self,
        booking_id: &str,
        rater_id: &str,
        rated_id: &str,
        rating: u8,
        now: &str,
    ) -> bool {
        let Some(mut booking) = self.bookings.get_mut(booking_id) else {
            return false;
        };
        if !booking.can_rate(rater_id, rated_id) {
            return false;
        }
        let Some(mut profile) = self.users.get_mut(rated_id) else {
            return false;
        };

        booking.mark_rated(rater_id);
        booking.updated_at = now.to_string();
        profile.ratings.push(rating);
        profile.updated_at = now.to_string();
        true
    }

    /// Move a booking from `from` to `to`. Returns the updated booking only
    /// if it was still in `from`.
    pub fn transition_booking(
        &self,
        booking_id: &str,
        from: CheckoutState,
        to: CheckoutState,
        now: &str,
    ) -> Option<Booking> {
        let mut booking = self.bookings.get_mut(booking_id)?;
        if booking.state != from {
            return None;
        }
        booking.state = to;
        booking.updated_at = now.to_string();
        Some(booking.clone())
    }
}
