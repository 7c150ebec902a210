// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile storage, location, ratings)
//! - Spots (listings and their availability flag)
//! - Bookings (persisted checkout state)
//!
//! Conditional writes (reservation, rating append, booking transitions) run
//! inside Firestore transactions, which Firestore retries on contention.

use super::memory::MemoryStore;
use crate::db::collections;
use crate::error::AppError;
use crate::models::{Booking, CheckoutState, ListingState, SpotListing, UserProfile};
use firestore::errors::FirestoreError;
use firestore::paths;
use std::sync::Arc;

/// Result of a compare-and-set reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// This caller flipped the flag; carries the updated listing.
    Reserved(SpotListing),
    /// The listing was already reserved, sold or expired.
    Unavailable,
    NotFound,
}

/// Result of a seller's conditional availability toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityOutcome {
    Updated,
    NotFound,
    /// The caller does not own the listing.
    NotOwner,
    /// A checkout holds the listing.
    Reserved,
    /// Sold or expired.
    Closed(ListingState),
}

impl AvailabilityOutcome {
    /// Decide a toggle against the current document.
    pub(crate) fn check(listing: &SpotListing, seller_id: &str) -> Self {
        if listing.seller_id != seller_id {
            AvailabilityOutcome::NotOwner
        } else if listing.reserved_at.is_some() {
            AvailabilityOutcome::Reserved
        } else if listing.state != ListingState::Open {
            AvailabilityOutcome::Closed(listing.state)
        } else {
            AvailabilityOutcome::Updated
        }
    }
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Firestore(firestore::FirestoreDb),
    Memory(Arc<MemoryStore>),
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a database backed by process memory (offline mode and tests).
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::new())),
        }
    }

    /// Whether this instance talks to a real Firestore (or emulator).
    pub fn is_firestore(&self) -> bool {
        matches!(self.backend, Backend::Firestore(_))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user profile by user ID.
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.get_profile(user_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::USERS)
                .obj()
                .one(user_id)
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Create a profile if none exists for its user ID.
    ///
    /// Uses a create (not upsert) write, so a concurrent second creator
    /// loses. Returns `true` if this call created the document.
    pub async fn insert_profile(&self, profile: &UserProfile) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.insert_profile(profile)),
            Backend::Firestore(client) => {
                let result: Result<UserProfile, FirestoreError> = client
                    .fluent()
                    .insert()
                    .into(collections::USERS)
                    .document_id(&profile.user_id)
                    .object(profile)
                    .execute()
                    .await;

                match result {
                    Ok(_) => Ok(true),
                    Err(FirestoreError::DataConflictError(_)) => Ok(false),
                    Err(e) => Err(AppError::Database(e.to_string())),
                }
            }
        }
    }

    /// Overwrite the stored coordinates. Returns `false` if there is no profile.
    pub async fn update_location(
        &self,
        user_id: &str,
        lat: f64,
        lng: f64,
        now: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.update_location(user_id, lat, lng, now)),
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let user_id = user_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let current: Option<UserProfile> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::USERS)
                            .obj()
                            .one(&user_id)
                            .await?;

                        let Some(mut profile) = current else {
                            return Ok(false);
                        };
                        profile.latitude = lat;
                        profile.longitude = lng;
                        profile.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(UserProfile::{latitude, longitude, updated_at}))
                            .in_col(collections::USERS)
                            .document_id(&user_id)
                            .object(&profile)
                            .add_to_transaction(transaction)?;

                        Ok(true)
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Append one rating to a profile. Returns `false` if there is no profile.
    pub async fn append_rating(
        &self,
        user_id: &str,
        rating: u8,
        now: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.append_rating(user_id, rating, now)),
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let user_id = user_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let current: Option<UserProfile> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::USERS)
                            .obj()
                            .one(&user_id)
                            .await?;

                        let Some(mut profile) = current else {
                            return Ok(false);
                        };
                        profile.ratings.push(rating);
                        profile.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(UserProfile::{ratings, updated_at}))
                            .in_col(collections::USERS)
                            .document_id(&user_id)
                            .object(&profile)
                            .add_to_transaction(transaction)?;

                        Ok(true)
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    // ─── Spot Operations ─────────────────────────────────────────

    /// Store a new listing.
    pub async fn insert_listing(&self, listing: &SpotListing) -> Result<(), AppError> {
        match &self.backend {
            Backend::Memory(store) => {
                store.insert_listing(listing);
                Ok(())
            }
            Backend::Firestore(client) => {
                let _: SpotListing = client
                    .fluent()
                    .insert()
                    .into(collections::SPOTS)
                    .document_id(&listing.spot_id)
                    .object(listing)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Get a listing by ID.
    pub async fn get_listing(&self, spot_id: &str) -> Result<Option<SpotListing>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.get_listing(spot_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::SPOTS)
                .obj()
                .one(spot_id)
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Read every listing in the collection.
    pub async fn list_listings(&self) -> Result<Vec<SpotListing>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.list_listings()),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::SPOTS)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// All listings owned by one seller.
    pub async fn listings_for_seller(&self, seller_id: &str) -> Result<Vec<SpotListing>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.listings_for_seller(seller_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::SPOTS)
                .filter(|q| q.for_all([q.field("seller_id").eq(seller_id)]))
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Seller toggle: set the availability flag only if `seller_id` owns the
    /// listing, no checkout holds it, and it is still open.
    pub async fn set_seller_availability(
        &self,
        spot_id: &str,
        seller_id: &str,
        available: bool,
        now: &str,
    ) -> Result<AvailabilityOutcome, AppError> {
        match &self.backend {
            Backend::Memory(store) => {
                Ok(store.set_seller_availability(spot_id, seller_id, available, now))
            }
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let spot_id = spot_id.to_string();
                    let seller_id = seller_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let current: Option<SpotListing> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::SPOTS)
                            .obj()
                            .one(&spot_id)
                            .await?;

                        let Some(mut listing) = current else {
                            return Ok(AvailabilityOutcome::NotFound);
                        };
                        let outcome = AvailabilityOutcome::check(&listing, &seller_id);
                        if outcome != AvailabilityOutcome::Updated {
                            return Ok(outcome);
                        }
                        listing.available = available;
                        listing.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(SpotListing::{available, updated_at}))
                            .in_col(collections::SPOTS)
                            .document_id(&spot_id)
                            .object(&listing)
                            .add_to_transaction(transaction)?;

                        Ok(AvailabilityOutcome::Updated)
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Clear a checkout's reservation. Open listings go back on the market.
    ///
    /// Returns `false` if the listing does not exist.
    pub async fn release_listing(&self, spot_id: &str, now: &str) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.release_listing(spot_id, now)),
            Backend::Firestore(client) => {
                let Some(mut listing) = self.get_listing(spot_id).await? else {
                    return Ok(false);
                };
                listing.available = listing.state == ListingState::Open;
                listing.reserved_at = None;
                listing.updated_at = now.to_string();

                let _: SpotListing = client
                    .fluent()
                    .update()
                    .fields(paths!(SpotListing::{available, reserved_at, updated_at}))
                    .in_col(collections::SPOTS)
                    .document_id(spot_id)
                    .object(&listing)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(true)
            }
        }
    }

    /// Compare-and-set reservation: flip `available` to false only if the
    /// listing is still open and available.
    pub async fn reserve_listing(
        &self,
        spot_id: &str,
        now: &str,
    ) -> Result<ReserveOutcome, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.reserve(spot_id, now)),
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let spot_id = spot_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let current: Option<SpotListing> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::SPOTS)
                            .obj()
                            .one(&spot_id)
                            .await?;

                        let Some(mut listing) = current else {
                            return Ok(ReserveOutcome::NotFound);
                        };
                        if !listing.is_bookable() {
                            return Ok(ReserveOutcome::Unavailable);
                        }
                        listing.available = false;
                        listing.reserved_at = Some(now.clone());
                        listing.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(SpotListing::{available, reserved_at, updated_at}))
                            .in_col(collections::SPOTS)
                            .document_id(&spot_id)
                            .object(&listing)
                            .add_to_transaction(transaction)?;

                        Ok(ReserveOutcome::Reserved(listing))
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Move a listing to a new lifecycle state. Non-open states are never available.
    pub async fn set_listing_state(
        &self,
        spot_id: &str,
        state: ListingState,
        now: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.set_listing_state(spot_id, state, now)),
            Backend::Firestore(client) => {
                let Some(mut listing) = self.get_listing(spot_id).await? else {
                    return Ok(false);
                };
                listing.state = state;
                if state != ListingState::Open {
                    listing.available = false;
                }
                listing.reserved_at = None;
                listing.updated_at = now.to_string();

                let _: SpotListing = client
                    .fluent()
                    .update()
                    .fields(paths!(SpotListing::{state, available, reserved_at, updated_at}))
                    .in_col(collections::SPOTS)
                    .document_id(spot_id)
                    .object(&listing)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(true)
            }
        }
    }

    // ─── Booking Operations ──────────────────────────────────────

    /// Store a new booking.
    pub async fn insert_booking(&self, booking: &Booking) -> Result<(), AppError> {
        match &self.backend {
            Backend::Memory(store) => {
                store.insert_booking(booking);
                Ok(())
            }
            Backend::Firestore(client) => {
                let _: Booking = client
                    .fluent()
                    .insert()
                    .into(collections::BOOKINGS)
                    .document_id(&booking.booking_id)
                    .object(booking)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Get a booking by ID.
    pub async fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.get_booking(booking_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::BOOKINGS)
                .obj()
                .one(booking_id)
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Find the booking created for a payment processor session.
    pub async fn booking_by_session(&self, session_id: &str) -> Result<Option<Booking>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.booking_by_session(session_id)),
            Backend::Firestore(client) => {
                let found: Vec<Booking> = client
                    .fluent()
                    .select()
                    .from(collections::BOOKINGS)
                    .filter(|q| q.for_all([q.field("session_id").eq(session_id)]))
                    .limit(1)
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(found.into_iter().next())
            }
        }
    }

    /// All bookings currently in `state`.
    pub async fn bookings_in_state(&self, state: CheckoutState) -> Result<Vec<Booking>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.bookings_in_state(state)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::BOOKINGS)
                .filter(|q| q.for_all([q.field("state").eq(state.as_str())]))
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Bookings where the two users are buyer and seller, either way round.
    pub async fn bookings_between(&self, a: &str, b: &str) -> Result<Vec<Booking>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.bookings_between(a, b)),
            Backend::Firestore(client) => {
                let mut found = Vec::new();
                for (buyer, seller) in [(a, b), (b, a)] {
                    let part: Vec<Booking> = client
                        .fluent()
                        .select()
                        .from(collections::BOOKINGS)
                        .filter(|q| {
                            q.for_all([
                                q.field("buyer_id").eq(buyer),
                                q.field("seller_id").eq(seller),
                            ])
                        })
                        .obj()
                        .query()
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;
                    found.extend(part);
                }
                Ok(found)
            }
        }
    }

    /// Spend `rater`'s rating on a booking and append it to `rated`'s profile.
    ///
    /// Both writes commit together, and only if the booking is confirmed,
    /// is between the two users, and the rater's side has not rated yet.
    /// Returns `false` if any of that fails or the profile is missing.
    pub async fn rate_for_booking(
        &self,
        booking_id: &str,
        rater_id: &str,
        rated_id: &str,
        rating: u8,
        now: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(store) => {
                Ok(store.rate_for_booking(booking_id, rater_id, rated_id, rating, now))
            }
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let booking_id = booking_id.to_string();
                    let rater_id = rater_id.to_string();
                    let rated_id = rated_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let booking: Option<Booking> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::BOOKINGS)
                            .obj()
                            .one(&booking_id)
                            .await?;
                        let Some(mut booking) =
                            booking.filter(|b| b.can_rate(&rater_id, &rated_id))
                        else {
                            return Ok(false);
                        };

                        let profile: Option<UserProfile> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::USERS)
                            .obj()
                            .one(&rated_id)
                            .await?;
                        let Some(mut profile) = profile else {
                            return Ok(false);
                        };

                        booking.mark_rated(&rater_id);
                        booking.updated_at = now.clone();
                        profile.ratings.push(rating);
                        profile.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(Booking::{buyer_rated, seller_rated, updated_at}))
                            .in_col(collections::BOOKINGS)
                            .document_id(&booking_id)
                            .object(&booking)
                            .add_to_transaction(transaction)?;
                        db.fluent()
                            .update()
                            .fields(paths!(UserProfile::{ratings, updated_at}))
                            .in_col(collections::USERS)
                            .document_id(&rated_id)
                            .object(&profile)
                            .add_to_transaction(transaction)?;

                        Ok(true)
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Transition a booking from `from` to `to` atomically.
    ///
    /// Returns the updated booking, or `None` if the booking is missing or
    /// another caller already moved it out of `from`.
    pub async fn transition_booking(
        &self,
        booking_id: &str,
        from: CheckoutState,
        to: CheckoutState,
        now: &str,
    ) -> Result<Option<Booking>, AppError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.transition_booking(booking_id, from, to, now)),
            Backend::Firestore(client) => client
                .run_transaction(|db, transaction| {
                    let booking_id = booking_id.to_string();
                    let now = now.to_string();
                    Box::pin(async move {
                        let current: Option<Booking> = db
                            .fluent()
                            .select()
                            .by_id_in(collections::BOOKINGS)
                            .obj()
                            .one(&booking_id)
                            .await?;

                        let Some(mut booking) = current.filter(|b| b.state == from) else {
                            return Ok(None);
                        };
                        booking.state = to;
                        booking.updated_at = now;

                        db.fluent()
                            .update()
                            .fields(paths!(Booking::{state, updated_at}))
                            .in_col(collections::BOOKINGS)
                            .document_id(&booking_id)
                            .object(&booking)
                            .add_to_transaction(transaction)?;

                        Ok(Some(booking))
                    })
                })
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }
}
