// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Listing store: spot listings, the buyer-facing distance view, and the
//! availability flag that checkout reserves.

use super::profiles::{ProfileStore, NOT_AVAILABLE};
use crate::db::{new_document_id, AvailabilityOutcome, FirestoreDb, ReserveOutcome};
use crate::error::AppError;
use crate::geo_utils::{distance_miles, Coordinates};
use crate::models::listing::is_valid_time_window;
use crate::models::{ListingState, SpotListing, UserProfile};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt, TryStreamExt};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Max concurrent seller-profile reads while building the listing view.
const MAX_CONCURRENT_SELLER_READS: usize = 10;

/// Values for a new listing.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub latitude: f64,
    pub longitude: f64,
    /// Whole US dollars per hour
    pub price: u32,
    pub time_window: String,
}

/// A listing joined with its seller, as shown to a buyer.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ListingView {
    pub spot_id: String,
    pub seller_id: String,
    pub seller_name: String,
    /// "Color Make Model"
    pub seller_vehicle: String,
    pub seller_rating: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub price: u32,
    pub time_window: String,
    pub available: bool,
    pub state: ListingState,
    /// Miles from the viewer's stored location
    pub distance_miles: f64,
}

impl ListingView {
    pub fn new(listing: SpotListing, seller: Option<&UserProfile>, origin: Coordinates) -> Self {
        let distance_miles = distance_miles(origin, listing.coordinates());
        let (seller_name, seller_vehicle, seller_rating) = match seller {
            Some(p) => (
                p.first_name.clone(),
                format!("{} {} {}", p.color, p.make, p.model),
                p.average_rating(),
            ),
            None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string(), 0.0),
        };

        Self {
            spot_id: listing.spot_id,
            seller_id: listing.seller_id,
            seller_name,
            seller_vehicle,
            seller_rating,
            latitude: listing.latitude,
            longitude: listing.longitude,
            price: listing.price,
            time_window: listing.time_window,
            available: listing.available,
            state: listing.state,
            distance_miles,
        }
    }
}

/// Nearest first; ties broken by spot ID so the order is stable.
pub fn sort_by_distance(views: &mut [ListingView]) {
    views.sort_by(|a, b| {
        a.distance_miles
            .total_cmp(&b.distance_miles)
            .then_with(|| a.spot_id.cmp(&b.spot_id))
    });
}

/// Listing access over the `spots` collection.
#[derive(Clone)]
pub struct ListingStore {
    db: FirestoreDb,
    profiles: ProfileStore,
}

impl ListingStore {
    pub fn new(db: FirestoreDb, profiles: ProfileStore) -> Self {
        Self { db, profiles }
    }

    /// Publish a new, available listing owned by `identity`.
    ///
    /// Returns `None` without an identity.
    pub async fn create_listing(
        &self,
        identity: Option<&str>,
        new: NewListing,
    ) -> Result<Option<SpotListing>, AppError> {
        let Some(seller_id) = identity else {
            return Ok(None);
        };

        let time_window = new.time_window.trim().to_string();
        if !is_valid_time_window(&time_window) {
            return Err(AppError::BadRequest(
                "time_window must be an RFC3339 timestamp or HH:MM".to_string(),
            ));
        }

        let now = format_utc_rfc3339(Utc::now());
        let listing = SpotListing {
            spot_id: new_document_id()?,
            seller_id: seller_id.to_string(),
            latitude: new.latitude,
            longitude: new.longitude,
            price: new.price,
            time_window,
            available: true,
            state: ListingState::Open,
            reserved_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.db.insert_listing(&listing).await?;
        tracing::info!(
            spot_id = %listing.spot_id,
            seller_id,
            price = listing.price,
            "Listing created"
        );
        Ok(Some(listing))
    }

    pub async fn get_listing(&self, spot_id: &str) -> Result<Option<SpotListing>, AppError> {
        self.db.get_listing(spot_id).await
    }

    pub async fn listings_for_seller(&self, seller_id: &str) -> Result<Vec<SpotListing>, AppError> {
        self.db.listings_for_seller(seller_id).await
    }

    /// Every listing, joined with its seller, nearest to `viewer` first.
    ///
    /// Never fails: a read error is logged and yields an empty list.
    pub async fn list_all_listings(&self, viewer: Option<&str>) -> Vec<ListingView> {
        match self.try_list_all(viewer).await {
            Ok(views) => views,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read listings, returning empty view");
                Vec::new()
            }
        }
    }

    async fn try_list_all(&self, viewer: Option<&str>) -> Result<Vec<ListingView>, AppError> {
        let origin = self.profiles.coordinates(viewer).await?;
        let listings = self.db.list_listings().await?;

        let mut views: Vec<ListingView> = stream::iter(listings)
            .map(|listing| async move {
                let seller = self.profiles.profile(Some(&listing.seller_id)).await?;
                Ok::<_, AppError>(ListingView::new(listing, seller.as_ref(), origin))
            })
            .buffer_unordered(MAX_CONCURRENT_SELLER_READS)
            .try_collect()
            .await?;

        sort_by_distance(&mut views);
        Ok(views)
    }

    /// Bookable listings as GeoJSON point features for the map.
    pub async fn map_features(&self, viewer: Option<&str>) -> FeatureCollection {
        let features = self
            .list_all_listings(viewer)
            .await
            .into_iter()
            .filter(|v| v.available && v.state == ListingState::Open)
            .map(|v| {
                let mut properties = JsonObject::new();
                properties.insert("price".to_string(), v.price.into());
                properties.insert("time_window".to_string(), v.time_window.into());
                properties.insert("distance_miles".to_string(), v.distance_miles.into());
                properties.insert("seller_name".to_string(), v.seller_name.into());

                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Point(vec![v.longitude, v.latitude]))),
                    id: Some(Id::String(v.spot_id)),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    /// Seller takes their own listing on or off the market.
    ///
    /// The ownership, reservation and state checks run in the same atomic
    /// write as the flag, so a checkout that reserves concurrently is never
    /// overwritten. Sold and expired listings can't be changed.
    pub async fn set_availability(
        &self,
        seller_id: &str,
        spot_id: &str,
        available: bool,
    ) -> Result<(), AppError> {
        let now = format_utc_rfc3339(Utc::now());
        match self
            .db
            .set_seller_availability(spot_id, seller_id, available, &now)
            .await?
        {
            AvailabilityOutcome::Updated => {
                tracing::debug!(spot_id, available, "Availability updated");
                Ok(())
            }
            AvailabilityOutcome::NotFound => {
                Err(AppError::NotFound(format!("Spot {} not found", spot_id)))
            }
            AvailabilityOutcome::NotOwner => Err(AppError::Forbidden(
                "Only the seller can change availability".to_string(),
            )),
            AvailabilityOutcome::Reserved => Err(AppError::Conflict(
                "A checkout is in progress for this spot".to_string(),
            )),
            AvailabilityOutcome::Closed(state) => Err(AppError::Conflict(format!(
                "Spot {} is {:?} and cannot be changed",
                spot_id, state
            ))),
        }
    }

    /// Drop a checkout's hold on a listing.
    pub async fn release(&self, spot_id: &str) -> Result<(), AppError> {
        let now = format_utc_rfc3339(Utc::now());
        if !self.db.release_listing(spot_id, &now).await? {
            return Err(AppError::NotFound(format!("Spot {} not found", spot_id)));
        }
        Ok(())
    }

    /// Atomically take an open, available listing off the market.
    pub async fn reserve(&self, spot_id: &str) -> Result<ReserveOutcome, AppError> {
        let now = format_utc_rfc3339(Utc::now());
        let outcome = self.db.reserve_listing(spot_id, &now).await?;
        tracing::debug!(
            spot_id,
            won = matches!(outcome, ReserveOutcome::Reserved(_)),
            "Reserve attempt"
        );
        Ok(outcome)
    }

    pub async fn mark_sold(&self, spot_id: &str) -> Result<bool, AppError> {
        let now = format_utc_rfc3339(Utc::now());
        self.db
            .set_listing_state(spot_id, ListingState::Sold, &now)
            .await
    }

    /// Expire open listings whose timestamped window ended more than `ttl` ago.
    ///
    /// Listings held by an in-flight checkout are left for the checkout to
    /// settle. Returns the number of listings expired.
    pub async fn expire_listings(
        &self,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<usize, AppError> {
        let stamp = format_utc_rfc3339(now);
        let mut expired = 0;

        for listing in self.db.list_listings().await? {
            let due = listing.state == ListingState::Open
                && listing.reserved_at.is_none()
                && listing.window_start().is_some_and(|start| start + ttl < now);
            if !due {
                continue;
            }

            if self
                .db
                .set_listing_state(&listing.spot_id, ListingState::Expired, &stamp)
                .await?
            {
                tracing::info!(spot_id = %listing.spot_id, "Listing expired");
                expired += 1;
            }
        }

        Ok(expired)
    }
}
