// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile store: per-user profile documents with sentinel reads.
//!
//! Every operation takes the acting identity explicitly. A missing identity
//! or a missing document never errors; reads return sentinels and writes
//! are no-ops.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::geo_utils::Coordinates;
use crate::models::{CheckoutState, UserProfile};
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;

/// Placeholder returned for text fields when no profile is available.
pub const NOT_AVAILABLE: &str = "N/A";

/// Lowest and highest accepted rating.
pub const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

fn check_rating(value: u8) -> Result<(), AppError> {
    if RATING_RANGE.contains(&value) {
        return Ok(());
    }
    Err(AppError::BadRequest(format!(
        "rating must be between {} and {}",
        RATING_RANGE.start(),
        RATING_RANGE.end()
    )))
}

/// Sign-up form values for a new profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub first_name: String,
    pub last_name: String,
    pub color: String,
    pub make: String,
    pub model: String,
    pub plate: String,
}

/// Profile access over the `users` collection.
#[derive(Clone)]
pub struct ProfileStore {
    db: FirestoreDb,
}

impl ProfileStore {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Create the profile unless one exists. The first writer's values win.
    ///
    /// New profiles start at (0, 0) with no ratings. Returns `true` only if
    /// this call created the document.
    pub async fn create_profile_if_absent(
        &self,
        identity: Option<&str>,
        fields: ProfileFields,
    ) -> Result<bool, AppError> {
        let Some(user_id) = identity else {
            return Ok(false);
        };

        let now = format_utc_rfc3339(Utc::now());
        let profile = UserProfile {
            user_id: user_id.to_string(),
            first_name: fields.first_name.trim().to_string(),
            last_name: fields.last_name.trim().to_string(),
            color: fields.color.trim().to_string(),
            make: fields.make.trim().to_string(),
            model: fields.model.trim().to_string(),
            plate: fields.plate.trim().to_uppercase(),
            latitude: 0.0,
            longitude: 0.0,
            ratings: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };

        let created = self.db.insert_profile(&profile).await?;
        if created {
            tracing::info!(user_id, "Created user profile");
        } else {
            tracing::debug!(user_id, "Profile already exists, keeping stored values");
        }
        Ok(created)
    }

    /// Whole profile document, if any.
    pub async fn profile(&self, identity: Option<&str>) -> Result<Option<UserProfile>, AppError> {
        match identity {
            Some(user_id) => self.db.get_profile(user_id).await,
            None => Ok(None),
        }
    }

    pub async fn exists(&self, identity: Option<&str>) -> Result<bool, AppError> {
        Ok(self.profile(identity).await?.is_some())
    }

    async fn text_field(
        &self,
        identity: Option<&str>,
        field: impl FnOnce(UserProfile) -> String,
    ) -> Result<String, AppError> {
        Ok(self
            .profile(identity)
            .await?
            .map(field)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()))
    }

    pub async fn first_name(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.first_name).await
    }

    pub async fn last_name(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.last_name).await
    }

    pub async fn make(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.make).await
    }

    pub async fn model(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.model).await
    }

    pub async fn color(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.color).await
    }

    pub async fn plate(&self, identity: Option<&str>) -> Result<String, AppError> {
        self.text_field(identity, |p| p.plate).await
    }

    /// Stored location, or (0, 0).
    pub async fn coordinates(&self, identity: Option<&str>) -> Result<Coordinates, AppError> {
        Ok(self
            .profile(identity)
            .await?
            .map(|p| p.coordinates())
            .unwrap_or_default())
    }

    /// Mean rating, or 0.0.
    pub async fn rating(&self, identity: Option<&str>) -> Result<f64, AppError> {
        Ok(self
            .profile(identity)
            .await?
            .map(|p| p.average_rating())
            .unwrap_or(0.0))
    }

    /// Overwrite the stored location. Returns `false` when nothing was written.
    pub async fn update_location(
        &self,
        identity: Option<&str>,
        lat: f64,
        lng: f64,
    ) -> Result<bool, AppError> {
        let Some(user_id) = identity else {
            return Ok(false);
        };
        let now = format_utc_rfc3339(Utc::now());
        let updated = self.db.update_location(user_id, lat, lng, &now).await?;
        if !updated {
            tracing::debug!(user_id, "Location update for missing profile ignored");
        }
        Ok(updated)
    }

    /// Record one rating for `identity`.
    pub async fn append_rating(&self, identity: Option<&str>, value: u8) -> Result<bool, AppError> {
        check_rating(value)?;
        let Some(user_id) = identity else {
            return Ok(false);
        };
        let now = format_utc_rfc3339(Utc::now());
        self.db.append_rating(user_id, value, &now).await
    }

    /// Rate the other party of a confirmed booking.
    ///
    /// Each side of a booking gets one rating. The first unrated booking
    /// between the two users is used.
    pub async fn rate_counterparty(
        &self,
        rater: Option<&str>,
        rated: &str,
        value: u8,
    ) -> Result<(), AppError> {
        check_rating(value)?;
        let rater = rater.ok_or(AppError::Unauthorized)?;
        if rater == rated {
            return Err(AppError::BadRequest("You cannot rate yourself".to_string()));
        }
        if self.db.get_profile(rated).await?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", rated)));
        }

        let bookings = self.db.bookings_between(rater, rated).await?;
        if !bookings.iter().any(|b| b.state == CheckoutState::Confirmed) {
            return Err(AppError::Forbidden(
                "Only the other party of a completed booking can rate".to_string(),
            ));
        }

        let now = format_utc_rfc3339(Utc::now());
        for booking in bookings.iter().filter(|b| b.can_rate(rater, rated)) {
            if self
                .db
                .rate_for_booking(&booking.booking_id, rater, rated, value, &now)
                .await?
            {
                tracing::info!(
                    rater,
                    rated,
                    booking_id = %booking.booking_id,
                    rating = value,
                    "Rating recorded"
                );
                return Ok(());
            }
        }

        Err(AppError::Conflict(
            "You have already rated every booking with this user".to_string(),
        ))
    }
}
