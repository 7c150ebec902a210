// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User profile model for storage and API.

use crate::geo_utils::Coordinates;
use serde::{Deserialize, Serialize};

/// User profile stored in Firestore.
///
/// Stored at: `users/{user_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identity provider subject (also used as document ID)
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    /// Vehicle description, shown to the counterparty at handoff
    pub color: String,
    pub make: String,
    pub model: String,
    /// License plate, upper-cased
    pub plate: String,
    /// Last reported location
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Individual ratings (1-5) left by counterparties
    #[serde(default)]
    pub ratings: Vec<u8>,
    /// When the profile was created (ISO 8601)
    pub created_at: String,
    /// Last write (ISO 8601)
    #[serde(default)]
    pub updated_at: String,
}

impl UserProfile {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Mean of all ratings, or 0.0 when nobody has rated this user yet.
    pub fn average_rating(&self) -> f64 {
        if self.ratings.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.ratings.iter().map(|&r| u32::from(r)).sum();
        f64::from(sum) / self.ratings.len() as f64
    }

    /// Plate with all but the last three characters hidden.
    pub fn masked_plate(&self) -> String {
        let chars: Vec<char> = self.plate.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(3)..].iter().collect();
        format!("***{}", tail)
    }
}
