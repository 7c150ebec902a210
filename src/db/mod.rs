// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (Firestore, with an in-process fallback).

pub mod firestore;
pub mod memory;

pub use self::firestore::{AvailabilityOutcome, FirestoreDb, ReserveOutcome};
pub use self::memory::MemoryStore;

use crate::error::AppError;
use ring::rand::{SecureRandom, SystemRandom};

/// Collection names as constants.
pub mod collections {
    /// User profiles (keyed by user_id)
    pub const USERS: &str = "users";
    /// Spot listings (keyed by generated spot_id)
    pub const SPOTS: &str = "spots";
    /// Checkout bookings (keyed by generated booking_id)
    pub const BOOKINGS: &str = "bookings";
}

/// Length in bytes of generated document IDs (hex-encoded to 20 chars).
const DOCUMENT_ID_BYTES: usize = 10;

/// Generate a random document ID for collections without a natural key.
pub fn new_document_id() -> Result<String, AppError> {
    let mut bytes = [0u8; DOCUMENT_ID_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    Ok(hex::encode(bytes))
}
