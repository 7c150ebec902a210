// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Great-circle distance between coordinate pairs.

use geo::{Distance, HaversineMeasure, Point};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

const KM_PER_MILE: f64 = 1.609_344;

const HAVERSINE_MILES: HaversineMeasure = HaversineMeasure::new(EARTH_RADIUS_MILES);

/// A (latitude, longitude) pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True for the (0, 0) placeholder written into fresh profiles.
    pub fn is_origin(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    fn to_point(self) -> Point<f64> {
        // geo points are (x = longitude, y = latitude)
        Point::new(self.lng, self.lat)
    }
}

/// Haversine distance in miles.
pub fn distance_miles(a: Coordinates, b: Coordinates) -> f64 {
    HAVERSINE_MILES.distance(a.to_point(), b.to_point())
}

/// Haversine distance in kilometres.
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    distance_miles(a, b) * KM_PER_MILE
}
