// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vehicle make/model lookup against the NHTSA vPIC catalog.
//!
//! Used by the sign-up form to check that a typed model exists for the
//! make and year. Non-empty model lists are cached per (make, year) for a
//! day, in a cache of bounded size.

use crate::error::AppError;
use chrono::Datelike;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const VPIC_BASE_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_CACHE_ENTRIES: usize = 2048;

/// Earliest model year the catalog accepts.
pub const MIN_MODEL_YEAR: i32 = 1886;

/// Latest model year the catalog accepts: next year's models go on sale
/// this year.
pub fn max_model_year() -> i32 {
    chrono::Utc::now().year() + 1
}

struct CachedModels {
    fetched_at: Instant,
    models: Arc<Vec<String>>,
}

enum Source {
    Nhtsa {
        http: reqwest::Client,
        base_url: String,
    },
    /// Fixed make -> models table (offline mode and tests)
    Static(HashMap<String, Vec<String>>),
}

/// Vehicle model catalog.
pub struct VehicleCatalog {
    source: Source,
    /// (lower-cased make, year) -> lower-cased model names
    cache: DashMap<(String, i32), CachedModels>,
}

impl VehicleCatalog {
    pub fn new() -> Self {
        Self {
            source: Source::Nhtsa {
                http: reqwest::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .unwrap_or_default(),
                base_url: VPIC_BASE_URL.to_string(),
            },
            cache: DashMap::new(),
        }
    }

    /// Offline catalog that knows only the given models, for any year.
    pub fn new_static<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let table = entries
            .into_iter()
            .map(|(make, models)| {
                (
                    make.to_lowercase(),
                    models.iter().map(|m| m.to_lowercase()).collect(),
                )
            })
            .collect();

        Self {
            source: Source::Static(table),
            cache: DashMap::new(),
        }
    }

    /// Whether `model` is a known model of `make` in `year`.
    ///
    /// Names are compared case-insensitively after trimming. Years outside
    /// the catalog's range have no models.
    pub async fn model_exists(&self, make: &str, model: &str, year: i32) -> Result<bool, AppError> {
        if !(MIN_MODEL_YEAR..=max_model_year()).contains(&year) {
            return Ok(false);
        }
        let wanted = model.trim().to_lowercase();
        let models = self.models_for(make.trim(), year).await?;
        Ok(models.iter().any(|m| *m == wanted))
    }

    async fn models_for(&self, make: &str, year: i32) -> Result<Arc<Vec<String>>, AppError> {
        let key = (make.to_lowercase(), year);
        if let Some(hit) = self.cache.get(&key) {
            if hit.fetched_at.elapsed() < CACHE_TTL {
                return Ok(hit.models.clone());
            }
        }

        let models = match &self.source {
            Source::Static(table) => table.get(&key.0).cloned().unwrap_or_default(),
            Source::Nhtsa { http, base_url } => {
                let url = format!(
                    "{}/GetModelsForMakeYear/make/{}/modelyear/{}",
                    base_url,
                    urlencoding::encode(make),
                    year
                );

                let response = http
                    .get(&url)
                    .query(&[("format", "json")])
                    .send()
                    .await
                    .map_err(|e| AppError::Upstream(format!("vPIC request failed: {}", e)))?;

                if !response.status().is_success() {
                    return Err(AppError::Upstream(format!(
                        "vPIC returned HTTP {}",
                        response.status()
                    )));
                }

                let body: VpicResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Upstream(format!("vPIC JSON parse error: {}", e)))?;

                tracing::debug!(make, year, count = body.results.len(), "Fetched vPIC models");
                body.results
                    .into_iter()
                    .map(|r| r.model_name.trim().to_lowercase())
                    .collect()
            }
        };

        let models = Arc::new(models);
        if !models.is_empty() {
            self.remember(key, models.clone());
        }
        Ok(models)
    }

    fn remember(&self, key: (String, i32), models: Arc<Vec<String>>) {
        if self.cache.len() >= MAX_CACHE_ENTRIES {
            self.cache.retain(|_, v| v.fetched_at.elapsed() < CACHE_TTL);
        }
        if self.cache.len() >= MAX_CACHE_ENTRIES && !self.cache.contains_key(&key) {
            tracing::debug!(entries = self.cache.len(), "Vehicle cache full, not caching");
            return;
        }
        self.cache.insert(
            key,
            CachedModels {
                fetched_at: Instant::now(),
                models,
            },
        );
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

impl Default for VehicleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct VpicResponse {
    #[serde(rename = "Results", default)]
    results: Vec<VpicModel>,
}

#[derive(Debug, Deserialize)]
struct VpicModel {
    #[serde(rename = "Model_Name")]
    model_name: String,
}
