// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public vehicle lookup used by the sign-up form.

use crate::services::vehicles::{max_model_year, MIN_MODEL_YEAR};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/model-exists", get(model_exists))
}

/// Raw query string; parsed by hand so bad input gets the JSON error shape.
#[derive(Deserialize)]
struct RawModelQuery {
    make: Option<String>,
    model: Option<String>,
    year: Option<String>,
}

#[derive(Debug, Validate)]
struct ModelQuery {
    #[validate(length(min = 1))]
    make: String,
    #[validate(length(min = 1))]
    model: String,
    #[validate(range(min = MIN_MODEL_YEAR))]
    year: i32,
}

impl TryFrom<RawModelQuery> for ModelQuery {
    type Error = String;

    fn try_from(raw: RawModelQuery) -> Result<Self, Self::Error> {
        let year = raw
            .year
            .as_deref()
            .map(str::trim)
            .ok_or("year is required")?
            .parse::<i32>()
            .map_err(|_| "year must be an integer")?;

        let query = ModelQuery {
            make: raw.make.unwrap_or_default().trim().to_string(),
            model: raw.model.unwrap_or_default().trim().to_string(),
            year,
        };
        query.validate().map_err(|e| e.to_string())?;
        if query.year > max_model_year() {
            return Err(format!("year must be at most {}", max_model_year()));
        }
        Ok(query)
    }
}

#[derive(Serialize)]
struct ModelExistsResponse {
    ok: bool,
    make: String,
    model: String,
    year: i32,
    exists: bool,
}

#[derive(Serialize)]
struct ModelExistsError {
    ok: bool,
    error: String,
}

fn failure(status: StatusCode, error: String) -> Response {
    (status, Json(ModelExistsError { ok: false, error })).into_response()
}

async fn model_exists(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawModelQuery>,
) -> Response {
    let query = match ModelQuery::try_from(raw) {
        Ok(q) => q,
        Err(error) => return failure(StatusCode::BAD_REQUEST, error),
    };

    match state
        .vehicles
        .model_exists(&query.make, &query.model, query.year)
        .await
    {
        Ok(exists) => Json(ModelExistsResponse {
            ok: true,
            make: query.make,
            model: query.model,
            year: query.year,
            exists,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, make = %query.make, "Vehicle lookup failed");
            failure(StatusCode::BAD_GATEWAY, "vehicle catalog unavailable".to_string())
        }
    }
}
