// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Booking, SpotListing, UserProfile};
use crate::services::checkout::BeginCheckout;
use crate::services::listings::{ListingView, NewListing};
use crate::services::profiles::{ProfileFields, NOT_AVAILABLE};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Stripe's smallest USD charge, in cents.
const MIN_CHARGE_CENTS: i64 = 50;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/me/location", put(update_location))
        .route("/api/me/spots", get(my_spots))
        .route("/api/profile", post(create_profile))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/ratings", post(rate_user))
        .route("/api/spots", get(list_spots).post(create_spot))
        .route("/api/spots/map", get(spots_map))
        .route("/api/spots/{id}", get(get_spot))
        .route("/api/spots/{id}/availability", put(set_availability))
        .route("/api/checkout_sessions", post(create_checkout_session))
        .route("/api/bookings/{id}", get(get_booking))
        .route("/api/bookings/{id}/confirm", post(confirm_booking))
        .route("/api/bookings/{id}/cancel", post(cancel_booking))
        .route("/api/create-payment-intent", post(create_payment_intent))
}

// ─── Profiles ────────────────────────────────────────────────

/// Current user response. Missing fields come back as "N/A".
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub user_id: String,
    pub display_name: String,
    pub profile_exists: bool,
    pub first_name: String,
    pub last_name: String,
    pub color: String,
    pub make: String,
    pub model: String,
    pub plate: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rating: f64,
    pub rating_count: usize,
}

impl MeResponse {
    fn new(user: &AuthUser, profile: Option<UserProfile>) -> Self {
        let na = || NOT_AVAILABLE.to_string();
        match profile {
            Some(p) => Self {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
                profile_exists: true,
                rating: p.average_rating(),
                rating_count: p.ratings.len(),
                first_name: p.first_name,
                last_name: p.last_name,
                color: p.color,
                make: p.make,
                model: p.model,
                plate: p.plate,
                latitude: p.latitude,
                longitude: p.longitude,
            },
            None => Self {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
                profile_exists: false,
                first_name: na(),
                last_name: na(),
                color: na(),
                make: na(),
                model: na(),
                plate: na(),
                latitude: 0.0,
                longitude: 0.0,
                rating: 0.0,
                rating_count: 0,
            },
        }
    }
}

async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    let profile = state.profiles.profile(Some(&user.user_id)).await?;
    Ok(Json(MeResponse::new(&user, profile)))
}

#[derive(Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[validate(length(min = 1, max = 30))]
    pub color: String,
    #[validate(length(min = 1, max = 30))]
    pub make: String,
    #[validate(length(min = 1, max = 30))]
    pub model: String,
    #[validate(length(min = 1, max = 10))]
    pub plate: String,
}

#[derive(Serialize)]
pub struct CreateProfileResponse {
    /// False if a profile already existed (stored values were kept)
    pub created: bool,
}

async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<CreateProfileResponse>)> {
    body.validate()?;

    let created = state
        .profiles
        .create_profile_if_absent(
            Some(&user.user_id),
            ProfileFields {
                first_name: body.first_name,
                last_name: body.last_name,
                color: body.color,
                make: body.make,
                model: body.model,
                plate: body.plate,
            },
        )
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(CreateProfileResponse { created })))
}

#[derive(Deserialize, Validate)]
pub struct LocationRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<LocationRequest>,
) -> Result<StatusCode> {
    body.validate()?;

    if !state
        .profiles
        .update_location(Some(&user.user_id), body.lat, body.lng)
        .await?
    {
        return Err(AppError::NotFound("Create a profile first".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Another user as shown to a counterparty. The plate is masked.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PublicProfileResponse {
    pub user_id: String,
    pub first_name: String,
    pub color: String,
    pub make: String,
    pub model: String,
    pub plate: String,
    pub rating: f64,
    pub rating_count: usize,
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PublicProfileResponse>> {
    let profile = state
        .profiles
        .profile(Some(&id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    Ok(Json(PublicProfileResponse {
        plate: profile.masked_plate(),
        rating: profile.average_rating(),
        rating_count: profile.ratings.len(),
        user_id: profile.user_id,
        first_name: profile.first_name,
        color: profile.color,
        make: profile.make,
        model: profile.model,
    }))
}

#[derive(Deserialize, Validate)]
pub struct RatingRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating: u8,
}

/// Rate the other party of a completed booking.
async fn rate_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<RatingRequest>,
) -> Result<StatusCode> {
    body.validate()?;

    state
        .profiles
        .rate_counterparty(Some(&user.user_id), &id, body.rating)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Spots ───────────────────────────────────────────────────

async fn list_spots(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<Vec<ListingView>> {
    Json(state.listings.list_all_listings(Some(&user.user_id)).await)
}

async fn spots_map(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<geojson::FeatureCollection> {
    Json(state.listings.map_features(Some(&user.user_id)).await)
}

async fn my_spots(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<SpotListing>>> {
    let mut spots = state.listings.listings_for_seller(&user.user_id).await?;
    spots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(spots))
}

#[derive(Deserialize, Validate)]
pub struct CreateSpotRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    /// Whole US dollars per hour
    #[validate(range(min = 1, max = 1000))]
    pub price: u32,
    #[validate(length(min = 1, max = 40))]
    pub time_window: String,
}

async fn create_spot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateSpotRequest>,
) -> Result<(StatusCode, Json<SpotListing>)> {
    body.validate()?;

    let listing = state
        .listings
        .create_listing(
            Some(&user.user_id),
            NewListing {
                latitude: body.lat,
                longitude: body.lng,
                price: body.price,
                time_window: body.time_window,
            },
        )
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok((StatusCode::CREATED, Json(listing)))
}

async fn get_spot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SpotListing>> {
    state
        .listings
        .get_listing(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Spot {} not found", id)))
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

/// Seller toggles their own listing on or off the market.
async fn set_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<AvailabilityRequest>,
) -> Result<StatusCode> {
    state
        .listings
        .set_availability(&user.user_id, &id, body.available)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Checkout ────────────────────────────────────────────────

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionBody {
    #[validate(length(min = 1))]
    pub spot_id: String,
    #[validate(length(max = 100))]
    pub spot_name: Option<String>,
    /// Amount in cents the client showed the buyer
    pub amount: Option<i64>,
    #[validate(range(min = 1, max = 24))]
    pub hours: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CheckoutSessionResponse {
    pub url: String,
    pub booking_id: String,
}

async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CheckoutSessionBody>,
) -> Result<Json<CheckoutSessionResponse>> {
    body.validate()?;

    let started = state
        .checkout
        .begin(
            Some(&user.user_id),
            BeginCheckout {
                spot_id: body.spot_id,
                spot_name: body.spot_name,
                hours: body.hours,
                quoted_amount_cents: body.amount,
            },
        )
        .await?;

    Ok(Json(CheckoutSessionResponse {
        url: started.url,
        booking_id: started.booking_id,
    }))
}

/// Load a booking the caller is party to.
async fn booking_for(state: &AppState, user: &AuthUser, id: &str) -> Result<Booking> {
    let booking = state.checkout.get_booking(id).await?;
    if booking.buyer_id != user.user_id && booking.seller_id != user.user_id {
        return Err(AppError::Forbidden("Not your booking".to_string()));
    }
    Ok(booking)
}

fn require_buyer(booking: &Booking, user: &AuthUser) -> Result<()> {
    if booking.buyer_id != user.user_id {
        return Err(AppError::Forbidden(
            "Only the buyer can settle a booking".to_string(),
        ));
    }
    Ok(())
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    Ok(Json(booking_for(&state, &user, &id).await?))
}

/// Called from the success redirect.
async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    let booking = booking_for(&state, &user, &id).await?;
    require_buyer(&booking, &user)?;
    Ok(Json(state.checkout.confirm(&id).await?))
}

/// Called from the cancel redirect.
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    let booking = booking_for(&state, &user, &id).await?;
    require_buyer(&booking, &user)?;
    Ok(Json(state.checkout.cancel(&id).await?))
}

#[derive(Deserialize, Validate)]
pub struct PaymentIntentRequest {
    /// Amount in cents
    #[validate(range(min = MIN_CHARGE_CENTS, max = 99_999_999))]
    pub amount: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
}

/// Standalone card payment for the embedded form; not tied to a reservation.
async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>> {
    body.validate()?;

    let intent = state
        .payments
        .create_payment_intent(body.amount)
        .await
        .map_err(|e| AppError::Payment(e.to_string()))?;

    tracing::info!(user_id = %user.user_id, payment_intent = %intent.id, "Payment intent created");
    Ok(Json(PaymentIntentResponse {
        client_secret: intent.client_secret,
    }))
}
