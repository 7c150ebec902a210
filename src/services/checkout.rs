// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Checkout orchestration: hosted payment session plus spot reservation.
//!
//! ```text
//! Idle ──validate──> SessionRequested ──reserve (CAS)──> AvailabilityReserved
//!                      │ session fails                 │ paid      │ session dead
//!                      v                               v           v
//!                    Idle                          Confirmed  ReservationReleased
//! ```
//!
//! The session is created before the listing is touched, so a processor
//! failure never changes availability. Once reserved, the booking is
//! persisted and later settled by the redirect, the webhook, or the
//! stale-reservation sweep. Settlement is a compare-and-set on the booking
//! state, so whichever path arrives first wins and the rest are no-ops.
//!
//! A reservation is only released once its session can no longer be paid:
//! an open session is expired first, and a complete session still awaiting
//! an async payment stays reserved until its webhook arrives.

use super::listings::ListingStore;
use super::payments::{
    CheckoutSession, CheckoutSessionRequest, PaymentService, PaymentStatus, SessionStatus,
};
use crate::db::{new_document_id, FirestoreDb, ReserveOutcome};
use crate::error::AppError;
use crate::models::{Booking, CheckoutState};
use crate::time_utils::{format_utc_rfc3339, parse_rfc3339_utc};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Longest single booking.
pub const MAX_BOOKING_HOURS: u32 = 24;

/// A buyer's request to start paying for a spot.
#[derive(Debug, Clone)]
pub struct BeginCheckout {
    pub spot_id: String,
    /// Name shown on the hosted checkout page
    pub spot_name: Option<String>,
    pub hours: u32,
    /// Amount the client displayed, in cents; must match the server's price
    pub quoted_amount_cents: Option<i64>,
}

/// A reserved spot waiting for payment.
#[derive(Debug, Clone)]
pub struct CheckoutStarted {
    pub booking_id: String,
    /// Hosted checkout page to redirect the buyer to
    pub url: String,
}

/// What a processor session means for its reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOutcome {
    Paid,
    /// Expired; can never be paid
    Dead,
    /// Buyer may still pay on the hosted page
    Open,
    /// Complete but unpaid, or a status we don't know
    Pending,
}

impl SessionOutcome {
    fn of(session: &CheckoutSession) -> Self {
        match (session.payment_status, session.status) {
            (PaymentStatus::Paid | PaymentStatus::NoPaymentRequired, _) => SessionOutcome::Paid,
            (_, SessionStatus::Expired) => SessionOutcome::Dead,
            (_, SessionStatus::Open) => SessionOutcome::Open,
            _ => SessionOutcome::Pending,
        }
    }
}

/// Drives bookings through the checkout state machine.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    db: FirestoreDb,
    listings: ListingStore,
    payments: Arc<PaymentService>,
    frontend_url: String,
}

impl CheckoutOrchestrator {
    pub fn new(
        db: FirestoreDb,
        listings: ListingStore,
        payments: Arc<PaymentService>,
        frontend_url: String,
    ) -> Self {
        Self {
            db,
            listings,
            payments,
            frontend_url,
        }
    }

    /// Validate, open a payment session, and reserve the spot.
    pub async fn begin(
        &self,
        buyer: Option<&str>,
        req: BeginCheckout,
    ) -> Result<CheckoutStarted, AppError> {
        // Idle: every rejection here leaves nothing behind.
        let buyer = buyer.ok_or(AppError::Unauthorized)?;

        if req.hours == 0 || req.hours > MAX_BOOKING_HOURS {
            return Err(AppError::BadRequest(format!(
                "hours must be between 1 and {}",
                MAX_BOOKING_HOURS
            )));
        }

        let listing = self
            .listings
            .get_listing(&req.spot_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Spot {} not found", req.spot_id)))?;

        if listing.seller_id == buyer {
            return Err(AppError::BadRequest(
                "You cannot book your own spot".to_string(),
            ));
        }
        if !listing.is_bookable() {
            return Err(AppError::Conflict(format!(
                "Spot {} is no longer available",
                listing.spot_id
            )));
        }

        let amount_cents = listing.amount_cents(req.hours);
        if let Some(quoted) = req.quoted_amount_cents {
            if quoted != amount_cents {
                return Err(AppError::BadRequest(format!(
                    "Quoted amount {} does not match price {}",
                    quoted, amount_cents
                )));
            }
        }

        // SessionRequested
        let booking_id = new_document_id()?;
        let spot_name = req
            .spot_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Parking spot".to_string());
        let session_req = CheckoutSessionRequest {
            amount_cents,
            description: format!(
                "{} hour{} of parking at {}",
                req.hours,
                if req.hours > 1 { "s" } else { "" },
                spot_name
            ),
            name: spot_name,
            success_url: format!(
                "{}/payment-success?amount={}&booking_id={}",
                self.frontend_url,
                amount_cents / 100,
                urlencoding::encode(&booking_id)
            ),
            cancel_url: format!(
                "{}/buy/choose-spot?canceled=true&booking_id={}",
                self.frontend_url,
                urlencoding::encode(&booking_id)
            ),
            client_reference_id: booking_id.clone(),
        };

        let session = self
            .payments
            .create_checkout_session(&session_req)
            .await
            .map_err(|e| AppError::Payment(e.to_string()))?;

        let Some(url) = session.url.clone() else {
            self.abandon_session(&session.id).await;
            return Err(AppError::Payment(
                "Checkout session has no redirect URL".to_string(),
            ));
        };

        // AvailabilityReserved
        match self.listings.reserve(&listing.spot_id).await {
            Ok(ReserveOutcome::Reserved(_)) => {}
            Ok(ReserveOutcome::Unavailable) | Ok(ReserveOutcome::NotFound) => {
                tracing::info!(spot_id = %listing.spot_id, buyer, "Lost reservation race");
                self.abandon_session(&session.id).await;
                return Err(AppError::Conflict(format!(
                    "Spot {} is no longer available",
                    listing.spot_id
                )));
            }
            Err(e) => {
                self.abandon_session(&session.id).await;
                return Err(e);
            }
        }

        let now = format_utc_rfc3339(Utc::now());
        let booking = Booking {
            booking_id: booking_id.clone(),
            spot_id: listing.spot_id.clone(),
            buyer_id: buyer.to_string(),
            seller_id: listing.seller_id.clone(),
            session_id: session.id.clone(),
            amount_cents,
            hours: req.hours,
            state: CheckoutState::AvailabilityReserved,
            buyer_rated: false,
            seller_rated: false,
            created_at: now.clone(),
            updated_at: now,
        };

        if let Err(e) = self.db.insert_booking(&booking).await {
            tracing::error!(
                error = %e,
                spot_id = %listing.spot_id,
                "Failed to persist booking, releasing spot"
            );
            self.release_listing(&listing.spot_id).await;
            self.abandon_session(&session.id).await;
            return Err(e);
        }

        tracing::info!(
            booking_id = %booking_id,
            spot_id = %listing.spot_id,
            buyer,
            amount_cents,
            "Checkout started"
        );

        Ok(CheckoutStarted { booking_id, url })
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Booking, AppError> {
        self.db
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", booking_id)))
    }

    /// Settle a booking from the processor's view of its session.
    ///
    /// Paid sessions confirm. Open sessions are expired and released.
    /// Sessions still settling an async payment leave the booking reserved.
    /// Settled bookings are returned unchanged.
    pub async fn confirm(&self, booking_id: &str) -> Result<Booking, AppError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.state != CheckoutState::AvailabilityReserved {
            return Ok(booking);
        }

        let session = self
            .payments
            .retrieve_checkout_session(&booking.session_id)
            .await?;

        match SessionOutcome::of(&session) {
            SessionOutcome::Paid => self.settle_paid(booking).await,
            SessionOutcome::Dead => self.settle_released(booking, "session expired").await,
            SessionOutcome::Open => {
                self.expire_and_release(booking, "payment not completed").await
            }
            SessionOutcome::Pending => {
                tracing::info!(
                    booking_id = %booking.booking_id,
                    "Payment still settling, keeping reservation"
                );
                Ok(booking)
            }
        }
    }

    /// Confirm the booking created for a processor session (webhook path).
    pub async fn confirm_session(&self, session_id: &str) -> Result<Option<Booking>, AppError> {
        match self.db.booking_by_session(session_id).await? {
            Some(booking) => self.confirm(&booking.booking_id).await.map(Some),
            None => {
                tracing::warn!(session_id, "No booking for checkout session");
                Ok(None)
            }
        }
    }

    /// Release the reservation for a processor session (webhook path).
    pub async fn release_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<Option<Booking>, AppError> {
        match self.db.booking_by_session(session_id).await? {
            Some(booking) if booking.state == CheckoutState::AvailabilityReserved => {
                self.settle_released(booking, reason).await.map(Some)
            }
            Some(booking) => Ok(Some(booking)),
            None => Ok(None),
        }
    }

    /// Buyer backed out of the hosted page.
    pub async fn cancel(&self, booking_id: &str) -> Result<Booking, AppError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.state != CheckoutState::AvailabilityReserved {
            return Ok(booking);
        }
        self.expire_and_release(booking, "cancelled by buyer").await
    }

    /// Release reservations that have waited longer than `max_age` for a
    /// payment outcome. Returns how many were released.
    ///
    /// A booking that turns out to be paid is confirmed instead.
    pub async fn release_stale(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<usize, AppError> {
        let mut released = 0;

        for booking in self
            .db
            .bookings_in_state(CheckoutState::AvailabilityReserved)
            .await?
        {
            let stale = parse_rfc3339_utc(&booking.created_at)
                .map(|created| created + max_age < now)
                .unwrap_or(true);
            if !stale {
                continue;
            }

            let session = match self
                .payments
                .retrieve_checkout_session(&booking.session_id)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        booking_id = %booking.booking_id,
                        "Could not check stale session, retrying next sweep"
                    );
                    continue;
                }
            };

            let settled = match SessionOutcome::of(&session) {
                SessionOutcome::Paid => self.settle_paid(booking).await?,
                SessionOutcome::Dead => self.settle_released(booking, "session expired").await?,
                SessionOutcome::Open => {
                    match self.expire_and_release(booking, "reservation timed out").await {
                        Ok(settled) => settled,
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                session_id = %session.id,
                                "Could not settle stale session, retrying next sweep"
                            );
                            continue;
                        }
                    }
                }
                SessionOutcome::Pending => continue,
            };
            if settled.state == CheckoutState::ReservationReleased {
                released += 1;
            }
        }

        Ok(released)
    }

    async fn settle_paid(&self, booking: Booking) -> Result<Booking, AppError> {
        let now = format_utc_rfc3339(Utc::now());
        let Some(confirmed) = self
            .db
            .transition_booking(
                &booking.booking_id,
                CheckoutState::AvailabilityReserved,
                CheckoutState::Confirmed,
                &now,
            )
            .await?
        else {
            // Someone else settled it first.
            return self.get_booking(&booking.booking_id).await;
        };

        self.listings.mark_sold(&confirmed.spot_id).await?;
        tracing::info!(
            booking_id = %confirmed.booking_id,
            spot_id = %confirmed.spot_id,
            "Booking confirmed"
        );
        Ok(confirmed)
    }

    async fn settle_released(&self, booking: Booking, reason: &str) -> Result<Booking, AppError> {
        let now = format_utc_rfc3339(Utc::now());
        let Some(released) = self
            .db
            .transition_booking(
                &booking.booking_id,
                CheckoutState::AvailabilityReserved,
                CheckoutState::ReservationReleased,
                &now,
            )
            .await?
        else {
            return self.get_booking(&booking.booking_id).await;
        };

        self.listings.release(&released.spot_id).await?;
        tracing::info!(
            booking_id = %released.booking_id,
            spot_id = %released.spot_id,
            reason,
            "Reservation released"
        );
        Ok(released)
    }

    /// Expire an open session, then release its reservation.
    ///
    /// If Stripe refuses the expiry (the buyer may have just paid), the
    /// session is re-read and the booking settled on what it now says.
    async fn expire_and_release(
        &self,
        booking: Booking,
        reason: &str,
    ) -> Result<Booking, AppError> {
        let Err(e) = self
            .payments
            .expire_checkout_session(&booking.session_id)
            .await
        else {
            return self.settle_released(booking, reason).await;
        };

        tracing::warn!(
            error = %e,
            booking_id = %booking.booking_id,
            "Could not expire checkout session, re-reading"
        );
        let session = self
            .payments
            .retrieve_checkout_session(&booking.session_id)
            .await?;

        match SessionOutcome::of(&session) {
            SessionOutcome::Paid => self.settle_paid(booking).await,
            SessionOutcome::Dead => self.settle_released(booking, reason).await,
            SessionOutcome::Open | SessionOutcome::Pending => Ok(booking),
        }
    }

    /// Best-effort: expire a session we no longer intend to honour.
    async fn abandon_session(&self, session_id: &str) {
        if let Err(e) = self.payments.expire_checkout_session(session_id).await {
            tracing::warn!(error = %e, session_id, "Failed to expire checkout session");
        }
    }

    /// Best-effort compensation when a reservation can't be recorded.
    async fn release_listing(&self, spot_id: &str) {
        if let Err(e) = self.listings.release(spot_id).await {
            tracing::error!(error = %e, spot_id, "Failed to release reserved spot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingState;
    use crate::services::listings::NewListing;
    use crate::services::profiles::ProfileStore;

    struct Fixture {
        checkout: CheckoutOrchestrator,
        listings: ListingStore,
        payments: Arc<PaymentService>,
        spot_id: String,
    }

    async fn fixture() -> Fixture {
        let db = FirestoreDb::new_in_memory();
        let listings = ListingStore::new(db.clone(), ProfileStore::new(db.clone()));
        let payments = Arc::new(PaymentService::new_mock());
        let checkout = CheckoutOrchestrator::new(
            db,
            listings.clone(),
            payments.clone(),
            "http://localhost:3000".to_string(),
        );
        let spot = listings
            .create_listing(
                Some("seller"),
                NewListing {
                    latitude: 33.966787,
                    longitude: -118.417631,
                    price: 4,
                    time_window: "14:00".to_string(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        Fixture {
            checkout,
            listings,
            payments,
            spot_id: spot.spot_id,
        }
    }

    fn request(spot_id: &str, hours: u32) -> BeginCheckout {
        BeginCheckout {
            spot_id: spot_id.to_string(),
            spot_name: Some("Lot B".to_string()),
            hours,
            quoted_amount_cents: None,
        }
    }

    #[tokio::test]
    async fn test_paid_checkout_marks_spot_sold() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 2))
            .await
            .unwrap();
        assert!(started.url.starts_with("https://checkout.stripe.com/"));

        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert!(!listing.available);

        let booking = f.checkout.confirm(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::Confirmed);
        assert_eq!(booking.amount_cents, 800);

        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert_eq!(listing.state, ListingState::Sold);
        assert!(!listing.available);

        // Idempotent
        let again = f.checkout.confirm(&started.booking_id).await.unwrap();
        assert_eq!(again.state, CheckoutState::Confirmed);
    }

    #[tokio::test]
    async fn test_unpaid_open_session_is_expired_then_released() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();
        let session_id = f
            .checkout
            .get_booking(&started.booking_id)
            .await
            .unwrap()
            .session_id;

        f.payments.set_mock_payment_status(PaymentStatus::Unpaid);
        let booking = f.checkout.confirm(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::ReservationReleased);
        assert!(f.payments.mock_session_expired(&session_id));

        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert!(listing.available);
        assert_eq!(listing.state, ListingState::Open);

        // The expired session can no longer be paid
        f.payments.set_mock_payment_status(PaymentStatus::Paid);
        let again = f.checkout.confirm_session(&session_id).await.unwrap().unwrap();
        assert_eq!(again.state, CheckoutState::ReservationReleased);
    }

    #[tokio::test]
    async fn test_async_payment_keeps_reservation_until_settled() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();

        f.payments.set_mock_payment_status(PaymentStatus::Unpaid);
        f.payments.set_mock_session_status(SessionStatus::Complete);
        let booking = f.checkout.confirm(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::AvailabilityReserved);
        assert!(!f.listings.get_listing(&f.spot_id).await.unwrap().unwrap().available);

        // Cancel can't expire a complete session either
        let booking = f.checkout.cancel(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::AvailabilityReserved);

        f.payments.set_mock_payment_status(PaymentStatus::Paid);
        let booking = f.checkout.confirm(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::Confirmed);
        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert_eq!(listing.state, ListingState::Sold);
    }

    #[tokio::test]
    async fn test_cancel_after_payment_confirms() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();

        // Mock reports Paid by default, so the expiry is refused
        let booking = f.checkout.cancel(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::Confirmed);
        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert_eq!(listing.state, ListingState::Sold);
    }

    #[tokio::test]
    async fn test_session_failure_leaves_spot_untouched() {
        let f = fixture().await;
        f.payments.set_mock_fail_sessions(true);

        let result = f.checkout.begin(Some("buyer"), request(&f.spot_id, 1)).await;
        assert!(matches!(result, Err(AppError::Payment(_))));

        let listing = f.listings.get_listing(&f.spot_id).await.unwrap().unwrap();
        assert!(listing.available);
    }

    #[tokio::test]
    async fn test_rejections_in_idle() {
        let f = fixture().await;

        assert!(matches!(
            f.checkout.begin(None, request(&f.spot_id, 1)).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            f.checkout.begin(Some("seller"), request(&f.spot_id, 1)).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.checkout.begin(Some("buyer"), request(&f.spot_id, 0)).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.checkout.begin(Some("buyer"), request("missing", 1)).await,
            Err(AppError::NotFound(_))
        ));

        let mut wrong_quote = request(&f.spot_id, 2);
        wrong_quote.quoted_amount_cents = Some(100);
        assert!(matches!(
            f.checkout.begin(Some("buyer"), wrong_quote).await,
            Err(AppError::BadRequest(_))
        ));

        assert!(f.listings.get_listing(&f.spot_id).await.unwrap().unwrap().available);
    }

    #[tokio::test]
    async fn test_second_buyer_conflicts() {
        let f = fixture().await;
        f.checkout
            .begin(Some("buyer-1"), request(&f.spot_id, 1))
            .await
            .unwrap();

        assert!(matches!(
            f.checkout.begin(Some("buyer-2"), request(&f.spot_id, 1)).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_releases_and_expires_session() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();
        let session_id = f
            .checkout
            .get_booking(&started.booking_id)
            .await
            .unwrap()
            .session_id;

        f.payments.set_mock_payment_status(PaymentStatus::Unpaid);
        let booking = f.checkout.cancel(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::ReservationReleased);
        assert!(f.payments.mock_session_expired(&session_id));
        assert!(f.listings.get_listing(&f.spot_id).await.unwrap().unwrap().available);
    }

    #[tokio::test]
    async fn test_release_stale_only_old_unpaid() {
        let f = fixture().await;
        f.checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();
        f.payments.set_mock_payment_status(PaymentStatus::Unpaid);

        let timeout = chrono::Duration::minutes(30);
        let released = f.checkout.release_stale(Utc::now(), timeout).await.unwrap();
        assert_eq!(released, 0);

        let later = Utc::now() + chrono::Duration::minutes(31);
        let released = f.checkout.release_stale(later, timeout).await.unwrap();
        assert_eq!(released, 1);
        assert!(f.listings.get_listing(&f.spot_id).await.unwrap().unwrap().available);
    }

    #[tokio::test]
    async fn test_release_stale_waits_out_processor_outage() {
        let f = fixture().await;
        let started = f
            .checkout
            .begin(Some("buyer"), request(&f.spot_id, 1))
            .await
            .unwrap();
        f.payments.set_mock_fail_retrieve(true);

        let timeout = chrono::Duration::minutes(30);
        let later = Utc::now() + chrono::Duration::minutes(31);
        assert_eq!(f.checkout.release_stale(later, timeout).await.unwrap(), 0);

        let booking = f.checkout.get_booking(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::AvailabilityReserved);
        assert!(!f.listings.get_listing(&f.spot_id).await.unwrap().unwrap().available);

        // Stripe is back and the buyer had paid
        f.payments.set_mock_fail_retrieve(false);
        assert_eq!(f.checkout.release_stale(later, timeout).await.unwrap(), 0);
        let booking = f.checkout.get_booking(&started.booking_id).await.unwrap();
        assert_eq!(booking.state, CheckoutState::Confirmed);
    }
}
