// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage integration tests.
//!
//! Each scenario runs against the in-process store, and again against the
//! Firestore emulator when FIRESTORE_EMULATOR_HOST is set.
//! Start one with `gcloud emulators firestore start --host-port=localhost:8080`.

use spot_share::db::{new_document_id, AvailabilityOutcome, FirestoreDb, ReserveOutcome};
use spot_share::models::{Booking, CheckoutState, ListingState, SpotListing, UserProfile};

mod common;
use common::test_db;

const NOW: &str = "2026-03-01T12:00:00Z";

fn test_profile(user_id: &str) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        color: "Gray".to_string(),
        make: "Honda".to_string(),
        model: "Civic".to_string(),
        plate: "8ABC123".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        ratings: Vec::new(),
        created_at: NOW.to_string(),
        updated_at: NOW.to_string(),
    }
}

fn test_listing(seller_id: &str) -> SpotListing {
    SpotListing {
        spot_id: new_document_id().unwrap(),
        seller_id: seller_id.to_string(),
        latitude: 33.966787,
        longitude: -118.417631,
        price: 4,
        time_window: "14:00".to_string(),
        available: true,
        state: ListingState::Open,
        reserved_at: None,
        created_at: NOW.to_string(),
        updated_at: NOW.to_string(),
    }
}

fn test_booking(spot_id: &str) -> Booking {
    let booking_id = new_document_id().unwrap();
    Booking {
        session_id: format!("cs_test_{}", booking_id),
        booking_id,
        spot_id: spot_id.to_string(),
        buyer_id: "buyer".to_string(),
        seller_id: "seller".to_string(),
        amount_cents: 800,
        hours: 2,
        state: CheckoutState::AvailabilityReserved,
        buyer_rated: false,
        seller_rated: false,
        created_at: NOW.to_string(),
        updated_at: NOW.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

async fn profile_insert_is_idempotent(db: FirestoreDb) {
    let user_id = new_document_id().unwrap();

    assert!(db.get_profile(&user_id).await.unwrap().is_none());
    assert!(db.insert_profile(&test_profile(&user_id)).await.unwrap());

    // Second insert keeps the stored values
    let mut other = test_profile(&user_id);
    other.first_name = "Someone Else".to_string();
    assert!(!db.insert_profile(&other).await.unwrap());

    let stored = db.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(stored.first_name, "Test");
}

async fn profile_updates(db: FirestoreDb) {
    let user_id = new_document_id().unwrap();
    assert!(!db.update_location(&user_id, 1.0, 2.0, NOW).await.unwrap());
    assert!(!db.append_rating(&user_id, 5, NOW).await.unwrap());

    db.insert_profile(&test_profile(&user_id)).await.unwrap();
    assert!(db
        .update_location(&user_id, 33.96, -118.41, NOW)
        .await
        .unwrap());
    assert!(db.append_rating(&user_id, 5, NOW).await.unwrap());
    assert!(db.append_rating(&user_id, 2, NOW).await.unwrap());

    let stored = db.get_profile(&user_id).await.unwrap().unwrap();
    assert_eq!(stored.latitude, 33.96);
    assert_eq!(stored.longitude, -118.41);
    assert_eq!(stored.ratings, vec![5, 2]);
    assert_eq!(stored.average_rating(), 3.5);
    // Untouched fields survive partial updates
    assert_eq!(stored.plate, "8ABC123");
}

async fn reserve_is_compare_and_set(db: FirestoreDb) {
    let listing = test_listing("seller");
    db.insert_listing(&listing).await.unwrap();

    match db.reserve_listing(&listing.spot_id, NOW).await.unwrap() {
        ReserveOutcome::Reserved(reserved) => {
            assert!(!reserved.available);
            assert_eq!(reserved.reserved_at.as_deref(), Some(NOW));
        }
        other => panic!("expected Reserved, got {:?}", other),
    }
    assert!(matches!(
        db.reserve_listing(&listing.spot_id, NOW).await.unwrap(),
        ReserveOutcome::Unavailable
    ));
    assert!(matches!(
        db.reserve_listing("no-such-spot", NOW).await.unwrap(),
        ReserveOutcome::NotFound
    ));

    // The seller can't toggle a held listing back on
    assert_eq!(
        db.set_seller_availability(&listing.spot_id, "seller", true, NOW)
            .await
            .unwrap(),
        AvailabilityOutcome::Reserved
    );

    // Releasing clears the reservation marker
    assert!(db.release_listing(&listing.spot_id, NOW).await.unwrap());
    let stored = db.get_listing(&listing.spot_id).await.unwrap().unwrap();
    assert!(stored.available);
    assert!(stored.reserved_at.is_none());

    assert_eq!(
        db.set_seller_availability(&listing.spot_id, "someone-else", false, NOW)
            .await
            .unwrap(),
        AvailabilityOutcome::NotOwner
    );
    assert_eq!(
        db.set_seller_availability(&listing.spot_id, "seller", false, NOW)
            .await
            .unwrap(),
        AvailabilityOutcome::Updated
    );
    assert!(!db.get_listing(&listing.spot_id).await.unwrap().unwrap().available);
}

async fn sold_listing_is_never_available(db: FirestoreDb) {
    let listing = test_listing("seller");
    db.insert_listing(&listing).await.unwrap();

    assert!(db
        .set_listing_state(&listing.spot_id, ListingState::Sold, NOW)
        .await
        .unwrap());
    let stored = db.get_listing(&listing.spot_id).await.unwrap().unwrap();
    assert_eq!(stored.state, ListingState::Sold);
    assert!(!stored.available);
    assert!(matches!(
        db.reserve_listing(&listing.spot_id, NOW).await.unwrap(),
        ReserveOutcome::Unavailable
    ));
    assert_eq!(
        db.set_seller_availability(&listing.spot_id, "seller", true, NOW)
            .await
            .unwrap(),
        AvailabilityOutcome::Closed(ListingState::Sold)
    );
}

async fn seller_listings_are_filtered(db: FirestoreDb) {
    let seller = new_document_id().unwrap();
    let mine = test_listing(&seller);
    let theirs = test_listing("someone-else");
    db.insert_listing(&mine).await.unwrap();
    db.insert_listing(&theirs).await.unwrap();

    let found = db.listings_for_seller(&seller).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].spot_id, mine.spot_id);
}

async fn booking_transitions_once(db: FirestoreDb) {
    let booking = test_booking("spot");
    db.insert_booking(&booking).await.unwrap();

    let by_session = db
        .booking_by_session(&booking.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_session.booking_id, booking.booking_id);

    let confirmed = db
        .transition_booking(
            &booking.booking_id,
            CheckoutState::AvailabilityReserved,
            CheckoutState::Confirmed,
            NOW,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.state, CheckoutState::Confirmed);

    // A late release loses the race
    let late = db
        .transition_booking(
            &booking.booking_id,
            CheckoutState::AvailabilityReserved,
            CheckoutState::ReservationReleased,
            NOW,
        )
        .await
        .unwrap();
    assert!(late.is_none());

    let reserved = db
        .bookings_in_state(CheckoutState::AvailabilityReserved)
        .await
        .unwrap();
    assert!(reserved.iter().all(|b| b.booking_id != booking.booking_id));
}

async fn rating_is_spent_once(db: FirestoreDb) {
    let seller = new_document_id().unwrap();
    let buyer = new_document_id().unwrap();
    db.insert_profile(&test_profile(&seller)).await.unwrap();

    let mut booking = test_booking("spot");
    booking.buyer_id = buyer.clone();
    booking.seller_id = seller.clone();
    db.insert_booking(&booking).await.unwrap();

    // Not confirmed yet
    assert!(!db
        .rate_for_booking(&booking.booking_id, &buyer, &seller, 5, NOW)
        .await
        .unwrap());

    db.transition_booking(
        &booking.booking_id,
        CheckoutState::AvailabilityReserved,
        CheckoutState::Confirmed,
        NOW,
    )
    .await
    .unwrap();
    assert!(db
        .rate_for_booking(&booking.booking_id, &buyer, &seller, 5, NOW)
        .await
        .unwrap());
    assert!(!db
        .rate_for_booking(&booking.booking_id, &buyer, &seller, 1, NOW)
        .await
        .unwrap());
    assert!(!db
        .rate_for_booking(&booking.booking_id, "stranger", &seller, 1, NOW)
        .await
        .unwrap());

    let between = db.bookings_between(&seller, &buyer).await.unwrap();
    assert_eq!(between.len(), 1);
    assert!(between[0].buyer_rated);
    assert!(!between[0].seller_rated);
    let stored = db.get_profile(&seller).await.unwrap().unwrap();
    assert_eq!(stored.ratings, vec![5]);
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-PROCESS STORE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_profile_insert_is_idempotent_memory() {
    profile_insert_is_idempotent(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_profile_updates_memory() {
    profile_updates(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_reserve_is_compare_and_set_memory() {
    reserve_is_compare_and_set(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_sold_listing_is_never_available_memory() {
    sold_listing_is_never_available(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_seller_listings_are_filtered_memory() {
    seller_listings_are_filtered(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_booking_transitions_once_memory() {
    booking_transitions_once(FirestoreDb::new_in_memory()).await;
}

#[tokio::test]
async fn test_rating_is_spent_once_memory() {
    rating_is_spent_once(FirestoreDb::new_in_memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reserve_has_one_winner_memory() {
    let db = FirestoreDb::new_in_memory();
    let listing = test_listing("seller");
    db.insert_listing(&listing).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let db = db.clone();
            let spot_id = listing.spot_id.clone();
            tokio::spawn(async move { db.reserve_listing(&spot_id, NOW).await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), ReserveOutcome::Reserved(_)) {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// FIRESTORE EMULATOR
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_profile_insert_is_idempotent() {
    require_emulator!();
    profile_insert_is_idempotent(test_db().await).await;
}

#[tokio::test]
async fn test_profile_updates() {
    require_emulator!();
    profile_updates(test_db().await).await;
}

#[tokio::test]
async fn test_reserve_is_compare_and_set() {
    require_emulator!();
    reserve_is_compare_and_set(test_db().await).await;
}

#[tokio::test]
async fn test_sold_listing_is_never_available() {
    require_emulator!();
    sold_listing_is_never_available(test_db().await).await;
}

#[tokio::test]
async fn test_seller_listings_are_filtered() {
    require_emulator!();
    seller_listings_are_filtered(test_db().await).await;
}

#[tokio::test]
async fn test_booking_transitions_once() {
    require_emulator!();
    booking_transitions_once(test_db().await).await;
}

#[tokio::test]
async fn test_rating_is_spent_once() {
    require_emulator!();
    rating_is_spent_once(test_db().await).await;
}
