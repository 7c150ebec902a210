// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod checkout;
pub mod google_oidc;
pub mod identity;
pub mod listings;
pub mod payments;
pub mod profiles;
pub mod sweeper;
pub mod vehicles;

pub use checkout::{BeginCheckout, CheckoutOrchestrator, CheckoutStarted};
pub use google_oidc::{GoogleAccount, GoogleOidcVerifier, OidcError};
pub use identity::{Identity, IdentityResolver, SignedIn, Subscription};
pub use listings::{ListingStore, ListingView, NewListing};
pub use payments::{PaymentError, PaymentService, PaymentStatus, SessionStatus};
pub use profiles::{ProfileFields, ProfileStore};
pub use sweeper::{SweepReport, Sweeper};
pub use vehicles::VehicleCatalog;
