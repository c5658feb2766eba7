//! Inventory ledger + request fulfillment state machine.
//!
//! Every listing mutation funnels through [`InventoryLedger`], a bounded
//! compare-and-swap retry loop over the store's versioned listing record.
//! The [`FulfillmentService`] drives the claim lifecycle on top of it and
//! fires notification/audit side channels only after the atomic mutation
//! commits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fbridge_core::{
    is_expired, Audience, Claim, ClaimStatus, Listing, ListingStatus, NewListingInput,
};
use fbridge_store::{ClaimStore, ListingStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fbridge-fulfillment";

#[derive(Debug, Error, PartialEq)]
pub enum FulfillmentError {
    #[error("listing is not in a claimable state")]
    NotAvailable,
    #[error("requested {requested} exceeds remaining {remaining}")]
    InsufficientQuantity { requested: f64, remaining: f64 },
    #[error("claim violates an audience or time-window rule")]
    NotEligible,
    #[error("listing has already expired")]
    AlreadyExpired,
    #[error("invalid claim transition {from:?} -> {to:?}")]
    InvalidStateTransition { from: ClaimStatus, to: ClaimStatus },
    #[error("listing update lost too many concurrent-write races")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    /// Instant claims are only eligible when expiry is at most this close.
    pub instant_claim_horizon: Duration,
    /// Bounded optimistic-concurrency retries before surfacing `Conflict`.
    pub max_cas_retries: usize,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            instant_claim_horizon: Duration::hours(1),
            max_cas_retries: 4,
        }
    }
}

impl FulfillmentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            instant_claim_horizon: std::env::var("FBRIDGE_INSTANT_CLAIM_HORIZON_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .map(Duration::seconds)
                .unwrap_or(defaults.instant_claim_horizon),
            max_cas_retries: std::env::var("FBRIDGE_MAX_CAS_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cas_retries),
        }
    }
}

/// Atomic `(quantity, status)` mutations for one listing at a time. Listings
/// are independent; no cross-listing locking.
pub struct InventoryLedger<S> {
    store: Arc<S>,
    max_retries: usize,
}

impl<S: ListingStore> InventoryLedger<S> {
    pub fn new(store: Arc<S>, max_retries: usize) -> Self {
        Self { store, max_retries }
    }

    /// Deducts `qty` from the listing. The resulting status is `Reserved`
    /// when the quantity bottoms out, otherwise stays `Available`.
    pub async fn reserve(&self, listing_id: Uuid, qty: f64) -> Result<Listing, FulfillmentError> {
        self.mutate(listing_id, |listing| {
            let now = Utc::now();
            if is_expired(listing, now) {
                return Err(FulfillmentError::AlreadyExpired);
            }
            if listing.status != ListingStatus::Available {
                return Err(FulfillmentError::NotAvailable);
            }
            if qty > listing.quantity {
                return Err(FulfillmentError::InsufficientQuantity {
                    requested: qty,
                    remaining: listing.quantity,
                });
            }
            listing.quantity -= qty;
            listing.status = if listing.quantity <= 0.0 {
                ListingStatus::Reserved
            } else {
                ListingStatus::Available
            };
            Ok(())
        })
        .await
    }

    /// Returns `qty` to the listing after a rejection of an approved or
    /// completed claim, reopening it when stock comes back.
    pub async fn release(&self, listing_id: Uuid, qty: f64) -> Result<Listing, FulfillmentError> {
        self.mutate(listing_id, |listing| {
            listing.quantity += qty;
            if listing.quantity > 0.0 {
                listing.status = ListingStatus::Available;
            }
            Ok(())
        })
        .await
    }

    /// Marks a fully claimed listing as picked up. Idempotent when already
    /// picked up; a no-op while stock remains.
    pub async fn deplete(&self, listing_id: Uuid) -> Result<Listing, FulfillmentError> {
        self.mutate(listing_id, |listing| {
            if listing.status == ListingStatus::PickedUp {
                return Ok(());
            }
            if listing.quantity <= 0.0 {
                listing.status = ListingStatus::PickedUp;
            }
            Ok(())
        })
        .await
    }

    /// Claims the entire remaining quantity in one atomic step (the instant
    /// claim fast path). Returns the updated listing and the quantity taken.
    pub async fn claim_remaining(
        &self,
        listing_id: Uuid,
    ) -> Result<(Listing, f64), FulfillmentError> {
        let mut claimed = 0.0;
        let listing = self
            .mutate(listing_id, |listing| {
                let now = Utc::now();
                if is_expired(listing, now) {
                    return Err(FulfillmentError::AlreadyExpired);
                }
                if listing.status != ListingStatus::Available || listing.quantity <= 0.0 {
                    return Err(FulfillmentError::NotAvailable);
                }
                claimed = listing.quantity;
                listing.quantity = 0.0;
                listing.status = ListingStatus::Reserved;
                Ok(())
            })
            .await?;
        Ok((listing, claimed))
    }

    pub async fn archive(&self, listing_id: Uuid) -> Result<Listing, FulfillmentError> {
        self.mutate(listing_id, |listing| {
            listing.status = ListingStatus::Archived;
            Ok(())
        })
        .await
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, FulfillmentError> {
        let swept = self.store.expire_due_listings(now).await?;
        if swept > 0 {
            info!(swept, "marked stale available listings as expired");
        }
        Ok(swept)
    }

    async fn mutate<F>(&self, listing_id: Uuid, mut op: F) -> Result<Listing, FulfillmentError>
    where
        F: FnMut(&mut Listing) -> Result<(), FulfillmentError>,
    {
        for attempt in 0..=self.max_retries {
            let (mut listing, version) = self.store.get_listing_versioned(listing_id).await?;
            op(&mut listing)?;
            match self
                .store
                .compare_and_swap_listing(listing_id, version, listing)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(StoreError::VersionConflict { .. }) if attempt < self.max_retries => {
                    debug!(%listing_id, attempt, "listing write conflicted, retrying");
                    continue;
                }
                Err(StoreError::VersionConflict { .. }) => return Err(FulfillmentError::Conflict),
                Err(other) => return Err(other.into()),
            }
        }
        Err(FulfillmentError::Conflict)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    RequestReceived,
    RequestStatus,
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related_id: Uuid,
}

/// Outgoing push/socket delivery. Best effort; failures never roll back the
/// state change that triggered them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: &'static str,
    pub entity: &'static str,
    pub entity_id: Uuid,
    pub details: String,
}

/// External audit-log persistence, same best-effort contract as
/// [`NotificationSink`].
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Receives listing-created events; the forecast engine hangs off this port.
#[async_trait]
pub trait ListingObserver: Send + Sync {
    async fn listing_created(&self, listing: &Listing) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, _event: NotificationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _entry: AuditEntry) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopListingObserver;

#[async_trait]
impl ListingObserver for NoopListingObserver {
    async fn listing_created(&self, _listing: &Listing) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Aggregate impact numbers derived from granted claims.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactStats {
    pub total_food_saved: f64,
    pub meals_served: u64,
    pub co2_avoided_tonnes: f64,
}

/// Stateless claim orchestrator over an injected store handle.
pub struct FulfillmentService<S> {
    store: Arc<S>,
    ledger: InventoryLedger<S>,
    config: FulfillmentConfig,
    notifications: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    observer: Arc<dyn ListingObserver>,
}

impl<S: ListingStore + ClaimStore> FulfillmentService<S> {
    pub fn new(store: Arc<S>, config: FulfillmentConfig) -> Self {
        let ledger = InventoryLedger::new(store.clone(), config.max_cas_retries);
        Self {
            store,
            ledger,
            config,
            notifications: Arc::new(NoopNotificationSink),
            audit: Arc::new(NoopAuditSink),
            observer: Arc::new(NoopListingObserver),
        }
    }

    pub fn with_sinks(
        mut self,
        notifications: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        self.notifications = notifications;
        self.audit = audit;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ListingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    /// Posts a new listing and feeds the creation event into the forecast
    /// side of the engine.
    pub async fn create_listing(
        &self,
        input: NewListingInput,
    ) -> Result<Listing, FulfillmentError> {
        if input.quantity <= 0.0 {
            return Err(FulfillmentError::NotEligible);
        }
        let now = Utc::now();
        // A priced student/everyone listing is a discounted deal.
        let is_discounted = matches!(input.audience, Audience::Student | Audience::Everyone)
            && input.price > 0.0;
        let listing = Listing {
            id: Uuid::new_v4(),
            owner_id: input.owner_id,
            food_name: input.food_name,
            description: input.description,
            category: input.category,
            quantity: input.quantity,
            unit: input.unit,
            pickup_time: input.pickup_time,
            expiry_time: input.expiry_time,
            audience: input.audience,
            is_discounted,
            price: input.price,
            original_price: input.original_price,
            status: ListingStatus::Available,
            created_at: now,
        };
        self.store.insert_listing(listing.clone()).await?;
        info!(listing_id = %listing.id, owner_id = %listing.owner_id, "listing created");

        if let Err(err) = self.observer.listing_created(&listing).await {
            warn!(listing_id = %listing.id, error = %err, "listing observer failed");
        }
        self.audit_best_effort(AuditEntry {
            actor_id: listing.owner_id,
            action: "CREATE_LISTING",
            entity: "Listing",
            entity_id: listing.id,
            details: format!("Created listing: {}", listing.food_name),
        })
        .await;
        Ok(listing)
    }

    /// Negotiated path: a pending claim with no inventory mutation yet.
    pub async fn create_request(
        &self,
        listing_id: Uuid,
        claimant_id: Uuid,
        requested_quantity: f64,
        scheduled_pickup_time: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Claim, FulfillmentError> {
        if requested_quantity <= 0.0 {
            return Err(FulfillmentError::NotEligible);
        }
        let listing = self.store.get_listing(listing_id).await?;
        let now = Utc::now();
        if is_expired(&listing, now) {
            return Err(FulfillmentError::AlreadyExpired);
        }
        if listing.status != ListingStatus::Available {
            return Err(FulfillmentError::NotAvailable);
        }

        let claim = Claim {
            id: Uuid::new_v4(),
            listing_id,
            claimant_id,
            owner_id: listing.owner_id,
            requested_quantity,
            scheduled_pickup_time,
            notes,
            status: ClaimStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_claim(claim.clone()).await?;

        self.audit_best_effort(AuditEntry {
            actor_id: claimant_id,
            action: "CREATE_REQUEST",
            entity: "Claim",
            entity_id: claim.id,
            details: format!(
                "Requested {} of {}",
                requested_quantity, listing.food_name
            ),
        })
        .await;
        self.notify_best_effort(NotificationEvent {
            user_id: listing.owner_id,
            title: "New Food Request".into(),
            message: format!("A claimant has requested food from {}", listing.food_name),
            kind: NotificationKind::RequestReceived,
            related_id: claim.id,
        })
        .await;
        Ok(claim)
    }

    /// Reserves the requested quantity and moves the claim to `Approved`.
    /// No-op when already approved; on `InsufficientQuantity` the claim is
    /// left `Pending`.
    pub async fn approve(&self, claim_id: Uuid) -> Result<Claim, FulfillmentError> {
        let claim = self.store.get_claim(claim_id).await?;
        if claim.status == ClaimStatus::Approved {
            return Ok(claim);
        }
        if !claim.status.can_transition_to(ClaimStatus::Approved) {
            return Err(FulfillmentError::InvalidStateTransition {
                from: claim.status,
                to: ClaimStatus::Approved,
            });
        }

        self.ledger
            .reserve(claim.listing_id, claim.requested_quantity)
            .await?;
        match self
            .transition_claim(claim.clone(), ClaimStatus::Approved)
            .await
        {
            Ok(updated) => {
                self.announce_status(&updated, "approved").await;
                Ok(updated)
            }
            Err(err) => {
                // Compensate the reservation so quantity is never stranded.
                if let Err(release_err) = self
                    .ledger
                    .release(claim.listing_id, claim.requested_quantity)
                    .await
                {
                    warn!(
                        claim_id = %claim.id,
                        error = %release_err,
                        "failed to compensate reservation after claim write error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Rejects a claim, restoring inventory when the prior state had already
    /// deducted it. Rejecting a completed claim is the deliberate
    /// pickup-reversal path.
    pub async fn reject(&self, claim_id: Uuid) -> Result<Claim, FulfillmentError> {
        let claim = self.store.get_claim(claim_id).await?;
        if !claim.status.can_transition_to(ClaimStatus::Rejected) {
            return Err(FulfillmentError::InvalidStateTransition {
                from: claim.status,
                to: ClaimStatus::Rejected,
            });
        }

        if matches!(claim.status, ClaimStatus::Approved | ClaimStatus::Completed) {
            self.ledger
                .release(claim.listing_id, claim.requested_quantity)
                .await?;
        }
        let updated = self.transition_claim(claim, ClaimStatus::Rejected).await?;
        self.announce_status(&updated, "rejected").await;
        Ok(updated)
    }

    /// Completes an approved claim; depletes the listing once its quantity
    /// has bottomed out. Idempotent on already-completed claims.
    pub async fn complete(&self, claim_id: Uuid) -> Result<Claim, FulfillmentError> {
        let claim = self.store.get_claim(claim_id).await?;
        if claim.status == ClaimStatus::Completed {
            return Ok(claim);
        }
        if !claim.status.can_transition_to(ClaimStatus::Completed) {
            return Err(FulfillmentError::InvalidStateTransition {
                from: claim.status,
                to: ClaimStatus::Completed,
            });
        }

        let listing = self.store.get_listing(claim.listing_id).await?;
        if listing.quantity <= 0.0 {
            self.ledger.deplete(claim.listing_id).await?;
        }
        let updated = self.transition_claim(claim, ClaimStatus::Completed).await?;
        self.announce_status(&updated, "completed").await;
        Ok(updated)
    }

    /// Early-alert fast path: claims the entire remaining quantity of a
    /// listing expiring within the configured horizon. The claim is born
    /// `Approved`; no `Pending` state is ever observable.
    pub async fn instant_claim(
        &self,
        listing_id: Uuid,
        claimant_id: Uuid,
        notes: Option<String>,
    ) -> Result<Claim, FulfillmentError> {
        let listing = self.store.get_listing(listing_id).await?;
        let now = Utc::now();
        if is_expired(&listing, now) {
            return Err(FulfillmentError::AlreadyExpired);
        }
        // Expiry is immutable, so the horizon gate can sit outside the
        // atomic claim below.
        if listing.expiry_time > now + self.config.instant_claim_horizon {
            return Err(FulfillmentError::NotEligible);
        }

        let (listing, claimed) = self.ledger.claim_remaining(listing_id).await?;
        let claim = Claim {
            id: Uuid::new_v4(),
            listing_id,
            claimant_id,
            owner_id: listing.owner_id,
            requested_quantity: claimed,
            scheduled_pickup_time: listing.expiry_time,
            notes: notes.or_else(|| Some("Instant claim via surplus early alerts".into())),
            status: ClaimStatus::Approved,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.store.insert_claim(claim.clone()).await {
            if let Err(release_err) = self.ledger.release(listing_id, claimed).await {
                warn!(%listing_id, error = %release_err, "failed to compensate instant claim");
            }
            return Err(err.into());
        }

        self.audit_best_effort(AuditEntry {
            actor_id: claimant_id,
            action: "INSTANT_CLAIM",
            entity: "Claim",
            entity_id: claim.id,
            details: format!("Instant claimed {} of {}", claimed, listing.food_name),
        })
        .await;
        self.notify_best_effort(NotificationEvent {
            user_id: listing.owner_id,
            title: "Surplus Early Alert Claimed".into(),
            message: format!("Your expiring listing {} was instantly claimed", listing.food_name),
            kind: NotificationKind::RequestStatus,
            related_id: claim.id,
        })
        .await;
        Ok(claim)
    }

    /// Discounted/student fast path: audience-gated, reserves and
    /// auto-approves without ever being `Pending`.
    pub async fn discounted_claim(
        &self,
        listing_id: Uuid,
        claimant_id: Uuid,
        requested_quantity: f64,
        scheduled_pickup_time: Option<DateTime<Utc>>,
    ) -> Result<Claim, FulfillmentError> {
        if requested_quantity <= 0.0 {
            return Err(FulfillmentError::NotEligible);
        }
        let listing = self.store.get_listing(listing_id).await?;
        let permitted = matches!(listing.audience, Audience::Student | Audience::Everyone)
            || listing.is_discounted;
        if !permitted {
            return Err(FulfillmentError::NotEligible);
        }

        self.ledger.reserve(listing_id, requested_quantity).await?;
        let now = Utc::now();
        let claim = Claim {
            id: Uuid::new_v4(),
            listing_id,
            claimant_id,
            owner_id: listing.owner_id,
            requested_quantity,
            scheduled_pickup_time: scheduled_pickup_time.unwrap_or(listing.pickup_time),
            notes: Some("Student deal claim".into()),
            status: ClaimStatus::Approved,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.store.insert_claim(claim.clone()).await {
            if let Err(release_err) = self.ledger.release(listing_id, requested_quantity).await {
                warn!(%listing_id, error = %release_err, "failed to compensate discounted claim");
            }
            return Err(err.into());
        }

        self.audit_best_effort(AuditEntry {
            actor_id: claimant_id,
            action: "STUDENT_CLAIM",
            entity: "Claim",
            entity_id: claim.id,
            details: format!(
                "Student claimed {} of {}",
                requested_quantity, listing.food_name
            ),
        })
        .await;
        self.notify_best_effort(NotificationEvent {
            user_id: listing.owner_id,
            title: "Student Deal Claimed".into(),
            message: format!("Your student deal for {} was claimed", listing.food_name),
            kind: NotificationKind::RequestStatus,
            related_id: claim.id,
        })
        .await;
        Ok(claim)
    }

    pub async fn impact_stats(&self) -> Result<ImpactStats, FulfillmentError> {
        let total_food_saved = self.store.total_granted_quantity().await?;
        // 0.5 kg per meal, 2.5 kg CO2 per kg of food, reported in tonnes.
        let meals_served = (total_food_saved / 0.5).floor() as u64;
        let co2_avoided_tonnes = (total_food_saved * 2.5 / 1000.0 * 100.0).round() / 100.0;
        Ok(ImpactStats {
            total_food_saved,
            meals_served,
            co2_avoided_tonnes,
        })
    }

    /// Guarded write: the stored claim must still be in the state the caller
    /// observed, so two racing transitions cannot both apply.
    async fn transition_claim(
        &self,
        mut claim: Claim,
        next: ClaimStatus,
    ) -> Result<Claim, FulfillmentError> {
        let from = claim.status;
        claim.status = next;
        claim.updated_at = Utc::now();
        match self
            .store
            .compare_and_update_claim(claim.clone(), from)
            .await
        {
            Ok(()) => {}
            Err(StoreError::VersionConflict { .. }) => return Err(FulfillmentError::Conflict),
            Err(other) => return Err(other.into()),
        }
        self.audit_best_effort(AuditEntry {
            actor_id: claim.owner_id,
            action: "UPDATE_REQUEST_STATUS",
            entity: "Claim",
            entity_id: claim.id,
            details: format!("Updated claim status from {} to {}", from.as_str(), next.as_str()),
        })
        .await;
        Ok(claim)
    }

    async fn announce_status(&self, claim: &Claim, verb: &str) {
        self.notify_best_effort(NotificationEvent {
            user_id: claim.claimant_id,
            title: format!("Request {}", verb),
            message: format!("Your food request has been {verb}"),
            kind: NotificationKind::RequestStatus,
            related_id: claim.id,
        })
        .await;
    }

    async fn notify_best_effort(&self, event: NotificationEvent) {
        if let Err(err) = self.notifications.notify(event).await {
            warn!(error = %err, "notification delivery failed");
        }
    }

    async fn audit_best_effort(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(entry).await {
            warn!(error = %err, "audit logging failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fbridge_core::{Category, Unit};
    use fbridge_store::MemoryStore;

    fn svc() -> (Arc<MemoryStore>, FulfillmentService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = FulfillmentService::new(store.clone(), FulfillmentConfig::default());
        (store, service)
    }

    fn new_listing_input(owner: Uuid, quantity: f64, minutes_to_expiry: i64) -> NewListingInput {
        let now = Utc::now();
        NewListingInput {
            owner_id: owner,
            food_name: "Veg Biryani".into(),
            description: None,
            category: Category::Cooked,
            quantity,
            unit: Unit::Portions,
            pickup_time: now + Duration::minutes(30),
            expiry_time: now + Duration::minutes(minutes_to_expiry),
            audience: Audience::Open,
            price: 0.0,
            original_price: 0.0,
        }
    }

    #[tokio::test]
    async fn reserve_deducts_and_flips_to_reserved_at_zero() {
        let (_, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 5.0, 240))
            .await
            .unwrap();

        let updated = service.ledger().reserve(listing.id, 2.0).await.unwrap();
        assert_eq!(updated.quantity, 3.0);
        assert_eq!(updated.status, ListingStatus::Available);

        let updated = service.ledger().reserve(listing.id, 3.0).await.unwrap();
        assert_eq!(updated.quantity, 0.0);
        assert_eq!(updated.status, ListingStatus::Reserved);
    }

    #[tokio::test]
    async fn reserve_rejects_overdraw_and_expired() {
        let (_, service) = svc();
        let owner = Uuid::new_v4();
        let listing = service
            .create_listing(new_listing_input(owner, 4.0, 240))
            .await
            .unwrap();
        let err = service.ledger().reserve(listing.id, 9.0).await.unwrap_err();
        assert_eq!(
            err,
            FulfillmentError::InsufficientQuantity {
                requested: 9.0,
                remaining: 4.0
            }
        );

        let mut input = new_listing_input(owner, 4.0, 240);
        input.expiry_time = Utc::now() - Duration::minutes(1);
        let stale = service.create_listing(input).await.unwrap();
        assert_eq!(
            service.ledger().reserve(stale.id, 1.0).await.unwrap_err(),
            FulfillmentError::AlreadyExpired
        );
    }

    #[tokio::test]
    async fn approve_then_reject_restores_exact_quantity() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 5.0, 240))
            .await
            .unwrap();
        let claim = service
            .create_request(listing.id, Uuid::new_v4(), 5.0, Utc::now(), None)
            .await
            .unwrap();
        assert_eq!(claim.status, ClaimStatus::Pending);

        let approved = service.approve(claim.id).await.unwrap();
        assert_eq!(approved.status, ClaimStatus::Approved);
        let listing = store.get_listing(listing.id).await.unwrap();
        assert_eq!(listing.quantity, 0.0);
        assert_eq!(listing.status, ListingStatus::Reserved);

        let rejected = service.reject(claim.id).await.unwrap();
        assert_eq!(rejected.status, ClaimStatus::Rejected);
        let listing = store.get_listing(listing.id).await.unwrap();
        assert_eq!(listing.quantity, 5.0);
        assert_eq!(listing.status, ListingStatus::Available);
    }

    #[tokio::test]
    async fn approve_is_idempotent_and_insufficient_leaves_pending() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 3.0, 240))
            .await
            .unwrap();
        let claim = service
            .create_request(listing.id, Uuid::new_v4(), 2.0, Utc::now(), None)
            .await
            .unwrap();

        service.approve(claim.id).await.unwrap();
        service.approve(claim.id).await.unwrap();
        // A second approval must not deduct again.
        assert_eq!(store.get_listing(listing.id).await.unwrap().quantity, 1.0);

        let big = service
            .create_request(listing.id, Uuid::new_v4(), 2.0, Utc::now(), None)
            .await
            .unwrap();
        let err = service.approve(big.id).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientQuantity { .. }));
        assert_eq!(
            store.get_claim(big.id).await.unwrap().status,
            ClaimStatus::Pending
        );
    }

    #[tokio::test]
    async fn complete_depletes_at_zero_and_is_idempotent() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 2.0, 240))
            .await
            .unwrap();
        let claim = service
            .create_request(listing.id, Uuid::new_v4(), 2.0, Utc::now(), None)
            .await
            .unwrap();
        service.approve(claim.id).await.unwrap();

        let completed = service.complete(claim.id).await.unwrap();
        assert_eq!(completed.status, ClaimStatus::Completed);
        assert_eq!(
            store.get_listing(listing.id).await.unwrap().status,
            ListingStatus::PickedUp
        );

        // Second completion: no further side effects.
        let again = service.complete(claim.id).await.unwrap();
        assert_eq!(again.status, ClaimStatus::Completed);
        assert_eq!(store.get_listing(listing.id).await.unwrap().quantity, 0.0);
    }

    #[tokio::test]
    async fn reject_after_completed_reverses_the_pickup() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 2.0, 240))
            .await
            .unwrap();
        let claim = service
            .create_request(listing.id, Uuid::new_v4(), 2.0, Utc::now(), None)
            .await
            .unwrap();
        service.approve(claim.id).await.unwrap();
        service.complete(claim.id).await.unwrap();

        // Unusual but deliberate: a completed pickup can be reversed, which
        // must restore the deducted quantity.
        let rejected = service.reject(claim.id).await.unwrap();
        assert_eq!(rejected.status, ClaimStatus::Rejected);
        let listing = store.get_listing(listing.id).await.unwrap();
        assert_eq!(listing.quantity, 2.0);
        assert_eq!(listing.status, ListingStatus::Available);
    }

    #[tokio::test]
    async fn complete_requires_approved() {
        let (_, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 2.0, 240))
            .await
            .unwrap();
        let claim = service
            .create_request(listing.id, Uuid::new_v4(), 1.0, Utc::now(), None)
            .await
            .unwrap();
        let err = service.complete(claim.id).await.unwrap_err();
        assert_eq!(
            err,
            FulfillmentError::InvalidStateTransition {
                from: ClaimStatus::Pending,
                to: ClaimStatus::Completed,
            }
        );
    }

    #[tokio::test]
    async fn instant_claim_takes_everything_within_horizon() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 8.0, 40))
            .await
            .unwrap();

        let claim = service
            .instant_claim(listing.id, Uuid::new_v4(), None)
            .await
            .unwrap();
        assert_eq!(claim.status, ClaimStatus::Approved);
        assert_eq!(claim.requested_quantity, 8.0);

        let listing = store.get_listing(listing.id).await.unwrap();
        assert_eq!(listing.quantity, 0.0);
        assert_eq!(listing.status, ListingStatus::Reserved);
    }

    #[tokio::test]
    async fn instant_claim_gates_on_horizon_and_expiry() {
        let (_, service) = svc();
        let owner = Uuid::new_v4();
        let far_out = service
            .create_listing(new_listing_input(owner, 8.0, 180))
            .await
            .unwrap();
        assert_eq!(
            service
                .instant_claim(far_out.id, Uuid::new_v4(), None)
                .await
                .unwrap_err(),
            FulfillmentError::NotEligible
        );

        let mut input = new_listing_input(owner, 8.0, 40);
        input.expiry_time = Utc::now() - Duration::minutes(5);
        let gone = service.create_listing(input).await.unwrap();
        assert_eq!(
            service
                .instant_claim(gone.id, Uuid::new_v4(), None)
                .await
                .unwrap_err(),
            FulfillmentError::AlreadyExpired
        );
    }

    #[tokio::test]
    async fn discounted_claim_gates_on_audience() {
        let (store, service) = svc();
        let owner = Uuid::new_v4();

        let mut input = new_listing_input(owner, 6.0, 240);
        input.audience = Audience::Student;
        input.price = 40.0;
        input.original_price = 120.0;
        let deal = service.create_listing(input).await.unwrap();
        assert!(deal.is_discounted);

        let claim = service
            .discounted_claim(deal.id, Uuid::new_v4(), 2.0, None)
            .await
            .unwrap();
        assert_eq!(claim.status, ClaimStatus::Approved);
        assert_eq!(store.get_listing(deal.id).await.unwrap().quantity, 4.0);

        let charity_only = service
            .create_listing(new_listing_input(owner, 6.0, 240))
            .await
            .unwrap();
        assert_eq!(
            service
                .discounted_claim(charity_only.id, Uuid::new_v4(), 1.0, None)
                .await
                .unwrap_err(),
            FulfillmentError::NotEligible
        );
    }

    #[tokio::test]
    async fn archived_listings_accept_no_further_claims() {
        let (store, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 5.0, 240))
            .await
            .unwrap();

        let archived = service.ledger().archive(listing.id).await.unwrap();
        assert_eq!(archived.status, ListingStatus::Archived);
        assert_eq!(
            store.get_listing(listing.id).await.unwrap().status,
            ListingStatus::Archived
        );
        assert_eq!(
            service.ledger().reserve(listing.id, 1.0).await.unwrap_err(),
            FulfillmentError::NotAvailable
        );
    }

    #[tokio::test]
    async fn expiry_sweep_marks_stale_available_listings() {
        let (store, service) = svc();
        let owner = Uuid::new_v4();
        let mut input = new_listing_input(owner, 3.0, 240);
        input.expiry_time = Utc::now() - Duration::minutes(10);
        let stale = service.create_listing(input).await.unwrap();
        let fresh = service
            .create_listing(new_listing_input(owner, 3.0, 240))
            .await
            .unwrap();

        let swept = service.ledger().sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            store.get_listing(stale.id).await.unwrap().status,
            ListingStatus::Expired
        );
        assert_eq!(
            store.get_listing(fresh.id).await.unwrap().status,
            ListingStatus::Available
        );
    }

    #[tokio::test]
    async fn impact_stats_count_granted_quantity() {
        let (_, service) = svc();
        let listing = service
            .create_listing(new_listing_input(Uuid::new_v4(), 10.0, 240))
            .await
            .unwrap();
        let a = service
            .create_request(listing.id, Uuid::new_v4(), 6.0, Utc::now(), None)
            .await
            .unwrap();
        service.approve(a.id).await.unwrap();
        let b = service
            .create_request(listing.id, Uuid::new_v4(), 2.0, Utc::now(), None)
            .await
            .unwrap();
        // Pending claims do not count.
        let _ = b;

        let stats = service.impact_stats().await.unwrap();
        assert_eq!(stats.total_food_saved, 6.0);
        assert_eq!(stats.meals_served, 12);
        assert!((stats.co2_avoided_tonnes - 0.02).abs() < 1e-9);
    }
}
