//! Data-store traits + in-memory implementation for the surplus engine.
//!
//! The listing store exposes a versioned compare-and-swap primitive so that
//! every `(quantity, status)` mutation is a single atomic read-modify-write.
//! Trend, claim, observation and forecast stores are owner-scoped and need no
//! cross-entity coordination.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fbridge_core::{
    Claim, ClaimStatus, Forecast, ForecastStatus, Listing, ListingStatus, Observation, TrendKey,
    TrendSlot,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "fbridge-store";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("concurrent write detected for {id}")]
    VersionConflict { id: Uuid },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Listing persistence with optimistic concurrency. `compare_and_swap` is the
/// only write path for existing listings; callers retry on `VersionConflict`.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn insert_listing(&self, listing: Listing) -> Result<(), StoreError>;
    async fn get_listing(&self, id: Uuid) -> Result<Listing, StoreError>;
    async fn get_listing_versioned(&self, id: Uuid) -> Result<(Listing, u64), StoreError>;
    async fn compare_and_swap_listing(
        &self,
        id: Uuid,
        expected_version: u64,
        updated: Listing,
    ) -> Result<Listing, StoreError>;
    async fn listings_for_owner(&self, owner_id: Uuid) -> Result<Vec<Listing>, StoreError>;
    /// Batch-marks `Available` listings past their expiry as `Expired`.
    /// Readers never trust a stale status, but the sweep keeps stored state
    /// from drifting too far behind the clock.
    async fn expire_due_listings(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn insert_claim(&self, claim: Claim) -> Result<(), StoreError>;
    async fn get_claim(&self, id: Uuid) -> Result<Claim, StoreError>;
    /// Writes `claim` only while the stored status still equals
    /// `expected_status`, so a check-then-act transition cannot clobber a
    /// concurrent one. The claim analogue of `compare_and_swap_listing`.
    async fn compare_and_update_claim(
        &self,
        claim: Claim,
        expected_status: ClaimStatus,
    ) -> Result<(), StoreError>;
    async fn claims_for_owner(&self, owner_id: Uuid) -> Result<Vec<Claim>, StoreError>;
    async fn claims_for_claimant(&self, claimant_id: Uuid) -> Result<Vec<Claim>, StoreError>;
    /// Sum of requested quantity over approved and completed claims; feeds
    /// the impact statistics.
    async fn total_granted_quantity(&self) -> Result<f64, StoreError>;
}

#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Atomic upsert: the slot for `key` is created empty if absent, then
    /// `apply` runs against it under the store's write lock.
    async fn upsert_trend(
        &self,
        key: TrendKey,
        apply: Box<dyn for<'a> FnOnce(&'a mut TrendSlot) + Send>,
    ) -> Result<TrendSlot, StoreError>;
    /// Slots for one owner/day restricted to the given hours, returned in the
    /// order the hours are listed (the generator's tie-break depends on it).
    async fn trends_for_owner_day_hours(
        &self,
        owner_id: Uuid,
        day_of_week: u8,
        hours: &[u8],
    ) -> Result<Vec<TrendSlot>, StoreError>;
    /// All slots for one owner, ordered by (day, hour).
    async fn trends_for_owner(&self, owner_id: Uuid) -> Result<Vec<TrendSlot>, StoreError>;
    async fn clear_trends_for_owner(&self, owner_id: Uuid) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn append_observation(&self, observation: Observation) -> Result<(), StoreError>;
    async fn observations_for_owner(&self, owner_id: Uuid) -> Result<Vec<Observation>, StoreError>;
}

#[async_trait]
pub trait ForecastStore: Send + Sync {
    async fn insert_forecast(&self, forecast: Forecast) -> Result<(), StoreError>;
    async fn get_forecast(&self, id: Uuid) -> Result<Forecast, StoreError>;
    /// The earliest open (`Forecasted`) forecast for the owner whose time
    /// window contains `at`. Demo forecasts are skipped unless
    /// `include_demo` is set.
    async fn open_forecast_in_window(
        &self,
        owner_id: Uuid,
        at: DateTime<Utc>,
        include_demo: bool,
    ) -> Result<Option<Forecast>, StoreError>;
    async fn mark_forecast_fulfilled(
        &self,
        id: Uuid,
        actual_quantity: f64,
    ) -> Result<Forecast, StoreError>;
    /// Closes every open forecast whose window has fully passed.
    async fn mark_forecasts_missed_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
    async fn has_demo_forecast_for_owner(&self, owner_id: Uuid) -> Result<bool, StoreError>;
    async fn delete_demo_forecasts_for_owner(&self, owner_id: Uuid) -> Result<usize, StoreError>;
    /// `(fulfilled, missed)` counts across all owners.
    async fn forecast_status_counts(&self) -> Result<(u64, u64), StoreError>;
}

#[derive(Debug, Clone)]
struct VersionedListing {
    listing: Listing,
    version: u64,
}

/// In-memory store backing tests and the demo CLI. A database-backed
/// implementation would map `compare_and_swap_listing` onto a conditional
/// update.
#[derive(Default)]
pub struct MemoryStore {
    listings: RwLock<HashMap<Uuid, VersionedListing>>,
    claims: RwLock<HashMap<Uuid, Claim>>,
    trends: RwLock<HashMap<TrendKey, TrendSlot>>,
    observations: RwLock<Vec<Observation>>,
    forecasts: RwLock<HashMap<Uuid, Forecast>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn insert_listing(&self, listing: Listing) -> Result<(), StoreError> {
        let mut listings = self.listings.write().await;
        listings.insert(
            listing.id,
            VersionedListing {
                listing,
                version: 1,
            },
        );
        Ok(())
    }

    async fn get_listing(&self, id: Uuid) -> Result<Listing, StoreError> {
        let listings = self.listings.read().await;
        listings
            .get(&id)
            .map(|v| v.listing.clone())
            .ok_or_else(|| StoreError::not_found("listing", id))
    }

    async fn get_listing_versioned(&self, id: Uuid) -> Result<(Listing, u64), StoreError> {
        let listings = self.listings.read().await;
        listings
            .get(&id)
            .map(|v| (v.listing.clone(), v.version))
            .ok_or_else(|| StoreError::not_found("listing", id))
    }

    async fn compare_and_swap_listing(
        &self,
        id: Uuid,
        expected_version: u64,
        updated: Listing,
    ) -> Result<Listing, StoreError> {
        let mut listings = self.listings.write().await;
        let entry = listings
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("listing", id))?;
        if entry.version != expected_version {
            debug!(%id, expected_version, actual_version = entry.version, "listing CAS conflict");
            return Err(StoreError::VersionConflict { id });
        }
        entry.listing = updated;
        entry.version += 1;
        Ok(entry.listing.clone())
    }

    async fn listings_for_owner(&self, owner_id: Uuid) -> Result<Vec<Listing>, StoreError> {
        let listings = self.listings.read().await;
        let mut out: Vec<Listing> = listings
            .values()
            .filter(|v| v.listing.owner_id == owner_id)
            .map(|v| v.listing.clone())
            .collect();
        out.sort_by_key(|l| l.created_at);
        Ok(out)
    }

    async fn expire_due_listings(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut listings = self.listings.write().await;
        let mut swept = 0;
        for entry in listings.values_mut() {
            if entry.listing.status == ListingStatus::Available
                && fbridge_core::is_expired(&entry.listing, now)
            {
                entry.listing.status = ListingStatus::Expired;
                entry.version += 1;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn insert_claim(&self, claim: Claim) -> Result<(), StoreError> {
        let mut claims = self.claims.write().await;
        claims.insert(claim.id, claim);
        Ok(())
    }

    async fn get_claim(&self, id: Uuid) -> Result<Claim, StoreError> {
        let claims = self.claims.read().await;
        claims
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("claim", id))
    }

    async fn compare_and_update_claim(
        &self,
        claim: Claim,
        expected_status: ClaimStatus,
    ) -> Result<(), StoreError> {
        let mut claims = self.claims.write().await;
        let entry = claims
            .get_mut(&claim.id)
            .ok_or_else(|| StoreError::not_found("claim", claim.id))?;
        if entry.status != expected_status {
            debug!(
                id = %claim.id,
                expected = expected_status.as_str(),
                actual = entry.status.as_str(),
                "claim status conflict"
            );
            return Err(StoreError::VersionConflict { id: claim.id });
        }
        *entry = claim;
        Ok(())
    }

    async fn claims_for_owner(&self, owner_id: Uuid) -> Result<Vec<Claim>, StoreError> {
        let claims = self.claims.read().await;
        let mut out: Vec<Claim> = claims
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn claims_for_claimant(&self, claimant_id: Uuid) -> Result<Vec<Claim>, StoreError> {
        let claims = self.claims.read().await;
        let mut out: Vec<Claim> = claims
            .values()
            .filter(|c| c.claimant_id == claimant_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn total_granted_quantity(&self) -> Result<f64, StoreError> {
        let claims = self.claims.read().await;
        Ok(claims
            .values()
            .filter(|c| matches!(c.status, ClaimStatus::Approved | ClaimStatus::Completed))
            .map(|c| c.requested_quantity)
            .sum())
    }
}

#[async_trait]
impl TrendStore for MemoryStore {
    async fn upsert_trend(
        &self,
        key: TrendKey,
        apply: Box<dyn for<'a> FnOnce(&'a mut TrendSlot) + Send>,
    ) -> Result<TrendSlot, StoreError> {
        let mut trends = self.trends.write().await;
        let slot = trends
            .entry(key)
            .or_insert_with(|| TrendSlot::new(key, Utc::now()));
        apply(slot);
        Ok(slot.clone())
    }

    async fn trends_for_owner_day_hours(
        &self,
        owner_id: Uuid,
        day_of_week: u8,
        hours: &[u8],
    ) -> Result<Vec<TrendSlot>, StoreError> {
        let trends = self.trends.read().await;
        let mut out = Vec::new();
        for hour in hours {
            let key = TrendKey {
                owner_id,
                day_of_week,
                hour_of_day: *hour,
            };
            if let Some(slot) = trends.get(&key) {
                out.push(slot.clone());
            }
        }
        Ok(out)
    }

    async fn trends_for_owner(&self, owner_id: Uuid) -> Result<Vec<TrendSlot>, StoreError> {
        let trends = self.trends.read().await;
        let mut out: Vec<TrendSlot> = trends
            .values()
            .filter(|s| s.key.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.key.day_of_week, s.key.hour_of_day));
        Ok(out)
    }

    async fn clear_trends_for_owner(&self, owner_id: Uuid) -> Result<usize, StoreError> {
        let mut trends = self.trends.write().await;
        let before = trends.len();
        trends.retain(|key, _| key.owner_id != owner_id);
        Ok(before - trends.len())
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn append_observation(&self, observation: Observation) -> Result<(), StoreError> {
        let mut observations = self.observations.write().await;
        observations.push(observation);
        Ok(())
    }

    async fn observations_for_owner(&self, owner_id: Uuid) -> Result<Vec<Observation>, StoreError> {
        let observations = self.observations.read().await;
        Ok(observations
            .iter()
            .filter(|o| o.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn insert_forecast(&self, forecast: Forecast) -> Result<(), StoreError> {
        let mut forecasts = self.forecasts.write().await;
        forecasts.insert(forecast.id, forecast);
        Ok(())
    }

    async fn get_forecast(&self, id: Uuid) -> Result<Forecast, StoreError> {
        let forecasts = self.forecasts.read().await;
        forecasts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("forecast", id))
    }

    async fn open_forecast_in_window(
        &self,
        owner_id: Uuid,
        at: DateTime<Utc>,
        include_demo: bool,
    ) -> Result<Option<Forecast>, StoreError> {
        let forecasts = self.forecasts.read().await;
        Ok(forecasts
            .values()
            .filter(|f| {
                f.owner_id == owner_id
                    && f.status == ForecastStatus::Forecasted
                    && (include_demo || !f.is_demo)
                    && f.window_start <= at
                    && at <= f.window_end
            })
            .min_by_key(|f| f.created_at)
            .cloned())
    }

    async fn mark_forecast_fulfilled(
        &self,
        id: Uuid,
        actual_quantity: f64,
    ) -> Result<Forecast, StoreError> {
        let mut forecasts = self.forecasts.write().await;
        let forecast = forecasts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("forecast", id))?;
        forecast.status = ForecastStatus::Fulfilled;
        forecast.actual_quantity = Some(actual_quantity);
        Ok(forecast.clone())
    }

    async fn mark_forecasts_missed_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut forecasts = self.forecasts.write().await;
        let mut closed = 0;
        for forecast in forecasts.values_mut() {
            if forecast.status == ForecastStatus::Forecasted && forecast.window_end < now {
                forecast.status = ForecastStatus::Missed;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn has_demo_forecast_for_owner(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        let forecasts = self.forecasts.read().await;
        Ok(forecasts
            .values()
            .any(|f| f.owner_id == owner_id && f.is_demo))
    }

    async fn delete_demo_forecasts_for_owner(&self, owner_id: Uuid) -> Result<usize, StoreError> {
        let mut forecasts = self.forecasts.write().await;
        let before = forecasts.len();
        forecasts.retain(|_, f| !(f.owner_id == owner_id && f.is_demo));
        Ok(before - forecasts.len())
    }

    async fn forecast_status_counts(&self) -> Result<(u64, u64), StoreError> {
        let forecasts = self.forecasts.read().await;
        let fulfilled = forecasts
            .values()
            .filter(|f| f.status == ForecastStatus::Fulfilled)
            .count() as u64;
        let missed = forecasts
            .values()
            .filter(|f| f.status == ForecastStatus::Missed)
            .count() as u64;
        Ok((fulfilled, missed))
    }
}
