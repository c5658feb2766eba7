//! Core domain model for the FoodBridge surplus engine.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fbridge-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Cooked,
    Raw,
    Packaged,
    Beverages,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cooked => "cooked",
            Category::Raw => "raw",
            Category::Packaged => "packaged",
            Category::Beverages => "beverages",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unit {
    Kg,
    Portions,
    Boxes,
}

/// Who a listing is offered to. `Open` listings go through the negotiated
/// charity flow; `Student` and `Everyone` listings are claimable through the
/// discounted fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Audience {
    Open,
    Student,
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingStatus {
    Available,
    Reserved,
    PickedUp,
    Expired,
    Archived,
}

/// A provider's posted surplus-food offer with finite, depleting quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub food_name: String,
    pub description: Option<String>,
    pub category: Category,
    pub quantity: f64,
    pub unit: Unit,
    pub pickup_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub audience: Audience,
    pub is_discounted: bool,
    pub price: f64,
    pub original_price: f64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for posting a new listing. Status, the discounted flag and the
/// creation timestamp are derived by the orchestrator, not supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListingInput {
    pub owner_id: Uuid,
    pub food_name: String,
    pub description: Option<String>,
    pub category: Category,
    pub quantity: f64,
    pub unit: Unit,
    pub pickup_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub audience: Audience,
    pub price: f64,
    pub original_price: f64,
}

/// Expiry is computed from the clock, never trusted from the stored status.
/// Every claim validator and read path goes through this one predicate.
pub fn is_expired(listing: &Listing, now: DateTime<Utc>) -> bool {
    listing.expiry_time <= now
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Completed => "completed",
        }
    }

    /// Legal lifecycle edges. `Completed -> Rejected` is intentional: it
    /// models a retroactive reversal of a pickup and must be paired with an
    /// inventory release by the orchestrator.
    pub fn can_transition_to(&self, next: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Rejected)
                | (Approved, Completed)
                | (Completed, Rejected)
        )
    }
}

/// A claimant's bid against one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub claimant_id: Uuid,
    /// Denormalized from the listing at creation time.
    pub owner_id: Uuid,
    pub requested_quantity: f64,
    pub scheduled_pickup_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregation key for historical trends: one owner at one weekday/hour cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrendKey {
    pub owner_id: Uuid,
    /// 0 = Sunday, matching the original data set.
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

pub fn trend_key_for(owner_id: Uuid, timestamp: DateTime<Utc>) -> TrendKey {
    TrendKey {
        owner_id,
        day_of_week: timestamp.weekday().num_days_from_sunday() as u8,
        hour_of_day: timestamp.hour() as u8,
    }
}

/// Aggregated surplus statistics for one trend cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSlot {
    pub key: TrendKey,
    pub avg_surplus_quantity: f64,
    pub occurrence_count: u32,
    pub total_observations: u32,
    pub common_categories: Vec<String>,
    pub peak_season_factor: f64,
    pub last_updated: DateTime<Utc>,
}

impl TrendSlot {
    pub fn new(key: TrendKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            avg_surplus_quantity: 0.0,
            occurrence_count: 0,
            total_observations: 0,
            common_categories: Vec::new(),
            peak_season_factor: 1.0,
            last_updated: now,
        }
    }

    /// Folds one observation into the slot. Zero-quantity observations count
    /// toward `total_observations` only, so the occurrence ratio stays an
    /// empirical surplus probability.
    pub fn record(&mut self, quantity: f64, category: &str, now: DateTime<Utc>) {
        self.total_observations += 1;
        if quantity > 0.0 {
            self.occurrence_count += 1;
            let n = self.occurrence_count as f64;
            self.avg_surplus_quantity += (quantity - self.avg_surplus_quantity) / n;
            if !self.common_categories.iter().any(|c| c == category) {
                self.common_categories.push(category.to_string());
            }
        }
        self.last_updated = now;
    }

    pub fn occurrence_ratio(&self) -> f64 {
        f64::from(self.occurrence_count) / f64::from(self.total_observations.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastStatus {
    Forecasted,
    ActiveAlert,
    Fulfilled,
    Missed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastFactors {
    pub day_factor: f64,
    pub time_factor: f64,
    pub seasonal_factor: f64,
    pub event_factor: f64,
}

impl Default for ForecastFactors {
    fn default() -> Self {
        Self {
            day_factor: 1.0,
            time_factor: 1.0,
            seasonal_factor: 1.0,
            event_factor: 1.0,
        }
    }
}

/// A probabilistic prediction of future surplus for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub prediction_date: DateTime<Utc>,
    pub probability: f64,
    pub expected_quantity: f64,
    pub expected_unit: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub confidence_score: f64,
    pub factors: ForecastFactors,
    pub status: ForecastStatus,
    pub actual_quantity: Option<f64>,
    pub top_foods: Vec<String>,
    /// Set when the forecast came from the synthetic bootstrap path. Demo
    /// forecasts never masquerade as real signal.
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
}

/// A single raw listing-created observation, kept so non-demo retraining can
/// replay real history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub owner_id: Uuid,
    pub observed_at: DateTime<Utc>,
    pub quantity: f64,
    pub category: String,
}
