//! Trend aggregation + surplus forecasting for the FoodBridge engine.
//!
//! Listing-created events fold into per-owner `(day, hour)` trend slots; the
//! generator turns those slots into probabilistic forecasts, and the
//! reconciler closes the loop by marking a forecast fulfilled when a real
//! listing lands inside its window. A synthetic bootstrap path fabricates
//! peak-hour-biased trends for owners with no history, always flagged
//! `is_demo`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use fbridge_core::{
    trend_key_for, Forecast, ForecastFactors, ForecastStatus, Listing, Observation, TrendKey,
    TrendSlot,
};
use fbridge_fulfillment::ListingObserver;
use fbridge_store::{ForecastStore, ObservationStore, StoreError, TrendStore};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fbridge-forecast";

/// Hours where surplus historically clusters; the synthetic trainer biases
/// toward these so a fresh demo owner gets a believable signal.
pub const PEAK_HOURS: [u8; 9] = [8, 9, 10, 12, 13, 14, 19, 20, 21];

const FILLER_FOODS: [&str; 8] = [
    "Masala Dosa",
    "Chicken Biryani",
    "Idli Sambar",
    "Medu Vada",
    "Curd Rice",
    "Appam & Stew",
    "Pongal",
    "Parotta",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForecastError {
    #[error("owner has no observation history to retrain from")]
    NoHistoricalData,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Real-mode forecasts below this empirical probability are suppressed.
    pub min_probability: f64,
    /// Demo forecasts report at least this probability.
    pub demo_probability_floor: f64,
    /// Demo confidence floor, on the 0..=1 scale before the x100 conversion.
    pub demo_confidence_floor: f64,
    /// Number of hour segments considered, starting at the current hour.
    pub segment_lookahead_hours: usize,
    /// Whether the reconciler may fulfill demo forecasts with real listings.
    pub reconcile_demo: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.2,
            demo_probability_floor: 0.75,
            demo_confidence_floor: 0.8,
            segment_lookahead_hours: 4,
            reconcile_demo: false,
        }
    }
}

impl ForecastConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_probability: std::env::var("FBRIDGE_MIN_FORECAST_PROBABILITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_probability),
            demo_probability_floor: std::env::var("FBRIDGE_DEMO_PROBABILITY_FLOOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.demo_probability_floor),
            demo_confidence_floor: std::env::var("FBRIDGE_DEMO_CONFIDENCE_FLOOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.demo_confidence_floor),
            segment_lookahead_hours: std::env::var("FBRIDGE_SEGMENT_LOOKAHEAD_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.segment_lookahead_hours),
            reconcile_demo: std::env::var("FBRIDGE_RECONCILE_DEMO")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.reconcile_demo),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub slots_created: usize,
    pub forecast: Option<Forecast>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyStats {
    pub total: u64,
    pub fulfilled: u64,
    pub accuracy_percent: f64,
}

/// Stateless forecasting service over an injected store handle.
pub struct ForecastEngine<S> {
    store: Arc<S>,
    config: ForecastConfig,
}

impl<S> ForecastEngine<S>
where
    S: TrendStore + ForecastStore + ObservationStore,
{
    pub fn new(store: Arc<S>, config: ForecastConfig) -> Self {
        Self { store, config }
    }

    /// Trend Aggregator + Fulfillment Reconciler entry point: folds a new
    /// listing into the owner's trend slot, logs the raw observation, then
    /// fulfills any open forecast whose window contains the event.
    pub async fn record_listing(
        &self,
        listing: &Listing,
    ) -> Result<Option<Forecast>, ForecastError> {
        let key = trend_key_for(listing.owner_id, listing.created_at);
        let quantity = listing.quantity;
        let category = listing.category.as_str().to_string();
        let observed_at = listing.created_at;
        let slot = self
            .store
            .upsert_trend(
                key,
                Box::new(move |slot| slot.record(quantity, &category, observed_at)),
            )
            .await?;
        debug!(
            owner_id = %listing.owner_id,
            day = key.day_of_week,
            hour = key.hour_of_day,
            observations = slot.total_observations,
            "recorded trend observation"
        );
        self.store
            .append_observation(Observation {
                owner_id: listing.owner_id,
                observed_at,
                quantity,
                category: listing.category.as_str().to_string(),
            })
            .await?;

        self.reconcile(listing.owner_id, observed_at, listing.quantity)
            .await
    }

    /// Marks the open forecast containing `at` as fulfilled, recording the
    /// observed quantity. Demo forecasts are only eligible when the config
    /// explicitly includes them.
    pub async fn reconcile(
        &self,
        owner_id: Uuid,
        at: DateTime<Utc>,
        actual_quantity: f64,
    ) -> Result<Option<Forecast>, ForecastError> {
        let open = self
            .store
            .open_forecast_in_window(owner_id, at, self.config.reconcile_demo)
            .await?;
        match open {
            Some(forecast) => {
                let fulfilled = self
                    .store
                    .mark_forecast_fulfilled(forecast.id, actual_quantity)
                    .await?;
                info!(forecast_id = %fulfilled.id, %owner_id, actual_quantity, "forecast fulfilled");
                Ok(Some(fulfilled))
            }
            None => Ok(None),
        }
    }

    pub async fn generate_forecast<R: Rng>(
        &self,
        owner_id: Uuid,
        demo_mode: bool,
        rng: &mut R,
    ) -> Result<Option<Forecast>, ForecastError> {
        self.generate_forecast_at(owner_id, demo_mode, Utc::now(), rng)
            .await
    }

    /// Forecast generation pinned to an explicit `now`, the testable core of
    /// [`Self::generate_forecast`].
    pub async fn generate_forecast_at<R: Rng>(
        &self,
        owner_id: Uuid,
        demo_mode: bool,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<Forecast>, ForecastError> {
        let day_of_week = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as usize;
        let segments: Vec<u8> = (0..self.config.segment_lookahead_hours.max(1))
            .map(|offset| ((hour + offset) % 24) as u8)
            .collect();

        let mut slots = self
            .store
            .trends_for_owner_day_hours(owner_id, day_of_week, &segments)
            .await?;
        debug!(%owner_id, day_of_week, ?segments, candidates = slots.len(), "forecast candidates");

        let best = if slots.is_empty() {
            if !demo_mode {
                return Ok(None);
            }
            // Demo fallback: any slot at all beats an empty screen.
            let any = self.store.trends_for_owner(owner_id).await?;
            match any.into_iter().next() {
                Some(slot) => slot,
                None => return Ok(None),
            }
        } else {
            // Strictly-greater comparison keeps the first-encountered slot on
            // ties, so repeated calls stay stable.
            let mut best = slots.remove(0);
            for slot in slots {
                if slot.occurrence_ratio() > best.occurrence_ratio() {
                    best = slot;
                }
            }
            best
        };

        let raw_probability = best.occurrence_ratio();
        if !demo_mode && raw_probability < self.config.min_probability {
            debug!(%owner_id, raw_probability, "forecast suppressed below probability floor");
            return Ok(None);
        }

        let forecast = self.build_forecast(owner_id, &best, demo_mode, now, rng);
        self.store.insert_forecast(forecast.clone()).await?;
        info!(
            forecast_id = %forecast.id,
            %owner_id,
            probability = forecast.probability,
            is_demo = forecast.is_demo,
            "forecast generated"
        );
        Ok(Some(forecast))
    }

    fn build_forecast<R: Rng>(
        &self,
        owner_id: Uuid,
        slot: &TrendSlot,
        demo_mode: bool,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Forecast {
        let raw_probability = slot.occurrence_ratio();
        let probability = if demo_mode {
            raw_probability.max(self.config.demo_probability_floor)
        } else {
            raw_probability
        };
        let expected_quantity = if slot.avg_surplus_quantity > 0.0 {
            slot.avg_surplus_quantity
        } else if demo_mode {
            f64::from(rng.gen_range(10..30))
        } else {
            0.0
        };
        let confidence_score = if demo_mode {
            raw_probability.max(self.config.demo_confidence_floor) * 100.0
        } else {
            raw_probability * 100.0
        };

        // Slot hours are always < 24, so the one-hour block is constructible.
        let window_start = now
            .date_naive()
            .and_hms_opt(u32::from(slot.key.hour_of_day), 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let window_end = window_start + Duration::hours(1);

        let top_foods = if slot.common_categories.is_empty() {
            vec![
                FILLER_FOODS[rng.gen_range(0..FILLER_FOODS.len())].to_string(),
                FILLER_FOODS[rng.gen_range(0..FILLER_FOODS.len())].to_string(),
            ]
        } else {
            slot.common_categories.iter().take(3).cloned().collect()
        };

        Forecast {
            id: Uuid::new_v4(),
            owner_id,
            prediction_date: now,
            probability,
            expected_quantity,
            expected_unit: "portions".into(),
            window_start,
            window_end,
            confidence_score,
            factors: ForecastFactors {
                seasonal_factor: slot.peak_season_factor,
                ..ForecastFactors::default()
            },
            status: ForecastStatus::Forecasted,
            actual_quantity: None,
            top_foods,
            is_demo: demo_mode,
            created_at: now,
        }
    }

    /// Clears the owner's trend slots and regenerates them, either from
    /// synthetic peak-biased data (demo) or by replaying the owner's real
    /// observation history. Finishes with a fresh forecast.
    pub async fn retrain<R: Rng>(
        &self,
        owner_id: Uuid,
        use_demo_data: bool,
        rng: &mut R,
    ) -> Result<TrainOutcome, ForecastError> {
        let cleared = self.store.clear_trends_for_owner(owner_id).await?;

        if use_demo_data {
            let dropped = self.store.delete_demo_forecasts_for_owner(owner_id).await?;
            info!(%owner_id, cleared, dropped, "retraining with synthetic data");
            let slots_created = self.seed_synthetic_trends(owner_id, rng).await?;
            let forecast = self.generate_forecast(owner_id, true, rng).await?;
            return Ok(TrainOutcome {
                slots_created,
                forecast,
            });
        }

        let history = self.store.observations_for_owner(owner_id).await?;
        if history.is_empty() {
            return Err(ForecastError::NoHistoricalData);
        }
        info!(%owner_id, cleared, observations = history.len(), "retraining from history");
        let mut keys: HashSet<TrendKey> = HashSet::new();
        for observation in history {
            let key = trend_key_for(owner_id, observation.observed_at);
            keys.insert(key);
            let quantity = observation.quantity;
            let category = observation.category.clone();
            let observed_at = observation.observed_at;
            self.store
                .upsert_trend(
                    key,
                    Box::new(move |slot| slot.record(quantity, &category, observed_at)),
                )
                .await?;
        }
        let forecast = self.generate_forecast(owner_id, false, rng).await?;
        Ok(TrainOutcome {
            slots_created: keys.len(),
            forecast,
        })
    }

    async fn seed_synthetic_trends<R: Rng>(
        &self,
        owner_id: Uuid,
        rng: &mut R,
    ) -> Result<usize, ForecastError> {
        let now = Utc::now();
        let mut created = 0usize;
        for day in 0u8..7 {
            for hour in 0u8..24 {
                let is_peak = PEAK_HOURS.contains(&hour);
                let observations: u32 = if is_peak { 10 } else { 2 };
                let occurrences: u32 = if is_peak {
                    rng.gen_range(0..5) + 3
                } else {
                    rng.gen_range(0..2)
                };
                // Sparse off-peak cells keep the fabricated history plausible.
                if occurrences == 0 && rng.gen::<f64>() <= 0.7 {
                    continue;
                }

                let mut categories: Vec<String> = Vec::new();
                for _ in 0..2 {
                    let item = FILLER_FOODS[rng.gen_range(0..FILLER_FOODS.len())].to_string();
                    if !categories.contains(&item) {
                        categories.push(item);
                    }
                }
                let avg = if occurrences > 0 {
                    f64::from(rng.gen_range(0..20) + 5)
                } else {
                    0.0
                };
                let peak_season_factor = if rng.gen::<f64>() > 0.8 { 1.5 } else { 1.0 };

                let key = TrendKey {
                    owner_id,
                    day_of_week: day,
                    hour_of_day: hour,
                };
                self.store
                    .upsert_trend(
                        key,
                        Box::new(move |slot| {
                            slot.avg_surplus_quantity = avg;
                            slot.occurrence_count = occurrences;
                            slot.total_observations = observations;
                            slot.common_categories = categories;
                            slot.peak_season_factor = peak_season_factor;
                            slot.last_updated = now;
                        }),
                    )
                    .await?;
                created += 1;
            }
        }
        debug!(%owner_id, created, "seeded synthetic trend slots");
        Ok(created)
    }

    /// Demo mode sticks once an owner has demo forecasts, mirroring how the
    /// boundary decides whether to boost a new forecast.
    pub async fn demo_mode_enabled(&self, owner_id: Uuid) -> Result<bool, ForecastError> {
        Ok(self.store.has_demo_forecast_for_owner(owner_id).await?)
    }

    pub async fn accuracy_stats(&self) -> Result<AccuracyStats, ForecastError> {
        let (fulfilled, missed) = self.store.forecast_status_counts().await?;
        let total = fulfilled + missed;
        let accuracy_percent = if total > 0 {
            fulfilled as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok(AccuracyStats {
            total,
            fulfilled,
            accuracy_percent,
        })
    }

    /// Closes open forecasts whose window has fully passed.
    pub async fn sweep_missed(&self, now: DateTime<Utc>) -> Result<usize, ForecastError> {
        Ok(self.store.mark_forecasts_missed_due(now).await?)
    }
}

#[async_trait]
impl<S> ListingObserver for ForecastEngine<S>
where
    S: TrendStore + ForecastStore + ObservationStore + Send + Sync,
{
    async fn listing_created(&self, listing: &Listing) -> anyhow::Result<()> {
        self.record_listing(listing).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbridge_core::{Audience, Category, ListingStatus, Unit};
    use fbridge_store::MemoryStore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn engine() -> (Arc<MemoryStore>, ForecastEngine<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = ForecastEngine::new(store.clone(), ForecastConfig::default());
        (store, engine)
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    async fn seed_slot(
        store: &MemoryStore,
        owner: Uuid,
        day: u8,
        hour: u8,
        occurrences: u32,
        observations: u32,
        avg: f64,
        categories: &[&str],
    ) {
        let key = TrendKey {
            owner_id: owner,
            day_of_week: day,
            hour_of_day: hour,
        };
        let categories: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        store
            .upsert_trend(
                key,
                Box::new(move |slot| {
                    slot.occurrence_count = occurrences;
                    slot.total_observations = observations;
                    slot.avg_surplus_quantity = avg;
                    slot.common_categories = categories;
                }),
            )
            .await
            .unwrap();
    }

    fn mk_listing(owner: Uuid, quantity: f64, created_at: DateTime<Utc>) -> Listing {
        Listing {
            id: Uuid::new_v4(),
            owner_id: owner,
            food_name: "Curd Rice".into(),
            description: None,
            category: Category::Cooked,
            quantity,
            unit: Unit::Portions,
            pickup_time: created_at + Duration::hours(1),
            expiry_time: created_at + Duration::hours(4),
            audience: Audience::Open,
            is_discounted: false,
            price: 0.0,
            original_price: 0.0,
            status: ListingStatus::Available,
            created_at,
        }
    }

    #[tokio::test]
    async fn picks_highest_occurrence_ratio_deterministically() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as u8;
        let next = ((u32::from(hour) + 1) % 24) as u8;

        seed_slot(&store, owner, day, hour, 3, 10, 12.0, &["cooked"]).await;
        seed_slot(&store, owner, day, next, 8, 10, 20.0, &["packaged"]).await;

        for _ in 0..3 {
            let forecast = engine
                .generate_forecast_at(owner, false, now, &mut rng())
                .await
                .unwrap()
                .unwrap();
            assert!((forecast.probability - 0.8).abs() < 1e-9);
            assert!((forecast.expected_quantity - 20.0).abs() < 1e-9);
            assert_eq!(forecast.top_foods, vec!["packaged".to_string()]);
            assert!(!forecast.is_demo);
            assert_eq!(forecast.window_end - forecast.window_start, Duration::hours(1));
        }
    }

    #[tokio::test]
    async fn ties_resolve_to_the_earlier_segment() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as u8;
        let next = ((u32::from(hour) + 1) % 24) as u8;

        seed_slot(&store, owner, day, hour, 5, 10, 7.0, &["cooked"]).await;
        seed_slot(&store, owner, day, next, 5, 10, 9.0, &["raw"]).await;

        for _ in 0..3 {
            let forecast = engine
                .generate_forecast_at(owner, false, now, &mut rng())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(forecast.top_foods, vec!["cooked".to_string()]);
        }
    }

    #[tokio::test]
    async fn low_probability_suppressed_unless_demo() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as u8;

        seed_slot(&store, owner, day, hour, 1, 10, 5.0, &["cooked"]).await;

        assert!(engine
            .generate_forecast_at(owner, false, now, &mut rng())
            .await
            .unwrap()
            .is_none());

        let demo = engine
            .generate_forecast_at(owner, true, now, &mut rng())
            .await
            .unwrap()
            .unwrap();
        assert!(demo.is_demo);
        assert!(demo.probability >= 0.75);
        assert!(demo.confidence_score >= 80.0);
    }

    #[tokio::test]
    async fn no_data_yields_null_unless_demo_fallback_finds_a_slot() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        // A slot far outside the lookahead segments.
        let far_hour = ((u32::from(now.hour()) + 12) % 24) as u8;
        seed_slot(&store, owner, day, far_hour, 6, 10, 11.0, &[]).await;

        assert!(engine
            .generate_forecast_at(owner, false, now, &mut rng())
            .await
            .unwrap()
            .is_none());

        let demo = engine
            .generate_forecast_at(owner, true, now, &mut rng())
            .await
            .unwrap()
            .unwrap();
        assert!(demo.is_demo);
        // Empty category set falls back to filler foods.
        assert_eq!(demo.top_foods.len(), 2);

        // Fully unknown owner: nothing to forecast even in demo mode.
        assert!(engine
            .generate_forecast_at(Uuid::new_v4(), true, now, &mut rng())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn record_listing_aggregates_and_fulfills_open_forecast() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as u8;
        seed_slot(&store, owner, day, hour, 9, 10, 15.0, &["cooked"]).await;

        let forecast = engine
            .generate_forecast_at(owner, false, now, &mut rng())
            .await
            .unwrap()
            .unwrap();

        // Listing created inside the forecast window closes the loop.
        let listing = mk_listing(owner, 14.0, forecast.window_start + Duration::minutes(20));
        let fulfilled = engine.record_listing(&listing).await.unwrap().unwrap();
        assert_eq!(fulfilled.id, forecast.id);
        assert_eq!(fulfilled.status, ForecastStatus::Fulfilled);
        assert_eq!(fulfilled.actual_quantity, Some(14.0));

        let slots = store.trends_for_owner(owner).await.unwrap();
        let slot = slots
            .iter()
            .find(|s| s.key.hour_of_day == listing.created_at.hour() as u8)
            .unwrap();
        assert!(slot.total_observations >= 1);

        let stats = engine.accuracy_stats().await.unwrap();
        assert_eq!(stats.fulfilled, 1);
        assert!((stats.accuracy_percent - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn demo_forecasts_are_not_reconciled_by_default() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let day = now.weekday().num_days_from_sunday() as u8;
        let hour = now.hour() as u8;
        seed_slot(&store, owner, day, hour, 1, 10, 5.0, &["cooked"]).await;

        let demo = engine
            .generate_forecast_at(owner, true, now, &mut rng())
            .await
            .unwrap()
            .unwrap();
        assert!(demo.is_demo);

        let listing = mk_listing(owner, 6.0, demo.window_start + Duration::minutes(5));
        assert!(engine.record_listing(&listing).await.unwrap().is_none());
        assert_eq!(
            store.get_forecast(demo.id).await.unwrap().status,
            ForecastStatus::Forecasted
        );
        assert!(engine.demo_mode_enabled(owner).await.unwrap());
    }

    #[tokio::test]
    async fn synthetic_retrain_seeds_peak_biased_slots_and_forecasts() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let mut rng = rng();

        let outcome = engine.retrain(owner, true, &mut rng).await.unwrap();
        assert!(outcome.slots_created > 0);

        let slots = store.trends_for_owner(owner).await.unwrap();
        assert_eq!(slots.len(), outcome.slots_created);
        // Every peak-hour cell is materialized with its heavier weighting.
        for day in 0u8..7 {
            for hour in PEAK_HOURS {
                let slot = slots
                    .iter()
                    .find(|s| s.key.day_of_week == day && s.key.hour_of_day == hour)
                    .unwrap();
                assert_eq!(slot.total_observations, 10);
                assert!(slot.occurrence_count >= 3);
                assert!(slot.occurrence_count <= slot.total_observations);
            }
        }

        let forecast = outcome.forecast.unwrap();
        assert!(forecast.is_demo);
        assert!(forecast.probability >= 0.75);
        assert!(forecast.confidence_score >= 80.0);
        assert!(!forecast.top_foods.is_empty());
    }

    #[tokio::test]
    async fn retrain_without_history_or_demo_fails() {
        let (_, engine) = engine();
        let err = engine
            .retrain(Uuid::new_v4(), false, &mut rng())
            .await
            .unwrap_err();
        assert_eq!(err, ForecastError::NoHistoricalData);
    }

    #[tokio::test]
    async fn retrain_replays_real_history() {
        let (store, engine) = engine();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        for i in 0..4 {
            let listing = mk_listing(owner, 10.0 + f64::from(i), now - Duration::days(7 * i64::from(i)));
            engine.record_listing(&listing).await.unwrap();
        }
        // Same weekday/hour every 7 days: one dense slot.
        let outcome = engine.retrain(owner, false, &mut rng()).await.unwrap();
        assert_eq!(outcome.slots_created, 1);

        let slots = store.trends_for_owner(owner).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].total_observations, 4);
        // Probability 1.0 in the current segment: a real forecast comes back.
        let forecast = outcome.forecast.unwrap();
        assert!(!forecast.is_demo);
        assert!((forecast.probability - 1.0).abs() < 1e-9);
    }
}
