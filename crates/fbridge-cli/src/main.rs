use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use fbridge_core::{Audience, Category, Listing, ListingStatus, NewListingInput, Unit};
use fbridge_forecast::{ForecastConfig, ForecastEngine};
use fbridge_fulfillment::{FulfillmentConfig, FulfillmentService};
use fbridge_store::MemoryStore;
use rand::{rngs::StdRng, SeedableRng};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "fbridge-cli")]
#[command(about = "FoodBridge surplus engine demo driver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the negotiated, instant and discounted claim paths end to end.
    Scenario,
    /// Synthetic retrain + demo forecast for a fresh owner.
    Train,
    /// Real-mode forecast from a replayed weekly listing history.
    Forecast,
    /// Forecast accuracy after one fulfilled and one missed window.
    Accuracy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Scenario) {
        Commands::Scenario => run_scenario().await,
        Commands::Train => run_train().await,
        Commands::Forecast => run_forecast().await,
        Commands::Accuracy => run_accuracy().await,
    }
}

async fn run_scenario() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(ForecastEngine::new(store.clone(), ForecastConfig::from_env()));
    let service = FulfillmentService::new(store.clone(), FulfillmentConfig::from_env())
        .with_observer(engine.clone());

    let owner = Uuid::new_v4();
    let now = Utc::now();

    let listing = service
        .create_listing(NewListingInput {
            owner_id: owner,
            food_name: "Veg Biryani".into(),
            description: Some("Event surplus, still warm".into()),
            category: Category::Cooked,
            quantity: 10.0,
            unit: Unit::Portions,
            pickup_time: now + Duration::hours(1),
            expiry_time: now + Duration::hours(4),
            audience: Audience::Open,
            price: 0.0,
            original_price: 0.0,
        })
        .await?;
    println!("listing created: id={} quantity={}", listing.id, listing.quantity);

    let claim = service
        .create_request(listing.id, Uuid::new_v4(), 6.0, now + Duration::hours(1), None)
        .await?;
    let claim = service.approve(claim.id).await?;
    println!("negotiated claim approved: id={} quantity={}", claim.id, claim.requested_quantity);
    let claim = service.complete(claim.id).await?;
    println!("negotiated claim completed: status={}", claim.status.as_str());

    let expiring = service
        .create_listing(NewListingInput {
            owner_id: owner,
            food_name: "Idli Sambar".into(),
            description: None,
            category: Category::Cooked,
            quantity: 8.0,
            unit: Unit::Portions,
            pickup_time: now + Duration::minutes(20),
            expiry_time: now + Duration::minutes(40),
            audience: Audience::Open,
            price: 0.0,
            original_price: 0.0,
        })
        .await?;
    let instant = service.instant_claim(expiring.id, Uuid::new_v4(), None).await?;
    println!(
        "instant claim: id={} claimed={} status={}",
        instant.id,
        instant.requested_quantity,
        instant.status.as_str()
    );

    let deal = service
        .create_listing(NewListingInput {
            owner_id: owner,
            food_name: "Masala Dosa".into(),
            description: Some("Canteen student deal".into()),
            category: Category::Cooked,
            quantity: 6.0,
            unit: Unit::Portions,
            pickup_time: now + Duration::hours(1),
            expiry_time: now + Duration::hours(5),
            audience: Audience::Student,
            price: 40.0,
            original_price: 120.0,
        })
        .await?;
    let student = service
        .discounted_claim(deal.id, Uuid::new_v4(), 2.0, None)
        .await?;
    println!(
        "discounted claim: id={} claimed={} status={}",
        student.id,
        student.requested_quantity,
        student.status.as_str()
    );

    let stats = service.impact_stats().await?;
    println!(
        "impact: food_saved={} meals={} co2_tonnes={}",
        stats.total_food_saved, stats.meals_served, stats.co2_avoided_tonnes
    );
    Ok(())
}

async fn run_train() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = ForecastEngine::new(store, ForecastConfig::from_env());
    let mut rng = StdRng::from_entropy();

    let owner = Uuid::new_v4();
    let outcome = engine.retrain(owner, true, &mut rng).await?;
    println!("trained {} synthetic trend slots for owner {owner}", outcome.slots_created);

    match outcome.forecast {
        Some(forecast) => print_forecast(&forecast),
        None => println!("no forecast produced"),
    }

    let accuracy = engine.accuracy_stats().await?;
    println!(
        "accuracy: total={} fulfilled={} score={:.1}",
        accuracy.total, accuracy.fulfilled, accuracy.accuracy_percent
    );
    Ok(())
}

async fn run_forecast() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = ForecastEngine::new(store, ForecastConfig::from_env());
    let mut rng = StdRng::from_entropy();

    let owner = Uuid::new_v4();
    let now = Utc::now();
    replay_weekly_history(&engine, owner, now, 4).await?;
    println!("replayed 4 weeks of listings for owner {owner}");

    match engine.generate_forecast(owner, false, &mut rng).await? {
        Some(forecast) => print_forecast(&forecast),
        None => println!("no forecast: signal below the probability floor"),
    }
    Ok(())
}

async fn run_accuracy() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let engine = ForecastEngine::new(store, ForecastConfig::from_env());
    let mut rng = StdRng::from_entropy();
    let now = Utc::now();

    // One owner whose forecast is fulfilled by a listing inside the window.
    let fulfilled_owner = Uuid::new_v4();
    replay_weekly_history(&engine, fulfilled_owner, now, 4).await?;
    if engine
        .generate_forecast(fulfilled_owner, false, &mut rng)
        .await?
        .is_some()
    {
        engine
            .record_listing(&simulated_listing(fulfilled_owner, 12.0, now))
            .await?;
    }

    // One owner whose window passes with no listing.
    let missed_owner = Uuid::new_v4();
    replay_weekly_history(&engine, missed_owner, now, 4).await?;
    engine.generate_forecast(missed_owner, false, &mut rng).await?;
    let closed = engine.sweep_missed(now + Duration::hours(2)).await?;
    println!("closed {closed} stale forecast window(s)");

    let accuracy = engine.accuracy_stats().await?;
    println!(
        "accuracy: total={} fulfilled={} score={:.1}",
        accuracy.total, accuracy.fulfilled, accuracy.accuracy_percent
    );
    Ok(())
}

async fn replay_weekly_history(
    engine: &ForecastEngine<MemoryStore>,
    owner: Uuid,
    now: DateTime<Utc>,
    weeks: i64,
) -> Result<()> {
    // Same weekday and hour each week, so the current segment has signal.
    for week in 1..=weeks {
        let listing = simulated_listing(owner, 10.0 + week as f64, now - Duration::weeks(week));
        engine.record_listing(&listing).await?;
    }
    Ok(())
}

fn simulated_listing(owner: Uuid, quantity: f64, created_at: DateTime<Utc>) -> Listing {
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

fn print_forecast(forecast: &fbridge_core::Forecast) {
    println!(
        "forecast: probability={:.2} confidence={:.0} window={}..{} foods={:?} demo={}",
        forecast.probability,
        forecast.confidence_score,
        forecast.window_start,
        forecast.window_end,
        forecast.top_foods,
        forecast.is_demo
    );
}
