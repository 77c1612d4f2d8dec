//! Utility to inspect the inventory table and print which vehicles a run would appraise.

use vin_appraiser::config::Config;
use vin_appraiser::inventory::{normalize_inventory, InventorySource};
use vin_appraiser::integrations::store_client::SupabaseClient;

/// Rows printed in the preview.
const PREVIEW_ROWS: usize = 20;

/// Main entry point for the inventory inspection utility.
///
/// Fetches every inventory row, applies the same VIN filter as a run, and prints a summary.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let store = SupabaseClient::from_config(&config).map_err(|e| anyhow::anyhow!(e))?;

    let rows = store
        .fetch_inventory()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let vehicles = normalize_inventory(&rows, &config.vin_prefixes);

    println!("Table '{}':", config.inventory_table);
    println!("- rows: {}", rows.len());
    println!(
        "- appraisable VINs (prefixes {:?}): {}",
        config.vin_prefixes,
        vehicles.len()
    );
    println!(
        "- without a listed price: {}",
        vehicles.iter().filter(|v| v.acquisition_cost <= 0.0).count()
    );
    println!();

    for vehicle in vehicles.iter().take(PREVIEW_ROWS) {
        println!(
            "  {}  {:>8} km  ${:>10.0}  {} {} {}",
            vehicle.vin,
            vehicle.odometer_km,
            vehicle.acquisition_cost,
            vehicle.make,
            vehicle.model,
            vehicle.trim
        );
    }
    if vehicles.len() > PREVIEW_ROWS {
        println!("  ... and {} more", vehicles.len() - PREVIEW_ROWS);
    }

    Ok(())
}
