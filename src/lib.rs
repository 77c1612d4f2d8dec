//! VIN Appraiser Library
//!
//! Appraises vehicle inventory for export: vehicles are read from a hosted Supabase table,
//! each VIN is run through a valuation portal in a headless browser, the export value and
//! profit are computed, and results are upserted back to the store.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Appraisal logic and shared errors/models.
//! - `integrations`: External service clients.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `inventory`: Inventory source and row normalization.
//! - `models`: Core data models.
//! - `pipeline`: Sequential appraisal run.
//! - `profit`: Profitability calculation.
//! - `results`: Result sink and run summaries.
//! - `run_state`: Run tracking and per-run context.
//! - `session`: Browser session driver for the valuation portal.
//! - `store_client`: Supabase REST client.
//! - `valuation`: Valuation parsing from intercepted portal responses.

pub mod api;
pub mod core;
pub mod integrations;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod inventory;
pub mod models;
pub mod pipeline;
pub mod profit;
pub mod results;
pub mod run_state;
pub mod session;
pub mod store_client;
pub mod valuation;
