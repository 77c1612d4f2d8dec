//! The appraisal run: one browser session, one pass over the inventory, one VIN at a time.

use crate::errors::AppraisalError;
use crate::models::{AppraisalResult, AppraisalStatus, RunStatusResponse, VehicleRecord, VinOutcome};
use crate::profit;
use crate::results::ResultSink;
use crate::run_state::RunContext;
use crate::session::{Credentials, PortalSession, SessionDriver};
use crate::valuation::{parse_valuation, Valuation};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Settings for a single run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub credentials: Credentials,
    /// Pause between consecutive VINs.
    pub pause: Duration,
}

/// Drops repeated VINs, keeping the first occurrence.
pub fn dedupe_vehicles(vehicles: Vec<VehicleRecord>) -> Vec<VehicleRecord> {
    let mut seen = HashSet::new();
    vehicles
        .into_iter()
        .filter(|v| seen.insert(v.vin.clone()))
        .collect()
}

/// Builds the appraisal row for a vehicle from its portal valuation.
pub fn build_result(
    vehicle: &VehicleRecord,
    valuation: &Valuation,
) -> Result<AppraisalResult, AppraisalError> {
    let export_value = valuation.export_value();

    // A listing without a price still gets its export value recorded.
    let (profit, is_profitable, status) = if vehicle.acquisition_cost > 0.0 {
        let outcome = profit::evaluate(vehicle.acquisition_cost, export_value)?;
        let status = if outcome.is_profitable {
            AppraisalStatus::Profit
        } else {
            AppraisalStatus::Loss
        };
        (Some(outcome.profit), outcome.is_profitable, status)
    } else {
        profit::evaluate(0.0, export_value)?;
        (None, false, AppraisalStatus::Unpriced)
    };

    let trim = if valuation.trim.is_empty() {
        vehicle.trim.clone()
    } else {
        valuation.trim.clone()
    };
    let make = if vehicle.make.is_empty() {
        valuation.make.clone()
    } else {
        vehicle.make.clone()
    };
    let model = if vehicle.model.is_empty() {
        valuation.model.clone()
    } else {
        vehicle.model.clone()
    };

    Ok(AppraisalResult {
        vin: vehicle.vin.clone(),
        export_value,
        profit,
        is_profitable,
        status,
        trim,
        make,
        model,
        odometer_km: vehicle.odometer_km.clone(),
        acquisition_cost: vehicle.acquisition_cost,
        listing_url: vehicle.listing_url.clone(),
        carfax_link: vehicle.carfax_link.clone(),
        appraised_at: Utc::now(),
    })
}

fn failed_outcome(vehicle: &VehicleRecord, error: &AppraisalError) -> VinOutcome {
    VinOutcome {
        vin: vehicle.vin.clone(),
        status: error.status(),
        export_value: None,
        profit: None,
        persisted: false,
        error: Some(error.to_string()),
    }
}

/// Any login failure ends the run.
async fn login(
    session: &mut dyn PortalSession,
    credentials: &Credentials,
) -> Result<(), AppraisalError> {
    session.login(credentials).await.map_err(|e| match e {
        AppraisalError::AuthenticationFailure(_) => e,
        other => AppraisalError::AuthenticationFailure(other.to_string()),
    })
}

/// Appraises a VIN, logging back in once if the portal session has expired.
async fn appraise_with_relogin(
    ctx: &RunContext,
    session: &mut dyn PortalSession,
    vehicle: &VehicleRecord,
    credentials: &Credentials,
) -> Result<Vec<crate::models::CapturedResponse>, AppraisalError> {
    match session.appraise(vehicle).await {
        Err(AppraisalError::SessionExpired) => {
            ctx.log(format!(
                "🔐 Session expired at {}, logging in again",
                vehicle.vin
            ));
            login(session, credentials).await?;
            session.appraise(vehicle).await
        }
        other => other,
    }
}

/// Writes a result, retrying once on failure.
async fn persist_with_retry(
    ctx: &RunContext,
    sink: &dyn ResultSink,
    result: &AppraisalResult,
) -> Result<(), AppraisalError> {
    match sink.upsert_result(result).await {
        Ok(()) => Ok(()),
        Err(first) => {
            ctx.log(format!(
                "⚠️ Save failed for {} ({}), retrying",
                result.vin, first
            ));
            sink.upsert_result(result).await
        }
    }
}

/// Runs one VIN through every stage. Only a fatal error is returned as `Err`.
async fn process_vehicle(
    ctx: &RunContext,
    session: &mut dyn PortalSession,
    sink: &dyn ResultSink,
    vehicle: &VehicleRecord,
    credentials: &Credentials,
) -> Result<VinOutcome, AppraisalError> {
    let captured = match appraise_with_relogin(ctx, session, vehicle, credentials).await {
        Ok(captured) => captured,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            ctx.log(format!("❌ {}: {}", vehicle.vin, e));
            return Ok(failed_outcome(vehicle, &e));
        }
    };

    let result = match parse_valuation(&captured).and_then(|v| build_result(vehicle, &v)) {
        Ok(result) => result,
        Err(e) => {
            ctx.log(format!("❌ {}: {}", vehicle.vin, e));
            return Ok(failed_outcome(vehicle, &e));
        }
    };

    ctx.log(format!(
        "💰 {}: export value ${:.0} CAD ({})",
        vehicle.vin,
        result.export_value,
        result.status.as_str()
    ));

    match persist_with_retry(ctx, sink, &result).await {
        Ok(()) => Ok(VinOutcome {
            vin: result.vin,
            status: result.status,
            export_value: Some(result.export_value),
            profit: result.profit,
            persisted: true,
            error: None,
        }),
        Err(e) => {
            let e = match e {
                AppraisalError::StoreWriteFailure(_) => e,
                other => AppraisalError::StoreWriteFailure(other.to_string()),
            };
            ctx.log(format!("❌ {}: {}", vehicle.vin, e));
            Ok(VinOutcome {
                vin: result.vin,
                status: AppraisalStatus::StoreFailed,
                export_value: Some(result.export_value),
                profit: result.profit,
                persisted: false,
                error: Some(e.to_string()),
            })
        }
    }
}

async fn drive(
    ctx: &RunContext,
    session: &mut dyn PortalSession,
    sink: &dyn ResultSink,
    vehicles: &[VehicleRecord],
    options: &PipelineOptions,
) -> Result<(), AppraisalError> {
    login(session, &options.credentials).await?;
    ctx.log("✅ Logged in to portal");

    for (index, vehicle) in vehicles.iter().enumerate() {
        ctx.set_current(&vehicle.vin);
        let outcome = process_vehicle(ctx, session, sink, vehicle, &options.credentials).await?;
        ctx.record(outcome);

        if !options.pause.is_zero() && index + 1 < vehicles.len() {
            tokio::time::sleep(options.pause).await;
        }
    }

    Ok(())
}

/// Appraises `vehicles` in order and returns the final run status.
///
/// The browser session is opened once and closed on every exit path. Per-VIN failures are
/// recorded and skipped; an authentication failure aborts the remainder of the run.
pub async fn run_appraisals(
    ctx: RunContext,
    driver: Arc<dyn SessionDriver>,
    sink: Arc<dyn ResultSink>,
    vehicles: Vec<VehicleRecord>,
    options: PipelineOptions,
) -> RunStatusResponse {
    let tracker = ctx.tracker();
    let run_id = ctx.run_id();
    execute(ctx, driver.as_ref(), sink.as_ref(), vehicles, &options).await;
    tracing::info!(%run_id, "Run finished");
    tracker.snapshot()
}

async fn execute(
    ctx: RunContext,
    driver: &dyn SessionDriver,
    sink: &dyn ResultSink,
    vehicles: Vec<VehicleRecord>,
    options: &PipelineOptions,
) {
    let vehicles = dedupe_vehicles(vehicles);
    ctx.set_total(vehicles.len());
    ctx.log(format!("🚀 Starting run for {} vehicles", vehicles.len()));

    let mut session = match driver.open().await {
        Ok(session) => session,
        Err(e) => {
            ctx.abort(e.to_string());
            return;
        }
    };

    let outcome = drive(&ctx, session.as_mut(), sink, &vehicles, options).await;

    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }

    match outcome {
        Ok(()) => {
            let status = ctx.snapshot();
            ctx.log(format!(
                "✅ Completed {} vehicles: {} saved, {} failed",
                status.processed, status.persisted, status.failed
            ));
        }
        Err(e) => ctx.abort(e.to_string()),
    }
}
