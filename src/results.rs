use crate::errors::AppraisalError;
use crate::models::{AppraisalResult, AppraisalStatus, ResultsCounts, ResultsSummary, VinOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Destination for computed appraisals.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Inserts the appraisal, replacing any earlier row for the same VIN.
    async fn upsert_result(&self, result: &AppraisalResult) -> Result<(), AppraisalError>;

    /// VINs that already have a stored appraisal.
    async fn appraised_vins(&self) -> Result<HashSet<String>, AppraisalError>;
}

/// Row layout of the results table.
#[derive(Debug, Serialize)]
pub struct AppraisalRow<'a> {
    pub vin: &'a str,
    pub kilometers: &'a str,
    pub listing_link: &'a str,
    pub carfax_link: &'a str,
    pub make: &'a str,
    pub model: &'a str,
    pub trim: &'a str,
    pub price: f64,
    pub export_value: f64,
    pub profit: Option<f64>,
    pub is_profitable: bool,
    pub status: &'static str,
    pub appraised_at: DateTime<Utc>,
}

impl<'a> From<&'a AppraisalResult> for AppraisalRow<'a> {
    fn from(result: &'a AppraisalResult) -> Self {
        Self {
            vin: &result.vin,
            kilometers: &result.odometer_km,
            listing_link: &result.listing_url,
            carfax_link: &result.carfax_link,
            make: &result.make,
            model: &result.model,
            trim: &result.trim,
            price: result.acquisition_cost,
            export_value: result.export_value,
            profit: result.profit,
            is_profitable: result.is_profitable,
            status: result.status.as_str(),
            appraised_at: result.appraised_at,
        }
    }
}

/// Groups run outcomes into profitable, losing and failed VINs.
pub fn summarize(outcomes: &[VinOutcome]) -> ResultsSummary {
    let profitable: Vec<VinOutcome> = outcomes
        .iter()
        .filter(|o| o.status == AppraisalStatus::Profit)
        .cloned()
        .collect();
    let losses: Vec<VinOutcome> = outcomes
        .iter()
        .filter(|o| o.status == AppraisalStatus::Loss)
        .cloned()
        .collect();
    let errors: Vec<VinOutcome> = outcomes
        .iter()
        .filter(|o| o.status.is_failure())
        .cloned()
        .collect();

    let total_profit = profitable.iter().filter_map(|o| o.profit).sum();

    ResultsSummary {
        summary: ResultsCounts {
            total: outcomes.len(),
            profitable: profitable.len(),
            losses: losses.len(),
            errors: errors.len(),
        },
        all: outcomes.to_vec(),
        profitable,
        losses,
        errors,
        total_profit,
    }
}
