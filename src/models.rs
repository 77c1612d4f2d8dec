use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============ Inventory Models ============

/// A vehicle row from the inventory table, normalized for appraisal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// 17-character VIN, uppercased.
    pub vin: String,
    /// Odometer reading in kilometers, digits only.
    pub odometer_km: String,
    /// Listed acquisition cost; `0.0` when the listing carries no price.
    pub acquisition_cost: f64,
    pub trim: String,
    pub make: String,
    pub model: String,
    pub listing_url: String,
    pub carfax_link: String,
}

/// Inventory preview returned by `GET /inventory`.
#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryPreview {
    /// Rows returned by the store.
    pub total: usize,
    /// Rows with an appraisable VIN.
    pub valid: usize,
    pub vehicles: Vec<VehicleRecord>,
}

// ============ Portal Models ============

/// One network exchange intercepted inside the portal page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl CapturedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }
}

// ============ Appraisal Models ============

/// Outcome classification for a single VIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppraisalStatus {
    /// Export value exceeds the acquisition cost.
    Profit,
    /// Export value is at or below the acquisition cost.
    Loss,
    /// Export value found but the listing has no price.
    Unpriced,
    /// Portal responses lacked the expected valuation fields.
    NoData,
    /// Portal responses never arrived.
    Timeout,
    /// Appraisal computed but could not be written.
    StoreFailed,
    /// Any other browser or numeric failure.
    Error,
}

impl AppraisalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppraisalStatus::Profit => "PROFIT",
            AppraisalStatus::Loss => "LOSS",
            AppraisalStatus::Unpriced => "UNPRICED",
            AppraisalStatus::NoData => "NO_DATA",
            AppraisalStatus::Timeout => "TIMEOUT",
            AppraisalStatus::StoreFailed => "STORE_FAILED",
            AppraisalStatus::Error => "ERROR",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AppraisalStatus::NoData
                | AppraisalStatus::Timeout
                | AppraisalStatus::StoreFailed
                | AppraisalStatus::Error
        )
    }
}

/// A computed appraisal, written once per VIN per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppraisalResult {
    pub vin: String,
    /// Export offer in CAD, as computed from the portal valuation.
    pub export_value: f64,
    /// `export_value - acquisition_cost`; absent when the acquisition cost is unknown.
    pub profit: Option<f64>,
    pub is_profitable: bool,
    pub status: AppraisalStatus,
    /// Trim reported by the portal, falling back to the inventory trim.
    pub trim: String,
    pub make: String,
    pub model: String,
    pub odometer_km: String,
    pub acquisition_cost: f64,
    pub listing_url: String,
    pub carfax_link: String,
    pub appraised_at: DateTime<Utc>,
}

/// Per-VIN line in the run status, for successes and failures alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinOutcome {
    pub vin: String,
    pub status: AppraisalStatus,
    pub export_value: Option<f64>,
    pub profit: Option<f64>,
    pub persisted: bool,
    pub error: Option<String>,
}

// ============ API Models ============

/// Optional body for `POST /start-run`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StartRunRequest {
    /// Restrict the run to these VINs.
    #[serde(default)]
    pub vins: Option<Vec<String>>,
    /// Process at most this many vehicles.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Skip VINs that already have a row in the results table.
    #[serde(default)]
    pub skip_appraised: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub status: String,
    pub run_id: Uuid,
    pub total: usize,
}

/// Snapshot returned by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: Option<Uuid>,
    pub is_running: bool,
    pub current_vin: Option<String>,
    pub processed: usize,
    pub total: usize,
    pub remaining: usize,
    pub persisted: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<VinOutcome>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsCounts {
    pub total: usize,
    pub profitable: usize,
    pub losses: usize,
    pub errors: usize,
}

/// Summary returned by `GET /results`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub all: Vec<VinOutcome>,
    pub profitable: Vec<VinOutcome>,
    pub losses: Vec<VinOutcome>,
    pub errors: Vec<VinOutcome>,
    pub total_profit: f64,
    pub summary: ResultsCounts,
}
