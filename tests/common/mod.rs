//! Test doubles for the browser driver, inventory and result store.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vin_appraiser::config::Config;
use vin_appraiser::errors::AppraisalError;
use vin_appraiser::inventory::InventorySource;
use vin_appraiser::models::{AppraisalResult, CapturedResponse, VehicleRecord};
use vin_appraiser::pipeline::PipelineOptions;
use vin_appraiser::results::ResultSink;
use vin_appraiser::session::{Credentials, PortalSession, SessionDriver};

pub const VIN_A: &str = "1HGCM82633A004352";
pub const VIN_B: &str = "4T1BF1FK5CU000001";
pub const VIN_C: &str = "5YJSA1E26HF000337";

pub fn test_config(supabase_url: String) -> Config {
    Config {
        port: 5000,
        supabase_url,
        supabase_api_key: "test-key".to_string(),
        inventory_table: "inventory".to_string(),
        results_table: "appraisal_results".to_string(),
        portal_email: "buyer@example.com".to_string(),
        portal_password: "secret".to_string(),
        portal_url: "https://app.signal.vin".to_string(),
        webdriver_url: "http://localhost:9515".to_string(),
        headless: true,
        response_timeout_secs: 1,
        vin_pause_ms: 0,
        vin_prefixes: vec!["1".to_string(), "4".to_string(), "5".to_string()],
    }
}

pub fn options() -> PipelineOptions {
    PipelineOptions {
        credentials: Credentials {
            email: "buyer@example.com".to_string(),
            password: "secret".to_string(),
        },
        pause: Duration::ZERO,
    }
}

pub fn vehicle(vin: &str, cost: f64) -> VehicleRecord {
    VehicleRecord {
        vin: vin.to_string(),
        odometer_km: "50000".to_string(),
        acquisition_cost: cost,
        trim: "Base".to_string(),
        make: "Honda".to_string(),
        model: "Accord".to_string(),
        listing_url: format!("https://dealer.example/{}", vin),
        carfax_link: String::new(),
    }
}

pub fn inventory_row(vin: &str, price: &str) -> Value {
    json!({
        "vin": vin,
        "kilometers": "50,000",
        "price": price,
        "trim": "Base",
        "make": "Honda",
        "model": "Accord",
        "listing_link": format!("https://dealer.example/{}", vin),
        "carfax_link": ""
    })
}

/// Portal responses whose export value is exactly `wholesale * rate` CAD.
pub fn portal_responses(wholesale: f64, rate: f64) -> Vec<CapturedResponse> {
    vec![
        CapturedResponse::new(
            "https://api.signal.vin/v1/vin/decode",
            200,
            json!({"make": "Honda", "model": "Accord", "suggested_trim": "EX-L"}).to_string(),
        ),
        CapturedResponse::new(
            "https://api.signal.vin/v1/offer/initial",
            200,
            json!({"exchange_rate": {"to_currency_rate": rate}}).to_string(),
        ),
        CapturedResponse::new(
            "https://api.signal.vin/v1/wholesale_value_trends",
            200,
            json!({"wholesale_value_trends": {"predicted_wholesale_value": {"amount": wholesale}}})
                .to_string(),
        ),
    ]
}

/// Portal responses missing the wholesale value.
pub fn malformed_responses() -> Vec<CapturedResponse> {
    vec![CapturedResponse::new(
        "https://api.signal.vin/v1/offer/initial",
        200,
        json!({"exchange_rate": 1.35}).to_string(),
    )]
}

pub type Step = Result<Vec<CapturedResponse>, AppraisalError>;

/// Counters shared between a [`FakeDriver`] and the sessions it opens.
#[derive(Default)]
pub struct DriverStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub logins: AtomicUsize,
    pub appraised: Mutex<Vec<String>>,
}

/// Scripted portal: each VIN pops its next step; a VIN with no steps left times out.
#[derive(Clone, Default)]
pub struct FakeDriver {
    pub steps: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    pub stats: Arc<DriverStats>,
    /// Login attempts (1-based) that fail with an authentication error.
    pub failing_logins: Arc<Mutex<HashSet<usize>>>,
    pub fail_open: bool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, vin: &str, step: Step) -> Self {
        self.steps
            .lock()
            .unwrap()
            .entry(vin.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn fail_login(self, attempt: usize) -> Self {
        self.failing_logins.lock().unwrap().insert(attempt);
        self
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn open(&self) -> Result<Box<dyn PortalSession>, AppraisalError> {
        if self.fail_open {
            return Err(AppraisalError::Browser("chromedriver not reachable".to_string()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            driver: self.clone(),
            closed: false,
        }))
    }
}

pub struct FakeSession {
    driver: FakeDriver,
    closed: bool,
}

#[async_trait]
impl PortalSession for FakeSession {
    async fn login(&mut self, _credentials: &Credentials) -> Result<(), AppraisalError> {
        let attempt = self.driver.stats.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.driver.failing_logins.lock().unwrap().contains(&attempt) {
            return Err(AppraisalError::AuthenticationFailure(
                "invalid credentials".to_string(),
            ));
        }
        Ok(())
    }

    async fn appraise(
        &mut self,
        vehicle: &VehicleRecord,
    ) -> Result<Vec<CapturedResponse>, AppraisalError> {
        self.driver
            .stats
            .appraised
            .lock()
            .unwrap()
            .push(vehicle.vin.clone());
        let step = self
            .driver
            .steps
            .lock()
            .unwrap()
            .get_mut(&vehicle.vin)
            .and_then(|steps| steps.pop_front());
        step.unwrap_or_else(|| {
            Err(AppraisalError::Timeout {
                vin: vehicle.vin.clone(),
                waited_secs: 1,
            })
        })
    }

    async fn close(&mut self) -> Result<(), AppraisalError> {
        if !self.closed {
            self.closed = true;
            self.driver.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// In-memory results table keyed by VIN.
#[derive(Default)]
pub struct MemorySink {
    pub rows: Mutex<HashMap<String, AppraisalResult>>,
    pub attempts: AtomicUsize,
    /// Remaining forced failures per VIN.
    pub failures: Mutex<HashMap<String, usize>>,
}

impl MemorySink {
    pub fn failing(vin: &str, times: usize) -> Self {
        let sink = Self::default();
        sink.failures.lock().unwrap().insert(vin.to_string(), times);
        sink
    }

    pub fn stored(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn upsert_result(&self, result: &AppraisalResult) -> Result<(), AppraisalError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&result.vin) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppraisalError::StoreWriteFailure(
                    "connection reset".to_string(),
                ));
            }
        }
        self.rows
            .lock()
            .unwrap()
            .insert(result.vin.clone(), result.clone());
        Ok(())
    }

    async fn appraised_vins(&self) -> Result<HashSet<String>, AppraisalError> {
        Ok(self.rows.lock().unwrap().keys().cloned().collect())
    }
}

/// Fixed inventory rows, or a store outage.
pub struct StaticInventory {
    pub rows: Result<Vec<Value>, AppraisalError>,
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn fetch_inventory(&self) -> Result<Vec<Value>, AppraisalError> {
        self.rows.clone()
    }
}
