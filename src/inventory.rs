//! Inventory loading and normalization.
//!
//! Raw rows come from the hosted store as loose JSON. Everything the pipeline needs is
//! pulled out here so later stages only ever see [`VehicleRecord`]s with a usable VIN.

use crate::errors::AppraisalError;
use crate::models::VehicleRecord;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Source of raw inventory rows.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Returns every row of the inventory table.
    async fn fetch_inventory(&self) -> Result<Vec<Value>, AppraisalError>;
}

fn non_numeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\d.\-]").expect("static regex"))
}

/// Parses a listing price such as `"$24,995"` into a number. Unparseable input yields `0.0`.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned = non_numeric().replace_all(raw, "");
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// A VIN is appraisable when it is 17 ASCII alphanumerics and starts with one of `prefixes`.
///
/// An empty prefix list accepts any well-formed VIN.
pub fn is_valid_vin(vin: &str, prefixes: &[String]) -> bool {
    if vin.len() != 17 || !vin.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    prefixes.is_empty() || prefixes.iter().any(|p| vin.starts_with(p.as_str()))
}

/// Reads a field as trimmed text whether the store returned a string or a number.
fn field_text(row: &Value, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Keeps only the digits of an odometer reading, defaulting to `"0"`.
fn odometer_digits(raw: &str) -> String {
    // "45,210 km" and "45210.0" both mean 45210
    let integral = raw.split('.').next().unwrap_or_default();
    let digits: String = integral.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        "0".to_string()
    } else {
        digits
    }
}

/// Converts a raw inventory row into a [`VehicleRecord`], or `None` if the VIN is not appraisable.
pub fn to_vehicle(row: &Value, prefixes: &[String]) -> Option<VehicleRecord> {
    let vin = field_text(row, "vin").to_uppercase();
    if !is_valid_vin(&vin, prefixes) {
        return None;
    }

    Some(VehicleRecord {
        vin,
        odometer_km: odometer_digits(&field_text(row, "kilometers")),
        acquisition_cost: parse_price(&field_text(row, "price")).max(0.0),
        trim: field_text(row, "trim"),
        make: field_text(row, "make"),
        model: field_text(row, "model"),
        listing_url: field_text(row, "listing_link"),
        carfax_link: field_text(row, "carfax_link"),
    })
}

/// Normalizes raw rows, dropping invalid VINs and repeated VINs (first occurrence wins).
pub fn normalize_inventory(rows: &[Value], prefixes: &[String]) -> Vec<VehicleRecord> {
    let mut seen = HashSet::new();
    let mut vehicles = Vec::new();

    for row in rows {
        let Some(vehicle) = to_vehicle(row, prefixes) else {
            continue;
        };
        if !seen.insert(vehicle.vin.clone()) {
            tracing::debug!("Dropping duplicate inventory row for VIN {}", vehicle.vin);
            continue;
        }
        vehicles.push(vehicle);
    }

    vehicles
}
