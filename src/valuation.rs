//! Valuation extraction from intercepted portal responses.
//!
//! The portal never returns an export price directly. It sends the inputs (US wholesale
//! value, exchange rate, fees) across three API calls, and the offer is derived here.

use crate::errors::AppraisalError;
use crate::models::CapturedResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// URL fragment of the VIN decode call (make, model, trim, duty rate).
pub const DECODE_FRAGMENT: &str = "decode";
/// URL fragment of the offer setup call (exchange rate, fees).
pub const OFFER_FRAGMENT: &str = "offer/initial";
/// URL fragment of the wholesale trends call (predicted wholesale value).
pub const WHOLESALE_FRAGMENT: &str = "wholesale_value_trends";

/// Exchanges that must be captured before a valuation can be attempted.
pub const REQUIRED_FRAGMENTS: [&str; 2] = [OFFER_FRAGMENT, WHOLESALE_FRAGMENT];

/// Valuation inputs collected from the portal for one VIN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub us_wholesale_value: f64,
    pub exchange_rate: f64,
    pub fx_cushion: f64,
    pub export_cost: f64,
    pub target_gpu: f64,
    pub customs_duty_rate: f64,
    /// Percent of wholesale value lost per week.
    pub weekly_depreciation_factor: f64,
    pub average_days_in_inventory: i64,
    pub make: String,
    pub model: String,
    pub trim: String,
}

/// Amounts subtracted from the wholesale value, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deductions {
    pub export_cost: f64,
    pub target_gpu: f64,
    pub customs_duty: f64,
    pub depreciation: f64,
}

impl Deductions {
    pub fn total(&self) -> f64 {
        self.export_cost + self.target_gpu + self.customs_duty + self.depreciation
    }
}

impl Valuation {
    pub fn deductions(&self) -> Deductions {
        let weeks = if self.average_days_in_inventory > 0 {
            self.average_days_in_inventory as f64 / 7.0
        } else {
            0.0
        };
        let depreciation_rate = if self.weekly_depreciation_factor > 0.0 {
            self.weekly_depreciation_factor / 100.0
        } else {
            0.0
        };

        Deductions {
            export_cost: self.export_cost,
            target_gpu: self.target_gpu,
            customs_duty: self.us_wholesale_value * self.customs_duty_rate,
            depreciation: self.us_wholesale_value * depreciation_rate * weeks,
        }
    }

    /// Exchange rate after the portal's FX cushion.
    pub fn effective_fx(&self) -> f64 {
        self.exchange_rate - self.fx_cushion
    }

    /// Export offer in CAD, rounded to the dollar.
    pub fn export_value(&self) -> f64 {
        let net_usd = self.us_wholesale_value - self.deductions().total();
        (net_usd * self.effective_fx()).round()
    }
}

/// Reads a number that may be encoded as a JSON number or a numeric string.
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Reads a money value that is either a bare number or an object with `key`.
fn nested_number(value: Option<&Value>, key: &str) -> Option<f64> {
    match value? {
        Value::Object(map) => number(map.get(key)),
        other => number(Some(other)),
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns the JSON body of a captured exchange, skipping HTML, scripts and empty bodies.
fn json_body(response: &CapturedResponse) -> Option<Value> {
    let body = response.body.trim_start();
    if body.is_empty() || body.starts_with("<!") || body.starts_with("(function") {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn apply_decode(valuation: &mut Valuation, data: &Value) {
    if let Some(make) = text(data.get("make")) {
        valuation.make = make;
    }
    if let Some(model) = text(data.get("model")) {
        valuation.model = model;
    }
    if let Some(trim) =
        text(data.get("selected_trim")).or_else(|| text(data.get("suggested_trim")))
    {
        valuation.trim = trim;
    }
    if let Some(rate) = number(data.get("customs_duty_rate")) {
        valuation.customs_duty_rate = rate;
    }
}

fn apply_offer(valuation: &mut Valuation, data: &Value, exchange_rate: &mut Option<f64>) {
    if let Some(rate) = nested_number(data.get("exchange_rate"), "to_currency_rate") {
        *exchange_rate = Some(rate);
    }
    if let Some(factor) = number(data.get("current_weekly_depreciation_factor")) {
        valuation.weekly_depreciation_factor = factor;
    }
    if let Some(setup) = data.get("offer_setup") {
        if let Some(cost) = number(setup.get("export_cost_amount")) {
            valuation.export_cost = cost;
        }
        if let Some(gpu) = number(setup.get("target_gpu_amount")) {
            valuation.target_gpu = gpu;
        }
        if let Some(cushion) = number(setup.get("fx_cushion_amount")) {
            valuation.fx_cushion = cushion;
        }
        if let Some(days) = number(setup.get("average_days_in_inventory")) {
            valuation.average_days_in_inventory = days.trunc() as i64;
        }
    }
}

/// Extracts a [`Valuation`] from the exchanges captured while appraising one VIN.
///
/// Fails with [`AppraisalError::MalformedResponse`] when no positive wholesale value or
/// exchange rate could be found.
pub fn parse_valuation(responses: &[CapturedResponse]) -> Result<Valuation, AppraisalError> {
    let mut valuation = Valuation::default();
    let mut exchange_rate = None;
    let mut wholesale = None;

    for response in responses {
        let Some(data) = json_body(response) else {
            continue;
        };
        let url = response.url.as_str();

        if url.contains(DECODE_FRAGMENT) {
            apply_decode(&mut valuation, &data);
        }

        if url.contains(OFFER_FRAGMENT) {
            apply_offer(&mut valuation, &data, &mut exchange_rate);
        }

        if url.contains(WHOLESALE_FRAGMENT) {
            if let Some(value) = data
                .get("wholesale_value_trends")
                .and_then(|trends| nested_number(trends.get("predicted_wholesale_value"), "amount"))
            {
                wholesale = Some(value);
            }
        }
    }

    valuation.us_wholesale_value = wholesale
        .filter(|v| *v > 0.0)
        .ok_or_else(|| {
            AppraisalError::MalformedResponse("predicted wholesale value missing".to_string())
        })?;
    valuation.exchange_rate = exchange_rate.filter(|v| *v > 0.0).ok_or_else(|| {
        AppraisalError::MalformedResponse("exchange rate missing".to_string())
    })?;

    Ok(valuation)
}
