use crate::errors::AppraisalError;
use serde::{Deserialize, Serialize};

/// Outcome of comparing an export offer with what the vehicle costs to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profitability {
    pub export_value: f64,
    pub profit: f64,
    pub is_profitable: bool,
}

/// Computes profit for a vehicle given its acquisition cost and the portal's offer amount.
///
/// Both amounts must be finite. The acquisition cost must also be non-negative; a negative
/// offer is allowed and means export costs exceed the vehicle's wholesale value.
pub fn evaluate(acquisition_cost: f64, offer_amount: f64) -> Result<Profitability, AppraisalError> {
    check_finite("acquisition cost", acquisition_cost)?;
    check_finite("offer amount", offer_amount)?;
    if acquisition_cost < 0.0 {
        return Err(AppraisalError::InvalidNumber(format!(
            "acquisition cost is negative: {}",
            acquisition_cost
        )));
    }

    let profit = offer_amount - acquisition_cost;
    Ok(Profitability {
        export_value: offer_amount,
        profit,
        is_profitable: profit > 0.0,
    })
}

fn check_finite(label: &str, value: f64) -> Result<(), AppraisalError> {
    if !value.is_finite() {
        return Err(AppraisalError::InvalidNumber(format!(
            "{} is not a finite number",
            label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profitable_vehicle() {
        let p = evaluate(10000.0, 13500.0).unwrap();
        assert_eq!(p.export_value, 13500.0);
        assert_eq!(p.profit, 3500.0);
        assert!(p.is_profitable);
    }

    #[test]
    fn test_break_even_is_not_profitable() {
        let p = evaluate(8000.0, 8000.0).unwrap();
        assert_eq!(p.profit, 0.0);
        assert!(!p.is_profitable);
    }

    #[test]
    fn test_loss() {
        let p = evaluate(20000.0, 15000.0).unwrap();
        assert_eq!(p.profit, -5000.0);
        assert!(!p.is_profitable);
    }

    #[test]
    fn test_negative_offer_is_a_loss() {
        let p = evaluate(5000.0, -750.0).unwrap();
        assert_eq!(p.profit, -5750.0);
        assert!(!p.is_profitable);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(matches!(
            evaluate(f64::NAN, 1.0),
            Err(AppraisalError::InvalidNumber(_))
        ));
        assert!(matches!(
            evaluate(1.0, f64::INFINITY),
            Err(AppraisalError::InvalidNumber(_))
        ));
        assert!(matches!(
            evaluate(-1.0, 1.0),
            Err(AppraisalError::InvalidNumber(_))
        ));
    }
}
