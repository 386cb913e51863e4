//! Choosing the matching precision.
//!
//! The engine's Li & Stephens style matcher rounds its probabilities to a
//! fixed number of decimal places. Too few places and small recombination or
//! mutation probabilities underflow; too many and matching slows down. The
//! precision is taken from the magnitude of the smallest recombination
//! probability and the smallest per-site mutation probability, plus a margin.

use crate::error::InferError;
use crate::rates::RateArray;

/// Decimal places kept beyond the smallest observed magnitude.
pub const PRECISION_MARGIN: u32 = 3;

/// Number of leading zero decimal places of `p`, never negative.
fn leading_zero_digits(p: f64) -> u32 {
    (-p.log10()).ceil().max(0.0) as u32
}

/// The precision to match with.
///
/// An explicit `precision` is returned unchanged. Otherwise the result is
/// `max(ceil(-log10(min rate)), ceil(-log10(min(1, ma_mut, ms_mut) × median rate))) + 3`,
/// where rates exclude the leading sentinel. Zero, negative or non-finite
/// rates and non-positive multipliers are rejected, since they have no
/// logarithm.
pub fn select_precision(
    rates: &RateArray,
    ma_mut_rate: f64,
    ms_mut_rate: f64,
    precision: Option<u32>,
) -> Result<u32, InferError> {
    if let Some(precision) = precision {
        return Ok(precision);
    }

    for (name, multiplier) in [("ancestor", ma_mut_rate), ("sample", ms_mut_rate)] {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(InferError::degeneracy(format!(
                "{} matching mutation rate multiplier must be positive, got {}",
                name, multiplier
            )));
        }
    }
    let interval_rates = rates.interval_rates();
    if let Some((i, &rate)) = interval_rates
        .iter()
        .enumerate()
        .find(|&(_, &r)| !r.is_finite() || r <= 0.0)
    {
        return Err(InferError::degeneracy(format!(
            "recombination rate {} at site {} has no logarithm; \
             sites may share a genetic map position (set a minimum rate to floor it)",
            rate,
            i + 1
        )));
    }
    let (_, min_rate) = rates
        .min()
        .ok_or_else(|| InferError::degeneracy("fewer than two inference sites, no rates"))?;
    let median_rate = rates
        .median()
        .ok_or_else(|| InferError::degeneracy("no median recombination rate"))?;

    let min_rho_digits = leading_zero_digits(min_rate);
    let min_mut_digits = leading_zero_digits(1f64.min(ma_mut_rate).min(ms_mut_rate) * median_rate);
    log::debug!(
        "precision digits: recombination {}, mutation {}",
        min_rho_digits,
        min_mut_digits
    );
    Ok(min_rho_digits.max(min_mut_digits) + PRECISION_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(values: &[f64]) -> RateArray {
        RateArray::from_interval_rates(values)
    }

    #[test]
    fn test_override_is_returned_unchanged() {
        // would be degenerate if computed
        let r = rates(&[0.0, 0.1]);
        assert_eq!(select_precision(&r, 0.1, 0.01, Some(2)).unwrap(), 2);
        assert_eq!(select_precision(&r, 0.1, 0.01, Some(0)).unwrap(), 0);
    }

    #[test]
    fn test_known_values() {
        // smallest rate 2.5e-6 → 6 digits; 0.01 × median 2e-4 = 2e-6 → 6 digits
        let r = rates(&[2.5e-6, 2e-4, 3e-3]);
        assert_eq!(select_precision(&r, 0.1, 0.01, None).unwrap(), 9);

        // mutation term dominates: 0.001 × median 0.5 = 5e-4 → 4 digits
        let r = rates(&[0.2, 0.5, 0.9]);
        assert_eq!(select_precision(&r, 0.001, 0.5, None).unwrap(), 4 + PRECISION_MARGIN);

        // five sites spread over 10kb, physical distances
        let r = rates(&[0.01, 0.04, 0.15, 0.7999]);
        assert_eq!(select_precision(&r, 0.1, 0.01, None).unwrap(), 4 + PRECISION_MARGIN);
    }

    #[test]
    fn test_at_least_margin() {
        let r = rates(&[1.0, 2.5, 40.0]);
        assert_eq!(select_precision(&r, 5.0, 3.0, None).unwrap(), PRECISION_MARGIN);
        let r = rates(&[0.9]);
        assert!(select_precision(&r, 1.0, 1.0, None).unwrap() >= PRECISION_MARGIN);
    }

    #[test]
    fn test_monotone_as_rates_shrink() {
        let base = [3e-3, 4e-4, 7e-2, 1e-3];
        let mut last = 0;
        for step in 0..12 {
            let scale = 10f64.powi(-step);
            let shrunk: Vec<f64> = base.iter().map(|r| r * scale).collect();
            let p = select_precision(&rates(&shrunk), 0.1, 0.01, None).unwrap();
            assert!(p >= PRECISION_MARGIN);
            assert!(p >= last, "precision fell from {} to {} at step {}", last, p, step);
            last = p;
        }

        // shrinking one rate only
        let mut values = base.to_vec();
        let mut last = 0;
        for _ in 0..10 {
            values[1] /= 7.0;
            let p = select_precision(&rates(&values), 0.1, 0.01, None).unwrap();
            assert!(p >= last);
            last = p;
        }

        // shrinking a multiplier
        let mut last = 0;
        for step in 0..10 {
            let ms = 0.3 * 10f64.powi(-step);
            let p = select_precision(&rates(&base), 0.1, ms, None).unwrap();
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        let zero = rates(&[0.1, 0.0, 0.3]);
        match select_precision(&zero, 0.1, 0.01, None) {
            Err(InferError::NumericDegeneracy(msg)) => assert!(msg.contains("site 2")),
            other => panic!("expected degeneracy, got {:?}", other),
        }
        assert!(matches!(
            select_precision(&rates(&[0.1, -0.2]), 0.1, 0.01, None),
            Err(InferError::NumericDegeneracy(_))
        ));
        assert!(matches!(
            select_precision(&rates(&[0.1, f64::NAN]), 0.1, 0.01, None),
            Err(InferError::NumericDegeneracy(_))
        ));
        assert!(matches!(
            select_precision(&rates(&[0.1]), 0.0, 0.01, None),
            Err(InferError::NumericDegeneracy(_))
        ));
        assert!(matches!(
            select_precision(&rates(&[]), 0.1, 0.01, None),
            Err(InferError::NumericDegeneracy(_))
        ));
        // floored rates are accepted
        let floored = zero.with_floor(2e-10);
        assert_eq!(select_precision(&floored, 0.1, 0.01, None).unwrap(), 10 + PRECISION_MARGIN);
    }
}
