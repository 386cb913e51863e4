use num_traits::{cast::ToPrimitive, Float, NumCast};
use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
};

/// Assert two float values are the same up to `eps`.
#[allow(dead_code)]
pub fn assert_float_eq<T>(left: T, right: T, eps: T)
where
    T: Float + Display,
{
    if left.is_nan() {
        assert!(right.is_nan(), "left is NaN, but right is not");
    } else {
        let diff = (left - right).abs();
        assert!(
            diff < eps,
            "values |{} - {}| ≥ {} (diff: {})",
            left,
            right,
            eps,
            diff
        );
    }
}

/// Assert two float slices are elementwise the same up to `eps`.
#[allow(dead_code)]
pub fn assert_floats_eq<T>(left: &[T], right: &[T], eps: T)
where
    T: Float + Display,
{
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        assert_float_eq(*l, *r, eps)
    }
}

/// Successive differences, `x[i + 1] - x[i]`.
pub fn diff<T: Float>(x: &[T]) -> Vec<T> {
    x.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// Running sum of `x`, starting from `init`.
pub fn cumsum<T: Float>(x: &[T], init: T) -> Vec<T> {
    x.iter()
        .scan(init, |state, &v| {
            *state = *state + v;
            Some(*state)
        })
        .collect()
}

/// The `q`th quantile of `x`, linearly interpolating between the two closest
/// ranks. Returns `None` for empty input, `q` outside `[0, 1]` or any NaN.
pub fn quantile<T: Float>(x: &[T], q: f64) -> Option<T> {
    if x.is_empty() || !(0.0..=1.0).contains(&q) || x.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = T::from(h - lo as f64)?;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

pub fn median<T: Float>(x: &[T]) -> Option<T> {
    quantile(x, 0.5)
}

pub fn mean<T: Float>(x: &[T]) -> Option<T> {
    if x.is_empty() {
        return None;
    }
    let total = x.iter().fold(T::zero(), |acc, &v| acc + v);
    Some(total / T::from(x.len())?)
}

/// Format `x` as Python's `str()` does: shortest round-trip digits, fixed
/// notation for decimal exponents in `[-4, 16)`, otherwise `e` notation with
/// a signed exponent of at least two digits (`1e-05`).
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    let sign = if x.is_sign_negative() { "-" } else { "" };
    if x.is_infinite() {
        return format!("{}inf", sign);
    }
    let sci = format!("{:e}", x.abs());
    let Some((mantissa, exp)) = sci
        .split_once('e')
        .and_then(|(m, e)| Some((m, e.parse::<i32>().ok()?)))
    else {
        return x.to_string();
    };
    if !(-4..16).contains(&exp) {
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exp.abs());
    }
    let digits: String = mantissa.chars().filter(|&c| c != '.').collect();
    if exp < 0 {
        let zeros = "0".repeat((-exp - 1) as usize);
        return format!("{}0.{}{}", sign, zeros, digits);
    }
    let int_len = exp as usize + 1;
    if digits.len() <= int_len {
        let zeros = "0".repeat(int_len - digits.len());
        format!("{}{}{}.0", sign, digits, zeros)
    } else {
        format!("{}{}.{}", sign, &digits[..int_len], &digits[int_len..])
    }
}

#[derive(Debug, PartialEq)]
pub enum SearchResult {
    Exact(usize),
    LowerBound(usize),
    UpperBound(usize),
    LeftOf(usize),
}

pub fn search_sorted<T: PartialOrd>(vec: &[T], new_val: T) -> SearchResult {
    let mut left = 0;
    let mut right = vec.len();
    while left < right {
        let mid = left + (right - left) / 2;

        match vec[mid].partial_cmp(&new_val) {
            Some(Ordering::Less) => left = mid + 1,
            Some(Ordering::Greater) => right = mid,
            Some(Ordering::Equal) | None => return SearchResult::Exact(mid),
        }
    }

    if left == 0 {
        SearchResult::LowerBound(left)
    } else if left < vec.len() {
        SearchResult::LeftOf(left)
    } else {
        SearchResult::UpperBound(left)
    }
}

/// Piecewise-linear interpolation of `y` over the sorted `x` at `x0`.
///
/// Values outside `x` clamp to the first or last `y`. Returns `None` if
/// `x` is empty, `x0` is NaN or a value can't be represented as `f64`.
pub fn interp1d<Tx, Ty>(x: &[Tx], y: &[Ty], x0: Tx) -> Option<Ty>
where
    Tx: PartialOrd + ToPrimitive + Copy + Debug,
    Ty: ToPrimitive + NumCast + Copy + Debug,
{
    assert!(x.len() == y.len());
    // NaN is the only value not comparable with itself
    if x.is_empty() || x0.partial_cmp(&x0).is_none() {
        return None;
    }
    match search_sorted(x, x0) {
        SearchResult::Exact(idx) => Some(y[idx]),
        SearchResult::LeftOf(idx) => {
            let x1 = ToPrimitive::to_f64(&x[idx - 1])?;
            let x2 = ToPrimitive::to_f64(&x[idx])?;
            let y1 = ToPrimitive::to_f64(&y[idx - 1])?;
            let y2 = ToPrimitive::to_f64(&y[idx])?;
            let x0 = ToPrimitive::to_f64(&x0)?;

            let y0 = y1 + (y2 - y1) * (x0 - x1) / (x2 - x1);

            NumCast::from(y0)
        }
        SearchResult::LowerBound(_) => Some(y[0]),
        SearchResult::UpperBound(idx) => Some(y[idx - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_sorted_empty() {
        let vec: Vec<i32> = vec![];
        assert_eq!(search_sorted(&vec, 5), SearchResult::LowerBound(0));
    }

    #[test]
    fn test_search_sorted_exact_match() {
        let vec = vec![1, 2, 3, 4, 5];
        assert_eq!(search_sorted(&vec, 3), SearchResult::Exact(2));
    }

    #[test]
    fn test_search_sorted_bounds() {
        let vec = vec![10, 20, 30, 40, 50];
        assert_eq!(search_sorted(&vec, 5), SearchResult::LowerBound(0));
        assert_eq!(search_sorted(&vec, 55), SearchResult::UpperBound(5));
        assert_eq!(search_sorted(&vec, 25), SearchResult::LeftOf(2));
    }

    #[test]
    fn test_interp1d_clamps_and_interpolates() {
        let x = vec![0.0, 100.0, 300.0];
        let y = vec![0.0, 1.0, 2.0];
        assert_float_eq(interp1d(&x, &y, 50.0).unwrap(), 0.5, 1e-12);
        assert_float_eq(interp1d(&x, &y, 200.0).unwrap(), 1.5, 1e-12);
        assert_float_eq(interp1d(&x, &y, 100.0).unwrap(), 1.0, 1e-12);
        assert_float_eq(interp1d(&x, &y, -10.0).unwrap(), 0.0, 1e-12);
        assert_float_eq(interp1d(&x, &y, 1e6).unwrap(), 2.0, 1e-12);
        let empty: Vec<f64> = vec![];
        assert!(interp1d(&empty, &empty, 1.0).is_none());
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_float_eq(quantile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.025).unwrap(), 1.1, 1e-12);
        assert!(median::<f64>(&[]).is_none());
        assert!(median(&[1.0, f64::NAN]).is_none());
    }

    #[test]
    fn test_format_float_like_python() {
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(0.01), "0.01");
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(123456.0), "123456.0");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_diff_cumsum_roundtrip() {
        let x = vec![0.5, 1.25, 4.0, 4.0, 10.0];
        let deltas = diff(&x);
        assert_floats_eq(&deltas, &[0.75, 2.75, 0.0, 6.0], 1e-12);
        let rebuilt = cumsum(&deltas, x[0]);
        assert_floats_eq(&rebuilt, &x[1..], 1e-12);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
    }
}
