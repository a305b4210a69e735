//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Convert i64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn i64_to_f64(value: i64) -> f64 {
    cast::<i64, f64>(value).unwrap_or(0.0)
}

/// Convert usize to f64 while allowing precision loss in a single location.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    cast::<usize, f64>(value).unwrap_or(0.0)
}

/// Round to a fixed number of decimal places, returning 0.0 for non-finite values.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

/// Percentage of `part` in `total`, rounded to one decimal; zero when `total` is zero.
#[must_use]
pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(usize_to_f64(part) / usize_to_f64(total) * 100.0, 1)
}

/// Exact integral value of a JSON-style float, if it has one inside the i64 range.
#[must_use]
pub fn f64_to_exact_i64(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    cast::<f64, i64>(value)
}
