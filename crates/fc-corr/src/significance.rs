//! p-values for the two association measures.

use statrs::distribution::{Beta, ChiSquared, ContinuousCDF};

/// Two-sided p-value of a linear correlation coefficient `r` computed from
/// `valid_count` jointly present rows.
///
/// Under independence `(r + 1) / 2` follows `Beta(n/2 - 1, n/2 - 1)`. The
/// distribution is undefined for `n <= 2`, which yields NaN.
#[must_use]
pub fn linear_correlation_p_value(r: f64, valid_count: u64) -> f64 {
    if r.is_nan() {
        return f64::NAN;
    }
    let shape = valid_count as f64 / 2.0 - 1.0;
    if shape <= 0.0 {
        return f64::NAN;
    }
    Beta::new(shape, shape).map_or(f64::NAN, |dist| {
        (2.0 * dist.cdf(0.5 * (1.0 - r.abs()))).clamp(0.0, 1.0)
    })
}

/// Upper tail probability of the chi-squared distribution.
#[must_use]
pub fn chi_squared_p_value(statistic: f64, degrees_of_freedom: u64) -> f64 {
    if statistic.is_nan() || degrees_of_freedom == 0 {
        return f64::NAN;
    }
    ChiSquared::new(degrees_of_freedom as f64).map_or(f64::NAN, |dist| {
        (1.0 - dist.cdf(statistic)).clamp(0.0, 1.0)
    })
}
