//! Mondrian Conformal Prediction: hierarchical stratum back-off, the
//! Small-Sample Beta Correction, and weighted nonconformity quantiles.
//!
//! Grounded on `qres_core::multivariate::manager`'s stratified statistics
//! maps (it keys rolling stats by sensor group the way this keys calibration
//! sets by property/age/region/damage); the incomplete-beta solver is new,
//! written in the teacher's hand-rolled numeric idiom (see `wilson.rs`).

use crate::types::{CalibrationPoint, ConformalResult, CLASS_CATALOGUE};
use std::collections::HashMap;

/// A stratum key in back-off order: (property_type, age_bin, region, damage).
#[derive(Debug, Clone)]
pub struct StratumKey {
    pub property_type: Option<String>,
    pub age_bin: Option<String>,
    pub region: Option<String>,
    pub damage: Option<String>,
}

impl StratumKey {
    pub fn full(property_type: &str, age_bin: &str, region: &str, damage: &str) -> Self {
        Self {
            property_type: Some(property_type.to_string()),
            age_bin: Some(age_bin.to_string()),
            region: Some(region.to_string()),
            damage: Some(damage.to_string()),
        }
    }

    fn to_key_string(&self) -> String {
        let parts = [
            self.property_type.as_deref().unwrap_or("*"),
            self.age_bin.as_deref().unwrap_or("*"),
            self.region.as_deref().unwrap_or("*"),
            self.damage.as_deref().unwrap_or("*"),
        ];
        if parts.iter().all(|p| *p == "*") {
            "global".to_string()
        } else {
            parts.join("_")
        }
    }

    /// Back-off order: drop damage, then region, then age_bin, then property_type, then "global".
    fn back_off_chain(&self) -> Vec<StratumKey> {
        let mut chain = vec![self.clone()];
        let mut cur = self.clone();
        if cur.damage.take().is_some() {
            chain.push(cur.clone());
        }
        if cur.region.take().is_some() {
            chain.push(cur.clone());
        }
        if cur.age_bin.take().is_some() {
            chain.push(cur.clone());
        }
        if cur.property_type.take().is_some() {
            chain.push(cur.clone());
        }
        chain
    }
}

/// A calibration store keyed by stratum string; the caller (repository layer)
/// is responsible for populating and persisting this.
pub type CalibrationStore = HashMap<String, Vec<CalibrationPoint>>;

pub struct MondrianConformalPredictor {
    pub alpha: f64,
    pub min_calibration_size: usize,
    pub ssbc_sample_threshold: usize,
}

impl MondrianConformalPredictor {
    pub fn new(alpha: f64, min_calibration_size: usize, ssbc_sample_threshold: usize) -> Self {
        Self {
            alpha,
            min_calibration_size,
            ssbc_sample_threshold,
        }
    }

    /// Produces a `ConformalResult` for the fused confidence `mu`, backing off
    /// through strata until a calibration set of sufficient size is found.
    /// On calibration-store failure, the caller should construct the maximally
    /// conservative fallback directly rather than calling this.
    pub fn predict(
        &self,
        mu: f64,
        provisional_damage_class: &str,
        key: &StratumKey,
        store: &CalibrationStore,
    ) -> ConformalResult {
        for candidate in key.back_off_chain() {
            let stratum = candidate.to_key_string();
            if let Some(points) = store.get(&stratum) {
                if points.len() >= self.min_calibration_size {
                    return self.predict_in_stratum(mu, provisional_damage_class, &stratum, points);
                }
            }
        }
        // No stratum reached the minimum size; fall back to global with
        // whatever points exist there (possibly empty).
        let empty = Vec::new();
        let global_points = store.get("global").unwrap_or(&empty);
        self.predict_in_stratum(mu, provisional_damage_class, "global", global_points)
    }

    fn predict_in_stratum(
        &self,
        mu: f64,
        provisional_damage_class: &str,
        stratum: &str,
        points: &[CalibrationPoint],
    ) -> ConformalResult {
        let n_cal = points.len();
        let alpha_prime = small_sample_beta_correction(self.alpha, n_cal, self.ssbc_sample_threshold);
        let quantile = if points.is_empty() {
            1.0
        } else {
            weighted_nonconformity_quantile(points, alpha_prime)
        };

        // Per-class score uses (1 - mu) uniformly: a documented simplification
        // of true per-class probabilistic scoring.
        let per_class_score = 1.0 - mu;
        let mut prediction_set: Vec<String> = CLASS_CATALOGUE
            .iter()
            .filter(|_| per_class_score <= quantile)
            .map(|c| c.to_string())
            .collect();

        if prediction_set.is_empty() {
            prediction_set.push(provisional_damage_class.to_string());
        }

        ConformalResult {
            stratum: stratum.to_string(),
            quantile,
            prediction_set,
            alpha_prime,
            n_calibration: n_cal,
        }
    }

    /// Maximally conservative fallback used when the calibration store is unavailable.
    pub fn fallback(provisional_damage_class: &str) -> ConformalResult {
        let _ = provisional_damage_class;
        ConformalResult {
            stratum: "global".to_string(),
            quantile: 1.0,
            prediction_set: CLASS_CATALOGUE.iter().map(|c| c.to_string()).collect(),
            alpha_prime: 1.0,
            n_calibration: 0,
        }
    }
}

/// Computes the weighted `(1 - alpha')` quantile of nonconformity scores.
/// Points are sorted by score ascending; the result is the first score whose
/// cumulative importance weight reaches `(1 - alpha') * total_weight`.
fn weighted_nonconformity_quantile(points: &[CalibrationPoint], alpha_prime: f64) -> f64 {
    let mut sorted: Vec<&CalibrationPoint> = points.iter().collect();
    sorted.sort_by(|a, b| {
        a.nonconformity_score
            .partial_cmp(&b.nonconformity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let total_weight: f64 = sorted.iter().map(|p| p.importance_weight).sum();
    if total_weight <= 0.0 {
        return 1.0;
    }
    let target = (1.0 - alpha_prime) * total_weight;
    let mut cumulative = 0.0;
    for point in &sorted {
        cumulative += point.importance_weight;
        if cumulative >= target {
            return point.nonconformity_score;
        }
    }
    sorted.last().map(|p| p.nonconformity_score).unwrap_or(1.0)
}

/// Small-Sample Beta Correction: for small calibration sets, widens alpha to
/// alpha' = BetaInv(1 - alpha; n_cal + 1, 1), which has the closed form
/// `(1 - alpha)^(1 / (n_cal + 1))` for a Beta(a, 1) distribution.
pub fn small_sample_beta_correction(alpha: f64, n_cal: usize, sample_threshold: usize) -> f64 {
    if n_cal >= sample_threshold {
        return alpha;
    }
    (1.0 - alpha).powf(1.0 / (n_cal as f64 + 1.0))
}

/// General inverse regularized incomplete beta function via Newton-Raphson,
/// used when a Beta(a, b) shape parameter other than b=1 is required by a
/// future calibration scheme. Converges within 50 iterations or tolerance 1e-6.
pub fn inverse_regularized_incomplete_beta(p: f64, a: f64, b: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }
    let mut x = if a > 1.0 && b > 1.0 {
        // Initial guess via the normal approximation; falls back to the
        // midpoint when the refinement below pushes it out of [0, 1].
        let pp = if p < 0.5 { p } else { 1.0 - p };
        let t = (-2.0 * pp.ln()).sqrt();
        let guess = t - (2.30753 + 0.27061 * t) / (1.0 + (0.99229 + 0.04481 * t) * t);
        let guess = if p < 0.5 { -guess } else { guess };
        let mean = a / (a + b);
        (mean + guess * 0.1).clamp(1e-6, 1.0 - 1e-6)
    } else {
        0.5
    };

    for _ in 0..50 {
        let f = regularized_incomplete_beta(x, a, b) - p;
        if f.abs() < 1e-6 {
            break;
        }
        let density = beta_density(x, a, b);
        if density.abs() < 1e-12 {
            break;
        }
        let step = f / density;
        let mut next = x - step;
        if !next.is_finite() || !(0.0..1.0).contains(&next) {
            next = (x + if f > 0.0 { 0.0 } else { 1.0 }) / 2.0;
        }
        if (next - x).abs() < 1e-9 {
            x = next;
            break;
        }
        x = next;
    }
    x.clamp(0.0, 1.0)
}

fn beta_density(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return 0.0;
    }
    ((a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - log_beta_function(a, b)).exp()
}

/// Regularized incomplete beta function `I_x(a, b)` via a continued-fraction
/// expansion (Lentz's algorithm), the standard numeric recipe for this integral.
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let log_beta = log_beta_function(a, b);
    let front = (a * x.ln() + b * (1.0 - x).ln() - log_beta).exp() / a;

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b)
    } else {
        1.0 - (1.0 - x) * ((b * (1.0 - x).ln() + a * x.ln() - log_beta).exp() / b)
            * beta_continued_fraction(1.0 - x, b, a)
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-12;
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < EPS {
        d = EPS;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..MAX_ITER {
        let m_f = m as f64;
        let m2 = 2.0 * m_f;

        let aa = m_f * (b - m_f) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < EPS {
            d = EPS;
        }
        c = 1.0 + aa / c;
        if c.abs() < EPS {
            c = EPS;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m_f) * (qab + m_f) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < EPS {
            d = EPS;
        }
        c = 1.0 + aa / c;
        if c.abs() < EPS {
            c = EPS;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < 1e-10 {
            break;
        }
    }
    h
}

/// log Beta function via Stirling's approximation of log-Gamma, bounded to
/// converge within the same tolerance used by the quantile solver above.
fn log_beta_function(a: f64, b: f64) -> f64 {
    log_gamma(a) + log_gamma(b) - log_gamma(a + b)
}

fn log_gamma(x: f64) -> f64 {
    // Lanczos approximation (a refinement of Stirling's series) with the
    // standard g=7, n=9 coefficient table.
    const COEFFS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    if x < 0.5 {
        // Reflection formula.
        return (std::f64::consts::PI / (std::f64::consts::PI * x).sin()).ln() - log_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEFFS[0];
    let t = x + 7.5;
    for (i, coeff) in COEFFS.iter().enumerate().skip(1) {
        a += coeff / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(score: f64, weight: f64) -> CalibrationPoint {
        CalibrationPoint {
            true_class: "water_damage".to_string(),
            true_probability: 1.0 - score,
            nonconformity_score: score,
            importance_weight: weight,
            stratum_key: "global".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ssbc_closed_form_matches_power_formula() {
        let alpha_prime = small_sample_beta_correction(0.10, 40, 100);
        let expected = (0.90f64).powf(1.0 / 41.0);
        assert!((alpha_prime - expected).abs() < 1e-12);
    }

    #[test]
    fn ssbc_is_unchanged_above_sample_threshold() {
        let alpha_prime = small_sample_beta_correction(0.10, 150, 100);
        assert_eq!(alpha_prime, 0.10);
    }

    #[test]
    fn back_off_chain_drops_fields_in_documented_order() {
        let key = StratumKey::full("residential", "20-50", "us-west-2", "water_damage");
        let chain: Vec<String> = key.back_off_chain().iter().map(|k| k.to_key_string()).collect();
        assert_eq!(chain.last().unwrap(), "global");
        assert_eq!(chain.len(), 5);
    }

    #[test]
    fn predict_falls_back_to_global_when_no_stratum_has_enough_points() {
        let predictor = MondrianConformalPredictor::new(0.10, 50, 100);
        let mut store = CalibrationStore::new();
        store.insert("global".to_string(), vec![point(0.1, 1.0); 60]);
        let key = StratumKey::full("residential", "20-50", "us-west-2", "water_damage");
        let result = predictor.predict(0.9, "water_damage", &key, &store);
        assert_eq!(result.stratum, "global");
        assert_eq!(result.n_calibration, 60);
    }

    #[test]
    fn empty_store_falls_back_gracefully_with_conservative_quantile() {
        let predictor = MondrianConformalPredictor::new(0.10, 50, 100);
        let store = CalibrationStore::new();
        let key = StratumKey::full("residential", "20-50", "us-west-2", "water_damage");
        let result = predictor.predict(0.9, "water_damage", &key, &store);
        assert_eq!(result.quantile, 1.0);
        assert!(!result.prediction_set.is_empty());
    }

    #[test]
    fn empty_prediction_set_falls_back_to_provisional_class() {
        let predictor = MondrianConformalPredictor::new(0.10, 50, 100);
        let mut store = CalibrationStore::new();
        // All scores near 1.0 with a tiny quantile keeps every class out of range.
        store.insert(
            "global".to_string(),
            (0..60).map(|_| point(0.999, 1.0)).collect(),
        );
        let key = StratumKey::full("residential", "20-50", "us-west-2", "water_damage");
        let result = predictor.predict(0.99, "structural_minor", &key, &store);
        assert!(result.prediction_set.contains(&"structural_minor".to_string()));
    }

    #[test]
    fn incomplete_beta_inverse_roundtrips_through_forward_function() {
        let x = inverse_regularized_incomplete_beta(0.5, 2.0, 3.0);
        let back = regularized_incomplete_beta(x, 2.0, 3.0);
        assert!((back - 0.5).abs() < 1e-4);
    }
}
