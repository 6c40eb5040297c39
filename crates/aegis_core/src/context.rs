//! Context Feature Service: builds and validates the fixed 12-D context
//! vector consumed by the Safe-LUCB critic.
//!
//! Grounded on `qres_core::cortex::features`'s fixed-width feature-vector
//! builder; the deterministic region hash follows the same string-hashing
//! idiom the teacher uses for partition-key derivation in `packet::routing`.

use crate::types::{ContextVector, CONTEXT_VECTOR_LEN};

/// Raw inputs gathered during assessment, prior to normalization into a
/// `ContextVector`. Field order mirrors the vector's slot ordering.
#[derive(Debug, Clone)]
pub struct RawFeatures {
    pub fusion_confidence: f64,
    pub fusion_variance: f64,
    pub cp_set_size: usize,
    pub safety_critical_candidate: bool,
    pub lighting_quality: f64,
    pub image_clarity: f64,
    pub property_age_years: f64,
    pub num_damage_sites: usize,
    pub detector_disagreement: f64,
    pub ood_score: f64,
    pub region: String,
    pub property_age_years_for_bin: f64,
}

pub struct ContextFeatureService;

impl ContextFeatureService {
    /// Builds the 12-D context vector from raw assessment features.
    pub fn construct(features: &RawFeatures) -> ContextVector {
        let raw = [
            features.fusion_confidence,
            features.fusion_variance,
            features.cp_set_size as f64 / 10.0,
            if features.safety_critical_candidate { 1.0 } else { 0.0 },
            features.lighting_quality,
            features.image_clarity,
            features.property_age_years / 100.0,
            features.num_damage_sites as f64 / 10.0,
            features.detector_disagreement,
            features.ood_score,
            region_hash01(&features.region),
            age_bin_code(features.property_age_years_for_bin),
        ];
        Self::validate(raw).1
    }

    /// Rejects non-finite entries by substituting 0.0, and clamps any
    /// out-of-range entry into `[0, 1]`. Returns `(was_valid, normalized)`.
    pub fn validate(raw: [f64; CONTEXT_VECTOR_LEN]) -> (bool, ContextVector) {
        let mut valid = true;
        let mut out = [0.0; CONTEXT_VECTOR_LEN];
        for (i, &v) in raw.iter().enumerate() {
            if !v.is_finite() {
                valid = false;
                out[i] = 0.0;
                continue;
            }
            let clamped = v.clamp(0.0, 1.0);
            if clamped != v {
                valid = false;
            }
            out[i] = clamped;
        }
        (valid, ContextVector(out))
    }
}

/// Deterministic region encoding: a stable string hash mod 1000, scaled to `[0,1)`.
fn region_hash01(region: &str) -> f64 {
    let mut hash: u64 = 1469598103934665603; // FNV-1a offset basis
    for byte in region.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % 1000) as f64 / 1000.0
}

fn age_bin_code(property_age_years: f64) -> f64 {
    match property_age_years {
        a if a < 0.0 => 0.1,
        a if a <= 20.0 => 0.1,
        a if a <= 50.0 => 0.3,
        a if a <= 100.0 => 0.6,
        _ => 0.9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_features() -> RawFeatures {
        RawFeatures {
            fusion_confidence: 0.88,
            fusion_variance: 0.02,
            cp_set_size: 2,
            safety_critical_candidate: false,
            lighting_quality: 0.7,
            image_clarity: 0.8,
            property_age_years: 35.0,
            num_damage_sites: 1,
            detector_disagreement: 0.05,
            ood_score: 0.1,
            region: "us-west-2".to_string(),
            property_age_years_for_bin: 35.0,
        }
    }

    #[test]
    fn constructed_vector_has_length_12_and_is_valid() {
        let v = ContextFeatureService::construct(&sample_features());
        assert_eq!(v.as_slice().len(), CONTEXT_VECTOR_LEN);
        assert!(v.is_valid());
    }

    #[test]
    fn age_bin_code_matches_fixed_map() {
        assert_eq!(age_bin_code(10.0), 0.1);
        assert_eq!(age_bin_code(35.0), 0.3);
        assert_eq!(age_bin_code(75.0), 0.6);
        assert_eq!(age_bin_code(150.0), 0.9);
    }

    #[test]
    fn region_hash_is_deterministic_and_in_unit_interval() {
        let a = region_hash01("us-west-2");
        let b = region_hash01("us-west-2");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
    }

    #[test]
    fn non_finite_entries_are_rejected_and_zeroed() {
        let mut raw = [0.5; CONTEXT_VECTOR_LEN];
        raw[3] = f64::NAN;
        let (valid, vector) = ContextFeatureService::validate(raw);
        assert!(!valid);
        assert_eq!(vector.as_slice()[3], 0.0);
    }

    #[test]
    fn out_of_range_entries_are_clamped() {
        let mut raw = [0.5; CONTEXT_VECTOR_LEN];
        raw[0] = 1.8;
        raw[1] = -0.3;
        let (valid, vector) = ContextFeatureService::validate(raw);
        assert!(!valid);
        assert_eq!(vector.as_slice()[0], 1.0);
        assert_eq!(vector.as_slice()[1], 0.0);
    }
}
