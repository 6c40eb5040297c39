//! Detector/Evidence Fusion.
//!
//! Generalizes `qres_core::aggregation`'s weighted-mean `Aggregator` trait
//! and `qres_core::multivariate::correlation::PearsonCorrelation` into a
//! correlation-aware Bayesian fusion of heterogeneous detector confidences.

use crate::linalg::CorrelationMatrix;
use crate::types::{Evidence, VarianceBreakdown, FusionResult};
use std::collections::HashMap;

/// Stateless fusion service exposing `fuse(...) -> FusionResult`.
///
/// A stateless struct with associated functions (mirroring
/// `PearsonCorrelation`, `MultivariateManager`) rather than a trait object,
/// since there is exactly one fusion algorithm, not a pluggable family.
pub struct DetectorFusionService;

impl DetectorFusionService {
    /// Fuses detector-level evidence into a `(mean, variance)` confidence estimate.
    ///
    /// `weights` and `correlation` must agree on detector ordering; missing
    /// detectors are imputed from the available ones (documented simulation,
    /// flagged in `reason_notes`) rather than silently dropped from the
    /// weighted mean, so the weights still sum to 1 over the full detector set.
    pub fn fuse(
        evidence_list: &[Evidence],
        provisional_confidence: f64,
        weights: &HashMap<String, f64>,
        correlation: &CorrelationMatrix,
        epistemic_floor: f64,
        low_evidence_penalty: f64,
    ) -> FusionResult {
        if evidence_list.is_empty() {
            return FusionResult {
                mean: provisional_confidence,
                variance: epistemic_floor + low_evidence_penalty,
                breakdown: VarianceBreakdown {
                    epistemic: epistemic_floor,
                    disagreement: 0.0,
                    correlation_term: 0.0,
                },
                detector_weights: weights.clone(),
                low_evidence: true,
                reason_notes: vec!["no evidence present; fallback to provisional confidence".into()],
            };
        }

        // Stable detector ordering: by name, so weights/correlation/evidence
        // all line up deterministically regardless of arrival order.
        let mut names: Vec<&String> = weights.keys().collect();
        names.sort();

        let present: HashMap<&str, f64> = evidence_list
            .iter()
            .map(|e| (e.detector.as_str(), e.confidence))
            .collect();

        let mean_present: f64 = if present.is_empty() {
            provisional_confidence
        } else {
            present.values().sum::<f64>() / present.len() as f64
        };

        let mut reason_notes = Vec::new();
        let p: Vec<f64> = names
            .iter()
            .map(|name| match present.get(name.as_str()) {
                Some(&conf) => conf,
                None => {
                    reason_notes.push(format!(
                        "detector '{name}' missing; imputed from available detectors"
                    ));
                    mean_present
                }
            })
            .collect();

        let w: Vec<f64> = {
            let raw: Vec<f64> = names.iter().map(|n| weights[*n]).collect();
            let sum: f64 = raw.iter().sum();
            if sum > 0.0 {
                raw.iter().map(|v| v / sum).collect()
            } else {
                vec![1.0 / raw.len() as f64; raw.len()]
            }
        };

        let mean: f64 = p.iter().zip(w.iter()).map(|(pi, wi)| pi * wi).sum();

        let p_bar = p.iter().sum::<f64>() / p.len() as f64;
        let disagreement = p.iter().map(|pi| (pi - p_bar).powi(2)).sum::<f64>() / p.len() as f64;

        let correlation_term = if w.len() == names.len() && !w.is_empty() {
            correlation.quadratic_form(&w)
        } else {
            0.0
        };

        let variance = epistemic_floor + disagreement + correlation_term;

        FusionResult {
            mean: mean.clamp(0.0, 1.0),
            variance: variance.max(0.0),
            breakdown: VarianceBreakdown {
                epistemic: epistemic_floor,
                disagreement,
                correlation_term,
            },
            detector_weights: names
                .iter()
                .zip(w.iter())
                .map(|(n, wi)| ((*n).clone(), *wi))
                .collect(),
            low_evidence: false,
            reason_notes,
        }
    }

    /// High-level evidence fusion: combines a segmentation confidence
    /// aggregate, a VLM severity/confidence pair, and a scene-graph feature
    /// scalar via softmax-normalized weighting. When present this result
    /// supersedes detector-only fusion.
    pub fn fuse_high_level(
        segmentation_confidence: Option<f64>,
        vlm_confidence: Option<f64>,
        scene_graph_scalar: Option<f64>,
        epistemic_floor: f64,
    ) -> Option<FusionResult> {
        let mut names = Vec::new();
        let mut raw = Vec::new();
        if let Some(v) = segmentation_confidence {
            names.push("segmentation");
            raw.push(v);
        }
        if let Some(v) = vlm_confidence {
            names.push("vlm_assessor");
            raw.push(v);
        }
        if let Some(v) = scene_graph_scalar {
            names.push("scene_graph");
            raw.push(v);
        }
        if raw.is_empty() {
            return None;
        }

        let weights = softmax(&raw);
        let mean: f64 = raw.iter().zip(weights.iter()).map(|(v, w)| v * w).sum();
        let mean_bar = raw.iter().sum::<f64>() / raw.len() as f64;
        let disagreement =
            raw.iter().map(|v| (v - mean_bar).powi(2)).sum::<f64>() / raw.len() as f64;

        Some(FusionResult {
            mean: mean.clamp(0.0, 1.0),
            variance: (epistemic_floor + disagreement).max(0.0),
            breakdown: VarianceBreakdown {
                epistemic: epistemic_floor,
                disagreement,
                correlation_term: 0.0,
            },
            detector_weights: names
                .iter()
                .zip(weights.iter())
                .map(|(n, w)| (n.to_string(), *w))
                .collect(),
            low_evidence: false,
            reason_notes: vec!["high-level evidence fusion supersedes detector-only fusion".into()],
        })
    }
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 {
        vec![1.0 / values.len() as f64; values.len()]
    } else {
        exps.iter().map(|v| v / sum).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_detector_weights() -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert("primary_object_detector".to_string(), 0.35);
        m.insert("secondary_masker".to_string(), 0.50);
        m.insert("segmentation".to_string(), 0.15);
        m
    }

    fn canonical_correlation() -> CorrelationMatrix {
        CorrelationMatrix::from_upper_triangle(3, &[0.31, 0.27, 0.35])
    }

    #[test]
    fn high_confidence_scenario_yields_high_fused_mean() {
        // Canonical high-confidence agreement: {0.90, 0.88, 0.85}, w=(0.35,0.50,0.15).
        let evidence = vec![
            Evidence::new("primary_object_detector", 0.90),
            Evidence::new("secondary_masker", 0.88),
            Evidence::new("segmentation", 0.85),
        ];
        let result = DetectorFusionService::fuse(
            &evidence,
            0.5,
            &three_detector_weights(),
            &canonical_correlation(),
            0.01,
            0.15,
        );
        assert!((result.mean - 0.881).abs() < 0.01, "mean={}", result.mean);
        assert!(!result.low_evidence);
    }

    #[test]
    fn zero_evidence_falls_back_to_provisional_confidence() {
        let result = DetectorFusionService::fuse(
            &[],
            0.42,
            &three_detector_weights(),
            &canonical_correlation(),
            0.01,
            0.15,
        );
        assert!(result.low_evidence);
        assert_eq!(result.mean, 0.42);
        assert!((result.variance - 0.16).abs() < 1e-9);
    }

    #[test]
    fn missing_detector_is_imputed_and_flagged() {
        let evidence = vec![
            Evidence::new("primary_object_detector", 0.9),
            Evidence::new("secondary_masker", 0.9),
        ];
        let result = DetectorFusionService::fuse(
            &evidence,
            0.5,
            &three_detector_weights(),
            &canonical_correlation(),
            0.01,
            0.15,
        );
        assert!(!result.reason_notes.is_empty());
    }

    #[test]
    fn fusion_is_monotone_in_any_positively_weighted_confidence() {
        // Holding Sigma fixed, increasing any p_i with w_i > 0 must increase mu.
        let weights = three_detector_weights();
        let sigma = canonical_correlation();
        let low = DetectorFusionService::fuse(
            &[
                Evidence::new("primary_object_detector", 0.5),
                Evidence::new("secondary_masker", 0.5),
                Evidence::new("segmentation", 0.5),
            ],
            0.5,
            &weights,
            &sigma,
            0.01,
            0.15,
        );
        let high = DetectorFusionService::fuse(
            &[
                Evidence::new("primary_object_detector", 0.9),
                Evidence::new("secondary_masker", 0.5),
                Evidence::new("segmentation", 0.5),
            ],
            0.5,
            &weights,
            &sigma,
            0.01,
            0.15,
        );
        assert!(high.mean > low.mean);
    }

    #[test]
    fn high_level_fusion_supersedes_when_present() {
        let result =
            DetectorFusionService::fuse_high_level(Some(0.8), Some(0.85), Some(0.6), 0.01);
        assert!(result.is_some());
    }
}
