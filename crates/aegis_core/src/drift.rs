//! Drift monitor: detects seasonal/material/temporal shifts between two
//! assessment windows and proposes an additive fusion-weight adjustment.
//!
//! Grounded on `qres_core`'s `RegimeChange::Drift` detection in the
//! adaptive module, generalized from a single compression-regime signal
//! into a typed three-way drift classification over assessment rate windows.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftType {
    Seasonal,
    Material,
    Temporal,
    None,
}

#[derive(Debug, Clone)]
pub struct DriftReport {
    pub has_drift: bool,
    pub drift_type: DriftType,
    pub score: f64,
    pub weight_delta: HashMap<String, f64>,
}

/// One assessment window's observed rate of a property/region-filtered event
/// (e.g. a particular damage class), used to compare recent vs historical activity.
#[derive(Debug, Clone, Copy)]
pub struct WindowRate {
    pub rate: f64,
}

pub struct DriftMonitor {
    pub no_drift_threshold: f64,
    pub adjustment_scale: f64,
}

impl DriftMonitor {
    pub fn new(no_drift_threshold: f64, adjustment_scale: f64) -> Self {
        Self {
            no_drift_threshold,
            adjustment_scale,
        }
    }

    /// Compares a recent 30-day window against the preceding non-overlapping
    /// 30-day window and classifies drift, producing a per-detector weight delta.
    pub fn detect(
        &self,
        recent: WindowRate,
        historical: WindowRate,
        candidate_type: DriftType,
    ) -> DriftReport {
        let score = if historical.rate == 0.0 {
            if recent.rate == 0.0 {
                0.0
            } else {
                1.0
            }
        } else {
            ((recent.rate - historical.rate) / historical.rate).abs().min(1.0)
        };

        if score < self.no_drift_threshold {
            return DriftReport {
                has_drift: false,
                drift_type: DriftType::None,
                score,
                weight_delta: HashMap::new(),
            };
        }

        let magnitude = score * self.adjustment_scale;
        let weight_delta = match candidate_type {
            // Wet seasons favor the secondary masker, which better tracks
            // water-intrusion patterns than the primary object detector.
            DriftType::Seasonal => HashMap::from([
                ("secondary_masker".to_string(), magnitude),
                ("primary_object_detector".to_string(), -magnitude / 2.0),
            ]),
            // Novel materials favor segmentation, which degrades more gracefully
            // than a closed-set object detector on unfamiliar textures.
            DriftType::Material => HashMap::from([
                ("segmentation".to_string(), magnitude),
                ("primary_object_detector".to_string(), -magnitude),
            ]),
            // Temporal drift rebalances conservatively: a small uniform shift
            // toward the detector with the most stable historical precision.
            DriftType::Temporal => HashMap::from([
                ("secondary_masker".to_string(), magnitude / 2.0),
                ("segmentation".to_string(), magnitude / 2.0),
                ("primary_object_detector".to_string(), -magnitude),
            ]),
            DriftType::None => HashMap::new(),
        };

        DriftReport {
            has_drift: true,
            drift_type: candidate_type,
            score,
            weight_delta,
        }
    }

    /// Applies a drift report's weight delta to a base weight map, clamping
    /// to `[0, 1]` and renormalizing so the result sums to 1.
    pub fn apply_adjustment(
        base_weights: &HashMap<String, f64>,
        report: &DriftReport,
    ) -> HashMap<String, f64> {
        if !report.has_drift {
            return base_weights.clone();
        }
        let mut adjusted: HashMap<String, f64> = base_weights
            .iter()
            .map(|(k, v)| {
                let delta = report.weight_delta.get(k).copied().unwrap_or(0.0);
                (k.clone(), (v + delta).clamp(0.0, 1.0))
            })
            .collect();
        let total: f64 = adjusted.values().sum();
        if total > 0.0 {
            for v in adjusted.values_mut() {
                *v /= total;
            }
        }
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_detector_weights() -> HashMap<String, f64> {
        HashMap::from([
            ("primary_object_detector".to_string(), 0.35),
            ("secondary_masker".to_string(), 0.50),
            ("segmentation".to_string(), 0.15),
        ])
    }

    #[test]
    fn small_rate_change_is_not_drift() {
        let monitor = DriftMonitor::new(0.2, 0.1);
        let report = monitor.detect(
            WindowRate { rate: 0.21 },
            WindowRate { rate: 0.20 },
            DriftType::Seasonal,
        );
        assert!(!report.has_drift);
        assert_eq!(report.drift_type, DriftType::None);
    }

    #[test]
    fn large_rate_change_triggers_drift_and_weight_shift() {
        let monitor = DriftMonitor::new(0.2, 0.1);
        let report = monitor.detect(
            WindowRate { rate: 0.5 },
            WindowRate { rate: 0.2 },
            DriftType::Seasonal,
        );
        assert!(report.has_drift);
        assert_eq!(report.drift_type, DriftType::Seasonal);
        assert!(report.weight_delta["secondary_masker"] > 0.0);
    }

    #[test]
    fn adjusted_weights_remain_normalized() {
        let monitor = DriftMonitor::new(0.2, 0.1);
        let report = monitor.detect(
            WindowRate { rate: 0.9 },
            WindowRate { rate: 0.2 },
            DriftType::Material,
        );
        let adjusted = DriftMonitor::apply_adjustment(&three_detector_weights(), &report);
        let sum: f64 = adjusted.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for v in adjusted.values() {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn zero_historical_rate_with_zero_recent_is_not_drift() {
        let monitor = DriftMonitor::new(0.2, 0.1);
        let report = monitor.detect(
            WindowRate { rate: 0.0 },
            WindowRate { rate: 0.0 },
            DriftType::Temporal,
        );
        assert!(!report.has_drift);
    }
}
