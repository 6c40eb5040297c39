use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-property-class safety threshold delta.
///
/// Invariant enforced by `AegisConfig::validate`: `rail <= construction <= default`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    #[serde(default = "default_delta")]
    pub residential_commercial: f64,
    #[serde(default = "default_construction_delta")]
    pub construction: f64,
    #[serde(default = "default_rail_delta")]
    pub rail: f64,
}

fn default_delta() -> f64 {
    1e-3
}
fn default_construction_delta() -> f64 {
    5e-4
}
fn default_rail_delta() -> f64 {
    1e-4
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            residential_commercial: default_delta(),
            construction: default_construction_delta(),
            rail: default_rail_delta(),
        }
    }
}

impl SafetyThresholds {
    pub fn for_property_class(&self, class: &str) -> f64 {
        match class {
            "rail" => self.rail,
            "construction" => self.construction,
            _ => self.residential_commercial,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.rail <= self.construction && self.construction <= self.residential_commercial
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Default per-source weights for the canonical three-detector setup.
    #[serde(default = "default_detector_weights")]
    pub default_weights: HashMap<String, f64>,
    /// Off-diagonal pairwise correlations for the canonical three-detector Sigma.
    #[serde(default = "default_correlation")]
    pub correlation: [[f64; 3]; 3],
    /// Epistemic variance floor applied even when all detectors agree perfectly.
    #[serde(default = "default_epistemic")]
    pub epistemic_floor: f64,
    /// Variance penalty applied when no evidence is present at all.
    #[serde(default = "default_low_evidence_penalty")]
    pub low_evidence_penalty: f64,
    /// Detector call timeout (seconds).
    #[serde(default = "default_detector_timeout")]
    pub detector_timeout_secs: u64,
    /// Vision/VLM call timeout (seconds).
    #[serde(default = "default_vision_timeout")]
    pub vision_timeout_secs: u64,
    /// Whether a re-estimated empirical correlation matrix may supersede the
    /// documented constants (off by default).
    #[serde(default)]
    pub empirical_correlation: bool,
    /// Whether a GPT/VLM-only fallback is permitted when zero detectors respond.
    #[serde(default)]
    pub gpt_only_fallback: bool,
}

fn default_detector_weights() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("primary_object_detector".to_string(), 0.35);
    m.insert("secondary_masker".to_string(), 0.50);
    m.insert("segmentation".to_string(), 0.15);
    m
}

fn default_correlation() -> [[f64; 3]; 3] {
    [[1.0, 0.31, 0.27], [0.31, 1.0, 0.35], [0.27, 0.35, 1.0]]
}

fn default_epistemic() -> f64 {
    0.01
}
fn default_low_evidence_penalty() -> f64 {
    0.15
}
fn default_detector_timeout() -> u64 {
    7
}
fn default_vision_timeout() -> u64 {
    9
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            default_weights: default_detector_weights(),
            correlation: default_correlation(),
            epistemic_floor: default_epistemic(),
            low_evidence_penalty: default_low_evidence_penalty(),
            detector_timeout_secs: default_detector_timeout(),
            vision_timeout_secs: default_vision_timeout(),
            empirical_correlation: false,
            gpt_only_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_drift_window_days")]
    pub window_days: i64,
    #[serde(default = "default_drift_threshold")]
    pub no_drift_threshold: f64,
    #[serde(default = "default_drift_scale")]
    pub adjustment_scale: f64,
}

fn default_drift_window_days() -> i64 {
    30
}
fn default_drift_threshold() -> f64 {
    0.2
}
fn default_drift_scale() -> f64 {
    0.1
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_days: default_drift_window_days(),
            no_drift_threshold: default_drift_threshold(),
            adjustment_scale: default_drift_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformalConfig {
    /// Target coverage 1 - alpha.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Minimum calibration set size before back-off continues.
    #[serde(default = "default_min_n_cal")]
    pub min_calibration_size: usize,
    /// SSBC small-sample threshold.
    #[serde(default = "default_ssbc_threshold")]
    pub ssbc_sample_threshold: usize,
    /// Recency window (days) for calibration point consumption.
    #[serde(default = "default_recency_days")]
    pub recency_window_days: i64,
}

fn default_alpha() -> f64 {
    0.10
}
fn default_min_n_cal() -> usize {
    50
}
fn default_ssbc_threshold() -> usize {
    100
}
fn default_recency_days() -> i64 {
    365
}

impl Default for ConformalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            min_calibration_size: default_min_n_cal(),
            ssbc_sample_threshold: default_ssbc_threshold(),
            recency_window_days: default_recency_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticConfig {
    /// Ridge regularization applied to A_r/A_s at initialization.
    #[serde(default = "default_ridge")]
    pub ridge_lambda: f64,
    /// Initial exploration scale (alpha_t schedule seed).
    #[serde(default = "default_exploration_alpha")]
    pub exploration_alpha: f64,
    /// Seed-safe-set minimum observation count.
    #[serde(default = "default_seed_safe_n")]
    pub seed_safe_min_n: u64,
    /// Seed-safe-set Wilson upper-bound threshold on the SFN rate.
    #[serde(default = "default_seed_safe_sfn_bound")]
    pub seed_safe_sfn_bound: f64,
    /// Confidence level used by the Wilson upper bound (e.g. 0.95).
    #[serde(default = "default_wilson_confidence")]
    pub wilson_confidence: f64,
}

fn default_ridge() -> f64 {
    1.0
}
fn default_exploration_alpha() -> f64 {
    1.0
}
fn default_seed_safe_n() -> u64 {
    1000
}
fn default_seed_safe_sfn_bound() -> f64 {
    0.005
}
fn default_wilson_confidence() -> f64 {
    0.95
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            ridge_lambda: default_ridge(),
            exploration_alpha: default_exploration_alpha(),
            seed_safe_min_n: default_seed_safe_n(),
            seed_safe_sfn_bound: default_seed_safe_sfn_bound(),
            wilson_confidence: default_wilson_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of memory levels L.
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
    /// Base frequency f^(0) in global steps; level l uses f^(0) * multiplier^l.
    #[serde(default = "default_base_frequency")]
    pub base_frequency: u64,
    #[serde(default = "default_frequency_multiplier")]
    pub frequency_multiplier: u64,
    /// Initial chunk size C^(l), same progression as frequency.
    #[serde(default = "default_base_chunk")]
    pub base_chunk_size: u64,
    #[serde(default = "default_chunk_min")]
    pub chunk_min: u64,
    #[serde(default = "default_chunk_max")]
    pub chunk_max: u64,
    /// Learning rate eta^(l); decays geometrically with level.
    #[serde(default = "default_base_lr")]
    pub base_learning_rate: f64,
    /// Hidden layer width of each level's MLP.
    #[serde(default = "default_hidden_width")]
    pub hidden_width: usize,
    #[serde(default)]
    pub titans_enabled: bool,
    /// Step size for the Titans projection's surprise-driven adjustment,
    /// used only when `titans_enabled` is true.
    #[serde(default = "default_titans_adjustment_rate")]
    pub titans_adjustment_rate: f64,
}

fn default_num_levels() -> usize {
    4
}
fn default_base_frequency() -> u64 {
    1
}
fn default_frequency_multiplier() -> u64 {
    4
}
fn default_base_chunk() -> u64 {
    4
}
fn default_chunk_min() -> u64 {
    1
}
fn default_chunk_max() -> u64 {
    4096
}
fn default_base_lr() -> f64 {
    0.05
}
fn default_hidden_width() -> usize {
    16
}
fn default_titans_adjustment_rate() -> f64 {
    0.01
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            num_levels: default_num_levels(),
            base_frequency: default_base_frequency(),
            frequency_multiplier: default_frequency_multiplier(),
            base_chunk_size: default_base_chunk(),
            chunk_min: default_chunk_min(),
            chunk_max: default_chunk_max(),
            base_learning_rate: default_base_lr(),
            hidden_width: default_hidden_width(),
            titans_enabled: false,
            titans_adjustment_rate: default_titans_adjustment_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveEngineConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    #[serde(default = "default_adaptation_rate")]
    pub adaptation_rate: f64,
}

fn default_window_size() -> usize {
    50
}
fn default_min_observations() -> usize {
    10
}
fn default_trend_threshold() -> f64 {
    0.05
}
fn default_adaptation_rate() -> f64 {
    0.1
}

impl Default for AdaptiveEngineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_observations: default_min_observations(),
            trend_threshold: default_trend_threshold(),
            adaptation_rate: default_adaptation_rate(),
        }
    }
}

/// Top-level configuration, built once at startup and threaded down explicitly
/// as a typed record rather than read ad-hoc from the environment at each call site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AegisConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub conformal: ConformalConfig,
    #[serde(default)]
    pub critic: CriticConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub adaptive: AdaptiveEngineConfig,
    #[serde(default)]
    pub safety_thresholds: SafetyThresholds,
    /// Shadow mode: force every decision to escalate, but still persist the would-be decision.
    #[serde(default)]
    pub shadow_mode: bool,
    /// Whether learned (Continuum Memory) adjustments are applied to the provisional assessment.
    #[serde(default = "default_true")]
    pub learned_features_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AegisConfig {
    /// Validates cross-field invariants that individual `Default` impls can't enforce alone.
    pub fn validate(&self) -> Result<(), String> {
        if !self.safety_thresholds.is_ordered() {
            return Err(
                "safety thresholds must satisfy rail <= construction <= default".to_string(),
            );
        }
        if self.memory.chunk_min > self.memory.chunk_max {
            return Err("memory.chunk_min must be <= memory.chunk_max".to_string());
        }
        if !(0.0..1.0).contains(&self.conformal.alpha) {
            return Err("conformal.alpha must be in (0, 1)".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_safety_thresholds_are_ordered() {
        assert!(SafetyThresholds::default().is_ordered());
    }

    #[test]
    fn default_config_validates() {
        assert!(AegisConfig::default().validate().is_ok());
    }

    #[test]
    fn rail_threshold_is_exactly_1e_minus_4() {
        let t = SafetyThresholds::default();
        assert_eq!(t.for_property_class("rail"), 1e-4);
    }
}
