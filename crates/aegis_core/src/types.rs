//! The core data model: evidence, provisional assessments, and the small
//! value objects passed between fusion, MCP, the critic and memory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of detector names.
pub const DETECTOR_NAMES: [&str; 5] = [
    "primary_object_detector",
    "secondary_masker",
    "segmentation",
    "labeler",
    "vlm_assessor",
];

/// The fixed class catalogue used by Mondrian Conformal Prediction.
pub const CLASS_CATALOGUE: [&str; 7] = [
    "cosmetic",
    "water_damage",
    "structural_minor",
    "structural_major",
    "electrical",
    "mold",
    "pest",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Early,
    Midway,
    Full,
}

impl Severity {
    pub fn step_up(self) -> Self {
        match self {
            Severity::Early => Severity::Midway,
            Severity::Midway => Severity::Full,
            Severity::Full => Severity::Full,
        }
    }

    pub fn step_down(self) -> Self {
        match self {
            Severity::Early => Severity::Early,
            Severity::Midway => Severity::Early,
            Severity::Full => Severity::Midway,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Monitor,
    Planned,
    Soon,
    Urgent,
    Immediate,
}

impl Urgency {
    pub fn step_up(self) -> Self {
        match self {
            Urgency::Monitor => Urgency::Planned,
            Urgency::Planned => Urgency::Soon,
            Urgency::Soon => Urgency::Urgent,
            Urgency::Urgent => Urgency::Immediate,
            Urgency::Immediate => Urgency::Immediate,
        }
    }

    pub fn step_down(self) -> Self {
        match self {
            Urgency::Monitor => Urgency::Monitor,
            Urgency::Planned => Urgency::Monitor,
            Urgency::Soon => Urgency::Planned,
            Urgency::Urgent => Urgency::Soon,
            Urgency::Immediate => Urgency::Urgent,
        }
    }
}

/// A single per-instance score/box pair reported by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceScore {
    pub score: f64,
    pub bbox: Option<(f64, f64, f64, f64)>,
}

/// Evidence reported by one detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub detector: String,
    pub confidence: f64,
    pub instance_count: usize,
    pub instances: Vec<InstanceScore>,
}

impl Evidence {
    pub fn new(detector: impl Into<String>, confidence: f64) -> Self {
        Self {
            detector: detector.into(),
            confidence: confidence.clamp(0.0, 1.0),
            instance_count: 0,
            instances: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub min: f64,
    pub max: f64,
    pub recommended: f64,
}

/// An immutable value object describing the provisional (pre-decision) assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionalAssessment {
    pub damage_type: String,
    pub severity: Severity,
    pub confidence: f64,
    pub urgency: Urgency,
    pub has_critical_hazard: bool,
    pub cost_estimate: Option<CostEstimate>,
    pub detected_items: Vec<String>,
    pub evidence: Vec<Evidence>,
}

impl ProvisionalAssessment {
    /// Applies a continuum-memory adjustment, nudging severity/urgency and
    /// scaling the cost estimate when the adjustment magnitude is large enough
    /// to cross the step threshold.
    pub fn with_memory_adjustment(mut self, adj: f64) -> Self {
        let adj = adj.clamp(-1.0, 1.0);
        if adj.abs() > 0.3 {
            self.severity = if adj > 0.0 {
                self.severity.step_up()
            } else {
                self.severity.step_down()
            };
            self.urgency = if adj > 0.0 {
                self.urgency.step_up()
            } else {
                self.urgency.step_down()
            };
        }
        if let Some(cost) = &mut self.cost_estimate {
            let scale = 1.0 + 0.5 * adj;
            cost.min *= scale;
            cost.max *= scale;
            cost.recommended *= scale;
        }
        self.confidence = (self.confidence + 20.0 * adj).clamp(0.0, 100.0);
        self
    }
}

/// Per-source variance breakdown attached to a `FusionResult`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VarianceBreakdown {
    pub epistemic: f64,
    pub disagreement: f64,
    pub correlation_term: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub mean: f64,
    pub variance: f64,
    pub breakdown: VarianceBreakdown,
    pub detector_weights: HashMap<String, f64>,
    pub low_evidence: bool,
    pub reason_notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformalResult {
    pub stratum: String,
    pub quantile: f64,
    pub prediction_set: Vec<String>,
    pub alpha_prime: f64,
    pub n_calibration: usize,
}

/// One labeled calibration observation. Append-only; consumers
/// should bound consumption by a recency window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub true_class: String,
    pub true_probability: f64,
    pub nonconformity_score: f64,
    pub importance_weight: f64,
    pub stratum_key: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A single (property_type, age_bin, region) observation used by the seed-safe gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalObservation {
    pub safety_false_negative: bool,
}

/// Fixed length 12 context vector. Construction always goes through
/// `validate`, which clamps out-of-range entries and rejects non-finite ones.
pub const CONTEXT_VECTOR_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextVector(pub [f64; CONTEXT_VECTOR_LEN]);

impl ContextVector {
    pub fn as_slice(&self) -> &[f64; CONTEXT_VECTOR_LEN] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Automate,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub reason: String,
    pub safety_ucb: f64,
    pub reward_ucb: f64,
    pub safety_threshold: f64,
    pub exploration: bool,
    pub stratum: String,
    pub prediction_set: Vec<String>,
    pub fusion_mean: f64,
    pub fusion_variance: f64,
    pub context_vector: ContextVector,
    pub shadow: bool,
    pub timing_ms: u64,
}
