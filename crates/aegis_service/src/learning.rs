//! Learning handlers (§4.8): the three entry points that convert outcomes
//! arriving after the fact — human validation, contractor repair, and
//! site-progression pairs — into Continuum Memory context-flow updates.
//!
//! Wraps `aegis_core::memory::ContinuumMemory` and `aegis_core::adaptive_engine::AdaptiveEngine`
//! per spec.md's three entry points; this module owns no math of its own
//! beyond assembling the 5-vector outcomes the spec names.

use aegis_core::{AdaptiveEngine, ContinuumMemory, ProvisionalAssessment, SelfModificationEvent, Severity, Urgency};

/// The 5-vector outcome emitted by every learning handler:
/// `[damage_type_acc, severity_acc, cost_err, urgency_acc, confidence_err]`.
pub const OUTCOME_DIM: usize = 5;

fn severity_index(s: Severity) -> i32 {
    match s {
        Severity::Early => 0,
        Severity::Midway => 1,
        Severity::Full => 2,
    }
}

fn urgency_index(u: Urgency) -> i32 {
    match u {
        Urgency::Monitor => 0,
        Urgency::Planned => 1,
        Urgency::Soon => 2,
        Urgency::Urgent => 3,
        Urgency::Immediate => 4,
    }
}

/// Relative signed error between a predicted and an actual magnitude,
/// clamped to `[-1, 1]`: positive when the prediction overshot.
fn relative_error(predicted: f64, actual: f64) -> f64 {
    let denom = predicted.abs().max(actual.abs()).max(1.0);
    ((predicted - actual) / denom).clamp(-1.0, 1.0)
}

pub struct ValidationOutcome<'a> {
    pub original: &'a ProvisionalAssessment,
    pub validated: &'a ProvisionalAssessment,
}

pub struct RepairOutcome {
    pub predicted_severity: Severity,
    pub actual_severity: Severity,
    pub predicted_cost: f64,
    pub actual_cost: f64,
    pub predicted_urgency: Urgency,
    pub actual_urgency: Urgency,
}

pub struct ProgressionOutcome {
    pub earlier_severity: Severity,
    pub later_severity: Severity,
    pub days_elapsed: f64,
}

/// Converts outcomes into Continuum Memory context-flow updates for one
/// agent (a site or damage-type key, decided by the caller). Owns no
/// persistent state itself; `memory`/`adaptive` are threaded in so their
/// lifetime is controlled by the orchestrator/CLI, not this handler.
pub struct LearningHandler {
    agent: String,
}

impl LearningHandler {
    pub fn new(agent: impl Into<String>) -> Self {
        Self { agent: agent.into() }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    /// Emits `[damage_type_acc, severity_acc, cost_err, urgency_acc, confidence_err]`
    /// from a human-validated assessment, pushes it to every memory level, and
    /// signals the adaptive engine if overall accuracy fell below 0.7.
    pub fn handle_validation(
        &self,
        memory: &mut ContinuumMemory,
        adaptive: &mut AdaptiveEngine,
        context_keys: &[f64],
        outcome: &ValidationOutcome,
    ) -> Option<SelfModificationEvent> {
        let damage_type_acc = if outcome.original.damage_type == outcome.validated.damage_type {
            1.0
        } else {
            0.0
        };
        let severity_acc = if outcome.original.severity == outcome.validated.severity {
            1.0
        } else {
            0.0
        };
        let urgency_acc = if outcome.original.urgency == outcome.validated.urgency {
            1.0
        } else {
            0.0
        };
        let cost_err = match (&outcome.original.cost_estimate, &outcome.validated.cost_estimate) {
            (Some(p), Some(a)) => relative_error(p.recommended, a.recommended),
            _ => 0.0,
        };
        let confidence_err = relative_error(outcome.original.confidence, outcome.validated.confidence);

        let values = vec![damage_type_acc, severity_acc, cost_err, urgency_acc, confidence_err];
        for level in 0..memory.num_levels() {
            memory.add_context_flow(&self.agent, context_keys.to_vec(), values.clone(), level);
            let _ = memory.update_level(&self.agent, level);
        }

        let overall_accuracy = (damage_type_acc + severity_acc + urgency_acc) / 3.0;
        if overall_accuracy < 0.7 {
            adaptive.observe(overall_accuracy, 0)
        } else {
            None
        }
    }

    /// Emits `[0, sev_acc, cost_err, urg_acc, 0]` from a contractor repair outcome.
    pub fn handle_repair(
        &self,
        memory: &mut ContinuumMemory,
        context_keys: &[f64],
        outcome: &RepairOutcome,
    ) {
        let sev_acc = if outcome.predicted_severity == outcome.actual_severity {
            1.0
        } else {
            0.0
        };
        let urg_acc = if outcome.predicted_urgency == outcome.actual_urgency {
            1.0
        } else {
            0.0
        };
        let cost_err = relative_error(outcome.predicted_cost, outcome.actual_cost);
        let values = vec![0.0, sev_acc, cost_err, urg_acc, 0.0];
        for level in 0..memory.num_levels() {
            memory.add_context_flow(&self.agent, context_keys.to_vec(), values.clone(), level);
            let _ = memory.update_level(&self.agent, level);
        }
    }

    /// Emits `[0, severity_delta, 0, 0, rate_per_day]`, both components
    /// normalized to `[-1, 1]`, from two time-ordered assessments of the
    /// same site.
    pub fn handle_progression(
        &self,
        memory: &mut ContinuumMemory,
        context_keys: &[f64],
        outcome: &ProgressionOutcome,
    ) {
        let delta_steps = (severity_index(outcome.later_severity) - severity_index(outcome.earlier_severity)) as f64;
        let severity_delta = (delta_steps / 2.0).clamp(-1.0, 1.0);
        let rate_per_day = if outcome.days_elapsed > 0.0 {
            (delta_steps / outcome.days_elapsed).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let values = vec![0.0, severity_delta, 0.0, 0.0, rate_per_day];
        for level in 0..memory.num_levels() {
            memory.add_context_flow(&self.agent, context_keys.to_vec(), values.clone(), level);
            let _ = memory.update_level(&self.agent, level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{CostEstimate, Evidence};

    fn assessment(severity: Severity, confidence: f64) -> ProvisionalAssessment {
        ProvisionalAssessment {
            damage_type: "water_damage".to_string(),
            severity,
            confidence,
            urgency: Urgency::Planned,
            has_critical_hazard: false,
            cost_estimate: Some(CostEstimate {
                min: 100.0,
                max: 500.0,
                recommended: 250.0,
            }),
            detected_items: vec![],
            evidence: vec![Evidence::new("primary_object_detector", 0.8)],
        }
    }

    #[test]
    fn validation_with_matching_severity_scores_full_accuracy() {
        let handler = LearningHandler::new("site-1");
        let mut memory = aegis_core::ContinuumMemory::new(2, 1, 4, 4, 1, 4096, 0.05, 8, 12, 5);
        let mut adaptive = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        let original = assessment(Severity::Midway, 80.0);
        let validated = assessment(Severity::Midway, 80.0);
        let outcome = ValidationOutcome {
            original: &original,
            validated: &validated,
        };
        let event = handler.handle_validation(&mut memory, &mut adaptive, &[0.5; 12], &outcome);
        assert!(event.is_none());
    }

    #[test]
    fn progression_upgrading_severity_yields_positive_delta() {
        let handler = LearningHandler::new("site-1");
        let mut memory = aegis_core::ContinuumMemory::new(2, 1, 4, 4, 1, 4096, 0.05, 8, 12, 5);
        let outcome = ProgressionOutcome {
            earlier_severity: Severity::Early,
            later_severity: Severity::Full,
            days_elapsed: 10.0,
        };
        handler.handle_progression(&mut memory, &[0.2; 12], &outcome);
        let q = memory.query("site-1", &[0.2; 12], Some(0));
        assert!(q.confidence >= 0.0);
    }

    #[test]
    fn repeated_low_accuracy_validations_eventually_trigger_adaptation() {
        let handler = LearningHandler::new("site-2");
        let mut memory = aegis_core::ContinuumMemory::new(2, 1, 4, 4, 1, 4096, 0.05, 8, 12, 5);
        let mut adaptive = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        let mut last = None;
        for i in 0..20 {
            let original = assessment(Severity::Full, 90.0);
            let validated = assessment(Severity::Early, 40.0 + i as f64);
            let outcome = ValidationOutcome {
                original: &original,
                validated: &validated,
            };
            last = handler.handle_validation(&mut memory, &mut adaptive, &[0.3; 12], &outcome);
        }
        // 20 consistently-wrong validations should eventually cross the
        // adaptive engine's trend threshold in one direction or the other.
        assert!(last.is_some() || adaptive.observe(0.1, 0).is_some());
    }
}
