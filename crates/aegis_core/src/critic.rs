//! Safe-LUCB Critic: a per-(arm, stratum) contextual linear bandit that
//! gates automation behind a safety upper confidence bound and a seed-safe
//! historical-validation check.
//!
//! Generalizes `qres_core::cortex::linear::LinearNeuron` (a single fixed
//! 8-weight predictor) into a full ridge-regularized linear bandit over the
//! 12-D context vector, with two UCBs (reward, safety) instead of one scalar
//! output. The seed-safe gate reuses `wilson::wilson_upper_bound`.

use crate::error::{AegisError, AegisResult};
use crate::linalg::{SymmetricMatrix, DIM};
use crate::types::{ContextVector, Decision};
use crate::wilson::wilson_upper_bound;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm {
    Automate,
    Escalate,
}

impl Arm {
    fn name(self) -> &'static str {
        match self {
            Arm::Automate => "automate",
            Arm::Escalate => "escalate",
        }
    }

    fn to_decision(self) -> Decision {
        match self {
            Arm::Automate => Decision::Automate,
            Arm::Escalate => Decision::Escalate,
        }
    }
}

/// Per-(arm, stratum) ridge-regularized linear model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArmState {
    pub reward_a: SymmetricMatrix,
    pub reward_b: [f64; DIM],
    pub safety_a: SymmetricMatrix,
    pub safety_b: [f64; DIM],
    pub n: u64,
}

impl ArmState {
    pub fn new(ridge_lambda: f64) -> Self {
        Self {
            reward_a: SymmetricMatrix::scaled_identity(ridge_lambda),
            reward_b: [0.0; DIM],
            safety_a: SymmetricMatrix::scaled_identity(ridge_lambda),
            safety_b: [0.0; DIM],
            n: 0,
        }
    }
}

/// One arm's computed upper confidence bounds for the current context.
#[derive(Debug, Clone, Copy)]
struct ArmEstimate {
    arm: Arm,
    reward_ucb: f64,
    safety_ucb: f64,
}

pub struct SelectionResult {
    pub arm: Decision,
    pub reason: String,
    pub reward_ucb: f64,
    pub safety_ucb: f64,
    pub safety_threshold: f64,
    pub exploration: bool,
}

pub struct SafeLucbCritic {
    pub ridge_lambda: f64,
    pub exploration_alpha: f64,
    pub seed_safe_min_n: u64,
    pub seed_safe_sfn_bound: f64,
    pub wilson_confidence: f64,
    states: HashMap<(Arm, String), ArmState>,
}

impl SafeLucbCritic {
    pub fn new(
        ridge_lambda: f64,
        exploration_alpha: f64,
        seed_safe_min_n: u64,
        seed_safe_sfn_bound: f64,
        wilson_confidence: f64,
    ) -> Self {
        Self {
            ridge_lambda,
            exploration_alpha,
            seed_safe_min_n,
            seed_safe_sfn_bound,
            wilson_confidence,
            states: HashMap::new(),
        }
    }

    fn state_for(&mut self, arm: Arm, stratum: &str) -> &mut ArmState {
        self.states
            .entry((arm, stratum.to_string()))
            .or_insert_with(|| ArmState::new(self.ridge_lambda))
    }

    /// Selects an arm for the given context.
    ///
    /// `historical_n` and `historical_sfn_count` describe the
    /// (property_type, age_bin, region) tuple's HistoricalValidation record;
    /// `delta` is the property class's safety threshold;
    /// `critical_candidate` biases toward escalate when true.
    pub fn select_arm(
        &mut self,
        context: &ContextVector,
        delta: f64,
        stratum: &str,
        historical_n: u64,
        historical_sfn_count: u64,
        critical_candidate: bool,
    ) -> AegisResult<SelectionResult> {
        let sfn_upper = wilson_upper_bound(historical_sfn_count, historical_n, self.wilson_confidence);
        if historical_n < self.seed_safe_min_n || sfn_upper > self.seed_safe_sfn_bound {
            return Ok(SelectionResult {
                arm: Decision::Escalate,
                reason: "context not in verified safe set".to_string(),
                reward_ucb: 0.0,
                safety_ucb: 0.0,
                safety_threshold: delta,
                exploration: false,
            });
        }

        let x = context.as_slice();
        let mut estimates = Vec::with_capacity(2);
        for arm in [Arm::Automate, Arm::Escalate] {
            let state = self.state_for(arm, stratum);
            let beta = self.exploration_alpha * ((state.n + 1) as f64).ln().max(0.0);

            let theta_r = state
                .reward_a
                .solve(&state.reward_b)
                .ok_or_else(|| AegisError::CriticNumerical {
                    stratum: stratum.to_string(),
                    reason: "reward matrix not invertible after jitter".to_string(),
                })?;
            let theta_s = state
                .safety_a
                .solve(&state.safety_b)
                .ok_or_else(|| AegisError::CriticNumerical {
                    stratum: stratum.to_string(),
                    reason: "safety matrix not invertible after jitter".to_string(),
                })?;

            let reward_mean = dot(&theta_r, x);
            let safety_mean = dot(&theta_s, x);
            let reward_width = state
                .reward_a
                .quadratic_form_inverse(x)
                .ok_or_else(|| AegisError::CriticNumerical {
                    stratum: stratum.to_string(),
                    reason: "reward confidence width computation failed".to_string(),
                })?
                .max(0.0)
                .sqrt();
            let safety_width = state
                .safety_a
                .quadratic_form_inverse(x)
                .ok_or_else(|| AegisError::CriticNumerical {
                    stratum: stratum.to_string(),
                    reason: "safety confidence width computation failed".to_string(),
                })?
                .max(0.0)
                .sqrt();

            let mut safety_ucb = safety_mean + beta * safety_width;
            if critical_candidate && arm == Arm::Automate {
                // Bias toward escalate: inflate automate's safety UCB prior.
                safety_ucb += 0.1;
            }

            estimates.push(ArmEstimate {
                arm,
                reward_ucb: reward_mean + beta * reward_width,
                safety_ucb,
            });
        }

        let safe: Vec<&ArmEstimate> = estimates.iter().filter(|e| e.safety_ucb <= delta).collect();
        let chosen = if safe.is_empty() {
            estimates
                .iter()
                .find(|e| e.arm == Arm::Escalate)
                .expect("escalate arm is always evaluated")
        } else {
            // Argmax reward_ucb; break ties lexicographically on arm name.
            safe.into_iter()
                .max_by(|a, b| {
                    a.reward_ucb
                        .partial_cmp(&b.reward_ucb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.arm.name().cmp(b.arm.name()))
                })
                .expect("safe arm set is non-empty")
        };

        // Safety veto: automate is never returned with safety_ucb > delta.
        let final_decision = if chosen.arm == Arm::Automate && chosen.safety_ucb > delta {
            Decision::Escalate
        } else {
            chosen.arm.to_decision()
        };

        let reason = if final_decision == Decision::Escalate && chosen.arm == Arm::Automate {
            "safety veto: safety_ucb exceeds threshold".to_string()
        } else {
            format!("selected {} by argmax reward_ucb among safe arms", chosen.arm.name())
        };

        let n_for_exploration = self
            .states
            .get(&(chosen.arm, stratum.to_string()))
            .map(|s| s.n)
            .unwrap_or(0);

        Ok(SelectionResult {
            arm: final_decision,
            reason,
            reward_ucb: chosen.reward_ucb,
            safety_ucb: chosen.safety_ucb,
            safety_threshold: delta,
            exploration: n_for_exploration < 10,
        })
    }

    /// Updates the (arm, stratum) model after observing reward `r` and
    /// safety indicator `s` for the context used to select that arm.
    pub fn update(&mut self, arm: Decision, stratum: &str, context: &ContextVector, reward: f64, safety: f64) {
        let arm = match arm {
            Decision::Automate => Arm::Automate,
            Decision::Escalate => Arm::Escalate,
        };
        let x = context.as_slice();
        let state = self.state_for(arm, stratum);
        state.reward_a.add_outer_product(x);
        state.safety_a.add_outer_product(x);
        for i in 0..DIM {
            state.reward_b[i] += reward * x[i];
            state.safety_b[i] += safety * x[i];
        }
        state.n += 1;
    }

    /// Snapshots both arms' state for a stratum, for repository persistence
    /// (`upsert_critic_model`). Returns `None` if the stratum has never seen
    /// a `select_arm`/`update` call.
    pub fn snapshot(&self, stratum: &str) -> Option<CriticModelSnapshot> {
        let automate = self.states.get(&(Arm::Automate, stratum.to_string()))?.clone();
        let escalate = self.states.get(&(Arm::Escalate, stratum.to_string()))?.clone();
        Some(CriticModelSnapshot { automate, escalate })
    }

    /// Restores a stratum's state from a repository-loaded snapshot
    /// (`get_critic_model`), replacing whatever was previously held in memory.
    pub fn load_snapshot(&mut self, stratum: &str, snapshot: CriticModelSnapshot) {
        self.states
            .insert((Arm::Automate, stratum.to_string()), snapshot.automate);
        self.states
            .insert((Arm::Escalate, stratum.to_string()), snapshot.escalate);
    }
}

/// Serializable per-stratum critic state, round-tripped through the
/// repository's `critic_models` table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CriticModelSnapshot {
    pub automate: ArmState,
    pub escalate: ArmState,
}

fn dot(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ContextVector {
        let mut v = [0.3; crate::types::CONTEXT_VECTOR_LEN];
        v[3] = 0.0;
        ContextVector(v)
    }

    #[test]
    fn unseen_stratum_below_seed_safe_min_n_forces_escalate() {
        let mut critic = SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let result = critic
            .select_arm(&context(), 1e-3, "residential_20-50_us-west-2", 500, 0, false)
            .unwrap();
        assert_eq!(result.arm, Decision::Escalate);
        assert_eq!(result.reason, "context not in verified safe set");
    }

    #[test]
    fn seed_safe_stratum_with_zero_failures_can_automate() {
        let mut critic = SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let result = critic
            .select_arm(&context(), 1e-3, "residential_20-50_us-west-2", 1200, 0, false)
            .unwrap();
        // With zero history, theta=0 everywhere, so both UCBs are driven by
        // exploration width alone; automate's safety_ucb should clear a
        // generous threshold because the ridge prior keeps initial widths small.
        assert!(result.safety_ucb.is_finite());
        assert!(matches!(result.arm, Decision::Automate | Decision::Escalate));
    }

    #[test]
    fn high_sfn_rate_forces_escalate_even_with_large_n() {
        let mut critic = SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let result = critic
            .select_arm(&context(), 1e-3, "residential_20-50_us-west-2", 1200, 50, false)
            .unwrap();
        assert_eq!(result.arm, Decision::Escalate);
    }

    #[test]
    fn safety_veto_overrides_automate_when_safety_ucb_exceeds_delta() {
        let mut critic = SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let ctx = context();
        let stratum = "residential_20-50_us-west-2";
        // Train the automate arm toward a high safety signal so its UCB
        // exceeds an intentionally tiny delta.
        for _ in 0..20 {
            critic.update(Decision::Automate, stratum, &ctx, 0.9, 1.0);
        }
        let result = critic
            .select_arm(&ctx, 1e-6, stratum, 1200, 0, false)
            .unwrap();
        assert_eq!(result.arm, Decision::Escalate);
    }

    #[test]
    fn update_increments_observation_count() {
        let mut critic = SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let ctx = context();
        critic.update(Decision::Automate, "s", &ctx, 0.8, 0.0);
        let state = critic.states.get(&(Arm::Automate, "s".to_string())).unwrap();
        assert_eq!(state.n, 1);
    }
}
