//! Continuum Memory: a multi-level associative memory with geometrically
//! spaced update frequencies, giving each agent a compressed, continually
//! updated summary of its interaction history at several timescales.
//!
//! Grounded on `qres_core::multivariate::manager::MultivariateManager`'s
//! per-key rolling-statistics map, generalized from scalar exponential
//! averages into full MLP-parameterized levels with buffered, scheduled updates.

pub mod mlp;
pub mod titans;

use mlp::Mlp;
use std::collections::HashMap;
use titans::TitansProjection;

/// Configuration for a single memory level's schedule.
#[derive(Debug, Clone, Copy)]
pub struct LevelSchedule {
    pub frequency: u64,
    pub chunk_size: u64,
    pub learning_rate: f64,
}

struct MemoryLevel {
    schedule: LevelSchedule,
    mlp: Mlp,
    buffer: Vec<(Vec<f64>, Vec<f64>)>,
    last_update: u64,
    titans: Option<TitansProjection>,
}

impl MemoryLevel {
    fn new(
        schedule: LevelSchedule,
        input_dim: usize,
        hidden_width: usize,
        output_dim: usize,
        titans_adjustment_rate: Option<f64>,
    ) -> Self {
        Self {
            schedule,
            mlp: Mlp::new(input_dim, hidden_width, output_dim),
            buffer: Vec::new(),
            last_update: 0,
            titans: titans_adjustment_rate.map(|rate| TitansProjection::identity(input_dim, rate)),
        }
    }

    /// Projects raw keys through the Titans layer when enabled; identity otherwise.
    fn project_keys(&self, keys: &[f64]) -> Vec<f64> {
        match &self.titans {
            Some(projection) => projection.project_keys(keys),
            None => keys.to_vec(),
        }
    }

    fn due(&self, t: u64) -> bool {
        t.saturating_sub(self.last_update) >= self.schedule.chunk_size
    }
}

/// Outcome of `query`: the recalled value and a [0,1] confidence derived from
/// how much history has actually informed the level.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub values: Vec<f64>,
    pub confidence: f64,
}

/// Per-agent, multi-level associative memory.
pub struct ContinuumMemory {
    input_dim: usize,
    output_dim: usize,
    hidden_width: usize,
    agents: HashMap<String, Vec<MemoryLevel>>,
    schedules: Vec<LevelSchedule>,
    step: u64,
    titans_adjustment_rate: Option<f64>,
}

impl ContinuumMemory {
    /// Builds the level schedule: `f^(l) = base_frequency * multiplier^l`,
    /// `C^(l)` follows the same geometric progression clamped to
    /// `[chunk_min, chunk_max]`, and `eta^(l)` decays geometrically with level.
    pub fn new(
        num_levels: usize,
        base_frequency: u64,
        frequency_multiplier: u64,
        base_chunk_size: u64,
        chunk_min: u64,
        chunk_max: u64,
        base_learning_rate: f64,
        hidden_width: usize,
        input_dim: usize,
        output_dim: usize,
    ) -> Self {
        Self::with_titans(
            num_levels,
            base_frequency,
            frequency_multiplier,
            base_chunk_size,
            chunk_min,
            chunk_max,
            base_learning_rate,
            hidden_width,
            input_dim,
            output_dim,
            None,
        )
    }

    /// As [`Self::new`], but with the optional Titans self-modifying
    /// projection layer enabled at `adjustment_rate` (gated by
    /// `MemoryConfig::titans_enabled` at the call site). `None` keeps every
    /// level's projections at identity, matching the disabled default.
    pub fn with_titans(
        num_levels: usize,
        base_frequency: u64,
        frequency_multiplier: u64,
        base_chunk_size: u64,
        chunk_min: u64,
        chunk_max: u64,
        base_learning_rate: f64,
        hidden_width: usize,
        input_dim: usize,
        output_dim: usize,
        titans_adjustment_rate: Option<f64>,
    ) -> Self {
        let schedules: Vec<LevelSchedule> = (0..num_levels)
            .map(|l| {
                let multiplier = frequency_multiplier.pow(l as u32);
                LevelSchedule {
                    frequency: base_frequency * multiplier,
                    chunk_size: (base_chunk_size * multiplier).clamp(chunk_min, chunk_max),
                    learning_rate: base_learning_rate / (1.0 + l as f64),
                }
            })
            .collect();

        Self {
            input_dim,
            output_dim,
            hidden_width,
            agents: HashMap::new(),
            schedules,
            step: 0,
            titans_adjustment_rate,
        }
    }

    fn levels_for(&mut self, agent: &str) -> &mut Vec<MemoryLevel> {
        let schedules = self.schedules.clone();
        let input_dim = self.input_dim;
        let output_dim = self.output_dim;
        let hidden_width = self.hidden_width;
        let titans_rate = self.titans_adjustment_rate;
        self.agents.entry(agent.to_string()).or_insert_with(|| {
            schedules
                .iter()
                .map(|s| MemoryLevel::new(*s, input_dim, hidden_width, output_dim, titans_rate))
                .collect()
        })
    }

    /// Advances the global step counter; call once per orchestrator invocation.
    pub fn advance_step(&mut self) {
        self.step += 1;
    }

    /// Associative recall: `v_hat = MLP^(l)(keys)`. If `level` is `None`,
    /// queries all levels and combines by confidence-weighted mean.
    /// An agent with no history returns a neutral (zero) value, confidence 0.
    pub fn query(&mut self, agent: &str, keys: &[f64], level: Option<usize>) -> QueryResult {
        let levels = self.levels_for(agent);
        if levels.is_empty() {
            return QueryResult {
                values: vec![0.0; self.output_dim],
                confidence: 0.0,
            };
        }

        let indices: Vec<usize> = match level {
            Some(l) if l < levels.len() => vec![l],
            Some(_) => return QueryResult { values: vec![0.0; self.output_dim], confidence: 0.0 },
            None => (0..levels.len()).collect(),
        };

        let mut weighted_sum = vec![0.0; self.output_dim];
        let mut total_confidence = 0.0;
        for idx in &indices {
            let lvl = &levels[*idx];
            let confidence = level_confidence(lvl);
            let projected_keys = lvl.project_keys(keys);
            let values = lvl.mlp.forward(&projected_keys);
            for (i, v) in values.iter().enumerate() {
                weighted_sum[i] += v * confidence;
            }
            total_confidence += confidence;
        }

        if total_confidence <= 0.0 {
            return QueryResult {
                values: vec![0.0; self.output_dim],
                confidence: 0.0,
            };
        }

        for v in weighted_sum.iter_mut() {
            *v /= total_confidence;
        }
        QueryResult {
            values: weighted_sum,
            confidence: (total_confidence / indices.len() as f64).min(1.0),
        }
    }

    /// Appends a (keys, values) pair to a level's update buffer.
    pub fn add_context_flow(&mut self, agent: &str, keys: Vec<f64>, values: Vec<f64>, level: usize) {
        let levels = self.levels_for(agent);
        if let Some(lvl) = levels.get_mut(level) {
            lvl.buffer.push((keys, values));
        }
    }

    /// Consumes a level's accumulated buffer and applies the resulting
    /// gradient update, if the level's schedule says it is due. A failure at
    /// one level (surfaced as `Err`) never blocks other levels' updates.
    pub fn update_level(&mut self, agent: &str, level: usize) -> Result<bool, String> {
        let step = self.step;
        let levels = self.levels_for(agent);
        let lvl = levels
            .get_mut(level)
            .ok_or_else(|| format!("no such memory level {level}"))?;

        if !lvl.due(step) || lvl.buffer.is_empty() {
            return Ok(false);
        }

        // Surprise signal: mean prediction error over the buffer, computed
        // against the pre-update parameters, before training folds it away.
        // Drives the optional Titans projection adjustment below.
        if lvl.titans.is_some() {
            let mut mean_error = vec![0.0; lvl.mlp.output_dim()];
            let mut mean_keys = vec![0.0_f64; 0];
            for (keys, values) in &lvl.buffer {
                let projected = lvl.project_keys(keys);
                let predicted = lvl.mlp.forward(&projected);
                if mean_keys.is_empty() {
                    mean_keys = vec![0.0; keys.len()];
                }
                for (i, (p, v)) in predicted.iter().zip(values.iter()).enumerate() {
                    mean_error[i] += p - v;
                }
                for (i, k) in keys.iter().enumerate() {
                    mean_keys[i] += k;
                }
            }
            let n = lvl.buffer.len() as f64;
            for e in mean_error.iter_mut() {
                *e /= n;
            }
            for k in mean_keys.iter_mut() {
                *k /= n;
            }
            if let Some(titans) = lvl.titans.as_mut() {
                titans.adjust(&mean_keys, &mean_error);
            }
        }

        let mut accum = lvl.mlp.new_gradient_accumulator();
        for (keys, values) in &lvl.buffer {
            let projected = lvl.project_keys(keys);
            lvl.mlp.accumulate_gradient(&projected, values, &mut accum);
        }
        lvl.mlp.apply_gradient(&accum, lvl.schedule.learning_rate);
        lvl.buffer.clear();
        lvl.last_update = step;
        Ok(true)
    }

    pub fn num_levels(&self) -> usize {
        self.schedules.len()
    }

    /// Scales level `level`'s chunk size by `factor`, clamped to
    /// `[chunk_min, chunk_max]`. Applied to the shared schedule template (so
    /// future agents inherit it) and to every existing agent's level.
    pub fn scale_chunk_size(&mut self, level: usize, factor: f64, chunk_min: u64, chunk_max: u64) {
        if let Some(schedule) = self.schedules.get_mut(level) {
            let scaled = (schedule.chunk_size as f64 * factor).round() as u64;
            schedule.chunk_size = scaled.clamp(chunk_min, chunk_max);
        }
        let new_size = self.schedules[level].chunk_size;
        for levels in self.agents.values_mut() {
            if let Some(lvl) = levels.get_mut(level) {
                lvl.schedule.chunk_size = new_size;
            }
        }
    }

    pub fn chunk_size(&self, level: usize) -> Option<u64> {
        self.schedules.get(level).map(|s| s.chunk_size)
    }

    /// Exports one agent/level's MLP parameters and update counter, for the
    /// repository's `upsert_memory_level`. Returns `None` if the agent has no
    /// history yet (there is nothing to persist beyond the deterministic init).
    pub fn export_level(&mut self, agent: &str, level: usize) -> Option<MemoryLevelSnapshot> {
        let levels = self.levels_for(agent);
        let lvl = levels.get(level)?;
        Some(MemoryLevelSnapshot {
            mlp: lvl.mlp.clone(),
            last_update: lvl.last_update,
            chunk_size: lvl.schedule.chunk_size,
        })
    }

    /// Restores one agent/level's MLP parameters from a repository-loaded
    /// snapshot (`get_memory_level`), overwriting the level's current state.
    pub fn import_level(&mut self, agent: &str, level: usize, snapshot: MemoryLevelSnapshot) {
        let levels = self.levels_for(agent);
        if let Some(lvl) = levels.get_mut(level) {
            lvl.mlp = snapshot.mlp;
            lvl.last_update = snapshot.last_update;
            lvl.schedule.chunk_size = snapshot.chunk_size;
        }
    }
}

/// Serializable per-(agent, level) state, round-tripped through the
/// repository's `memory_states` table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryLevelSnapshot {
    pub mlp: Mlp,
    pub last_update: u64,
    pub chunk_size: u64,
}

fn level_confidence(level: &MemoryLevel) -> f64 {
    // A level with no updates yet has contributed nothing; confidence grows
    // with observed buffer flushes, saturating once the level has updated a
    // handful of times.
    if level.last_update == 0 && level.buffer.is_empty() {
        0.0
    } else {
        (level.last_update as f64 / level.schedule.chunk_size as f64).min(1.0).max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ContinuumMemory {
        ContinuumMemory::new(4, 1, 4, 4, 1, 4096, 0.05, 8, 5, 5)
    }

    #[test]
    fn frequencies_are_nondecreasing_across_levels() {
        let mem = memory();
        for w in mem.schedules.windows(2) {
            assert!(w[0].frequency <= w[1].frequency);
        }
    }

    #[test]
    fn query_on_empty_agent_returns_neutral_zero_confidence() {
        let mut mem = memory();
        let result = mem.query("agent-1", &[0.1, 0.2, 0.3, 0.4, 0.5], None);
        assert_eq!(result.confidence, 0.0);
        assert!(result.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn level_updates_only_when_chunk_size_elapsed() {
        let mut mem = memory();
        mem.add_context_flow("agent-1", vec![0.1; 5], vec![0.2; 5], 0);
        mem.step = 0;
        let updated = mem.update_level("agent-1", 0).unwrap();
        assert!(!updated, "chunk size for level 0 has not elapsed yet");
    }

    #[test]
    fn level_updates_once_due_and_clears_buffer() {
        let mut mem = memory();
        mem.add_context_flow("agent-1", vec![0.1; 5], vec![0.2; 5], 0);
        mem.step = 10;
        let updated = mem.update_level("agent-1", 0).unwrap();
        assert!(updated);
        let levels = mem.levels_for("agent-1");
        assert!(levels[0].buffer.is_empty());
    }

    #[test]
    fn update_failure_on_unknown_level_does_not_panic() {
        let mut mem = memory();
        let result = mem.update_level("agent-1", 99);
        assert!(result.is_err());
    }

    #[test]
    fn disabled_titans_leaves_query_unaffected_by_surprise() {
        let mut mem = memory();
        let keys = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        mem.add_context_flow("agent-1", keys.clone(), vec![0.9; 5], 0);
        mem.step = 10;
        mem.update_level("agent-1", 0).unwrap();
        // Projection stays identity when titans is disabled at construction.
        let levels = mem.levels_for("agent-1");
        assert!(levels[0].titans.is_none());
    }

    #[test]
    fn enabled_titans_projection_changes_after_surprising_update() {
        let mut mem = ContinuumMemory::with_titans(4, 1, 4, 4, 1, 4096, 0.05, 8, 5, 5, Some(0.5));
        let keys = vec![1.0, 1.0, 1.0, 1.0, 1.0];
        let before = mem.query("agent-1", &keys, Some(0)).values;
        mem.add_context_flow("agent-1", keys.clone(), vec![5.0; 5], 0);
        mem.step = 10;
        mem.update_level("agent-1", 0).unwrap();
        let after = mem.query("agent-1", &keys, Some(0)).values;
        assert_ne!(before, after);
    }
}
