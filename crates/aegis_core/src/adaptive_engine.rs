//! Adaptive Update Engine: watches a rolling window of accuracy observations
//! and lengthens or shortens memory-level chunk sizes in response to trend.
//!
//! Grounded on `qres_core`'s adaptive regime-change response (the same
//! trend-window-then-nudge shape as `DriftMonitor`, applied here to
//! self-tuning chunk sizes instead of fusion weights).

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDirection {
    Lengthen,
    Shorten,
}

/// A record of one adaptive adjustment, for audit/replay.
#[derive(Debug, Clone)]
pub struct SelfModificationEvent {
    pub level: usize,
    pub direction: ChunkDirection,
    pub factor: f64,
    pub trend: f64,
}

pub struct AdaptiveEngine {
    window_size: usize,
    min_observations: usize,
    trend_threshold: f64,
    adaptation_rate: f64,
    observations: VecDeque<f64>,
}

impl AdaptiveEngine {
    pub fn new(window_size: usize, min_observations: usize, trend_threshold: f64, adaptation_rate: f64) -> Self {
        Self {
            window_size,
            min_observations,
            trend_threshold,
            adaptation_rate,
            observations: VecDeque::with_capacity(window_size),
        }
    }

    /// Records an accuracy observation, evicting the oldest once the window
    /// is full, and returns an adjustment decision if the trend crosses the
    /// configured threshold. `level` identifies which memory level to adjust
    /// (the caller decides the mapping from observation stream to level).
    pub fn observe(&mut self, accuracy: f64, level: usize) -> Option<SelfModificationEvent> {
        if self.observations.len() == self.window_size {
            self.observations.pop_front();
        }
        self.observations.push_back(accuracy);

        if self.observations.len() < self.min_observations || self.observations.len() < 20 {
            return None;
        }

        let n = self.observations.len();
        let recent: f64 = self.observations.iter().rev().take(10).sum::<f64>() / 10.0;
        let prior: f64 = self.observations.iter().rev().skip(10).take(10).sum::<f64>() / ((n - 10).min(10) as f64);

        if prior == 0.0 {
            return None;
        }
        let trend = (recent - prior) / prior;

        if trend >= self.trend_threshold {
            Some(SelfModificationEvent {
                level,
                direction: ChunkDirection::Lengthen,
                factor: 1.0 + self.adaptation_rate,
                trend,
            })
        } else if trend <= -self.trend_threshold {
            Some(SelfModificationEvent {
                level,
                direction: ChunkDirection::Shorten,
                factor: 1.0 - self.adaptation_rate,
                trend,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_accuracy_produces_no_adjustment() {
        let mut engine = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        let mut last = None;
        for _ in 0..20 {
            last = engine.observe(0.8, 0);
        }
        assert!(last.is_none());
    }

    #[test]
    fn improving_accuracy_lengthens_chunks() {
        let mut engine = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        let mut last = None;
        for i in 0..20 {
            let accuracy = 0.6 + (i as f64) * 0.02;
            last = engine.observe(accuracy, 1);
        }
        let event = last.expect("trend should have crossed the improving threshold");
        assert_eq!(event.direction, ChunkDirection::Lengthen);
        assert!(event.factor > 1.0);
    }

    #[test]
    fn degrading_accuracy_shortens_chunks() {
        let mut engine = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        let mut last = None;
        for i in 0..20 {
            let accuracy = 0.9 - (i as f64) * 0.02;
            last = engine.observe(accuracy, 2);
        }
        let event = last.expect("trend should have crossed the degrading threshold");
        assert_eq!(event.direction, ChunkDirection::Shorten);
        assert!(event.factor < 1.0);
    }

    #[test]
    fn fewer_than_min_observations_never_adjusts() {
        let mut engine = AdaptiveEngine::new(50, 10, 0.05, 0.1);
        for i in 0..5 {
            assert!(engine.observe(0.5 + i as f64 * 0.1, 0).is_none());
        }
    }
}
