//! Optional self-modifying projection layer ("Titans") sitting in front of
//! a memory level's key/value access.
//!
//! When disabled (the default), projections are identity and this module is
//! inert. Gated at runtime by `MemoryConfig::titans_enabled`, since it is not
//! required for baseline continuum-memory behavior.

/// Dynamic linear projections applied to keys/values/queries before memory
/// access. Identity-initialized; `adjust` nudges them based on a surprise signal.
#[derive(Debug, Clone)]
pub struct TitansProjection {
    dim: usize,
    w_k: Vec<Vec<f64>>,
    w_v: Vec<Vec<f64>>,
    w_q: Vec<Vec<f64>>,
    w_o: Vec<Vec<f64>>,
    adjustment_rate: f64,
}

impl TitansProjection {
    pub fn identity(dim: usize, adjustment_rate: f64) -> Self {
        Self {
            dim,
            w_k: identity_matrix(dim),
            w_v: identity_matrix(dim),
            w_q: identity_matrix(dim),
            w_o: identity_matrix(dim),
            adjustment_rate,
        }
    }

    pub fn project_keys(&self, keys: &[f64]) -> Vec<f64> {
        apply_matrix(&self.w_k, keys)
    }

    pub fn project_values(&self, values: &[f64]) -> Vec<f64> {
        apply_matrix(&self.w_v, values)
    }

    pub fn project_queries(&self, queries: &[f64]) -> Vec<f64> {
        apply_matrix(&self.w_q, queries)
    }

    pub fn project_output(&self, output: &[f64]) -> Vec<f64> {
        apply_matrix(&self.w_o, output)
    }

    /// Adjusts the key projection toward reducing a surprise (prediction
    /// error) signal: a small step proportional to the outer product of the
    /// error and the keys that produced it, scaled by `adjustment_rate`.
    pub fn adjust(&mut self, keys: &[f64], prediction_error: &[f64]) {
        let n = self.dim.min(keys.len()).min(prediction_error.len());
        for i in 0..n {
            for j in 0..n {
                self.w_k[i][j] += self.adjustment_rate * prediction_error[i] * keys[j];
            }
        }
    }
}

fn identity_matrix(dim: usize) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|i| (0..dim).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

fn apply_matrix(matrix: &[Vec<f64>], vector: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(vector.iter()).map(|(a, b)| a * b).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_projection_is_a_no_op() {
        let proj = TitansProjection::identity(3, 0.01);
        let keys = vec![1.0, 2.0, 3.0];
        assert_eq!(proj.project_keys(&keys), keys);
    }

    #[test]
    fn adjust_changes_the_key_projection() {
        let mut proj = TitansProjection::identity(2, 0.5);
        let before = proj.project_keys(&[1.0, 1.0]);
        proj.adjust(&[1.0, 1.0], &[0.5, -0.5]);
        let after = proj.project_keys(&[1.0, 1.0]);
        assert_ne!(before, after);
    }
}
