//! A tiny feedforward MLP: the per-level associative memory parameterization
//! used by [`super::ContinuumMemory`].
//!
//! Generalizes `qres_core::cortex::linear::LinearNeuron`'s fixed 8-lag linear
//! predictor into a one-hidden-layer nonlinear regressor over variable-length
//! key/value vectors, since a single level must associate arbitrary learning-
//! handler feature vectors, not a fixed lag window over one scalar stream.

/// A single hidden-layer MLP: `input -> tanh(hidden) -> linear output`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Mlp {
    input_dim: usize,
    hidden_dim: usize,
    output_dim: usize,
    w1: Vec<Vec<f64>>, // hidden_dim x input_dim
    b1: Vec<f64>,
    w2: Vec<Vec<f64>>, // output_dim x hidden_dim
    b2: Vec<f64>,
}

impl Mlp {
    /// Deterministic small-weight initialization (no RNG dependency at
    /// construction time, so memory levels are reproducible across restarts
    /// unless explicitly re-seeded).
    pub fn new(input_dim: usize, hidden_dim: usize, output_dim: usize) -> Self {
        let w1 = init_matrix(hidden_dim, input_dim);
        let w2 = init_matrix(output_dim, hidden_dim);
        Self {
            input_dim,
            hidden_dim,
            output_dim,
            w1,
            b1: vec![0.0; hidden_dim],
            w2,
            b2: vec![0.0; output_dim],
        }
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn hidden_pre_activation(&self, input: &[f64]) -> Vec<f64> {
        (0..self.hidden_dim)
            .map(|h| {
                let mut sum = self.b1[h];
                for i in 0..self.input_dim {
                    sum += self.w1[h][i] * input.get(i).copied().unwrap_or(0.0);
                }
                sum
            })
            .collect()
    }

    /// Forward pass: `v_hat = MLP(keys)`.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        let hidden: Vec<f64> = self.hidden_pre_activation(input).iter().map(|z| z.tanh()).collect();
        (0..self.output_dim)
            .map(|o| {
                let mut sum = self.b2[o];
                for h in 0..self.hidden_dim {
                    sum += self.w2[o][h] * hidden[h];
                }
                sum
            })
            .collect()
    }

    /// Accumulates the squared-error gradient for one (key, value) pair into
    /// `accum`, so a chunk's gradients can be summed before a single update.
    pub fn accumulate_gradient(&self, input: &[f64], target: &[f64], accum: &mut GradientAccumulator) {
        let pre_hidden = self.hidden_pre_activation(input);
        let hidden: Vec<f64> = pre_hidden.iter().map(|z| z.tanh()).collect();
        let output: Vec<f64> = (0..self.output_dim)
            .map(|o| {
                let mut sum = self.b2[o];
                for h in 0..self.hidden_dim {
                    sum += self.w2[o][h] * hidden[h];
                }
                sum
            })
            .collect();

        let output_error: Vec<f64> = (0..self.output_dim)
            .map(|o| output[o] - target.get(o).copied().unwrap_or(0.0))
            .collect();

        for o in 0..self.output_dim {
            accum.b2[o] += output_error[o];
            for h in 0..self.hidden_dim {
                accum.w2[o][h] += output_error[o] * hidden[h];
            }
        }

        for h in 0..self.hidden_dim {
            let mut hidden_error = 0.0;
            for o in 0..self.output_dim {
                hidden_error += output_error[o] * self.w2[o][h];
            }
            hidden_error *= 1.0 - hidden[h] * hidden[h]; // tanh'(z) = 1 - tanh(z)^2
            accum.b1[h] += hidden_error;
            for i in 0..self.input_dim {
                accum.w1[h][i] += hidden_error * input.get(i).copied().unwrap_or(0.0);
            }
        }
        accum.count += 1;
    }

    /// Applies an accumulated gradient with learning rate `eta`: `theta -= eta * g`.
    pub fn apply_gradient(&mut self, accum: &GradientAccumulator, eta: f64) {
        if accum.count == 0 {
            return;
        }
        for h in 0..self.hidden_dim {
            self.b1[h] -= eta * accum.b1[h];
            for i in 0..self.input_dim {
                self.w1[h][i] -= eta * accum.w1[h][i];
            }
        }
        for o in 0..self.output_dim {
            self.b2[o] -= eta * accum.b2[o];
            for h in 0..self.hidden_dim {
                self.w2[o][h] -= eta * accum.w2[o][h];
            }
        }
    }

    pub fn new_gradient_accumulator(&self) -> GradientAccumulator {
        GradientAccumulator {
            w1: vec![vec![0.0; self.input_dim]; self.hidden_dim],
            b1: vec![0.0; self.hidden_dim],
            w2: vec![vec![0.0; self.hidden_dim]; self.output_dim],
            b2: vec![0.0; self.output_dim],
            count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientAccumulator {
    w1: Vec<Vec<f64>>,
    b1: Vec<f64>,
    w2: Vec<Vec<f64>>,
    b2: Vec<f64>,
    count: usize,
}

fn init_matrix(rows: usize, cols: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| {
                    // Small deterministic pseudo-random-looking spread, not a
                    // statistical RNG: keeps construction free of external state.
                    let seed = (r * 31 + c * 7) as f64;
                    0.1 * ((seed * 0.618_034).fract() - 0.5)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_output_has_configured_dimension() {
        let mlp = Mlp::new(5, 8, 5);
        let out = mlp.forward(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn training_reduces_squared_error_on_a_fixed_example() {
        let mut mlp = Mlp::new(3, 6, 2);
        let input = vec![0.2, -0.1, 0.4];
        let target = vec![0.5, -0.5];

        let error_before = squared_error(&mlp.forward(&input), &target);
        for _ in 0..200 {
            let mut accum = mlp.new_gradient_accumulator();
            mlp.accumulate_gradient(&input, &target, &mut accum);
            mlp.apply_gradient(&accum, 0.05);
        }
        let error_after = squared_error(&mlp.forward(&input), &target);
        assert!(error_after < error_before);
    }

    fn squared_error(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }
}
