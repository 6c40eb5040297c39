//! Small dense linear algebra shared by the detector-fusion correlation term
//! and the Safe-LUCB critic's ridge regression.
//!
//! Generalizes `qres_core::multivariate::correlation::PearsonCorrelation`
//! (a pairwise scalar) into a full correlation matrix, and
//! `qres_core::cortex::linear::LinearNeuron`'s fixed 8-weight vector into a
//! proper `d x d` symmetric positive-definite matrix with a Cholesky-based
//! inverse — the critic needs real ridge regression, not a scalar predictor.

use crate::types::CONTEXT_VECTOR_LEN;

/// A variable-size dense, symmetric correlation matrix with unit diagonal;
/// off-diagonals are empirical pairwise correlations between detectors.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CorrelationMatrix {
    /// Builds a correlation matrix from unit diagonal + a row-major list of
    /// off-diagonal entries (upper triangle, read left-to-right top-to-bottom).
    pub fn from_upper_triangle(n: usize, off_diagonal: &[f64]) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        let mut it = off_diagonal.iter();
        for i in 0..n {
            for j in (i + 1)..n {
                let v = *it.next().unwrap_or(&0.0);
                data[i * n + j] = v;
                data[j * n + i] = v;
            }
        }
        Self { n, data }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_upper_triangle(n, &[])
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    /// Computes `w^T Sigma w`, the correlation penalty term in fused variance.
    pub fn quadratic_form(&self, w: &[f64]) -> f64 {
        debug_assert_eq!(w.len(), self.n);
        let mut total = 0.0;
        for i in 0..self.n {
            for j in 0..self.n {
                total += w[i] * self.get(i, j) * w[j];
            }
        }
        total
    }

    /// Re-estimates the matrix from rolling detector confidence histories via
    /// Pearson correlation, used when `DetectorConfig::empirical_correlation`
    /// is enabled instead of the documented static correlation constants.
    pub fn estimate_from_histories(histories: &[Vec<f64>]) -> Self {
        let n = histories.len();
        let mut off_diagonal = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                off_diagonal.push(pearson_correlation(&histories[i], &histories[j]));
            }
        }
        Self::from_upper_triangle(n, &off_diagonal)
    }
}

/// Pearson correlation coefficient between two equal-length samples.
/// Returns 0.0 for mismatched/empty/constant inputs.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (cov, var_x, var_y) = x.iter().zip(y.iter()).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(cov, vx, vy), (&xi, &yi)| {
            let dx = xi - mean_x;
            let dy = yi - mean_y;
            (cov + dx * dy, vx + dx * dx, vy + dy * dy)
        },
    );
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Fixed dimension of the critic's feature space: the 12-D context vector.
pub const DIM: usize = CONTEXT_VECTOR_LEN;

/// A `DIM x DIM` symmetric matrix, used for the critic's `A_r`/`A_s`
/// ridge-regularized normal-equation matrices (`CriticModel`'s `A_r`/`A_s`).
///
/// Invariant: remains symmetric positive-definite after any sequence of
/// rank-1 updates, because updates are `A += x x^T` starting from
/// `lambda * I` with `lambda > 0`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SymmetricMatrix {
    data: [[f64; DIM]; DIM],
}

impl SymmetricMatrix {
    pub fn scaled_identity(lambda: f64) -> Self {
        let mut data = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            data[i][i] = lambda;
        }
        Self { data }
    }

    /// Rank-1 update `A += x x^T`. Preserves symmetry and PSD-ness exactly.
    pub fn add_outer_product(&mut self, x: &[f64; DIM]) {
        for i in 0..DIM {
            for j in 0..DIM {
                self.data[i][j] += x[i] * x[j];
            }
        }
    }

    pub fn mul_vec(&self, x: &[f64; DIM]) -> [f64; DIM] {
        let mut out = [0.0; DIM];
        for i in 0..DIM {
            let mut s = 0.0;
            for j in 0..DIM {
                s += self.data[i][j] * x[j];
            }
            out[i] = s;
        }
        out
    }

    /// Cholesky decomposition with jitter fallback. Retries with a
    /// geometrically growing diagonal jitter if the
    /// matrix is not (numerically) positive definite, up to a bounded number
    /// of attempts; returns `None` only if all attempts fail, which the
    /// critic maps to `AegisError::CriticNumerical`.
    pub fn cholesky_with_jitter(&self) -> Option<CholeskyFactor> {
        let mut jitter = 0.0_f64;
        for _ in 0..6 {
            let mut m = self.data;
            if jitter > 0.0 {
                for i in 0..DIM {
                    m[i][i] += jitter;
                }
            }
            if let Some(l) = cholesky(&m) {
                return Some(CholeskyFactor { l });
            }
            jitter = if jitter == 0.0 { 1e-8 } else { jitter * 10.0 };
        }
        None
    }

    /// Solves `A x = b` via the Cholesky factor, i.e. computes `A^-1 b`.
    pub fn solve(&self, b: &[f64; DIM]) -> Option<[f64; DIM]> {
        self.cholesky_with_jitter().map(|f| f.solve(b))
    }

    /// Computes `x^T A^-1 x` via the Cholesky factor (used for both the
    /// reward and safety UCB confidence widths).
    pub fn quadratic_form_inverse(&self, x: &[f64; DIM]) -> Option<f64> {
        let solved = self.solve(x)?;
        Some(dot(x, &solved))
    }
}

pub struct CholeskyFactor {
    l: [[f64; DIM]; DIM],
}

impl CholeskyFactor {
    pub fn solve(&self, b: &[f64; DIM]) -> [f64; DIM] {
        // Forward substitution: L y = b.
        let mut y = [0.0; DIM];
        for i in 0..DIM {
            let mut s = b[i];
            for k in 0..i {
                s -= self.l[i][k] * y[k];
            }
            y[i] = s / self.l[i][i];
        }
        // Back substitution: L^T x = y.
        let mut x = [0.0; DIM];
        for i in (0..DIM).rev() {
            let mut s = y[i];
            for k in (i + 1)..DIM {
                s -= self.l[k][i] * x[k];
            }
            x[i] = s / self.l[i][i];
        }
        x
    }
}

fn cholesky(m: &[[f64; DIM]; DIM]) -> Option<[[f64; DIM]; DIM]> {
    let mut l = [[0.0; DIM]; DIM];
    for i in 0..DIM {
        for j in 0..=i {
            let mut s = m[i][j];
            for k in 0..j {
                s -= l[i][k] * l[j][k];
            }
            if i == j {
                if s <= 0.0 {
                    return None;
                }
                l[i][j] = s.sqrt();
            } else {
                l[i][j] = s / l[j][j];
            }
        }
    }
    Some(l)
}

fn dot(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_correlation_has_zero_off_diagonal() {
        let sigma = CorrelationMatrix::identity(3);
        assert_eq!(sigma.get(0, 1), 0.0);
        assert_eq!(sigma.get(0, 0), 1.0);
    }

    #[test]
    fn canonical_three_detector_quadratic_form_is_nonnegative() {
        let sigma = CorrelationMatrix::from_upper_triangle(3, &[0.31, 0.27, 0.35]);
        let w = [0.35, 0.50, 0.15];
        assert!(sigma.quadratic_form(&w) >= 0.0);
    }

    #[test]
    fn scaled_identity_inverts_to_reciprocal_scaled_identity() {
        let a = SymmetricMatrix::scaled_identity(2.0);
        let mut x = [0.0; DIM];
        x[0] = 1.0;
        let solved = a.solve(&x).unwrap();
        assert!((solved[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn quadratic_form_inverse_matches_hand_computation() {
        let a = SymmetricMatrix::scaled_identity(1.0);
        let mut x = [0.0; DIM];
        x[0] = 3.0;
        x[1] = 4.0;
        let qf = a.quadratic_form_inverse(&x).unwrap();
        assert!((qf - 25.0).abs() < 1e-9);
    }

    #[test]
    fn rank_one_updates_stay_positive_definite() {
        let mut a = SymmetricMatrix::scaled_identity(1.0);
        for i in 0..20 {
            let mut x = [0.0; DIM];
            x[i % DIM] = 1.0 + (i as f64) * 0.1;
            a.add_outer_product(&x);
            assert!(a.cholesky_with_jitter().is_some());
        }
    }

    #[test]
    fn pearson_matches_known_perfect_correlation() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&x, &y) - 1.0).abs() < 1e-9);
    }
}
