//! Bayesian logistic regression log-posterior with analytical gradients.
//!
//! Model: `y_i ~ Bernoulli(σ(x_iᵀ β))`, `β ~ N(0, prior_scale² I)`. There is no separate
//! intercept; include a column of ones in `X` to get one.
//!
//! Large data (design matrix, response) is wrapped in `Arc` so cloning the target for worker
//! threads never duplicates it.

use super::{LogDensity, SamplerError};
use crate::chain::GradLogProb;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::sync::Arc;

/// Shared data for the posterior (wrapped in Arc to prevent cloning).
#[derive(Clone)]
struct SharedData {
    /// Design matrix X [n_samples, dim]
    x: Arc<Array2<f64>>,
    /// Response vector y [n_samples], entries 0.0 or 1.0
    y: Arc<Array1<f64>>,
    /// Number of coefficients
    dim: usize,
}

/// Log-posterior target for logistic regression.
#[derive(Clone)]
pub struct LogisticPosterior {
    data: SharedData,
    /// 1 / prior_scale²
    prior_precision: f64,
}

impl LogisticPosterior {
    /// Creates a new posterior target.
    ///
    /// # Arguments
    /// * `x` - Design matrix [n_samples, dim]
    /// * `y` - Binary response [n_samples]
    /// * `prior_scale` - Standard deviation of the isotropic Gaussian prior
    pub fn new(
        x: ArrayView2<f64>,
        y: ArrayView1<i64>,
        prior_scale: f64,
    ) -> Result<Self, SamplerError> {
        if x.nrows() != y.len() {
            return Err(SamplerError::InvalidData(format!(
                "design matrix has {} rows but there are {} responses",
                x.nrows(),
                y.len()
            )));
        }
        if let Some((row, label)) = y.iter().enumerate().find(|&(_, &v)| v != 0 && v != 1) {
            return Err(SamplerError::InvalidData(format!(
                "response {} at row {} is not 0 or 1",
                label, row
            )));
        }
        if !(prior_scale.is_finite() && prior_scale > 0.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "prior scale must be positive and finite, got {}",
                prior_scale
            )));
        }

        let data = SharedData {
            x: Arc::new(x.to_owned()),
            y: Arc::new(y.mapv(|v| v as f64)),
            dim: x.ncols(),
        };

        Ok(Self {
            data,
            prior_precision: 1.0 / (prior_scale * prior_scale),
        })
    }

    /// Bernoulli-logit log-likelihood and its gradient `Xᵀ (y - μ)`.
    fn logit_logp_and_grad(&self, beta: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let eta = self.data.x.dot(&beta);
        let mut ll = 0.0;
        let mut residual = Array1::<f64>::zeros(eta.len());

        for (i, &eta_i) in eta.iter().enumerate() {
            let y_i = self.data.y[i];
            // log(1 + e^η) without overflow
            let softplus = eta_i.max(0.0) + (-eta_i.abs()).exp().ln_1p();
            ll += y_i * eta_i - softplus;

            let mu_i = if eta_i >= 0.0 {
                1.0 / (1.0 + (-eta_i).exp())
            } else {
                let e = eta_i.exp();
                e / (1.0 + e)
            };
            residual[i] = y_i - mu_i;
        }

        let grad_ll = self.data.x.t().dot(&residual);
        (ll, grad_ll)
    }

    pub fn n_observations(&self) -> usize {
        self.data.x.nrows()
    }
}

impl GradLogProb for LogisticPosterior {
    fn dim(&self) -> usize {
        self.data.dim
    }

    fn grad_log_prob(&self, point: ArrayView1<f64>) -> Array1<f64> {
        self.log_prob_and_grad(point).1
    }
}

impl LogDensity for LogisticPosterior {
    fn log_prob_and_grad(&self, point: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let (ll, grad_ll) = self.logit_logp_and_grad(point);

        // log prior = -0.5 β'β / s², up to a constant
        let prior = -0.5 * self.prior_precision * point.dot(&point);
        let grad = grad_ll - &point.mapv(|b| b * self.prior_precision);

        (ll + prior, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_posterior_creation() {
        let x = array![[1.0]];
        let y = array![1];
        let target = LogisticPosterior::new(x.view(), y.view(), 10.0).unwrap();
        assert_eq!(target.dim(), 1);
        assert_eq!(target.n_observations(), 1);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let x = array![[1.0], [2.0]];
        assert!(matches!(
            LogisticPosterior::new(x.view(), array![1].view(), 1.0),
            Err(SamplerError::InvalidData(_))
        ));
        assert!(matches!(
            LogisticPosterior::new(x.view(), array![1, 3].view(), 1.0),
            Err(SamplerError::InvalidData(_))
        ));
        assert!(matches!(
            LogisticPosterior::new(x.view(), array![1, 0].view(), 0.0),
            Err(SamplerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_analytical_gradient_logit() {
        let x = array![[1.0]];
        let y = array![1];
        let target = LogisticPosterior::new(x.view(), y.view(), 1.0).unwrap();

        let beta = array![0.0];
        let (logp, grad) = target.log_prob_and_grad(beta.view());

        // At β=0, eta=0, μ=0.5: log L = log(0.5) = -0.693, prior term is 0
        assert!(
            (logp - (-0.693)).abs() < 0.01,
            "Expected logp~-0.693, got {}",
            logp
        );

        // Gradient: X^T (y - μ) = 1 * (1 - 0.5) = 0.5
        assert!(
            (grad[0] - 0.5).abs() < 0.01,
            "Expected grad~0.5, got {}",
            grad[0]
        );
    }

    #[test]
    fn test_prior_pulls_towards_zero() {
        let x = array![[0.0]];
        let y = array![0];
        let target = LogisticPosterior::new(x.view(), y.view(), 2.0).unwrap();

        // With x = 0 only the prior depends on β: ∇ = -β / 4
        let grad = target.grad_log_prob(array![2.0].view());
        assert!((grad[0] + 0.5).abs() < 1e-12, "got {}", grad[0]);
    }

    #[test]
    fn test_gradient_vs_finite_difference() {
        let x = array![[1.0, 0.5], [0.5, 1.0], [1.0, 1.0]];
        let y = array![1, 0, 1];
        let target = LogisticPosterior::new(x.view(), y.view(), 3.0).unwrap();

        let beta = array![0.5, -0.3];
        let (_, grad) = target.log_prob_and_grad(beta.view());

        let eps = 1e-5;
        for i in 0..2 {
            let mut beta_plus = beta.clone();
            let mut beta_minus = beta.clone();
            beta_plus[i] += eps;
            beta_minus[i] -= eps;

            let (logp_plus, _) = target.log_prob_and_grad(beta_plus.view());
            let (logp_minus, _) = target.log_prob_and_grad(beta_minus.view());

            let fd_grad = (logp_plus - logp_minus) / (2.0 * eps);
            let rel_error = (grad[i] - fd_grad).abs() / (grad[i].abs().max(1e-8));

            assert!(
                rel_error < 1e-4,
                "Gradient mismatch at index {}: analytical={}, fd={}, rel_error={}",
                i,
                grad[i],
                fd_grad,
                rel_error
            );
        }
    }

    #[test]
    fn test_extreme_margins_stay_finite() {
        let x = array![[1.0], [-1.0]];
        let y = array![0, 1];
        let target = LogisticPosterior::new(x.view(), y.view(), 10.0).unwrap();
        let (logp, grad) = target.log_prob_and_grad(array![800.0].view());
        assert!(logp.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_arc_prevents_cloning_data() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![1, 0];
        let target1 = LogisticPosterior::new(x.view(), y.view(), 1.0).unwrap();

        // Clone should share data via Arc, not duplicate
        let target2 = target1.clone();

        assert!(Arc::ptr_eq(&target1.data.x, &target2.data.x));
        assert!(Arc::ptr_eq(&target1.data.y, &target2.data.y));
    }
}
