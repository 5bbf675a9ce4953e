//! # Zero-Variance Control Variates
//!
//! The score function `∇ log p(β)` has zero expectation under the posterior, so for any
//! coefficient vector `a_j` the quantity `β_j + a_jᵀ ∇ log p(β)` has the same expectation as
//! `β_j`. Choosing
//!
//! ```text
//! a_j = -Var(∇ log p)⁻¹ · Cov(β_j, ∇ log p)
//! ```
//!
//! minimizes its variance. This module estimates both moments from the chain itself and
//! emits the adjusted draws.
//!
//! - `Var(∇ log p)` is estimated once and inverted once through a single symmetric
//!   eigendecomposition; every dimension reuses it.
//! - Each dimension is an independent pass reading the shared inverse and writing only its
//!   own output column, so the passes run in parallel without changing any result.
//! - A singular gradient covariance is an error unless the pseudo-inverse policy is chosen
//!   explicitly in [`ReducerConfig`].

use crate::chain::ChainStore;
use crate::covariance::{center, column_means, covariance_of_centered, cross_covariance};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do when the gradient covariance cannot be inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingularPolicy {
    /// Fail with [`ReductionError::SingularCovariance`].
    #[default]
    Reject,
    /// Use the Moore-Penrose pseudo-inverse, dropping eigen-directions below tolerance.
    PseudoInverse,
}

/// Configuration for the control-variate reducer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    pub singular_policy: SingularPolicy,
    /// Eigenvalues at or below `singular_tolerance * λ_max` count as zero.
    pub singular_tolerance: f64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            singular_policy: SingularPolicy::Reject,
            singular_tolerance: 1e-12,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error(
        "The gradient covariance matrix is singular (smallest eigenvalue {smallest_eigenvalue:.3e}, largest {largest_eigenvalue:.3e}). A gradient dimension may have zero variance across the chain."
    )]
    SingularCovariance {
        smallest_eigenvalue: f64,
        largest_eigenvalue: f64,
    },

    #[error("Invalid reducer configuration: {0}")]
    InvalidConfig(String),

    #[error("Eigendecomposition of the gradient covariance failed: {0}")]
    Eigendecomposition(#[from] ndarray_linalg::error::LinalgError),
}

/// Output of one reduction: the adjusted draws plus the quantities used to build them.
#[derive(Clone, Debug)]
pub struct Reduction {
    /// Adjusted draws, same shape as the active chain.
    pub adjusted: Array2<f64>,
    /// Control coefficients [dim, dim]; column j is `a_j`.
    pub coefficients: Array2<f64>,
    /// Unbiased covariance of the gradient sample [dim, dim].
    pub var_grad: Array2<f64>,
    pub sample_mean: Array1<f64>,
    pub grad_mean: Array1<f64>,
}

/// Stateless reducer; all inputs arrive through [`ControlVariateReducer::reduce`].
#[derive(Clone, Debug, Default)]
pub struct ControlVariateReducer {
    config: ReducerConfig,
}

impl ControlVariateReducer {
    /// Rejects a tolerance that is not finite or lies outside `[0, 1)`.
    pub fn new(config: ReducerConfig) -> Result<Self, ReductionError> {
        let tol = config.singular_tolerance;
        if !(tol.is_finite() && (0.0..1.0).contains(&tol)) {
            return Err(ReductionError::InvalidConfig(format!(
                "singular tolerance must lie in [0, 1), got {}",
                tol
            )));
        }
        Ok(Self { config })
    }

    /// Computes the control coefficients for every dimension and the adjusted sample.
    ///
    /// The store is only read. On error nothing is returned and the original draws are
    /// untouched.
    pub fn reduce(&self, store: &ChainStore) -> Result<Reduction, ReductionError> {
        let sample = store.sample();
        let gradient = store.gradient();
        let (n_iters, dim) = sample.dim();

        let sample_mean = column_means(sample);
        let grad_mean = column_means(gradient);

        // a_jᵀ g_i vanishes for every a_j when g_i = 0, so there is nothing to estimate.
        if gradient.iter().all(|&g| g == 0.0) {
            log::warn!(
                "Gradient sample is identically zero; returning the original {} draws unadjusted",
                n_iters
            );
            return Ok(Reduction {
                adjusted: sample.to_owned(),
                coefficients: Array2::zeros((dim, dim)),
                var_grad: Array2::zeros((dim, dim)),
                sample_mean,
                grad_mean,
            });
        }

        let grad_centered = center(gradient, grad_mean.view());
        let var_grad = covariance_of_centered(grad_centered.view());
        let precision = self.invert_gradient_covariance(&var_grad)?;

        let passes: Vec<(Array1<f64>, Array1<f64>)> = (0..dim)
            .into_par_iter()
            .map(|j| {
                let column = sample.column(j);
                let cross_cov = cross_covariance(column, sample_mean[j], grad_centered.view());
                let coefficient = -precision.dot(&cross_cov);
                let adjusted_column = &column + &gradient.dot(&coefficient);
                (coefficient, adjusted_column)
            })
            .collect();

        let mut adjusted = Array2::<f64>::zeros((n_iters, dim));
        let mut coefficients = Array2::<f64>::zeros((dim, dim));
        for (j, (coefficient, adjusted_column)) in passes.into_iter().enumerate() {
            coefficients.column_mut(j).assign(&coefficient);
            adjusted.column_mut(j).assign(&adjusted_column);
        }

        log::info!(
            "Applied zero-variance control variates to {} draws across {} dimensions",
            n_iters,
            dim
        );

        Ok(Reduction {
            adjusted,
            coefficients,
            var_grad,
            sample_mean,
            grad_mean,
        })
    }

    /// Inverts the gradient covariance via `V diag(1/λ) Vᵀ`.
    fn invert_gradient_covariance(
        &self,
        var_grad: &Array2<f64>,
    ) -> Result<Array2<f64>, ReductionError> {
        let (eigenvalues, eigenvectors): (Array1<f64>, Array2<f64>) =
            var_grad.eigh(UPLO::Lower)?;

        let largest = eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let smallest = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        let threshold = self.config.singular_tolerance * largest.max(0.0);

        if largest <= 0.0 || smallest <= threshold {
            match self.config.singular_policy {
                SingularPolicy::Reject => {
                    return Err(ReductionError::SingularCovariance {
                        smallest_eigenvalue: smallest,
                        largest_eigenvalue: largest,
                    });
                }
                SingularPolicy::PseudoInverse => {
                    let dropped = eigenvalues.iter().filter(|&&l| l <= threshold).count();
                    log::warn!(
                        "Gradient covariance is singular; pseudo-inverse drops {} of {} eigen-directions",
                        dropped,
                        eigenvalues.len()
                    );
                }
            }
        } else {
            log::debug!(
                "Gradient covariance condition number: {:.3e}",
                largest / smallest
            );
        }

        let inverted = eigenvalues.mapv(|l| if l > threshold && l > 0.0 { 1.0 / l } else { 0.0 });
        let scaled = &eigenvectors * &inverted.insert_axis(Axis(0));
        Ok(scaled.dot(&eigenvectors.t()))
    }
}
