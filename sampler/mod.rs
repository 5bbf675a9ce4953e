//! Sampling collaborators for the control-variate core.
//!
//! The core never depends on how draws were produced. This module supplies one concrete way
//! to produce them for Bayesian logistic regression: the log-posterior with analytical
//! gradients and a single-chain HMC sampler.

pub mod hmc;
pub mod posterior;

pub use hmc::{HmcChain, HmcConfig, run_hmc};
pub use posterior::LogisticPosterior;

use crate::chain::GradLogProb;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// A differentiable unnormalized log-density.
pub trait LogDensity: GradLogProb {
    /// Returns `(log p(point), ∇ log p(point))`.
    fn log_prob_and_grad(&self, point: ArrayView1<f64>) -> (f64, Array1<f64>);
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid model data: {0}")]
    InvalidData(String),

    #[error("Initial point has {found} dimensions but the target has {expected}.")]
    DimensionMismatch { found: usize, expected: usize },

    #[error("The log-density is not finite at the initial point.")]
    NonFiniteLogDensity,
}
