//! The fit/postprocess cycle.
//!
//! `fit` draws a chain for a logistic-regression posterior and captures one gradient per
//! draw. `postprocess` reduces that chain with control variates and scores the raw and the
//! adjusted draws on the same held-out set.

use crate::chain::{ChainError, ChainStore};
use crate::config::ConfigError;
use crate::covariance::column_variances;
use crate::evaluate::{EvaluationError, PredictiveEvaluator};
use crate::reducer::{ControlVariateReducer, ReducerConfig, Reduction, ReductionError};
use crate::sampler::{HmcConfig, LogisticPosterior, SamplerError, run_hmc};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Reduction(#[from] ReductionError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

/// Summary of one postprocess run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostprocessReport {
    pub n_iters: usize,
    pub dim: usize,
    pub original_log_loss: f64,
    pub adjusted_log_loss: f64,
    /// `adjusted_log_loss - original_log_loss`; negative means the adjustment helped.
    pub log_loss_change: f64,
    /// Per-dimension sample variance of the raw draws.
    pub variance_original: Vec<f64>,
    /// Per-dimension sample variance of the adjusted draws.
    pub variance_adjusted: Vec<f64>,
}

impl PostprocessReport {
    /// `Var(adjusted) / Var(original)` per dimension. A column with zero raw variance has
    /// ratio 1 when the adjusted column is also constant.
    pub fn variance_ratios(&self) -> Vec<f64> {
        self.variance_original
            .iter()
            .zip(&self.variance_adjusted)
            .map(|(&before, &after)| {
                if before == 0.0 {
                    if after == 0.0 { 1.0 } else { f64::INFINITY }
                } else {
                    after / before
                }
            })
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }
}

impl fmt::Display for PostprocessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Old log loss: {}\tNew log loss: {}",
            self.original_log_loss, self.adjusted_log_loss
        )?;
        write!(f, "Variance ratio (adjusted / original) over {} draws:", self.n_iters)?;
        for (j, ratio) in self.variance_ratios().into_iter().enumerate() {
            write!(f, "\n  beta_{j}: {ratio:.4}")?;
        }
        Ok(())
    }
}

/// Adjusted draws together with the report that scored them.
#[derive(Clone, Debug)]
pub struct Postprocessed {
    pub reduction: Reduction,
    pub report: PostprocessReport,
}

/// Reduces the active chain and scores both samples on the evaluator's held-out set.
///
/// Fails atomically: either both log-losses are computed or nothing is returned.
pub fn postprocess(
    store: &ChainStore,
    evaluator: &PredictiveEvaluator,
    config: &ReducerConfig,
) -> Result<Postprocessed, PipelineError> {
    let n_iters = store.n_iters();
    log::info!(
        "Postprocessing {} draws of dimension {} against {} held-out rows",
        n_iters,
        store.dim(),
        evaluator.held_out().n_observations()
    );

    let reduction = ControlVariateReducer::new(config.clone())?.reduce(store)?;

    let original_log_loss = evaluator.log_loss(store.sample(), n_iters)?;
    let adjusted_log_loss = evaluator.log_loss(reduction.adjusted.view(), n_iters)?;

    let variance_original: Array1<f64> = column_variances(store.sample());
    let variance_adjusted: Array1<f64> = column_variances(reduction.adjusted.view());

    let report = PostprocessReport {
        n_iters,
        dim: store.dim(),
        original_log_loss,
        adjusted_log_loss,
        log_loss_change: adjusted_log_loss - original_log_loss,
        variance_original: variance_original.to_vec(),
        variance_adjusted: variance_adjusted.to_vec(),
    };
    log::info!(
        "Old log loss: {:.6}, new log loss: {:.6}",
        report.original_log_loss,
        report.adjusted_log_loss
    );

    Ok(Postprocessed { reduction, report })
}

/// Samples the logistic-regression posterior and captures the gradient at every kept draw.
pub fn fit(
    x_train: ArrayView2<f64>,
    y_train: ArrayView1<i64>,
    config: &HmcConfig,
) -> Result<ChainStore, PipelineError> {
    let target = LogisticPosterior::new(x_train, y_train, config.prior_scale)?;
    let init = Array1::<f64>::zeros(x_train.ncols());
    let chain = run_hmc(&target, init.view(), config)?;
    log::info!(
        "HMC finished: acceptance rate {:.3}, step size {:.4}",
        chain.accept_rate,
        chain.step_size
    );
    let store = ChainStore::materialize(chain.draws, &target, config.n_iters)?;
    Ok(store)
}
