//! # Chain Store
//!
//! Holds one finished posterior chain: the parameter draws captured from the sampler and the
//! score function (gradient of the log-posterior) evaluated at each of those draws.
//!
//! The store is immutable. Every downstream stage reads the *active chain*, the first
//! `n_iters` draws, through borrowed views and returns fresh arrays; nothing here is ever
//! edited in place, so the original draws survive for side-by-side scoring.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use thiserror::Error;

/// Anything that can evaluate `∇ log p(β | data)` at an arbitrary parameter vector.
///
/// The sampler that produced the draws usually owns this capability; the chain store only
/// borrows it for the one-off gradient pass in [`ChainStore::materialize`].
pub trait GradLogProb {
    /// Number of parameters the target expects.
    fn dim(&self) -> usize;

    fn grad_log_prob(&self, point: ArrayView1<f64>) -> Array1<f64>;
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error(
        "At least 2 draws are required to estimate covariances, but n_iters was {n_iters}."
    )]
    TooFewDraws { n_iters: usize },

    #[error("Non-finite value found in the {which} at draw {row}, dimension {col}.")]
    NonFiniteValues {
        which: &'static str,
        row: usize,
        col: usize,
    },
}

/// A captured chain of posterior draws together with the matching gradient sample.
#[derive(Debug, Clone)]
pub struct ChainStore {
    sample: Array2<f64>,
    gradient: Array2<f64>,
    n_iters: usize,
}

impl ChainStore {
    /// Builds a store from draws and their gradients.
    ///
    /// # Arguments
    /// * `sample` - Posterior draws [n_available, dim]
    /// * `gradient` - Score function at each draw [n_available, dim]
    /// * `n_iters` - Number of leading draws that form the active chain
    ///
    /// Requesting more iterations than there are draws is an error, not a silent clip.
    pub fn new(
        sample: Array2<f64>,
        gradient: Array2<f64>,
        n_iters: usize,
    ) -> Result<Self, ChainError> {
        if sample.dim() != gradient.dim() {
            return Err(ChainError::ShapeMismatch(format!(
                "sample has shape {:?} but the gradient sample has shape {:?}",
                sample.dim(),
                gradient.dim()
            )));
        }
        if n_iters > sample.nrows() {
            return Err(ChainError::ShapeMismatch(format!(
                "requested n_iters = {} but only {} draws are available",
                n_iters,
                sample.nrows()
            )));
        }
        if n_iters < 2 {
            return Err(ChainError::TooFewDraws { n_iters });
        }

        let store = Self {
            sample,
            gradient,
            n_iters,
        };
        check_finite(store.sample(), "sample")?;
        check_finite(store.gradient(), "gradient sample")?;

        log::debug!(
            "Captured chain with {} active draws of dimension {} ({} available)",
            store.n_iters,
            store.dim(),
            store.n_available()
        );
        Ok(store)
    }

    /// Evaluates the gradient once per active draw and builds the store.
    ///
    /// Draws past `n_iters` are dropped before the gradient pass, so the stored sample and
    /// gradient sample always share one shape. The per-draw map is stateless and runs in
    /// parallel; each result lands in its own row.
    pub fn materialize<T>(sample: Array2<f64>, target: &T, n_iters: usize) -> Result<Self, ChainError>
    where
        T: GradLogProb + Sync,
    {
        if n_iters > sample.nrows() {
            return Err(ChainError::ShapeMismatch(format!(
                "requested n_iters = {} but only {} draws are available",
                n_iters,
                sample.nrows()
            )));
        }
        let dim = sample.ncols();
        if target.dim() != dim {
            return Err(ChainError::ShapeMismatch(format!(
                "draws have {} dimensions but the gradient target expects {}",
                dim,
                target.dim()
            )));
        }

        let active = sample.slice_move(s![..n_iters, ..]);
        let rows: Vec<Array1<f64>> = active
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|draw| target.grad_log_prob(draw))
            .collect();

        let mut gradient = Array2::<f64>::zeros(active.dim());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(ChainError::ShapeMismatch(format!(
                    "gradient at draw {} has length {} but the draws have {} dimensions",
                    i,
                    row.len(),
                    dim
                )));
            }
            gradient.row_mut(i).assign(&row);
        }

        log::info!("Materialized {} gradient evaluations", n_iters);
        Self::new(active, gradient, n_iters)
    }

    /// The active chain: the first `n_iters` draws.
    pub fn sample(&self) -> ArrayView2<'_, f64> {
        self.sample.slice(s![..self.n_iters, ..])
    }

    /// Gradient of the log-posterior at each active draw.
    pub fn gradient(&self) -> ArrayView2<'_, f64> {
        self.gradient.slice(s![..self.n_iters, ..])
    }

    pub fn n_iters(&self) -> usize {
        self.n_iters
    }

    pub fn n_available(&self) -> usize {
        self.sample.nrows()
    }

    pub fn dim(&self) -> usize {
        self.sample.ncols()
    }
}

fn check_finite(values: ArrayView2<f64>, which: &'static str) -> Result<(), ChainError> {
    for ((row, col), value) in values.indexed_iter() {
        if !value.is_finite() {
            return Err(ChainError::NonFiniteValues { which, row, col });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Standard normal target: ∇ log p(x) = -x.
    struct StandardNormal {
        dim: usize,
    }

    impl GradLogProb for StandardNormal {
        fn dim(&self) -> usize {
            self.dim
        }

        fn grad_log_prob(&self, point: ArrayView1<f64>) -> Array1<f64> {
            point.mapv(|v| -v)
        }
    }

    /// Returns a gradient that is one element too short.
    struct Truncating;

    impl GradLogProb for Truncating {
        fn dim(&self) -> usize {
            2
        }

        fn grad_log_prob(&self, point: ArrayView1<f64>) -> Array1<f64> {
            point.slice(s![..1]).to_owned()
        }
    }

    fn draws() -> Array2<f64> {
        array![[0.1, 1.0], [0.2, -1.0], [0.3, 0.5], [-0.4, 0.0]]
    }

    #[test]
    fn test_new_accepts_all_available_draws() {
        let store = ChainStore::new(draws(), draws(), 4).unwrap();
        assert_eq!(store.n_iters(), 4);
        assert_eq!(store.dim(), 2);
        assert_eq!(store.sample().dim(), (4, 2));
    }

    #[test]
    fn test_new_rejects_more_iterations_than_draws() {
        let err = ChainStore::new(draws(), draws(), 5).unwrap_err();
        match err {
            ChainError::ShapeMismatch(msg) => assert!(msg.contains("n_iters = 5"), "{msg}"),
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_new_rejects_gradient_of_different_shape() {
        let gradient = array![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let err = ChainStore::new(draws(), gradient, 2).unwrap_err();
        assert!(matches!(err, ChainError::ShapeMismatch(_)));
    }

    #[test]
    fn test_new_rejects_single_draw() {
        let err = ChainStore::new(draws(), draws(), 1).unwrap_err();
        assert!(matches!(err, ChainError::TooFewDraws { n_iters: 1 }));
    }

    #[test]
    fn test_new_rejects_non_finite_gradient() {
        let mut gradient = draws();
        gradient[[2, 1]] = f64::NAN;
        let err = ChainStore::new(draws(), gradient, 4).unwrap_err();
        match err {
            ChainError::NonFiniteValues { which, row, col } => {
                assert_eq!(which, "gradient sample");
                assert_eq!((row, col), (2, 1));
            }
            other => panic!("Expected NonFiniteValues, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_values_past_n_iters_are_ignored() {
        let mut sample = draws();
        sample[[3, 0]] = f64::INFINITY;
        let store = ChainStore::new(sample, draws(), 3).unwrap();
        assert_eq!(store.sample().nrows(), 3);
        assert_eq!(store.n_available(), 4);
    }

    #[test]
    fn test_materialize_evaluates_each_active_draw() {
        let target = StandardNormal { dim: 2 };
        let store = ChainStore::materialize(draws(), &target, 3).unwrap();

        assert_eq!(store.sample().dim(), (3, 2));
        assert_eq!(store.gradient().dim(), (3, 2));
        for i in 0..3 {
            for k in 0..2 {
                assert_eq!(store.gradient()[[i, k]], -draws()[[i, k]]);
            }
        }
    }

    #[test]
    fn test_materialize_rejects_wrong_target_dimension() {
        let target = StandardNormal { dim: 3 };
        let err = ChainStore::materialize(draws(), &target, 4).unwrap_err();
        assert!(matches!(err, ChainError::ShapeMismatch(_)));
    }

    #[test]
    fn test_materialize_rejects_short_gradient() {
        let err = ChainStore::materialize(draws(), &Truncating, 4).unwrap_err();
        match err {
            ChainError::ShapeMismatch(msg) => assert!(msg.contains("has length 1"), "{msg}"),
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }
}
