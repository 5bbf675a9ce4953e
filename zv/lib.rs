#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod chain;
pub mod config;
pub mod covariance;
pub mod evaluate;
pub mod io;
pub mod pipeline;
pub mod reducer;

#[path = "../sampler/mod.rs"]
pub mod sampler;

pub use chain::{ChainError, ChainStore, GradLogProb};
pub use config::{ConfigError, ZvConfig};
pub use evaluate::{EvaluationError, EvaluatorConfig, HeldOutSet, PredictionRule, PredictiveEvaluator};
pub use pipeline::{PipelineError, PostprocessReport, Postprocessed, fit, postprocess};
pub use reducer::{ControlVariateReducer, Reduction, ReductionError, ReducerConfig, SingularPolicy};
