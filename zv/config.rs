//! TOML configuration shared by the library entry points and the CLI.
//!
//! Every section is optional in the file; missing fields fall back to their defaults.
//!
//! ```toml
//! [reducer]
//! singular_policy = "pseudo_inverse"
//!
//! [evaluator]
//! prediction_rule = "sigmoid"
//! clip_eps = 1e-12
//!
//! [sampler]
//! n_iters = 2000
//! seed = 7
//! ```

use crate::evaluate::EvaluatorConfig;
use crate::reducer::ReducerConfig;
use crate::sampler::HmcConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZvConfig {
    pub reducer: ReducerConfig,
    pub evaluator: EvaluatorConfig,
    pub sampler: HmcConfig,
}

impl ZvConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }
}
