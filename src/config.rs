//! Experiment configuration loaded from TOML.
//!
//! ```toml
//! exp_dir = "checkpoints/rot-mnist-5"
//! dataset = "rot-mnist"
//! n_tasks = 5
//! device = "rayon"
//! seed = 1234
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::Device;
use crate::error::{ContinualError, Result};

fn default_policy() -> String {
    "seq".to_owned()
}

const fn default_batch_size() -> usize {
    10
}

const fn default_epochs() -> usize {
    1
}

const fn default_lr() -> f64 {
    0.1
}

/// One continual-learning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Directory holding snapshots and metric grids.
    pub exp_dir: PathBuf,
    /// Dataset identifier, passed through to collaborators.
    pub dataset: String,
    /// Number of tasks in the sequence.
    pub n_tasks: usize,
    /// Placement of vector math.
    #[serde(default)]
    pub device: Device,
    /// Seed for model initialization.
    #[serde(default)]
    pub seed: u64,
    /// Policy label snapshots are saved under from task 2 on.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Mini-batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Training epochs per task.
    #[serde(default = "default_epochs")]
    pub epochs_per_task: usize,
    /// Learning rate.
    #[serde(default = "default_lr")]
    pub lr: f64,
}

impl ExperimentConfig {
    /// A config with defaults for everything but the required fields.
    pub fn new(exp_dir: impl Into<PathBuf>, dataset: impl Into<String>, n_tasks: usize) -> Self {
        Self {
            exp_dir: exp_dir.into(),
            dataset: dataset.into(),
            n_tasks,
            device: Device::default(),
            seed: 0,
            policy: default_policy(),
            batch_size: default_batch_size(),
            epochs_per_task: default_epochs(),
            lr: default_lr(),
        }
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    /// [`ContinualError::Io`] if unreadable, [`ContinualError::Config`] if
    /// malformed or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Serializes back to TOML.
    ///
    /// # Errors
    /// [`ContinualError::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ContinualError::Config(e.to_string()))
    }

    /// Checks the invariants serde cannot express.
    ///
    /// # Errors
    /// [`ContinualError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.exp_dir.as_os_str().is_empty() {
            return Err(ContinualError::Config("exp_dir must not be empty".into()));
        }
        if self.n_tasks == 0 {
            return Err(ContinualError::Config("n_tasks must be at least 1".into()));
        }
        if self.policy.is_empty() {
            return Err(ContinualError::Config("policy must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ContinualError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl FromStr for ExperimentConfig {
    type Err = ContinualError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ContinualError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
