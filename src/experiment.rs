//! Glue between the vectorization layer and an experiment driver: metric
//! logging, run identifiers and the initial-checkpoint setup.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::catalog::Model;
use crate::config::ExperimentConfig;
use crate::error::{ContinualError, Result};
use crate::snapshot::SnapshotStore;

/// Receives scalar metrics and the run configuration.
///
/// The transport (a tracking service, a file, stdout) belongs to the
/// implementor.
pub trait ExperimentLogger {
    /// Records `value` for metric `name` at `step`.
    ///
    /// # Errors
    /// Whatever the transport reports.
    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<()>;

    /// Records the configuration once, at setup.
    ///
    /// # Errors
    /// Whatever the transport reports.
    fn log_parameters(&mut self, config: &ExperimentConfig) -> Result<()>;
}

/// Emits metrics as `tracing` events at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ExperimentLogger for TracingLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        info!(metric = name, value, step, "metric");
        Ok(())
    }

    fn log_parameters(&mut self, config: &ExperimentConfig) -> Result<()> {
        info!(
            exp_dir = %config.exp_dir.display(),
            dataset = %config.dataset,
            n_tasks = config.n_tasks,
            device = %config.device,
            seed = config.seed,
            "experiment parameters"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum LogRecord<'a> {
    Metric {
        name: &'a str,
        value: f64,
        step: usize,
        timestamp_ms: u128,
    },
    Parameters {
        config: &'a ExperimentConfig,
        timestamp_ms: u128,
    },
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlLogger {
    path: PathBuf,
}

impl JsonlLogger {
    /// Logs to `path`; parent directories are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut line = serde_json::to_vec(record).map_err(|e| ContinualError::Config(e.to_string()))?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }
}

impl ExperimentLogger for JsonlLogger {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        self.append(&LogRecord::Metric {
            name,
            value,
            step,
            timestamp_ms: now_ms(),
        })
    }

    fn log_parameters(&mut self, config: &ExperimentConfig) -> Result<()> {
        self.append(&LogRecord::Parameters {
            config,
            timestamp_ms: now_ms(),
        })
    }
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `len` random ASCII letters drawn from `rng`.
pub fn random_run_id_with<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(LETTERS[rng.random_range(0..LETTERS.len())]))
        .collect()
}

/// `len` random ASCII letters from the thread-local generator.
pub fn random_run_id(len: usize) -> String {
    random_run_id_with(&mut rand::rng(), len)
}

/// Prepares a run: creates the experiment directory, builds the initial
/// model, stores it in the shared `init` slot and logs the configuration.
///
/// # Errors
/// - [`ContinualError::Config`] if the configuration is invalid.
/// - [`ContinualError::Io`] if the directory or snapshot cannot be written.
/// - Whatever the logger reports.
pub fn setup_experiment<M, L, F>(config: &ExperimentConfig, logger: &mut L, build: F) -> Result<M>
where
    M: Model,
    L: ExperimentLogger + ?Sized,
    F: FnOnce(&ExperimentConfig) -> M,
{
    config.validate()?;
    fs::create_dir_all(&config.exp_dir)?;
    let model = build(config);
    SnapshotStore::new(&config.exp_dir).save_init(&model)?;
    logger.log_parameters(config)?;
    info!(exp_dir = %config.exp_dir.display(), "experiment ready");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn run_ids_are_letters() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = random_run_id_with(&mut rng, 12);
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphabetic()));

        let mut again = StdRng::seed_from_u64(7);
        assert_eq!(random_run_id_with(&mut again, 12), id);
        assert!(random_run_id(0).is_empty());
    }
}
