//! Task × task metric accumulator.
//!
//! Cell `(i, j)` holds a metric measured after training task `i` ("current")
//! on task `j` ("target"), both 1-based. Exported as headerless CSV, one row
//! per current task.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ExperimentConfig;
use crate::error::{ContinualError, Result};

/// Rounds to three decimal places, half to even on the exact binary value.
///
/// Goes through decimal formatting so `9/16` becomes `0.562`, not `0.563`.
pub fn round3(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{value:.3}").parse().unwrap_or(value)
}

/// Square grid of rounded scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricGrid {
    name: String,
    n_tasks: usize,
    data: Vec<f64>,
}

impl MetricGrid {
    /// A zero-filled `n_tasks × n_tasks` grid called `name`.
    pub fn new(name: impl Into<String>, n_tasks: usize) -> Self {
        Self {
            name: name.into(),
            n_tasks,
            data: vec![0.0; n_tasks * n_tasks],
        }
    }

    /// Metric name; also the CSV file stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Side length.
    pub const fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    fn index(&self, current: usize, target: usize) -> Result<usize> {
        for index in [current, target] {
            if index == 0 || index > self.n_tasks {
                return Err(ContinualError::IndexOutOfRange {
                    index,
                    n_tasks: self.n_tasks,
                });
            }
        }
        Ok((current - 1) * self.n_tasks + (target - 1))
    }

    /// Stores `round(value, 3)` at `(current, target)`.
    ///
    /// # Errors
    /// [`ContinualError::IndexOutOfRange`] if either index is outside `[1, n_tasks]`.
    pub fn update(&mut self, current: usize, target: usize, value: f64) -> Result<()> {
        let idx = self.index(current, target)?;
        self.data[idx] = round3(value);
        Ok(())
    }

    /// Value at `(current, target)`.
    ///
    /// # Errors
    /// [`ContinualError::IndexOutOfRange`] if either index is outside `[1, n_tasks]`.
    pub fn get(&self, current: usize, target: usize) -> Result<f64> {
        Ok(self.data[self.index(current, target)?])
    }

    /// One row per current task, comma-separated, newline-terminated.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        if self.n_tasks == 0 {
            return out;
        }
        for row in self.data.chunks(self.n_tasks) {
            let cells: Vec<String> = row.iter().map(f64::to_string).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    /// Writes [`MetricGrid::to_csv`] to `path`.
    ///
    /// # Errors
    /// [`ContinualError::Io`] if the file cannot be written.
    pub fn export(&self, path: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(self.to_csv().as_bytes())?;
        file.flush()?;
        info!(metric = %self.name, path = %path.display(), "exported metric grid");
        Ok(())
    }

    /// Exports to `<exp_dir>/<name>.csv` and returns that path.
    ///
    /// # Errors
    /// [`ContinualError::Io`] if the directory or file cannot be written.
    pub fn save(&self, config: &ExperimentConfig) -> Result<PathBuf> {
        fs::create_dir_all(&config.exp_dir)?;
        let path = config.exp_dir.join(format!("{}.csv", self.name));
        self.export(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_three_places() {
        assert_eq!(round3(0.876_54), 0.877);
        assert_eq!(round3(0.1234), 0.123);
        assert_eq!(round3(-2.0), -2.0);
        assert!(round3(f64::NAN).is_nan());
        assert_eq!(round3(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn rejects_zero_and_overflow() {
        let mut g = MetricGrid::new("acc", 2);
        assert!(g.update(0, 1, 1.0).is_err());
        assert!(g.update(1, 3, 1.0).is_err());
        assert!(g.get(3, 1).is_err());
        g.update(2, 2, 0.5).unwrap();
        assert_eq!(g.get(2, 2).unwrap(), 0.5);
    }
}
