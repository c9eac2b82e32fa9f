//! Whole-model snapshots keyed by `(task, policy)`.
//!
//! Slot rules:
//!
//! - task 0 (or policy `init`) is the shared initialization, stored as `init`;
//! - at task 1 no policy has branched yet, so one save fills the `seq`, `lmc`
//!   and `mtl` slots with the same content;
//! - otherwise the slot is `t_<task>_<policy>`.
//!
//! Snapshots contain every entry, statistics included, unlike flat vectors.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::{self, Model, Parameter};
use crate::error::{ContinualError, Result};
use crate::modelio;

/// Policy label of the shared initialization slot.
pub const INIT_POLICY: &str = "init";

/// Policies that share the task-1 snapshot.
pub const FIRST_TASK_POLICIES: [&str; 3] = ["seq", "lmc", "mtl"];

/// File extension of snapshot files.
pub const SNAPSHOT_EXT: &str = "bpat";

/// Reads and writes snapshots inside one experiment directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// A store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The experiment directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{SNAPSHOT_EXT}"))
    }

    /// The file a `load(task, policy)` reads.
    pub fn path_for(&self, task: usize, policy: &str) -> PathBuf {
        if task == 0 || policy == INIT_POLICY {
            self.slot(INIT_POLICY)
        } else {
            self.slot(&format!("t_{task}_{policy}"))
        }
    }

    /// Every file a `save(task, policy)` writes, in write order.
    pub fn save_paths(&self, task: usize, policy: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if task == 0 || policy == INIT_POLICY {
            paths.push(self.slot(INIT_POLICY));
        }
        if task == 1 {
            paths.extend(FIRST_TASK_POLICIES.iter().map(|p| self.slot(&format!("t_1_{p}"))));
        } else {
            paths.push(self.slot(&format!("t_{task}_{policy}")));
        }
        paths
    }

    /// Writes the model's full parameter set into every slot for `(task, policy)`.
    ///
    /// # Errors
    /// [`ContinualError::Io`] (or a shape error from the codec) on the first
    /// slot that fails; slots written before it are left in place.
    pub fn save<M: Model + ?Sized>(&self, model: &M, task: usize, policy: &str) -> Result<()> {
        for path in self.save_paths(task, policy) {
            modelio::save_bundle(&path, model.parameters())?;
            info!(task, policy, path = %path.display(), "saved snapshot");
        }
        Ok(())
    }

    /// Writes only the shared `init` slot.
    ///
    /// # Errors
    /// Same as [`SnapshotStore::save`].
    pub fn save_init<M: Model + ?Sized>(&self, model: &M) -> Result<()> {
        let path = self.slot(INIT_POLICY);
        modelio::save_bundle(&path, model.parameters())?;
        info!(path = %path.display(), "saved initial snapshot");
        Ok(())
    }

    /// Reads the parameter set stored for `(task, policy)`.
    ///
    /// # Errors
    /// - [`ContinualError::SnapshotNotFound`] if the resolved file is absent.
    /// - [`ContinualError::Corrupt`] or [`ContinualError::Io`] if it cannot be decoded.
    pub fn load(&self, task: usize, policy: &str) -> Result<Vec<Parameter>> {
        let path = self.path_for(task, policy);
        if !path.is_file() {
            return Err(ContinualError::SnapshotNotFound {
                path: path.display().to_string(),
            });
        }
        let params = modelio::load_bundle(&path)?;
        info!(task, policy, path = %path.display(), "loaded snapshot");
        Ok(params)
    }

    /// Loads `(task, policy)` and overwrites the model's values entry by entry.
    ///
    /// Gradient buffers are cleared, since they belong to the replaced weights.
    ///
    /// # Errors
    /// Everything [`SnapshotStore::load`] reports, plus
    /// [`ContinualError::IncompatibleModels`] if the snapshot's names, shapes
    /// or categories differ from the model's catalog. Nothing is written in
    /// that case.
    pub fn load_into<M: Model + ?Sized>(&self, model: &mut M, task: usize, policy: &str) -> Result<()> {
        let stored = self.load(task, policy)?;
        let ours = catalog::enumerate(model)?;
        let theirs: Vec<_> = stored.iter().map(Parameter::entry).collect();
        if ours != theirs {
            return Err(ContinualError::IncompatibleModels {
                left: format!("model with {} entries", ours.len()),
                right: format!("snapshot t{task}/{policy} with {} entries", theirs.len()),
            });
        }
        for (param, snap) in model.parameters_mut().iter_mut().zip(stored) {
            param.value = snap.value;
            param.grad = None;
            param.sample_grads = None;
        }
        Ok(())
    }
}
