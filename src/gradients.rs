//! Gradient buffers: reading them as flat vectors, merging backward output
//! into them, and clearing them between passes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::{Category, Model};
use crate::error::{ContinualError, Result};
use crate::tensors::Ten64;

/// Gradients produced by one backward call, keyed by parameter name.
///
/// Only trainable parameters appear. A missing name means the output did not
/// depend on that parameter in this pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientBundle {
    grads: BTreeMap<String, Ten64>,
}

impl GradientBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `grad` for `name`, summing with any gradient already present.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if an existing entry has another shape.
    pub fn insert(&mut self, name: impl Into<String>, grad: Ten64) -> Result<()> {
        let name = name.into();
        match self.grads.get_mut(&name) {
            Some(existing) => existing.add_assign(&grad),
            None => {
                self.grads.insert(name, grad);
                Ok(())
            }
        }
    }

    /// Gradient recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&Ten64> {
        self.grads.get(name)
    }

    /// Number of parameters with a gradient.
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// `true` if no parameter received a gradient.
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Iterates `(name, gradient)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Ten64)> {
        self.grads.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Adds every gradient into the matching parameter's buffer, creating
    /// buffers that do not exist yet.
    ///
    /// All names and shapes are checked before the first write.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if a name is unknown, belongs to a
    /// statistic entry, or its shape differs from the parameter's.
    pub fn accumulate_into<M: Model + ?Sized>(&self, model: &mut M) -> Result<()> {
        let params = model.parameters();
        let mut targets = Vec::with_capacity(self.grads.len());
        for (name, grad) in &self.grads {
            let idx = params
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| ContinualError::shape(format!("gradient for unknown parameter '{name}'")))?;
            let param = &params[idx];
            if param.category == Category::Statistic {
                return Err(ContinualError::shape(format!(
                    "gradient supplied for statistic entry '{name}'"
                )));
            }
            if param.value.shape != grad.shape {
                return Err(ContinualError::shape(format!(
                    "gradient for '{name}' has shape {:?}, parameter has {:?}",
                    grad.shape, param.value.shape
                )));
            }
            targets.push((idx, grad));
        }

        let params = model.parameters_mut();
        for (idx, grad) in targets {
            match params[idx].grad.as_mut() {
                Some(buf) => buf.add_assign(grad)?,
                None => params[idx].grad = Some(grad.clone()),
            }
        }
        Ok(())
    }
}

/// Which gradient buffers [`collect_gradients`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientFilter {
    /// Keep entries whose name contains `bias`.
    pub include_bias: bool,
    /// Keep only entries whose name contains `linear`.
    pub only_linear: bool,
}

impl Default for GradientFilter {
    fn default() -> Self {
        Self {
            include_bias: true,
            only_linear: false,
        }
    }
}

impl GradientFilter {
    /// Whether an entry with this name passes the filter.
    pub fn admits(&self, name: &str) -> bool {
        if !self.include_bias && name.contains("bias") {
            return false;
        }
        !self.only_linear || name.contains("linear")
    }
}

/// Concatenates gradient buffers in catalog order.
///
/// Statistic entries never contribute. Entries without a buffer are skipped,
/// so partially trained sub-networks (e.g. untouched task heads) are allowed.
pub fn collect_gradients<M: Model + ?Sized>(model: &M, filter: GradientFilter) -> Vec<f64> {
    let mut flat = Vec::new();
    let mut skipped = 0usize;
    for p in model.parameters() {
        if !p.is_trainable() || !filter.admits(&p.name) {
            continue;
        }
        match &p.grad {
            Some(g) => flat.extend_from_slice(&g.data),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, len = flat.len(), "collected gradients, some entries carried none");
    }
    flat
}

/// Zero-fills every existing gradient buffer. Absent buffers stay absent.
pub fn zero_grad<M: Model + ?Sized>(model: &mut M) {
    for p in model.parameters_mut() {
        if let Some(g) = p.grad.as_mut() {
            g.fill_default();
        }
    }
}

/// Drops every gradient buffer.
pub fn clear_grad<M: Model + ?Sized>(model: &mut M) {
    for p in model.parameters_mut() {
        p.grad = None;
    }
}
