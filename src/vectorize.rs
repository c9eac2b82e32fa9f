//! Flat-vector view of a model's trainable parameters.
//!
//! # Layout
//!
//! A flat vector is the concatenation, in catalog order, of the row-major data
//! of every trainable entry. Statistic entries never appear. The inverse walk
//! consumes one contiguous slice per trainable entry and must land exactly on
//! the end of the vector.
//!
//! ```text
//! catalog:  fc1.weight [4,3]   bn.running_mean [4]   fc1.bias [4]
//! flat:     |---- 12 ----|                           |-- 4 --|
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let v = Vectorizer::new(Device::Cpu);
//! let flat = v.flatten(&model)?;
//! v.unflatten_into(&mut model, &flat, WriteMode::AssignValue)?;
//! ```

use tracing::debug;

use crate::backend::Device;
use crate::catalog::{self, Model};
use crate::error::{ContinualError, Result};
use crate::tensors::Tensor;

/// What [`Vectorizer::unflatten_into`] does with each slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the parameter value.
    AssignValue,
    /// Replace (or create) the gradient buffer.
    AssignGradient,
    /// Add into the existing gradient buffer.
    AccumulateGradient,
}

/// Converts between a model and its flat vector.
///
/// Holds only its [`Device`]; every call is a pure function of the model it
/// is given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vectorizer {
    device: Device,
}

impl Vectorizer {
    /// A vectorizer doing its math on `device`.
    pub const fn new(device: Device) -> Self {
        Self { device }
    }

    /// The configured device.
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Concatenates trainable values in catalog order.
    ///
    /// The result owns its data; mutating the model afterwards does not
    /// affect it.
    ///
    /// # Errors
    /// [`ContinualError::InvalidModel`] if the model cannot be enumerated.
    pub fn flatten<M: Model + ?Sized>(&self, model: &M) -> Result<Vec<f64>> {
        let len = catalog::trainable_len(model)?;
        let mut flat = Vec::with_capacity(len);
        for p in model.parameters().iter().filter(|p| p.is_trainable()) {
            flat.extend_from_slice(&p.value.data);
        }
        debug!(len, "flattened trainable parameters");
        Ok(flat)
    }

    /// Writes `vector` back into the model, one trainable entry at a time.
    ///
    /// Preconditions are checked before anything is written: a failing call
    /// leaves the model untouched.
    ///
    /// # Errors
    /// - [`ContinualError::LengthMismatch`] if `vector.len()` is not the
    ///   trainable element count.
    /// - [`ContinualError::MissingGradient`] in
    ///   [`WriteMode::AccumulateGradient`] when an entry has no buffer.
    /// - [`ContinualError::ShapeMismatch`] in
    ///   [`WriteMode::AccumulateGradient`] when a buffer's shape differs from
    ///   its parameter's.
    /// - [`ContinualError::InvalidModel`] if the model cannot be enumerated.
    pub fn unflatten_into<M: Model + ?Sized>(
        &self,
        model: &mut M,
        vector: &[f64],
        mode: WriteMode,
    ) -> Result<()> {
        let expected = catalog::trainable_len(model)?;
        if vector.len() != expected {
            return Err(ContinualError::LengthMismatch {
                expected,
                got: vector.len(),
            });
        }
        if mode == WriteMode::AccumulateGradient {
            for p in model.parameters().iter().filter(|p| p.is_trainable()) {
                let grad = p.grad.as_ref().ok_or_else(|| ContinualError::MissingGradient {
                    name: p.name.clone(),
                })?;
                if grad.shape != p.value.shape {
                    return Err(ContinualError::shape(format!(
                        "gradient buffer of '{}' has shape {:?}, parameter has {:?}",
                        p.name, grad.shape, p.value.shape
                    )));
                }
            }
        }

        let mut index = 0;
        for p in model.parameters_mut().iter_mut().filter(|p| p.is_trainable()) {
            let count = p.numel();
            let slice = &vector[index..index + count];
            match mode {
                WriteMode::AssignValue => p.value.data.copy_from_slice(slice),
                WriteMode::AssignGradient => {
                    p.grad = Some(Tensor::new(p.value.shape.clone(), slice.to_vec()));
                }
                WriteMode::AccumulateGradient => {
                    if let Some(g) = p.grad.as_mut() {
                        for (acc, x) in g.data.iter_mut().zip(slice) {
                            *acc += *x;
                        }
                    }
                }
            }
            index += count;
        }
        debug_assert_eq!(index, vector.len());
        debug!(len = index, ?mode, "unflattened vector into model");
        Ok(())
    }
}
