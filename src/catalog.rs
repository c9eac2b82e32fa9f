//! Parameter catalog and the model collaborator contract.
//!
//! A model exposes its parameters as an ordered slice of [`Parameter`]s. The
//! catalog is the read-only `(name, shape, category)` view of that slice; it is
//! what every other component walks to stay aligned with flat vectors.
//!
//! Whether an entry is a running statistic is decided once, when the model
//! builds the parameter, and carried as a [`Category`]. Nothing downstream
//! inspects names to decide exclusion.

use std::collections::HashSet;

use crate::error::{ContinualError, Result};
use crate::gradients::GradientBundle;
use crate::tensors::Ten64;

/// Name fragments that mark normalization statistics rather than weights.
pub const STATISTIC_MARKERS: [&str; 3] = ["running_mean", "running_var", "num_batches_tracked"];

/// Whether an entry takes part in vectorization and gradient flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Learned weight; present in every flat vector.
    Trainable,
    /// Buffer updated by forward passes only (running mean/variance, counters).
    Statistic,
}

impl Category {
    /// Classification helper for model builders.
    ///
    /// Use it when constructing a [`Parameter`]; the result is stored and never
    /// recomputed.
    pub fn classify(name: &str) -> Self {
        if STATISTIC_MARKERS.iter().any(|m| name.contains(m)) {
            Self::Statistic
        } else {
            Self::Trainable
        }
    }

    /// Byte tag used by the snapshot codec.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Trainable => 0,
            Self::Statistic => 1,
        }
    }

    /// Inverse of [`Category::tag`].
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Trainable),
            1 => Some(Self::Statistic),
            _ => None,
        }
    }
}

/// Live parameter storage owned by a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Unique name within the model.
    pub name: String,
    /// Fixed at construction.
    pub category: Category,
    /// Current value.
    pub value: Ten64,
    /// Gradient buffer; `None` until a backward pass or assignment creates it.
    pub grad: Option<Ten64>,
    /// Per-sample gradients with a leading batch axis, if the training
    /// collaborator records them.
    pub sample_grads: Option<Ten64>,
}

impl Parameter {
    /// A parameter whose category is derived from its name.
    pub fn new(name: impl Into<String>, value: Ten64) -> Self {
        let name = name.into();
        let category = Category::classify(&name);
        Self::with_category(name, category, value)
    }

    /// A parameter with an explicit category.
    pub fn with_category(name: impl Into<String>, category: Category, value: Ten64) -> Self {
        Self {
            name: name.into(),
            category,
            value,
            grad: None,
            sample_grads: None,
        }
    }

    /// Shorthand for `category == Trainable`.
    pub fn is_trainable(&self) -> bool {
        self.category == Category::Trainable
    }

    /// Element count of the value.
    pub fn numel(&self) -> usize {
        self.value.numel()
    }

    /// The catalog view of this parameter.
    pub fn entry(&self) -> ParameterEntry {
        ParameterEntry {
            name: self.name.clone(),
            shape: self.value.shape.clone(),
            category: self.category,
        }
    }
}

/// One row of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterEntry {
    /// Identity of the entry.
    pub name: String,
    /// Extent of each axis.
    pub shape: Vec<usize>,
    /// Trainable or statistic.
    pub category: Category,
}

impl ParameterEntry {
    /// Product of the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Train/eval switch. `Eval` freezes statistic buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Statistic buffers update during forward passes.
    #[default]
    Train,
    /// Statistic buffers are read, never written.
    Eval,
}

/// The retained computation graph of one forward pass.
///
/// Maps `dL/d(output)` to the gradient of every trainable parameter the
/// output depends on. It may be called any number of times.
pub type Backward = dyn Fn(&Ten64) -> GradientBundle;

/// The model collaborator.
///
/// Implementors own their parameters; this crate only reads and writes them
/// through the two accessors and drives forward passes.
pub trait Model {
    /// Parameters in native, stable order.
    fn parameters(&self) -> &[Parameter];

    /// Mutable access in the same order as [`Model::parameters`].
    fn parameters_mut(&mut self) -> &mut [Parameter];

    /// Switches between training and evaluation behaviour.
    fn set_mode(&mut self, mode: Mode);

    /// The current mode.
    fn mode(&self) -> Mode;

    /// Runs the forward pass for `input` under the head selected by `task`.
    ///
    /// # Errors
    /// Implementations report malformed input as [`ContinualError::ShapeMismatch`].
    fn forward(&self, input: &Ten64, task: usize) -> Result<(Ten64, Box<Backward>)>;
}

/// Lists the model's entries in native order.
///
/// Two calls on the same model yield identical sequences.
///
/// # Errors
/// [`ContinualError::InvalidModel`] if there are no parameters or a name repeats.
pub fn enumerate<M: Model + ?Sized>(model: &M) -> Result<Vec<ParameterEntry>> {
    let params = model.parameters();
    if params.is_empty() {
        return Err(ContinualError::invalid_model("model exposes no parameters"));
    }
    let mut seen = HashSet::with_capacity(params.len());
    let mut entries = Vec::with_capacity(params.len());
    for p in params {
        if !seen.insert(p.name.as_str()) {
            return Err(ContinualError::invalid_model(format!(
                "duplicate parameter name '{}'",
                p.name
            )));
        }
        entries.push(p.entry());
    }
    Ok(entries)
}

/// Length of the model's flat vector: the element count of trainable entries.
///
/// # Errors
/// Same as [`enumerate`].
pub fn trainable_len<M: Model + ?Sized>(model: &M) -> Result<usize> {
    Ok(enumerate(model)?
        .iter()
        .filter(|e| e.category == Category::Trainable)
        .map(ParameterEntry::numel)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_statistics() {
        assert_eq!(Category::classify("bn1.running_mean"), Category::Statistic);
        assert_eq!(Category::classify("bn1.running_var"), Category::Statistic);
        assert_eq!(Category::classify("bn1.num_batches_tracked"), Category::Statistic);
        assert_eq!(Category::classify("bn1.weight"), Category::Trainable);
        assert_eq!(Category::classify("linear.bias"), Category::Trainable);
    }

    #[test]
    fn tags_round_trip() {
        for c in [Category::Trainable, Category::Statistic] {
            assert_eq!(Category::from_tag(c.tag()), Some(c));
        }
        assert_eq!(Category::from_tag(9), None);
    }
}
