//! Core tensor data structure.
//!
//! # Tensors
//!
//! Parameters, gradients and flat vectors all live in [`Tensor<T>`]: a shape
//! plus row-major data. There is no broadcasting and no strided view; the
//! vectorization layer only ever needs to read contiguous data and reinterpret
//! its shape.
//!
//! ## Example
//!
//! ```rust
//! use briny_continual::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! assert_eq!(t.numel(), 6);
//! ```

use crate::error::{ContinualError, Result};

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    /// Extent of each axis.
    pub shape: Vec<usize>,
    /// Row-major contents.
    pub data: Vec<T>,
}

/// The tensor type every parameter and gradient is stored as.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Fallible counterpart of [`Tensor::new`].
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if the shape product differs from `data.len()`.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ContinualError::shape(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Reinterprets the data under a new shape with the same element count.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if the element counts differ.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        Self::try_new(shape, self.data)
    }
}

impl<T: Copy + Default> Tensor<T> {
    /// A tensor of the given shape filled with `T::default()`.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![T::default(); len],
        }
    }

    /// A default-filled tensor with the same shape as `self`.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    /// Resets every element to `T::default()` without reallocating.
    pub fn fill_default(&mut self) {
        self.data.fill(T::default());
    }
}

impl Ten64 {
    /// Adds `other` element-wise into `self`.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if the shapes differ.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(ContinualError::shape(format!(
                "cannot add {:?} into {:?}",
                other.shape, self.shape
            )));
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b;
        }
        Ok(())
    }

    /// Row `i` of a tensor whose leading axis is the batch axis.
    ///
    /// # Panics
    /// Panics if the tensor is rank 0 or `i` is not below the leading
    /// dimension, which includes every `i` on an empty batch.
    pub fn row(&self, i: usize) -> &[f64] {
        let batch = self.shape.first().copied().unwrap_or(0);
        assert!(i < batch, "row {i} outside leading dimension {batch}");
        let width = self.data.len() / batch;
        &self.data[i * width..(i + 1) * width]
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_continual::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
