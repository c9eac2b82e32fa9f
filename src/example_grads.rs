//! Per-example gradients.
//!
//! # Isolation under one retained graph
//!
//! Episodic-memory methods need the gradient of every stored example on its
//! own. Recomputing the forward pass per example is wasteful, so the
//! extractor runs one forward pass, keeps its backward closure alive as a
//! [`RetainedGraph`], and replays the backward pass once per example with an
//! upstream gradient that is non-zero only for that example's loss term:
//!
//! 1. eval mode, zero gradients
//! 2. forward once, per-example losses once
//! 3. for each example in order: backward(i) → accumulate → flatten → zero
//! 4. release the graph
//!
//! The gradient buffers are shared between steps, so examples are processed
//! strictly one after another. `&mut` access to the model rules out any other
//! gradient writer for the whole extraction.
//!
//! # Per-sample buffers
//!
//! Training collaborators that already record per-sample gradients (one slice
//! per example along a leading batch axis) can skip the replay entirely; see
//! [`flatten_example_grads`].

use tracing::{debug, trace};

use crate::catalog::{Backward, Mode, Model};
use crate::error::{ContinualError, Result};
use crate::gradients::{self, GradientBundle, GradientFilter};
use crate::tensors::{Ten64, Tensor};

/// Maps an example index to `dL_i/d(prediction)`, zero outside row `i`.
pub type LossBackward = dyn Fn(usize) -> Ten64;

/// The loss collaborator, configured for unreduced output.
pub trait PerExampleLoss {
    /// One loss value per example, plus the per-example backward closure.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if `prediction` and `target` disagree.
    fn per_example(&self, prediction: &Ten64, target: &Ten64) -> Result<(Vec<f64>, Box<LossBackward>)>;

    /// Upstream gradient of the summed loss: `Σ_i dL_i/d(prediction)`.
    ///
    /// This is what an ordinary reduced backward pass starts from.
    ///
    /// # Errors
    /// Same as [`PerExampleLoss::per_example`].
    fn sum_backward(&self, prediction: &Ten64, target: &Ten64) -> Result<(f64, Ten64)> {
        let (losses, back) = self.per_example(prediction, target)?;
        let mut upstream = prediction.zeros_like();
        for i in 0..losses.len() {
            upstream.add_assign(&back(i))?;
        }
        Ok((losses.iter().sum(), upstream))
    }
}

fn batch_rows(prediction: &Ten64) -> Result<(usize, usize)> {
    match prediction.shape.as_slice() {
        [batch, rest @ ..] if *batch > 0 && rest.iter().all(|&d| d > 0) => {
            Ok((*batch, rest.iter().product()))
        }
        _ => Err(ContinualError::shape(format!(
            "prediction of shape {:?} has no batch axis",
            prediction.shape
        ))),
    }
}

/// Softmax cross-entropy over the last axis with class-index targets.
///
/// `prediction` is `[batch, classes]` logits, `target` is `[batch]` holding
/// class indices as floats.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl PerExampleLoss for CrossEntropyLoss {
    fn per_example(&self, prediction: &Ten64, target: &Ten64) -> Result<(Vec<f64>, Box<LossBackward>)> {
        let (batch, classes) = batch_rows(prediction)?;
        if target.numel() != batch {
            return Err(ContinualError::shape(format!(
                "{} targets for a batch of {batch}",
                target.numel()
            )));
        }

        let mut softmax = vec![0.0; batch * classes];
        let mut labels = Vec::with_capacity(batch);
        let mut losses = Vec::with_capacity(batch);
        for i in 0..batch {
            let logits = &prediction.data[i * classes..(i + 1) * classes];
            let raw = target.data[i];
            if raw < 0.0 || raw.fract() != 0.0 || raw >= classes as f64 {
                return Err(ContinualError::shape(format!(
                    "target {raw} is not a class index below {classes}"
                )));
            }
            #[allow(clippy::cast_sign_loss)]
            let label = raw as usize;

            let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exp_sum: f64 = logits.iter().map(|&x| (x - max).exp()).sum();
            for (j, &x) in logits.iter().enumerate() {
                softmax[i * classes + j] = (x - max).exp() / exp_sum;
            }
            losses.push(-(logits[label] - max - exp_sum.ln()));
            labels.push(label);
        }

        let shape = prediction.shape.clone();
        let back = move |i: usize| {
            let mut grad: Ten64 = Tensor::zeros(shape.clone());
            let row = &mut grad.data[i * classes..(i + 1) * classes];
            row.copy_from_slice(&softmax[i * classes..(i + 1) * classes]);
            row[labels[i]] -= 1.0;
            grad
        };
        Ok((losses, Box::new(back)))
    }
}

/// `Σ_j (prediction_ij - target_ij)²` per example.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredErrorLoss;

impl PerExampleLoss for SquaredErrorLoss {
    fn per_example(&self, prediction: &Ten64, target: &Ten64) -> Result<(Vec<f64>, Box<LossBackward>)> {
        if prediction.shape != target.shape {
            return Err(ContinualError::shape(format!(
                "prediction {:?} vs target {:?}",
                prediction.shape, target.shape
            )));
        }
        let (batch, width) = batch_rows(prediction)?;
        let diff: Vec<f64> = prediction.data.iter().zip(&target.data).map(|(p, t)| p - t).collect();
        let losses: Vec<f64> = diff.chunks(width).map(|row| row.iter().map(|d| d * d).sum::<f64>()).collect();
        debug_assert_eq!(diff.len(), batch * width);

        let shape = prediction.shape.clone();
        let back = move |i: usize| {
            let mut grad: Ten64 = Tensor::zeros(shape.clone());
            for (g, d) in grad.data[i * width..(i + 1) * width]
                .iter_mut()
                .zip(&diff[i * width..(i + 1) * width])
            {
                *g = 2.0 * d;
            }
            grad
        };
        Ok((losses, Box::new(back)))
    }
}

/// One forward pass's backward closures, kept alive across examples.
///
/// Dropping it releases the captured activations. The extractor drops it after
/// the last example and on every early return.
pub struct RetainedGraph {
    model_backward: Box<Backward>,
    loss_backward: Box<LossBackward>,
    batch: usize,
}

impl RetainedGraph {
    /// Wraps the closures of one forward pass over `batch` examples.
    pub fn new(model_backward: Box<Backward>, loss_backward: Box<LossBackward>, batch: usize) -> Self {
        trace!(batch, "retaining computation graph");
        Self {
            model_backward,
            loss_backward,
            batch,
        }
    }

    /// Number of examples the graph was built for.
    pub const fn batch(&self) -> usize {
        self.batch
    }

    /// Backward pass of example `i`'s loss term alone.
    ///
    /// # Errors
    /// [`ContinualError::ShapeMismatch`] if `i` is outside the batch.
    pub fn backward_example(&self, i: usize) -> Result<GradientBundle> {
        if i >= self.batch {
            return Err(ContinualError::shape(format!(
                "example {i} outside batch of {}",
                self.batch
            )));
        }
        let upstream = (self.loss_backward)(i);
        Ok((self.model_backward)(&upstream))
    }
}

impl Drop for RetainedGraph {
    fn drop(&mut self) {
        trace!(batch = self.batch, "released computation graph");
    }
}

/// Builds the `[batch, dim]` matrix of isolated per-example gradients.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExampleGradientExtractor {
    filter: GradientFilter,
}

impl ExampleGradientExtractor {
    /// An extractor reading every trainable gradient, biases included.
    pub const fn new() -> Self {
        Self {
            filter: GradientFilter {
                include_bias: true,
                only_linear: false,
            },
        }
    }

    /// Restricts which gradient buffers make up each row.
    #[must_use]
    pub const fn with_filter(mut self, filter: GradientFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Row `i` is the gradient the model would receive if example `i` were
    /// alone in the batch.
    ///
    /// The model runs in eval mode for the duration and its previous mode is
    /// restored afterwards. Gradient buffers are left zeroed on success; on
    /// failure their contents are unspecified.
    ///
    /// # Errors
    /// - [`ContinualError::ShapeMismatch`] for an empty batch, a loss that
    ///   reports a different example count, or rows of differing width.
    /// - Anything the model's forward pass or the loss reports.
    pub fn extract<M, L>(&self, model: &mut M, loss: &L, input: &Ten64, target: &Ten64, task: usize) -> Result<Ten64>
    where
        M: Model + ?Sized,
        L: PerExampleLoss + ?Sized,
    {
        let batch = input.shape.first().copied().unwrap_or(0);
        if batch == 0 {
            return Err(ContinualError::shape("empty batch"));
        }

        let previous = model.mode();
        model.set_mode(Mode::Eval);
        let result = self.extract_rows(model, loss, input, target, task, batch);
        model.set_mode(previous);
        result
    }

    fn extract_rows<M, L>(
        &self,
        model: &mut M,
        loss: &L,
        input: &Ten64,
        target: &Ten64,
        task: usize,
        batch: usize,
    ) -> Result<Ten64>
    where
        M: Model + ?Sized,
        L: PerExampleLoss + ?Sized,
    {
        gradients::zero_grad(model);
        let (prediction, model_backward) = model.forward(input, task)?;
        let (losses, loss_backward) = loss.per_example(&prediction, target)?;
        if losses.len() != batch {
            return Err(ContinualError::shape(format!(
                "loss produced {} values for a batch of {batch}",
                losses.len()
            )));
        }

        let graph = RetainedGraph::new(model_backward, loss_backward, batch);
        let mut rows = Vec::new();
        let mut width = None;
        for i in 0..graph.batch() {
            graph.backward_example(i)?.accumulate_into(model)?;
            let row = gradients::collect_gradients(model, self.filter);
            match width {
                None => width = Some(row.len()),
                Some(w) if w != row.len() => {
                    return Err(ContinualError::shape(format!(
                        "example {i} produced {} gradient elements, earlier rows had {w}",
                        row.len()
                    )));
                }
                Some(_) => {}
            }
            rows.extend(row);
            gradients::zero_grad(model);
        }
        drop(graph);

        let width = width.unwrap_or(0);
        debug!(batch, width, "extracted per-example gradients");
        Tensor::try_new(vec![batch, width], rows)
    }
}

/// Stacks per-sample gradient buffers into a `[batch, dim]` matrix.
///
/// Each trainable parameter contributes its `sample_grads` reshaped to
/// `[batch, numel]`; the blocks are joined along the column axis in catalog
/// order.
///
/// # Errors
/// - [`ContinualError::MissingGradient`] if a trainable parameter has no
///   per-sample buffer.
/// - [`ContinualError::ShapeMismatch`] if batch sizes disagree or a buffer's
///   trailing shape differs from its parameter.
/// - [`ContinualError::InvalidModel`] if the model has no parameters.
pub fn flatten_example_grads<M: Model + ?Sized>(model: &M) -> Result<Ten64> {
    let width = crate::catalog::trainable_len(model)?;
    let mut blocks: Vec<(&[f64], usize)> = Vec::new();
    let mut batch = None;
    for p in model.parameters().iter().filter(|p| p.is_trainable()) {
        let sg = p.sample_grads.as_ref().ok_or_else(|| ContinualError::MissingGradient {
            name: p.name.clone(),
        })?;
        let (b, rest) = match sg.shape.split_first() {
            Some((b, rest)) => (*b, rest),
            None => return Err(ContinualError::shape(format!("per-sample gradient of '{}' is a scalar", p.name))),
        };
        if rest != p.value.shape.as_slice() {
            return Err(ContinualError::shape(format!(
                "per-sample gradient of '{}' has trailing shape {rest:?}, parameter has {:?}",
                p.name, p.value.shape
            )));
        }
        match batch {
            None => batch = Some(b),
            Some(existing) if existing != b => {
                return Err(ContinualError::shape(format!(
                    "per-sample gradient of '{}' covers {b} examples, others cover {existing}",
                    p.name
                )));
            }
            Some(_) => {}
        }
        blocks.push((sg.data.as_slice(), p.numel()));
    }

    let batch = batch.unwrap_or(0);
    let mut out = Vec::with_capacity(batch * width);
    for row in 0..batch {
        for (data, numel) in &blocks {
            out.extend_from_slice(&data[row * numel..(row + 1) * numel]);
        }
    }
    Tensor::try_new(vec![batch, width], out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn cross_entropy_rows_are_isolated() {
        let pred = tensor!([[1.0, 2.0, 0.5], [0.0, 0.0, 0.0]]);
        let target = Tensor::new(vec![2], vec![1.0, 2.0]);
        let (losses, back) = CrossEntropyLoss.per_example(&pred, &target).unwrap();
        assert_eq!(losses.len(), 2);
        assert!((losses[1] - 3.0_f64.ln()).abs() < 1e-12);

        let g0 = back(0);
        assert_eq!(&g0.data[3..], &[0.0, 0.0, 0.0]);
        assert!(g0.data[..3].iter().sum::<f64>().abs() < 1e-12);
        assert!(g0.data[1] < 0.0);
    }

    #[test]
    fn cross_entropy_rejects_bad_labels() {
        let pred = tensor!([[1.0, 2.0]]);
        assert!(CrossEntropyLoss.per_example(&pred, &Tensor::new(vec![1], vec![2.0])).is_err());
        assert!(CrossEntropyLoss.per_example(&pred, &Tensor::new(vec![1], vec![0.5])).is_err());
        assert!(CrossEntropyLoss.per_example(&pred, &Tensor::new(vec![2], vec![0.0, 1.0])).is_err());
    }

    #[test]
    fn squared_error_sum_backward() {
        let pred = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let target = tensor!([[0.0, 2.0], [3.0, 3.0]]);
        let (loss, upstream) = SquaredErrorLoss.sum_backward(&pred, &target).unwrap();
        assert_eq!(loss, 2.0);
        assert_eq!(upstream.data, vec![2.0, 0.0, 0.0, 2.0]);
    }
}
