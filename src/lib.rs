//! # `briny_continual`
//!
//! Parameter and gradient vectorization for continual-learning experiments.
//!
//! A model's named tensors are mapped to one flat vector and back, in a
//! stable order, with running statistics left out. On top of that mapping the
//! crate provides vector metrics between models, per-example gradient
//! extraction for episodic-memory methods, and the bookkeeping of a
//! multi-task run: snapshots per `(task, policy)` and task × task metric
//! grids.
//!
//! ## Modules
//!
//! - [`catalog`] — the model contract and its ordered parameter entries
//! - [`vectorize`] — flatten / unflatten between a model and a flat vector
//! - [`gradients`] — reading, merging and zeroing gradient buffers
//! - [`example_grads`] — isolated per-example gradients
//! - [`metrics`] — L2 distance and cosine similarity between models
//! - [`snapshot`], [`modelio`] — whole-model persistence
//! - [`grid`] — task × task metric accumulator with CSV export
//! - [`config`], [`experiment`] — run configuration, logging and setup
//!
//! Training, architectures and optimizers belong to the caller; they plug
//! in through [`catalog::Model`] and [`example_grads::PerExampleLoss`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::similar_names,
    clippy::must_use_candidate
)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod example_grads;
pub mod experiment;
pub mod gradients;
pub mod grid;
pub mod metrics;
pub mod modelio;
pub mod snapshot;
pub mod tensors;
pub mod vectorize;

pub use backend::Device;
pub use catalog::{Category, Mode, Model, Parameter, ParameterEntry};
pub use error::{ContinualError, Result};
pub use example_grads::{CrossEntropyLoss, ExampleGradientExtractor, PerExampleLoss, SquaredErrorLoss};
pub use gradients::{GradientBundle, GradientFilter};
pub use grid::MetricGrid;
pub use snapshot::SnapshotStore;
pub use vectorize::{Vectorizer, WriteMode};
