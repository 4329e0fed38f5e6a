//! # The `charseq` crate
//!
//! Character-level LSTM that learns which character follows a fixed-length
//! window of text, then scores lines typed by the operator.

/// The `data` module contains the alphabet, the windowing of a corpus and the
/// batch loader.
pub mod data;

/// The `encode` module turns windows into one-hot tensors.
pub mod encode;

/// The `model` module contains the LSTM network and its checkpoints.
pub mod model;

/// The `learn` module contains the training loop and its progress reporters.
pub mod learn;

/// Loss and accuracy estimation.
pub mod estimate;

/// Training or restoring the model.
pub mod actions;

/// The interactive evaluation loop.
pub mod interactive;

/// Command line and run configuration.
pub mod config;

/// Errors.
pub mod error;
