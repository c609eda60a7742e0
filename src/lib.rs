//! Train MNIST classifiers and export their learned parameters.
//!
//! Two pipelines are provided:
//!
//! - [`logreg`]: multinomial logistic regression fitted with L-BFGS, exported
//!   as a flat `{inDim, outDim, W, b}` JSON document.
//! - [`training`]: a small convolutional network trained with burn's learner,
//!   exported by [`export`] in three redundant formats.

pub mod data;
pub mod error;
pub mod export;
pub mod logger;
pub mod logreg;
pub mod model;
pub mod training;

pub use error::{Result, TrainError};
