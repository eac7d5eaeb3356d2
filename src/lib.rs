//! Variational (weak-form) PDE residuals for physics-informed neural network
//! training.
//!
//! The core is a family of residual kernels ([`physics`]) that turn pointwise
//! network predictions and their spatial derivatives at quadrature points into
//! per-element weak-form residuals, weighted by precomputed test-function
//! matrices. On top sits a training-step orchestrator ([`train`]) that runs
//! nested reverse-mode differentiation, combines the PDE residual with
//! boundary and initial-condition losses and applies one optimizer update per
//! step, all-or-nothing.

pub mod autodiff;
pub mod error;
pub mod model;
pub mod params;
pub mod physics;
pub mod problem;
pub mod train;
pub mod visualization;

pub use error::{Error, Result};
pub use params::{BilinearParams, CoefficientMap, InverseParams};
pub use physics::{PdeKernel, QuadField, TestFunctions};
pub use train::{StepLosses, TrainConfig, TrainingInputs, TrainingState};
