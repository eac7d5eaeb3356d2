use tch::Kind;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors raised by the residual kernels and the training step.
///
/// None of these are recoverable locally: kernels are pure and deterministic,
/// so retrying an identical input changes nothing. A failing training step
/// aborts before any parameter mutation.
#[derive(Debug, Error)]
pub enum Error {
    /// Tensor rank or dimension inconsistency among kernel or step inputs.
    #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },

    /// A physical coefficient the kernel's PDE requires is absent from the
    /// supplied parameter map.
    #[error("missing coefficient `{name}` for the {kernel} kernel")]
    MissingCoefficient { name: String, kernel: &'static str },

    /// Numeric precision type the model cannot be built with.
    #[error("invalid dtype {found:?}, expected {expected:?}")]
    InvalidDType { expected: Kind, found: Kind },

    /// Quadrature order outside the tabulated Gauss-Legendre rules.
    #[error("unsupported quadrature order {order}, supported orders are 2..=5")]
    UnsupportedQuadrature { order: usize },

    /// Error surfaced by the torch backend (optimizer construction etc.).
    #[error("torch backend error: {0}")]
    Backend(#[from] tch::TchError),
}

impl Error {
    pub(crate) fn shape(context: impl Into<String>, expected: Vec<i64>, found: Vec<i64>) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}
