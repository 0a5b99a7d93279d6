// src/error.rs

use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the rotation, projection and analytic-signal stages.
#[derive(Debug, Error)]
pub enum RotationError {
    /// Parameters that can never produce a valid model (e.g. `n_modes` larger than
    /// the decomposition provides, or fewer features than modes).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An accessor, `transform` or `inverse_transform` was called before `fit`.
    #[error("{0} has not been fitted yet. Call `fit` first.")]
    NotFitted(&'static str),

    /// The operation is not mathematically defined for this model variant.
    #[error("{0} is not implemented for complex-valued models.")]
    NotImplemented(&'static str),

    /// The data handed to an operation violates its preconditions.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} failed: {source}")]
    Linalg {
        operation: &'static str,
        #[source]
        source: ThreadSafeStdError,
    },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RotationError {
    /// Wraps a backend failure, naming the operation that produced it.
    pub(crate) fn linalg(operation: &'static str) -> impl FnOnce(ThreadSafeStdError) -> Self {
        move |source| RotationError::Linalg { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, RotationError>;
