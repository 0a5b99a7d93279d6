// Rotated EOF and MCA

#![doc = include_str!("../README.md")]

pub mod decomposition;
pub mod eof_rotator;
pub mod error;
pub mod hilbert;
pub mod linalg_backends;
pub mod mca_rotator;
pub mod metadata;
pub mod ordering;
pub mod preprocessing;
pub mod projector;
pub mod rotation;
pub mod solution;

pub use decomposition::{ComplexEof, ComplexMca, Eof, EofConfig, Mca, McaConfig};
pub use eof_rotator::{ComplexEofRotator, EofRotator};
pub use error::{Result, RotationError};
pub use hilbert::{analytic_signal, AnalyticSignalBuilder, Padding};
pub use linalg_backends::{LinAlgBackend, ModeScalar, NdarrayLinAlgBackend, ValueKind};
pub use mca_rotator::{ComplexMcaRotator, McaRotator};
pub use metadata::{ComputePolicy, ModelMetadata, RotatorConfig};
pub use ordering::{normalize_sign, reorder, ModePermutation, SignVector};
pub use preprocessing::{Centerer, Preprocessor};
pub use projector::{reconstruct, ModeSelection, RotatedProjector};
pub use rotation::{rotate, RotationConfig, RotationEngine, RotationKind, RotationOutput};
pub use solution::{fit_rotation, OrderingCriterion, RotatedResult};

pub use ndarray_linalg::c64;
