// src/linalg_backends.rs

use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use ndarray_linalg::{c64, Inverse, Lapack, LeastSquaresSvd, SVDInto, Scalar};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::error::{Result, ThreadSafeStdError};
use crate::hilbert::AnalyticSignalBuilder;

// --- Value domain ---

/// Whether a model works on real data or on its complex analytic extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Real,
    Complex,
}

/// Element type of loadings, scores and rotation matrices.
///
/// Implemented for `f64` (real EOF/MCA) and `c64` (complex EOF/MCA on the
/// analytic signal). Magnitudes and all derived per-mode quantities are `f64`.
pub trait ModeScalar:
    Scalar<Real = f64> + Lapack + Send + Sync + Serialize + DeserializeOwned
{
    const KIND: ValueKind;

    /// Brings centred real canonical data (samples × features) into this value domain.
    fn lift(data: Array2<f64>, analytic: &AnalyticSignalBuilder) -> Result<Array2<Self>>;
}

impl ModeScalar for f64 {
    const KIND: ValueKind = ValueKind::Real;

    fn lift(data: Array2<f64>, _analytic: &AnalyticSignalBuilder) -> Result<Array2<f64>> {
        Ok(data)
    }
}

impl ModeScalar for c64 {
    const KIND: ValueKind = ValueKind::Complex;

    fn lift(data: Array2<f64>, analytic: &AnalyticSignalBuilder) -> Result<Array2<c64>> {
        analytic.transform_columns(data.view())
    }
}

/// Conjugate transpose. For real matrices this is the plain transpose.
pub fn adjoint<A, S>(matrix: &ArrayBase<S, Ix2>) -> Array2<A>
where
    A: ModeScalar,
    S: Data<Elem = A>,
{
    matrix.t().mapv(|v| v.conj())
}

// --- Trait Definitions ---

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<F>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD<F: ModeScalar> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> std::result::Result<SVDOutput<F>, ThreadSafeStdError>;
}

/// Trait for the inverse of a square matrix.
pub trait BackendInverse<F: ModeScalar> {
    fn inverse(&self, matrix: &Array2<F>) -> std::result::Result<Array2<F>, ThreadSafeStdError>;
}

/// Trait for least-squares solutions of `A · X ≈ B` with a matrix right-hand side.
pub trait BackendLeastSquares<F: ModeScalar> {
    fn least_squares(&self, a: &Array2<F>, b: &Array2<F>) -> std::result::Result<Array2<F>, ThreadSafeStdError>;
}

/// Everything the rotation and projection stages need from a backend.
pub trait LinAlgBackend<F: ModeScalar>: BackendSVD<F> + BackendInverse<F> + BackendLeastSquares<F> {}

impl<F, B> LinAlgBackend<F> for B
where
    F: ModeScalar,
    B: BackendSVD<F> + BackendInverse<F> + BackendLeastSquares<F>,
{
}

// --- NdarrayLinAlgBackend Implementation ---

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl<F: ModeScalar> BackendSVD<F> for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> std::result::Result<SVDOutput<F>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k_dim = nrows.min(ncols);
            return Ok(SVDOutput {
                u: if compute_u { Some(Array2::from_elem((nrows, k_dim), F::from_real(0.0))) } else { None },
                s: Array1::zeros(k_dim),
                vt: if compute_v { Some(Array2::from_elem((k_dim, ncols), F::from_real(0.0))) } else { None },
            });
        }
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

impl<F: ModeScalar> BackendInverse<F> for NdarrayLinAlgBackend {
    fn inverse(&self, matrix: &Array2<F>) -> std::result::Result<Array2<F>, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!(
                "Matrix must be square for inversion, got {}x{}.",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        matrix.inv().map_err(to_dyn_error)
    }
}

impl<F: ModeScalar> BackendLeastSquares<F> for NdarrayLinAlgBackend {
    fn least_squares(&self, a: &Array2<F>, b: &Array2<F>) -> std::result::Result<Array2<F>, ThreadSafeStdError> {
        if a.nrows() != b.nrows() {
            return Err(format!(
                "Least squares requires matching row counts, got {} and {}.",
                a.nrows(),
                b.nrows()
            )
            .into());
        }
        let result = a.least_squares(b).map_err(to_dyn_error)?;
        Ok(result.solution)
    }
}
