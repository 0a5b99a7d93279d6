// src/projector.rs

//! Projection into, and reconstruction from, the rotated mode frame.
//!
//! Fit-time scores and out-of-sample projections take the same path:
//! unit-normalised unrotated scores `S` become `S · invT(R)`, are permuted and
//! signed with the fit-time [`ModePermutation`] and [`SignVector`], and are
//! finally scaled by the per-mode norms.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::ops::Range;

use crate::error::{Result, RotationError};
use crate::linalg_backends::{adjoint, LinAlgBackend, ModeScalar};
use crate::ordering::{ModePermutation, SignVector};
use crate::rotation::RotationKind;

/// `R` itself for orthogonal rotations, `(R⁻¹)ᴴ` otherwise.
pub fn inverse_transpose<A, B>(kind: RotationKind, rotation_matrix: &Array2<A>, backend: &B) -> Result<Array2<A>>
where
    A: ModeScalar,
    B: LinAlgBackend<A>,
{
    match kind {
        RotationKind::Orthogonal => Ok(rotation_matrix.clone()),
        RotationKind::Oblique { .. } => {
            let inverse = backend
                .inverse(rotation_matrix)
                .map_err(RotationError::linalg("Inversion of the rotation matrix"))?;
            Ok(adjoint(&inverse))
        }
    }
}

/// Fit-time projection state. Built once and never modified.
#[derive(Debug, Clone)]
pub struct RotatedProjector<A> {
    kind: RotationKind,
    rotation_inv_t: Array2<A>,
    permutation: ModePermutation,
    signs: SignVector,
    norms: Array1<f64>,
}

impl<A: ModeScalar> RotatedProjector<A> {
    /// `norms` are given in final (permuted) mode order.
    pub fn new<B: LinAlgBackend<A>>(
        kind: RotationKind,
        rotation_matrix: &Array2<A>,
        permutation: ModePermutation,
        signs: SignVector,
        norms: Array1<f64>,
        backend: &B,
    ) -> Result<Self> {
        let n_modes = rotation_matrix.nrows();
        if rotation_matrix.ncols() != n_modes
            || permutation.len() != n_modes
            || signs.len() != n_modes
            || norms.len() != n_modes
        {
            return Err(RotationError::InvalidInput(format!(
                "Inconsistent projector state: rotation {}x{}, permutation {}, signs {}, norms {}.",
                rotation_matrix.nrows(),
                rotation_matrix.ncols(),
                permutation.len(),
                signs.len(),
                norms.len()
            )));
        }
        let rotation_inv_t = inverse_transpose(kind, rotation_matrix, backend)?;
        Ok(Self {
            kind,
            rotation_inv_t,
            permutation,
            signs,
            norms,
        })
    }

    pub fn kind(&self) -> RotationKind {
        self.kind
    }

    pub fn n_modes(&self) -> usize {
        self.norms.len()
    }

    pub fn rotation_inv_t(&self) -> &Array2<A> {
        &self.rotation_inv_t
    }

    pub fn norms(&self) -> &Array1<f64> {
        &self.norms
    }

    /// Carries unit-normalised unrotated scores (samples × modes) into the rotated frame.
    pub fn project(&self, unrotated: ArrayView2<A>) -> Result<Array2<A>> {
        if unrotated.ncols() != self.n_modes() {
            return Err(RotationError::InvalidInput(format!(
                "Expected scores with {} modes, got {}.",
                self.n_modes(),
                unrotated.ncols()
            )));
        }
        let rotated = unrotated.dot(&self.rotation_inv_t);
        let mut projected = self.permutation.apply_to_columns(&rotated.view());
        self.signs.apply_to_columns(&mut projected);
        for (mut col, &norm) in projected.axis_iter_mut(Axis(1)).zip(self.norms.iter()) {
            col.mapv_inplace(|v| v.mul_real(norm));
        }
        Ok(projected)
    }
}

/// Which modes enter a reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModeSelection {
    #[default]
    All,
    Single(usize),
    Range(Range<usize>),
    List(Vec<usize>),
}

impl ModeSelection {
    /// Resolves to explicit mode indices, checked against `n_modes`.
    pub fn resolve(&self, n_modes: usize) -> Result<Vec<usize>> {
        let modes: Vec<usize> = match self {
            ModeSelection::All => (0..n_modes).collect(),
            ModeSelection::Single(mode) => vec![*mode],
            ModeSelection::Range(range) => range.clone().collect(),
            ModeSelection::List(modes) => modes.clone(),
        };
        if modes.is_empty() {
            return Err(RotationError::InvalidInput("Mode selection is empty.".to_string()));
        }
        let mut seen = vec![false; n_modes];
        for &mode in &modes {
            if mode >= n_modes {
                return Err(RotationError::InvalidInput(format!(
                    "Mode {} selected but the model has only {} modes.",
                    mode, n_modes
                )));
            }
            if seen[mode] {
                return Err(RotationError::InvalidInput(format!(
                    "Mode {} is selected more than once.",
                    mode
                )));
            }
            seen[mode] = true;
        }
        Ok(modes)
    }
}

/// `Re(Σ_k scores[:, k] · conj(components[:, k])ᵀ · norms[k])` over the selected modes.
///
/// Returns a samples × features real matrix; the imaginary part carried by
/// analytic-signal models is discarded.
pub fn reconstruct<A: ModeScalar>(
    scores: ArrayView2<A>,
    components: ArrayView2<A>,
    norms: ArrayView1<f64>,
    selection: &ModeSelection,
) -> Result<Array2<f64>> {
    let n_modes = scores.ncols();
    if components.ncols() != n_modes || norms.len() != n_modes {
        return Err(RotationError::InvalidInput(format!(
            "Scores ({} modes), components ({} modes) and norms ({}) disagree.",
            n_modes,
            components.ncols(),
            norms.len()
        )));
    }
    let modes = selection.resolve(n_modes)?;

    let mut weighted_scores = scores.select(Axis(1), &modes);
    for (mut col, &mode) in weighted_scores.axis_iter_mut(Axis(1)).zip(modes.iter()) {
        let norm = norms[mode];
        col.mapv_inplace(|v| v.mul_real(norm));
    }
    let components_h = adjoint(&components.select(Axis(1), &modes));
    Ok(weighted_scores.dot(&components_h).mapv(|v| v.re()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg_backends::NdarrayLinAlgBackend;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_linalg::c64;

    #[test]
    fn test_orthogonal_inverse_transpose_is_identity_map() {
        let r = array![[0.6, -0.8], [0.8, 0.6]];
        let inv_t = inverse_transpose(RotationKind::Orthogonal, &r, &NdarrayLinAlgBackend).unwrap();
        assert_eq!(inv_t, r);
    }

    #[test]
    fn test_oblique_inverse_transpose_conjugates() {
        let r = array![[c64::new(1.0, 0.5), c64::new(0.2, 0.0)], [c64::new(0.0, -0.3), c64::new(0.9, 0.1)]];
        let inv_t = inverse_transpose(RotationKind::Oblique { power: 4 }, &r, &NdarrayLinAlgBackend).unwrap();
        // (R⁻¹)ᴴ · Rᴴ = I
        let eye = inv_t.dot(&adjoint(&r));
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(eye[[i, j]].re, expected, epsilon = 1e-12);
                assert_abs_diff_eq!(eye[[i, j]].im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_project_applies_permutation_sign_and_norms_in_order() {
        let r = array![[1.0, 0.0], [0.0, 1.0]];
        let perm = ModePermutation::from_indices(vec![1, 0]).unwrap();
        let signs = SignVector::from_loadings(&array![[-1.0, 1.0]].view());
        let projector = RotatedProjector::new(
            RotationKind::Orthogonal,
            &r,
            perm,
            signs,
            array![2.0, 10.0],
            &NdarrayLinAlgBackend,
        )
        .unwrap();
        let scores = array![[1.0, 3.0]];
        let projected = projector.project(scores.view()).unwrap();
        // Permuted to [3, 1], sign flips mode 0, then norms [2, 10].
        assert_eq!(projected, array![[-6.0, 10.0]]);
    }

    #[test]
    fn test_project_rejects_mode_mismatch() {
        let projector = RotatedProjector::new(
            RotationKind::Orthogonal,
            &array![[1.0]],
            ModePermutation::identity(1),
            SignVector::ones(1),
            array![1.0],
            &NdarrayLinAlgBackend,
        )
        .unwrap();
        assert!(projector.project(array![[1.0, 2.0]].view()).is_err());
    }

    #[test]
    fn test_reconstruct_selected_modes() {
        let scores = array![[1.0, 2.0], [3.0, -1.0]];
        let components = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let norms = array![1.0, 0.5];
        let all = reconstruct(scores.view(), components.view(), norms.view(), &ModeSelection::All).unwrap();
        assert_eq!(all, array![[1.0, 1.0, 2.0], [3.0, -0.5, 2.5]]);
        let first = reconstruct(scores.view(), components.view(), norms.view(), &ModeSelection::Single(0)).unwrap();
        assert_eq!(first, array![[1.0, 0.0, 1.0], [3.0, 0.0, 3.0]]);
        assert!(reconstruct(scores.view(), components.view(), norms.view(), &ModeSelection::Range(1..3)).is_err());
        assert!(reconstruct(scores.view(), components.view(), norms.view(), &ModeSelection::List(vec![])).is_err());
    }

    #[test]
    fn test_selection_rejects_repeated_modes() {
        assert_eq!(ModeSelection::List(vec![2, 0]).resolve(3).unwrap(), vec![2, 0]);
        assert!(matches!(
            ModeSelection::List(vec![0, 0]).resolve(3),
            Err(RotationError::InvalidInput(_))
        ));
        let scores = array![[1.0, 2.0]];
        let components = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(reconstruct(
            scores.view(),
            components.view(),
            array![1.0, 1.0].view(),
            &ModeSelection::List(vec![1, 0, 1])
        )
        .is_err());
    }

    #[test]
    fn test_reconstruct_complex_takes_real_part() {
        let scores = array![[c64::new(0.0, 1.0)]];
        let components = array![[c64::new(0.0, 1.0)], [c64::new(1.0, 0.0)]];
        let recon = reconstruct(scores.view(), components.view(), array![1.0].view(), &ModeSelection::All).unwrap();
        // i · conj(i) = 1, i · conj(1) = i
        assert_eq!(recon, array![[1.0, 0.0]]);
    }
}
