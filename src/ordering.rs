// src/ordering.rs

//! Deterministic ordering and sign convention for rotated modes.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RotationError};
use crate::linalg_backends::ModeScalar;

/// Bijection on `0..n_modes`. Position `k` holds the original index of the mode
/// that ends up at position `k`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePermutation(Vec<usize>);

impl ModePermutation {
    pub fn identity(n_modes: usize) -> Self {
        ModePermutation((0..n_modes).collect())
    }

    /// # Errors
    /// `InvalidInput` unless `indices` contains every value of `0..indices.len()` exactly once.
    pub fn from_indices(indices: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; indices.len()];
        for &idx in &indices {
            if idx >= indices.len() || seen[idx] {
                return Err(RotationError::InvalidInput(format!(
                    "Mode permutation {:?} is not a bijection on 0..{}.",
                    indices,
                    indices.len()
                )));
            }
            seen[idx] = true;
        }
        Ok(ModePermutation(indices))
    }

    /// Sorts modes by `values` in descending order; ties keep the original order.
    /// NaN values rank last.
    pub fn by_descending(values: ArrayView1<f64>) -> Self {
        let keys: Vec<f64> = values
            .iter()
            .map(|&v| if v.is_nan() { f64::NEG_INFINITY } else { v })
            .collect();
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|&a, &b| keys[b].total_cmp(&keys[a]));
        ModePermutation(order)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(pos, &idx)| pos == idx)
    }

    /// Reorders the columns (modes) of a matrix.
    pub fn apply_to_columns<T: Clone>(&self, matrix: &ArrayView2<T>) -> Array2<T> {
        matrix.select(Axis(1), &self.0)
    }

    /// Reorders a per-mode vector.
    pub fn apply_to_array<T: Clone>(&self, array: &ArrayView1<T>) -> Array1<T> {
        array.select(Axis(0), &self.0)
    }
}

/// Per-mode sign fixing the orientation of each rotated mode. Entries are ±1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignVector(Array1<f64>);

impl SignVector {
    pub fn ones(n_modes: usize) -> Self {
        SignVector(Array1::ones(n_modes))
    }

    /// For every mode, the sign of the real part of the loading with the largest
    /// magnitude (first occurrence on ties). Zero maps to `+1`.
    pub fn from_loadings<A: ModeScalar>(loadings: &ArrayView2<A>) -> Self {
        let signs = loadings.map_axis(Axis(0), |col| {
            let mut best = 0;
            let mut best_magnitude = f64::NEG_INFINITY;
            for (idx, value) in col.iter().enumerate() {
                let magnitude = value.abs();
                if magnitude > best_magnitude {
                    best = idx;
                    best_magnitude = magnitude;
                }
            }
            match col.get(best) {
                Some(value) if value.re() < 0.0 => -1.0,
                _ => 1.0,
            }
        });
        SignVector(signs)
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn all_positive(&self) -> bool {
        self.0.iter().all(|&s| s > 0.0)
    }

    /// Multiplies column `k` of `matrix` by the sign of mode `k`.
    pub fn apply_to_columns<A: ModeScalar>(&self, matrix: &mut Array2<A>) {
        for (mut col, &sign) in matrix.columns_mut().into_iter().zip(self.0.iter()) {
            if sign < 0.0 {
                col.mapv_inplace(|v| -v);
            }
        }
    }

    /// Permutes the signs alongside a reordering of the modes they belong to.
    pub fn permuted(&self, permutation: &ModePermutation) -> Self {
        SignVector(permutation.apply_to_array(&self.0.view()))
    }
}

/// `Σ_features |loading|²` for every mode.
pub fn variance_per_mode<A: ModeScalar>(loadings: &ArrayView2<A>) -> Array1<f64> {
    loadings.map_axis(Axis(0), |col| col.iter().map(|v| v.square()).sum::<f64>())
}

/// Permutation sorting rotated modes by descending loading variance.
pub fn reorder<A: ModeScalar>(rotated_loadings: &ArrayView2<A>) -> ModePermutation {
    ModePermutation::by_descending(variance_per_mode(rotated_loadings).view())
}

/// Sign vector making the dominant loading of every mode non-negative in its real part.
pub fn normalize_sign<A: ModeScalar>(rotated_loadings: &ArrayView2<A>) -> SignVector {
    SignVector::from_loadings(rotated_loadings)
}
