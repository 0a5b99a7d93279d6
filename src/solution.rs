// src/solution.rs

//! Fit-time rotation artifacts: rotation, ordering and signs of a loading matrix.

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

use crate::error::{Result, RotationError};
use crate::linalg_backends::{LinAlgBackend, ModeScalar, NdarrayLinAlgBackend};
use crate::ordering::{variance_per_mode, ModePermutation, SignVector};
use crate::projector::RotatedProjector;
use crate::rotation::{RotationConfig, RotationEngine, RotationKind};

/// Quantity by which rotated modes are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingCriterion {
    /// `Σ_features |L|²` (single field).
    LoadingVariance,
    /// `(‖L₁‖·‖L₂‖)²` for loadings stacked as `[L₁; L₂]`, where `L₁` holds the
    /// first `n_left_features` rows.
    CrossCovariance { n_left_features: usize },
}

impl OrderingCriterion {
    /// Per-mode ranking values of a features × modes loading matrix.
    pub fn mode_values<A: ModeScalar>(&self, loadings: &ArrayView2<A>) -> Result<Array1<f64>> {
        match *self {
            OrderingCriterion::LoadingVariance => Ok(variance_per_mode(loadings)),
            OrderingCriterion::CrossCovariance { n_left_features } => {
                if n_left_features == 0 || n_left_features >= loadings.nrows() {
                    return Err(RotationError::InvalidInput(format!(
                        "Cannot split {} stacked features at row {}.",
                        loadings.nrows(),
                        n_left_features
                    )));
                }
                let left = variance_per_mode(&loadings.slice(s![..n_left_features, ..]));
                let right = variance_per_mode(&loadings.slice(s![n_left_features.., ..]));
                Ok(left * right)
            }
        }
    }
}

/// Everything `fit` computes about the rotation. Immutable once built.
///
/// `rotated_loadings` are in final mode order with signs applied.
/// `rotation_matrix` and `phi_matrix` stay in the rotation's own mode order;
/// the permutation and signs map that order onto the final one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatedResult<A> {
    rotated_loadings: Array2<A>,
    rotation_matrix: Array2<A>,
    phi_matrix: Array2<A>,
    permutation: ModePermutation,
    signs: SignVector,
    kind: RotationKind,
    config: RotationConfig,
    criterion: OrderingCriterion,
    iterations: usize,
    converged: bool,
}

/// Rotates the first `n_modes` columns of `loadings`, then orders and signs the result.
///
/// # Errors
/// `InvalidConfig` if `n_modes` is zero or exceeds the available modes or features.
pub fn fit_rotation<A: ModeScalar>(
    loadings: ArrayView2<A>,
    config: &RotationConfig,
    n_modes: usize,
    criterion: OrderingCriterion,
) -> Result<RotatedResult<A>> {
    fit_rotation_with_backend(loadings, config, n_modes, criterion, NdarrayLinAlgBackend)
}

/// [`fit_rotation`] with an explicit linear algebra backend.
pub fn fit_rotation_with_backend<A, B>(
    loadings: ArrayView2<A>,
    config: &RotationConfig,
    n_modes: usize,
    criterion: OrderingCriterion,
    backend: B,
) -> Result<RotatedResult<A>>
where
    A: ModeScalar,
    B: LinAlgBackend<A>,
{
    let (n_features, n_available) = loadings.dim();
    if n_modes == 0 || n_modes > n_available {
        return Err(RotationError::InvalidConfig(format!(
            "n_modes={} is outside 1..={} (modes available from the decomposition).",
            n_modes, n_available
        )));
    }
    if n_features < n_modes {
        return Err(RotationError::InvalidConfig(format!(
            "n_modes={} exceeds the number of features ({}).",
            n_modes, n_features
        )));
    }

    let start_time = Instant::now();
    info!(
        "Fitting {:?} rotation of {} modes over {} features.",
        config.kind()?,
        n_modes,
        n_features
    );

    let engine = RotationEngine::with_backend(*config, backend)?;
    let output = engine.rotate(loadings.slice(s![.., ..n_modes]))?;

    let mode_values = criterion.mode_values(&output.rotated_loadings.view())?;
    let permutation = ModePermutation::by_descending(mode_values.view());
    let mut rotated_loadings = permutation.apply_to_columns(&output.rotated_loadings.view());
    let signs = SignVector::from_loadings(&rotated_loadings.view());
    signs.apply_to_columns(&mut rotated_loadings);
    debug!(
        "Mode permutation {:?}, signs {:?}.",
        permutation.indices(),
        signs.as_array().as_slice()
    );

    info!(
        "Rotation fitted in {:?} ({} iterations, converged={}).",
        start_time.elapsed(),
        output.iterations,
        output.converged
    );
    Ok(RotatedResult {
        rotated_loadings,
        rotation_matrix: output.rotation_matrix,
        phi_matrix: output.phi_matrix,
        permutation,
        signs,
        kind: output.kind,
        config: *config,
        criterion,
        iterations: output.iterations,
        converged: output.converged,
    })
}

impl<A: ModeScalar> RotatedResult<A> {
    pub fn rotated_loadings(&self) -> &Array2<A> {
        &self.rotated_loadings
    }

    pub fn rotation_matrix(&self) -> &Array2<A> {
        &self.rotation_matrix
    }

    pub fn phi_matrix(&self) -> &Array2<A> {
        &self.phi_matrix
    }

    pub fn permutation(&self) -> &ModePermutation {
        &self.permutation
    }

    pub fn signs(&self) -> &SignVector {
        &self.signs
    }

    pub fn kind(&self) -> RotationKind {
        self.kind
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn criterion(&self) -> OrderingCriterion {
        self.criterion
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn n_modes(&self) -> usize {
        self.rotation_matrix.nrows()
    }

    /// Ranking values of the final modes (descending).
    pub fn mode_values(&self) -> Result<Array1<f64>> {
        self.criterion.mode_values(&self.rotated_loadings.view())
    }

    /// Projector replaying this rotation's `invT(R)`, permutation and signs.
    /// `norms` are per final mode.
    pub fn projector(&self, norms: Array1<f64>) -> Result<RotatedProjector<A>> {
        self.projector_with_backend(norms, &NdarrayLinAlgBackend)
    }

    pub fn projector_with_backend<B: LinAlgBackend<A>>(&self, norms: Array1<f64>, backend: &B) -> Result<RotatedProjector<A>> {
        RotatedProjector::new(
            self.kind,
            &self.rotation_matrix,
            self.permutation.clone(),
            self.signs.clone(),
            norms,
            backend,
        )
    }

    /// Saves the rotation artifacts to a file using bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| RotationError::Serialization(format!("Failed to serialize rotation model: {}", e)))?;
        Ok(())
    }

    /// Loads rotation artifacts previously written by [`save_model`](Self::save_model).
    ///
    /// # Errors
    /// Fails on I/O or decoding errors, or when the decoded artifacts are
    /// inconsistent with each other.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let model: RotatedResult<A> = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| RotationError::Serialization(format!("Failed to deserialize rotation model: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let n_modes = self.rotation_matrix.nrows();
        let inconsistent = |what: String| {
            Err(RotationError::Serialization(format!(
                "Loaded rotation model is inconsistent: {}",
                what
            )))
        };
        if self.rotation_matrix.ncols() != n_modes || self.phi_matrix.dim() != (n_modes, n_modes) {
            return inconsistent(format!(
                "rotation matrix {:?} and phi matrix {:?} must be {}x{}.",
                self.rotation_matrix.dim(),
                self.phi_matrix.dim(),
                n_modes,
                n_modes
            ));
        }
        if self.rotated_loadings.ncols() != n_modes {
            return inconsistent(format!(
                "loadings have {} modes, rotation has {}.",
                self.rotated_loadings.ncols(),
                n_modes
            ));
        }
        if self.permutation.len() != n_modes
            || ModePermutation::from_indices(self.permutation.indices().to_vec()).is_err()
        {
            return inconsistent(format!("invalid mode permutation {:?}.", self.permutation.indices()));
        }
        if self.signs.len() != n_modes || self.signs.as_array().iter().any(|&s| s != 1.0 && s != -1.0) {
            return inconsistent("sign vector must hold one ±1 per mode.".to_string());
        }
        if self.config.kind().ok() != Some(self.kind) {
            return inconsistent(format!(
                "rotation kind {:?} does not match power {}.",
                self.kind, self.config.power
            ));
        }
        self.config
            .validate()
            .map_err(|e| RotationError::Serialization(format!("Loaded rotation model has invalid config: {}", e)))
    }
}

/// Per-mode column norms `‖L[:, k]‖`.
pub(crate) fn column_norms<A: ModeScalar>(matrix: &ArrayView2<A>) -> Array1<f64> {
    variance_per_mode(matrix).mapv(f64::sqrt)
}

/// Divides every column by its norm; zero columns are left untouched.
pub(crate) fn divide_columns<A: ModeScalar>(matrix: &ArrayView2<A>, norms: &Array1<f64>) -> Array2<A> {
    let mut out = matrix.to_owned();
    for (mut col, &norm) in out.axis_iter_mut(Axis(1)).zip(norms.iter()) {
        if norm > 0.0 {
            col.mapv_inplace(|v| v.div_real(norm));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::tempdir;

    fn random_loadings(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::random_using((rows, cols), Normal::new(0.0, 1.0).unwrap(), &mut rng)
    }

    #[test]
    fn test_fit_rotation_orders_descending_and_signs_positive() {
        let loadings = random_loadings(30, 5, 7);
        let result = fit_rotation(loadings.view(), &RotationConfig::default(), 4, OrderingCriterion::LoadingVariance).unwrap();
        assert_eq!(result.rotated_loadings().dim(), (30, 4));
        let values = result.mode_values().unwrap();
        for k in 1..values.len() {
            assert!(values[k - 1] >= values[k]);
        }
        // Dominant entry of every final mode is non-negative.
        let again = SignVector::from_loadings(&result.rotated_loadings().view());
        assert!(again.all_positive());
    }

    #[test]
    fn test_final_loadings_follow_rotation_permutation_and_signs() {
        let loadings = random_loadings(20, 3, 11);
        let result = fit_rotation(loadings.view(), &RotationConfig::default(), 3, OrderingCriterion::LoadingVariance).unwrap();
        let rotated = loadings.dot(result.rotation_matrix());
        let mut expected = result.permutation().apply_to_columns(&rotated.view());
        result.signs().apply_to_columns(&mut expected);
        for (a, b) in expected.iter().zip(result.rotated_loadings().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_n_modes_outside_available_range_is_config_error() {
        let loadings = random_loadings(10, 3, 1);
        for n_modes in [0, 4] {
            assert!(matches!(
                fit_rotation(loadings.view(), &RotationConfig::default(), n_modes, OrderingCriterion::LoadingVariance),
                Err(RotationError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_cross_covariance_criterion() {
        let loadings = array![[1.0, 0.0], [0.0, 2.0], [3.0, 1.0], [0.0, 1.0]];
        let values = OrderingCriterion::CrossCovariance { n_left_features: 2 }
            .mode_values(&loadings.view())
            .unwrap();
        assert_eq!(values, array![9.0, 8.0]);
        assert!(OrderingCriterion::CrossCovariance { n_left_features: 4 }
            .mode_values(&loadings.view())
            .is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let loadings = random_loadings(15, 4, 3);
        let config = RotationConfig { power: 3, ..RotationConfig::default() };
        let result = fit_rotation(loadings.view(), &config, 4, OrderingCriterion::LoadingVariance).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotation.bin");
        result.save_model(&path).unwrap();
        let loaded = RotatedResult::<f64>::load_model(&path).unwrap();
        assert_eq!(loaded, result);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(RotatedResult::<f64>::load_model(&path).is_err());
        assert!(matches!(
            RotatedResult::<f64>::load_model(dir.path().join("missing.bin")),
            Err(RotationError::Io(_))
        ));
    }
}
