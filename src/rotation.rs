// src/rotation.rs

//! Varimax and Promax rotation of loading matrices.
//!
//! The orthogonal (Varimax) stage always runs. It iterates the orthomax
//! update `R ← U·Vᴴ` with `U·S·Vᴴ = SVD(Lᴴ·G)`, where
//! `G = Λ∘|Λ|² − (γ/p)·Λ·diag(ΛᴴΛ)` and `Λ = L·R`, until the relative change of
//! `Σ S` drops below `rtol` or `max_iter` is reached. Non-convergence is not an
//! error: the last rotation is returned.
//!
//! With `power > 1` the Varimax solution is refined into an oblique (Promax)
//! rotation via a power-transformed target and a least-squares fit.

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RotationError};
use crate::linalg_backends::{adjoint, LinAlgBackend, ModeScalar, NdarrayLinAlgBackend};

/// Orthomax weight; 1 selects the Varimax criterion.
const VARIMAX_GAMMA: f64 = 1.0;
/// Keeps Kaiser normalisation finite for rows without loadings.
const COMMUNALITY_EPS: f64 = 1e-9;

/// Orthogonal (Varimax) or oblique (Promax) rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationKind {
    Orthogonal,
    Oblique { power: u32 },
}

impl RotationKind {
    /// `power == 1` is Varimax, `power > 1` is Promax.
    pub fn from_power(power: u32) -> Result<Self> {
        match power {
            0 => Err(RotationError::InvalidConfig(
                "Rotation power must be at least 1.".to_string(),
            )),
            1 => Ok(RotationKind::Orthogonal),
            power if i32::try_from(power).is_err() => Err(RotationError::InvalidConfig(format!(
                "Rotation power {} exceeds the supported maximum of {}.",
                power,
                i32::MAX
            ))),
            power => Ok(RotationKind::Oblique { power }),
        }
    }

    pub fn power(&self) -> u32 {
        match self {
            RotationKind::Orthogonal => 1,
            RotationKind::Oblique { power } => *power,
        }
    }

    pub fn is_orthogonal(&self) -> bool {
        matches!(self, RotationKind::Orthogonal)
    }
}

/// Parameters of the rotation iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// 1 for Varimax, > 1 for Promax.
    pub power: u32,
    /// Upper bound on Varimax iterations.
    pub max_iter: usize,
    /// Relative change of the Varimax objective below which iteration stops.
    pub rtol: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            power: 1,
            max_iter: 1000,
            rtol: 1e-8,
        }
    }
}

impl RotationConfig {
    pub fn kind(&self) -> Result<RotationKind> {
        RotationKind::from_power(self.power)
    }

    pub fn validate(&self) -> Result<()> {
        self.kind()?;
        if self.max_iter == 0 {
            return Err(RotationError::InvalidConfig(
                "max_iter must be at least 1.".to_string(),
            ));
        }
        if !self.rtol.is_finite() || self.rtol < 0.0 {
            return Err(RotationError::InvalidConfig(format!(
                "rtol must be finite and non-negative, got {}.",
                self.rtol
            )));
        }
        Ok(())
    }
}

/// Result of [`RotationEngine::rotate`].
#[derive(Debug, Clone)]
pub struct RotationOutput<A> {
    /// `loadings · rotation_matrix`, features × modes.
    pub rotated_loadings: Array2<A>,
    /// Modes × modes. Unitary for Varimax, oblique for Promax.
    pub rotation_matrix: Array2<A>,
    /// Factor correlation matrix with unit diagonal; identity for Varimax.
    pub phi_matrix: Array2<A>,
    pub kind: RotationKind,
    /// Varimax iterations performed.
    pub iterations: usize,
    /// Whether Varimax reached `rtol` within `max_iter`.
    pub converged: bool,
}

/// Computes Varimax/Promax rotations with a pluggable linear algebra backend.
#[derive(Debug, Clone)]
pub struct RotationEngine<B = NdarrayLinAlgBackend> {
    config: RotationConfig,
    backend: B,
}

impl RotationEngine<NdarrayLinAlgBackend> {
    pub fn new(config: RotationConfig) -> Result<Self> {
        Self::with_backend(config, NdarrayLinAlgBackend)
    }
}

impl<B> RotationEngine<B> {
    pub fn with_backend(config: RotationConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Rotates a features × modes loading matrix.
    ///
    /// # Errors
    /// `InvalidConfig` if there are fewer features than modes, `Linalg` if an SVD,
    /// least-squares solve or inversion fails.
    pub fn rotate<A>(&self, loadings: ArrayView2<A>) -> Result<RotationOutput<A>>
    where
        A: ModeScalar,
        B: LinAlgBackend<A>,
    {
        let (n_features, n_modes) = loadings.dim();
        if n_features < n_modes {
            return Err(RotationError::InvalidConfig(format!(
                "Cannot rotate {} modes with only {} features; the rotation is underdetermined.",
                n_modes, n_features
            )));
        }
        let kind = self.config.kind()?;
        debug!(
            "Rotating {} modes over {} features ({:?}, max_iter={}, rtol={:e}).",
            n_modes, n_features, kind, self.config.max_iter, self.config.rtol
        );

        let varimax = self.varimax(loadings)?;
        match kind {
            RotationKind::Orthogonal => Ok(RotationOutput {
                rotated_loadings: varimax.rotated_loadings,
                rotation_matrix: varimax.rotation_matrix,
                phi_matrix: identity(n_modes),
                kind,
                iterations: varimax.iterations,
                converged: varimax.converged,
            }),
            RotationKind::Oblique { power } => {
                let (rotation_matrix, phi_matrix) = self.promax_refine(&varimax, power)?;
                let rotated_loadings = loadings.dot(&rotation_matrix);
                Ok(RotationOutput {
                    rotated_loadings,
                    rotation_matrix,
                    phi_matrix,
                    kind,
                    iterations: varimax.iterations,
                    converged: varimax.converged,
                })
            }
        }
    }

    fn varimax<A>(&self, loadings: ArrayView2<A>) -> Result<VarimaxState<A>>
    where
        A: ModeScalar,
        B: LinAlgBackend<A>,
    {
        let (n_features, n_modes) = loadings.dim();
        if n_modes < 2 {
            return Ok(VarimaxState {
                rotated_loadings: loadings.to_owned(),
                rotation_matrix: identity(n_modes),
                iterations: 0,
                converged: true,
            });
        }

        let loadings_h = adjoint(&loadings);
        let weight = VARIMAX_GAMMA / n_features as f64;
        let mut rotation = identity::<A>(n_modes);
        let mut objective = 0.0;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iter {
            iterations = iter + 1;
            let previous_objective = objective;

            let rotated = loadings.dot(&rotation);
            let mode_energy: Array1<f64> =
                rotated.map_axis(Axis(0), |col| col.iter().map(|v| v.square()).sum::<f64>());
            let mut gradient = rotated.mapv(|v| v.mul_real(v.square()));
            for ((row, col), g) in gradient.indexed_iter_mut() {
                *g -= rotated[[row, col]].mul_real(weight * mode_energy[col]);
            }

            let svd = self
                .backend
                .svd_into(loadings_h.dot(&gradient), true, true)
                .map_err(RotationError::linalg("SVD of the varimax gradient"))?;
            let (u, vt) = match (svd.u, svd.vt) {
                (Some(u), Some(vt)) => (u, vt),
                _ => {
                    return Err(RotationError::Linalg {
                        operation: "SVD of the varimax gradient",
                        source: "singular vectors were not returned".into(),
                    })
                }
            };
            rotation = u.dot(&vt);
            objective = svd.s.sum();
            trace!("Varimax iteration {}: objective={:e}", iterations, objective);

            if previous_objective != 0.0 && objective != 0.0 {
                let relative_change = (objective - previous_objective).abs() / objective;
                if relative_change < self.config.rtol {
                    converged = true;
                    break;
                }
            }
        }

        if converged {
            debug!("Varimax converged after {} iterations.", iterations);
        } else {
            debug!(
                "Varimax stopped after {} iterations without reaching rtol={:e}; using last rotation.",
                iterations, self.config.rtol
            );
        }

        Ok(VarimaxState {
            rotated_loadings: loadings.dot(&rotation),
            rotation_matrix: rotation,
            iterations,
            converged,
        })
    }

    /// Returns `(R_varimax · T, Phi)` where `T` is the column-normalised Procrustes
    /// fit of the power target against the Kaiser-normalised Varimax loadings.
    fn promax_refine<A>(&self, varimax: &VarimaxState<A>, power: u32) -> Result<(Array2<A>, Array2<A>)>
    where
        A: ModeScalar,
        B: LinAlgBackend<A>,
    {
        let rotated = &varimax.rotated_loadings;
        let (n_features, n_modes) = rotated.dim();

        let communalities: Array1<f64> =
            rotated.map_axis(Axis(1), |row| row.iter().map(|v| v.square()).sum::<f64>().sqrt());
        let normalized = Array2::from_shape_fn((n_features, n_modes), |(i, j)| {
            rotated[[i, j]].div_real(communalities[i] + COMMUNALITY_EPS)
        });

        let column_max: Array1<f64> =
            normalized.map_axis(Axis(0), |col| col.iter().fold(0.0_f64, |m, v| m.max(v.abs())));
        let exponent = i32::try_from(power - 1).map_err(|_| {
            RotationError::InvalidConfig(format!("Rotation power {} is too large.", power))
        })?;
        let target = Array2::from_shape_fn((n_features, n_modes), |(i, j)| {
            let scale = if column_max[j] > 0.0 { column_max[j] } else { 1.0 };
            let x = normalized[[i, j]].div_real(scale);
            x.mul_real(x.abs().powi(exponent))
        });

        let mut transform = self
            .backend
            .least_squares(&normalized, &target)
            .map_err(RotationError::linalg("Promax least-squares fit"))?;
        for mut col in transform.columns_mut() {
            let norm = col.iter().map(|v| v.square()).sum::<f64>().sqrt();
            if norm > 0.0 {
                col.mapv_inplace(|v| v.div_real(norm));
            }
        }

        let rotation_matrix = varimax.rotation_matrix.dot(&transform);
        let gram = adjoint(&rotation_matrix).dot(&rotation_matrix);
        let gram_inv = self
            .backend
            .inverse(&gram)
            .map_err(RotationError::linalg("Inversion of the promax Gram matrix"))?;
        Ok((rotation_matrix, correlation_from_covariance(&gram_inv)))
    }
}

struct VarimaxState<A> {
    rotated_loadings: Array2<A>,
    rotation_matrix: Array2<A>,
    iterations: usize,
    converged: bool,
}

pub(crate) fn identity<A: ModeScalar>(n: usize) -> Array2<A> {
    Array2::from_shape_fn((n, n), |(i, j)| A::from_real(if i == j { 1.0 } else { 0.0 }))
}

/// `D^{-1/2} · C · D^{-1/2}` with the diagonal set to exactly 1.
fn correlation_from_covariance<A: ModeScalar>(covariance: &Array2<A>) -> Array2<A> {
    let std_dev: Array1<f64> = covariance.diag().mapv(|v| v.re().abs().sqrt());
    Array2::from_shape_fn(covariance.dim(), |(i, j)| {
        if i == j {
            A::from_real(1.0)
        } else {
            let denom = std_dev[i] * std_dev[j];
            if denom > 0.0 {
                covariance[[i, j]].div_real(denom)
            } else {
                A::from_real(0.0)
            }
        }
    })
}

/// Convenience wrapper around [`RotationEngine::rotate`] with the default backend.
pub fn rotate<A: ModeScalar>(loadings: ArrayView2<A>, config: &RotationConfig) -> Result<RotationOutput<A>> {
    RotationEngine::new(*config)?.rotate(loadings)
}
