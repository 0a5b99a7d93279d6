// src/eof_rotator.rs

//! Varimax/Promax rotation of a fitted [`Eof`] model.

use log::info;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use once_cell::sync::OnceCell;
use std::time::Instant;

use crate::decomposition::Eof;
use crate::error::{Result, RotationError};
use crate::linalg_backends::{ModeScalar, ValueKind};
use crate::metadata::{ComputePolicy, ModelMetadata, RotatorConfig};
use crate::ordering::{variance_per_mode, ModePermutation, SignVector};
use crate::preprocessing::Preprocessor;
use crate::projector::{reconstruct, ModeSelection, RotatedProjector};
use crate::solution::{divide_columns, fit_rotation, OrderingCriterion, RotatedResult};

/// Rotated EOF model.
///
/// Loadings `V·√λ` of the leading `n_modes` modes are rotated, reordered by
/// explained variance and sign-normalised. Rotated components are the unit
/// columns of the rotated loadings, and scores are carried into the rotated
/// frame by `invT(R)` and rescaled by `√(λ_rot·(n − 1))`.
#[derive(Debug)]
pub struct EofRotator<A: ModeScalar> {
    config: RotatorConfig,
    fitted: Option<FittedEof<A>>,
}

/// Rotator for complex EOF models.
pub type ComplexEofRotator = EofRotator<ndarray_linalg::c64>;

#[derive(Debug)]
struct FittedEof<A: ModeScalar> {
    model: Eof<A>,
    result: RotatedResult<A>,
    projector: RotatedProjector<A>,
    components: Array2<A>,
    explained_variance: Array1<f64>,
    normalized_scores: Array2<A>,
    scores: OnceCell<Array2<A>>,
    metadata: ModelMetadata,
}

impl<A: ModeScalar> Default for EofRotator<A> {
    fn default() -> Self {
        Self::new(RotatorConfig::default())
    }
}

impl<A: ModeScalar> EofRotator<A> {
    pub fn new(config: RotatorConfig) -> Self {
        Self { config, fitted: None }
    }

    pub fn config(&self) -> &RotatorConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Rotates the leading modes of `model`. Refitting replaces the previous state.
    ///
    /// # Errors
    /// `InvalidConfig` if `n_modes` exceeds the modes kept by `model`, or
    /// `Linalg` if the rotation fails.
    pub fn fit(&mut self, model: &Eof<A>) -> Result<()> {
        self.config.validate()?;
        let n_modes = self.config.n_modes;
        if n_modes > model.n_modes() {
            return Err(RotationError::InvalidConfig(format!(
                "Cannot rotate {} modes; the EOF model only has {}.",
                n_modes,
                model.n_modes()
            )));
        }
        let start_time = Instant::now();
        info!("Rotating {} of {} EOF modes.", n_modes, model.n_modes());

        let explained_variance = model.explained_variance();
        let sqrt_variance = explained_variance.slice(s![..n_modes]).mapv(f64::sqrt);
        let mut loadings = model.components().slice(s![.., ..n_modes]).to_owned();
        for (mut col, &scale) in loadings.axis_iter_mut(Axis(1)).zip(sqrt_variance.iter()) {
            col.mapv_inplace(|v| v.mul_real(scale));
        }

        let rotation = self.config.rotation();
        let result = fit_rotation(loadings.view(), &rotation, n_modes, OrderingCriterion::LoadingVariance)?;

        let rotated_variance = variance_per_mode(&result.rotated_loadings().view());
        let components = divide_columns(&result.rotated_loadings().view(), &rotated_variance.mapv(f64::sqrt));
        let dof = (model.n_samples() - 1) as f64;
        let norms = rotated_variance.mapv(|ev| (ev * dof).sqrt());
        let projector = result.projector(norms)?;

        let singular_values = model.singular_values().slice(s![..n_modes]).to_owned();
        let normalized_scores = divide_columns(&model.scores().slice(s![.., ..n_modes]), &singular_values);

        let scores = match self.config.compute {
            ComputePolicy::Eager => OnceCell::with_value(projector.project(normalized_scores.view())?),
            ComputePolicy::Deferred => OnceCell::new(),
        };

        let metadata = ModelMetadata::new("EofRotator", n_modes, &rotation, result.iterations(), result.converged());
        info!("EOF rotation finished in {:?}.", start_time.elapsed());

        self.fitted = Some(FittedEof {
            model: model.clone(),
            result,
            projector,
            components,
            explained_variance: rotated_variance,
            normalized_scores,
            scores,
            metadata,
        });
        Ok(())
    }

    fn fitted(&self) -> Result<&FittedEof<A>> {
        self.fitted.as_ref().ok_or(RotationError::NotFitted("EofRotator"))
    }

    /// Rotated components, features × modes, unit-norm columns.
    pub fn components(&self) -> Result<&Array2<A>> {
        Ok(&self.fitted()?.components)
    }

    /// Rotated scores, samples × modes.
    pub fn scores(&self) -> Result<&Array2<A>> {
        let fitted = self.fitted()?;
        fitted
            .scores
            .get_or_try_init(|| fitted.projector.project(fitted.normalized_scores.view()))
    }

    /// Forces evaluation of everything a deferred model postponed.
    pub fn compute(&self) -> Result<()> {
        self.scores().map(|_| ())
    }

    /// `Σ_features |rotated loading|²` per mode, descending.
    pub fn explained_variance(&self) -> Result<&Array1<f64>> {
        Ok(&self.fitted()?.explained_variance)
    }

    pub fn explained_variance_ratio(&self) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        let total = fitted.model.total_variance();
        Ok(fitted
            .explained_variance
            .mapv(|ev| if total > 0.0 { ev / total } else { 0.0 }))
    }

    /// Pseudo singular values `√(λ_rot·(n − 1))`.
    pub fn singular_values(&self) -> Result<&Array1<f64>> {
        Ok(self.fitted()?.projector.norms())
    }

    pub fn rotation_matrix(&self) -> Result<&Array2<A>> {
        Ok(self.fitted()?.result.rotation_matrix())
    }

    pub fn phi_matrix(&self) -> Result<&Array2<A>> {
        Ok(self.fitted()?.result.phi_matrix())
    }

    pub fn mode_permutation(&self) -> Result<&ModePermutation> {
        Ok(self.fitted()?.result.permutation())
    }

    pub fn mode_signs(&self) -> Result<&SignVector> {
        Ok(self.fitted()?.result.signs())
    }

    pub fn rotated_result(&self) -> Result<&RotatedResult<A>> {
        Ok(&self.fitted()?.result)
    }

    pub fn metadata(&self) -> Result<&ModelMetadata> {
        Ok(&self.fitted()?.metadata)
    }

    /// Rotated scores of new raw data, through the same path as the fitted scores.
    ///
    /// # Errors
    /// `NotFitted` before `fit`, `NotImplemented` for complex models.
    pub fn transform(&self, raw: ArrayView2<f64>) -> Result<Array2<A>> {
        let fitted = self.fitted()?;
        if A::KIND == ValueKind::Complex {
            return Err(RotationError::NotImplemented("EofRotator::transform"));
        }
        let n_modes = fitted.projector.n_modes();
        let projections = fitted.model.transform(raw)?;
        let singular_values = fitted.model.singular_values().slice(s![..n_modes]).to_owned();
        let normalized = divide_columns(&projections.slice(s![.., ..n_modes]), &singular_values);
        fitted.projector.project(normalized.view())
    }

    /// Raw-space field rebuilt from the selected rotated modes.
    pub fn inverse_transform(&self, selection: &ModeSelection) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        let scores = self.scores()?;
        let unit_norms = Array1::ones(fitted.components.ncols());
        let canonical = reconstruct(scores.view(), fitted.components.view(), unit_norms.view(), selection)?;
        fitted.model.preprocessor().inverse(canonical.view())
    }

    /// `|component|`.
    pub fn components_amplitude(&self) -> Result<Array2<f64>> {
        Ok(self.components()?.mapv(|v| v.abs()))
    }

    /// `arg(component)` in radians.
    pub fn components_phase(&self) -> Result<Array2<f64>> {
        Ok(self.components()?.mapv(|v| v.im().atan2(v.re())))
    }

    pub fn scores_amplitude(&self) -> Result<Array2<f64>> {
        Ok(self.scores()?.mapv(|v| v.abs()))
    }

    pub fn scores_phase(&self) -> Result<Array2<f64>> {
        Ok(self.scores()?.mapv(|v| v.im().atan2(v.re())))
    }
}
