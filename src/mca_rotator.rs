// src/mca_rotator.rs

//! Varimax/Promax rotation of a fitted [`Mca`] model.
//!
//! Both fields are rotated jointly: the loadings `[U; V]·√σ` are stacked along
//! the feature axis, rotated as one matrix and split again. Modes are ranked by
//! the squared covariance `(‖L₁‖·‖L₂‖)²` they explain.

use log::info;
use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use once_cell::sync::OnceCell;
use std::time::Instant;

use crate::decomposition::Mca;
use crate::error::{Result, RotationError};
use crate::linalg_backends::{ModeScalar, ValueKind};
use crate::metadata::{ComputePolicy, ModelMetadata, RotatorConfig};
use crate::ordering::{ModePermutation, SignVector};
use crate::preprocessing::Preprocessor;
use crate::projector::{reconstruct, ModeSelection, RotatedProjector};
use crate::solution::{column_norms, divide_columns, fit_rotation, OrderingCriterion, RotatedResult};

/// Rotated MCA model.
#[derive(Debug)]
pub struct McaRotator<A: ModeScalar> {
    config: RotatorConfig,
    fitted: Option<FittedMca<A>>,
}

/// Rotator for complex MCA models.
pub type ComplexMcaRotator = McaRotator<ndarray_linalg::c64>;

#[derive(Debug)]
struct FittedMca<A: ModeScalar> {
    model: Mca<A>,
    result: RotatedResult<A>,
    projector: RotatedProjector<A>,
    components: [Array2<A>; 2],
    norms: [Array1<f64>; 2],
    normalized_scores: [Array2<A>; 2],
    scores: OnceCell<[Array2<A>; 2]>,
    metadata: ModelMetadata,
}

impl<A: ModeScalar> Default for McaRotator<A> {
    fn default() -> Self {
        Self::new(RotatorConfig::default())
    }
}

impl<A: ModeScalar> McaRotator<A> {
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
    pub fn fit(&mut self, model: &Mca<A>) -> Result<()> {
        self.config.validate()?;
        let n_modes = self.config.n_modes;
        if n_modes > model.n_modes() {
            return Err(RotationError::InvalidConfig(format!(
                "Cannot rotate {} modes; the MCA model only has {}.",
                n_modes,
                model.n_modes()
            )));
        }
        let start_time = Instant::now();
        info!("Rotating {} of {} MCA modes.", n_modes, model.n_modes());

        let (left_components, right_components) = model.components();
        let n_left_features = left_components.nrows();
        let sqrt_sigma = model.norms().slice(s![..n_modes]).to_owned();
        let mut loadings = concatenate(
            Axis(0),
            &[
                left_components.slice(s![.., ..n_modes]),
                right_components.slice(s![.., ..n_modes]),
            ],
        )?;
        for (mut col, &scale) in loadings.axis_iter_mut(Axis(1)).zip(sqrt_sigma.iter()) {
            col.mapv_inplace(|v| v.mul_real(scale));
        }

        let rotation = self.config.rotation();
        let result = fit_rotation(
            loadings.view(),
            &rotation,
            n_modes,
            OrderingCriterion::CrossCovariance { n_left_features },
        )?;

        let rotated = result.rotated_loadings();
        let left_loadings = rotated.slice(s![..n_left_features, ..]);
        let right_loadings = rotated.slice(s![n_left_features.., ..]);
        let left_norms = column_norms(&left_loadings);
        let right_norms = column_norms(&right_loadings);
        let components = [
            divide_columns(&left_loadings, &left_norms),
            divide_columns(&right_loadings, &right_norms),
        ];

        // Scores stay unit-scaled; the norms enter at reconstruction.
        let projector = result.projector(Array1::ones(n_modes))?;
        let (left_scores, right_scores) = model.scores();
        let normalized_scores = [
            left_scores.slice(s![.., ..n_modes]).to_owned(),
            right_scores.slice(s![.., ..n_modes]).to_owned(),
        ];

        let scores = match self.config.compute {
            ComputePolicy::Eager => OnceCell::with_value(project_pair(&projector, &normalized_scores)?),
            ComputePolicy::Deferred => OnceCell::new(),
        };

        let metadata = ModelMetadata::new("McaRotator", n_modes, &rotation, result.iterations(), result.converged());
        info!("MCA rotation finished in {:?}.", start_time.elapsed());

        self.fitted = Some(FittedMca {
            model: model.clone(),
            result,
            projector,
            components,
            norms: [left_norms, right_norms],
            normalized_scores,
            scores,
            metadata,
        });
        Ok(())
    }

    fn fitted(&self) -> Result<&FittedMca<A>> {
        self.fitted.as_ref().ok_or(RotationError::NotFitted("McaRotator"))
    }

    /// Left and right rotated components, unit-norm columns.
    pub fn components(&self) -> Result<(&Array2<A>, &Array2<A>)> {
        let fitted = self.fitted()?;
        Ok((&fitted.components[0], &fitted.components[1]))
    }

    /// Left and right rotated scores, samples × modes.
    pub fn scores(&self) -> Result<(&Array2<A>, &Array2<A>)> {
        let fitted = self.fitted()?;
        let scores = fitted
            .scores
            .get_or_try_init(|| project_pair(&fitted.projector, &fitted.normalized_scores))?;
        Ok((&scores[0], &scores[1]))
    }

    pub fn compute(&self) -> Result<()> {
        self.scores().map(|_| ())
    }

    /// Column norms of the rotated left and right loadings.
    pub fn norms(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        let fitted = self.fitted()?;
        Ok((&fitted.norms[0], &fitted.norms[1]))
    }

    /// `(‖L₁‖·‖L₂‖)²` per rotated mode, descending.
    pub fn squared_covariance(&self) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        Ok((&fitted.norms[0] * &fitted.norms[1]).mapv(|v| v * v))
    }

    pub fn squared_covariance_fraction(&self) -> Result<Array1<f64>> {
        let total = self.fitted()?.model.total_squared_covariance();
        Ok(self
            .squared_covariance()?
            .mapv(|sc| if total > 0.0 { sc / total } else { 0.0 }))
    }

    /// Pseudo singular values `‖L₁‖·‖L₂‖`.
    pub fn singular_values(&self) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        Ok(&fitted.norms[0] * &fitted.norms[1])
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

    /// Rotated scores of new raw data for either or both fields.
    ///
    /// # Errors
    /// `NotFitted` before `fit`, `NotImplemented` for complex models.
    pub fn transform(
        &self,
        left: Option<ArrayView2<f64>>,
        right: Option<ArrayView2<f64>>,
    ) -> Result<(Option<Array2<A>>, Option<Array2<A>>)> {
        let fitted = self.fitted()?;
        if A::KIND == ValueKind::Complex {
            return Err(RotationError::NotImplemented("McaRotator::transform"));
        }
        let n_modes = fitted.projector.n_modes();
        let (left_scores, right_scores) = fitted.model.transform(left, right)?;
        let project = |scores: Array2<A>| fitted.projector.project(scores.slice(s![.., ..n_modes]));
        Ok((
            left_scores.map(project).transpose()?,
            right_scores.map(project).transpose()?,
        ))
    }

    /// Both raw-space fields rebuilt from the selected rotated modes as
    /// `Re(scores · conj(components)ᵀ · norm)`.
    pub fn inverse_transform(&self, selection: &ModeSelection) -> Result<(Array2<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        let (left_scores, right_scores) = self.scores()?;
        let (left_pre, right_pre) = fitted.model.preprocessors();
        let left = reconstruct(
            left_scores.view(),
            fitted.components[0].view(),
            fitted.norms[0].view(),
            selection,
        )?;
        let right = reconstruct(
            right_scores.view(),
            fitted.components[1].view(),
            fitted.norms[1].view(),
            selection,
        )?;
        Ok((left_pre.inverse(left.view())?, right_pre.inverse(right.view())?))
    }

    /// Correlation of each field with its own rotated scores, features × modes.
    ///
    /// # Errors
    /// `NotImplemented` for complex models.
    pub fn homogeneous_patterns(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        if A::KIND == ValueKind::Complex {
            return Err(RotationError::NotImplemented("McaRotator::homogeneous_patterns"));
        }
        let (left_scores, right_scores) = self.scores()?;
        let (left_data, right_data) = fitted.model.data();
        Ok((
            pearson_correlation(&left_data.view(), &left_scores.view()),
            pearson_correlation(&right_data.view(), &right_scores.view()),
        ))
    }

    /// Correlation of each field with the other field's rotated scores, features × modes.
    ///
    /// # Errors
    /// `NotImplemented` for complex models.
    pub fn heterogeneous_patterns(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        if A::KIND == ValueKind::Complex {
            return Err(RotationError::NotImplemented("McaRotator::heterogeneous_patterns"));
        }
        let (left_scores, right_scores) = self.scores()?;
        let (left_data, right_data) = fitted.model.data();
        Ok((
            pearson_correlation(&left_data.view(), &right_scores.view()),
            pearson_correlation(&right_data.view(), &left_scores.view()),
        ))
    }

    pub fn components_amplitude(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let (left, right) = self.components()?;
        Ok((left.mapv(|v| v.abs()), right.mapv(|v| v.abs())))
    }

    pub fn components_phase(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let (left, right) = self.components()?;
        Ok((
            left.mapv(|v| v.im().atan2(v.re())),
            right.mapv(|v| v.im().atan2(v.re())),
        ))
    }

    pub fn scores_amplitude(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let (left, right) = self.scores()?;
        Ok((left.mapv(|v| v.abs()), right.mapv(|v| v.abs())))
    }

    pub fn scores_phase(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let (left, right) = self.scores()?;
        Ok((
            left.mapv(|v| v.im().atan2(v.re())),
            right.mapv(|v| v.im().atan2(v.re())),
        ))
    }
}

fn project_pair<A: ModeScalar>(projector: &RotatedProjector<A>, normalized: &[Array2<A>; 2]) -> Result<[Array2<A>; 2]> {
    Ok([
        projector.project(normalized[0].view())?,
        projector.project(normalized[1].view())?,
    ])
}

/// Pearson correlation of every data column with every score column (real parts).
/// Constant columns correlate as 0.
fn pearson_correlation<A: ModeScalar>(data: &ArrayView2<A>, scores: &ArrayView2<A>) -> Array2<f64> {
    let standardize = |m: &ArrayView2<A>| {
        let mut centered = m.mapv(|v| v.re());
        let n = centered.nrows() as f64;
        for mut col in centered.axis_iter_mut(Axis(1)) {
            let mean = col.sum() / n;
            col -= mean;
            let norm = col.dot(&col).sqrt();
            if norm > 0.0 {
                col /= norm;
            }
        }
        centered
    };
    standardize(data).t().dot(&standardize(scores))
}
