// src/decomposition.rs

//! Unrotated EOF and MCA decompositions.
//!
//! Both models centre (and optionally standardise) their input, lift it into
//! the model's value domain (identity for `f64`, analytic signal for `c64`)
//! and keep the leading `n_modes` singular triplets.

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{Result, RotationError};
use crate::hilbert::{AnalyticSignalBuilder, Padding, DEFAULT_DECAY_FACTOR};
use crate::linalg_backends::{adjoint, BackendSVD, ModeScalar, NdarrayLinAlgBackend, SVDOutput, ValueKind};
use crate::preprocessing::{Centerer, Preprocessor};

/// Configuration of an [`Eof`] decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EofConfig {
    pub n_modes: usize,
    /// Divide every feature by its standard deviation after centring.
    pub standardize: bool,
    /// Padding of the analytic signal (complex models only).
    pub padding: Padding,
    /// Decay of the exponential padding (complex models only).
    pub decay_factor: f64,
}

impl Default for EofConfig {
    fn default() -> Self {
        EofConfig {
            n_modes: 10,
            standardize: false,
            padding: Padding::Exponential,
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

/// Configuration of an [`Mca`] decomposition. Preprocessing applies to both fields.
pub type McaConfig = EofConfig;

impl EofConfig {
    fn analytic_builder(&self) -> Result<AnalyticSignalBuilder> {
        AnalyticSignalBuilder::new(self.padding, self.decay_factor)
            .map_err(|e| RotationError::InvalidConfig(e.to_string()))
    }
}

fn check_n_modes(n_modes: usize, max_modes: usize) -> Result<()> {
    if n_modes == 0 || n_modes > max_modes {
        return Err(RotationError::InvalidConfig(format!(
            "n_modes={} is outside 1..={} (limited by the data dimensions).",
            n_modes, max_modes
        )));
    }
    Ok(())
}

fn truncated_svd<A: ModeScalar>(matrix: Array2<A>, n_modes: usize) -> Result<(Array2<A>, Array1<f64>, Array2<A>)> {
    let SVDOutput { u, s: singular_values, vt } = NdarrayLinAlgBackend
        .svd_into(matrix, true, true)
        .map_err(RotationError::linalg("SVD of the data matrix"))?;
    match (u, vt) {
        (Some(u), Some(vt)) => Ok((
            u.slice(s![.., ..n_modes]).to_owned(),
            singular_values.slice(s![..n_modes]).to_owned(),
            adjoint(&vt.slice(s![..n_modes, ..])),
        )),
        _ => Err(RotationError::Linalg {
            operation: "SVD of the data matrix",
            source: "singular vectors were not returned".into(),
        }),
    }
}

pub(crate) fn lift_to_real_domain<A: ModeScalar>(canonical: Array2<f64>, operation: &'static str) -> Result<Array2<A>> {
    match A::KIND {
        ValueKind::Real => Ok(canonical.mapv(A::from_real)),
        ValueKind::Complex => Err(RotationError::NotImplemented(operation)),
    }
}

/// Empirical orthogonal function analysis of one field.
#[derive(Debug, Clone)]
pub struct Eof<A: ModeScalar> {
    config: EofConfig,
    preprocessor: Centerer,
    data: Array2<A>,
    components: Array2<A>,
    scores: Array2<A>,
    singular_values: Array1<f64>,
    total_variance: f64,
}

/// Complex EOF analysis on the analytic signal.
pub type ComplexEof = Eof<ndarray_linalg::c64>;

impl<A: ModeScalar> Eof<A> {
    /// Decomposes a raw samples × features matrix.
    ///
    /// # Errors
    /// `InvalidConfig` if `n_modes` is zero or exceeds `min(samples, features)`,
    /// `InvalidInput` for fewer than two samples.
    pub fn fit(raw: ArrayView2<f64>, config: &EofConfig) -> Result<Self> {
        let (n_samples, n_features) = raw.dim();
        check_n_modes(config.n_modes, n_samples.min(n_features))?;
        let analytic = config.analytic_builder()?;
        let start_time = Instant::now();
        info!(
            "Fitting {:?} EOF with {} modes on {}x{} data.",
            A::KIND,
            config.n_modes,
            n_samples,
            n_features
        );

        let mut preprocessor = Centerer::new(config.standardize);
        let canonical = preprocessor.fit_forward(raw)?;
        let data = A::lift(canonical, &analytic)?;
        let total_variance = data.iter().map(|v| v.square()).sum::<f64>() / (n_samples - 1) as f64;

        let (u, singular_values, components) = truncated_svd(data.clone(), config.n_modes)?;
        let mut scores = u;
        for (mut col, &sv) in scores.columns_mut().into_iter().zip(singular_values.iter()) {
            col.mapv_inplace(|v| v.mul_real(sv));
        }

        info!("EOF fitted in {:?}.", start_time.elapsed());
        Ok(Self {
            config: *config,
            preprocessor,
            data,
            components,
            scores,
            singular_values,
            total_variance,
        })
    }

    pub fn config(&self) -> &EofConfig {
        &self.config
    }

    pub fn n_modes(&self) -> usize {
        self.components.ncols()
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn preprocessor(&self) -> &Centerer {
        &self.preprocessor
    }

    /// Canonical data in the model's value domain, samples × features.
    pub fn data(&self) -> &Array2<A> {
        &self.data
    }

    /// Orthonormal spatial patterns, features × modes.
    pub fn components(&self) -> &Array2<A> {
        &self.components
    }

    /// `U·S`, samples × modes.
    pub fn scores(&self) -> &Array2<A> {
        &self.scores
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    /// `S² / (n − 1)`.
    pub fn explained_variance(&self) -> Array1<f64> {
        let dof = (self.n_samples() - 1) as f64;
        self.singular_values.mapv(|sv| sv * sv / dof)
    }

    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.total_variance;
        self.explained_variance()
            .mapv(|ev| if total > 0.0 { ev / total } else { 0.0 })
    }

    pub fn total_variance(&self) -> f64 {
        self.total_variance
    }

    /// Projects new raw data onto the components: `preprocess(raw) · V`.
    ///
    /// # Errors
    /// `NotImplemented` for complex models.
    pub fn transform(&self, raw: ArrayView2<f64>) -> Result<Array2<A>> {
        let canonical = self.preprocessor.forward(raw)?;
        let data = lift_to_real_domain::<A>(canonical, "EOF transform")?;
        Ok(data.dot(&self.components))
    }
}

/// Maximum covariance analysis of two fields sharing the sample axis.
#[derive(Debug, Clone)]
pub struct Mca<A: ModeScalar> {
    config: McaConfig,
    preprocessors: [Centerer; 2],
    data: [Array2<A>; 2],
    components: [Array2<A>; 2],
    singular_values: Array1<f64>,
    total_squared_covariance: f64,
}

/// Complex MCA on the analytic signals of both fields.
pub type ComplexMca = Mca<ndarray_linalg::c64>;

impl<A: ModeScalar> Mca<A> {
    /// Decomposes the cross-covariance `C = X₁ᴴX₂ / (n − 1) = U·Σ·Vᴴ`.
    ///
    /// # Errors
    /// `InvalidInput` if the sample counts differ, `InvalidConfig` if `n_modes`
    /// is zero or exceeds `min(features₁, features₂, samples)`.
    pub fn fit(left: ArrayView2<f64>, right: ArrayView2<f64>, config: &McaConfig) -> Result<Self> {
        let n_samples = left.nrows();
        if right.nrows() != n_samples {
            return Err(RotationError::InvalidInput(format!(
                "Both fields must share the sample axis, got {} and {} samples.",
                n_samples,
                right.nrows()
            )));
        }
        check_n_modes(config.n_modes, left.ncols().min(right.ncols()).min(n_samples))?;
        let analytic = config.analytic_builder()?;
        let start_time = Instant::now();
        info!(
            "Fitting {:?} MCA with {} modes on fields of {} and {} features over {} samples.",
            A::KIND,
            config.n_modes,
            left.ncols(),
            right.ncols(),
            n_samples
        );

        let mut left_pre = Centerer::new(config.standardize);
        let mut right_pre = Centerer::new(config.standardize);
        let left_data = A::lift(left_pre.fit_forward(left)?, &analytic)?;
        let right_data = A::lift(right_pre.fit_forward(right)?, &analytic)?;

        let dof = (n_samples - 1) as f64;
        let cross_covariance = adjoint(&left_data).dot(&right_data).mapv(|v| v.div_real(dof));
        let total_squared_covariance = cross_covariance.iter().map(|v| v.square()).sum::<f64>();
        debug!(
            "Cross-covariance matrix {:?}, total squared covariance {:e}.",
            cross_covariance.dim(),
            total_squared_covariance
        );

        let (left_components, singular_values, right_components) =
            truncated_svd(cross_covariance, config.n_modes)?;

        info!("MCA fitted in {:?}.", start_time.elapsed());
        Ok(Self {
            config: *config,
            preprocessors: [left_pre, right_pre],
            data: [left_data, right_data],
            components: [left_components, right_components],
            singular_values,
            total_squared_covariance,
        })
    }

    pub fn config(&self) -> &McaConfig {
        &self.config
    }

    pub fn n_modes(&self) -> usize {
        self.singular_values.len()
    }

    pub fn n_samples(&self) -> usize {
        self.data[0].nrows()
    }

    pub fn preprocessors(&self) -> (&Centerer, &Centerer) {
        (&self.preprocessors[0], &self.preprocessors[1])
    }

    pub fn data(&self) -> (&Array2<A>, &Array2<A>) {
        (&self.data[0], &self.data[1])
    }

    /// Left and right singular vectors, features × modes each.
    pub fn components(&self) -> (&Array2<A>, &Array2<A>) {
        (&self.components[0], &self.components[1])
    }

    /// Singular values σ of the cross-covariance matrix.
    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    /// `√σ` per mode.
    pub fn norms(&self) -> Array1<f64> {
        self.singular_values.mapv(f64::sqrt)
    }

    pub fn squared_covariance(&self) -> Array1<f64> {
        self.singular_values.mapv(|sv| sv * sv)
    }

    /// `‖C‖²_F`.
    pub fn total_squared_covariance(&self) -> f64 {
        self.total_squared_covariance
    }

    pub fn squared_covariance_fraction(&self) -> Array1<f64> {
        let total = self.total_squared_covariance;
        self.squared_covariance()
            .mapv(|sc| if total > 0.0 { sc / total } else { 0.0 })
    }

    /// `Xᵢ · compsᵢ / √σ` for the fitted data of both fields.
    pub fn scores(&self) -> (Array2<A>, Array2<A>) {
        (self.normalized_scores(&self.data[0], 0), self.normalized_scores(&self.data[1], 1))
    }

    /// Scores of new raw data for either or both fields.
    ///
    /// # Errors
    /// `NotImplemented` for complex models.
    pub fn transform(
        &self,
        left: Option<ArrayView2<f64>>,
        right: Option<ArrayView2<f64>>,
    ) -> Result<(Option<Array2<A>>, Option<Array2<A>>)> {
        let left_scores = left
            .map(|raw| self.transform_field(raw, 0))
            .transpose()?;
        let right_scores = right
            .map(|raw| self.transform_field(raw, 1))
            .transpose()?;
        Ok((left_scores, right_scores))
    }

    fn transform_field(&self, raw: ArrayView2<f64>, field: usize) -> Result<Array2<A>> {
        let canonical = self.preprocessors[field].forward(raw)?;
        let data = lift_to_real_domain::<A>(canonical, "MCA transform")?;
        Ok(self.normalized_scores(&data, field))
    }

    fn normalized_scores(&self, data: &Array2<A>, field: usize) -> Array2<A> {
        let mut scores = data.dot(&self.components[field]);
        let norms = self.norms();
        for (mut col, &norm) in scores.columns_mut().into_iter().zip(norms.iter()) {
            if norm > 0.0 {
                col.mapv_inplace(|v| v.div_real(norm));
            }
        }
        scores
    }
}
