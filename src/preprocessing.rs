// src/preprocessing.rs

//! Mapping between the caller's raw samples × features matrix and the canonical
//! (centred, optionally standardised) matrix the decomposition works on.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RotationError};

/// Bijection between raw and canonical data.
pub trait Preprocessor {
    /// Learns the mapping from `raw` and returns its canonical form.
    fn fit_forward(&mut self, raw: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Canonical form of new data under the fitted mapping.
    fn forward(&self, raw: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Raw form of canonical data.
    fn inverse(&self, canonical: ArrayView2<f64>) -> Result<Array2<f64>>;
}

/// Removes the per-feature mean and optionally divides by the per-feature
/// standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centerer {
    standardize: bool,
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl Centerer {
    pub fn new(standardize: bool) -> Self {
        Self {
            standardize,
            mean: None,
            scale: None,
        }
    }

    pub fn standardize(&self) -> bool {
        self.standardize
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    /// Sanitised per-feature scale; all ones unless `standardize` is set.
    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.mean.as_ref().map(|m| m.len())
    }

    fn fitted(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        match (self.mean.as_ref(), self.scale.as_ref()) {
            (Some(mean), Some(scale)) => Ok((mean, scale)),
            _ => Err(RotationError::NotFitted("Centerer")),
        }
    }

    fn check_features(&self, n_input_features: usize, n_model_features: usize) -> Result<()> {
        if n_input_features != n_model_features {
            return Err(RotationError::InvalidInput(format!(
                "Input data feature dimension ({}) does not match the fitted feature dimension ({}).",
                n_input_features, n_model_features
            )));
        }
        Ok(())
    }
}

impl Default for Centerer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Preprocessor for Centerer {
    fn fit_forward(&mut self, raw: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (n_samples, n_features) = raw.dim();
        if n_samples < 2 || n_features == 0 {
            return Err(RotationError::InvalidInput(format!(
                "Input data must have at least 2 samples and 1 feature, got {}x{}.",
                n_samples, n_features
            )));
        }

        let mean = raw
            .mean_axis(Axis(0))
            .ok_or_else(|| RotationError::InvalidInput("Failed to compute the feature means.".to_string()))?;
        let mut centered = &raw - &mean;

        let scale = if self.standardize {
            centered
                .map_axis(Axis(0), |column| column.std(1.0))
                .mapv(|val| if val.abs() < 1e-9 { 1.0 } else { val })
        } else {
            Array1::ones(n_features)
        };
        if self.standardize {
            centered /= &scale;
        }

        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(centered)
    }

    fn forward(&self, raw: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.fitted()?;
        self.check_features(raw.ncols(), mean.len())?;
        let mut canonical = &raw - mean;
        canonical /= scale;
        Ok(canonical)
    }

    fn inverse(&self, canonical: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.fitted()?;
        self.check_features(canonical.ncols(), mean.len())?;
        let mut raw = &canonical * scale;
        raw += mean;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_centering_removes_means() {
        let raw = array![[1.0, 10.0], [3.0, 14.0], [5.0, 18.0]];
        let mut centerer = Centerer::new(false);
        let canonical = centerer.fit_forward(raw.view()).unwrap();
        assert_eq!(centerer.mean().unwrap(), &array![3.0, 14.0]);
        for mean in canonical.mean_axis(Axis(0)).unwrap().iter() {
            assert_abs_diff_eq!(*mean, 0.0, epsilon = 1e-12);
        }
        assert_eq!(canonical, array![[-2.0, -4.0], [0.0, 0.0], [2.0, 4.0]]);
    }

    #[test]
    fn test_standardize_sanitizes_constant_features() {
        let raw = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0], [4.0, 7.0]];
        let mut centerer = Centerer::new(true);
        let canonical = centerer.fit_forward(raw.view()).unwrap();
        let scale = centerer.scale().unwrap();
        assert_eq!(scale[1], 1.0);
        assert_abs_diff_eq!(canonical.column(0).std(1.0), 1.0, epsilon = 1e-12);
        assert!(canonical.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_inverse_undoes_forward() {
        let raw = array![[0.5, -1.0, 2.0], [1.5, 3.0, -2.0], [2.5, 0.0, 0.0]];
        let mut centerer = Centerer::new(true);
        centerer.fit_forward(raw.view()).unwrap();
        let new = array![[9.0, 8.0, 7.0]];
        let back = centerer.inverse(centerer.forward(new.view()).unwrap().view()).unwrap();
        for (a, b) in back.iter().zip(new.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_errors_before_fit_and_on_feature_mismatch() {
        let centerer = Centerer::default();
        assert!(matches!(
            centerer.forward(array![[1.0]].view()),
            Err(RotationError::NotFitted(_))
        ));

        let mut centerer = Centerer::default();
        centerer.fit_forward(array![[1.0, 2.0], [3.0, 4.0]].view()).unwrap();
        assert!(matches!(
            centerer.forward(array![[1.0, 2.0, 3.0]].view()),
            Err(RotationError::InvalidInput(_))
        ));
        assert!(matches!(
            Centerer::default().fit_forward(array![[1.0, 2.0]].view()),
            Err(RotationError::InvalidInput(_))
        ));
    }
}
