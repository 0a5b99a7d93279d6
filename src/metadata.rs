// src/metadata.rs

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, RotationError};
use crate::rotation::RotationConfig;

/// When rotated scores are materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputePolicy {
    /// Everything is computed inside `fit`.
    #[default]
    Eager,
    /// Rotation matrix, permutation and signs are computed in `fit`; rotated
    /// scores are computed on first access or on `compute()`.
    Deferred,
}

/// Configuration shared by [`EofRotator`](crate::EofRotator) and [`McaRotator`](crate::McaRotator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatorConfig {
    /// Number of leading modes to rotate.
    pub n_modes: usize,
    /// 1 for Varimax, > 1 for Promax.
    pub power: u32,
    pub max_iter: usize,
    pub rtol: f64,
    pub compute: ComputePolicy,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        let rotation = RotationConfig::default();
        RotatorConfig {
            n_modes: 10,
            power: rotation.power,
            max_iter: rotation.max_iter,
            rtol: rotation.rtol,
            compute: ComputePolicy::Eager,
        }
    }
}

impl RotatorConfig {
    pub fn rotation(&self) -> RotationConfig {
        RotationConfig {
            power: self.power,
            max_iter: self.max_iter,
            rtol: self.rtol,
        }
    }

    /// # Errors
    /// `InvalidConfig` if `n_modes` is zero or the rotation parameters are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.n_modes == 0 {
            return Err(RotationError::InvalidConfig("n_modes must be at least 1.".to_string()));
        }
        self.rotation().validate()
    }
}

/// Record of a fitted rotated model. Built once at the end of `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    model: String,
    n_modes: usize,
    power: u32,
    max_iter: usize,
    rtol: f64,
    iterations: usize,
    converged: bool,
    software: String,
    version: String,
    fitted_at_unix_secs: u64,
}

impl ModelMetadata {
    pub(crate) fn new(model: &str, n_modes: usize, rotation: &RotationConfig, iterations: usize, converged: bool) -> Self {
        let fitted_at_unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            model: model.to_string(),
            n_modes,
            power: rotation.power,
            max_iter: rotation.max_iter,
            rtol: rotation.rtol,
            iterations,
            converged,
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            fitted_at_unix_secs,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn n_modes(&self) -> usize {
        self.n_modes
    }

    pub fn power(&self) -> u32 {
        self.power
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn rtol(&self) -> f64 {
        self.rtol
    }

    /// Varimax iterations used.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn software(&self) -> &str {
        &self.software
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fitted_at_unix_secs(&self) -> u64 {
        self.fitted_at_unix_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_rotation_defaults() {
        let config = RotatorConfig::default();
        assert_eq!(config.n_modes, 10);
        assert_eq!(config.compute, ComputePolicy::Eager);
        assert_eq!(config.rotation(), RotationConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_modes_and_bad_rotation() {
        let zero_modes = RotatorConfig { n_modes: 0, ..RotatorConfig::default() };
        assert!(matches!(zero_modes.validate(), Err(RotationError::InvalidConfig(_))));
        let zero_power = RotatorConfig { power: 0, ..RotatorConfig::default() };
        assert!(matches!(zero_power.validate(), Err(RotationError::InvalidConfig(_))));
    }

    #[test]
    fn test_metadata_records_fit() {
        let rotation = RotationConfig { power: 3, ..RotationConfig::default() };
        let metadata = ModelMetadata::new("McaRotator", 4, &rotation, 12, true);
        assert_eq!(metadata.model(), "McaRotator");
        assert_eq!(metadata.power(), 3);
        assert_eq!(metadata.iterations(), 12);
        assert!(metadata.converged());
        assert_eq!(metadata.version(), env!("CARGO_PKG_VERSION"));
        assert!(metadata.fitted_at_unix_secs() > 0);
    }
}
