// src/hilbert.rs

//! Analytic-signal construction for complex EOF/MCA.
//!
//! Every feature column of a samples × features matrix is extended into
//! `y + i·H[y]`, where `H` is the Hilbert transform computed by zeroing the
//! negative frequencies of the FFT. Non-periodic series ring at their ends
//! under the FFT; exponential padding damps this by surrounding the series
//! with pads that decay from its boundary anomalies towards its linear trend.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, RotationError};

/// Default decay factor of the exponential padding.
pub const DEFAULT_DECAY_FACTOR: f64 = 0.2;

/// Padding applied before the Hilbert transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// Pads of length N on both sides, decaying exponentially from the boundary
    /// anomaly to the extrapolated linear trend.
    Exponential,
    /// Transform the series as is.
    None,
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Exponential
    }
}

/// Builds analytic signals with a fixed padding policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticSignalBuilder {
    padding: Padding,
    decay_factor: f64,
}

impl Default for AnalyticSignalBuilder {
    fn default() -> Self {
        Self {
            padding: Padding::Exponential,
            decay_factor: DEFAULT_DECAY_FACTOR,
        }
    }
}

impl AnalyticSignalBuilder {
    /// # Errors
    /// Returns `InvalidInput` if `decay_factor` is not strictly positive and finite.
    pub fn new(padding: Padding, decay_factor: f64) -> Result<Self> {
        validate_decay_factor(decay_factor)?;
        Ok(Self { padding, decay_factor })
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn decay_factor(&self) -> f64 {
        self.decay_factor
    }

    /// Analytic signal of a single real series of `N >= 2` samples.
    pub fn analytic(&self, y: ArrayView1<f64>) -> Result<Array1<Complex64>> {
        let n_samples = y.len();
        validate_length(n_samples)?;
        let plan = HilbertPlan::new(self.extended_len(n_samples));
        Ok(Array1::from_vec(self.analytic_with_plan(y, &plan)))
    }

    /// Applies [`analytic`](Self::analytic) to every column of a samples × features
    /// matrix. Columns are processed in parallel and share one FFT plan.
    pub fn transform_columns(&self, data: ArrayView2<f64>) -> Result<Array2<Complex64>> {
        let (n_samples, n_features) = data.dim();
        validate_length(n_samples)?;
        debug!(
            "Computing analytic signal for {} features over {} samples (padding={:?}, decay_factor={}).",
            n_features, n_samples, self.padding, self.decay_factor
        );

        let plan = HilbertPlan::new(self.extended_len(n_samples));
        let columns: Vec<Vec<Complex64>> = (0..n_features)
            .into_par_iter()
            .map(|j| self.analytic_with_plan(data.column(j), &plan))
            .collect();

        let mut output = Array2::<Complex64>::zeros((n_samples, n_features));
        for (mut out_col, analytic) in output.columns_mut().into_iter().zip(columns) {
            for (dst, src) in out_col.iter_mut().zip(analytic) {
                *dst = src;
            }
        }
        Ok(output)
    }

    fn extended_len(&self, n_samples: usize) -> usize {
        match self.padding {
            Padding::Exponential => 3 * n_samples,
            Padding::None => n_samples,
        }
    }

    fn analytic_with_plan(&self, y: ArrayView1<f64>, plan: &HilbertPlan) -> Vec<Complex64> {
        let n_samples = y.len();
        match self.padding {
            Padding::Exponential => {
                let extended = pad_exponential(y, self.decay_factor);
                let analytic = plan.analytic(&extended);
                analytic[n_samples..2 * n_samples].to_vec()
            }
            Padding::None => {
                let series: Vec<f64> = y.iter().copied().collect();
                plan.analytic(&series)
            }
        }
    }
}

/// Analytic signal of `y` with the given padding.
///
/// The real part reproduces `y` to numerical precision and the length is unchanged.
///
/// # Errors
/// Returns `InvalidInput` if `y` has fewer than two samples or `decay_factor <= 0`.
pub fn analytic_signal(y: ArrayView1<f64>, padding: Padding, decay_factor: f64) -> Result<Array1<Complex64>> {
    AnalyticSignalBuilder::new(padding, decay_factor)?.analytic(y)
}

fn validate_length(n_samples: usize) -> Result<()> {
    if n_samples < 2 {
        return Err(RotationError::InvalidInput(format!(
            "Analytic signal requires at least 2 samples, got {}.",
            n_samples
        )));
    }
    Ok(())
}

fn validate_decay_factor(decay_factor: f64) -> Result<()> {
    if !decay_factor.is_finite() || decay_factor <= 0.0 {
        return Err(RotationError::InvalidInput(format!(
            "decay_factor must be positive and finite, got {}.",
            decay_factor
        )));
    }
    Ok(())
}

/// Forward/inverse FFT pair for one series length.
struct HilbertPlan {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl HilbertPlan {
    fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        Self { len, forward, inverse }
    }

    /// `x + i·H[x]` via the one-sided spectrum.
    fn analytic(&self, signal: &[f64]) -> Vec<Complex64> {
        let n = self.len;
        debug_assert_eq!(signal.len(), n);
        let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.forward.process(&mut buffer);

        // DC (and Nyquist for even n) keep weight 1, positive frequencies are doubled,
        // negative frequencies are removed.
        let half = n / 2;
        let last_doubled = if n % 2 == 0 { half } else { half + 1 };
        for value in buffer.iter_mut().take(last_doubled).skip(1) {
            *value *= 2.0;
        }
        for value in buffer.iter_mut().skip(half + 1) {
            *value = Complex64::new(0.0, 0.0);
        }

        self.inverse.process(&mut buffer);
        let scale = 1.0 / n as f64;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
        buffer
    }
}

/// Least-squares line `intercept + slope·x` through `(i, y[i])`.
fn linear_trend(y: ArrayView1<f64>) -> (f64, f64) {
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = y.sum() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &value) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (value - y_mean);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (y_mean - slope * x_mean, slope)
}

/// `[leading pad, y, trailing pad]`, each of length N.
///
/// The pads start at the boundary anomalies `y[0] - trend(0)` and
/// `y[N-1] - trend(N-1)` and decay as `exp(-i / N / decay_factor)` on top of the
/// trend extrapolated to `x = -N..0` and `x = N..2N`.
fn pad_exponential(y: ArrayView1<f64>, decay_factor: f64) -> Vec<f64> {
    let n = y.len();
    let nf = n as f64;
    let (intercept, slope) = linear_trend(y);
    let trend = |x: f64| intercept + slope * x;
    let kernel = |i: usize| (-(i as f64) / nf / decay_factor).exp();

    let amp_pre = y[0] - trend(0.0);
    let amp_post = y[n - 1] - trend(nf - 1.0);

    let mut extended = Vec::with_capacity(3 * n);
    for i in 0..n {
        extended.push(amp_pre * kernel(n - 1 - i) + trend(i as f64 - nf));
    }
    extended.extend(y.iter().copied());
    for i in 0..n {
        extended.push(amp_post * kernel(i) + trend(nf + i as f64));
    }
    extended
}
