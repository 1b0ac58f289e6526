//! Ordinary least squares of forecast on observed, with intercept.
//!
//! The 2x2 normal equations are solved with `nalgebra`. A constant
//! predictor makes the system singular and is reported as `Degenerate`. A
//! constant response still fits (slope 0) but leaves R² undefined.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

const SINGULAR_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("need at least {needed} samples, got {got}")]
    TooFewSamples { needed: usize, got: usize },

    #[error("degenerate regression input: {0}")]
    Degenerate(&'static str),

    #[error("predictor and response lengths differ ({0} vs {1})")]
    LengthMismatch(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    /// `None` when the response has no variance.
    pub r_squared: Option<f64>,
    pub n: usize,
}

impl LinearFit {
    /// `1 - (1 - R²)(n - 1)/(n - 2)` for one predictor; `None` below three
    /// samples or when R² is undefined.
    pub fn adjusted_r_squared(&self) -> Option<f64> {
        if self.n < 3 {
            return None;
        }
        let n = self.n as f64;
        self.r_squared
            .map(|r2| 1.0 - (1.0 - r2) * (n - 1.0) / (n - 2.0))
    }
}

pub fn fit(x: &[f64], y: &[f64]) -> Result<LinearFit, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::LengthMismatch(x.len(), y.len()));
    }
    let n = x.len();
    if n < 2 {
        return Err(RegressionError::TooFewSamples { needed: 2, got: n });
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(RegressionError::Degenerate("non-finite sample"));
    }

    let nf = n as f64;
    let sx: f64 = x.iter().sum();
    let sy: f64 = y.iter().sum();
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();

    let mean_x = sx / nf;
    let spread_x: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if spread_x <= SINGULAR_TOLERANCE * (1.0 + sxx) {
        return Err(RegressionError::Degenerate("constant predictor"));
    }

    let normal = Matrix2::new(nf, sx, sx, sxx);
    let rhs = Vector2::new(sy, sxy);
    let beta = normal
        .try_inverse()
        .ok_or(RegressionError::Degenerate("singular normal equations"))?
        * rhs;
    let (intercept, slope) = (beta[0], beta[1]);

    let mean_y = sy / nf;
    let tss: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();
    let sse: f64 = x
        .iter()
        .zip(y)
        .map(|(a, b)| (b - (intercept + slope * a)).powi(2))
        .sum();

    Ok(LinearFit {
        intercept,
        slope,
        r_squared: (tss > SINGULAR_TOLERANCE).then(|| 1.0 - sse / tss),
        n,
    })
}
