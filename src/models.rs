//! Objective functions of common statistical models.
//!
//! Every model owns its data and implements [`Function`](crate::Function), so
//! it can be passed directly to [`minimize`](crate::minimize) or an
//! [`OptimizerDriver`](crate::OptimizerDriver). The objectives are negative
//! log-likelihoods (or penalized losses) to be minimized, and each model
//! describes its parameter vector by a [`ParamLayout`](crate::ParamLayout).
//!
//! ```rust
//! use estima::models::NormalLikelihood;
//! use estima::minimize;
//!
//! let f = NormalLikelihood::new(vec![4.0, 5.0, 6.0, 5.5, 4.5]).expect("valid samples");
//! let min = minimize(&f, vec![0.0, 1.0], 1e-10, 1000, false).expect("no errors");
//!
//! assert!((min.x[0] - 5.0).abs() < 1e-3);
//! ```

pub mod cox;
pub mod linear;
pub mod logistic;
pub mod normal;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub use cox::{ascending_order, CoxPartialLikelihood};
pub use linear::{ridge_closed_form, GaussianRegression, PenalizedLeastSquares, Penalty};
pub use logistic::LogisticRegression;
pub use normal::NormalLikelihood;

/// Error of model construction.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// Lengths of the data do not agree.
    #[error("{what}: expected length {expected}, got {actual}")]
    DimensionMismatch {
        /// Which part of the data is wrong.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// The ordering index is not a permutation sorting the data.
    #[error("invalid ordering: {0}")]
    InvalidOrdering(String),
    /// The data are malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub(crate) fn check_len(
    what: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), ModelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

pub(crate) fn check_finite(what: &str, values: &[f64]) -> Result<(), ModelError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(ModelError::InvalidData(format!(
            "{} contains a non-finite value at {}",
            what, i
        ))),
        None => Ok(()),
    }
}

pub(crate) fn check_design(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), ModelError> {
    check_len("response", x.nrows(), y.len())?;

    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ModelError::InvalidData(String::from(
            "design matrix is empty",
        )));
    }

    check_finite("design matrix", x.as_slice())?;
    check_finite("response", y.as_slice())
}

/// Computes `ln(1 + exp(x))` without overflow.
pub(crate) fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Logistic function `1 / (1 + exp(-x))`.
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Central-difference gradient, used to check analytic gradients in tests.
#[cfg(test)]
pub(crate) fn numeric_gradient<F>(f: &F, x: &[f64]) -> Vec<f64>
where
    F: crate::Function<Field = f64>,
{
    let mut x = DVector::from_column_slice(x);
    (0..x.len())
        .map(|i| {
            let xi = x[i];
            let h = 1e-6 * xi.abs().max(1.0);

            x[i] = xi + h;
            let fp = f.apply(&x).unwrap();
            x[i] = xi - h;
            let fm = f.apply(&x).unwrap();
            x[i] = xi;

            (fp - fm) / (2.0 * h)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    #[test]
    fn softplus_is_stable() {
        assert_abs_diff_eq!(softplus(0.0), 2f64.ln(), epsilon = 1e-15);
        assert_abs_diff_eq!(softplus(1000.0), 1000.0);
        assert_abs_diff_eq!(softplus(-1000.0), 0.0);
        assert_abs_diff_eq!(softplus(3.0), (1.0 + 3f64.exp()).ln(), epsilon = 1e-12);
    }

    #[test]
    fn sigmoid_is_stable() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert_abs_diff_eq!(sigmoid(-1000.0), 0.0);
        assert_abs_diff_eq!(sigmoid(1000.0), 1.0);
        assert_abs_diff_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-15);
    }
}
