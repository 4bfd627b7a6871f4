use thiserror::Error;

use super::domain::Domain;

/// Trait implemented by real numbers.
pub trait RealField: nalgebra::RealField {
    /// Square root of double precision machine epsilon. This value is a
    /// standard constant for epsilons in approximating first-order
    /// derivate-based concepts.
    const EPSILON_SQRT: Self;

    /// Cubic root of double precision machine epsilon. This value is a standard
    /// constant for epsilons in approximating second-order derivate-based
    /// concepts and central differences.
    const EPSILON_CBRT: Self;
}

impl RealField for f32 {
    const EPSILON_SQRT: Self = 0.00034526698;
    const EPSILON_CBRT: Self = 0.0049215667;
}

impl RealField for f64 {
    const EPSILON_SQRT: Self = 0.000000014901161193847656;
    const EPSILON_CBRT: Self = 0.0000060554544523933395;
}

/// The base trait for [`Function`](super::function::Function).
pub trait Problem {
    /// Field type of the problem, usually f64 or f32.
    type Field: RealField + Copy;

    /// Get the domain (bound constraints) of the problem.
    ///
    /// The dimension of the domain is the number of parameters of the
    /// problem.
    fn domain(&self) -> Domain<Self::Field>;
}

/// Error encountered while evaluating an objective function.
///
/// Unlike non-finite values, which optimizers treat as infeasible points,
/// these errors are never recovered from and are propagated to the caller.
#[derive(Debug, Error)]
pub enum ProblemError {
    /// The number of variables does not match the dimensionality of the
    /// problem.
    #[error("invalid dimensionality: expected {expected}, got {actual}")]
    InvalidDimensionality {
        /// Dimension of the problem.
        expected: usize,
        /// Dimension of the passed vector.
        actual: usize,
    },
    /// The data are malformed for the given parameters.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// A custom error specific to the function.
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}
