use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, IsContiguous, Vector,
};

use super::base::{Problem, ProblemError};

/// Definition of an objective function.
///
/// ## Defining a function
///
/// A function is any type that implements [`Function`] and [`Problem`] traits.
/// All data the function depends on are held by the type itself, so the same
/// function can be evaluated in isolation, by several optimizers or in tests.
///
/// ```rust
/// use estima::nalgebra as na;
/// use estima::{Domain, Function, Problem, ProblemError};
/// use na::{Dyn, IsContiguous};
///
/// // Negative log-likelihood of exponentially distributed samples.
/// struct Exponential {
///     samples: Vec<f64>,
/// }
///
/// impl Problem for Exponential {
///     type Field = f64;
///
///     fn domain(&self) -> Domain<Self::Field> {
///         // The rate must be positive.
///         Domain::unconstrained(1).with_lower(0, 0.0)
///     }
/// }
///
/// impl Function for Exponential {
///     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
///     where
///         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
///     {
///         let rate = x[0];
///
///         if rate <= 0.0 {
///             // Infeasible point.
///             return Ok(f64::INFINITY);
///         }
///
///         let n = self.samples.len() as f64;
///         let sum: f64 = self.samples.iter().sum();
///         Ok(rate * sum - n * rate.ln())
///     }
/// }
/// ```
pub trait Function: Problem {
    /// Calculates the function value in given point.
    ///
    /// A non-finite value (NaN or infinity) signals that the point is
    /// infeasible. An error is reserved for problems with the data that no
    /// choice of variables can fix.
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous;

    /// Calculates the analytic gradient in given point.
    ///
    /// Returns `Ok(false)` if the function does not provide the analytic
    /// gradient, in which case the algorithms approximate it by [finite
    /// differences](crate::derivatives::Gradient). This is the default.
    fn gradient<Sx, Sg>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        grad: &mut Vector<Self::Field, Dyn, Sg>,
    ) -> Result<bool, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sg: StorageMut<Self::Field, Dyn>,
    {
        let _ = (x, grad);
        Ok(false)
    }
}
