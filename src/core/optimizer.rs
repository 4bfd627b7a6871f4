use nalgebra::{storage::StorageMut, Dyn, IsContiguous, Vector};

use super::{domain::Domain, function::Function};

/// Outcome of a single optimization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// A step decreasing the function value was taken.
    Accepted,
    /// The current point satisfies the first-order optimality conditions
    /// within tolerance. The point was left unchanged.
    Stationary,
    /// No acceptable step could be found within the retry budget. The point
    /// was left unchanged.
    Stalled,
}

impl StepStatus {
    /// Returns true if further steps would not change the point.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Accepted)
    }
}

/// Result of a single optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step<T> {
    /// Function value in the point after the step.
    pub fx: T,
    /// Status of the step.
    pub status: StepStatus,
}

impl<T> Step<T> {
    /// Creates an accepted step.
    pub fn accepted(fx: T) -> Self {
        Self {
            fx,
            status: StepStatus::Accepted,
        }
    }

    /// Creates a step in a stationary point.
    pub fn stationary(fx: T) -> Self {
        Self {
            fx,
            status: StepStatus::Stationary,
        }
    }

    /// Creates a step that did not make progress.
    pub fn stalled(fx: T) -> Self {
        Self {
            fx,
            status: StepStatus::Stalled,
        }
    }
}

/// Interface of an optimizer.
///
/// An optimizer is an iterative algorithm which takes a point _x_ and computes
/// the next step in the optimization process. Repeated calls to the next step
/// should eventually converge into a minimum _x'_.
///
/// ## Implementing an optimizer
///
/// Here is an implementation of a coordinate search "optimizer" which probes
/// one variable at a time with a fixed step and keeps the probe if it improves
/// the function value.
///
/// ```rust
/// use estima::nalgebra as na;
/// use estima::{Domain, Function, Optimizer, ProblemError, Step};
/// use na::{storage::StorageMut, Dyn, IsContiguous, Vector};
///
/// struct CoordinateSearch {
///     step: f64,
///     index: usize,
/// }
///
/// impl<F: Function<Field = f64>> Optimizer<F> for CoordinateSearch {
///     const NAME: &'static str = "Coordinate search";
///     type Error = ProblemError;
///
///     fn opt_next<Sx>(
///         &mut self,
///         f: &F,
///         dom: &Domain<f64>,
///         x: &mut Vector<f64, Dyn, Sx>,
///     ) -> Result<Step<f64>, Self::Error>
///     where
///         Sx: StorageMut<f64, Dyn> + IsContiguous,
///     {
///         let fx = f.apply(x)?;
///         let i = self.index % dom.dim();
///         self.index += 1;
///
///         let xi = x[i];
///         x[i] = xi + self.step;
///         dom.project_in(x, i);
///
///         let fx_trial = f.apply(x)?;
///         if fx_trial < fx {
///             Ok(Step::accepted(fx_trial))
///         } else {
///             x[i] = xi;
///             Ok(Step::stalled(fx))
///         }
///     }
/// }
/// ```
pub trait Optimizer<F: Function> {
    /// Name of the optimizer.
    const NAME: &'static str;

    /// Error while computing the next step.
    ///
    /// Only unrecoverable errors (such as [`ProblemError`](super::ProblemError)
    /// propagated from the function) are reported this way. Failing to make
    /// progress is reported by [`StepStatus::Stalled`].
    type Error;

    /// Computes the next step in the optimization process.
    ///
    /// The value of `x` is the current point. After the method returns, `x`
    /// should hold the variable values of the performed step and the returned
    /// [`Step`] _must_ contain the function value of that step as computed by
    /// [`Function::apply`].
    ///
    /// The implementations _can_ assume that subsequent calls to `opt_next`
    /// pass the value of `x` as was returned in the previous iteration.
    fn opt_next<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
    ) -> Result<Step<F::Field>, Self::Error>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous;
}
