//! Tools for derivative-based methods.
//!
//! Gradients are approximated by finite differences unless the function
//! provides them analytically (see [`Function::gradient`]). The approximation
//! respects the domain: a probe that would leave the bounds or that evaluates
//! to a non-finite value is replaced by a probe on the other side of the
//! point.

use std::ops::Deref;

use log::debug;
use nalgebra::{
    convert, storage::StorageMut, ComplexField, Dyn, IsContiguous, OMatrix, OVector, RealField as _,
    Vector, U1,
};
use num_traits::{One, Zero};
use thiserror::Error;

use crate::core::{Domain, Function, Problem, ProblemError, RealField as _};

/// Rule for approximating the first derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difference {
    /// Forward differences, `(f(x + h) - f(x)) / h`. One evaluation per
    /// variable.
    Forward,
    /// Central differences, `(f(x + h) - f(x - h)) / 2h`. Two evaluations per
    /// variable, but an order of magnitude more accurate.
    #[default]
    Central,
}

/// Error when computing the gradient vector.
#[derive(Debug, Error)]
pub enum GradientError {
    /// Error that occurred when evaluating the function.
    #[error("{0}")]
    Problem(#[from] ProblemError),
    /// The function is not finite on either side of the point.
    #[error("function is not finite around the point in variable {index}")]
    InvalidValue {
        /// Index of the variable.
        index: usize,
    },
}

/// Gradient vector of a function.
#[derive(Debug, Clone)]
pub struct Gradient<F: Problem> {
    grad: OVector<F::Field, Dyn>,
}

impl<F: Problem> Gradient<F> {
    /// Initializes the gradient vector with zeros.
    pub fn zeros(dim: usize) -> Self {
        Self {
            grad: OVector::zeros_generic(Dyn(dim), U1),
        }
    }
}

impl<F: Function> Gradient<F> {
    /// Computes the gradient vector of the function in given point. See
    /// [`compute`](Gradient::compute) for more details.
    pub fn new<Sx>(
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
        fx: F::Field,
        diff: Difference,
    ) -> Result<Self, GradientError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let mut grad = Self::zeros(dom.dim());
        grad.compute(f, dom, x, fx, diff)?;
        Ok(grad)
    }

    /// Computes the gradient vector of the function in given point.
    ///
    /// The analytic gradient is used when the function provides it. Otherwise
    /// the gradient is approximated by finite differences.
    ///
    /// The parameter `x` is mutable to allow temporary mutations avoiding
    /// unnecessary allocations, but after this method ends, the content of the
    /// vector is exactly the same as before.
    pub fn compute<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
        fx: F::Field,
        diff: Difference,
    ) -> Result<&mut Self, GradientError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        if f.gradient(x, &mut self.grad)? {
            if let Some(index) = self.grad.iter().position(|gi| !gi.is_finite()) {
                return Err(GradientError::InvalidValue { index });
            }

            return Ok(self);
        }

        let scale = dom.scale();
        let one = F::Field::one();
        let two: F::Field = convert(2.0);
        let eps = match diff {
            Difference::Forward => F::Field::EPSILON_SQRT,
            Difference::Central => F::Field::EPSILON_CBRT,
        };

        for i in 0..dom.dim() {
            let xi = x[i];

            // Compute the step size. We would like to have the step as small as
            // possible (to be as close to the real derivative as possible). But
            // at the same time, very small step could cause f(x + e_i * step_i)
            // ~= f(x) with very small number of good digits.
            //
            // A reasonable way to balance these competing needs is to scale
            // each component by x_i itself. To avoid problems when x_i is close
            // to zero, it is modified to take the typical magnitude instead.
            let magnitude = one / scale[i];
            let step = eps * xi.abs().max(magnitude);

            let forward = xi + step;
            let backward = xi - step;

            // The original value is restored before any error is propagated.
            let fx_forward = if dom.contains_in(i, forward) {
                x[i] = forward;
                let value = f.apply(x);
                x[i] = xi;
                Some(value?).filter(|value| value.is_finite())
            } else {
                None
            };

            let need_backward = fx_forward.is_none() || diff == Difference::Central;
            let fx_backward = if need_backward && dom.contains_in(i, backward) {
                x[i] = backward;
                let value = f.apply(x);
                x[i] = xi;
                Some(value?).filter(|value| value.is_finite())
            } else {
                None
            };

            self.grad[i] = match (fx_forward, fx_backward) {
                (Some(fp), Some(fm)) if diff == Difference::Central => {
                    (fp - fm) / (two * step)
                }
                (Some(fp), _) => (fp - fx) / step,
                (None, Some(fm)) => {
                    debug!("using backward difference for variable {}", i);
                    (fx - fm) / step
                }
                (None, None) => {
                    if dom.contains_in(i, forward) || dom.contains_in(i, backward) {
                        return Err(GradientError::InvalidValue { index: i });
                    }

                    // The variable is fixed by its bounds.
                    F::Field::zero()
                }
            };
        }

        Ok(self)
    }
}

impl<F: Problem> Deref for Gradient<F> {
    type Target = OVector<F::Field, Dyn>;

    fn deref(&self) -> &Self::Target {
        &self.grad
    }
}

/// Error when computing the Hessian matrix.
#[derive(Debug, Error)]
pub enum HessianError {
    /// Error that occurred when evaluating the function.
    #[error("{0}")]
    Problem(#[from] ProblemError),
    /// The function is not finite in a probe point.
    #[error("function is not finite around the point")]
    InvalidValue,
    /// The Hessian matrix is not positive definite, the covariance of the
    /// estimates cannot be computed.
    #[error("Hessian matrix is not positive definite")]
    NotPositiveDefinite,
}

/// Hessian matrix of a function.
#[derive(Debug, Clone)]
pub struct Hessian<F: Problem> {
    hes: OMatrix<F::Field, Dyn, Dyn>,
    steps: OVector<F::Field, Dyn>,
    neighbors: OVector<F::Field, Dyn>,
}

impl<F: Problem> Hessian<F> {
    /// Initializes the Hessian matrix with zeros.
    pub fn zeros(dim: usize) -> Self {
        Self {
            hes: OMatrix::zeros_generic(Dyn(dim), Dyn(dim)),
            steps: OVector::zeros_generic(Dyn(dim), U1),
            neighbors: OVector::zeros_generic(Dyn(dim), U1),
        }
    }
}

impl<F: Function> Hessian<F> {
    /// Computes the Hessian matrix of the function in given point. See
    /// [`compute`](Hessian::compute) for more details.
    pub fn new<Sx>(
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
        fx: F::Field,
    ) -> Result<Self, HessianError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let mut hes = Self::zeros(dom.dim());
        hes.compute(f, dom, x, fx)?;
        Ok(hes)
    }

    /// Computes the Hessian matrix of the function in given point by forward
    /// differences of function values.
    ///
    /// The point is expected to lie in the interior of the domain, which is the
    /// case for the estimates the Hessian is usually computed for. The
    /// parameter `x` is restored before the method returns.
    pub fn compute<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
        fx: F::Field,
    ) -> Result<&mut Self, HessianError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let scale = dom.scale();
        let one = F::Field::one();
        let eps = F::Field::EPSILON_CBRT;
        let n = dom.dim();

        let eval = |x: &Vector<F::Field, Dyn, Sx>| -> Result<F::Field, HessianError> {
            let value = f.apply(x)?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(HessianError::InvalidValue)
            }
        };

        for i in 0..n {
            let xi = x[i];

            let magnitude = one / scale[i];
            let step = eps * xi.abs().max(magnitude);
            self.steps[i] = step;

            x[i] = xi + step;
            let value = eval(&*x);
            x[i] = xi;
            self.neighbors[i] = value?;
        }

        for i in 0..n {
            let xi = x[i];
            let stepi = self.steps[i];
            let fni = self.neighbors[i];

            // Prepare x + 2 * e_i.
            x[i] = xi + stepi + stepi;
            let fxii = eval(&*x);

            x[i] = xi + stepi;
            let fxii = match fxii {
                Ok(value) => value,
                Err(error) => {
                    x[i] = xi;
                    return Err(error);
                }
            };
            self.hes[(i, i)] = ((fx - fni) + (fxii - fni)) / (stepi * stepi);

            for j in (i + 1)..n {
                let xj = x[j];
                let stepj = self.steps[j];
                let fnj = self.neighbors[j];

                x[j] = xj + stepj;
                let fxij = eval(&*x);
                x[j] = xj;

                let fxij = match fxij {
                    Ok(value) => value,
                    Err(error) => {
                        x[i] = xi;
                        return Err(error);
                    }
                };

                let hij = ((fx - fni) + (fxij - fnj)) / (stepi * stepj);
                self.hes[(i, j)] = hij;
                self.hes[(j, i)] = hij;
            }

            x[i] = xi;
        }

        Ok(self)
    }

    /// Computes the standard errors of the estimates, that is, the square
    /// roots of the diagonal of the inverse Hessian.
    ///
    /// This is meaningful only if the function is a negative log-likelihood
    /// and the Hessian was computed in its minimum.
    pub fn standard_errors(&self) -> Result<OVector<F::Field, Dyn>, HessianError> {
        let chol = self
            .hes
            .clone_owned()
            .cholesky()
            .ok_or(HessianError::NotPositiveDefinite)?;
        let cov = chol.inverse();

        Ok(cov.diagonal().map(|var| var.sqrt()))
    }
}

impl<F: Problem> Deref for Hessian<F> {
    type Target = OMatrix<F::Field, Dyn, Dyn>;

    fn deref(&self) -> &Self::Target {
        &self.hes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector, storage::Storage};

    struct MixedVars {
        dom: Domain<f64>,
    }

    impl Problem for MixedVars {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            self.dom.clone()
        }
    }

    impl Function for MixedVars {
        fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
        where
            Sx: Storage<Self::Field, Dyn> + IsContiguous,
        {
            // A simple, arbitrary function that produces Hessian matrix with
            // non-zero corners.
            let x1 = x[0];
            let x2 = x[1];

            Ok(x1.powi(2) + x1 * x2 + x2.powi(3))
        }
    }

    // sqrt(x) is undefined below zero.
    struct SquareRoot;

    impl Problem for SquareRoot {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            Domain::unconstrained(1)
        }
    }

    impl Function for SquareRoot {
        fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
        where
            Sx: Storage<Self::Field, Dyn> + IsContiguous,
        {
            Ok(x[0].sqrt())
        }
    }

    // Fails in the corner x1 > 1, x2 > 0.5.
    struct Ledge;

    impl Problem for Ledge {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            Domain::unconstrained(2)
        }
    }

    impl Function for Ledge {
        fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
        where
            Sx: Storage<Self::Field, Dyn> + IsContiguous,
        {
            if x[0] > 1.0 && x[1] > 0.5 {
                Err(ProblemError::InvalidData(String::from("corner")))
            } else {
                Ok(x[0].powi(2) + x[1].powi(2))
            }
        }
    }

    #[test]
    fn mixed_vars_gradient() {
        let f = MixedVars {
            dom: Domain::unconstrained(2),
        };
        let dom = f.domain();
        let mut x = dvector![3.0, -3.0];

        for diff in [Difference::Forward, Difference::Central] {
            let fx = f.apply(&x).unwrap();
            let grad = Gradient::new(&f, &dom, &mut x, fx, diff).unwrap();

            let expected = dvector![3.0, 30.0];
            assert_abs_diff_eq!(&*grad, &expected, epsilon = 10e-6);
            assert_eq!(x, dvector![3.0, -3.0]);
        }
    }

    #[test]
    fn gradient_at_upper_bound() {
        let f = MixedVars {
            dom: Domain::rect(vec![-10.0, -10.0], vec![3.0, -3.0]),
        };
        let dom = f.domain();
        let mut x = dvector![3.0, -3.0];
        let fx = f.apply(&x).unwrap();

        // Forward probes are outside the domain, backward differences are used
        // instead.
        let grad = Gradient::new(&f, &dom, &mut x, fx, Difference::Central).unwrap();

        let expected = dvector![3.0, 30.0];
        assert_abs_diff_eq!(&*grad, &expected, epsilon = 10e-4);
    }

    #[test]
    fn gradient_near_undefined_region() {
        let f = SquareRoot;
        let dom = f.domain();
        let mut x = dvector![1e-12];
        let fx = f.apply(&x).unwrap();

        // The backward probe is NaN, the forward difference is used.
        let grad = Gradient::new(&f, &dom, &mut x, fx, Difference::Central).unwrap();
        assert!(grad[0].is_finite());
        assert!(grad[0] > 0.0);
    }

    #[test]
    fn gradient_with_fixed_variable() {
        let f = MixedVars {
            dom: Domain::rect(vec![1.0, -10.0], vec![1.0, 10.0]),
        };
        let dom = f.domain();
        let mut x = dvector![1.0, 2.0];
        let fx = f.apply(&x).unwrap();

        let grad = Gradient::new(&f, &dom, &mut x, fx, Difference::Central).unwrap();
        assert_eq!(grad[0], 0.0);
        assert_abs_diff_eq!(grad[1], 13.0, epsilon = 10e-6);
    }

    #[test]
    fn mixed_vars_hessian() {
        let f = MixedVars {
            dom: Domain::unconstrained(2),
        };
        let dom = f.domain();
        let mut x = dvector![3.0, -3.0];
        let fx = f.apply(&x).unwrap();

        let hes = Hessian::new(&f, &dom, &mut x, fx).unwrap();

        let expected = dmatrix![2.0, 1.0; 1.0, -18.0];
        assert_abs_diff_eq!(&*hes, &expected, epsilon = 10e-3);
    }

    #[test]
    fn failed_gradient_restores_point() {
        let f = Ledge;
        let dom = f.domain();
        let mut x = dvector![1.0, 0.6];
        let fx = f.apply(&x).unwrap();

        for diff in [Difference::Forward, Difference::Central] {
            assert!(matches!(
                Gradient::new(&f, &dom, &mut x, fx, diff),
                Err(GradientError::Problem(ProblemError::InvalidData(_)))
            ));
            assert_eq!(x, dvector![1.0, 0.6]);
        }
    }

    #[test]
    fn failed_hessian_restores_point() {
        let f = Ledge;
        let dom = f.domain();

        // The mixed probe fails here, the neighbors in single variables do not.
        let mut x = dvector![1.0, 0.5];
        let fx = f.apply(&x).unwrap();
        assert!(matches!(
            Hessian::new(&f, &dom, &mut x, fx),
            Err(HessianError::Problem(_))
        ));
        assert_eq!(x, dvector![1.0, 0.5]);

        let mut x = dvector![1.0, 0.6];
        let fx = f.apply(&x).unwrap();
        assert!(Hessian::new(&f, &dom, &mut x, fx).is_err());
        assert_eq!(x, dvector![1.0, 0.6]);
    }

    #[test]
    fn indefinite_hessian_has_no_standard_errors() {
        let f = MixedVars {
            dom: Domain::unconstrained(2),
        };
        let dom = f.domain();
        let mut x = dvector![3.0, -3.0];
        let fx = f.apply(&x).unwrap();

        let hes = Hessian::new(&f, &dom, &mut x, fx).unwrap();
        assert!(matches!(
            hes.standard_errors(),
            Err(HessianError::NotPositiveDefinite)
        ));
    }
}
