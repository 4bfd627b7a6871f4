//! Testing functions and utilities useful for benchmarking, debugging and
//! smoke testing.
//!
//! [`ExtendedRosenbrock`] and [`Sphere`] are recommended for first tests.
//! [`Quadratic`] provides an analytic gradient and a known minimizer for any
//! positive definite matrix.
//!
//! # References
//!
//! \[1\] [A Literature Survey of Benchmark Functions For Global Optimization
//! Problems](https://arxiv.org/abs/1308.4008)
//!
//! \[2\] [Numerical Methods for Unconstrained Optimization and Nonlinear
//! Equations](https://epubs.siam.org/doi/book/10.1137/1.9781611971200)

use std::error::Error as StdError;

use log::debug;
use nalgebra::{
    storage::{Storage, StorageMut},
    DMatrix, DVector, Dyn, IsContiguous, OVector, Vector,
};
use thiserror::Error;

use crate::core::{Domain, Function, Optimizer, Problem, ProblemError, StepStatus};

/// Extension of the [`Function`] trait that provides additional information
/// that is useful for testing optimizers.
pub trait TestFunction: Function<Field = f64> {
    /// Standard initial values for the function. Using the same initial values
    /// is essential for fair comparison of methods.
    fn initials(&self) -> Vec<OVector<f64, Dyn>>;

    /// A set of global optima.
    fn optima(&self) -> Vec<OVector<f64, Dyn>>;

    /// Test if given point is within `eps` (in Euclidean distance) from one of
    /// the global optima.
    fn is_optimum<Sx>(&self, x: &Vector<f64, Dyn, Sx>, eps: f64) -> bool
    where
        Sx: Storage<f64, Dyn> + IsContiguous,
    {
        self.optima()
            .iter()
            .any(|optimum| (x - optimum).norm() <= eps)
    }
}

/// [Extended Rosenbrock
/// function](https://en.wikipedia.org/wiki/Rosenbrock_function) \[1,2\] (also
/// known as Rosenbrock's valley or banana function).
///
/// The global minimum is inside a long, narrow, parabolic shaped flat valley.
/// The challenge is to find the solution inside the valley.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedRosenbrock {
    n: usize,
}

impl ExtendedRosenbrock {
    /// Initializes the function with given dimension.
    ///
    /// The dimension **must** be a multiplier of 2.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be greater than zero");
        assert!(n % 2 == 0, "n must be a multiple of 2");
        Self { n }
    }
}

impl Default for ExtendedRosenbrock {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Problem for ExtendedRosenbrock {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.n)
    }
}

impl Function for ExtendedRosenbrock {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let value = (0..(self.n / 2))
            .map(|i| {
                let x1 = x[2 * i];
                let x2 = x[2 * i + 1];
                100.0 * (x2 - x1 * x1).powi(2) + (1.0 - x1).powi(2)
            })
            .sum();

        Ok(value)
    }
}

impl TestFunction for ExtendedRosenbrock {
    fn initials(&self) -> Vec<OVector<f64, Dyn>> {
        let init1 = DVector::from_iterator(
            self.n,
            (0..self.n).map(|i| if i % 2 == 0 { -1.2 } else { 1.0 }),
        );

        let init2 = DVector::from_iterator(
            self.n,
            (0..self.n).map(|i| if i % 2 == 0 { 6.39 } else { -0.221 }),
        );

        vec![init1, init2]
    }

    fn optima(&self) -> Vec<OVector<f64, Dyn>> {
        vec![DVector::from_element(self.n, 1.0)]
    }
}

/// [Sphere
/// function](https://en.wikipedia.org/wiki/Test_functions_for_optimization)
/// \[1\].
///
/// This is a simple paraboloid which can be used in early development and
/// sanity checking as it can be considered a trivial problem.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    n: usize,
}

impl Sphere {
    /// Initializes the function with given dimension.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be greater than zero");
        Self { n }
    }
}

impl Default for Sphere {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Problem for Sphere {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.n)
    }
}

impl Function for Sphere {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        Ok(x.norm_squared())
    }
}

impl TestFunction for Sphere {
    fn initials(&self) -> Vec<OVector<f64, Dyn>> {
        let init = DVector::from_iterator(
            self.n,
            (0..self.n).map(|i| if i % 2 == 0 { 10.0 } else { -10.0 }),
        );

        vec![init]
    }

    fn optima(&self) -> Vec<OVector<f64, Dyn>> {
        vec![DVector::zeros(self.n)]
    }
}

/// Convex quadratic function `1/2 x^T A x - b^T x` with symmetric positive
/// definite matrix `A`.
///
/// The function provides analytic gradient `A x - b`.
#[derive(Debug, Clone)]
pub struct Quadratic {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl Quadratic {
    /// Initializes the function with given matrix and vector.
    ///
    /// The matrix **must** be symmetric positive definite.
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Self {
        assert!(a.is_square(), "matrix must be square");
        assert_eq!(a.nrows(), b.nrows(), "dimensions must match");
        Self { a, b }
    }

    /// The unique minimizer `A^-1 b`.
    pub fn minimizer(&self) -> DVector<f64> {
        match self.a.clone().cholesky() {
            Some(chol) => chol.solve(&self.b),
            None => panic!("matrix is not positive definite"),
        }
    }

    /// The minimum value `-1/2 b^T A^-1 b`.
    pub fn minimum(&self) -> f64 {
        -0.5 * self.b.dot(&self.minimizer())
    }
}

impl Problem for Quadratic {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.b.nrows())
    }
}

impl Function for Quadratic {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        Ok(0.5 * x.dot(&(&self.a * x)) - self.b.dot(x))
    }

    fn gradient<Sx, Sg>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        grad: &mut Vector<Self::Field, Dyn, Sg>,
    ) -> Result<bool, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sg: StorageMut<Self::Field, Dyn>,
    {
        grad.copy_from(&(&self.a * x - &self.b));
        Ok(true)
    }
}

impl TestFunction for Quadratic {
    fn initials(&self) -> Vec<OVector<f64, Dyn>> {
        let n = self.b.nrows();
        vec![DVector::zeros(n), DVector::from_element(n, 10.0)]
    }

    fn optima(&self) -> Vec<OVector<f64, Dyn>> {
        vec![self.minimizer()]
    }
}

/// Optimization error of the testing optimizer driver (see [`optimize`]).
#[derive(Debug, Error)]
pub enum TestingError<E: StdError + 'static> {
    /// Error of the optimizer used.
    #[error("{0}")]
    Inner(#[from] E),
    /// Optimizer did not terminate.
    #[error("optimizer did not terminate")]
    Termination,
}

/// A simple optimizer driver that can be used in tests.
///
/// Stops when the function value is within `tolerance` from `min` or when the
/// optimizer cannot continue.
pub fn optimize<F: Function, O: Optimizer<F>>(
    f: &F,
    dom: &Domain<F::Field>,
    mut optimizer: O,
    mut x: OVector<F::Field, Dyn>,
    min: F::Field,
    max_iters: usize,
    tolerance: F::Field,
) -> Result<OVector<F::Field, Dyn>, TestingError<O::Error>>
where
    O::Error: StdError,
{
    let mut iter = 0;

    loop {
        let step = optimizer.opt_next(f, dom, &mut x)?;

        if step.fx <= min + tolerance {
            // Converged.
            return Ok(x);
        }

        if step.status != StepStatus::Accepted {
            debug!("{} finished with {:?}", O::NAME, step.status);
            return Ok(x);
        }

        if iter == max_iters {
            return Err(TestingError::Termination);
        } else {
            iter += 1;
        }
    }
}
