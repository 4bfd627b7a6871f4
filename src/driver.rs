//! High-level API for optimization.
//!
//! This module contains the driver that encapsulates all internal state and
//! provides a simple API to run the iterative process of minimization.
//!
//! The simplest way of using the driver is to initialize it with the defaults:
//!
//! ```rust
//! use estima::OptimizerDriver;
//! # use estima::nalgebra as na;
//! # use estima::{Domain, Function, Problem, ProblemError};
//! # use na::{storage::Storage, Dyn, IsContiguous, Vector};
//! #
//! # struct MyFunction;
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyFunction {
//! #     fn apply<Sx>(&self, x: &Vector<f64, Dyn, Sx>) -> Result<f64, ProblemError>
//! #     where
//! #         Sx: Storage<f64, Dyn> + IsContiguous,
//! #     {
//! #         Ok((x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2))
//! #     }
//! # }
//!
//! let f = MyFunction;
//!
//! let mut optimizer = OptimizerDriver::new(&f).expect("valid domain");
//! ```
//!
//! If you need to specify additional settings, use the builder:
//!
//! ```rust
//! use estima::OptimizerDriver;
//! use estima::algo::Lbfgsb;
//! # use estima::nalgebra as na;
//! # use estima::{Domain, Function, Problem, ProblemError};
//! # use na::{storage::Storage, Dyn, IsContiguous, Vector};
//! #
//! # struct MyFunction;
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyFunction {
//! #     fn apply<Sx>(&self, x: &Vector<f64, Dyn, Sx>) -> Result<f64, ProblemError>
//! #     where
//! #         Sx: Storage<f64, Dyn> + IsContiguous,
//! #     {
//! #         Ok((x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2))
//! #     }
//! # }
//!
//! let f = MyFunction;
//!
//! let mut optimizer = OptimizerDriver::builder(&f)
//!     .with_initial(vec![10.0, -10.0])
//!     .with_domain(Domain::unconstrained(2).with_lower(1, 0.0))
//!     .with_algo(Lbfgsb::new)
//!     .with_tolerance(1e-10)
//!     .with_max_iters(200)
//!     .with_trace(true)
//!     .build()
//!     .expect("valid input");
//!
//! let minimum = optimizer.minimize().expect("no optimizer error");
//!
//! assert!(minimum.converged);
//! assert!((minimum.x[0] - 1.0).abs() < 1e-4);
//! assert!(minimum.x[1].abs() < 1e-4);
//! ```
//!
//! For fine-grained control, the iterations can be also driven manually with
//! [`OptimizerDriver::next`] or [`OptimizerDriver::find`] with a custom
//! stopping criterion.

use log::debug;
use nalgebra::{convert, ComplexField, Dyn, OVector, U1};
use thiserror::Error;

use crate::{
    algo::{Lbfgsb, LbfgsbError},
    analysis::relative_change,
    core::{Domain, DomainError, Function, Optimizer, Problem, Step, StepStatus},
};

/// Error returned when the driver cannot be built from given input.
#[derive(Debug, Error, PartialEq)]
pub enum DriverError {
    /// The bounds are malformed.
    #[error("{0}")]
    InvalidDomain(#[from] DomainError),
    /// The initial point does not match the dimension of the domain.
    #[error("initial point has dimension {actual}, but the problem has dimension {expected}")]
    DimensionMismatch {
        /// Dimension of the domain.
        expected: usize,
        /// Dimension of the initial point.
        actual: usize,
    },
    /// The initial point contains NaN or infinity.
    #[error("initial value of variable {index} is not finite")]
    NonFiniteInitial {
        /// Index of the variable.
        index: usize,
    },
}

/// Error returned from [`minimize`].
#[derive(Debug, Error)]
pub enum MinimizeError {
    /// Invalid input.
    #[error("{0}")]
    Driver(#[from] DriverError),
    /// Unrecoverable error of the optimizer, such as an error of the function.
    #[error("{0}")]
    Optimizer(#[from] LbfgsbError),
}

/// Reason why the minimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The optimizer found a stationary point.
    Stationary,
    /// The relative change of the function value dropped below the tolerance.
    Tolerance,
    /// The maximum number of iterations was reached.
    MaxIters,
    /// The optimizer could not make progress.
    Stalled,
}

impl Termination {
    /// Determines whether the termination reason means convergence.
    pub fn is_converged(&self) -> bool {
        matches!(self, Termination::Stationary | Termination::Tolerance)
    }
}

/// A single record of the optimization trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry<T> {
    /// Iteration index, starting from one.
    pub iter: usize,
    /// The point after the iteration.
    pub x: Vec<T>,
    /// The function value in the point.
    pub fx: T,
}

/// Result of the minimization.
///
/// Reaching the maximum number of iterations is not an error. Check
/// [`converged`](Minimum::converged) or [`termination`](Minimum::termination)
/// to distinguish it from convergence.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum<T> {
    /// The best point found.
    pub x: Vec<T>,
    /// The function value in the point.
    pub fx: T,
    /// Whether the stopping criterion was met.
    pub converged: bool,
    /// Number of performed iterations.
    pub iters: usize,
    /// Reason of the termination.
    pub termination: Termination,
    /// The optimization trace, if it was requested.
    pub trace: Option<Vec<TraceEntry<T>>>,
}

type AlgoFactory<'a, F, A> = Box<dyn FnOnce(&F, &Domain<<F as Problem>::Field>) -> A + 'a>;

/// Builder for the [`OptimizerDriver`].
pub struct OptimizerBuilder<'a, F: Problem, A> {
    f: &'a F,
    dom: Domain<F::Field>,
    factory: AlgoFactory<'a, F, A>,
    x0: Vec<F::Field>,
    tolerance: F::Field,
    max_iters: usize,
    trace: bool,
}

impl<'a, F: Problem + 'a> OptimizerBuilder<'a, F, Lbfgsb<F>> {
    fn new(f: &'a F) -> Self {
        let dom = f.domain();
        let x0 = vec![convert(0.0); dom.dim()];

        Self {
            f,
            dom,
            factory: Box::new(Lbfgsb::new),
            x0,
            tolerance: convert(1e-8),
            max_iters: 1000,
            trace: false,
        }
    }
}

impl<'a, F: Problem, A> OptimizerBuilder<'a, F, A> {
    /// Sets the initial point from which the iterative process starts.
    ///
    /// A point outside the bounds is projected into the domain.
    pub fn with_initial(mut self, x0: Vec<F::Field>) -> Self {
        self.x0 = x0;
        self
    }

    /// Overrides the domain given by the problem.
    pub fn with_domain(mut self, dom: Domain<F::Field>) -> Self {
        self.dom = dom;
        self
    }

    /// Sets specific algorithm to be used.
    ///
    /// This builder method accepts a closure that takes the reference to the
    /// problem and its domain. For algorithms in estima, you can simply pass
    /// the `new` constructor directly (e.g., `Lbfgsb::new`).
    pub fn with_algo<A2, FA>(self, factory: FA) -> OptimizerBuilder<'a, F, A2>
    where
        FA: FnOnce(&F, &Domain<F::Field>) -> A2 + 'a,
    {
        OptimizerBuilder {
            f: self.f,
            dom: self.dom,
            factory: Box::new(factory),
            x0: self.x0,
            tolerance: self.tolerance,
            max_iters: self.max_iters,
            trace: self.trace,
        }
    }

    /// Sets the tolerance for the relative change of the function value.
    /// Default: `1e-8`.
    pub fn with_tolerance(mut self, tolerance: F::Field) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the maximum number of iterations. Default: `1000`.
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Enables or disables recording of the optimization trace. Default:
    /// disabled.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Validates the input and builds the [`OptimizerDriver`].
    pub fn build(self) -> Result<OptimizerDriver<'a, F, A>, DriverError> {
        let Self {
            f,
            dom,
            factory,
            x0,
            tolerance,
            max_iters,
            trace,
        } = self;

        dom.validate()?;

        if x0.len() != dom.dim() {
            return Err(DriverError::DimensionMismatch {
                expected: dom.dim(),
                actual: x0.len(),
            });
        }

        if let Some(index) = x0.iter().position(|xi| !xi.is_finite()) {
            return Err(DriverError::NonFiniteInitial { index });
        }

        let mut x = OVector::from_vec_generic(Dyn(dom.dim()), U1, x0);
        if dom.project(&mut x) {
            debug!("initial point is outside the bounds, clamped");
        }

        let algo = factory(f, &dom);

        Ok(OptimizerDriver {
            f,
            dom,
            algo,
            x,
            fx: convert(f64::INFINITY),
            iter: 0,
            tolerance,
            max_iters,
            trace: if trace { Some(Vec::new()) } else { None },
        })
    }
}

/// The driver for the process of minimizing a function.
///
/// For default settings, use [`OptimizerDriver::new`]. For more flexibility,
/// use [`OptimizerDriver::builder`]. For the usage of the driver, see
/// [module](self) documentation.
pub struct OptimizerDriver<'a, F: Problem, A> {
    f: &'a F,
    dom: Domain<F::Field>,
    algo: A,
    x: OVector<F::Field, Dyn>,
    fx: F::Field,
    iter: usize,
    tolerance: F::Field,
    max_iters: usize,
    trace: Option<Vec<TraceEntry<F::Field>>>,
}

impl<'a, F: Problem + 'a> OptimizerDriver<'a, F, Lbfgsb<F>> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(f: &'a F) -> OptimizerBuilder<'a, F, Lbfgsb<F>> {
        OptimizerBuilder::new(f)
    }

    /// Initializes the driver with the default settings.
    pub fn new(f: &'a F) -> Result<Self, DriverError> {
        OptimizerDriver::builder(f).build()
    }
}

impl<'a, F: Problem, A> OptimizerDriver<'a, F, A> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[F::Field] {
        self.x.as_slice()
    }

    /// Returns the current function value. It is infinity before the first
    /// iteration.
    pub fn fx(&self) -> F::Field {
        self.fx
    }

    /// Returns the number of performed iterations.
    pub fn iter(&self) -> usize {
        self.iter
    }

    /// Returns the domain used by the driver.
    pub fn domain(&self) -> &Domain<F::Field> {
        &self.dom
    }

    /// Returns the trace recorded so far, if it was requested.
    pub fn trace(&self) -> Option<&[TraceEntry<F::Field>]> {
        self.trace.as_deref()
    }
}

impl<'a, F: Function, A: Optimizer<F>> OptimizerDriver<'a, F, A> {
    /// Does one iteration of the process, returning the point and the step in
    /// case of no error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<(&[F::Field], Step<F::Field>), A::Error> {
        let step = self.algo.opt_next(self.f, &self.dom, &mut self.x)?;

        self.iter += 1;
        self.fx = step.fx;

        debug!(
            "{} iter = {}\tfx = {}\tstatus = {:?}",
            A::NAME,
            self.iter,
            step.fx,
            step.status
        );

        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceEntry {
                iter: self.iter,
                x: self.x.as_slice().to_vec(),
                fx: step.fx,
            });
        }

        Ok((self.x.as_slice(), step))
    }

    /// Runs the iterative process until given stopping criterion is satisfied.
    pub fn find<C>(&mut self, stop: C) -> Result<(&[F::Field], F::Field), A::Error>
    where
        C: Fn(OptimizerIterState<'_, F>) -> bool,
    {
        loop {
            let status = self.next()?.1.status;

            let state = OptimizerIterState {
                x: &self.x,
                fx: self.fx,
                status,
                iter: self.iter,
            };

            if stop(state) {
                return Ok((self.x.as_slice(), self.fx));
            }
        }
    }

    /// Runs the iterative process until convergence, stall or the maximum
    /// number of iterations.
    ///
    /// The process is considered converged if the optimizer reports a
    /// stationary point or if the relative change of the function value
    /// between two accepted steps is within the tolerance.
    pub fn minimize(&mut self) -> Result<Minimum<F::Field>, A::Error> {
        let mut fx_prev = None;

        let termination = loop {
            if self.iter >= self.max_iters {
                break Termination::MaxIters;
            }

            let step = self.next()?.1;

            match step.status {
                StepStatus::Stationary => break Termination::Stationary,
                StepStatus::Stalled => break Termination::Stalled,
                StepStatus::Accepted => {
                    if let Some(prev) = fx_prev {
                        if relative_change(prev, step.fx) <= self.tolerance {
                            break Termination::Tolerance;
                        }
                    }

                    fx_prev = Some(step.fx);
                }
            }
        };

        debug!(
            "{} finished after {} iterations: {:?}",
            A::NAME,
            self.iter,
            termination
        );

        Ok(Minimum {
            x: self.x.as_slice().to_vec(),
            fx: self.fx,
            converged: termination.is_converged(),
            iters: self.iter,
            termination,
            trace: self.trace.clone(),
        })
    }

    /// Returns the name of the used optimizer.
    pub fn name(&self) -> &str {
        A::NAME
    }
}

/// State of the current iteration.
pub struct OptimizerIterState<'a, F: Problem> {
    x: &'a OVector<F::Field, Dyn>,
    fx: F::Field,
    status: StepStatus,
    iter: usize,
}

impl<'a, F: Problem> OptimizerIterState<'a, F> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[F::Field] {
        self.x.as_slice()
    }

    /// Returns the current function value.
    pub fn fx(&self) -> F::Field {
        self.fx
    }

    /// Returns the status of the last step.
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Returns the current iteration number, starting from one.
    pub fn iter(&self) -> usize {
        self.iter
    }
}

/// Minimizes the function from given initial point with the default
/// [L-BFGS-B](crate::algo::lbfgsb) optimizer.
///
/// The bounds are taken from the [domain](Problem::domain) of the function.
/// Use [`OptimizerDriver::builder`] for more control.
pub fn minimize<F: Function>(
    f: &F,
    x0: Vec<F::Field>,
    tolerance: F::Field,
    max_iters: usize,
    trace: bool,
) -> Result<Minimum<F::Field>, MinimizeError> {
    let mut driver = OptimizerDriver::builder(f)
        .with_initial(x0)
        .with_tolerance(tolerance)
        .with_max_iters(max_iters)
        .with_trace(trace)
        .build()?;

    Ok(driver.minimize()?)
}
