//! Bounded limited-memory quasi-Newton optimization method.
//!
//! [L-BFGS](https://en.wikipedia.org/wiki/Limited-memory_BFGS) approximates
//! the inverse Hessian matrix from a short history of steps and gradient
//! changes, which makes it the method of choice for smooth objective functions
//! such as negative log-likelihoods. This implementation handles box
//! constraints by the projection approach: variables that sit on a bound with
//! the gradient pointing outside the domain are fixed for the iteration, the
//! quasi-Newton direction is computed for the remaining free variables and the
//! line search is performed along the projected path.
//!
//! Points in which the function is not finite (NaN or infinity) are treated as
//! infeasible. The line search backtracks from them as from any other
//! unacceptable point. When no acceptable point is found within the
//! backtracking budget, the history is discarded and one more attempt is made
//! with the steepest descent direction. If that fails too, the step is
//! reported as [stalled](StepStatus::Stalled).
//!
//! # References
//!
//! \[1\] [Numerical
//! Optimization](https://link.springer.com/book/10.1007/978-0-387-40065-5)
//!
//! \[2\] [A Limited Memory Algorithm for Bound Constrained
//! Optimization](https://epubs.siam.org/doi/10.1137/0916069)
//!
//! \[3\] [Projected Newton Methods for Optimization Problems with Simple
//! Constraints](https://epubs.siam.org/doi/10.1137/0320018)

use std::collections::VecDeque;

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{
    convert, storage::StorageMut, ComplexField, Dyn, IsContiguous, OVector, RealField as _, Vector,
    U1,
};
use num_traits::{One, Zero};
use thiserror::Error;

use crate::{
    core::{Domain, Function, Optimizer, Problem, ProblemError, RealField as _, Step},
    derivatives::{Difference, Gradient, GradientError},
};

/// Options for [`Lbfgsb`] optimizer.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct LbfgsbOptions<P: Problem> {
    /// Number of correction pairs kept for the inverse Hessian approximation.
    /// Default: `10`.
    memory: usize,
    /// Sufficient decrease constant of the Armijo condition. Default: `1e-4`.
    c1: P::Field,
    /// Factor by which the step length is shrunk on rejection. Default: `0.5`.
    backtrack_factor: P::Field,
    /// Number of step length reductions in a single line search before giving
    /// up. Default: `40`.
    max_backtracks: usize,
    /// Tolerance for the infinity norm of the projected gradient. If it is
    /// reached, the point is considered stationary. Default: `1e-6`.
    gtol: P::Field,
    /// Relative threshold for the curvature condition. Correction pairs with
    /// `s^T y <= curvature_eps * y^T y` are skipped to keep the approximation
    /// positive definite. Default: `sqrt(EPSILON)`.
    curvature_eps: P::Field,
    /// Finite difference rule used when the function does not provide
    /// analytic gradient. Default: central.
    diff: Difference,
}

impl<P: Problem> Default for LbfgsbOptions<P> {
    fn default() -> Self {
        Self {
            memory: 10,
            c1: convert(1e-4),
            backtrack_factor: convert(0.5),
            max_backtracks: 40,
            gtol: convert(1e-6),
            curvature_eps: P::Field::EPSILON_SQRT,
            diff: Difference::default(),
        }
    }
}

/// Error returned from [`Lbfgsb`] optimizer.
#[derive(Debug, Error)]
pub enum LbfgsbError {
    /// Error that occurred when evaluating the function.
    #[error("{0}")]
    Problem(#[from] ProblemError),
    /// Error that occurred when computing the gradient.
    #[error("{0}")]
    Gradient(#[from] GradientError),
    /// The function is not finite in the initial point, there is no reference
    /// value to improve on.
    #[error("function is not finite in the initial point")]
    InfeasibleStart,
}

/// Bounded L-BFGS optimizer.
///
/// See [module](self) documentation for more details.
pub struct Lbfgsb<P: Problem> {
    options: LbfgsbOptions<P>,
    fx: Option<P::Field>,
    grad: Gradient<P>,
    grad_trial: Gradient<P>,
    s_hist: VecDeque<OVector<P::Field, Dyn>>,
    y_hist: VecDeque<OVector<P::Field, Dyn>>,
    rho_hist: VecDeque<P::Field>,
    alphas: Vec<P::Field>,
    fixed: Vec<bool>,
    dir: OVector<P::Field, Dyn>,
    x_trial: OVector<P::Field, Dyn>,
    p: OVector<P::Field, Dyn>,
    iter: usize,
}

impl<P: Problem> Lbfgsb<P> {
    /// Initializes L-BFGS-B optimizer with default options.
    pub fn new(p: &P, dom: &Domain<P::Field>) -> Self {
        Self::with_options(p, dom, LbfgsbOptions::default())
    }

    /// Initializes L-BFGS-B optimizer with given options.
    pub fn with_options(_: &P, dom: &Domain<P::Field>, options: LbfgsbOptions<P>) -> Self {
        let dim = Dyn(dom.dim());
        let memory = options.memory.max(1);

        Self {
            options,
            fx: None,
            grad: Gradient::zeros(dom.dim()),
            grad_trial: Gradient::zeros(dom.dim()),
            s_hist: VecDeque::with_capacity(memory),
            y_hist: VecDeque::with_capacity(memory),
            rho_hist: VecDeque::with_capacity(memory),
            alphas: Vec::with_capacity(memory),
            fixed: vec![false; dom.dim()],
            dir: OVector::zeros_generic(dim, U1),
            x_trial: OVector::zeros_generic(dim, U1),
            p: OVector::zeros_generic(dim, U1),
            iter: 0,
        }
    }

    /// Resets the internal state of the optimizer.
    ///
    /// Must be called if the point is changed by other means than the
    /// optimizer between two iterations.
    pub fn reset(&mut self) {
        self.fx = None;
        self.clear_history();
        self.iter = 0;
    }

    /// Returns the number of correction pairs currently stored.
    pub fn history_len(&self) -> usize {
        self.s_hist.len()
    }

    fn clear_history(&mut self) {
        self.s_hist.clear();
        self.y_hist.clear();
        self.rho_hist.clear();
    }
}

impl<F: Function> Lbfgsb<F> {
    /// Marks the variables that are held by their bounds and returns the
    /// infinity norm of the projected gradient.
    fn active_set<Sx>(&mut self, dom: &Domain<F::Field>, x: &Vector<F::Field, Dyn, Sx>) -> F::Field
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let zero = F::Field::zero();
        let mut norm = zero;

        for i in 0..dom.dim() {
            let (li, ui) = (dom.lower()[i], dom.upper()[i]);
            let (xi, gi) = (x[i], self.grad[i]);

            self.fixed[i] = li == ui || (xi <= li && gi > zero) || (xi >= ui && gi < zero);

            // Projected gradient component: P(x - g) - x.
            let pgi = (xi - gi).max(li).min(ui) - xi;
            norm = norm.max(pgi.abs());
        }

        norm
    }

    /// Computes the quasi-Newton direction by the two-loop recursion over the
    /// free variables. Returns `false` if the result is not a descent
    /// direction.
    fn direction(&mut self) -> bool {
        let zero = F::Field::zero();
        let one = F::Field::one();
        let Self {
            grad,
            s_hist,
            y_hist,
            rho_hist,
            alphas,
            fixed,
            dir,
            ..
        } = self;

        // q = projected gradient.
        for (i, di) in dir.iter_mut().enumerate() {
            *di = if fixed[i] { zero } else { grad[i] };
        }

        alphas.clear();
        for ((s, y), rho) in s_hist.iter().zip(y_hist.iter()).zip(rho_hist.iter()).rev() {
            let alpha = *rho * s.dot(&*dir);
            dir.axpy(-alpha, y, one);
            alphas.push(alpha);
        }

        // Initial inverse Hessian approximation gamma * I. Without history, the
        // first step has unit length.
        let gamma = match (s_hist.back(), y_hist.back()) {
            (Some(s), Some(y)) => s.dot(y) / y.dot(y),
            _ => {
                let norm = dir.norm();
                if norm > zero {
                    one / norm
                } else {
                    one
                }
            }
        };
        *dir *= gamma;

        for (((s, y), rho), alpha) in s_hist
            .iter()
            .zip(y_hist.iter())
            .zip(rho_hist.iter())
            .zip(alphas.iter().rev())
        {
            let beta = *rho * y.dot(&*dir);
            dir.axpy(*alpha - beta, s, one);
        }

        dir.neg_mut();
        for (i, di) in dir.iter_mut().enumerate() {
            if fixed[i] {
                *di = zero;
            }
        }

        let slope = grad.dot(&*dir);
        slope < zero
    }

    /// Sets the direction to the (normalized) projected steepest descent.
    fn steepest_descent(&mut self) {
        let zero = F::Field::zero();

        for (i, di) in self.dir.iter_mut().enumerate() {
            *di = if self.fixed[i] { zero } else { -self.grad[i] };
        }

        let norm = self.dir.norm();
        if norm > zero {
            self.dir /= norm;
        }
    }

    /// Backtracking line search along the projected path. On success, the
    /// accepted point is in `x_trial` and its function value is returned.
    fn line_search<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &Vector<F::Field, Dyn, Sx>,
        fx: F::Field,
    ) -> Result<Option<F::Field>, LbfgsbError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let LbfgsbOptions {
            c1,
            backtrack_factor,
            max_backtracks,
            ..
        } = self.options;

        let zero = F::Field::zero();
        let mut alpha = F::Field::one();

        for _ in 0..max_backtracks {
            for i in 0..dom.dim() {
                self.x_trial[i] = x[i] + alpha * self.dir[i];
            }
            dom.project(&mut self.x_trial);

            // Compute the actual step after the projection.
            self.x_trial.sub_to(x, &mut self.p);

            if self.p.iter().all(|pi| *pi == zero) {
                debug!("step vanished after projection (alpha = {})", alpha);
                return Ok(None);
            }

            let fx_trial = f.apply(&self.x_trial)?;

            if !fx_trial.is_finite() {
                debug!("trial point is infeasible, alpha = {}", alpha);
                alpha *= backtrack_factor;
                continue;
            }

            let slope = self.grad.dot(&self.p);
            if fx_trial <= fx + c1 * slope {
                debug!("step accepted, fx = {}, alpha = {}", fx_trial, alpha);
                return Ok(Some(fx_trial));
            }

            alpha *= backtrack_factor;
        }

        debug!(
            "line search reached the backtracking limit ({})",
            max_backtracks
        );
        Ok(None)
    }
}

impl<F: Function> Optimizer<F> for Lbfgsb<F> {
    const NAME: &'static str = "L-BFGS-B";

    type Error = LbfgsbError;

    fn opt_next<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
    ) -> Result<Step<F::Field>, Self::Error>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let LbfgsbOptions {
            memory,
            gtol,
            curvature_eps,
            diff,
            ..
        } = self.options;

        let fx = match self.fx {
            Some(fx) => fx,
            None => {
                let fx = f.apply(x)?;
                if !fx.is_finite() {
                    return Err(LbfgsbError::InfeasibleStart);
                }

                self.grad.compute(f, dom, x, fx, diff)?;
                self.fx = Some(fx);
                fx
            }
        };

        self.iter += 1;

        let pg_norm = self.active_set(dom, x);
        if pg_norm <= gtol {
            debug!("projected gradient norm {} within tolerance", pg_norm);
            return Ok(Step::stationary(fx));
        }

        if !self.direction() {
            debug!("quasi-Newton direction is not a descent direction, resetting history");
            self.clear_history();
            self.steepest_descent();
        }

        let mut fx_trial = self.line_search(f, dom, x, fx)?;

        if fx_trial.is_none() && !self.s_hist.is_empty() {
            debug!("retrying with steepest descent");
            self.clear_history();
            self.steepest_descent();
            fx_trial = self.line_search(f, dom, x, fx)?;
        }

        let fx_trial = match fx_trial {
            Some(fx_trial) => fx_trial,
            None => return Ok(Step::stalled(fx)),
        };

        self.grad_trial
            .compute(f, dom, &mut self.x_trial, fx_trial, diff)?;

        // Correction pair s = x' - x (already in p), y = g' - g.
        let s = self.p.clone_owned();
        let y = &*self.grad_trial - &*self.grad;
        let sy = s.dot(&y);
        let yy = y.dot(&y);

        if sy > curvature_eps * yy && sy > F::Field::zero() {
            if self.s_hist.len() >= memory.max(1) {
                self.s_hist.pop_front();
                self.y_hist.pop_front();
                self.rho_hist.pop_front();
            }

            self.rho_hist.push_back(F::Field::one() / sy);
            self.s_hist.push_back(s);
            self.y_hist.push_back(y);
        } else {
            debug!("curvature condition violated (s^T y = {}), skipping update", sy);
        }

        x.copy_from(&self.x_trial);
        std::mem::swap(&mut self.grad, &mut self.grad_trial);
        self.fx = Some(fx_trial);

        Ok(Step::accepted(fx_trial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::{dvector, storage::Storage, DVector};

    use crate::core::StepStatus;
    use crate::testing::*;

    #[test]
    fn sphere() {
        let n = 2;

        let f = Sphere::new(n);
        let dom = f.domain();
        let eps = convert(1e-12);

        for x in f.initials() {
            let optimizer = Lbfgsb::new(&f, &dom);
            let x = optimize(&f, &dom, optimizer, x, convert(0.0), 25, eps).unwrap();
            assert!(f.is_optimum(&x, 1e-6));
        }
    }

    #[test]
    fn rosenbrock() {
        let n = 2;

        let f = ExtendedRosenbrock::new(n);
        let dom = f.domain();
        let eps = convert(1e-10);

        for x in f.initials() {
            let optimizer = Lbfgsb::new(&f, &dom);
            let x = optimize(&f, &dom, optimizer, x, convert(0.0), 500, eps).unwrap();
            assert!(f.is_optimum(&x, 1e-3));
        }
    }

    #[test]
    fn convex_quadratic() {
        let f = Quadratic::new(
            nalgebra::dmatrix![4.0, 1.0, 0.0; 1.0, 3.0, 0.5; 0.0, 0.5, 2.0],
            dvector![1.0, -2.0, 3.0],
        );
        let dom = f.domain();
        let eps = convert(1e-12);

        for x in f.initials() {
            let optimizer = Lbfgsb::new(&f, &dom);
            let x = optimize(&f, &dom, optimizer, x, f.minimum(), 100, eps).unwrap();
            assert_abs_diff_eq!(x, f.minimizer(), epsilon = 1e-5);
        }
    }

    #[test]
    fn minimum_on_the_bound() {
        // Unconstrained minimum is at (0, 0), but the first variable is bounded
        // from below by one.
        let f = Sphere::new(2);
        let dom = Domain::rect(vec![1.0, -10.0], vec![10.0, 10.0]);

        let mut optimizer = Lbfgsb::new(&f, &dom);
        let mut x = dvector![5.0, 5.0];

        let mut status = StepStatus::Accepted;
        for _ in 0..50 {
            status = optimizer.opt_next(&f, &dom, &mut x).unwrap().status;
            if status != StepStatus::Accepted {
                break;
            }
        }

        assert_eq!(status, StepStatus::Stationary);
        assert_abs_diff_eq!(x, dvector![1.0, 0.0], epsilon = 1e-6);
    }

    #[test]
    fn already_optimal() {
        let f = Sphere::new(3);
        let dom = f.domain();

        let mut optimizer = Lbfgsb::new(&f, &dom);
        let mut x = DVector::zeros(3);

        let step = optimizer.opt_next(&f, &dom, &mut x).unwrap();
        assert_eq!(step.status, StepStatus::Stationary);
        assert_eq!(step.fx, 0.0);
    }

    // Paraboloid with minimum at 2 that is undefined for x < 1, but the
    // domain does not say so.
    struct HiddenBarrier;

    impl Problem for HiddenBarrier {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            Domain::unconstrained(1)
        }
    }

    impl Function for HiddenBarrier {
        fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
        where
            Sx: Storage<Self::Field, Dyn> + IsContiguous,
        {
            if x[0] < 1.0 {
                Ok(f64::NAN)
            } else {
                Ok((x[0] - 2.0).powi(2) + (x[0] - 1.0).sqrt())
            }
        }
    }

    #[test]
    fn backtracks_from_non_finite_values() {
        let f = HiddenBarrier;
        let dom = f.domain();

        let mut optimizer = Lbfgsb::new(&f, &dom);
        let mut x = dvector![10.0];

        for _ in 0..100 {
            let step = optimizer.opt_next(&f, &dom, &mut x).unwrap();
            assert!(step.fx.is_finite());
            assert!(x[0] >= 1.0);

            if step.status != StepStatus::Accepted {
                break;
            }
        }

        // Stationary point of (x - 2)^2 + sqrt(x - 1) lies in (1, 2).
        assert!(x[0] > 1.0 && x[0] < 2.0);
    }

    #[test]
    fn infeasible_start() {
        let f = HiddenBarrier;
        let dom = f.domain();

        let mut optimizer = Lbfgsb::new(&f, &dom);
        let mut x = dvector![0.0];

        assert!(matches!(
            optimizer.opt_next(&f, &dom, &mut x),
            Err(LbfgsbError::InfeasibleStart)
        ));
    }

    struct Failing;

    impl Problem for Failing {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            Domain::unconstrained(1)
        }
    }

    impl Function for Failing {
        fn apply<Sx>(&self, _: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
        where
            Sx: Storage<Self::Field, Dyn> + IsContiguous,
        {
            Err(ProblemError::InvalidData("no observations".to_string()))
        }
    }

    #[test]
    fn problem_error_is_propagated() {
        let f = Failing;
        let dom = f.domain();

        let mut optimizer = Lbfgsb::new(&f, &dom);
        let mut x = dvector![1.0];

        assert!(matches!(
            optimizer.opt_next(&f, &dom, &mut x),
            Err(LbfgsbError::Problem(ProblemError::InvalidData(_)))
        ));
    }

    #[test]
    fn history_is_bounded() {
        let f = ExtendedRosenbrock::new(4);
        let dom = f.domain();

        let mut options = LbfgsbOptions::default();
        options.set_memory(3);

        let mut optimizer = Lbfgsb::with_options(&f, &dom, options);
        let mut x = f.initials().remove(0);

        for _ in 0..20 {
            optimizer.opt_next(&f, &dom, &mut x).unwrap();
            assert!(optimizer.history_len() <= 3);
        }
    }
}
