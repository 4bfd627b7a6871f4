//! Online (streaming) gradient updates.
//!
//! An [`OnlineLearner`] processes one observation at a time and updates its
//! parameter estimate by a first-order [rule](UpdateRule). The rule keeps its
//! own per-parameter state (accumulated squared gradients, moment estimates).
//! Observations are processed strictly in the order they arrive, so a
//! different order gives a different estimate.
//!
//! Available rules:
//!
//! * [`Plain`] -- fixed step along the negative gradient.
//! * [`Adagrad`] -- step scaled by the root of the sum of squared gradients.
//! * [`RmsProp`] -- step scaled by the root of the exponentially decayed
//!   average of squared gradients.
//! * [`Adam`] -- exponentially decayed first and second moments with bias
//!   correction.
//! * [`Nadam`] -- Adam with Nesterov momentum.
//!
//! The rule is chosen by the [`Rule`] configuration, which is resolved once
//! into a concrete rule object:
//!
//! ```rust
//! use estima::online::{LeastSquaresGradient, Observation, OnlineLearner, Rule};
//!
//! let mut learner = OnlineLearner::new(vec![0.0, 0.0], Rule::adam(0.05)).expect("valid rule");
//!
//! for i in 0..2000 {
//!     let x = (i % 10) as f64 / 10.0;
//!     let features = [1.0, x];
//!     let observation = Observation::new(&features, 1.0 + 2.0 * x);
//!     learner
//!         .update_with(&LeastSquaresGradient, &observation)
//!         .expect("valid gradient");
//! }
//!
//! assert!((learner.params()[0] - 1.0).abs() < 0.1);
//! assert!((learner.params()[1] - 2.0).abs() < 0.1);
//! ```
//!
//! # References
//!
//! \[1\] [Adaptive Subgradient Methods for Online Learning and Stochastic
//! Optimization](https://jmlr.org/papers/v12/duchi11a.html)
//!
//! \[2\] [Adam: A Method for Stochastic
//! Optimization](https://arxiv.org/abs/1412.6980)
//!
//! \[3\] [Incorporating Nesterov Momentum into
//! Adam](https://openreview.net/forum?id=OM0jvwB8jIp57ZJjtNEZ)

use getset::CopyGetters;
use log::debug;
use nalgebra::{convert, RealField};
use thiserror::Error;

/// Error of the online update.
#[derive(Debug, Error, PartialEq)]
pub enum OnlineError {
    /// The gradient has a different length than the parameters.
    #[error("gradient has dimension {actual}, parameters have dimension {expected}")]
    DimensionMismatch {
        /// Number of parameters.
        expected: usize,
        /// Length of the gradient.
        actual: usize,
    },
    /// The gradient contains NaN or infinity.
    #[error("gradient component {index} is not finite")]
    NonFiniteGradient {
        /// Index of the component.
        index: usize,
    },
    /// The rule parameters are invalid.
    #[error("invalid rule parameters: {0}")]
    InvalidRule(String),
}

/// Interface of an online update rule.
pub trait UpdateRule<T> {
    /// Name of the rule.
    fn name(&self) -> &'static str;

    /// Updates the parameters `x` given the gradient `g` of the `t`-th
    /// observation. The count `t` starts from one.
    fn step(&mut self, t: usize, x: &mut [T], g: &[T]);
}

impl<T, R: UpdateRule<T> + ?Sized> UpdateRule<T> for Box<R> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn step(&mut self, t: usize, x: &mut [T], g: &[T]) {
        (**self).step(t, x, g)
    }
}

/// Plain gradient step `x -= stepsize * g`.
#[derive(Debug, Clone, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Plain<T: RealField + Copy> {
    /// Step size.
    stepsize: T,
}

impl<T: RealField + Copy> Plain<T> {
    /// Initializes the rule with given step size.
    pub fn new(stepsize: T) -> Self {
        Self { stepsize }
    }
}

impl<T: RealField + Copy> UpdateRule<T> for Plain<T> {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn step(&mut self, _: usize, x: &mut [T], g: &[T]) {
        for (xi, gi) in x.iter_mut().zip(g) {
            *xi -= self.stepsize * *gi;
        }
    }
}

/// Adagrad rule.
#[derive(Debug, Clone, CopyGetters)]
pub struct Adagrad<T: RealField + Copy> {
    /// Step size.
    #[getset(get_copy = "pub")]
    stepsize: T,
    /// Smoothing constant added to the denominator.
    #[getset(get_copy = "pub")]
    eps: T,
    acc: Vec<T>,
}

impl<T: RealField + Copy> Adagrad<T> {
    /// Initializes the rule for `dim` parameters with given step size.
    pub fn new(dim: usize, stepsize: T) -> Self {
        Self {
            stepsize,
            eps: convert(1e-8),
            acc: vec![T::zero(); dim],
        }
    }

    /// Sets the smoothing constant. Default: `1e-8`.
    pub fn with_eps(mut self, eps: T) -> Self {
        self.eps = eps;
        self
    }
}

impl<T: RealField + Copy> UpdateRule<T> for Adagrad<T> {
    fn name(&self) -> &'static str {
        "adagrad"
    }

    fn step(&mut self, _: usize, x: &mut [T], g: &[T]) {
        for ((xi, gi), acc) in x.iter_mut().zip(g).zip(self.acc.iter_mut()) {
            *acc += *gi * *gi;
            *xi -= self.stepsize * *gi / (acc.sqrt() + self.eps);
        }
    }
}

/// RMSProp rule.
#[derive(Debug, Clone, CopyGetters)]
pub struct RmsProp<T: RealField + Copy> {
    /// Step size.
    #[getset(get_copy = "pub")]
    stepsize: T,
    /// Decay of the squared gradient average.
    #[getset(get_copy = "pub")]
    gamma: T,
    /// Smoothing constant added to the denominator.
    #[getset(get_copy = "pub")]
    eps: T,
    avg: Vec<T>,
}

impl<T: RealField + Copy> RmsProp<T> {
    /// Initializes the rule for `dim` parameters with given step size.
    pub fn new(dim: usize, stepsize: T) -> Self {
        Self {
            stepsize,
            gamma: convert(0.9),
            eps: convert(1e-8),
            avg: vec![T::zero(); dim],
        }
    }

    /// Sets the decay. Default: `0.9`.
    pub fn with_gamma(mut self, gamma: T) -> Self {
        self.gamma = gamma;
        self
    }

    /// Sets the smoothing constant. Default: `1e-8`.
    pub fn with_eps(mut self, eps: T) -> Self {
        self.eps = eps;
        self
    }
}

impl<T: RealField + Copy> UpdateRule<T> for RmsProp<T> {
    fn name(&self) -> &'static str {
        "rmsprop"
    }

    fn step(&mut self, _: usize, x: &mut [T], g: &[T]) {
        let one = T::one();

        for ((xi, gi), avg) in x.iter_mut().zip(g).zip(self.avg.iter_mut()) {
            *avg = self.gamma * *avg + (one - self.gamma) * *gi * *gi;
            *xi -= self.stepsize * *gi / (avg.sqrt() + self.eps);
        }
    }
}

/// Moment estimates shared by [`Adam`] and [`Nadam`].
#[derive(Debug, Clone)]
struct Moments<T> {
    beta1: T,
    beta2: T,
    m: Vec<T>,
    v: Vec<T>,
}

impl<T: RealField + Copy> Moments<T> {
    fn new(dim: usize) -> Self {
        Self {
            beta1: convert(0.9),
            beta2: convert(0.999),
            m: vec![T::zero(); dim],
            v: vec![T::zero(); dim],
        }
    }

    fn accumulate(&mut self, i: usize, gi: T) {
        let one = T::one();
        self.m[i] = self.beta1 * self.m[i] + (one - self.beta1) * gi;
        self.v[i] = self.beta2 * self.v[i] + (one - self.beta2) * gi * gi;
    }

    // Bias correction denominators for the t-th observation.
    fn corrections(&self, t: usize) -> (T, T) {
        let one = T::one();
        // beta^t has underflowed to zero long before the exponent saturates.
        let t = t.min(i32::MAX as usize) as i32;
        (one - self.beta1.powi(t), one - self.beta2.powi(t))
    }
}

/// Adam rule.
#[derive(Debug, Clone, CopyGetters)]
pub struct Adam<T: RealField + Copy> {
    /// Step size.
    #[getset(get_copy = "pub")]
    stepsize: T,
    /// Smoothing constant added to the denominator.
    #[getset(get_copy = "pub")]
    eps: T,
    moments: Moments<T>,
}

impl<T: RealField + Copy> Adam<T> {
    /// Initializes the rule for `dim` parameters with given step size.
    pub fn new(dim: usize, stepsize: T) -> Self {
        Self {
            stepsize,
            eps: convert(1e-8),
            moments: Moments::new(dim),
        }
    }

    /// Sets the decays of the first and second moments. Default: `0.9` and
    /// `0.999`.
    pub fn with_betas(mut self, beta1: T, beta2: T) -> Self {
        self.moments.beta1 = beta1;
        self.moments.beta2 = beta2;
        self
    }

    /// Sets the smoothing constant. Default: `1e-8`.
    pub fn with_eps(mut self, eps: T) -> Self {
        self.eps = eps;
        self
    }
}

impl<T: RealField + Copy> UpdateRule<T> for Adam<T> {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn step(&mut self, t: usize, x: &mut [T], g: &[T]) {
        let (c1, c2) = self.moments.corrections(t);

        for (i, (xi, gi)) in x.iter_mut().zip(g).enumerate() {
            self.moments.accumulate(i, *gi);

            let m_hat = self.moments.m[i] / c1;
            let v_hat = self.moments.v[i] / c2;
            *xi -= self.stepsize * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Nadam rule.
#[derive(Debug, Clone, CopyGetters)]
pub struct Nadam<T: RealField + Copy> {
    /// Step size.
    #[getset(get_copy = "pub")]
    stepsize: T,
    /// Smoothing constant added to the denominator.
    #[getset(get_copy = "pub")]
    eps: T,
    moments: Moments<T>,
}

impl<T: RealField + Copy> Nadam<T> {
    /// Initializes the rule for `dim` parameters with given step size.
    pub fn new(dim: usize, stepsize: T) -> Self {
        Self {
            stepsize,
            eps: convert(1e-8),
            moments: Moments::new(dim),
        }
    }

    /// Sets the decays of the first and second moments. Default: `0.9` and
    /// `0.999`.
    pub fn with_betas(mut self, beta1: T, beta2: T) -> Self {
        self.moments.beta1 = beta1;
        self.moments.beta2 = beta2;
        self
    }

    /// Sets the smoothing constant. Default: `1e-8`.
    pub fn with_eps(mut self, eps: T) -> Self {
        self.eps = eps;
        self
    }
}

impl<T: RealField + Copy> UpdateRule<T> for Nadam<T> {
    fn name(&self) -> &'static str {
        "nadam"
    }

    fn step(&mut self, t: usize, x: &mut [T], g: &[T]) {
        let one = T::one();
        let (c1, c2) = self.moments.corrections(t);
        let beta1 = self.moments.beta1;

        for (i, (xi, gi)) in x.iter_mut().zip(g).enumerate() {
            self.moments.accumulate(i, *gi);

            let m_hat = self.moments.m[i] / c1;
            let v_hat = self.moments.v[i] / c2;
            let nesterov = beta1 * m_hat + (one - beta1) * *gi / c1;
            *xi -= self.stepsize * nesterov / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Configuration of the update rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule<T> {
    /// See [`Plain`].
    Plain {
        /// Step size.
        stepsize: T,
    },
    /// See [`Adagrad`].
    Adagrad {
        /// Step size.
        stepsize: T,
        /// Smoothing constant.
        eps: T,
    },
    /// See [`RmsProp`].
    RmsProp {
        /// Step size.
        stepsize: T,
        /// Decay of the squared gradient average.
        gamma: T,
        /// Smoothing constant.
        eps: T,
    },
    /// See [`Adam`].
    Adam {
        /// Step size.
        stepsize: T,
        /// Decay of the first moment.
        beta1: T,
        /// Decay of the second moment.
        beta2: T,
        /// Smoothing constant.
        eps: T,
    },
    /// See [`Nadam`].
    Nadam {
        /// Step size.
        stepsize: T,
        /// Decay of the first moment.
        beta1: T,
        /// Decay of the second moment.
        beta2: T,
        /// Smoothing constant.
        eps: T,
    },
}

impl<T: RealField + Copy> Rule<T> {
    /// Plain rule with given step size.
    pub fn plain(stepsize: T) -> Self {
        Rule::Plain { stepsize }
    }

    /// Adagrad rule with given step size and default smoothing.
    pub fn adagrad(stepsize: T) -> Self {
        Rule::Adagrad {
            stepsize,
            eps: convert(1e-8),
        }
    }

    /// RMSProp rule with given step size and default decay and smoothing.
    pub fn rmsprop(stepsize: T) -> Self {
        Rule::RmsProp {
            stepsize,
            gamma: convert(0.9),
            eps: convert(1e-8),
        }
    }

    /// Adam rule with given step size and default decays and smoothing.
    pub fn adam(stepsize: T) -> Self {
        Rule::Adam {
            stepsize,
            beta1: convert(0.9),
            beta2: convert(0.999),
            eps: convert(1e-8),
        }
    }

    /// Nadam rule with given step size and default decays and smoothing.
    pub fn nadam(stepsize: T) -> Self {
        Rule::Nadam {
            stepsize,
            beta1: convert(0.9),
            beta2: convert(0.999),
            eps: convert(1e-8),
        }
    }

    /// Checks the rule parameters.
    pub fn validate(&self) -> Result<(), OnlineError> {
        let zero = T::zero();
        let one = T::one();

        let positive = |name: &str, value: T| {
            if value > zero && value.is_finite() {
                Ok(())
            } else {
                Err(OnlineError::InvalidRule(format!("{} must be positive", name)))
            }
        };

        let decay = |name: &str, value: T| {
            if value >= zero && value < one {
                Ok(())
            } else {
                Err(OnlineError::InvalidRule(format!("{} must be in [0, 1)", name)))
            }
        };

        match *self {
            Rule::Plain { stepsize } => positive("stepsize", stepsize),
            Rule::Adagrad { stepsize, eps } => {
                positive("stepsize", stepsize)?;
                positive("eps", eps)
            }
            Rule::RmsProp {
                stepsize,
                gamma,
                eps,
            } => {
                positive("stepsize", stepsize)?;
                decay("gamma", gamma)?;
                positive("eps", eps)
            }
            Rule::Adam {
                stepsize,
                beta1,
                beta2,
                eps,
            }
            | Rule::Nadam {
                stepsize,
                beta1,
                beta2,
                eps,
            } => {
                positive("stepsize", stepsize)?;
                decay("beta1", beta1)?;
                decay("beta2", beta2)?;
                positive("eps", eps)
            }
        }
    }
}

impl<T: RealField + Copy + 'static> Rule<T> {
    /// Resolves the configuration into a rule for `dim` parameters.
    pub fn build(&self, dim: usize) -> Result<Box<dyn UpdateRule<T>>, OnlineError> {
        self.validate()?;

        let rule: Box<dyn UpdateRule<T>> = match *self {
            Rule::Plain { stepsize } => Box::new(Plain::new(stepsize)),
            Rule::Adagrad { stepsize, eps } => Box::new(Adagrad::new(dim, stepsize).with_eps(eps)),
            Rule::RmsProp {
                stepsize,
                gamma,
                eps,
            } => Box::new(
                RmsProp::new(dim, stepsize)
                    .with_gamma(gamma)
                    .with_eps(eps),
            ),
            Rule::Adam {
                stepsize,
                beta1,
                beta2,
                eps,
            } => Box::new(
                Adam::new(dim, stepsize)
                    .with_betas(beta1, beta2)
                    .with_eps(eps),
            ),
            Rule::Nadam {
                stepsize,
                beta1,
                beta2,
                eps,
            } => Box::new(
                Nadam::new(dim, stepsize)
                    .with_betas(beta1, beta2)
                    .with_eps(eps),
            ),
        };

        Ok(rule)
    }
}

/// Gradient of a per-observation loss.
pub trait OnlineObjective<T, O: ?Sized> {
    /// Computes the gradient of the loss of the observation in `x`.
    fn gradient(&self, x: &[T], observation: &O, grad: &mut [T]);
}

/// A single observation of a regression problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation<'a, T> {
    /// Feature values (including a constant for the intercept if desired).
    pub features: &'a [T],
    /// Response value.
    pub target: T,
}

impl<'a, T> Observation<'a, T> {
    /// Creates the observation.
    pub fn new(features: &'a [T], target: T) -> Self {
        Self { features, target }
    }
}

/// Gradient of the squared error loss `(y - x^T b)^2 / 2` of linear
/// regression.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquaresGradient;

impl<'a, T: RealField + Copy> OnlineObjective<T, Observation<'a, T>> for LeastSquaresGradient {
    fn gradient(&self, x: &[T], observation: &Observation<'a, T>, grad: &mut [T]) {
        let prediction = observation
            .features
            .iter()
            .zip(x)
            .fold(T::zero(), |acc, (f, b)| acc + *f * *b);
        let residual = observation.target - prediction;

        for (gi, f) in grad.iter_mut().zip(observation.features) {
            *gi = -residual * *f;
        }
    }
}

/// Running state of the online estimation.
pub struct OnlineLearner<T> {
    x: Vec<T>,
    avg: Option<Vec<T>>,
    rule: Box<dyn UpdateRule<T>>,
    count: usize,
    grad: Vec<T>,
}

impl<T: RealField + Copy + 'static> OnlineLearner<T> {
    /// Initializes the learner with the initial estimate and the rule
    /// configuration.
    pub fn new(x0: Vec<T>, rule: Rule<T>) -> Result<Self, OnlineError> {
        let rule = rule.build(x0.len())?;
        Ok(Self::with_rule(x0, rule))
    }

    /// Initializes the learner with the initial estimate and a custom rule.
    pub fn with_rule(x0: Vec<T>, rule: Box<dyn UpdateRule<T>>) -> Self {
        let dim = x0.len();

        Self {
            x: x0,
            avg: None,
            rule,
            count: 0,
            grad: vec![T::zero(); dim],
        }
    }

    /// Enables or disables the averaging of the trajectory.
    ///
    /// With averaging, a running average of the estimates is maintained and
    /// each new estimate is pulled toward it by the weight `1/t`.
    pub fn with_averaging(mut self, averaging: bool) -> Self {
        self.avg = if averaging {
            Some(self.x.clone())
        } else {
            None
        };
        self
    }

    /// Current estimate.
    pub fn params(&self) -> &[T] {
        &self.x
    }

    /// Running average of the estimates, if averaging is enabled.
    pub fn averaged(&self) -> Option<&[T]> {
        self.avg.as_deref()
    }

    /// Number of processed observations.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Name of the used rule.
    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    /// Processes one observation with the gradient given by a closure.
    ///
    /// The state is left unchanged if the gradient is invalid.
    pub fn update<O, G>(&mut self, gradient_fn: G, observation: &O) -> Result<&[T], OnlineError>
    where
        O: ?Sized,
        G: FnOnce(&[T], &O) -> Vec<T>,
    {
        let grad = gradient_fn(self.x.as_slice(), observation);
        self.apply(&grad)?;
        Ok(&self.x)
    }

    /// Processes one observation with the gradient given by an objective.
    ///
    /// The state is left unchanged if the gradient is invalid.
    pub fn update_with<O, F>(&mut self, objective: &F, observation: &O) -> Result<&[T], OnlineError>
    where
        O: ?Sized,
        F: OnlineObjective<T, O>,
    {
        let mut grad = std::mem::take(&mut self.grad);
        objective.gradient(self.x.as_slice(), observation, &mut grad);

        let result = self.apply(&grad);
        self.grad = grad;
        result?;

        Ok(&self.x)
    }

    fn apply(&mut self, grad: &[T]) -> Result<(), OnlineError> {
        if grad.len() != self.x.len() {
            return Err(OnlineError::DimensionMismatch {
                expected: self.x.len(),
                actual: grad.len(),
            });
        }

        if let Some(index) = grad.iter().position(|gi| !gi.is_finite()) {
            debug!("non-finite gradient at observation {}", self.count + 1);
            return Err(OnlineError::NonFiniteGradient { index });
        }

        self.count += 1;
        let t = self.count;
        self.rule.step(t, &mut self.x, grad);

        if let Some(avg) = self.avg.as_mut() {
            let weight = T::one() / convert::<f64, T>(t as f64);

            for (ai, xi) in avg.iter_mut().zip(self.x.iter_mut()) {
                *ai += (*xi - *ai) * weight;
                *xi += (*ai - *xi) * weight;
            }
        }

        Ok(())
    }
}

/// Processes one observation by the learner and returns the new estimate.
pub fn online_update<'l, T, O, G>(
    learner: &'l mut OnlineLearner<T>,
    gradient_fn: G,
    observation: &O,
) -> Result<&'l [T], OnlineError>
where
    T: RealField + Copy + 'static,
    O: ?Sized,
    G: FnOnce(&[T], &O) -> Vec<T>,
{
    learner.update(gradient_fn, observation)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::{DMatrix, DVector};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::StandardNormal;

    use super::*;

    fn regression_data(n: usize, seed: u64) -> (Vec<[f64; 2]>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut features = Vec::with_capacity(n);
        let mut targets = Vec::with_capacity(n);

        for _ in 0..n {
            let x: f64 = rng.sample(StandardNormal);
            let noise: f64 = rng.sample(StandardNormal);
            features.push([1.0, x]);
            targets.push(1.0 + 2.0 * x + 0.5 * noise);
        }

        (features, targets)
    }

    fn ols(features: &[[f64; 2]], targets: &[f64]) -> Vec<f64> {
        let x = DMatrix::from_fn(features.len(), 2, |i, j| features[i][j]);
        let y = DVector::from_column_slice(targets);
        let beta = (x.transpose() * &x)
            .cholesky()
            .unwrap()
            .solve(&(x.transpose() * y));
        beta.as_slice().to_vec()
    }

    fn replay(learner: &mut OnlineLearner<f64>, features: &[[f64; 2]], targets: &[f64]) {
        for (f, y) in features.iter().zip(targets) {
            learner
                .update_with(&LeastSquaresGradient, &Observation::new(f, *y))
                .unwrap();
        }
    }

    fn sq_error(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(a, b)| (a - b).powi(2)).sum()
    }

    #[test]
    fn plain_step() {
        let mut learner = OnlineLearner::new(vec![1.0, -1.0], Rule::plain(0.1)).unwrap();
        learner.update(|_, g: &[f64; 2]| g.to_vec(), &[2.0, -4.0]).unwrap();

        assert_abs_diff_eq!(learner.params()[0], 0.8, epsilon = 1e-15);
        assert_abs_diff_eq!(learner.params()[1], -0.6, epsilon = 1e-15);
        assert_eq!(learner.count(), 1);
        assert_eq!(learner.rule_name(), "plain");
    }

    #[test]
    fn adagrad_accumulates_squared_gradients() {
        let mut rule = Adagrad::new(1, 0.5);
        let mut x = [0.0];

        rule.step(1, &mut x, &[2.0]);
        assert_abs_diff_eq!(x[0], -0.5 * 2.0 / (2.0 + 1e-8), epsilon = 1e-15);

        rule.step(2, &mut x, &[2.0]);
        let expected = -0.5 * 2.0 / (2.0 + 1e-8) - 0.5 * 2.0 / (8f64.sqrt() + 1e-8);
        assert_abs_diff_eq!(x[0], expected, epsilon = 1e-15);
    }

    #[test]
    fn smoothing_avoids_division_by_zero() {
        let mut x = [1.0, 1.0];
        Adagrad::new(2, 0.1).step(1, &mut x, &[0.0, 0.0]);
        RmsProp::new(2, 0.1).step(1, &mut x, &[0.0, 0.0]);
        Adam::new(2, 0.1).step(1, &mut x, &[0.0, 0.0]);
        Nadam::new(2, 0.1).step(1, &mut x, &[0.0, 0.0]);

        assert_eq!(x, [1.0, 1.0]);
    }

    #[test]
    fn rmsprop_decays_average() {
        let mut rule = RmsProp::new(1, 0.01).with_gamma(0.5);
        let mut x = [0.0];

        rule.step(1, &mut x, &[2.0]);
        // avg = 0.5 * 4 = 2
        assert_abs_diff_eq!(x[0], -0.01 * 2.0 / (2f64.sqrt() + 1e-8), epsilon = 1e-15);

        rule.step(2, &mut x, &[1.0]);
        // avg = 0.5 * 2 + 0.5 * 1 = 1.5
        let expected = -0.01 * 2.0 / (2f64.sqrt() + 1e-8) - 0.01 / (1.5f64.sqrt() + 1e-8);
        assert_abs_diff_eq!(x[0], expected, epsilon = 1e-15);
    }

    #[test]
    fn adam_bias_correction_uses_observation_count() {
        let (b1, b2, eps, lr) = (0.9f64, 0.999f64, 1e-8, 0.01);
        let mut rule = Adam::new(1, lr);
        let mut x = [0.0];

        // The first corrected step has the length of the step size.
        rule.step(1, &mut x, &[3.0]);
        assert_abs_diff_eq!(x[0], -lr * 3.0 / (3.0 + eps), epsilon = 1e-15);

        rule.step(2, &mut x, &[-1.0]);

        let m = b1 * (1.0 - b1) * 3.0 + (1.0 - b1) * -1.0;
        let v = b2 * (1.0 - b2) * 9.0 + (1.0 - b2) * 1.0;
        let m_hat = m / (1.0 - b1.powi(2));
        let v_hat = v / (1.0 - b2.powi(2));
        let expected = -lr * 3.0 / (3.0 + eps) - lr * m_hat / (v_hat.sqrt() + eps);
        assert_abs_diff_eq!(x[0], expected, epsilon = 1e-15);

        // Correction with the exponent shifted by one gives a different step.
        let shifted = -lr * 3.0 / (3.0 + eps)
            - lr * (m / (1.0 - b1)) / ((v / (1.0 - b2)).sqrt() + eps);
        assert!((x[0] - shifted).abs() > 1e-4);
    }

    #[test]
    fn bias_correction_on_long_stream() {
        let moments = Moments::<f64>::new(1);

        assert_eq!(moments.corrections(i32::MAX as usize), (1.0, 1.0));
        assert_eq!(moments.corrections(i32::MAX as usize + 1), (1.0, 1.0));
    }

    #[test]
    fn nadam_first_step() {
        let (b1, eps, lr) = (0.9f64, 1e-8, 0.01);
        let mut rule = Nadam::new(1, lr);
        let mut x = [0.0];

        rule.step(1, &mut x, &[2.0]);

        // m_hat = 2, v_hat = 4
        let nesterov = b1 * 2.0 + (1.0 - b1) * 2.0 / (1.0 - b1);
        assert_abs_diff_eq!(x[0], -lr * nesterov / (2.0 + eps), epsilon = 1e-15);
    }

    #[test]
    fn error_shrinks_with_stepsize() {
        let (features, targets) = regression_data(1000, 11);
        let beta = ols(&features, &targets);

        let rules: [fn(f64) -> Rule<f64>; 5] = [
            Rule::plain,
            Rule::adagrad,
            Rule::rmsprop,
            Rule::adam,
            Rule::nadam,
        ];

        for rule in rules {
            let errors = [1e-1, 1e-2, 1e-3, 1e-4]
                .iter()
                .map(|&stepsize| {
                    let mut learner = OnlineLearner::new(beta.clone(), rule(stepsize)).unwrap();
                    replay(&mut learner, &features, &targets);
                    sq_error(learner.params(), &beta)
                })
                .collect::<Vec<_>>();

            assert!(
                errors.windows(2).all(|w| w[1] < w[0]),
                "{:?}: {:?}",
                rule(1.0),
                errors
            );
        }
    }

    #[test]
    fn replays_converge_to_least_squares() {
        let (features, targets) = regression_data(200, 14);
        let beta = ols(&features, &targets);
        let initial_error = sq_error(&[0.0, 0.0], &beta);

        // Adagrad shrinks its steps over time, so it needs larger step sizes
        // to travel the same distance.
        let grids: [(fn(f64) -> Rule<f64>, [f64; 3]); 5] = [
            (Rule::plain, [5e-2, 1e-2, 2e-3]),
            (Rule::adagrad, [1.0, 2e-1, 5e-2]),
            (Rule::rmsprop, [1e-2, 2e-3, 4e-4]),
            (Rule::adam, [1e-2, 2e-3, 4e-4]),
            (Rule::nadam, [1e-2, 2e-3, 4e-4]),
        ];

        for (rule, stepsizes) in grids {
            let errors = stepsizes
                .iter()
                .map(|&stepsize| {
                    let mut learner = OnlineLearner::new(vec![0.0, 0.0], rule(stepsize)).unwrap();
                    for _ in 0..100 {
                        replay(&mut learner, &features, &targets);
                    }
                    sq_error(learner.params(), &beta)
                })
                .collect::<Vec<_>>();

            assert!(
                errors.windows(2).all(|w| w[1] < w[0]),
                "{:?}: {:?}",
                rule(1.0),
                errors
            );
            assert!(errors[0] < initial_error, "{:?}: {:?}", rule(1.0), errors);
            assert!(errors[2] < 1e-2, "{:?}: {:?}", rule(1.0), errors);
        }
    }

    #[test]
    fn adam_from_zero() {
        let (features, targets) = regression_data(5000, 12);
        let beta = ols(&features, &targets);

        let mut learner = OnlineLearner::new(vec![0.0, 0.0], Rule::adam(0.01))
            .unwrap()
            .with_averaging(true);
        replay(&mut learner, &features, &targets);

        assert_abs_diff_eq!(learner.params()[0], beta[0], epsilon = 0.15);
        assert_abs_diff_eq!(learner.params()[1], beta[1], epsilon = 0.15);

        let averaged = learner.averaged().unwrap();
        assert!(averaged.iter().all(|v| v.is_finite()));
        assert_eq!(learner.count(), 5000);
    }

    #[test]
    fn averaging_tracks_running_mean() {
        let mut learner = OnlineLearner::new(vec![0.0], Rule::plain(1.0))
            .unwrap()
            .with_averaging(true);

        // x: 0 -> 1, avg = 1, x pulled toward avg stays 1.
        learner.update(|_, g: &f64| vec![*g], &-1.0).unwrap();
        assert_eq!(learner.averaged(), Some(&[1.0][..]));
        assert_eq!(learner.params(), &[1.0]);

        // x: 1 -> 3, avg = 1 + (3 - 1) / 2 = 2, x = 3 + (2 - 3) / 2 = 2.5.
        learner.update(|_, g: &f64| vec![*g], &-2.0).unwrap();
        assert_eq!(learner.averaged(), Some(&[2.0][..]));
        assert_eq!(learner.params(), &[2.5]);
    }

    #[test]
    fn order_of_observations_matters() {
        let (features, targets) = regression_data(200, 13);

        let mut forward = OnlineLearner::new(vec![0.0, 0.0], Rule::adagrad(0.1)).unwrap();
        replay(&mut forward, &features, &targets);

        let rev_features = features.iter().rev().copied().collect::<Vec<_>>();
        let rev_targets = targets.iter().rev().copied().collect::<Vec<_>>();
        let mut backward = OnlineLearner::new(vec![0.0, 0.0], Rule::adagrad(0.1)).unwrap();
        replay(&mut backward, &rev_features, &rev_targets);

        assert_ne!(forward.params(), backward.params());
    }

    #[test]
    fn invalid_gradient_leaves_state_unchanged() {
        let mut learner = OnlineLearner::new(vec![1.0, 2.0], Rule::adam(0.1)).unwrap();

        assert_eq!(
            online_update(&mut learner, |_, _: &()| vec![1.0], &()),
            Err(OnlineError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            online_update(&mut learner, |_, _: &()| vec![1.0, f64::NAN], &()),
            Err(OnlineError::NonFiniteGradient { index: 1 })
        );

        assert_eq!(learner.params(), &[1.0, 2.0]);
        assert_eq!(learner.count(), 0);
    }

    #[test]
    fn invalid_rule() {
        assert!(matches!(
            OnlineLearner::new(vec![0.0], Rule::plain(-1.0)),
            Err(OnlineError::InvalidRule(_))
        ));
        assert!(matches!(
            Rule::Adam {
                stepsize: 0.1,
                beta1: 1.0,
                beta2: 0.999,
                eps: 1e-8
            }
            .build(1),
            Err(OnlineError::InvalidRule(_))
        ));
    }
}
