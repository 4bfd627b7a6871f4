//! Expectation-maximization iteration.
//!
//! EM is a fixed-point scheme for latent-variable models. Each cycle first
//! computes the expected latent quantities given the current parameters
//! (E-step) and then re-estimates the parameters given those quantities
//! (M-step). The steps are always performed in this order, starting with the
//! E-step.
//!
//! The iteration is monitored on the latent quantity (for example the
//! component scores in [PCA](pca)): once the maximum absolute change between
//! two consecutive cycles drops below the tolerance, the process is
//! converged. Reaching the maximum number of iterations is reported as
//! [`EmState::MaxIterExceeded`], never as success.
//!
//! The low-level interface is the [`EmModel`] trait driven by [`EmDriver`].
//! For quick use with closures, there is [`em_fit`].
//!
//! ```rust
//! use estima::em::em_fit;
//!
//! // Estimate the mean of a sample where some values are missing. The latent
//! // quantity is the completed sample.
//! let observed = [Some(1.0), None, Some(3.0), Some(5.0), None];
//!
//! let fit = em_fit(
//!     |mean: &f64| Ok(observed.iter().map(|v| v.unwrap_or(*mean)).collect::<Vec<_>>()),
//!     |completed: &Vec<f64>| Ok(completed.iter().sum::<f64>() / completed.len() as f64),
//!     0.0,
//!     1e-10,
//!     1000,
//! )
//! .expect("no error");
//!
//! assert!(fit.converged);
//! assert!((fit.params - 3.0).abs() < 1e-8);
//! ```
//!
//! # References
//!
//! \[1\] [Maximum Likelihood from Incomplete Data via the EM
//! Algorithm](https://doi.org/10.1111/j.2517-6161.1977.tb01600.x)

pub mod pca;

use std::marker::PhantomData;

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::analysis::max_abs_change;

/// Error that occurred during EM iteration.
#[derive(Debug, Error)]
pub enum EmError {
    /// Invalid input data or settings.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A linear system in the E-step or M-step is singular.
    #[error("singular system in iteration {iteration}")]
    Singular {
        /// Iteration in which the problem occurred.
        iteration: usize,
    },
    /// The monitored quantity became NaN.
    #[error("monitored quantity is not finite in iteration {iteration}")]
    NonFinite {
        /// Iteration in which the problem occurred.
        iteration: usize,
    },
    /// A decomposition failed to produce the requested factors.
    #[error("decomposition failed")]
    Decomposition,
    /// A custom error specific to the model.
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// Quantity whose change between iterations decides the convergence.
pub trait Monitor {
    /// Maximum absolute elementwise difference to the other value. Must be
    /// infinity if the shapes differ.
    fn max_abs_change(&self, other: &Self) -> f64;
}

impl Monitor for f64 {
    fn max_abs_change(&self, other: &Self) -> f64 {
        (self - other).abs()
    }
}

impl Monitor for Vec<f64> {
    fn max_abs_change(&self, other: &Self) -> f64 {
        max_abs_change(self.iter(), other.iter())
    }
}

impl Monitor for DVector<f64> {
    fn max_abs_change(&self, other: &Self) -> f64 {
        max_abs_change(self.as_slice().iter(), other.as_slice().iter())
    }
}

impl Monitor for DMatrix<f64> {
    fn max_abs_change(&self, other: &Self) -> f64 {
        if self.shape() != other.shape() {
            return f64::INFINITY;
        }

        max_abs_change(self.as_slice().iter(), other.as_slice().iter())
    }
}

/// A latent-variable model estimated by EM.
pub trait EmModel {
    /// Parameters of the model.
    type Params;
    /// Expected latent quantities. This is the monitored quantity.
    type Latent: Monitor;

    /// Computes the expected latent quantities given the parameters.
    fn expectation(&mut self, params: &Self::Params) -> Result<Self::Latent, EmError>;

    /// Re-estimates the parameters given the expected latent quantities.
    fn maximization(&mut self, latent: &Self::Latent) -> Result<Self::Params, EmError>;
}

/// State of the EM iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmState {
    /// No step was performed yet.
    Initialized,
    /// At least one step was performed and the process has not finished.
    Iterating,
    /// The change of the monitored quantity dropped below the tolerance.
    Converged,
    /// The maximum number of iterations was reached without convergence.
    MaxIterExceeded,
}

impl EmState {
    /// Determines whether the state is terminal.
    pub fn is_finished(&self) -> bool {
        matches!(self, EmState::Converged | EmState::MaxIterExceeded)
    }
}

/// Options for [`EmDriver`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct EmOptions {
    /// Tolerance for the maximum absolute change of the monitored quantity.
    /// Default: `1e-6`.
    tolerance: f64,
    /// Maximum number of E-M cycles. Default: `500`.
    max_iters: usize,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iters: 500,
        }
    }
}

/// Result of the EM iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct EmFit<P, L> {
    /// Final parameters.
    pub params: P,
    /// Latent quantities from the last E-step. `None` if no step was done.
    pub latent: Option<L>,
    /// Number of performed E-M cycles.
    pub iterations: usize,
    /// Whether the process converged.
    pub converged: bool,
}

/// The driver of the EM iteration.
pub struct EmDriver<M: EmModel> {
    model: M,
    options: EmOptions,
    params: M::Params,
    latent: Option<M::Latent>,
    state: EmState,
    iter: usize,
    change: f64,
}

impl<M: EmModel> EmDriver<M> {
    /// Initializes the driver with the initial parameters and default options.
    pub fn new(model: M, initial: M::Params) -> Self {
        Self::with_options(model, initial, EmOptions::default())
    }

    /// Initializes the driver with the initial parameters and given options.
    pub fn with_options(model: M, initial: M::Params, options: EmOptions) -> Self {
        Self {
            model,
            options,
            params: initial,
            latent: None,
            state: EmState::Initialized,
            iter: 0,
            change: f64::INFINITY,
        }
    }

    /// Current state.
    pub fn state(&self) -> EmState {
        self.state
    }

    /// Number of performed E-M cycles.
    pub fn iterations(&self) -> usize {
        self.iter
    }

    /// Current parameters.
    pub fn params(&self) -> &M::Params {
        &self.params
    }

    /// Latent quantities from the last E-step.
    pub fn latent(&self) -> Option<&M::Latent> {
        self.latent.as_ref()
    }

    /// Maximum absolute change of the monitored quantity in the last cycle.
    /// Infinity before the second cycle.
    pub fn change(&self) -> f64 {
        self.change
    }

    /// Reference to the model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Performs one E-M cycle and returns the new state.
    ///
    /// Does nothing if the process already finished.
    pub fn step(&mut self) -> Result<EmState, EmError> {
        if self.state.is_finished() {
            return Ok(self.state);
        }

        if self.iter >= self.options.max_iters {
            debug!("EM reached the maximum of {} iterations", self.iter);
            self.state = EmState::MaxIterExceeded;
            return Ok(self.state);
        }

        let latent = self.model.expectation(&self.params)?;
        self.params = self.model.maximization(&latent)?;
        self.iter += 1;

        if self.state == EmState::Initialized {
            debug!("EM started");
            self.state = EmState::Iterating;
        }

        if let Some(prev) = &self.latent {
            self.change = prev.max_abs_change(&latent);

            if self.change.is_nan() {
                return Err(EmError::NonFinite {
                    iteration: self.iter,
                });
            }

            debug!("EM iter = {}\tchange = {}", self.iter, self.change);

            if self.change < self.options.tolerance {
                debug!("EM converged after {} iterations", self.iter);
                self.state = EmState::Converged;
            }
        }

        self.latent = Some(latent);

        if self.state == EmState::Iterating && self.iter >= self.options.max_iters {
            debug!("EM reached the maximum of {} iterations", self.iter);
            self.state = EmState::MaxIterExceeded;
        }

        Ok(self.state)
    }

    /// Runs the iteration until convergence or the maximum number of
    /// iterations.
    pub fn run(&mut self) -> Result<EmState, EmError> {
        while !self.step()?.is_finished() {}
        Ok(self.state)
    }

    /// Consumes the driver and returns the result together with the model.
    pub fn into_parts(self) -> (EmFit<M::Params, M::Latent>, M) {
        let fit = EmFit {
            params: self.params,
            latent: self.latent,
            iterations: self.iter,
            converged: self.state == EmState::Converged,
        };

        (fit, self.model)
    }

    /// Consumes the driver and returns the result.
    pub fn into_fit(self) -> EmFit<M::Params, M::Latent> {
        self.into_parts().0
    }
}

struct ClosureModel<E, M, P, L> {
    e_step: E,
    m_step: M,
    _marker: PhantomData<fn(&P) -> L>,
}

impl<E, M, P, L> EmModel for ClosureModel<E, M, P, L>
where
    E: FnMut(&P) -> Result<L, EmError>,
    M: FnMut(&L) -> Result<P, EmError>,
    L: Monitor,
{
    type Params = P;
    type Latent = L;

    fn expectation(&mut self, params: &P) -> Result<L, EmError> {
        (self.e_step)(params)
    }

    fn maximization(&mut self, latent: &L) -> Result<P, EmError> {
        (self.m_step)(latent)
    }
}

/// Runs EM with the E-step and M-step given as closures.
pub fn em_fit<P, L, E, M>(
    e_step: E,
    m_step: M,
    initial: P,
    tolerance: f64,
    max_iters: usize,
) -> Result<EmFit<P, L>, EmError>
where
    E: FnMut(&P) -> Result<L, EmError>,
    M: FnMut(&L) -> Result<P, EmError>,
    L: Monitor,
{
    if !(tolerance >= 0.0) {
        return Err(EmError::InvalidInput(format!(
            "tolerance must be non-negative, got {}",
            tolerance
        )));
    }

    let model = ClosureModel {
        e_step,
        m_step,
        _marker: PhantomData,
    };

    let mut options = EmOptions::default();
    options.set_tolerance(tolerance).set_max_iters(max_iters);

    let mut driver = EmDriver::with_options(model, initial, options);
    driver.run()?;

    Ok(driver.into_fit())
}
