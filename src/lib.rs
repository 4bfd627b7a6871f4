#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Estima
//!
//! A pure Rust toolkit of hand-rolled estimation methods: maximum likelihood
//! by bounded minimization of an objective function, the
//! expectation-maximization iteration, online gradient updates and
//! discrete-state sampling.
//!
//! The toolkit is made of four independent components that share only the
//! calling convention of parameter vectors in and scalar or updated state
//! out:
//!
//! * [Bounded optimizer](algo::lbfgsb) -- Projected limited-memory BFGS with
//!   box constraints, run by the [`OptimizerDriver`] or the [`minimize`]
//!   function.
//! * [EM iterator](em) -- Alternation of expectation and maximization steps
//!   until the latent quantity stabilizes, with [principal component
//!   analysis](em::pca) as an instance.
//! * [Online gradient updater](online) -- Plain, Adagrad, RMSProp, Adam and
//!   Nadam rules processing one observation at a time.
//! * [Discrete-state sampler](sampler) -- Categorical draw, Gibbs sweep of
//!   topic assignments and Markov chain simulation.
//!
//! Objective functions of common [statistical models](models) are provided
//! as well.
//!
//! ## Problem
//!
//! The objective is any type that implements the [`Function`] and [`Problem`]
//! traits. The value to be minimized is usually a negative log-likelihood.
//!
//! ```rust
//! // Estima is based on `nalgebra` crate.
//! use estima::nalgebra as na;
//! use estima::{Domain, Function, Problem, ProblemError};
//! use na::{Dyn, IsContiguous};
//!
//! // Negative log-likelihood of Poisson counts.
//! struct Poisson {
//!     counts: Vec<f64>,
//! }
//!
//! impl Problem for Poisson {
//!     // The numeric type. Usually f64 or f32.
//!     type Field = f64;
//!
//!     // Bounds of the parameters. At the very least, the dimension
//!     // must be known.
//!     fn domain(&self) -> Domain<Self::Field> {
//!         Domain::unconstrained(1).with_lower(0, 0.0)
//!     }
//! }
//!
//! impl Function for Poisson {
//!     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
//!     where
//!         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//!     {
//!         let rate = x[0];
//!
//!         if rate <= 0.0 {
//!             return Ok(f64::INFINITY);
//!         }
//!
//!         let n = self.counts.len() as f64;
//!         let sum: f64 = self.counts.iter().sum();
//!         Ok(n * rate - sum * rate.ln())
//!     }
//! }
//! ```
//!
//! There is no need for defining the gradient. The library uses [finite
//! differences](derivatives) unless the function provides the analytic
//! gradient by overriding [`Function::gradient`]. A non-finite value marks
//! the point as infeasible, the optimizer then shortens the step.
//!
//! ## Minimizing
//!
//! When you have your function available, you can use the [`OptimizerDriver`]
//! to run the iteration process until a stopping criterion is reached.
//!
//! ```rust
//! use estima::OptimizerDriver;
//! # use estima::nalgebra as na;
//! # use estima::{Domain, Function, Problem, ProblemError};
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct Poisson {
//! #     counts: Vec<f64>,
//! # }
//! #
//! # impl Problem for Poisson {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(1).with_lower(0, 0.0)
//! #     }
//! # }
//! #
//! # impl Function for Poisson {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         let rate = x[0];
//! #         if rate <= 0.0 {
//! #             return Ok(f64::INFINITY);
//! #         }
//! #         let n = self.counts.len() as f64;
//! #         let sum: f64 = self.counts.iter().sum();
//! #         Ok(n * rate - sum * rate.ln())
//! #     }
//! # }
//!
//! let f = Poisson { counts: vec![2.0, 4.0, 3.0, 5.0, 1.0] };
//! let mut optimizer = OptimizerDriver::builder(&f)
//!     .with_initial(vec![10.0])
//!     .build()
//!     .expect("valid input");
//!
//! let (x, fx) = optimizer
//!     .find(|state| {
//!         println!("iter = {}\tfx = {}\tx = {:?}", state.iter(), state.fx(), state.x());
//!         state.status().is_terminal() || state.iter() >= 100
//!     })
//!     .expect("optimizer encountered an error");
//!
//! println!("rate = {}, fx = {}", x[0], fx);
//! ```
//!
//! Or just call [`minimize`] which runs to convergence and reports whether
//! the tolerance was met or the iteration budget was exhausted.
//!
//! ## License
//!
//! Licensed under MIT.

pub mod algo;
pub mod analysis;
mod core;
pub mod derivatives;
pub mod driver;
pub mod em;
pub mod models;
pub mod online;
pub mod sampler;

pub use core::*;
pub use driver::{minimize, Minimum, OptimizerDriver, Termination};

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(not(feature = "testing"))]
pub(crate) mod testing;

pub use nalgebra;
pub use rand;
