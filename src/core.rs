//! Core abstractions and types for estima.
//!
//! *Users* are mainly interested in implementing the [`Function`] trait,
//! optionally specifying the [domain](Domain) and an analytic
//! [gradient](Function::gradient).
//!
//! Algorithms *developers* are interested in implementing the [`Optimizer`]
//! trait and using the tools in [derivatives](crate::derivatives).

mod base;
mod domain;
mod function;
mod optimizer;
mod params;

pub use base::*;
pub use domain::*;
pub use function::*;
pub use optimizer::*;
pub use params::*;
