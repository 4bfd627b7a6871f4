//! Normal distribution.

use std::f64::consts::PI;

use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, IsContiguous, Vector,
};

use super::{check_finite, ModelError};
use crate::core::{Domain, Function, ParamLayout, Problem, ProblemError};

/// Negative log-likelihood of independent normal samples.
///
/// Parameters are `mu` and `sigma` (standard deviation). Values of `sigma`
/// that are not positive are infeasible.
#[derive(Debug, Clone)]
pub struct NormalLikelihood {
    samples: Vec<f64>,
    layout: ParamLayout,
}

impl NormalLikelihood {
    /// Creates the likelihood of given samples.
    pub fn new(samples: Vec<f64>) -> Result<Self, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::InvalidData(String::from("no samples")));
        }

        check_finite("samples", &samples)?;

        Ok(Self {
            samples,
            layout: ParamLayout::new().with("mu", 1).with("sigma", 1),
        })
    }

    /// Layout of the parameter vector.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Closed-form maximum likelihood estimate `(mu, sigma)`.
    pub fn closed_form(&self) -> (f64, f64) {
        let n = self.samples.len() as f64;
        let mu = self.samples.iter().sum::<f64>() / n;
        let ss: f64 = self.samples.iter().map(|s| (s - mu).powi(2)).sum();
        (mu, (ss / n).sqrt())
    }

    fn moments(&self, mu: f64) -> (f64, f64) {
        self.samples.iter().fold((0.0, 0.0), |(sum, ss), s| {
            let r = s - mu;
            (sum + r, ss + r * r)
        })
    }
}

impl Problem for NormalLikelihood {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(2).with_lower(1, 0.0)
    }
}

impl Function for NormalLikelihood {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let (mu, sigma) = (x[0], x[1]);

        if sigma <= 0.0 {
            return Ok(f64::INFINITY);
        }

        let n = self.samples.len() as f64;
        let (_, ss) = self.moments(mu);

        Ok(n * sigma.ln() + 0.5 * n * (2.0 * PI).ln() + ss / (2.0 * sigma * sigma))
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
        let (mu, sigma) = (x[0], x[1]);

        if sigma <= 0.0 {
            return Ok(false);
        }

        let n = self.samples.len() as f64;
        let (sum, ss) = self.moments(mu);
        let var = sigma * sigma;

        grad[0] = -sum / var;
        grad[1] = n / sigma - ss / (var * sigma);

        Ok(true)
    }
}
