//! Logistic regression.

use nalgebra::{
    storage::{Storage, StorageMut},
    DMatrix, DVector, Dyn, IsContiguous, Vector,
};

use super::{check_design, sigmoid, softplus, ModelError};
use crate::core::{Domain, Function, ParamLayout, Problem, ProblemError};

/// Negative log-likelihood of the logistic regression model.
///
/// The response takes values 0 or 1 and the parameters are the coefficients
/// of the linear predictor, one per column of the design matrix. The
/// likelihood is evaluated through `ln(1 + exp(eta))` computed without
/// overflow, so it stays finite for large linear predictors.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    x: DMatrix<f64>,
    y: DVector<f64>,
    layout: ParamLayout,
}

impl LogisticRegression {
    /// Creates the model from a design matrix and a binary response.
    pub fn new(x: DMatrix<f64>, y: DVector<f64>) -> Result<Self, ModelError> {
        check_design(&x, &y)?;

        if let Some(i) = y.iter().position(|&yi| yi != 0.0 && yi != 1.0) {
            return Err(ModelError::InvalidData(format!(
                "response must be 0 or 1, got {} at {}",
                y[i], i
            )));
        }

        let layout = ParamLayout::new().with("beta", x.ncols());
        Ok(Self { x, y, layout })
    }

    /// Layout of the parameter vector.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Fitted probabilities for given coefficients.
    pub fn probabilities(&self, beta: &[f64]) -> Result<DVector<f64>, ModelError> {
        if beta.len() != self.x.ncols() {
            return Err(ModelError::DimensionMismatch {
                what: "coefficients",
                expected: self.x.ncols(),
                actual: beta.len(),
            });
        }

        let eta = &self.x * DVector::from_column_slice(beta);
        Ok(eta.map(sigmoid))
    }
}

impl Problem for LogisticRegression {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.x.ncols())
    }
}

impl Function for LogisticRegression {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let eta = &self.x * x;

        Ok(eta
            .iter()
            .zip(self.y.iter())
            .map(|(&eta, &y)| softplus(eta) - y * eta)
            .sum())
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
        let mut r = &self.x * x;
        r.iter_mut()
            .zip(self.y.iter())
            .for_each(|(ri, &y)| *ri = sigmoid(*ri) - y);

        grad.copy_from(&self.x.tr_mul(&r));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::StandardNormal;

    use crate::{driver::minimize, models::numeric_gradient};

    fn data(n: usize, seed: u64) -> (DMatrix<f64>, DVector<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let beta = [-0.5, 1.5];

        let x: DMatrix<f64> = DMatrix::from_fn(n, 2, |_, j| {
            if j == 0 {
                1.0
            } else {
                rng.sample(StandardNormal)
            }
        });
        let y = DVector::from_fn(n, |i, _| {
            let p = sigmoid(beta[0] + beta[1] * x[(i, 1)]);
            if rng.gen::<f64>() < p {
                1.0
            } else {
                0.0
            }
        });

        (x, y)
    }

    #[test]
    fn recovers_coefficients() {
        let (x, y) = data(2000, 12);
        let f = LogisticRegression::new(x, y).unwrap();

        let min = minimize(&f, vec![0.0, 0.0], 1e-12, 1000, false).unwrap();
        assert!(min.converged);
        assert!((min.x[0] + 0.5).abs() < 0.2);
        assert!((min.x[1] - 1.5).abs() < 0.2);

        // Score equations hold in the estimate.
        let p = f.probabilities(&min.x).unwrap();
        assert_abs_diff_eq!(p.sum(), f.y.sum(), epsilon = 1e-2);
    }

    #[test]
    fn gradient_matches_differences() {
        let (x, y) = data(100, 13);
        let f = LogisticRegression::new(x, y).unwrap();

        let point = DVector::from_vec(vec![0.3, -0.7]);
        let mut grad = DVector::zeros(2);
        assert!(f.gradient(&point, &mut grad).unwrap());

        let numeric = numeric_gradient(&f, point.as_slice());
        for i in 0..2 {
            assert_abs_diff_eq!(grad[i], numeric[i], epsilon = 1e-4 * grad[i].abs().max(1.0));
        }
    }

    #[test]
    fn saturated_predictor_stays_finite() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, -1.0]);
        let y = DVector::from_vec(vec![0.0, 1.0]);
        let f = LogisticRegression::new(x, y).unwrap();

        let value = f.apply(&DVector::from_vec(vec![1000.0])).unwrap();
        assert_abs_diff_eq!(value, 2000.0, epsilon = 1e-9);

        let value = f.apply(&DVector::from_vec(vec![-1000.0])).unwrap();
        assert!(value.is_finite());
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn invalid_response() {
        let x = DMatrix::from_element(3, 1, 1.0);
        assert!(matches!(
            LogisticRegression::new(x.clone(), DVector::from_vec(vec![0.0, 1.0, 2.0])),
            Err(ModelError::InvalidData(_))
        ));
        assert!(matches!(
            LogisticRegression::new(x, DVector::from_vec(vec![0.0, 1.0])),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }
}
