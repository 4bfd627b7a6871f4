//! Linear regression, plain and penalized.

use std::f64::consts::PI;

use nalgebra::{
    storage::{Storage, StorageMut},
    DMatrix, DVector, Dyn, IsContiguous, Vector,
};

use super::{check_design, ModelError};
use crate::core::{Domain, Function, ParamLayout, Problem, ProblemError};

fn residuals<Sx>(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    beta: &Vector<f64, Dyn, Sx>,
) -> DVector<f64>
where
    Sx: Storage<f64, Dyn>,
{
    y - x * beta
}

/// Least squares solution computed by SVD.
fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>, ModelError> {
    x.clone()
        .svd(true, true)
        .solve(y, f64::EPSILON)
        .map_err(|error| ModelError::InvalidData(error.to_string()))
}

/// Negative log-likelihood of the linear model `y = X beta + e` with
/// independent normal errors.
///
/// Parameters are the coefficients `beta` (one per column of the design
/// matrix) followed by the error standard deviation `sigma`.
#[derive(Debug, Clone)]
pub struct GaussianRegression {
    x: DMatrix<f64>,
    y: DVector<f64>,
    layout: ParamLayout,
}

impl GaussianRegression {
    /// Creates the model from a design matrix and a response.
    pub fn new(x: DMatrix<f64>, y: DVector<f64>) -> Result<Self, ModelError> {
        check_design(&x, &y)?;
        let layout = ParamLayout::new().with("beta", x.ncols()).with("sigma", 1);
        Ok(Self { x, y, layout })
    }

    /// Layout of the parameter vector.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Ordinary least squares estimate of the coefficients, which is also
    /// their maximum likelihood estimate.
    pub fn ols(&self) -> Result<DVector<f64>, ModelError> {
        least_squares(&self.x, &self.y)
    }
}

impl Problem for GaussianRegression {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        let p = self.x.ncols();
        Domain::unconstrained(p + 1).with_lower(p, 0.0)
    }
}

impl Function for GaussianRegression {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let p = self.x.ncols();
        let sigma = x[p];

        if sigma <= 0.0 {
            return Ok(f64::INFINITY);
        }

        let n = self.y.len() as f64;
        let rss = residuals(&self.x, &self.y, &x.rows(0, p)).norm_squared();

        Ok(n * sigma.ln() + 0.5 * n * (2.0 * PI).ln() + rss / (2.0 * sigma * sigma))
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
        let p = self.x.ncols();
        let sigma = x[p];

        if sigma <= 0.0 {
            return Ok(false);
        }

        let n = self.y.len() as f64;
        let var = sigma * sigma;
        let r = residuals(&self.x, &self.y, &x.rows(0, p));

        let xtr = self.x.tr_mul(&r);
        grad.rows_mut(0, p).copy_from(&(-xtr / var));
        grad[p] = n / sigma - r.norm_squared() / (var * sigma);

        Ok(true)
    }
}

/// Penalty on regression coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Penalty {
    /// No penalty.
    #[default]
    None,
    /// Squared L2 norm times lambda.
    Ridge(f64),
    /// L1 norm times lambda.
    Lasso(f64),
}

impl Penalty {
    fn lambda(&self) -> f64 {
        match self {
            Penalty::None => 0.0,
            Penalty::Ridge(lambda) | Penalty::Lasso(lambda) => *lambda,
        }
    }

    fn value<Sx>(&self, beta: &Vector<f64, Dyn, Sx>) -> f64
    where
        Sx: Storage<f64, Dyn>,
    {
        match self {
            Penalty::None => 0.0,
            Penalty::Ridge(lambda) => lambda * beta.norm_squared(),
            Penalty::Lasso(lambda) => lambda * beta.lp_norm(1),
        }
    }
}

/// Residual sum of squares plus a penalty on the coefficients.
///
/// The lasso penalty is not differentiable at zero, so only the plain and
/// ridge objectives provide the analytic gradient.
#[derive(Debug, Clone)]
pub struct PenalizedLeastSquares {
    x: DMatrix<f64>,
    y: DVector<f64>,
    penalty: Penalty,
    layout: ParamLayout,
}

impl PenalizedLeastSquares {
    /// Creates the objective from a design matrix, a response and a penalty.
    pub fn new(x: DMatrix<f64>, y: DVector<f64>, penalty: Penalty) -> Result<Self, ModelError> {
        check_design(&x, &y)?;

        let lambda = penalty.lambda();
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(ModelError::InvalidData(format!(
                "penalty weight must be non-negative, got {}",
                lambda
            )));
        }

        let layout = ParamLayout::new().with("beta", x.ncols());
        Ok(Self {
            x,
            y,
            penalty,
            layout,
        })
    }

    /// Layout of the parameter vector.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Used penalty.
    pub fn penalty(&self) -> Penalty {
        self.penalty
    }
}

impl Problem for PenalizedLeastSquares {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.x.ncols())
    }
}

impl Function for PenalizedLeastSquares {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let rss = residuals(&self.x, &self.y, x).norm_squared();
        Ok(rss + self.penalty.value(x))
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
        let ridge = match self.penalty {
            Penalty::None => 0.0,
            Penalty::Ridge(lambda) => lambda,
            Penalty::Lasso(_) => return Ok(false),
        };

        let r = residuals(&self.x, &self.y, x);
        let mut g = self.x.tr_mul(&r) * -2.0;
        g.axpy(2.0 * ridge, x, 1.0);
        grad.copy_from(&g);

        Ok(true)
    }
}

/// Closed-form ridge estimate `(X'X + lambda I)^-1 X'y`.
pub fn ridge_closed_form(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    lambda: f64,
) -> Result<DVector<f64>, ModelError> {
    check_design(x, y)?;

    if lambda == 0.0 {
        return least_squares(x, y);
    }

    let p = x.ncols();
    let gram = x.tr_mul(x) + DMatrix::identity(p, p) * lambda;

    gram.cholesky()
        .map(|chol| chol.solve(&x.tr_mul(y)))
        .ok_or_else(|| {
            ModelError::InvalidData(String::from("penalized Gram matrix is not positive definite"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal, StandardNormal};

    use crate::{driver::minimize, models::numeric_gradient};

    fn data(n: usize, seed: u64) -> (DMatrix<f64>, DVector<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let beta = [1.0, 2.0, -0.5];
        let noise = Normal::new(0.0, 0.5).unwrap();

        let x: DMatrix<f64> = DMatrix::from_fn(n, 3, |_, j| {
            if j == 0 {
                1.0
            } else {
                StandardNormal.sample(&mut rng)
            }
        });
        let y = DVector::from_fn(n, |i, _| {
            (0..3).map(|j| x[(i, j)] * beta[j]).sum::<f64>() + noise.sample(&mut rng)
        });

        (x, y)
    }

    #[test]
    fn regression_matches_least_squares() {
        let (x, y) = data(500, 3);
        let f = GaussianRegression::new(x.clone(), y.clone()).unwrap();

        let min = minimize(&f, vec![0.0, 0.0, 0.0, 1.0], 1e-12, 1000, false).unwrap();
        let ols = f.ols().unwrap();

        let beta = f.layout().get(&min.x, "beta").unwrap();
        for j in 0..3 {
            assert_abs_diff_eq!(beta[j], ols[j], epsilon = 1e-3);
        }

        let rss = (y - x * &ols).norm_squared();
        let sigma = f.layout().get(&min.x, "sigma").unwrap()[0];
        assert_abs_diff_eq!(sigma, (rss / 500.0).sqrt(), epsilon = 1e-3);
        assert!((sigma - 0.5).abs() < 0.05);
    }

    #[test]
    fn regression_gradient_matches_differences() {
        let (x, y) = data(50, 4);
        let f = GaussianRegression::new(x, y).unwrap();

        let point = DVector::from_vec(vec![0.5, 1.0, 0.0, 0.8]);
        let mut grad = DVector::zeros(4);
        assert!(f.gradient(&point, &mut grad).unwrap());

        let numeric = numeric_gradient(&f, point.as_slice());
        for i in 0..4 {
            assert_abs_diff_eq!(grad[i], numeric[i], epsilon = 1e-4 * grad[i].abs().max(1.0));
        }
    }

    #[test]
    fn ridge_matches_closed_form() {
        let (x, y) = data(100, 5);

        for lambda in [0.0, 1.0, 25.0] {
            let f =
                PenalizedLeastSquares::new(x.clone(), y.clone(), Penalty::Ridge(lambda)).unwrap();
            let min = minimize(&f, vec![0.0; 3], 1e-14, 1000, false).unwrap();
            let expected = ridge_closed_form(&x, &y, lambda).unwrap();

            for j in 0..3 {
                assert_abs_diff_eq!(min.x[j], expected[j], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn ridge_shrinks_coefficients() {
        let (x, y) = data(100, 6);
        let small = ridge_closed_form(&x, &y, 0.1).unwrap();
        let large = ridge_closed_form(&x, &y, 100.0).unwrap();
        assert!(large.norm() < small.norm());
    }

    #[test]
    fn lasso_zeroes_irrelevant_coefficient() {
        let mut rng = StdRng::seed_from_u64(9);
        let n = 200;
        let x: DMatrix<f64> = DMatrix::from_fn(n, 2, |_, _| StandardNormal.sample(&mut rng));
        let y = DVector::from_fn(n, |i, _| 3.0 * x[(i, 0)]);

        let f = PenalizedLeastSquares::new(x, y, Penalty::Lasso(20.0)).unwrap();
        let min = minimize(&f, vec![1.0, 1.0], 1e-12, 2000, false).unwrap();

        assert!(min.x[0] > 2.5);
        assert!(min.x[1].abs() < 0.1);
    }

    #[test]
    fn invalid_data() {
        let (x, y) = data(10, 0);

        assert_eq!(
            GaussianRegression::new(x.clone(), y.rows(0, 9).into_owned()).err(),
            Some(ModelError::DimensionMismatch {
                what: "response",
                expected: 10,
                actual: 9
            })
        );
        assert!(matches!(
            PenalizedLeastSquares::new(x, y, Penalty::Ridge(-1.0)),
            Err(ModelError::InvalidData(_))
        ));
    }
}
