//! Principal component analysis by EM.
//!
//! The model treats the component scores as latent variables. The E-step
//! projects the centered data onto the current loading directions by least
//! squares and the M-step fits the loadings to the current scores by least
//! squares. Both steps decrease the reconstruction error, so the error history
//! is non-increasing.
//!
//! The converged loadings span the principal subspace but are neither
//! orthonormal nor ordered. The final solution is therefore rotated: the
//! loadings are orthonormalized by QR decomposition and rotated by the
//! eigenvectors of the score covariance, which orders the components by
//! descending variance and makes them comparable to the [SVD solution](pca_svd)
//! up to sign.
//!
//! # References
//!
//! \[1\] [EM Algorithms for PCA and
//! SPCA](https://papers.nips.cc/paper/1997/hash/d9731321ef4e063ebbee79298fa36f56-Abstract.html)

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::{EmDriver, EmError, EmModel, EmOptions};

/// Options for [`PcaEm`].
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct PcaOptions {
    /// Tolerance for the maximum absolute change of the scores. Default:
    /// `1e-8`.
    tolerance: f64,
    /// Maximum number of iterations. Default: `1000`.
    max_iters: usize,
    /// Seed for the random initial loadings. Default: `0`.
    seed: u64,
}

impl Default for PcaOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iters: 1000,
            seed: 0,
        }
    }
}

/// Principal components.
#[derive(Debug, Clone)]
pub struct Pca {
    /// Orthonormal loadings, one component per column (`p x k`).
    pub loadings: DMatrix<f64>,
    /// Component scores, one observation per row (`n x k`).
    pub scores: DMatrix<f64>,
    /// Variances of the components in descending order.
    pub variances: DVector<f64>,
    /// Column means used for centering.
    pub mean: DVector<f64>,
    /// Sum of squared residuals between the centered data and their
    /// reconstruction from `k` components.
    pub reconstruction_error: f64,
    /// Number of EM iterations (zero for the SVD solution).
    pub iterations: usize,
    /// Whether the EM iteration converged (always true for the SVD solution).
    pub converged: bool,
    /// Reconstruction error after each EM iteration.
    pub errors: Vec<f64>,
}

impl Pca {
    /// Reconstructs the data (including the mean) from the components.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let mut data = &self.scores * self.loadings.transpose();
        for mut row in data.row_iter_mut() {
            row += self.mean.transpose();
        }
        data
    }
}

/// PCA by expectation-maximization.
#[derive(Debug, Clone)]
pub struct PcaEm {
    centered: DMatrix<f64>,
    mean: DVector<f64>,
    k: usize,
    options: PcaOptions,
    errors: Vec<f64>,
}

fn center(data: &DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let mean = DVector::from_iterator(data.ncols(), data.column_iter().map(|col| col.mean()));

    let mut centered = data.clone();
    for (mut col, m) in centered.column_iter_mut().zip(mean.iter()) {
        col.add_scalar_mut(-m);
    }

    (centered, mean)
}

fn validate(data: &DMatrix<f64>, k: usize) -> Result<(), EmError> {
    let (n, p) = data.shape();

    if n < 2 {
        return Err(EmError::InvalidInput(format!(
            "at least two observations are required, got {}",
            n
        )));
    }

    if k == 0 || k > p.min(n - 1) {
        return Err(EmError::InvalidInput(format!(
            "number of components must be in [1, {}], got {}",
            p.min(n - 1),
            k
        )));
    }

    if data.iter().any(|v| !v.is_finite()) {
        return Err(EmError::InvalidInput("data contain non-finite values".to_string()));
    }

    Ok(())
}

fn squared_error(centered: &DMatrix<f64>, scores: &DMatrix<f64>, loadings: &DMatrix<f64>) -> f64 {
    (centered - scores * loadings.transpose()).norm_squared()
}

impl PcaEm {
    /// Initializes PCA of the data (one observation per row) with `k`
    /// components.
    pub fn new(data: &DMatrix<f64>, k: usize) -> Result<Self, EmError> {
        validate(data, k)?;
        let (centered, mean) = center(data);

        Ok(Self {
            centered,
            mean,
            k,
            options: PcaOptions::default(),
            errors: Vec::new(),
        })
    }

    /// Sets the options.
    pub fn with_options(mut self, options: PcaOptions) -> Self {
        self.options = options;
        self
    }

    /// Reconstruction errors recorded so far.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Runs the EM iteration and returns the rotated components.
    pub fn fit(self) -> Result<Pca, EmError> {
        let p = self.centered.ncols();
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let initial = DMatrix::from_fn(p, self.k, |_, _| rng.sample::<f64, _>(StandardNormal));

        let mut em_options = EmOptions::default();
        em_options
            .set_tolerance(self.options.tolerance)
            .set_max_iters(self.options.max_iters);

        let mut driver = EmDriver::with_options(self, initial, em_options);
        driver.run()?;

        let (fit, model) = driver.into_parts();
        let PcaEm {
            centered,
            mean,
            errors,
            ..
        } = model;

        debug!(
            "PCA by EM finished after {} iterations (converged: {})",
            fit.iterations, fit.converged
        );

        // Orthonormal basis of the principal subspace.
        let basis = fit.params.qr().q();
        let scores = &centered * &basis;

        let n = centered.nrows() as f64;
        let cov = scores.transpose() * &scores / (n - 1.0);
        let eigen = SymmetricEigen::new(cov);

        let mut order = (0..eigen.eigenvalues.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let rotation = DMatrix::from_fn(order.len(), order.len(), |i, j| {
            eigen.eigenvectors[(i, order[j])]
        });
        let variances =
            DVector::from_iterator(order.len(), order.iter().map(|&j| eigen.eigenvalues[j]));

        let loadings = basis * &rotation;
        let scores = scores * rotation;
        let reconstruction_error = squared_error(&centered, &scores, &loadings);

        Ok(Pca {
            loadings,
            scores,
            variances,
            mean,
            reconstruction_error,
            iterations: fit.iterations,
            converged: fit.converged,
            errors,
        })
    }
}

impl EmModel for PcaEm {
    type Params = DMatrix<f64>;
    type Latent = DMatrix<f64>;

    fn expectation(&mut self, loadings: &DMatrix<f64>) -> Result<DMatrix<f64>, EmError> {
        // Z = X W (W^T W)^-1, solved as (W^T W) Z^T = W^T X^T.
        let gram = loadings.tr_mul(loadings);
        let chol = gram.cholesky().ok_or(EmError::Singular {
            iteration: self.errors.len() + 1,
        })?;

        let rhs = loadings.tr_mul(&self.centered.transpose());
        Ok(chol.solve(&rhs).transpose())
    }

    fn maximization(&mut self, scores: &DMatrix<f64>) -> Result<DMatrix<f64>, EmError> {
        // W = X^T Z (Z^T Z)^-1, solved as (Z^T Z) W^T = Z^T X.
        let gram = scores.tr_mul(scores);
        let chol = gram.cholesky().ok_or(EmError::Singular {
            iteration: self.errors.len() + 1,
        })?;

        let loadings = chol.solve(&scores.tr_mul(&self.centered)).transpose();

        let error = squared_error(&self.centered, scores, &loadings);
        debug!("PCA iter = {}\terror = {}", self.errors.len() + 1, error);
        self.errors.push(error);

        Ok(loadings)
    }
}

/// PCA by the singular value decomposition of the centered data.
pub fn pca_svd(data: &DMatrix<f64>, k: usize) -> Result<Pca, EmError> {
    validate(data, k)?;
    let (centered, mean) = center(data);

    let svd = centered.clone().svd(true, true);
    let u = svd.u.ok_or(EmError::Decomposition)?;
    let v_t = svd.v_t.ok_or(EmError::Decomposition)?;
    let values = svd.singular_values;

    let mut order = (0..values.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order.truncate(k);

    let p = centered.ncols();
    let n = centered.nrows();

    let loadings = DMatrix::from_fn(p, k, |i, j| v_t[(order[j], i)]);
    let scores = DMatrix::from_fn(n, k, |i, j| u[(i, order[j])] * values[order[j]]);
    let variances = DVector::from_iterator(
        k,
        order.iter().map(|&j| values[j].powi(2) / (n as f64 - 1.0)),
    );
    let reconstruction_error = squared_error(&centered, &scores, &loadings);

    Ok(Pca {
        loadings,
        scores,
        variances,
        mean,
        reconstruction_error,
        iterations: 0,
        converged: true,
        errors: Vec::new(),
    })
}
