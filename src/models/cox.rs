//! Cox proportional hazards model.

use nalgebra::{
    storage::{Storage, StorageMut},
    DMatrix, DVector, Dyn, IsContiguous, Vector,
};

use super::{check_finite, check_len, ModelError};
use crate::core::{Domain, Function, ParamLayout, Problem, ProblemError};

/// Returns indices that sort the times in ascending order.
///
/// Ties keep their original relative order.
pub fn ascending_order(time: &[f64]) -> Vec<usize> {
    let mut order: Vec<_> = (0..time.len()).collect();
    order.sort_by(|&a, &b| time[a].total_cmp(&time[b]));
    order
}

/// Negative partial log-likelihood of the Cox model with Breslow handling of
/// tied event times.
///
/// The data are kept in the order they were given. The caller supplies the
/// permutation `order` that lists the observations by ascending time, see
/// [`ascending_order`]. The parameters are the coefficients of the linear
/// predictor, one per column of the design matrix, which must not contain an
/// intercept.
#[derive(Debug, Clone)]
pub struct CoxPartialLikelihood {
    x: DMatrix<f64>,
    time: Vec<f64>,
    event: Vec<bool>,
    order: Vec<usize>,
    layout: ParamLayout,
}

impl CoxPartialLikelihood {
    /// Creates the model.
    ///
    /// `event[i]` is true if the observation `i` ended by an event and false
    /// if it was censored.
    pub fn new(
        x: DMatrix<f64>,
        time: Vec<f64>,
        event: Vec<bool>,
        order: Vec<usize>,
    ) -> Result<Self, ModelError> {
        let n = x.nrows();

        if n == 0 || x.ncols() == 0 {
            return Err(ModelError::InvalidData(String::from(
                "design matrix is empty",
            )));
        }

        check_len("times", n, time.len())?;
        check_len("event indicators", n, event.len())?;
        check_len("ordering", n, order.len())?;
        check_finite("design matrix", x.as_slice())?;
        check_finite("times", &time)?;

        let mut seen = vec![false; n];
        for &i in &order {
            match seen.get_mut(i) {
                Some(flag) if !*flag => *flag = true,
                _ => {
                    return Err(ModelError::InvalidOrdering(format!(
                        "index {} is out of range or repeated",
                        i
                    )))
                }
            }
        }

        if let Some(pos) = order.windows(2).position(|w| time[w[0]] > time[w[1]]) {
            return Err(ModelError::InvalidOrdering(format!(
                "times are not ascending at position {}",
                pos + 1
            )));
        }

        let layout = ParamLayout::new().with("beta", x.ncols());
        Ok(Self {
            x,
            time,
            event,
            order,
            layout,
        })
    }

    /// Layout of the parameter vector.
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Number of observed events.
    pub fn events(&self) -> usize {
        self.event.iter().filter(|&&e| e).count()
    }

    /// Walks the observations from the latest time to the earliest one,
    /// accumulating sums over the risk set. For every event `i`, calls
    /// `visit(i, log_risk, mean)` with the log of the summed risk scores and
    /// the risk-weighted mean of covariates over all observations with time
    /// at least the event time.
    fn for_each_event<Sx, V>(&self, beta: &Vector<f64, Dyn, Sx>, mut visit: V)
    where
        Sx: Storage<f64, Dyn>,
        V: FnMut(usize, f64, &DVector<f64>),
    {
        let eta = &self.x * beta;
        let shift = eta.max();
        let w = eta.map(|e| (e - shift).exp());

        let mut sum_w = 0.0;
        let mut sum_wx: DVector<f64> = DVector::zeros(self.x.ncols());

        let mut end = self.order.len();
        while end > 0 {
            // Group of tied times is order[start..end].
            let t = self.time[self.order[end - 1]];
            let mut start = end - 1;
            while start > 0 && self.time[self.order[start - 1]] == t {
                start -= 1;
            }

            for &i in &self.order[start..end] {
                sum_w += w[i];
                sum_wx.axpy(w[i], &self.x.row(i).transpose(), 1.0);
            }

            for &i in &self.order[start..end] {
                if self.event[i] {
                    visit(i, sum_w.ln() + shift, &(&sum_wx / sum_w));
                }
            }

            end = start;
        }
    }
}

impl Problem for CoxPartialLikelihood {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.x.ncols())
    }
}

impl Function for CoxPartialLikelihood {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Result<Self::Field, ProblemError>
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        let mut nll = 0.0;
        self.for_each_event(x, |i, log_risk, _| {
            nll += log_risk - self.x.row(i).dot(&x.transpose());
        });
        Ok(nll)
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
        let mut g: DVector<f64> = DVector::zeros(self.x.ncols());
        self.for_each_event(x, |i, _, mean| {
            g += mean - self.x.row(i).transpose();
        });
        grad.copy_from(&g);
        Ok(true)
    }
}
