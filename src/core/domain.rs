//! Problem domain definition such as bound constraints for variables.

use std::iter::FromIterator;

use log::debug;
use nalgebra::{storage::StorageMut, Dim, Dyn, OVector, RealField, Vector, U1};
use thiserror::Error;

use crate::analysis::estimate_magnitude_from_bounds;

/// Error returned when the bounds of a domain are malformed.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    /// Domain without any variables.
    #[error("empty domain")]
    Empty,
    /// Lower and upper bounds (or scale) have different lengths.
    #[error("lower bounds have dimension {lower}, upper bounds have dimension {upper}")]
    DimensionMismatch {
        /// Length of lower bounds.
        lower: usize,
        /// Length of upper bounds or scale.
        upper: usize,
    },
    /// Lower bound is greater than the upper bound or one of them is NaN.
    #[error("invalid bounds for variable {index}: lower bound {lower} is not less or equal to upper bound {upper}")]
    InvalidBounds {
        /// Index of the variable.
        index: usize,
        /// Lower bound as given.
        lower: f64,
        /// Upper bound as given.
        upper: f64,
    },
}

/// Domain for a problem.
///
/// Each variable is bounded independently by a lower and an upper bound (box
/// constraints). Positive and negative infinity can be used to indicate value
/// unbounded in that dimension and direction.
#[derive(Debug, Clone)]
pub struct Domain<T: RealField + Copy> {
    lower: OVector<T, Dyn>,
    upper: OVector<T, Dyn>,
    scale: Option<OVector<T, Dyn>>,
}

impl<T: RealField + Copy> Domain<T> {
    /// Creates unconstrained domain with given dimension.
    pub fn unconstrained(dim: usize) -> Self {
        let inf = T::from_subset(&f64::INFINITY);
        let n = Dyn(dim);

        Self {
            lower: OVector::from_element_generic(n, U1, -inf),
            upper: OVector::from_element_generic(n, U1, inf),
            scale: None,
        }
    }

    /// Creates rectangular domain with given bounds.
    ///
    /// The bounds are not checked here. Use [`Domain::validate`] (which the
    /// [driver](crate::driver) does) before running an algorithm.
    pub fn rect(lower: Vec<T>, upper: Vec<T>) -> Self {
        Self {
            lower: OVector::from_vec_generic(Dyn(lower.len()), U1, lower),
            upper: OVector::from_vec_generic(Dyn(upper.len()), U1, upper),
            scale: None,
        }
    }

    /// Sets the lower bound of variable `i`.
    pub fn with_lower(mut self, i: usize, lower: T) -> Self {
        assert!(i < self.dim(), "variable index out of range");
        self.lower[i] = lower;
        self
    }

    /// Sets the upper bound of variable `i`.
    pub fn with_upper(mut self, i: usize, upper: T) -> Self {
        assert!(i < self.dim(), "variable index out of range");
        self.upper[i] = upper;
        self
    }

    /// Sets a custom scale for the domain.
    ///
    /// Scale value of a variable is the inverse of the expected magnitude of
    /// that variable.
    pub fn with_scale(mut self, scale: Vec<T>) -> Self {
        self.scale = Some(OVector::from_vec_generic(Dyn(scale.len()), U1, scale));
        self
    }

    /// Gets the dimension of the domain.
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// Gets the lower bounds.
    pub fn lower(&self) -> &OVector<T, Dyn> {
        &self.lower
    }

    /// Gets the upper bounds.
    pub fn upper(&self) -> &OVector<T, Dyn> {
        &self.upper
    }

    /// Determines whether any variable has a finite bound.
    pub fn is_constrained(&self) -> bool {
        self.lower
            .iter()
            .chain(self.upper.iter())
            .any(|bound| bound.is_finite())
    }

    /// Gets the scale of the variables.
    ///
    /// Scale can be either provided by [`Domain::with_scale`] or estimated from
    /// the bounds. Unbounded variables get the scale of one.
    pub fn scale(&self) -> OVector<T, Dyn> {
        match &self.scale {
            Some(scale) => scale.clone_owned(),
            None => {
                let scale = self
                    .lower
                    .iter()
                    .zip(self.upper.iter())
                    .map(|(&l, &u)| T::one() / estimate_magnitude_from_bounds(l, u));
                OVector::from_iterator_generic(Dyn(self.dim()), U1, scale)
            }
        }
    }

    /// Checks that the domain is well-formed.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.dim() == 0 {
            return Err(DomainError::Empty);
        }

        if self.lower.nrows() != self.upper.nrows() {
            return Err(DomainError::DimensionMismatch {
                lower: self.lower.nrows(),
                upper: self.upper.nrows(),
            });
        }

        if let Some(scale) = &self.scale {
            if scale.nrows() != self.dim() {
                return Err(DomainError::DimensionMismatch {
                    lower: self.dim(),
                    upper: scale.nrows(),
                });
            }
        }

        for (index, (&l, &u)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            // Negated comparison catches NaN too.
            if !(l <= u) {
                return Err(DomainError::InvalidBounds {
                    index,
                    lower: l.to_subset().unwrap_or(f64::NAN),
                    upper: u.to_subset().unwrap_or(f64::NAN),
                });
            }
        }

        Ok(())
    }

    /// Projects given point into the domain. Returns `true` if the point was
    /// not feasible.
    pub fn project<D, Sx>(&self, x: &mut Vector<T, D, Sx>) -> bool
    where
        D: Dim,
        Sx: StorageMut<T, D>,
    {
        let mut not_feasible = false;

        self.lower
            .iter()
            .zip(self.upper.iter())
            .zip(x.iter_mut())
            .for_each(|((li, ui), xi)| {
                if &*xi < li {
                    *xi = *li;
                    not_feasible = true;
                } else if &*xi > ui {
                    *xi = *ui;
                    not_feasible = true;
                }
            });

        if not_feasible {
            debug!("point projected into the domain");
        }

        not_feasible
    }

    /// Projects given point into the domain in given dimension.
    pub fn project_in<D, Sx>(&self, x: &mut Vector<T, D, Sx>, i: usize) -> bool
    where
        D: Dim,
        Sx: StorageMut<T, D>,
    {
        let li = self.lower[i];
        let ui = self.upper[i];
        let xi = &mut x[i];

        if *xi < li {
            *xi = li;
            true
        } else if *xi > ui {
            *xi = ui;
            true
        } else {
            false
        }
    }

    /// Determines whether given value of variable `i` lies inside the bounds.
    pub fn contains_in(&self, i: usize, value: T) -> bool {
        value >= self.lower[i] && value <= self.upper[i]
    }
}

impl<T: RealField + Copy> FromIterator<(T, T)> for Domain<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let (lower, upper): (Vec<_>, Vec<_>) = iter.into_iter().unzip();
        Self::rect(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    #[test]
    fn unconstrained_is_valid() {
        let dom = Domain::<f64>::unconstrained(3);
        assert_eq!(dom.dim(), 3);
        assert!(!dom.is_constrained());
        assert_eq!(dom.validate(), Ok(()));
    }

    #[test]
    fn invalid_bounds_are_reported() {
        let dom: Domain<f64> = [(0.0, 1.0), (2.0, 1.0)].into_iter().collect();
        assert_eq!(
            dom.validate(),
            Err(DomainError::InvalidBounds {
                index: 1,
                lower: 2.0,
                upper: 1.0
            })
        );
    }

    #[test]
    fn nan_bound_is_reported() {
        let dom = Domain::unconstrained(2).with_lower(0, f64::NAN);
        assert!(matches!(
            dom.validate(),
            Err(DomainError::InvalidBounds { index: 0, .. })
        ));
    }

    #[test]
    fn mismatched_bounds_are_reported() {
        let dom = Domain::rect(vec![0.0, 0.0], vec![1.0]);
        assert_eq!(
            dom.validate(),
            Err(DomainError::DimensionMismatch { lower: 2, upper: 1 })
        );
    }

    #[test]
    fn empty_domain() {
        assert_eq!(
            Domain::<f64>::unconstrained(0).validate(),
            Err(DomainError::Empty)
        );
    }

    #[test]
    fn projection() {
        let dom = Domain::unconstrained(3)
            .with_lower(0, 0.0)
            .with_upper(2, 1.0);

        let mut x = dvector![-1.0, -5.0, 3.0];
        assert!(dom.project(&mut x));
        assert_eq!(x, dvector![0.0, -5.0, 1.0]);

        let mut y = dvector![0.5, 0.0, 0.5];
        assert!(!dom.project(&mut y));
    }

    #[test]
    fn scale_from_bounds() {
        let dom = Domain::rect(vec![-100.0, f64::NEG_INFINITY], vec![100.0, f64::INFINITY]);
        let scale = dom.scale();
        assert_abs_diff_eq!(scale[0], 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(scale[1], 1.0);
    }
}
