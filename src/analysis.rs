//! Various analyses supporting the estimation.

use nalgebra::RealField;

/// Estimates magnitude of the variable given lower and upper bounds.
///
/// The magnitude is the power of ten closest to the average absolute value of
/// the bounds. One is returned when the bounds do not carry the information
/// (infinite or both zero).
pub fn estimate_magnitude_from_bounds<T: RealField + Copy>(lower: T, upper: T) -> T {
    let ten = T::from_subset(&10.0);
    let half = T::from_subset(&0.5);

    let avg = half * (lower.abs() + upper.abs());
    let magnitude = ten.powf(avg.log10().trunc());

    // For [0, 0] range, the computed magnitude is undefined. Such ranges fix a
    // variable to a value.
    if magnitude.is_finite() && magnitude > T::zero() {
        magnitude
    } else {
        T::one()
    }
}

/// Relative change of a scalar between two consecutive iterations.
///
/// The change is measured relative to the greater of the two absolute values
/// and one, so values close to zero are compared absolutely.
pub fn relative_change<T: RealField + Copy>(prev: T, next: T) -> T {
    let denom = prev.abs().max(next.abs()).max(T::one());
    (prev - next).abs() / denom
}

/// Maximum absolute difference between two equally long sequences.
///
/// Returns infinity if the lengths differ, so a change of shape is never
/// mistaken for convergence.
pub fn max_abs_change<'a, T, I, J>(prev: I, next: J) -> T
where
    T: RealField + Copy,
    I: ExactSizeIterator<Item = &'a T>,
    J: ExactSizeIterator<Item = &'a T>,
{
    if prev.len() != next.len() {
        return T::from_subset(&f64::INFINITY);
    }

    prev.zip(next)
        .map(|(a, b)| (*a - *b).abs())
        .fold(T::zero(), |acc, d| if is_nan(acc) || d <= acc { acc } else { d })
}

fn is_nan<T: PartialOrd>(value: T) -> bool {
    value.partial_cmp(&value).is_none()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn magnitude() {
        assert_eq!(estimate_magnitude_from_bounds(-1e10f64, 1e10).log10(), 10.0);
        assert_eq!(estimate_magnitude_from_bounds(-1e4f64, -1e2).log10(), 3.0);
        assert_eq!(
            estimate_magnitude_from_bounds(-6e-6f64, 9e-6)
                .log10()
                .trunc(),
            -5.0
        );
    }

    #[test]
    fn magnitude_when_bound_is_infinite() {
        assert_eq!(estimate_magnitude_from_bounds(0.0f64, f64::INFINITY), 1.0);
        assert_eq!(
            estimate_magnitude_from_bounds(f64::NEG_INFINITY, f64::INFINITY),
            1.0
        );
    }

    #[test]
    fn magnitude_edge_cases() {
        assert_eq!(estimate_magnitude_from_bounds(0.0f64, 0.0), 1.0);
    }

    #[test]
    fn relative_change_near_zero_is_absolute() {
        assert_eq!(relative_change(0.0f64, 1e-3), 1e-3);
        assert_eq!(relative_change(100.0f64, 50.0), 0.5);
    }

    #[test]
    fn max_abs_change_basic() {
        let a = [1.0f64, 2.0, 3.0];
        let b = [1.5f64, 2.0, 1.0];
        assert_eq!(max_abs_change(a.iter(), b.iter()), 2.0);
        assert!(max_abs_change(a.iter(), b[..2].iter()).is_infinite());
        assert!(max_abs_change([f64::NAN].iter(), [0.0].iter()).is_nan());
        assert!(max_abs_change([1.0, f64::NAN, 1.0].iter(), [5.0, 0.0, 9.0].iter()).is_nan());
    }
}
