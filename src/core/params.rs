//! Named groups of parameters.

use std::ops::Range;

/// Layout of a parameter vector partitioned into named contiguous groups.
///
/// ```rust
/// use estima::ParamLayout;
///
/// let layout = ParamLayout::new().with("beta", 3).with("sigma", 1);
/// let x = [1.0, 2.0, 3.0, 0.5];
///
/// assert_eq!(layout.dim(), 4);
/// assert_eq!(layout.get(&x, "beta"), Some(&x[0..3]));
/// assert_eq!(layout.get(&x, "sigma"), Some(&[0.5][..]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamLayout {
    groups: Vec<(&'static str, Range<usize>)>,
}

impl ParamLayout {
    /// Creates an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a group of given length.
    pub fn with(mut self, name: &'static str, len: usize) -> Self {
        self.push(name, len);
        self
    }

    /// Appends a group of given length.
    pub fn push(&mut self, name: &'static str, len: usize) {
        assert!(
            self.range(name).is_none(),
            "duplicate parameter group `{}`",
            name
        );

        let start = self.dim();
        self.groups.push((name, start..start + len));
    }

    /// Total number of parameters.
    pub fn dim(&self) -> usize {
        self.groups.last().map(|(_, range)| range.end).unwrap_or(0)
    }

    /// Gets the index range of a group.
    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.groups
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, range)| range.clone())
    }

    /// Gets the values of a group from a parameter vector.
    pub fn get<'x, T>(&self, x: &'x [T], name: &str) -> Option<&'x [T]> {
        self.range(name).and_then(|range| x.get(range))
    }

    /// Iterates over group names and ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Range<usize>)> + '_ {
        self.groups.iter().map(|(name, range)| (*name, range.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_contiguous() {
        let layout = ParamLayout::new()
            .with("beta", 2)
            .with("sigma", 1)
            .with("rho", 3);

        assert_eq!(layout.dim(), 6);
        assert_eq!(layout.range("beta"), Some(0..2));
        assert_eq!(layout.range("sigma"), Some(2..3));
        assert_eq!(layout.range("rho"), Some(3..6));
        assert_eq!(layout.range("gamma"), None);
    }

    #[test]
    fn get_from_short_vector() {
        let layout = ParamLayout::new().with("beta", 2).with("sigma", 1);
        assert_eq!(layout.get(&[1.0, 2.0], "sigma"), None);
    }

    #[test]
    #[should_panic(expected = "duplicate parameter group")]
    fn duplicate_group() {
        ParamLayout::new().with("beta", 2).with("beta", 1);
    }
}
