//! Discrete-state sampling.
//!
//! The building block is the [categorical draw](Categorical): an index drawn
//! with probability proportional to non-negative weights. On top of it, there
//! is the [Gibbs sweep](gibbs) for topic assignments and [Markov chain](markov)
//! simulation.
//!
//! All functions take the random number generator explicitly. Runs that
//! should be independent must use independently seeded generators, for
//! example `StdRng::seed_from_u64` with distinct seeds.

pub mod gibbs;
pub mod markov;

use rand::{
    distributions::{Distribution, WeightedError, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};
use thiserror::Error;

pub use gibbs::{gibbs_sweep, TopicState};
pub use markov::{log_likelihood, MarkovChain, Path, TransitionCounts};

/// Error of the discrete-state sampling.
#[derive(Debug, Error, PartialEq)]
pub enum SamplerError {
    /// No weights were given.
    #[error("empty weight vector")]
    Empty,
    /// A weight is negative.
    #[error("weight {index} is negative")]
    NegativeWeight {
        /// Index of the weight.
        index: usize,
    },
    /// A weight is NaN or infinity.
    #[error("weight {index} is not finite")]
    NonFiniteWeight {
        /// Index of the weight.
        index: usize,
    },
    /// All weights are zero, there is no valid distribution.
    #[error("all weights are zero")]
    DegenerateDistribution,
    /// Malformed transition matrix or initial distribution.
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),
    /// A state or word label is outside the allowed range.
    #[error("label {label} is out of range [0, {bound})")]
    InvalidLabel {
        /// The label.
        label: usize,
        /// Number of allowed labels.
        bound: usize,
    },
    /// Invalid hyperparameter.
    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
    /// Position of a token outside the corpus.
    #[error("no token at document {doc}, position {pos}")]
    InvalidToken {
        /// Document index.
        doc: usize,
        /// Position in the document.
        pos: usize,
    },
}

/// Categorical distribution over indices `0..n`.
///
/// ```rust
/// use estima::sampler::Categorical;
/// use estima::rand::{rngs::StdRng, SeedableRng};
///
/// let dist = Categorical::new(&[0.0, 3.0, 0.0]).expect("valid weights");
/// let mut rng = StdRng::seed_from_u64(42);
///
/// assert_eq!(dist.sample(&mut rng), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Categorical {
    dist: WeightedIndex<f64>,
    len: usize,
}

impl Categorical {
    /// Creates the distribution from non-negative weights that need not sum
    /// to one.
    pub fn new(weights: &[f64]) -> Result<Self, SamplerError> {
        if weights.is_empty() {
            return Err(SamplerError::Empty);
        }

        for (index, &w) in weights.iter().enumerate() {
            if !w.is_finite() {
                return Err(SamplerError::NonFiniteWeight { index });
            }

            if w < 0.0 {
                return Err(SamplerError::NegativeWeight { index });
            }
        }

        let dist = WeightedIndex::new(weights).map_err(|error| match error {
            WeightedError::NoItem => SamplerError::Empty,
            WeightedError::AllWeightsZero => SamplerError::DegenerateDistribution,
            _ => SamplerError::InvalidDistribution(error.to_string()),
        })?;

        Ok(Self {
            dist,
            len: weights.len(),
        })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false, a distribution cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Draws an index.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.dist.sample(rng)
    }
}

impl Distribution<usize> for Categorical {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.dist.sample(rng)
    }
}

/// Draws a single index with probability proportional to the weights.
pub fn categorical_draw<R: Rng + ?Sized>(
    weights: &[f64],
    rng: &mut R,
) -> Result<usize, SamplerError> {
    Ok(Categorical::new(weights)?.sample(rng))
}

/// Draws a single index with a generator seeded by `seed`.
///
/// Equal seeds give equal draws.
pub fn categorical_draw_seeded(weights: &[f64], seed: u64) -> Result<usize, SamplerError> {
    let mut rng = StdRng::seed_from_u64(seed);
    categorical_draw(weights, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_match_weights() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let total: f64 = weights.iter().sum();
        let n = 20_000;

        let dist = Categorical::new(&weights).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);

        let mut counts = [0usize; 4];
        for _ in 0..n {
            counts[dist.sample(&mut rng)] += 1;
        }

        let chi2: f64 = counts
            .iter()
            .zip(weights.iter())
            .map(|(&observed, &w)| {
                let expected = n as f64 * w / total;
                (observed as f64 - expected).powi(2) / expected
            })
            .sum();

        // 99.9% quantile of chi-squared distribution with 3 degrees of
        // freedom.
        assert!(chi2 < 16.27, "chi2 = {}", chi2);
    }

    #[test]
    fn single_positive_weight() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(categorical_draw(&[0.0, 0.0, 5.0, 0.0], &mut rng), Ok(2));
        }
    }

    #[test]
    fn seeded_draw_is_reproducible() {
        let weights = [0.2, 0.3, 0.5];
        let first = categorical_draw_seeded(&weights, 99).unwrap();
        for _ in 0..10 {
            assert_eq!(categorical_draw_seeded(&weights, 99), Ok(first));
        }
    }

    #[test]
    fn invalid_weights() {
        assert_eq!(Categorical::new(&[]).err(), Some(SamplerError::Empty));
        assert_eq!(
            Categorical::new(&[0.0, 0.0]).err(),
            Some(SamplerError::DegenerateDistribution)
        );
        assert_eq!(
            Categorical::new(&[1.0, -0.5]).err(),
            Some(SamplerError::NegativeWeight { index: 1 })
        );
        assert_eq!(
            Categorical::new(&[f64::NAN, 1.0]).err(),
            Some(SamplerError::NonFiniteWeight { index: 0 })
        );
        assert_eq!(
            categorical_draw_seeded(&[0.0], 0),
            Err(SamplerError::DegenerateDistribution)
        );
    }
}
