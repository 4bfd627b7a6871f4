//! Markov chain simulation and estimation.

use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, SeedableRng};

use super::{Categorical, SamplerError};

const STOCHASTIC_TOLERANCE: f64 = 1e-8;

/// Discrete-time Markov chain over states `0..n`.
///
/// ```rust
/// use estima::nalgebra::{dmatrix, dvector};
/// use estima::sampler::MarkovChain;
///
/// let chain = MarkovChain::new(dmatrix![0.7, 0.3; 0.9, 0.1], dvector![1.0, 0.0])
///     .expect("valid chain");
///
/// let path: Vec<_> = chain.path(100, 42).collect();
/// assert_eq!(path.len(), 100);
/// assert_eq!(path[0], 0);
/// ```
#[derive(Debug, Clone)]
pub struct MarkovChain {
    transition: DMatrix<f64>,
    initial: DVector<f64>,
    rows: Vec<Categorical>,
    start: Categorical,
}

impl MarkovChain {
    /// Creates the chain from a row-stochastic transition matrix and an
    /// initial state distribution.
    pub fn new(transition: DMatrix<f64>, initial: DVector<f64>) -> Result<Self, SamplerError> {
        let n = transition.nrows();

        if n == 0 || transition.ncols() != n {
            return Err(SamplerError::InvalidDistribution(format!(
                "transition matrix must be square and non-empty, got {}x{}",
                n,
                transition.ncols()
            )));
        }

        if initial.len() != n {
            return Err(SamplerError::InvalidDistribution(format!(
                "initial distribution has {} states, transition matrix {}",
                initial.len(),
                n
            )));
        }

        let rows = transition
            .row_iter()
            .enumerate()
            .map(|(i, row)| {
                let weights: Vec<f64> = row.iter().copied().collect();
                let dist = Categorical::new(&weights)?;
                let sum: f64 = weights.iter().sum();

                if (sum - 1.0).abs() > STOCHASTIC_TOLERANCE {
                    return Err(SamplerError::InvalidDistribution(format!(
                        "row {} sums to {}",
                        i, sum
                    )));
                }

                Ok(dist)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let start = Categorical::new(initial.as_slice())?;
        let sum = initial.sum();
        if (sum - 1.0).abs() > STOCHASTIC_TOLERANCE {
            return Err(SamplerError::InvalidDistribution(format!(
                "initial distribution sums to {}",
                sum
            )));
        }

        Ok(Self {
            transition,
            initial,
            rows,
            start,
        })
    }

    /// Number of states.
    pub fn states(&self) -> usize {
        self.transition.nrows()
    }

    /// Transition matrix.
    pub fn transition(&self) -> &DMatrix<f64> {
        &self.transition
    }

    /// Initial state distribution.
    pub fn initial(&self) -> &DVector<f64> {
        &self.initial
    }

    /// Lazily simulates a path of `len` states.
    ///
    /// Each call with the same seed yields the same path.
    pub fn path(&self, len: usize, seed: u64) -> Path<'_> {
        Path {
            chain: self,
            rng: StdRng::seed_from_u64(seed),
            state: None,
            remaining: len,
        }
    }

    /// Log-likelihood of a sequence under this chain's transition matrix.
    pub fn log_likelihood(&self, sequence: &[usize], floor: f64) -> Result<f64, SamplerError> {
        log_likelihood(&self.transition, sequence, floor)
    }
}

/// Finite path of a [`MarkovChain`].
#[derive(Debug, Clone)]
pub struct Path<'a> {
    chain: &'a MarkovChain,
    rng: StdRng,
    state: Option<usize>,
    remaining: usize,
}

impl Iterator for Path<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;

        let next = match self.state {
            None => self.chain.start.sample(&mut self.rng),
            Some(current) => self.chain.rows[current].sample(&mut self.rng),
        };

        self.state = Some(next);
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Path<'_> {}

/// Counts of observed transitions between consecutive states.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionCounts {
    counts: DMatrix<usize>,
}

impl TransitionCounts {
    /// Counts the transitions of a sequence over states `0..states`.
    pub fn from_sequence(states: usize, sequence: &[usize]) -> Result<Self, SamplerError> {
        if let Some(&label) = sequence.iter().find(|&&s| s >= states) {
            return Err(SamplerError::InvalidLabel {
                label,
                bound: states,
            });
        }

        let mut counts: DMatrix<usize> = DMatrix::zeros(states, states);
        for pair in sequence.windows(2) {
            counts[(pair[0], pair[1])] += 1;
        }

        Ok(Self { counts })
    }

    /// Raw counts, rows are the origin states.
    pub fn counts(&self) -> &DMatrix<usize> {
        &self.counts
    }

    /// Transition matrix estimated by row-normalized frequencies.
    ///
    /// Rows of states that were never left stay zero.
    pub fn estimate(&self) -> DMatrix<f64> {
        let mut estimate = self.counts.map(|c| c as f64);

        for mut row in estimate.row_iter_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }

        estimate
    }
}

/// Log-likelihood of the transitions of a sequence.
///
/// Transition probabilities below `floor` are raised to `floor`, so that an
/// unobserved transition gives a large finite penalty instead of negative
/// infinity.
pub fn log_likelihood(
    transition: &DMatrix<f64>,
    sequence: &[usize],
    floor: f64,
) -> Result<f64, SamplerError> {
    if !(floor.is_finite() && floor > 0.0) {
        return Err(SamplerError::InvalidHyperparameter(format!(
            "probability floor must be positive, got {}",
            floor
        )));
    }

    let n = transition.nrows();
    if transition.ncols() != n {
        return Err(SamplerError::InvalidDistribution(String::from(
            "transition matrix must be square",
        )));
    }

    if let Some(&label) = sequence.iter().find(|&&s| s >= n) {
        return Err(SamplerError::InvalidLabel { label, bound: n });
    }

    Ok(sequence
        .windows(2)
        .map(|pair| transition[(pair[0], pair[1])].max(floor).ln())
        .sum())
}
