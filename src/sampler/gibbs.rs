//! Collapsed Gibbs sampling of topic assignments.
//!
//! Every token of every document carries one topic label in `0..topics`. The
//! document-topic and word-topic count tables are kept equal to the
//! aggregation of the labels after every single-token update.
//!
//! Resampling a token of word `w` in document `d` uses the conditional
//!
//! ```text
//! p(z = k | rest) ∝ (n_dk + alpha) * (n_kw + beta) / (n_k + V * beta)
//! ```
//!
//! where the counts exclude the token itself and `V` is the vocabulary size.

use log::debug;
use nalgebra::DMatrix;
use rand::Rng;

use super::{categorical_draw, SamplerError};

/// Topic assignments of a corpus together with their count tables.
#[derive(Debug, Clone)]
pub struct TopicState {
    docs: Vec<Vec<usize>>,
    assignments: Vec<Vec<usize>>,
    doc_topic: DMatrix<usize>,
    word_topic: DMatrix<usize>,
    topic_totals: Vec<usize>,
    vocabulary: usize,
    topics: usize,
    alpha: f64,
    beta: f64,
    weights: Vec<f64>,
}

impl TopicState {
    /// Initializes the state with topics drawn uniformly at random.
    ///
    /// Documents are sequences of word ids in `0..vocabulary`.
    pub fn new<R: Rng + ?Sized>(
        docs: Vec<Vec<usize>>,
        vocabulary: usize,
        topics: usize,
        alpha: f64,
        beta: f64,
        rng: &mut R,
    ) -> Result<Self, SamplerError> {
        if topics == 0 {
            return Err(SamplerError::InvalidHyperparameter(String::from(
                "number of topics must be positive",
            )));
        }

        let assignments = docs
            .iter()
            .map(|doc| doc.iter().map(|_| rng.gen_range(0..topics)).collect())
            .collect();

        Self::from_assignments(docs, assignments, vocabulary, topics, alpha, beta)
    }

    /// Initializes the state from given topic assignments.
    ///
    /// The count tables are derived from the assignments.
    pub fn from_assignments(
        docs: Vec<Vec<usize>>,
        assignments: Vec<Vec<usize>>,
        vocabulary: usize,
        topics: usize,
        alpha: f64,
        beta: f64,
    ) -> Result<Self, SamplerError> {
        if topics == 0 {
            return Err(SamplerError::InvalidHyperparameter(String::from(
                "number of topics must be positive",
            )));
        }

        if vocabulary == 0 {
            return Err(SamplerError::InvalidHyperparameter(String::from(
                "vocabulary must not be empty",
            )));
        }

        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(SamplerError::InvalidHyperparameter(format!(
                "alpha must be positive, got {}",
                alpha
            )));
        }

        if !(beta.is_finite() && beta > 0.0) {
            return Err(SamplerError::InvalidHyperparameter(format!(
                "beta must be positive, got {}",
                beta
            )));
        }

        if assignments.len() != docs.len() {
            return Err(SamplerError::InvalidHyperparameter(format!(
                "{} documents but {} assignment rows",
                docs.len(),
                assignments.len()
            )));
        }

        let mut doc_topic: DMatrix<usize> = DMatrix::zeros(docs.len(), topics);
        let mut word_topic: DMatrix<usize> = DMatrix::zeros(vocabulary, topics);
        let mut topic_totals = vec![0; topics];

        for (d, (doc, labels)) in docs.iter().zip(assignments.iter()).enumerate() {
            if doc.len() != labels.len() {
                return Err(SamplerError::InvalidToken {
                    doc: d,
                    pos: doc.len().min(labels.len()),
                });
            }

            for (&w, &k) in doc.iter().zip(labels.iter()) {
                if w >= vocabulary {
                    return Err(SamplerError::InvalidLabel {
                        label: w,
                        bound: vocabulary,
                    });
                }

                if k >= topics {
                    return Err(SamplerError::InvalidLabel {
                        label: k,
                        bound: topics,
                    });
                }

                doc_topic[(d, k)] += 1;
                word_topic[(w, k)] += 1;
                topic_totals[k] += 1;
            }
        }

        Ok(Self {
            docs,
            assignments,
            doc_topic,
            word_topic,
            topic_totals,
            vocabulary,
            topics,
            alpha,
            beta,
            weights: vec![0.0; topics],
        })
    }

    /// Number of topics.
    pub fn topics(&self) -> usize {
        self.topics
    }

    /// Vocabulary size.
    pub fn vocabulary(&self) -> usize {
        self.vocabulary
    }

    /// Documents as word ids.
    pub fn docs(&self) -> &[Vec<usize>] {
        &self.docs
    }

    /// Topic label of every token.
    pub fn assignments(&self) -> &[Vec<usize>] {
        &self.assignments
    }

    /// Document-topic count table (documents × topics).
    pub fn doc_topic_counts(&self) -> &DMatrix<usize> {
        &self.doc_topic
    }

    /// Word-topic count table (words × topics).
    pub fn word_topic_counts(&self) -> &DMatrix<usize> {
        &self.word_topic
    }

    /// Number of tokens assigned to each topic.
    pub fn topic_totals(&self) -> &[usize] {
        &self.topic_totals
    }

    /// Resamples the topic of a single token and returns the new label.
    pub fn resample_token<R: Rng + ?Sized>(
        &mut self,
        doc: usize,
        pos: usize,
        rng: &mut R,
    ) -> Result<usize, SamplerError> {
        let (w, old) = match (self.docs.get(doc), self.assignments.get(doc)) {
            (Some(words), Some(labels)) if pos < words.len() => (words[pos], labels[pos]),
            _ => return Err(SamplerError::InvalidToken { doc, pos }),
        };

        self.remove(doc, w, old);

        let smoothing = self.vocabulary as f64 * self.beta;
        for k in 0..self.topics {
            let n_dk = self.doc_topic[(doc, k)] as f64;
            let n_kw = self.word_topic[(w, k)] as f64;
            let n_k = self.topic_totals[k] as f64;

            self.weights[k] = (n_dk + self.alpha) * (n_kw + self.beta) / (n_k + smoothing);
        }

        let new = match categorical_draw(&self.weights, rng) {
            Ok(new) => new,
            Err(error) => {
                self.add(doc, w, old);
                return Err(error);
            }
        };

        self.add(doc, w, new);
        self.assignments[doc][pos] = new;

        Ok(new)
    }

    /// Resamples every token once, documents in order and tokens left to
    /// right. Returns the number of tokens whose topic changed.
    pub fn sweep<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<usize, SamplerError> {
        let mut changed = 0;

        for doc in 0..self.docs.len() {
            for pos in 0..self.docs[doc].len() {
                let old = self.assignments[doc][pos];
                if self.resample_token(doc, pos, rng)? != old {
                    changed += 1;
                }
            }
        }

        debug!("gibbs sweep changed {} topic assignments", changed);

        Ok(changed)
    }

    /// Recomputes the count tables from the assignments and compares them
    /// with the maintained ones.
    pub fn check_counts(&self) -> bool {
        let mut doc_topic: DMatrix<usize> = DMatrix::zeros(self.docs.len(), self.topics);
        let mut word_topic: DMatrix<usize> = DMatrix::zeros(self.vocabulary, self.topics);
        let mut topic_totals = vec![0usize; self.topics];
        let mut occurrences = vec![0usize; self.vocabulary];

        for (d, (doc, labels)) in self.docs.iter().zip(self.assignments.iter()).enumerate() {
            for (&w, &k) in doc.iter().zip(labels.iter()) {
                doc_topic[(d, k)] += 1;
                word_topic[(w, k)] += 1;
                topic_totals[k] += 1;
                occurrences[w] += 1;
            }
        }

        let per_word = (0..self.vocabulary)
            .all(|w| self.word_topic.row(w).iter().sum::<usize>() == occurrences[w]);
        let per_doc = (0..self.docs.len())
            .all(|d| self.doc_topic.row(d).iter().sum::<usize>() == self.docs[d].len());

        per_word
            && per_doc
            && doc_topic == self.doc_topic
            && word_topic == self.word_topic
            && topic_totals == self.topic_totals
    }

    /// Smoothed topic proportions of each document (documents × topics).
    pub fn doc_topic_distribution(&self) -> DMatrix<f64> {
        let k_alpha = self.topics as f64 * self.alpha;

        DMatrix::from_fn(self.docs.len(), self.topics, |d, k| {
            (self.doc_topic[(d, k)] as f64 + self.alpha) / (self.docs[d].len() as f64 + k_alpha)
        })
    }

    /// Smoothed word probabilities of each topic (topics × words).
    pub fn topic_word_distribution(&self) -> DMatrix<f64> {
        let v_beta = self.vocabulary as f64 * self.beta;

        DMatrix::from_fn(self.topics, self.vocabulary, |k, w| {
            (self.word_topic[(w, k)] as f64 + self.beta) / (self.topic_totals[k] as f64 + v_beta)
        })
    }

    fn remove(&mut self, doc: usize, word: usize, topic: usize) {
        self.doc_topic[(doc, topic)] -= 1;
        self.word_topic[(word, topic)] -= 1;
        self.topic_totals[topic] -= 1;
    }

    fn add(&mut self, doc: usize, word: usize, topic: usize) {
        self.doc_topic[(doc, topic)] += 1;
        self.word_topic[(word, topic)] += 1;
        self.topic_totals[topic] += 1;
    }
}

/// Performs one Gibbs sweep over all tokens of the state.
pub fn gibbs_sweep<R: Rng + ?Sized>(
    state: &mut TopicState,
    rng: &mut R,
) -> Result<usize, SamplerError> {
    state.sweep(rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, SeedableRng};

    fn corpus() -> Vec<Vec<usize>> {
        // Words 0..5 and 5..10 never share a document.
        let mut docs = Vec::new();
        for d in 0..20 {
            let offset = if d % 2 == 0 { 0 } else { 5 };
            docs.push((0..30).map(|i| offset + (i * 7 + d) % 5).collect());
        }
        docs
    }

    #[test]
    fn counts_are_exact_after_every_token() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = TopicState::new(corpus(), 10, 3, 0.5, 0.1, &mut rng).unwrap();
        assert!(state.check_counts());

        for _ in 0..3 {
            for doc in 0..state.docs().len() {
                for pos in 0..state.docs()[doc].len() {
                    let k = state.resample_token(doc, pos, &mut rng).unwrap();
                    assert!(k < 3);
                    assert!(state.check_counts());
                }
            }
        }

        let total: usize = state.topic_totals().iter().sum();
        assert_eq!(total, 20 * 30);
    }

    #[test]
    fn same_seed_same_path() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut state = TopicState::new(corpus(), 10, 2, 0.5, 0.1, &mut rng).unwrap();
            for _ in 0..5 {
                gibbs_sweep(&mut state, &mut rng).unwrap();
            }
            state.assignments().to_vec()
        };

        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }

    #[test]
    fn separated_topics_are_recovered() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = TopicState::new(corpus(), 10, 2, 0.1, 0.01, &mut rng).unwrap();

        for _ in 0..200 {
            state.sweep(&mut rng).unwrap();
        }

        let theta = state.doc_topic_distribution();
        let dominant = |d: usize| if theta[(d, 0)] > theta[(d, 1)] { 0 } else { 1 };

        for d in 0..20 {
            assert!(theta[(d, dominant(d))] > 0.8);
            assert_eq!(dominant(d), dominant(d % 2));
        }
        assert_ne!(dominant(0), dominant(1));

        let phi = state.topic_word_distribution();
        for k in 0..2 {
            let sum: f64 = phi.row(k).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn given_assignments_are_counted() {
        let docs = vec![vec![0, 1, 1], vec![2]];
        let assignments = vec![vec![0, 1, 1], vec![0]];
        let state = TopicState::from_assignments(docs, assignments, 3, 2, 1.0, 1.0).unwrap();

        assert!(state.check_counts());
        assert_eq!(state.doc_topic_counts()[(0, 1)], 2);
        assert_eq!(state.word_topic_counts()[(1, 1)], 2);
        assert_eq!(state.topic_totals(), &[2, 2]);
    }

    #[test]
    fn invalid_input() {
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(
            TopicState::new(vec![vec![0, 3]], 3, 2, 1.0, 1.0, &mut rng).err(),
            Some(SamplerError::InvalidLabel { label: 3, bound: 3 })
        );
        assert!(matches!(
            TopicState::new(vec![vec![0]], 3, 0, 1.0, 1.0, &mut rng),
            Err(SamplerError::InvalidHyperparameter(_))
        ));
        assert!(matches!(
            TopicState::new(vec![vec![0]], 3, 2, 0.0, 1.0, &mut rng),
            Err(SamplerError::InvalidHyperparameter(_))
        ));
        assert_eq!(
            TopicState::from_assignments(vec![vec![0]], vec![vec![2]], 3, 2, 1.0, 1.0).err(),
            Some(SamplerError::InvalidLabel { label: 2, bound: 2 })
        );

        let mut state = TopicState::new(vec![vec![0, 1]], 3, 2, 1.0, 1.0, &mut rng).unwrap();
        assert_eq!(
            state.resample_token(0, 2, &mut rng),
            Err(SamplerError::InvalidToken { doc: 0, pos: 2 })
        );
        assert!(state.check_counts());
    }
}
