use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

pub(crate) mod classes;
pub(crate) mod util;

/// Named, weighted similarity function over a pair of same-kind entities.
/// A classifier is data, not a trait object; its scoring function is pure
/// and returns values in [0, 1].
pub(crate) struct Classifier<T: Copy> {
    pub(crate) name: &'static str,
    pub(crate) weight: u32,
    score: fn(T, T) -> f64,
}

/// Per-classifier score kept for diagnostics.
#[derive(Clone, Debug)]
pub(crate) struct ClassifierScore {
    pub(crate) name: &'static str,
    pub(crate) score: f64,
}

/// One scored candidate for a given source entity. Not mutated after
/// creation.
#[derive(Clone, Debug)]
pub(crate) struct RankResult<T> {
    pub(crate) candidate: T,
    pub(crate) score: f64,
    pub(crate) breakdown: Vec<ClassifierScore>,
}

/// Registry of weighted classifiers for one entity kind, plus the cheap
/// compatibility pre-filter and the mismatch threshold.
///
/// Registration happens during one-time setup; the first `rank` call freezes
/// the configuration and later registration panics.
pub(crate) struct ClassifierSet<T: Copy> {
    classifiers: Vec<Classifier<T>>,
    check: fn(T, T) -> bool,
    max_mismatch: usize,
    ranked: AtomicBool,
}

impl<T: Copy> ClassifierSet<T> {
    pub(crate) fn new(check: fn(T, T) -> bool, max_mismatch: usize) -> Self {
        Self {
            classifiers: Vec::new(),
            check,
            max_mismatch,
            ranked: AtomicBool::new(false),
        }
    }

    /// Register a classifier. Panics when ranking has already started or the
    /// weight is zero; both are programming errors, not runtime conditions.
    pub(crate) fn add_classifier(
        &mut self,
        name: &'static str,
        weight: u32,
        score: fn(T, T) -> f64,
    ) {
        assert!(
            !self.ranked.load(AtomicOrdering::Acquire),
            "classifier {name} registered after ranking started"
        );
        assert!(weight >= 1, "classifier {name} must have a weight of at least 1");
        self.classifiers.push(Classifier {
            name,
            weight,
            score,
        });
    }

    /// The structural compatibility pre-filter, also reused inside
    /// classifiers for recursive sub-comparisons so cyclic relation graphs
    /// terminate in O(1) per relation.
    pub(crate) fn potentially_equal(&self, a: T, b: T) -> bool {
        (self.check)(a, b)
    }

    /// Score the source against every compatible candidate and return the
    /// survivors ordered by descending aggregate score.
    ///
    /// The aggregate is the weighted mean Σ(weight × score) / Σ(weight).
    /// Candidates with more than `max_mismatch` zero-scoring classifiers are
    /// excluded entirely. Ties are broken by the first registered classifier
    /// that differentiates the pair, then by candidate order; the result is
    /// deterministic for identical inputs.
    pub(crate) fn rank(&self, src: T, dsts: &[T]) -> Vec<RankResult<T>> {
        assert!(!self.classifiers.is_empty(), "no classifiers registered");
        self.ranked.store(true, AtomicOrdering::Release);

        let total_weight: f64 = self
            .classifiers
            .iter()
            .map(|classifier| f64::from(classifier.weight))
            .sum();

        let mut results = Vec::new();
        'candidates: for &dst in dsts {
            if !(self.check)(src, dst) {
                continue;
            }
            let mut breakdown = Vec::with_capacity(self.classifiers.len());
            let mut weighted = 0.0;
            let mut mismatches = 0;
            for classifier in &self.classifiers {
                let score = (classifier.score)(src, dst);
                debug_assert!(
                    (0.0..=1.0).contains(&score),
                    "classifier {} returned {score} outside [0, 1]",
                    classifier.name
                );
                if score == 0.0 {
                    mismatches += 1;
                    if mismatches > self.max_mismatch {
                        continue 'candidates;
                    }
                }
                weighted += f64::from(classifier.weight) * score;
                breakdown.push(ClassifierScore {
                    name: classifier.name,
                    score,
                });
            }
            results.push(RankResult {
                candidate: dst,
                score: weighted / total_weight,
                breakdown,
            });
        }

        results.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                for (left, right) in a.breakdown.iter().zip(&b.breakdown) {
                    match right.score.total_cmp(&left.score) {
                        Ordering::Equal => continue,
                        order => return order,
                    }
                }
                Ordering::Equal
            })
        });
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any(_a: u32, _b: u32) -> bool {
        true
    }

    fn same_parity(a: u32, b: u32) -> bool {
        a % 2 == b % 2
    }

    fn closeness(a: u32, b: u32) -> f64 {
        util::compare_counts(a as usize, b as usize)
    }

    fn same_decade(a: u32, b: u32) -> f64 {
        if a / 10 == b / 10 { 1.0 } else { 0.0 }
    }

    fn always_one(_a: u32, _b: u32) -> f64 {
        1.0
    }

    fn set(check: fn(u32, u32) -> bool, max_mismatch: usize) -> ClassifierSet<u32> {
        let mut set = ClassifierSet::new(check, max_mismatch);
        set.add_classifier("closeness", 3, closeness);
        set.add_classifier("same decade", 1, same_decade);
        set
    }

    #[test]
    fn rank_is_sorted_and_deterministic() {
        let set = set(any, 8);
        let candidates = [40, 11, 10, 12];

        let first = set.rank(10, &candidates);
        let second = set.rank(10, &candidates);

        let names: Vec<u32> = first.iter().map(|result| result.candidate).collect();
        assert_eq!(names, vec![10, 11, 12, 40]);
        for window in first.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        let repeat: Vec<u32> = second.iter().map(|result| result.candidate).collect();
        assert_eq!(names, repeat);
    }

    #[test]
    fn aggregate_is_the_weighted_mean() {
        let set = set(any, 8);

        let results = set.rank(10, &[10]);

        // both classifiers score 1.0
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-9);

        let results = set.rank(10, &[5]);
        // closeness 0.5 at weight 3, same decade 0.0 at weight 1
        assert!((results[0].score - (3.0 * 0.5) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn pre_filter_excludes_incompatible_candidates() {
        let set = set(same_parity, 8);

        let results = set.rank(10, &[11, 12]);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate, 12);
        assert!(set.potentially_equal(10, 12));
        assert!(!set.potentially_equal(10, 11));
    }

    #[test]
    fn max_mismatch_excludes_candidates_before_scoring() {
        let set = set(any, 0);

        let results = set.rank(10, &[10, 50]);

        // 50 mismatches "same decade" and is dropped with max_mismatch 0
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate, 10);
    }

    fn same_parity_score(a: u32, b: u32) -> f64 {
        if a % 2 == b % 2 { 1.0 } else { 0.0 }
    }

    #[test]
    fn ties_break_by_registration_order() {
        let mut set = ClassifierSet::new(any, 8);
        set.add_classifier("same decade", 2, same_decade);
        set.add_classifier("same parity", 2, same_parity_score);

        // 19 scores (1, 0) and 24 scores (0, 1): equal aggregates, broken by
        // the first registered classifier that differentiates them.
        let results = set.rank(10, &[24, 19]);

        assert!((results[0].score - results[1].score).abs() < 1e-9);
        assert_eq!(results[0].candidate, 19);
        assert_eq!(results[1].candidate, 24);
    }

    #[test]
    fn breakdown_reports_every_classifier() {
        let set = set(any, 8);

        let results = set.rank(10, &[10]);

        let names: Vec<&str> = results[0]
            .breakdown
            .iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["closeness", "same decade"]);
    }

    #[test]
    #[should_panic(expected = "registered after ranking started")]
    fn registration_after_ranking_panics() {
        let mut set = set(any, 8);
        set.rank(10, &[10]);

        set.add_classifier("late", 1, always_one);
    }
}
