use rayon::prelude::*;
use serde::Serialize;

use crate::classifier::RankResult;
use crate::classifier::classes::class_classifier;
use crate::ir::{ClassGroup, ClassRef};

/// Tunables of a matching run. Fixed before the first rank call and
/// immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MatchConfig {
    /// Minimum aggregate score of the top candidate.
    pub(crate) threshold: f64,
    /// Minimum lead of the top candidate over the runner-up.
    pub(crate) margin: f64,
    /// Candidates with more zero-scoring classifiers than this are excluded.
    pub(crate) max_mismatch: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            margin: 0.05,
            max_mismatch: 4,
        }
    }
}

/// One committed class pair with its per-classifier breakdown.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct ClassMatch {
    pub(crate) old: String,
    pub(crate) new: String,
    pub(crate) score: f64,
    pub(crate) breakdown: Vec<FeatureScore>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct FeatureScore {
    pub(crate) feature: &'static str,
    pub(crate) score: f64,
}

/// Outcome of one matching run over two program versions.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct MatchReport {
    pub(crate) matches: Vec<ClassMatch>,
    pub(crate) unmatched: Vec<String>,
}

/// Rank every eligible old class against all eligible new classes and commit
/// a one-to-one mapping: a candidate is accepted when its score clears the
/// threshold and beats the runner-up by the margin, and commits happen
/// best-score-first so every new class is claimed at most once.
///
/// Both groups are immutable and the per-source rankings are independent,
/// so the rank loop runs in parallel.
pub(crate) fn match_classes(
    old: &ClassGroup,
    new: &ClassGroup,
    config: &MatchConfig,
) -> MatchReport {
    let set = class_classifier(config.max_mismatch);
    let sources = eligible(old);
    let candidates = eligible(new);

    let ranked: Vec<(ClassRef<'_>, Vec<RankResult<ClassRef<'_>>>)> = sources
        .par_iter()
        .map(|&src| (src, set.rank(src, &candidates)))
        .collect();

    let mut accepted = Vec::new();
    let mut unmatched = Vec::new();
    for (src, mut results) in ranked {
        let top_score = results.first().map_or(0.0, |result| result.score);
        let runner_up = results.get(1).map_or(0.0, |result| result.score);
        if results.is_empty()
            || top_score < config.threshold
            || top_score - runner_up < config.margin
        {
            log::debug!("no accepted candidate for {}", src.name());
            unmatched.push(src.name().to_string());
            continue;
        }
        accepted.push((src, results.swap_remove(0)));
    }

    accepted.sort_by(|a, b| {
        b.1.score
            .total_cmp(&a.1.score)
            .then_with(|| a.0.name().cmp(b.0.name()))
    });

    let mut claimed = vec![false; new.len()];
    let mut matches = Vec::new();
    for (src, result) in accepted {
        if claimed[result.candidate.id] {
            unmatched.push(src.name().to_string());
            continue;
        }
        claimed[result.candidate.id] = true;
        matches.push(ClassMatch {
            old: src.name().to_string(),
            new: result.candidate.name().to_string(),
            score: result.score,
            breakdown: result
                .breakdown
                .iter()
                .map(|entry| FeatureScore {
                    feature: entry.name,
                    score: entry.score,
                })
                .collect(),
        });
    }

    matches.sort_by(|a, b| a.old.cmp(&b.old));
    unmatched.sort();
    MatchReport { matches, unmatched }
}

/// Classes admitted to ranking: loaded from the input and carrying a
/// resolved parent, which the hierarchy-siblings classifier requires.
fn eligible(group: &ClassGroup) -> Vec<ClassRef<'_>> {
    group
        .ids()
        .filter(|&id| {
            let class = group.get(id);
            class.real && class.parent.is_some()
        })
        .map(|id| ClassRef { group, id })
        .collect()
}
