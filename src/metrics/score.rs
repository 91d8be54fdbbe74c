use super::MetricTally;
use serde::{Deserialize, Serialize};

/// Weights applied to a tally to produce a score.
///
/// Merged pull requests weigh the most, then reviews, commits, issues and finally comments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Weights {
    pub pull_requests_merged: f64,
    pub reviews: f64,
    pub commits: f64,
    pub issues_opened: f64,
    pub issues_closed: f64,
    pub comments: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            pull_requests_merged: 3.0,
            reviews: 2.0,
            commits: 1.0,
            issues_opened: 0.75,
            issues_closed: 0.75,
            comments: 0.5,
        }
    }
}

impl Weights {
    /// Name/value pairs, used for validation and display.
    #[must_use]
    pub const fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("pull_requests_merged", self.pull_requests_merged),
            ("reviews", self.reviews),
            ("commits", self.commits),
            ("issues_opened", self.issues_opened),
            ("issues_closed", self.issues_closed),
            ("comments", self.comments),
        ]
    }
}

/// Turns a tally into a single comparable number.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreEngine {
    weights: Weights,
}

impl ScoreEngine {
    #[must_use]
    pub const fn new(weights: Weights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub const fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Weighted sum of the scored metrics.
    ///
    /// The terms are always summed in the same order, so equal tallies produce bit-identical
    /// scores. An all-zero tally scores exactly zero.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "activity counts are far below 2^52")]
    pub fn score(&self, tally: &MetricTally) -> f64 {
        let w = &self.weights;
        [
            (tally.pull_requests_merged, w.pull_requests_merged),
            (tally.reviews, w.reviews),
            (tally.commits, w.commits),
            (tally.issues_opened, w.issues_opened),
            (tally.issues_closed, w.issues_closed),
            (tally.comments(), w.comments),
        ]
        .into_iter()
        .map(|(count, weight)| count as f64 * weight)
        .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tally_scores_zero() {
        let engine = ScoreEngine::default();
        assert!(engine.score(&MetricTally::default()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_sum() {
        let engine = ScoreEngine::new(Weights {
            pull_requests_merged: 3.0,
            reviews: 2.0,
            commits: 0.5,
            issues_opened: 1.0,
            issues_closed: 1.5,
            comments: 0.5,
        });

        let tally = MetricTally {
            pull_requests_total: 10,
            pull_requests_merged: 2,
            reviews: 1,
            commits: 4,
            issues_opened: 3,
            issues_closed: 2,
            issue_comments: 1,
            pull_request_comments: 1,
            ..MetricTally::default()
        };

        // 6 + 2 + 2 + 3 + 3 + 1; open/total pull requests are not scored
        assert!((engine.score(&tally) - 17.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_deterministic() {
        let engine = ScoreEngine::default();
        let tally = MetricTally {
            pull_requests_merged: 7,
            commits: 13,
            issue_comments: 3,
            ..MetricTally::default()
        };

        assert_eq!(engine.score(&tally).to_bits(), engine.score(&tally).to_bits());
        assert_eq!(engine.score(&tally).to_bits(), engine.score(&tally.clone()).to_bits());
    }

    #[test]
    fn test_default_weight_ordering() {
        let w = Weights::default();
        assert!(w.pull_requests_merged > w.reviews);
        assert!(w.reviews > w.commits);
        assert!(w.commits > w.issues_opened);
        assert!(w.issues_closed > w.comments);
    }

    #[test]
    fn test_weights_deserialize_partial() {
        let w: Weights = toml::from_str("commits = 4.0").unwrap();
        assert!((w.commits - 4.0).abs() < f64::EPSILON);
        assert!((w.pull_requests_merged - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weights_reject_unknown_fields() {
        let result: Result<Weights, _> = toml::from_str("stars = 1.0");
        let _ = result.unwrap_err();
    }
}
