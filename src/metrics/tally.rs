use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumIter, IntoEnumIterator};

/// The metrics tracked for every (organization, identity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    PullRequestsTotal,
    PullRequestsMerged,
    PullRequestsOpen,
    Commits,
    IssuesOpened,
    IssuesClosed,
    Reviews,
    IssueComments,
    PullRequestComments,
    ReposTouched,
}

/// Per-(identity, organization) activity counters.
///
/// `repos_touched` keeps the actual repository names rather than a count so that folding the
/// same repository twice is harmless, which is what lets partial tallies be checkpointed and
/// resumed without double counting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricTally {
    pub pull_requests_total: u64,
    pub pull_requests_merged: u64,
    pub pull_requests_open: u64,
    pub commits: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
    pub reviews: u64,
    pub issue_comments: u64,
    pub pull_request_comments: u64,
    pub repos_touched: BTreeSet<String>,

    /// Records whose kind could not be classified. Diagnostics only, never scored.
    pub skipped: u64,
}

impl MetricTally {
    /// Comments on issues and pull requests combined.
    #[must_use]
    pub const fn comments(&self) -> u64 {
        self.issue_comments + self.pull_request_comments
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::PullRequestsTotal => self.pull_requests_total,
            Metric::PullRequestsMerged => self.pull_requests_merged,
            Metric::PullRequestsOpen => self.pull_requests_open,
            Metric::Commits => self.commits,
            Metric::IssuesOpened => self.issues_opened,
            Metric::IssuesClosed => self.issues_closed,
            Metric::Reviews => self.reviews,
            Metric::IssueComments => self.issue_comments,
            Metric::PullRequestComments => self.pull_request_comments,
            Metric::ReposTouched => self.repos_touched.len() as u64,
        }
    }

    /// Iterate over every metric in a fixed order.
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, u64)> + '_ {
        Metric::iter().map(|metric| (metric, self.get(metric)))
    }

    /// Returns `true` if nothing has been counted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics().all(|(_, value)| value == 0) && self.skipped == 0
    }

    /// Combine two tallies, e.g. to total one identity across organizations.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        self.pull_requests_total += other.pull_requests_total;
        self.pull_requests_merged += other.pull_requests_merged;
        self.pull_requests_open += other.pull_requests_open;
        self.commits += other.commits;
        self.issues_opened += other.issues_opened;
        self.issues_closed += other.issues_closed;
        self.reviews += other.reviews;
        self.issue_comments += other.issue_comments;
        self.pull_request_comments += other.pull_request_comments;
        self.repos_touched.extend(other.repos_touched.iter().cloned());
        self.skipped += other.skipped;
        self
    }
}
