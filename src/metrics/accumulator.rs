//! Folding raw records into metric tallies.

use super::MetricTally;
use crate::facts::{CommentTarget, RawRecord, RecordKind, RecordState};
use core::borrow::Borrow;

/// Fold one record into a tally.
///
/// Every rule only increments counters or inserts into a set, so the final tally does not depend
/// on the order in which records (or pages of records) arrive.
#[must_use]
pub fn fold(mut tally: MetricTally, record: &RawRecord) -> MetricTally {
    match record.kind {
        RecordKind::PullRequest => {
            tally.pull_requests_total += 1;
            match record.state {
                Some(RecordState::Merged) => tally.pull_requests_merged += 1,
                Some(RecordState::Open) => tally.pull_requests_open += 1,
                Some(RecordState::Closed) | None => {}
            }
            let _ = tally.repos_touched.insert(record.repository.clone());
        }

        RecordKind::Commit => {
            tally.commits += 1;
            let _ = tally.repos_touched.insert(record.repository.clone());
        }

        // An authored issue is opened whatever its current state
        RecordKind::Issue => {
            tally.issues_opened += 1;
            if record.state == Some(RecordState::Closed) {
                tally.issues_closed += 1;
            }
        }

        RecordKind::Review => tally.reviews += 1,

        RecordKind::Comment(CommentTarget::Issue) => tally.issue_comments += 1,
        RecordKind::Comment(CommentTarget::PullRequest) => tally.pull_request_comments += 1,

        RecordKind::Unknown => tally.skipped += 1,
    }

    tally
}

/// Fold a batch of records, e.g. one fetched page.
#[must_use]
pub fn fold_all(tally: MetricTally, records: impl IntoIterator<Item = impl Borrow<RawRecord>>) -> MetricTally {
    records.into_iter().fold(tally, |tally, record| fold(tally, record.borrow()))
}
