//! Raw records extracted from API pages.

use super::Endpoint;
use crate::Result;
use chrono::{DateTime, Utc};
use ohno::IntoAppError;
use serde::Deserialize;

/// What a comment was left on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentTarget {
    Issue,
    PullRequest,
}

/// The kind of activity a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    PullRequest,
    Commit,
    Issue,
    Review,
    Comment(CommentTarget),

    /// An item that does not have the shape its endpoint promises.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    Open,
    Closed,
    Merged,
}

/// One item of one API page, attributed to the identity it was fetched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: RecordKind,

    /// Repository in `owner/name` form.
    pub repository: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub state: Option<RecordState>,
    pub comment_count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<SearchItem>,
}

/// The subset of an issue search hit we care about
#[derive(Debug, Deserialize)]
struct SearchItem {
    repository_url: String,
    state: ItemState,
    created_at: DateTime<Utc>,
    #[serde(default)]
    comments: u64,
    pull_request: Option<PullRequestMarker>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ItemState {
    Open,
    Closed,
}

/// Present on search hits that are pull requests. `merged_at` is set once merged.
#[derive(Debug, Deserialize)]
struct PullRequestMarker {
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<CommitSignature>,
    committer: Option<CommitSignature>,
    #[serde(default)]
    comment_count: u64,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: DateTime<Utc>,
}

/// Parse one page body returned by `endpoint` into records attributed to `identity`.
///
/// # Errors
///
/// Fails when the body does not have the structure of the endpoint's response. Items that
/// parse but contradict the endpoint (an issue in a pull request search, say) come back as
/// [`RecordKind::Unknown`] instead.
pub fn parse_records(endpoint: &Endpoint, identity: &str, body: &[u8]) -> Result<Vec<RawRecord>> {
    match endpoint {
        Endpoint::Commits { repository } => {
            let items: Vec<CommitItem> =
                serde_json::from_slice(body).into_app_err_with(|| format!("parsing commit listing for '{repository}'"))?;

            Ok(items
                .into_iter()
                .filter_map(|item| {
                    let CommitDetail {
                        author,
                        committer,
                        comment_count,
                    } = item.commit;

                    let created_at = author.or(committer)?.date;
                    Some(RawRecord {
                        kind: RecordKind::Commit,
                        repository: repository.clone(),
                        author: identity.to_string(),
                        created_at,
                        state: None,
                        comment_count,
                    })
                })
                .collect())
        }

        _ => {
            let page: SearchPage =
                serde_json::from_slice(body).into_app_err_with(|| format!("parsing {endpoint} search results"))?;

            Ok(page.items.into_iter().map(|item| search_record(endpoint, identity, item)).collect())
        }
    }
}

fn search_record(endpoint: &Endpoint, identity: &str, item: SearchItem) -> RawRecord {
    let is_pull_request = item.pull_request.is_some();
    let merged = item.pull_request.as_ref().is_some_and(|pr| pr.merged_at.is_some());

    let state = match item.state {
        ItemState::Open => RecordState::Open,
        ItemState::Closed if merged => RecordState::Merged,
        ItemState::Closed => RecordState::Closed,
    };

    let kind = match (endpoint, is_pull_request) {
        (Endpoint::PullRequests, true) => RecordKind::PullRequest,
        (Endpoint::Issues, false) => RecordKind::Issue,
        (Endpoint::Reviews, true) => RecordKind::Review,
        (Endpoint::IssueComments, false) => RecordKind::Comment(CommentTarget::Issue),
        (Endpoint::PullRequestComments, true) => RecordKind::Comment(CommentTarget::PullRequest),
        _ => RecordKind::Unknown,
    };

    let (kind, repository) = match repository_name(&item.repository_url) {
        Some(name) => (kind, name),
        None => (RecordKind::Unknown, item.repository_url),
    };

    RawRecord {
        kind,
        repository,
        author: identity.to_string(),
        created_at: item.created_at,
        state: Some(state),
        comment_count: item.comments,
    }
}

/// Extract `owner/name` from a repository API URL such as `https://api.github.com/repos/owner/name`.
fn repository_name(repository_url: &str) -> Option<String> {
    let (rest, name) = repository_url.trim_end_matches('/').rsplit_once('/')?;
    let (_, owner) = rest.rsplit_once('/')?;

    if owner.is_empty() || name.is_empty() {
        return None;
    }

    Some(format!("{owner}/{name}"))
}
