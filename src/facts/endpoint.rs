//! The endpoints walked for every (organization, identity) pair.

use super::{PairKey, QuotaBucket, TimeWindow};
use crate::Result;
use crate::metrics::MetricTally;
use core::fmt::{Display, Formatter};
use core::ops::Bound;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use url::Url;

/// One paginated source of activity for a pair.
///
/// Endpoints are walked in declaration order. Commit listings come last, one per repository
/// the pair touched through its pull requests, in sorted repository order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    PullRequests,
    Issues,
    Reviews,
    IssueComments,
    PullRequestComments,
    Commits { repository: String },
}

/// Where a pair's walk currently stands.
///
/// `next_url` is `None` while the endpoint's first page has not been fetched yet; afterwards it
/// holds the server-provided link to the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub endpoint: Endpoint,
    pub next_url: Option<String>,
}

impl Cursor {
    #[must_use]
    pub const fn start(endpoint: Endpoint) -> Self {
        Self { endpoint, next_url: None }
    }

    /// Whether the cursor points past the first page of its endpoint.
    #[must_use]
    pub const fn is_mid_endpoint(&self) -> bool {
        self.next_url.is_some()
    }

    /// Move past one fetched page, onto the next page or the next endpoint.
    ///
    /// Returns `None` once every endpoint is exhausted.
    #[must_use]
    pub fn advance(self, next_url: Option<String>, tally: &MetricTally) -> Option<Self> {
        match next_url {
            Some(url) => Some(Self {
                endpoint: self.endpoint,
                next_url: Some(url),
            }),
            None => self.endpoint.successor(tally).map(Self::start),
        }
    }
}

/// Request parameters shared by every endpoint of a run.
#[derive(Debug, Clone)]
pub struct EndpointContext {
    pub api_url: Url,
    pub page_size: u8,
}

impl Endpoint {
    #[must_use]
    pub const fn first() -> Self {
        Self::PullRequests
    }

    /// The endpoint walked after this one.
    ///
    /// Commit listings are derived from the repositories in `tally`, so the successor of the
    /// last search is only known once the searches have been folded in.
    #[must_use]
    pub fn successor(&self, tally: &MetricTally) -> Option<Self> {
        let next_repository = |after: Bound<&String>| {
            tally
                .repos_touched
                .range::<String, _>((after, Bound::Unbounded))
                .next()
                .map(|repository| Self::Commits {
                    repository: repository.clone(),
                })
        };

        match self {
            Self::PullRequests => Some(Self::Issues),
            Self::Issues => Some(Self::Reviews),
            Self::Reviews => Some(Self::IssueComments),
            Self::IssueComments => Some(Self::PullRequestComments),
            Self::PullRequestComments => next_repository(Bound::Unbounded),
            Self::Commits { repository } => next_repository(Bound::Excluded(repository)),
        }
    }

    /// The quota bucket requests to this endpoint are charged against.
    #[must_use]
    pub const fn bucket(&self) -> QuotaBucket {
        match self {
            Self::Commits { .. } => QuotaBucket::Core,
            _ => QuotaBucket::Search,
        }
    }

    /// Build the URL of the endpoint's first page for `key`, restricted to `window` if given.
    pub fn first_page_url(&self, context: &EndpointContext, key: &PairKey, window: Option<&TimeWindow>) -> Result<String> {
        let identity = &key.identity;
        let organization = &key.organization;

        let mut query = match self {
            Self::Commits { repository } => return commits_url(context, repository, identity, window),
            Self::PullRequests => format!("author:{identity} org:{organization} is:pr"),
            Self::Issues => format!("author:{identity} org:{organization} is:issue"),
            Self::Reviews => format!("reviewed-by:{identity} org:{organization} is:pr"),
            Self::IssueComments => format!("commenter:{identity} org:{organization} is:issue"),
            Self::PullRequestComments => format!("commenter:{identity} org:{organization} is:pr"),
        };

        if let Some(window) = window {
            query.push(' ');
            query.push_str(&window.search_qualifier());
        }

        let mut url = context.api_url.clone();
        extend_path(&mut url, &["search", "issues"])?;
        let _ = url
            .query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("per_page", &context.page_size.to_string());

        Ok(url.into())
    }
}

fn commits_url(context: &EndpointContext, repository: &str, identity: &str, window: Option<&TimeWindow>) -> Result<String> {
    let (owner, name) = repository
        .split_once('/')
        .ok_or_else(|| app_err!("repository '{repository}' is not in owner/name form"))?;

    let mut url = context.api_url.clone();
    extend_path(&mut url, &["repos", owner, name, "commits"])?;
    {
        let mut pairs = url.query_pairs_mut();
        let _ = pairs
            .append_pair("author", identity)
            .append_pair("per_page", &context.page_size.to_string());

        if let Some(window) = window {
            let _ = pairs.append_pair("since", &window.since()).append_pair("until", &window.until());
        }
    }

    Ok(url.into())
}

fn extend_path(url: &mut Url, segments: &[&str]) -> Result<()> {
    let _ = url
        .path_segments_mut()
        .map_err(|()| app_err!("API URL cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PullRequests => write!(f, "pull requests"),
            Self::Issues => write!(f, "issues"),
            Self::Reviews => write!(f, "reviews"),
            Self::IssueComments => write!(f, "issue comments"),
            Self::PullRequestComments => write!(f, "pull request comments"),
            Self::Commits { repository } => write!(f, "commits in {repository}"),
        }
    }
}

/// Parse a configured API base URL.
pub fn parse_api_url(api_url: &str) -> Result<Url> {
    let url = Url::parse(api_url).into_app_err_with(|| format!("parsing API URL '{api_url}'"))?;
    if url.cannot_be_a_base() {
        return Err(app_err!("API URL '{api_url}' cannot be a base"));
    }

    Ok(url)
}
