//! A scripted stand-in for the GitHub API, shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use bytes::Bytes;
use chrono::Utc;
use contrib_rank::Result;
use contrib_rank::facts::{
    AnalysisOrchestrator, Cancellation, CheckpointStore, EndpointContext, HttpResponse, HttpTransport, PaginatedFetcher, RateLimitPolicy,
    RateLimiter, RetryPolicy, WindowSetting,
};
use contrib_rank::metrics::{ScoreEngine, Weights};
use core::time::Duration;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;

pub const API_URL: &str = "https://api.test";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A 200 with `body`, linking to the following page when `has_next` is set
    Page { body: String, has_next: bool },

    /// A bare status code
    Status(u16),

    /// A 403 saying the quota is spent until `reset_in_secs` from now
    RateLimited { reset_in_secs: i64 },
}

#[derive(Debug, Default)]
struct Inner {
    // (route, page) -> replies, consumed front first with the last one sticking
    routes: Mutex<HashMap<(String, u32), Vec<Reply>>>,
    requests: Mutex<Vec<String>>,
    urls: Mutex<Vec<String>>,
    cancel_on: Mutex<Option<(String, u32, Cancellation)>>,
}

/// Fake API keyed by route and page number.
///
/// A route is the search query for `/search/issues` and `{path} author={login}` for commit
/// listings. Unscripted routes answer with an empty page.
#[derive(Debug, Clone, Default)]
pub struct FakeGitHub {
    inner: Arc<Inner>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, route: &str, page: u32, replies: Vec<Reply>) {
        let _ = self.inner.routes.lock().unwrap().insert((route.to_string(), page), replies);
    }

    pub fn page(&self, route: &str, page: u32, body: String, has_next: bool) {
        self.script(route, page, vec![Reply::Page { body, has_next }]);
    }

    /// Cancel `cancellation` while answering `route` at `page`.
    pub fn cancel_during(&self, route: &str, page: u32, cancellation: Cancellation) {
        *self.inner.cancel_on.lock().unwrap() = Some((route.to_string(), page, cancellation));
    }

    pub fn requests(&self) -> Vec<String> {
        self.inner.requests.lock().unwrap().clone()
    }

    /// Every requested URL, verbatim.
    pub fn urls(&self) -> Vec<String> {
        self.inner.urls.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.inner.requests.lock().unwrap().clear();
        self.inner.urls.lock().unwrap().clear();
    }

    /// How often `route` at `page` was requested.
    pub fn hits(&self, route: &str, page: u32) -> usize {
        let wanted = format!("{route} #{page}");
        self.requests().iter().filter(|r| **r == wanted).count()
    }

    fn answer(&self, url: &str) -> HttpResponse {
        let parsed = Url::parse(url).unwrap();
        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();

        if parsed.path() == "/rate_limit" {
            return response(404, HeaderMap::new(), "{}");
        }

        let route = match query.get("q") {
            Some(q) => strip_window(q),
            None => format!("{} author={}", parsed.path(), query.get("author").map_or("", String::as_str)),
        };
        let page: u32 = query.get("page").map_or(1, |p| p.parse().unwrap());

        self.inner.requests.lock().unwrap().push(format!("{route} #{page}"));
        self.inner.urls.lock().unwrap().push(url.to_string());

        if let Some((cancel_route, cancel_page, cancellation)) = &*self.inner.cancel_on.lock().unwrap()
            && *cancel_route == route
            && *cancel_page == page
        {
            cancellation.cancel();
        }

        let reply = {
            let mut routes = self.inner.routes.lock().unwrap();
            match routes.get_mut(&(route.clone(), page)) {
                Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
                Some(replies) => replies.first().cloned(),
                None => None,
            }
        };

        let mut headers = quota_headers(4999, 3600);
        match reply {
            Some(Reply::Page { body, has_next }) => {
                if has_next {
                    let mut next = parsed.clone();
                    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().filter(|(k, _)| k != "page").collect();
                    let _ = next
                        .query_pairs_mut()
                        .clear()
                        .extend_pairs(pairs)
                        .append_pair("page", &(page + 1).to_string());
                    let link = format!("<{next}>; rel=\"next\", <{next}>; rel=\"last\"");
                    let _ = headers.insert("link", HeaderValue::from_str(&link).unwrap());
                }
                response(200, headers, &body)
            }
            Some(Reply::Status(status)) => response(status, headers, r#"{"message": "scripted failure"}"#),
            Some(Reply::RateLimited { reset_in_secs }) => {
                response(403, quota_headers(0, reset_in_secs), r#"{"message": "API rate limit exceeded"}"#)
            }
            None if query.contains_key("q") => response(200, headers, &search_body(&[])),
            None => response(200, headers, "[]"),
        }
    }
}

impl HttpTransport for FakeGitHub {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<HttpResponse> {
        Ok(self.answer(url))
    }
}

fn strip_window(q: &str) -> String {
    q.split(' ').filter(|part| !part.starts_with("created:")).collect::<Vec<_>>().join(" ")
}

fn quota_headers(remaining: u64, reset_in_secs: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let reset = Utc::now().timestamp() + reset_in_secs;
    let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    let _ = headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    headers
}

fn response(status: u16, headers: HeaderMap, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
    }
}

pub fn search_body(items: &[String]) -> String {
    format!(r#"{{"total_count": {}, "incomplete_results": false, "items": [{}]}}"#, items.len(), items.join(","))
}

pub fn pull_request(repository: &str, merged: bool, open: bool) -> String {
    let state = if open { "open" } else { "closed" };
    let merged_at = if merged { r#""2024-03-02T10:00:00Z""# } else { "null" };
    format!(
        r#"{{"repository_url": "{API_URL}/repos/{repository}", "state": "{state}", "created_at": "2024-03-01T10:00:00Z", "comments": 0, "pull_request": {{"merged_at": {merged_at}}}}}"#
    )
}

pub fn issue(repository: &str, closed: bool) -> String {
    let state = if closed { "closed" } else { "open" };
    format!(r#"{{"repository_url": "{API_URL}/repos/{repository}", "state": "{state}", "created_at": "2024-02-01T10:00:00Z", "comments": 2}}"#)
}

pub fn commits(count: usize) -> String {
    let commit = r#"{"commit": {"author": {"date": "2024-03-01T09:00:00Z"}, "comment_count": 0}}"#;
    format!("[{}]", vec![commit; count].join(","))
}

pub fn pr_route(identity: &str, org: &str) -> String {
    format!("author:{identity} org:{org} is:pr")
}

pub fn issue_route(identity: &str, org: &str) -> String {
    format!("author:{identity} org:{org} is:issue")
}

pub fn commits_route(repository: &str, identity: &str) -> String {
    format!("/repos/{repository}/commits author={identity}")
}

/// Script alice@acme: three pages of pull requests (two merged, one open) across two
/// repositories, one closed issue and five commits.
pub fn script_alice(github: &FakeGitHub) {
    let prs = pr_route("alice", "acme");
    github.page(&prs, 1, search_body(&[pull_request("acme/api", true, false)]), true);
    github.page(&prs, 2, search_body(&[pull_request("acme/web", true, false)]), true);
    github.page(&prs, 3, search_body(&[pull_request("acme/api", false, true)]), false);

    github.page(&issue_route("alice", "acme"), 1, search_body(&[issue("acme/api", true)]), false);

    github.page(&commits_route("acme/api", "alice"), 1, commits(3), false);
    github.page(&commits_route("acme/web", "alice"), 1, commits(2), false);
}

pub fn test_policy() -> RateLimitPolicy {
    RateLimitPolicy {
        reserve: 0,
        safety_margin: Duration::from_millis(10),
        fallback_delay: Duration::from_millis(10),
        max_wait: Duration::from_secs(3),
    }
}

pub async fn orchestrator(github: &FakeGitHub, dir: &Path, cancellation: Cancellation) -> AnalysisOrchestrator<FakeGitHub> {
    orchestrator_with_window(github, dir, cancellation, WindowSetting::AllTime).await
}

pub async fn orchestrator_with_window(
    github: &FakeGitHub,
    dir: &Path,
    cancellation: Cancellation,
    window: WindowSetting,
) -> AnalysisOrchestrator<FakeGitHub> {
    orchestrator_for_api(github, dir, cancellation, window, Url::parse(API_URL).unwrap()).await
}

pub async fn orchestrator_for_api(
    github: &FakeGitHub,
    dir: &Path,
    cancellation: Cancellation,
    window: WindowSetting,
    api_url: Url,
) -> AnalysisOrchestrator<FakeGitHub> {
    let fetcher = PaginatedFetcher::new(
        github.clone(),
        RateLimiter::new(test_policy()),
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        },
    );

    let store = CheckpointStore::open(dir).await.unwrap();
    let context = EndpointContext { api_url, page_size: 1 };

    AnalysisOrchestrator::new(fetcher, store, ScoreEngine::new(Weights::default()), context, window, 2, cancellation)
}
