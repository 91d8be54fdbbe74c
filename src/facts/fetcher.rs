//! Page-by-page walking of paginated endpoints.

use super::client::{HttpTransport, PageResponse, classify, default_request_headers, extract_quota, next_link, resource_bucket};
use super::{QuotaBucket, QuotaSignal, RateLimiter};
use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use futures_util::Stream;
use ohno::{AppError, EnrichableExt, IntoAppError, app_err};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;

/// Log target for the fetcher
const LOG_TARGET: &str = "     fetch";

/// Consecutive rate-limit refusals of one request tolerated before it counts as a failure.
const MAX_RATE_LIMITED_ATTEMPTS: u32 = 10;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries on top of the original attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// The backoff before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Notified as a request moves through its retries.
pub trait RetryObserver: Sync {
    /// A transient failure occurred and the request will be retried after `delay`.
    fn on_retry(&self, _retry: u32, _delay: Duration, _error: &AppError) {}

    /// The backoff elapsed and the request is being re-issued.
    fn on_resume(&self) {}
}

impl RetryObserver for () {}

/// The result of fetching one page.
#[derive(Debug)]
pub enum PageOutcome<T> {
    /// The page was fetched and parsed. `next` is the link to the following page, if any.
    Page { items: Vec<T>, next: Option<String>, retries: u32 },

    /// The server refused the request with a client error.
    Rejected { status: u16, retries: u32 },
}

/// Walks paginated endpoints, one admitted API call per page.
#[derive(Debug)]
pub struct PaginatedFetcher<T> {
    transport: T,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    headers: HeaderMap,
}

enum Attempt<T> {
    Done(PageOutcome<T>),
    RateLimited { bucket: QuotaBucket, reset_at: Option<DateTime<Utc>> },
    Failed(AppError),
}

impl<T: HttpTransport> PaginatedFetcher<T> {
    pub fn new(transport: T, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            retry,
            headers: default_request_headers(),
        }
    }

    #[must_use]
    pub const fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch and parse a single page.
    ///
    /// Rate-limit refusals are waited out and the same request re-issued without consuming a
    /// retry. Transient failures, including bodies that fail to parse, are retried with
    /// exponential backoff. Client errors are returned as [`PageOutcome::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns the last failure once the retry budget is spent.
    pub async fn fetch_page<R, F>(&self, url: &str, bucket: QuotaBucket, parse: F, observer: &dyn RetryObserver) -> Result<PageOutcome<R>>
    where
        F: Fn(&[u8]) -> Result<Vec<R>>,
    {
        let mut retries = 0;
        let mut rate_limited = 0;

        loop {
            let error = match self.attempt(url, bucket, &parse, retries).await {
                Attempt::Done(outcome) => return Ok(outcome),

                Attempt::RateLimited { bucket, reset_at } if rate_limited < MAX_RATE_LIMITED_ATTEMPTS => {
                    rate_limited += 1;
                    log::debug!(target: LOG_TARGET, "Request to '{url}' was rate limited, waiting for the {bucket} quota to reset");
                    self.limiter.observe_exhausted(bucket, reset_at).await;
                    continue;
                }

                Attempt::RateLimited { .. } => app_err!("still rate limited after {MAX_RATE_LIMITED_ATTEMPTS} waits"),

                Attempt::Failed(e) => e,
            };

            if retries >= self.retry.max_retries {
                return Err(error.enrich_with(|| format!("fetching '{url}' failed after {retries} retries")));
            }

            retries += 1;
            let delay = self.retry.delay_for(retries);
            log::debug!(
                target: LOG_TARGET,
                "Retrying '{url}' (attempt {}, delay {}ms): {error:#}",
                retries + 1,
                delay.as_millis()
            );

            observer.on_retry(retries, delay, &error);
            tokio::time::sleep(delay).await;
            observer.on_resume();
        }
    }

    async fn attempt<R, F>(&self, url: &str, bucket: QuotaBucket, parse: &F, retries: u32) -> Attempt<R>
    where
        F: Fn(&[u8]) -> Result<Vec<R>>,
    {
        let _ = self.limiter.admit(bucket).await;

        let resp = match self.transport.get(url, &self.headers).await {
            Ok(resp) => resp,
            Err(e) => return Attempt::Failed(e),
        };

        let charged = resource_bucket(&resp.headers).unwrap_or(bucket);
        self.limiter.observe(charged, extract_quota(&resp.headers)).await;

        match classify(&resp, Utc::now()) {
            PageResponse::Success => match parse(&resp.body) {
                Ok(items) => {
                    log::debug!(target: LOG_TARGET, "Fetched {} item(s) from '{url}'", items.len());
                    Attempt::Done(PageOutcome::Page {
                        items,
                        next: next_link(&resp.headers),
                        retries,
                    })
                }
                Err(e) => Attempt::Failed(e),
            },

            PageResponse::RateLimited { reset_at } => Attempt::RateLimited { bucket: charged, reset_at },

            PageResponse::Rejected => {
                log::debug!(target: LOG_TARGET, "Request to '{url}' was rejected with HTTP {}", resp.status);
                Attempt::Done(PageOutcome::Rejected {
                    status: resp.status,
                    retries,
                })
            }

            PageResponse::Transient => Attempt::Failed(app_err!("server responded with HTTP {}", resp.status)),
        }
    }

    /// Lazily walk every page of an endpoint, starting at `first_url`.
    ///
    /// The stream ends after the last page, after a rejected page, or after the first error.
    pub fn pages<'a, R, F>(
        &'a self,
        first_url: String,
        bucket: QuotaBucket,
        parse: &'a F,
        observer: &'a dyn RetryObserver,
    ) -> impl Stream<Item = Result<PageOutcome<R>>> + 'a
    where
        R: 'a,
        F: Fn(&[u8]) -> Result<Vec<R>>,
    {
        futures_util::stream::unfold(Some(first_url), move |url| async move {
            let url = url?;
            let outcome = self.fetch_page(&url, bucket, parse, observer).await;

            let next = match &outcome {
                Ok(PageOutcome::Page { next, .. }) => next.clone(),
                _ => None,
            };

            Some((outcome, next))
        })
    }

    /// Seed the limiter with the current quotas from the `/rate_limit` endpoint.
    ///
    /// That endpoint doesn't count against the quota, so it isn't admitted.
    pub async fn prime_quota(&self, api_url: &url::Url) -> Result<()> {
        let mut url = api_url.clone();
        let _ = url
            .path_segments_mut()
            .map_err(|()| app_err!("API URL cannot be a base"))?
            .pop_if_empty()
            .push("rate_limit");

        let resp = self.transport.get(url.as_str(), &self.headers).await?;
        if !(200..300).contains(&resp.status) {
            return Err(app_err!("querying '{url}' failed with HTTP {}", resp.status));
        }

        let status: RateLimitStatus = serde_json::from_slice(&resp.body).into_app_err("parsing rate limit status")?;
        for (bucket, resource) in [(QuotaBucket::Core, status.resources.core), (QuotaBucket::Search, status.resources.search)] {
            let Some(reset_at) = DateTime::from_timestamp(resource.reset, 0) else {
                continue;
            };

            log::debug!(target: LOG_TARGET, "{} {bucket} API call(s) remaining until {reset_at}", resource.remaining);
            self.limiter
                .observe(
                    bucket,
                    QuotaSignal::Present {
                        remaining: resource.remaining,
                        reset_at,
                    },
                )
                .await;
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitStatus {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitResource,
    search: RateLimitResource,
}

#[derive(Debug, Deserialize)]
struct RateLimitResource {
    remaining: u64,
    reset: i64,
}
