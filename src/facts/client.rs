//! HTTP transport boundary and response classification.

use super::{QuotaBucket, QuotaSignal};
use crate::Result;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use core::time::Duration;
use ohno::IntoAppError;
use reqwest::header::{HeaderMap, HeaderValue, LINK, RETRY_AFTER};

/// A response as seen by the fetch engine.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Issues GET requests on behalf of the fetch engine.
///
/// The transport owns connection pooling, TLS and credentials. An `Err` means no HTTP response
/// was obtained at all (timeout, connection reset and the like); every response, whatever its
/// status, is returned as `Ok`.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, headers: &HeaderMap) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// Transport backed by a real `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport that authenticates with `token` when one is given.
    ///
    /// `timeout` applies to every individual call.
    pub fn new(token: Option<&str>, timeout: Duration) -> Result<Self> {
        use reqwest::header::AUTHORIZATION;

        let mut client_builder = reqwest::Client::builder().user_agent("contrib-rank");

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("Bearer {t}")).into_app_err("token contains invalid characters")?;
            auth_val.set_sensitive(true);

            let mut headers = HeaderMap::new();
            let _ = headers.insert(AUTHORIZATION, auth_val);

            client_builder = client_builder.default_headers(headers);
        }

        Ok(Self {
            client: client_builder.build()?,
            timeout,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse> {
        let resp = self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(self.timeout)
            .send()
            .await
            .into_app_err_with(|| format!("sending request to '{url}'"))?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .into_app_err_with(|| format!("reading response body from '{url}'"))?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// Headers sent with every API request.
#[must_use]
pub fn default_request_headers() -> HeaderMap {
    use reqwest::header::ACCEPT;

    let mut headers = HeaderMap::new();
    let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    let _ = headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
    headers
}

/// How the fetch engine should treat a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageResponse {
    /// The page is usable.
    Success,

    /// The quota is spent; wait until `reset_at` (when known) and re-issue the same request.
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// A client error other than rate limiting; retrying won't help.
    Rejected,

    /// A server-side or otherwise temporary problem; worth retrying.
    Transient,
}

/// Classify a response.
///
/// GitHub reports a spent quota either as 429 or as 403 with zero remaining calls, a
/// `retry-after` header or a message mentioning the rate limit. Any other 403 is a real
/// permission problem.
#[must_use]
pub fn classify(resp: &HttpResponse, now: DateTime<Utc>) -> PageResponse {
    match resp.status {
        200..=299 => PageResponse::Success,

        403 | 429 => {
            let retry_after = retry_after(&resp.headers);
            let quota = extract_quota(&resp.headers);
            let quota_spent = matches!(quota, QuotaSignal::Present { remaining: 0, .. });

            if resp.status == 429 || quota_spent || retry_after.is_some() || mentions_rate_limit(&resp.body) {
                let reset_at = retry_after
                    .and_then(|delay| TimeDelta::from_std(delay).ok())
                    .map(|delay| now + delay)
                    .or(match quota {
                        QuotaSignal::Present { reset_at, .. } => Some(reset_at),
                        QuotaSignal::Absent => None,
                    });

                PageResponse::RateLimited { reset_at }
            } else {
                PageResponse::Rejected
            }
        }

        408 => PageResponse::Transient,
        400..=499 => PageResponse::Rejected,
        _ => PageResponse::Transient,
    }
}

fn mentions_rate_limit(body: &[u8]) -> bool {
    String::from_utf8_lossy(body).to_ascii_lowercase().contains("rate limit")
}

/// Extract rate limit information from API response headers
#[must_use]
pub fn extract_quota(headers: &HeaderMap) -> QuotaSignal {
    let header = |name: &str| headers.get(name)?.to_str().ok();

    let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse::<u64>().ok());
    let reset_at = header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    match (remaining, reset_at) {
        (Some(remaining), Some(reset_at)) => QuotaSignal::Present { remaining, reset_at },
        _ => QuotaSignal::Absent,
    }
}

/// The quota bucket a response says it was charged against.
#[must_use]
pub fn resource_bucket(headers: &HeaderMap) -> Option<QuotaBucket> {
    QuotaBucket::from_resource(headers.get("x-ratelimit-resource")?.to_str().ok()?)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// The URL of the next page, taken from the `link` header.
#[must_use]
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;

    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params.split(';').any(|param| param.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }

        let url = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(url.to_string())
    })
}
