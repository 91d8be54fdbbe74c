//! Resumable collection of activity facts
//!
//! This module is the data-collection engine. For every (organization, identity) pair it walks
//! a fixed list of paginated API endpoints, folds each page into the pair's metric tally and
//! checkpoints the result, so that an interrupted run continues where it stopped instead of
//! starting over.
//!
//! # Implementation Model
//!
//! - [`HttpTransport`] is the boundary to the network. [`ReqwestTransport`] is the real one;
//!   tests script their own.
//! - [`RateLimiter`] is a single gate in front of every call. It remembers the latest quota
//!   signal per [`QuotaBucket`] and makes callers wait out a reset once the quota runs low.
//! - [`PaginatedFetcher`] fetches one page at a time, waiting out rate limits and retrying
//!   transient failures with exponential backoff.
//! - [`CheckpointStore`] keeps one JSON file per pair, replaced atomically after every page.
//! - [`AnalysisOrchestrator`] ties these together, runs pairs concurrently and isolates their
//!   failures from each other.
//!
//! Each pair walks pull requests, issues, reviews, issue comments and pull request comments,
//! then lists commits in every repository its pull requests touched. A
//! [`Cursor`] records the current endpoint and the next page link, which is all that is
//! needed to resume.

mod checkpoint;
mod checkpoint_lock;
mod client;
mod diagnostics;
mod endpoint;
mod fetcher;
mod members;
mod orchestrator;
mod rate_limiter;
mod records;
mod run_config;
mod time_window;

pub use checkpoint::{CheckpointEntry, CheckpointStore, EntryStatus, LoadedCheckpoints, PairKey};
pub use client::{HttpResponse, HttpTransport, PageResponse, ReqwestTransport, classify, extract_quota, next_link};
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use endpoint::{Cursor, Endpoint, EndpointContext, parse_api_url};
pub use fetcher::{PageOutcome, PaginatedFetcher, RetryObserver, RetryPolicy};
pub use members::discover_members;
pub use orchestrator::{
    Aggregate, AnalysisOrchestrator, Cancellation, IdentityTotal, PairOutcome, PairState, RunSummary, ScoredTally,
};
pub use rate_limiter::{QuotaBucket, QuotaSignal, RateLimitPolicy, RateLimiter};
pub use records::{CommentTarget, RawRecord, RecordKind, RecordState, parse_records};
pub use run_config::{Credential, RunConfig};
pub use time_window::{TimeWindow, WindowSetting};
