//! Drives the fetch engine across every (organization, identity) pair.

use super::fetcher::{PageOutcome, PaginatedFetcher, RetryObserver};
use super::{
    CheckpointEntry, CheckpointStore, Diagnostic, DiagnosticKind, EndpointContext, EntryStatus, HttpTransport, PairKey,
    WindowSetting, parse_records,
};
use crate::Result;
use crate::metrics::{MetricTally, ScoreEngine, fold_all};
use chrono::Utc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use core::time::Duration;
use ohno::{AppError, IntoAppError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use strum::Display;
use tokio::sync::{Notify, Semaphore};

/// Log target for the orchestrator
const LOG_TARGET: &str = "  analysis";

/// Cooperative cancellation shared between the run and whoever may interrupt it.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Lifecycle of a pair within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairState {
    Pending,
    Fetching,
    Retrying,
    Complete,
    Failed,

    /// The run was cancelled; the checkpoint keeps the progress made so far.
    Interrupted,
}

impl PairState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fetching | Self::Complete | Self::Failed | Self::Interrupted)
                | (Self::Fetching, Self::Retrying | Self::Complete | Self::Failed | Self::Interrupted)
                | (Self::Retrying, Self::Fetching | Self::Failed | Self::Interrupted)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Interrupted)
    }
}

/// Tracks one pair's state and counts its retries.
#[derive(Debug)]
struct PairTracker {
    key: PairKey,
    state: Mutex<PairState>,
    retries: AtomicU32,
}

impl PairTracker {
    fn new(key: PairKey) -> Self {
        Self {
            key,
            state: Mutex::new(PairState::Pending),
            retries: AtomicU32::new(0),
        }
    }

    fn transition(&self, next: PairState) {
        let mut state = self.state.lock().expect("lock not poisoned");
        if state.can_transition_to(next) {
            log::trace!(target: LOG_TARGET, "{}: {} -> {next}", self.key, *state);
            *state = next;
        } else {
            log::debug!(target: LOG_TARGET, "{}: ignoring transition {} -> {next}", self.key, *state);
        }
    }

    fn state(&self) -> PairState {
        *self.state.lock().expect("lock not poisoned")
    }
}

impl RetryObserver for PairTracker {
    fn on_retry(&self, retry: u32, delay: Duration, error: &AppError) {
        let _ = self.retries.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            target: LOG_TARGET,
            "{}: request failed, retry {retry} in {}ms: {error}",
            self.key,
            delay.as_millis()
        );
        self.transition(PairState::Retrying);
    }

    fn on_resume(&self) {
        self.transition(PairState::Fetching);
    }
}

/// How one pair ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairOutcome {
    pub key: PairKey,
    pub state: PairState,
    pub retries: u32,
    pub pages_fetched: u64,

    /// Records that matched no known kind and were left out of the tally.
    pub skipped_records: u64,

    /// Whether the pair continued from a checkpoint written by an earlier run.
    pub resumed: bool,
}

/// Everything a run reports back.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<PairOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| o.state == PairState::Failed)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    #[must_use]
    pub fn count(&self, state: PairState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

/// A finished pair's tally and score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTally {
    pub tally: MetricTally,
    pub score: f64,
}

/// One identity's totals across every organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityTotal {
    pub identity: String,
    pub organizations: Vec<String>,
    pub tally: MetricTally,
    pub score: f64,
}

/// The finalized results handed to report renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub pairs: BTreeMap<PairKey, ScoredTally>,
}

impl Aggregate {
    /// Totals per identity, highest score first, ties broken by name.
    #[must_use]
    pub fn ranking(&self, scorer: &ScoreEngine) -> Vec<IdentityTotal> {
        let mut by_identity: BTreeMap<&str, (Vec<String>, MetricTally)> = BTreeMap::new();
        for (key, scored) in &self.pairs {
            let (organizations, tally) = by_identity.entry(key.identity.as_str()).or_default();
            organizations.push(key.organization.clone());
            *tally = core::mem::take(tally).merge(&scored.tally);
        }

        let mut totals: Vec<_> = by_identity
            .into_iter()
            .map(|(identity, (organizations, tally))| IdentityTotal {
                identity: identity.to_string(),
                organizations,
                score: scorer.score(&tally),
                tally,
            })
            .collect();

        totals.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.identity.cmp(&b.identity)));
        totals
    }
}

/// Why a pair stopped without reaching COMPLETE or FAILED through its fetches.
#[derive(Debug)]
struct PairError {
    kind: DiagnosticKind,
    error: AppError,
}

impl PairError {
    const fn storage(error: AppError) -> Self {
        Self {
            kind: DiagnosticKind::Storage,
            error,
        }
    }

    const fn request(error: AppError) -> Self {
        Self {
            kind: DiagnosticKind::Request,
            error,
        }
    }
}

/// Owns a resumable run over a set of pairs.
#[derive(Debug)]
pub struct AnalysisOrchestrator<T> {
    fetcher: PaginatedFetcher<T>,
    store: Arc<CheckpointStore>,
    scorer: ScoreEngine,
    context: EndpointContext,
    window: WindowSetting,
    concurrency: Semaphore,
    cancellation: Cancellation,
}

impl<T: HttpTransport> AnalysisOrchestrator<T> {
    pub fn new(
        fetcher: PaginatedFetcher<T>,
        store: CheckpointStore,
        scorer: ScoreEngine,
        context: EndpointContext,
        window: WindowSetting,
        max_concurrent_pairs: usize,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            fetcher,
            store: Arc::new(store),
            scorer,
            context,
            window,
            concurrency: Semaphore::new(max_concurrent_pairs.max(1)),
            cancellation,
        }
    }

    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    #[must_use]
    pub const fn scorer(&self) -> &ScoreEngine {
        &self.scorer
    }

    /// Process every pair not yet complete in the store.
    ///
    /// A pair that fails doesn't stop the others. Only problems with the store itself are
    /// returned as errors; everything else ends up in the summary.
    pub async fn run(&self, pairs: &[PairKey]) -> Result<RunSummary> {
        if let Err(e) = self.fetcher.prime_quota(&self.context.api_url).await {
            log::debug!(target: LOG_TARGET, "Could not prime rate limit state: {e:#}");
        }

        let loaded = self.with_store(|store| store.load()).await?;
        let mut summary = RunSummary {
            diagnostics: loaded.diagnostics,
            ..RunSummary::default()
        };

        let results = futures_util::future::join_all(pairs.iter().map(|key| self.process_pair(key, loaded.entries.get(key)))).await;

        for (outcome, diagnostics) in results {
            log::info!(target: LOG_TARGET, "{}: {}", outcome.key, outcome.state);
            summary.outcomes.push(outcome);
            summary.diagnostics.extend(diagnostics);
        }

        Ok(summary)
    }

    async fn process_pair(&self, key: &PairKey, previous: Option<&CheckpointEntry>) -> (PairOutcome, Vec<Diagnostic>) {
        let _permit = self.concurrency.acquire().await.expect("semaphore is never closed");

        let tracker = PairTracker::new(key.clone());
        let mut diagnostics = Vec::new();
        let mut resumed = false;

        let entry = match self.fetch_pair(&tracker, previous, &mut diagnostics, &mut resumed).await {
            Ok(entry) => entry,
            Err(PairError { kind, error }) => {
                log::error!(target: LOG_TARGET, "{key}: {error:#}");
                diagnostics.push(Diagnostic::for_pair(key, kind, format!("{error:#}")));
                tracker.transition(PairState::Failed);
                None
            }
        };

        let state = tracker.state();
        let skipped_records = entry.as_ref().map_or(0, |e| e.tally.skipped);
        if state == PairState::Complete && skipped_records > 0 {
            log::warn!(target: LOG_TARGET, "{key}: {skipped_records} record(s) of unknown kind were not counted");
            diagnostics.push(Diagnostic::for_pair(
                key,
                DiagnosticKind::SkippedRecords,
                format!("{skipped_records} record(s) of unknown kind were not counted"),
            ));
        }

        let outcome = PairOutcome {
            key: key.clone(),
            state,
            retries: tracker.retries.load(Ordering::Relaxed),
            pages_fetched: entry.map_or(0, |e| e.pages_fetched),
            skipped_records,
            resumed,
        };

        (outcome, diagnostics)
    }

    /// Walk a pair's endpoints from its checkpoint, saving after every page.
    async fn fetch_pair(
        &self,
        tracker: &PairTracker,
        previous: Option<&CheckpointEntry>,
        diagnostics: &mut Vec<Diagnostic>,
        resumed: &mut bool,
    ) -> Result<Option<CheckpointEntry>, PairError> {
        let key = &tracker.key;

        if self.cancellation.is_cancelled() {
            tracker.transition(PairState::Interrupted);
            return Ok(previous.cloned());
        }

        let durably_complete = match previous {
            Some(_) => {
                let key = key.clone();
                self.with_store(move |store| store.is_complete(&key)).await.map_err(PairError::storage)?
            }
            None => false,
        };

        let mut entry = match previous {
            // a relative window resolving to later dates is not a change
            Some(entry) if entry.window_setting != self.window => {
                log::info!(
                    target: LOG_TARGET,
                    "{key}: time window changed from {} to {}, starting over",
                    entry.window_setting,
                    self.window
                );
                self.reset(key).await?;
                self.fresh_entry(key)?
            }

            Some(entry) if entry.status == EntryStatus::Failed => {
                log::info!(target: LOG_TARGET, "{key}: previous attempt failed, starting over");
                self.reset(key).await?;
                self.fresh_entry(key)?
            }

            Some(entry) if durably_complete => {
                log::info!(target: LOG_TARGET, "{key}: already complete");
                *resumed = true;
                tracker.transition(PairState::Complete);
                return Ok(Some(entry.clone()));
            }

            Some(entry) => {
                log::info!(target: LOG_TARGET, "{key}: resuming after {} page(s)", entry.pages_fetched);
                *resumed = true;
                entry.clone()
            }

            None => self.fresh_entry(key)?,
        };

        self.save(&entry).await?;
        tracker.transition(PairState::Fetching);

        while let Some(cursor) = entry.cursor.clone() {
            let url = match &cursor.next_url {
                Some(url) => url.clone(),
                None => cursor
                    .endpoint
                    .first_page_url(&self.context, key, entry.window.as_ref())
                    .map_err(PairError::request)?,
            };

            log::debug!(target: LOG_TARGET, "{key}: fetching {} from '{url}'", cursor.endpoint);
            let parse = |body: &[u8]| parse_records(&cursor.endpoint, &key.identity, body);

            let fetched = tokio::select! {
                fetched = self.fetcher.fetch_page(&url, cursor.endpoint.bucket(), parse, tracker) => fetched,
                () = self.cancellation.cancelled() => {
                    // nothing of the in-flight page has been folded, so the checkpoint is intact
                    tracker.transition(PairState::Interrupted);
                    return Ok(Some(entry));
                }
            };

            match fetched {
                Ok(PageOutcome::Page { items, next, .. }) => {
                    entry.tally = fold_all(entry.tally, &items);
                    entry.pages_fetched += 1;
                    entry.cursor = cursor.advance(next, &entry.tally);
                }

                Ok(PageOutcome::Rejected { status, .. }) => {
                    let message = format!("HTTP {status} while fetching {}", cursor.endpoint);
                    log::warn!(target: LOG_TARGET, "{key}: {message}");
                    diagnostics.push(Diagnostic::for_pair(key, DiagnosticKind::PermanentFetch, message));

                    // pages after a rejected one are unreachable
                    if cursor.is_mid_endpoint() {
                        entry.lost_pages += 1;
                    }
                    entry.cursor = cursor.advance(None, &entry.tally);
                }

                Err(e) => {
                    log::error!(target: LOG_TARGET, "{key}: giving up: {e:#}");
                    diagnostics.push(Diagnostic::for_pair(
                        key,
                        DiagnosticKind::Fetch,
                        format!("fetching {} failed: {e:#}", cursor.endpoint),
                    ));

                    entry.status = EntryStatus::Failed;
                    entry.updated_at = Utc::now();
                    self.save(&entry).await?;
                    tracker.transition(PairState::Failed);
                    return Ok(Some(entry));
                }
            }

            if entry.cursor.is_none() {
                entry.status = if entry.lost_pages > 0 {
                    EntryStatus::Failed
                } else {
                    EntryStatus::Complete
                };
            }

            entry.updated_at = Utc::now();
            self.save(&entry).await?;

            if entry.cursor.is_some() && self.cancellation.is_cancelled() {
                tracker.transition(PairState::Interrupted);
                return Ok(Some(entry));
            }
        }

        if entry.status == EntryStatus::Failed {
            diagnostics.push(Diagnostic::for_pair(
                key,
                DiagnosticKind::PermanentFetch,
                format!("{} page(s) were unreachable; the pair will be fetched again next run", entry.lost_pages),
            ));
            tracker.transition(PairState::Failed);
        } else {
            if entry.status != EntryStatus::Complete {
                entry.status = EntryStatus::Complete;
                self.save(&entry).await?;
            }
            tracker.transition(PairState::Complete);
        }

        Ok(Some(entry))
    }

    /// A new entry for `key`, with the window anchored on today.
    fn fresh_entry(&self, key: &PairKey) -> Result<CheckpointEntry, PairError> {
        let now = Utc::now();
        let window = self.window.resolve(now.date_naive()).map_err(PairError::request)?;
        Ok(CheckpointEntry::new(key.clone(), self.window, window, now))
    }

    async fn save(&self, entry: &CheckpointEntry) -> Result<(), PairError> {
        let entry = entry.clone();
        self.with_store(move |store| store.save(&entry)).await.map_err(PairError::storage)
    }

    async fn reset(&self, key: &PairKey) -> Result<(), PairError> {
        let key = key.clone();
        self.with_store(move |store| store.reset(&key)).await.map_err(PairError::storage)
    }

    /// Run file system work against the store on the blocking thread pool.
    async fn with_store<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&CheckpointStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .into_app_err("checkpoint task panicked")?
    }

    /// Tallies and scores of every pair the store holds as complete.
    pub async fn finalize(&self, pairs: &[PairKey]) -> Result<Aggregate> {
        let keys = pairs.to_vec();
        let entries = self
            .with_store(move |store| keys.iter().map(|key| store.get(key)).collect::<Result<Vec<_>>>())
            .await?;

        let mut aggregate = Aggregate::default();
        for entry in entries.into_iter().flatten().filter(CheckpointEntry::is_complete) {
            let score = self.scorer.score(&entry.tally);
            let _ = aggregate.pairs.insert(entry.key.clone(), ScoredTally { tally: entry.tally, score });
        }

        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use PairState::{Complete, Failed, Fetching, Interrupted, Pending, Retrying};

        assert!(Pending.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Fetching));
        assert!(Retrying.can_transition_to(Failed));
        assert!(Fetching.can_transition_to(Complete));

        assert!(!Pending.can_transition_to(Retrying));
        assert!(!Retrying.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Fetching));
        assert!(!Failed.can_transition_to(Fetching));
        assert!(!Interrupted.can_transition_to(Fetching));

        assert!(Complete.is_terminal());
        assert!(!Retrying.is_terminal());
        assert_eq!(Interrupted.to_string(), "INTERRUPTED");
    }

    #[test]
    fn test_tracker_counts_retries() {
        let tracker = PairTracker::new(PairKey::new("Acme", "alice"));
        tracker.transition(PairState::Fetching);

        tracker.on_retry(1, Duration::from_millis(5), &ohno::app_err!("boom"));
        assert_eq!(tracker.state(), PairState::Retrying);
        tracker.on_resume();
        assert_eq!(tracker.state(), PairState::Fetching);

        // invalid transitions are ignored
        tracker.transition(PairState::Pending);
        assert_eq!(tracker.state(), PairState::Fetching);
        assert_eq!(tracker.retries.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_cancellation() {
        let cancellation = Cancellation::new();
        assert!(!cancellation.is_cancelled());

        let waiter = {
            let cancellation = cancellation.clone();
            tokio::spawn(async move { cancellation.cancelled().await })
        };

        cancellation.cancel();
        waiter.await.unwrap();
        assert!(cancellation.is_cancelled());

        // already cancelled resolves immediately
        cancellation.cancelled().await;
    }

    #[test]
    fn test_ranking() {
        let scorer = ScoreEngine::default();
        let tally = |commits| MetricTally {
            commits,
            ..MetricTally::default()
        };

        let mut aggregate = Aggregate::default();
        for (org, identity, commits) in [("Acme", "alice", 2), ("Other", "alice", 3), ("Acme", "bob", 4), ("Acme", "carol", 5)] {
            let tally = tally(commits);
            let score = scorer.score(&tally);
            let _ = aggregate.pairs.insert(PairKey::new(org, identity), ScoredTally { tally, score });
        }

        let ranking = aggregate.ranking(&scorer);
        let names: Vec<_> = ranking.iter().map(|t| t.identity.as_str()).collect();

        // alice and carol tie on 5 commits and are ordered by name
        assert_eq!(names, ["alice", "carol", "bob"]);
        assert_eq!(ranking[0].organizations, ["Acme", "Other"]);
        assert_eq!(ranking[0].tally.commits, 5);
    }

    #[tokio::test(flavor = "current_thread")]
    #[cfg_attr(miri, ignore = "Miri cannot do file locking")]
    async fn test_store_work_runs_off_the_runtime_thread() {
        use crate::facts::{RateLimitPolicy, RateLimiter, ReqwestTransport, RetryPolicy};

        let dir = tempfile::tempdir().unwrap();
        let fetcher = PaginatedFetcher::new(
            ReqwestTransport::new(None, Duration::from_secs(1)).unwrap(),
            RateLimiter::new(RateLimitPolicy::default()),
            RetryPolicy::default(),
        );
        let context = EndpointContext {
            api_url: url::Url::parse("https://api.test").unwrap(),
            page_size: 10,
        };
        let orchestrator = AnalysisOrchestrator::new(
            fetcher,
            CheckpointStore::open(dir.path()).await.unwrap(),
            ScoreEngine::default(),
            context,
            WindowSetting::AllTime,
            1,
            Cancellation::new(),
        );

        let runtime_thread = std::thread::current().id();
        let store_thread = orchestrator.with_store(|_| Ok(std::thread::current().id())).await.unwrap();
        assert_ne!(store_thread, runtime_thread);

        let entry = CheckpointEntry::new(PairKey::new("acme", "alice"), WindowSetting::AllTime, None, Utc::now());
        orchestrator.save(&entry).await.unwrap();
        assert_eq!(orchestrator.store().get(&entry.key).unwrap(), Some(entry));
    }
}
