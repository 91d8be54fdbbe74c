use chrono::{DateTime, Utc};
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use strum::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Log target for the rate limiter
const LOG_TARGET: &str = "     quota";

/// The separately metered quota pools of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum QuotaBucket {
    Core,
    Search,
}

impl QuotaBucket {
    /// Map the value of an `x-ratelimit-resource` header to a bucket.
    #[must_use]
    pub fn from_resource(resource: &str) -> Option<Self> {
        match resource {
            "core" => Some(Self::Core),
            "search" => Some(Self::Search),
            _ => None,
        }
    }
}

/// What a response told us about the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaSignal {
    /// The response carried quota headers.
    Present { remaining: u64, reset_at: DateTime<Utc> },

    /// The response had no usable quota headers.
    Absent,
}

/// Decides how long to hold back before the next call.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Calls proceed freely while more than this many remain.
    pub reserve: u64,

    /// Added on top of the time until the quota resets.
    pub safety_margin: Duration,

    /// Used when the last response had no quota headers.
    pub fallback_delay: Duration,

    /// Upper bound on a single wait, in case of a bogus reset time.
    pub max_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            reserve: 5,
            safety_margin: Duration::from_secs(5),
            fallback_delay: Duration::from_secs(60),
            max_wait: Duration::from_secs(65 * 60),
        }
    }
}

impl RateLimitPolicy {
    const MIN_WAIT: Duration = Duration::from_millis(1);

    /// How long to wait before the next call given the latest signal for a bucket.
    ///
    /// No signal at all means nothing is known yet and the call proceeds. An exhausted or
    /// reserve-level quota always produces a non-zero wait, even when the reset time has
    /// already passed.
    #[must_use]
    pub fn required_wait(&self, signal: Option<&QuotaSignal>, now: DateTime<Utc>) -> Duration {
        match signal {
            None => Duration::ZERO,
            Some(QuotaSignal::Present { remaining, .. }) if *remaining > self.reserve => Duration::ZERO,
            Some(QuotaSignal::Present { reset_at, .. }) => {
                let until_reset = (*reset_at - now).to_std().unwrap_or(Duration::ZERO);
                (until_reset + self.safety_margin)
                    .min(self.max_wait)
                    .max(self.safety_margin.max(Self::MIN_WAIT))
            }
            Some(QuotaSignal::Absent) => self.fallback_delay.max(Self::MIN_WAIT),
        }
    }
}

/// A single gate shared by every concurrent fetcher.
///
/// Each admission is charged against the bucket's last known remaining count, so a burst of
/// concurrent callers cannot overrun a quota that a single earlier response reported.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    buckets: Mutex<HashMap<QuotaBucket, BucketState>>,
}

#[derive(Debug, Default)]
struct BucketState {
    signal: Option<QuotaSignal>,

    /// Set while callers of this bucket are waiting out a reset.
    resume_at: Option<Instant>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Wait until a call against `bucket` may proceed, returning how long that took.
    ///
    /// Callers of a paused bucket queue behind the pause. The lock is never held while
    /// sleeping, so other buckets and incoming quota signals are not held up.
    pub async fn admit(&self, bucket: QuotaBucket) -> Duration {
        let start = Instant::now();
        let mut paused = false;

        loop {
            let resume_at = {
                let mut buckets = self.buckets.lock().await;
                let state = buckets.entry(bucket).or_default();

                match state.resume_at {
                    Some(resume_at) if resume_at > Instant::now() => resume_at,

                    Some(_) => {
                        // the next response tells us what the new quota looks like
                        state.resume_at = None;
                        state.signal = None;
                        log::info!(target: LOG_TARGET, "Resuming {bucket} API requests");
                        continue;
                    }

                    None => {
                        let wait = self.policy.required_wait(state.signal.as_ref(), Utc::now());
                        if wait.is_zero() {
                            if let Some(QuotaSignal::Present { remaining, .. }) = &mut state.signal {
                                *remaining = remaining.saturating_sub(1);
                            }
                            return if paused { start.elapsed() } else { Duration::ZERO };
                        }

                        log::warn!(
                            target: LOG_TARGET,
                            "Quota for the {bucket} API is low, pausing requests for {}s",
                            wait.as_secs_f64().ceil()
                        );

                        let resume_at = Instant::now() + wait;
                        state.resume_at = Some(resume_at);
                        resume_at
                    }
                }
            };

            tokio::time::sleep_until(resume_at).await;
            paused = true;
        }
    }

    /// Record the quota reported by a response.
    ///
    /// Responses may arrive out of order, so an older reset window never overrides a newer one
    /// and within the same window the lowest remaining count wins.
    pub async fn observe(&self, bucket: QuotaBucket, signal: QuotaSignal) {
        let mut buckets = self.buckets.lock().await;
        let state = buckets.entry(bucket).or_default();

        let updated = match (state.signal, signal) {
            (
                Some(QuotaSignal::Present {
                    remaining: known,
                    reset_at: known_reset,
                }),
                QuotaSignal::Present { remaining, reset_at },
            ) => {
                if reset_at < known_reset {
                    return;
                }

                if reset_at == known_reset {
                    QuotaSignal::Present {
                        remaining: remaining.min(known),
                        reset_at,
                    }
                } else {
                    signal
                }
            }

            // a headerless response doesn't invalidate a known quota
            (Some(QuotaSignal::Present { .. }), QuotaSignal::Absent) => return,

            _ => signal,
        };

        state.signal = Some(updated);
    }

    /// Record that the server refused a call because the quota is spent.
    pub async fn observe_exhausted(&self, bucket: QuotaBucket, reset_at: Option<DateTime<Utc>>) {
        let signal = reset_at.map_or(QuotaSignal::Absent, |reset_at| QuotaSignal::Present { remaining: 0, reset_at });
        self.buckets.lock().await.entry(bucket).or_default().signal = Some(signal);
    }

    /// The last known signal for `bucket`.
    pub async fn signal(&self, bucket: QuotaBucket) -> Option<QuotaSignal> {
        self.buckets.lock().await.get(&bucket).and_then(|state| state.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            reserve: 2,
            safety_margin: Duration::from_millis(20),
            fallback_delay: Duration::from_millis(30),
            max_wait: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_no_signal_proceeds() {
        assert_eq!(policy().required_wait(None, Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_plenty_remaining_proceeds() {
        let signal = QuotaSignal::Present {
            remaining: 3,
            reset_at: Utc::now() + TimeDelta::minutes(30),
        };
        assert_eq!(policy().required_wait(Some(&signal), Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_reserve_waits_until_reset() {
        let now = Utc::now();
        let signal = QuotaSignal::Present {
            remaining: 2,
            reset_at: now + TimeDelta::seconds(3),
        };
        assert_eq!(policy().required_wait(Some(&signal), now), Duration::from_millis(3020));
    }

    #[test]
    fn test_exhausted_quota_never_proceeds() {
        let now = Utc::now();
        let zero_margin = RateLimitPolicy {
            safety_margin: Duration::ZERO,
            fallback_delay: Duration::ZERO,
            ..policy()
        };

        for offset in [-3600, -1, 0, 1, 60, 7200] {
            let signal = QuotaSignal::Present {
                remaining: 0,
                reset_at: now + TimeDelta::seconds(offset),
            };

            for policy in [policy(), zero_margin] {
                assert!(!policy.required_wait(Some(&signal), now).is_zero(), "offset {offset}");
            }
        }

        assert!(!zero_margin.required_wait(Some(&QuotaSignal::Absent), now).is_zero());
    }

    #[test]
    fn test_wait_is_capped() {
        let now = Utc::now();
        let signal = QuotaSignal::Present {
            remaining: 0,
            reset_at: now + TimeDelta::days(3),
        };
        assert_eq!(policy().required_wait(Some(&signal), now), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_headers_use_fallback() {
        assert_eq!(
            policy().required_wait(Some(&QuotaSignal::Absent), Utc::now()),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_bucket_from_resource() {
        assert_eq!(QuotaBucket::from_resource("search"), Some(QuotaBucket::Search));
        assert_eq!(QuotaBucket::from_resource("core"), Some(QuotaBucket::Core));
        assert_eq!(QuotaBucket::from_resource("graphql"), None);
        assert_eq!(QuotaBucket::Search.to_string(), "search");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_admit_charges_remaining() {
        let limiter = RateLimiter::new(policy());
        let reset_at = Utc::now() + TimeDelta::minutes(30);
        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 4, reset_at })
            .await;

        assert_eq!(limiter.admit(QuotaBucket::Core).await, Duration::ZERO);
        assert_eq!(limiter.admit(QuotaBucket::Core).await, Duration::ZERO);
        assert_eq!(
            limiter.signal(QuotaBucket::Core).await,
            Some(QuotaSignal::Present { remaining: 2, reset_at })
        );

        // the search bucket is independent
        assert_eq!(limiter.admit(QuotaBucket::Search).await, Duration::ZERO);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_admit_waits_when_exhausted() {
        let limiter = RateLimiter::new(policy());
        limiter.observe_exhausted(QuotaBucket::Search, Some(Utc::now())).await;

        let start = tokio::time::Instant::now();
        let waited = limiter.admit(QuotaBucket::Search).await;

        assert!(!waited.is_zero());
        assert!(start.elapsed() >= Duration::from_millis(15));

        // after waiting out the reset, the stale signal is dropped
        assert_eq!(limiter.signal(QuotaBucket::Search).await, None);
        assert_eq!(limiter.admit(QuotaBucket::Search).await, Duration::ZERO);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_concurrent_admissions_share_one_gate() {
        let limiter = RateLimiter::new(policy());
        let reset_at = Utc::now();
        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 3, reset_at })
            .await;

        let waits = futures_util::future::join_all((0..3).map(|_| limiter.admit(QuotaBucket::Core))).await;

        // the second admission hits the reserve, the third queues behind the same pause
        assert_eq!(waits.iter().filter(|w| w.is_zero()).count(), 1);
        assert!(waits.iter().all(|w| *w < Duration::from_secs(1)));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_paused_bucket_does_not_block_others() {
        let limiter = RateLimiter::new(policy());
        let reset_at = Utc::now() + TimeDelta::seconds(5);
        limiter.observe_exhausted(QuotaBucket::Search, Some(reset_at)).await;

        let paused = Arc::clone(&limiter);
        let search = tokio::spawn(async move { paused.admit(QuotaBucket::Search).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let core = tokio::time::timeout(Duration::from_millis(500), limiter.admit(QuotaBucket::Core)).await;
        assert_eq!(core.unwrap(), Duration::ZERO);

        let observed = tokio::time::timeout(
            Duration::from_millis(500),
            limiter.observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 10, reset_at }),
        )
        .await;
        assert!(observed.is_ok());
        assert!(!search.is_finished());

        search.abort();
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort on Windows")]
    async fn test_observe_ordering() {
        let limiter = RateLimiter::new(policy());
        let early = Utc::now();
        let late = early + TimeDelta::minutes(1);

        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 50, reset_at: late })
            .await;

        // same window: lower count wins, higher is ignored
        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 40, reset_at: late })
            .await;
        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 45, reset_at: late })
            .await;

        // older window is ignored, headerless response too
        limiter
            .observe(QuotaBucket::Core, QuotaSignal::Present { remaining: 1, reset_at: early })
            .await;
        limiter.observe(QuotaBucket::Core, QuotaSignal::Absent).await;

        assert_eq!(
            limiter.signal(QuotaBucket::Core).await,
            Some(QuotaSignal::Present {
                remaining: 40,
                reset_at: late
            })
        );
    }
}
