//! Bounded retry around a store probe
//!
//! Attempt `k` (1-based) runs with a deadline of `k * base_timeout`; after a
//! transient failure the validator sleeps `k * backoff_unit` before attempt
//! `k + 1`. Success, absence and permanent errors end the loop immediately.
//! Running out of attempts on transient errors yields
//! [`CheckError::Exhausted`], which is never retried further.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::probe::StoreProbe;
use crate::models::{Event, ValidationOutcome};
use crate::types::CheckError;

/// Default number of probe attempts per event per store
pub const DEFAULT_ATTEMPT_LIMIT: u32 = 2;

/// Default sleep unit between attempts
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Retry configuration; only built through [`RetryPolicy::new`] or `Default`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum probe calls per check (at least 1)
    attempt_limit: u32,
    /// Sleep after failed attempt `k` is `k * backoff_unit`
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_limit: DEFAULT_ATTEMPT_LIMIT,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempt_limit: u32, backoff_unit: Duration) -> Self {
        Self {
            attempt_limit: attempt_limit.max(1),
            backoff_unit,
        }
    }

    pub fn attempt_limit(&self) -> u32 {
        self.attempt_limit
    }

    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    /// Deadline for the given 1-based attempt
    pub fn deadline(&self, base_timeout: Duration, attempt: u32) -> Duration {
        base_timeout.saturating_mul(attempt)
    }

    /// Sleep after the given failed 1-based attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// Terminal result of a retried check
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<R> {
    pub result: Result<Option<R>, CheckError>,
    /// Probe calls made
    pub attempts: u32,
}

/// Wraps one probe with the retry policy
pub struct RetryingValidator<P: ?Sized> {
    probe: Arc<P>,
    policy: RetryPolicy,
}

impl<P: ?Sized> Clone for RetryingValidator<P> {
    fn clone(&self) -> Self {
        Self {
            probe: Arc::clone(&self.probe),
            policy: self.policy,
        }
    }
}

impl<P: StoreProbe + ?Sized> RetryingValidator<P> {
    pub fn new(probe: Arc<P>, policy: RetryPolicy) -> Self {
        Self { probe, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn store_name(&self) -> &'static str {
        self.probe.store_name()
    }

    /// Run the probe until it succeeds, fails permanently or runs out of attempts
    pub async fn check(
        &self,
        event: &Event,
        key: &P::Key,
        base_timeout: Duration,
    ) -> Attempted<P::Record> {
        if let Err(e) = validate_event_fields(event) {
            return Attempted {
                result: Err(e),
                attempts: 0,
            };
        }

        let limit = self.policy.attempt_limit;
        let mut last_transient = None;

        for attempt in 1..=limit {
            let deadline = self.policy.deadline(base_timeout, attempt);
            match self.probe.probe(event, key, deadline).await {
                Err(e) if e.is_transient() => {
                    debug!(
                        store = self.probe.store_name(),
                        event_id = %event.id,
                        attempt,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    last_transient = Some(e);
                    if attempt < limit {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
                result => {
                    return Attempted {
                        result,
                        attempts: attempt,
                    }
                }
            }
        }

        let last = last_transient
            .unwrap_or_else(|| CheckError::Transient("no attempt recorded".into()));
        Attempted {
            result: Err(CheckError::Exhausted {
                attempts: limit,
                last: Box::new(last),
            }),
            attempts: limit,
        }
    }
}

impl<P> RetryingValidator<P>
where
    P: StoreProbe<Key = String, Record = u64> + ?Sized,
{
    /// Primary-store validation of one event, tagged with its batch offset
    pub async fn validate(
        &self,
        event: Arc<Event>,
        base_timeout: Duration,
        batch_offset: usize,
    ) -> ValidationOutcome {
        let collection = event.entity_type.clone();
        let attempted = self.check(&event, &collection, base_timeout).await;
        let (found, error) = match attempted.result {
            Ok(hit) => (hit.is_some(), None),
            Err(e) => (false, Some(e)),
        };

        ValidationOutcome {
            event,
            found,
            error,
            collection,
            batch_offset,
            attempts: attempted.attempts,
        }
    }
}

/// Reject events that cannot be looked up at all
pub fn validate_event_fields(event: &Event) -> Result<(), CheckError> {
    if event.id.is_empty() {
        return Err(CheckError::InvalidInput("event ID cannot be empty".into()));
    }
    if event.entity_type.is_empty() {
        return Err(CheckError::InvalidInput(
            "entity type cannot be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of answers, recording deadlines it was given
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<Option<u64>, CheckError>>>,
        calls: AtomicU32,
        deadlines: Mutex<Vec<Duration>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<Option<u64>, CheckError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                deadlines: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StoreProbe for ScriptedProbe {
        type Key = String;
        type Record = u64;

        fn store_name(&self) -> &'static str {
            "scripted"
        }

        async fn probe(
            &self,
            _event: &Event,
            _key: &String,
            deadline: Duration,
        ) -> Result<Option<u64>, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.deadlines.lock().unwrap().push(deadline);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Some(1)))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    fn event() -> Arc<Event> {
        Arc::new(Event::new("evt-1", "feed", "DETAIL_EXIT", "sess-1"))
    }

    fn timeout() -> CheckError {
        CheckError::Transient("count on feed".into())
    }

    #[tokio::test]
    async fn test_transient_twice_then_success_is_exhausted_at_limit_two() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(timeout()), Err(timeout()), Ok(Some(1))]));
        let validator = RetryingValidator::new(probe.clone(), fast_policy());

        let outcome = validator.validate(event(), Duration::from_secs(1), 1).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(!outcome.found);
        match outcome.error {
            Some(CheckError::Exhausted { attempts, ref last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(**last, timeout());
            }
            other => panic!("expected exhausted error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_after_one_call() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(CheckError::Permanent(
            "unauthorized".into(),
        ))]));
        let validator = RetryingValidator::new(probe.clone(), fast_policy());

        let outcome = validator.validate(event(), Duration::from_secs(1), 1).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error, Some(CheckError::Permanent("unauthorized".into())));
    }

    #[tokio::test]
    async fn test_deadline_escalates_linearly() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]));
        let validator =
            RetryingValidator::new(probe.clone(), RetryPolicy::new(3, Duration::from_millis(1)));

        validator.validate(event(), Duration::from_secs(5), 1).await;

        let deadlines = probe.deadlines.lock().unwrap().clone();
        assert_eq!(
            deadlines,
            vec![Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(15)]
        );
    }

    #[tokio::test]
    async fn test_retry_then_found() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(timeout()), Ok(Some(3))]));
        let validator = RetryingValidator::new(probe.clone(), fast_policy());

        let outcome = validator.validate(event(), Duration::from_secs(1), 7).await;

        assert!(outcome.found);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.batch_offset, 7);
        assert_eq!(outcome.collection, "feed");
    }

    #[tokio::test]
    async fn test_invalid_input_never_probes() {
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let validator = RetryingValidator::new(probe.clone(), fast_policy());

        let blank = Arc::new(Event::new("", "feed", "X", "s"));
        let outcome = validator.validate(blank, Duration::from_secs(1), 1).await;
        assert!(matches!(outcome.error, Some(CheckError::InvalidInput(_))));

        let untyped = Arc::new(Event::new("id", "", "X", "s"));
        let outcome = validator.validate(untyped, Duration::from_secs(1), 1).await;
        assert!(matches!(outcome.error, Some(CheckError::InvalidInput(_))));

        assert_eq!(outcome.attempts, 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_policy_clamps_zero_attempts() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.attempt_limit(), 1);
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_zero_attempt_policy_still_calls_store_once() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(timeout())]));
        let validator =
            RetryingValidator::new(probe.clone(), RetryPolicy::new(0, Duration::from_millis(1)));

        let outcome = validator.validate(event(), Duration::from_secs(1), 1).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.error,
            Some(CheckError::Exhausted { attempts: 1, .. })
        ));
    }
}
