//! Bounded fan-out / fan-in over one batch of events
//!
//! Every event gets its own task. A task waits for a semaphore permit, runs the
//! primary validator (and the escalator when configured), tags the outcome with
//! the batch tag and publishes it on a results channel sized to the batch. The
//! channel closes once the last task drops its sender, so the drain below needs
//! no fixed wait. Outcomes arrive in completion order, not input order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::escalate::CrossStoreEscalator;
use super::probe::PrimaryProbe;
use super::retry::RetryingValidator;
use crate::models::{CombinedOutcome, Event, ValidationOutcome};
use crate::types::CheckError;

/// Configuration for the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Deadline of the first attempt; later attempts scale linearly
    pub base_timeout: Duration,
    /// Maximum simultaneously in-flight events
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(15),
            max_concurrent: 10,
        }
    }
}

/// Per-batch tallies, logged after every run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub primary_found: usize,
    pub primary_missing: usize,
    pub secondary_found: usize,
    pub secondary_missing: usize,
    pub errors: usize,
}

impl BatchStats {
    pub fn from_outcomes(outcomes: &[CombinedOutcome]) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            match (&outcome.primary.error, outcome.primary.found) {
                (Some(_), _) => stats.errors += 1,
                (None, true) => stats.primary_found += 1,
                (None, false) => stats.primary_missing += 1,
            }
            if let Some(secondary) = &outcome.secondary {
                match (&secondary.error, secondary.found) {
                    (Some(_), _) => stats.errors += 1,
                    (None, true) => stats.secondary_found += 1,
                    (None, false) => stats.secondary_missing += 1,
                }
            }
        }
        stats
    }
}

/// Fans a batch out over the primary validator and optional escalator
pub struct Dispatcher {
    primary: RetryingValidator<PrimaryProbe>,
    escalator: Option<Arc<CrossStoreEscalator>>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Primary-store-only dispatcher
    pub fn new(primary: RetryingValidator<PrimaryProbe>, config: DispatchConfig) -> Self {
        Self {
            primary,
            escalator: None,
            config,
        }
    }

    /// Enable relational escalation for confirmed primary hits
    pub fn with_escalator(mut self, escalator: Arc<CrossStoreEscalator>) -> Self {
        self.escalator = Some(escalator);
        self
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Validate every event of one batch; returns exactly one outcome per event
    pub async fn run(&self, events: Vec<Event>, batch_tag: usize) -> Vec<CombinedOutcome> {
        if events.is_empty() {
            warn!(batch_tag, "No events to process");
            return Vec::new();
        }

        let total = events.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let (results_tx, mut results_rx) = mpsc::channel::<CombinedOutcome>(total);
        let mut handles: Vec<(Arc<Event>, JoinHandle<()>)> = Vec::with_capacity(total);

        for event in events {
            let event = Arc::new(event);
            let task_event = Arc::clone(&event);
            let semaphore = Arc::clone(&semaphore);
            let results_tx = results_tx.clone();
            let primary = self.primary.clone();
            let escalator = self.escalator.clone();
            let base_timeout = self.config.base_timeout;

            let handle = tokio::spawn(async move {
                // The semaphore is never closed; a failed acquire just runs unbounded
                let _permit = semaphore.acquire_owned().await.ok();

                let outcome = primary.validate(task_event, base_timeout, batch_tag).await;
                let combined = match &escalator {
                    Some(escalator) => escalator.escalate(outcome, base_timeout).await,
                    None => CombinedOutcome::primary_only(outcome),
                };

                log_outcome(&combined);
                // Capacity equals batch size, so this never waits on the consumer
                let _ = results_tx.send(combined).await;
            });
            handles.push((event, handle));
        }
        drop(results_tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = results_rx.recv().await {
            outcomes.push(outcome);
        }

        // A task that died before publishing still owes its event an outcome
        if outcomes.len() < total {
            for (event, handle) in handles {
                if let Err(join_error) = handle.await {
                    error!(event_id = %event.id, error = %join_error, "Validation task failed");
                    outcomes.push(CombinedOutcome::primary_only(ValidationOutcome {
                        collection: event.entity_type.clone(),
                        event,
                        found: false,
                        error: Some(CheckError::Permanent(format!(
                            "validation task failed: {}",
                            join_error
                        ))),
                        batch_offset: batch_tag,
                        attempts: 0,
                    }));
                }
            }
        }

        let stats = BatchStats::from_outcomes(&outcomes);
        info!(
            batch_tag,
            events = total,
            primary_found = stats.primary_found,
            primary_missing = stats.primary_missing,
            secondary_found = stats.secondary_found,
            secondary_missing = stats.secondary_missing,
            errors = stats.errors,
            max_concurrent = self.config.max_concurrent,
            "Batch processed"
        );

        outcomes
    }
}

fn log_outcome(outcome: &CombinedOutcome) {
    let primary = &outcome.primary;
    if let Some(e) = &primary.error {
        warn!(
            event_id = %primary.event.id,
            collection = %primary.collection,
            error = %e,
            "Error checking event"
        );
    } else if !primary.found {
        warn!(
            event_id = %primary.event.id,
            collection = %primary.collection,
            "Event not found in primary store"
        );
    }

    if let Some(secondary) = &outcome.secondary {
        match (&secondary.error, secondary.found) {
            (Some(e), _) => warn!(
                event_id = %secondary.event.id,
                error = %e,
                "Error checking event in secondary store"
            ),
            (None, false) => warn!(
                event_id = %secondary.event.id,
                event_name = %secondary.event.event_name,
                "Event missing in secondary store"
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SecondaryOutcome;
    use crate::validator::probe::StoreProbe;
    use crate::validator::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Finds every event whose id does not start with "missing"
    struct PrefixProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreProbe for PrefixProbe {
        type Key = String;
        type Record = u64;

        fn store_name(&self) -> &'static str {
            "prefix"
        }

        async fn probe(
            &self,
            event: &Event,
            _key: &String,
            _deadline: Duration,
        ) -> Result<Option<u64>, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok((!event.id.starts_with("missing")).then_some(1))
        }
    }

    fn dispatcher(probe: Arc<PrefixProbe>, max_concurrent: usize) -> Dispatcher {
        let probe: Arc<PrimaryProbe> = probe;
        Dispatcher::new(
            RetryingValidator::new(probe, RetryPolicy::new(2, Duration::from_millis(1))),
            DispatchConfig {
                base_timeout: Duration::from_secs(1),
                max_concurrent,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_batch_returns_immediately() {
        let probe = Arc::new(PrefixProbe { calls: AtomicUsize::new(0) });
        let outcomes = dispatcher(probe.clone(), 4).run(Vec::new(), 1).await;
        assert!(outcomes.is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_outcome_per_event_with_batch_tag() {
        let probe = Arc::new(PrefixProbe { calls: AtomicUsize::new(0) });
        let events: Vec<Event> = (0..50)
            .map(|i| {
                let id = if i % 5 == 0 { format!("missing-{}", i) } else { format!("evt-{}", i) };
                Event::new(id, "feed", "OPEN", "s")
            })
            .collect();

        let outcomes = dispatcher(probe.clone(), 3).run(events, 4).await;

        assert_eq!(outcomes.len(), 50);
        let ids: HashSet<_> = outcomes.iter().map(|o| o.event().id.clone()).collect();
        assert_eq!(ids.len(), 50);
        assert!(outcomes.iter().all(|o| o.primary.batch_offset == 4));
        assert!(outcomes.iter().all(|o| !(o.primary.found && o.primary.error.is_some())));

        let stats = BatchStats::from_outcomes(&outcomes);
        assert_eq!(stats.primary_missing, 10);
        assert_eq!(stats.primary_found, 40);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_invalid_events_still_produce_outcomes() {
        let probe = Arc::new(PrefixProbe { calls: AtomicUsize::new(0) });
        let events = vec![
            Event::new("", "feed", "OPEN", "s"),
            Event::new("evt-1", "feed", "OPEN", "s"),
        ];

        let outcomes = dispatcher(probe.clone(), 2).run(events, 1).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(BatchStats::from_outcomes(&outcomes).errors, 1);
    }

    #[test]
    fn test_stats_count_secondary_errors_and_skip_absent_checks() {
        let primary = |id: &str| ValidationOutcome {
            event: Arc::new(Event::new(id, "doctalk", "DETAIL_EXIT", "s")),
            found: true,
            error: None,
            collection: "doctalk".into(),
            batch_offset: 1,
            attempts: 1,
        };
        let with_secondary = |id: &str, found: bool, error: Option<CheckError>| {
            let primary = primary(id);
            CombinedOutcome {
                secondary: Some(SecondaryOutcome {
                    event: Arc::clone(&primary.event),
                    found,
                    error,
                    product_type: Some(36),
                    matched: None,
                }),
                primary,
            }
        };
        let outcomes = vec![
            CombinedOutcome::primary_only(primary("untracked")),
            with_secondary("found", true, None),
            with_secondary("gap", false, None),
            with_secondary(
                "unmapped",
                false,
                Some(CheckError::MappingMiss {
                    table: "collection id",
                    key: "doctalk".into(),
                }),
            ),
        ];

        let stats = BatchStats::from_outcomes(&outcomes);

        assert_eq!(stats.primary_found, 4);
        assert_eq!(stats.secondary_found, 1);
        assert_eq!(stats.secondary_missing, 1);
        assert_eq!(stats.errors, 1);
    }
}
