//! Conditional escalation of a confirmed primary hit into the relational store
//!
//! An event is checked relationally only when:
//! 1. the primary check succeeded without error and found the event, and
//! 2. its display name maps to a non-empty requirement set.
//!
//! A missing collection-id mapping fails the secondary check only; the primary
//! outcome is passed through untouched.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::probe::SecondaryProbe;
use super::retry::{RetryPolicy, RetryingValidator};
use crate::mapping::Lookups;
use crate::models::{CombinedOutcome, SecondaryOutcome, ValidationOutcome};
use crate::types::CheckError;

pub struct CrossStoreEscalator {
    validator: RetryingValidator<SecondaryProbe>,
    lookups: Arc<Lookups>,
}

impl CrossStoreEscalator {
    pub fn new(probe: Arc<SecondaryProbe>, policy: RetryPolicy, lookups: Arc<Lookups>) -> Self {
        Self {
            validator: RetryingValidator::new(probe, policy),
            lookups,
        }
    }

    pub fn lookups(&self) -> &Lookups {
        &self.lookups
    }

    /// Attach a secondary outcome to `primary` when the event requires one
    pub async fn escalate(&self, primary: ValidationOutcome, base_timeout: Duration) -> CombinedOutcome {
        if primary.error.is_some() || !primary.found {
            return CombinedOutcome::primary_only(primary);
        }

        let event = Arc::clone(&primary.event);
        if !self.lookups.requirements.requires_secondary(&event.event_name) {
            debug!(event_id = %event.id, event_name = %event.event_name, "No secondary requirement");
            return CombinedOutcome::primary_only(primary);
        }

        let secondary = match self.lookups.collection_ids.get(&event.entity_type) {
            None => SecondaryOutcome {
                event,
                found: false,
                error: Some(CheckError::MappingMiss {
                    table: "collection id",
                    key: primary.collection.clone(),
                }),
                product_type: None,
                matched: None,
            },
            Some(product_type) => {
                let attempted = self.validator.check(&event, &product_type, base_timeout).await;
                let (matched, error) = match attempted.result {
                    Ok(matched) => (matched, None),
                    Err(e) => (None, Some(e)),
                };
                SecondaryOutcome {
                    event,
                    found: matched.is_some(),
                    error,
                    product_type: Some(product_type),
                    matched,
                }
            }
        };

        CombinedOutcome {
            primary,
            secondary: Some(secondary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CollectionIds, RequirementTable};
    use crate::models::{Event, TrackingRecord};
    use crate::validator::probe::StoreProbe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTracker {
        calls: AtomicU32,
        hit: bool,
    }

    #[async_trait]
    impl StoreProbe for CountingTracker {
        type Key = i64;
        type Record = TrackingRecord;

        fn store_name(&self) -> &'static str {
            "tracking"
        }

        async fn probe(
            &self,
            event: &Event,
            key: &i64,
            _deadline: Duration,
        ) -> Result<Option<TrackingRecord>, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hit.then(|| TrackingRecord {
                id: 1,
                event_name: event.event_name.clone(),
                product_type: *key,
                session_id: event.session_id.clone(),
                track_id: "t-1".into(),
                date_of_creation: None,
            }))
        }
    }

    fn lookups() -> Arc<Lookups> {
        let mut requirements = RequirementTable::new();
        requirements.insert("DETAIL_EXIT", ["SERIES_DETAIL"]);
        requirements.insert("APP_OPEN", Vec::<String>::new());
        let mut ids = CollectionIds::new();
        ids.insert("doctalk", 36);
        Arc::new(Lookups::new(requirements, ids))
    }

    fn escalator(hit: bool) -> (CrossStoreEscalator, Arc<CountingTracker>) {
        let tracker = Arc::new(CountingTracker {
            calls: AtomicU32::new(0),
            hit,
        });
        let probe: Arc<SecondaryProbe> = tracker.clone();
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        (CrossStoreEscalator::new(probe, policy, lookups()), tracker)
    }

    fn primary(event: Event, found: bool, error: Option<CheckError>) -> ValidationOutcome {
        ValidationOutcome {
            collection: event.entity_type.clone(),
            event: Arc::new(event),
            found,
            error,
            batch_offset: 1,
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn test_not_found_primary_never_escalates() {
        let (escalator, tracker) = escalator(true);
        let outcome = primary(Event::new("a", "doctalk", "DETAIL_EXIT", "s"), false, None);

        let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;

        assert!(combined.secondary.is_none());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errored_primary_never_escalates() {
        let (escalator, tracker) = escalator(true);
        let outcome = primary(
            Event::new("a", "doctalk", "DETAIL_EXIT", "s"),
            false,
            Some(CheckError::Permanent("down".into())),
        );

        let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;

        assert!(combined.secondary.is_none());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_requirement_never_escalates() {
        let (escalator, tracker) = escalator(true);
        for name in ["APP_OPEN", "NOT_IN_TABLE"] {
            let outcome = primary(Event::new("a", "doctalk", name, "s"), true, None);
            let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;
            assert!(combined.secondary.is_none());
        }
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_required_event_is_checked() {
        let (escalator, tracker) = escalator(false);
        let outcome = primary(Event::new("a", "doctalk", "DETAIL_EXIT", "s"), true, None);

        let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;

        let secondary = combined.secondary.expect("secondary outcome attached");
        assert!(!secondary.found);
        assert!(secondary.error.is_none());
        assert_eq!(secondary.product_type, Some(36));
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);
        assert!(combined.primary.is_success());
    }

    #[tokio::test]
    async fn test_hit_carries_matched_record() {
        let (escalator, _) = escalator(true);
        let outcome = primary(Event::new("a", "doctalk", "DETAIL_EXIT", "s-9"), true, None);

        let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;

        let secondary = combined.secondary.unwrap();
        assert!(secondary.found);
        assert_eq!(secondary.matched.unwrap().session_id, "s-9");
    }

    #[tokio::test]
    async fn test_unknown_collection_is_scoped_mapping_miss() {
        let (escalator, tracker) = escalator(true);
        let outcome = primary(Event::new("a", "feed", "DETAIL_EXIT", "s"), true, None);

        let combined = escalator.escalate(outcome, Duration::from_secs(1)).await;

        assert!(combined.primary.is_success());
        let secondary = combined.secondary.unwrap();
        assert!(matches!(secondary.error, Some(CheckError::MappingMiss { .. })));
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }
}
