//! Aggregation of per-event outcomes into report variants
//!
//! Routing rules:
//! - primary error -> error report only (never also counted as missing)
//! - primary not found, no error -> missing-in-primary, grouped by collection
//! - no secondary outcome -> check not applicable, nothing reported
//! - secondary not found -> missing-in-secondary; a secondary error is also
//!   surfaced in the error report
//!
//! Error lines are deduplicated by exact error text in first-seen order, each
//! keeping the store it first came from and the collections it was seen in;
//! the totals count every occurrence. Outcomes are sorted by (batch tag, event) before
//! projection, so the same outcome set always yields identical reports
//! whatever order the dispatcher delivered them in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::dedup::OrderedSet;
use crate::models::{CombinedOutcome, Event, SecondaryOutcome, ValidationOutcome};

/// Which store an error line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSide {
    Primary,
    Secondary,
}


/// Event absent from the primary store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEvent {
    pub id: String,
    pub entity_type: String,
    pub entity_code: serde_json::Value,
    pub event_name: String,
    pub uuid: String,
    pub session_id: String,
    pub screen_name: String,
    pub offset_id: usize,
}

impl MissingEvent {
    fn from_outcome(outcome: &ValidationOutcome) -> Self {
        let event: &Event = &outcome.event;
        Self {
            id: event.id.clone(),
            entity_type: event.entity_type.clone(),
            entity_code: event.entity_code.clone(),
            event_name: event.event_name.clone(),
            uuid: event.uuid.clone(),
            session_id: event.session_id.clone(),
            screen_name: event.screen_name.clone(),
            offset_id: outcome.batch_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingInPrimaryReport {
    pub timestamp: DateTime<Utc>,
    pub total_count: usize,
    pub by_collection: BTreeMap<String, Vec<MissingEvent>>,
}

/// Event present in the primary store but not confirmed relationally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryGap {
    pub id: String,
    pub event_name: String,
    pub collection_name: String,
    pub session_id: String,
    pub offset_id: usize,
    pub entity_code: serde_json::Value,
    pub screen_name: String,
    pub product_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SecondaryGap {
    fn from_outcomes(primary: &ValidationOutcome, secondary: &SecondaryOutcome) -> Self {
        let event = &primary.event;
        Self {
            id: event.id.clone(),
            event_name: event.event_name.clone(),
            collection_name: primary.collection.clone(),
            session_id: event.session_id.clone(),
            offset_id: primary.batch_offset,
            entity_code: event.entity_code.clone(),
            screen_name: event.screen_name.clone(),
            product_type: secondary.product_type,
            error: secondary.error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingInSecondaryReport {
    pub timestamp: DateTime<Utc>,
    pub total_count: usize,
    pub events: Vec<SecondaryGap>,
}

/// One distinct error message and how many events produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLine {
    pub message: String,
    /// Store of the first occurrence
    pub store: StoreSide,
    /// Every collection the message was seen in
    pub collections: BTreeSet<String>,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    /// All occurrences, counted before deduplication
    pub total_count: usize,
    pub errors: Vec<ErrorLine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total_events: usize,
    pub missing_in_primary: usize,
    pub required_in_secondary: usize,
    pub missing_in_secondary: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub timestamp: DateTime<Utc>,
    pub total_events_checked: usize,
    pub missing_primary_count: usize,
    pub missing_secondary_count: usize,
    pub error_count: usize,
    pub by_collection: BTreeMap<String, CollectionStats>,
}

/// All variants produced by one run; absent variants had nothing to report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_in_primary: Option<MissingInPrimaryReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_in_secondary: Option<MissingInSecondaryReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorReport>,
    pub summary: SummaryReport,
}

/// Result of aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Nothing missing and no errors anywhere: nothing to write
    AllClear { events_checked: usize },
    Findings(ReconcileReport),
}

impl Aggregation {
    pub fn is_all_clear(&self) -> bool {
        matches!(self, Aggregation::AllClear { .. })
    }

    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            Aggregation::AllClear { .. } => None,
            Aggregation::Findings(report) => Some(report),
        }
    }
}

/// Projects outcome sets into reports stamped with a fixed generation time
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    generated_at: DateTime<Utc>,
}

impl Aggregator {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self { generated_at }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn summarize(&self, outcomes: &[CombinedOutcome]) -> Aggregation {
        let mut ordered: Vec<&CombinedOutcome> = outcomes.iter().collect();
        ordered.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        let mut by_collection: BTreeMap<String, Vec<MissingEvent>> = BTreeMap::new();
        let mut collection_stats: BTreeMap<String, CollectionStats> = BTreeMap::new();
        let mut gaps = Vec::new();
        let mut errors = OrderedSet::new();
        let mut error_origins: HashMap<String, (StoreSide, BTreeSet<String>)> = HashMap::new();
        let mut missing_primary = 0;

        let mut record_error = |side: StoreSide, collection: &str, message: String| {
            error_origins
                .entry(message.clone())
                .or_insert_with(|| (side, BTreeSet::new()))
                .1
                .insert(collection.to_string());
            errors.insert(message);
        };

        for outcome in ordered {
            let primary = &outcome.primary;
            let stats = collection_stats.entry(primary.collection.clone()).or_default();
            stats.total_events += 1;

            if let Some(e) = &primary.error {
                record_error(StoreSide::Primary, &primary.collection, e.to_string());
                continue;
            }

            if !primary.found {
                stats.missing_in_primary += 1;
                missing_primary += 1;
                by_collection
                    .entry(primary.collection.clone())
                    .or_default()
                    .push(MissingEvent::from_outcome(primary));
                continue;
            }

            let Some(secondary) = &outcome.secondary else {
                continue;
            };
            stats.required_in_secondary += 1;

            if let Some(e) = &secondary.error {
                record_error(StoreSide::Secondary, &primary.collection, e.to_string());
            }
            if !secondary.found {
                stats.missing_in_secondary += 1;
                gaps.push(SecondaryGap::from_outcomes(primary, secondary));
            }
        }

        let error_count = errors.total();
        if missing_primary == 0 && gaps.is_empty() && error_count == 0 {
            return Aggregation::AllClear {
                events_checked: outcomes.len(),
            };
        }

        let timestamp = self.generated_at;
        let summary = SummaryReport {
            timestamp,
            total_events_checked: outcomes.len(),
            missing_primary_count: missing_primary,
            missing_secondary_count: gaps.len(),
            error_count,
            by_collection: collection_stats,
        };

        let missing_in_primary = (missing_primary > 0).then(|| MissingInPrimaryReport {
            timestamp,
            total_count: missing_primary,
            by_collection,
        });

        let missing_in_secondary = (!gaps.is_empty()).then(|| MissingInSecondaryReport {
            timestamp,
            total_count: gaps.len(),
            events: gaps,
        });

        let errors = (error_count > 0).then(|| ErrorReport {
            timestamp,
            total_count: error_count,
            errors: errors
                .iter()
                .map(|(message, occurrences)| {
                    let (store, collections) = error_origins
                        .remove(message)
                        .unwrap_or_else(|| (StoreSide::Primary, BTreeSet::new()));
                    ErrorLine {
                        message: message.to_string(),
                        store,
                        collections,
                        occurrences,
                    }
                })
                .collect(),
        });

        Aggregation::Findings(ReconcileReport {
            generated_at: timestamp,
            missing_in_primary,
            missing_in_secondary,
            errors,
            summary,
        })
    }
}

fn sort_key(outcome: &CombinedOutcome) -> (usize, &str, &str, &str, &str) {
    let event = outcome.event();
    (
        outcome.primary.batch_offset,
        event.id.as_str(),
        event.entity_type.as_str(),
        event.event_name.as_str(),
        event.session_id.as_str(),
    )
}
