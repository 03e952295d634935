//! Event records and per-event outcome records
//!
//! Events are produced upstream (recovery documents in the primary store) and
//! are read-only here. Outcomes are terminal: once the retry loop has returned
//! they are never mutated, only projected into reports.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::CheckError;

/// One recovered analytics event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    /// Entity type, doubles as the primary-store collection name
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub entity_code: serde_json::Value,
    /// Display name, key into the requirement table
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub screen_name: String,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        event_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            event_name: event_name.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event{{id: {}, type: {}, name: {}, session: {}}}",
            self.id, self.entity_type, self.event_name, self.session_id
        )
    }
}

/// A document of the recovery log collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecovery {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "event", default)]
    pub events: Vec<Event>,
}

/// Row of the relational tracking table matched by a secondary check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub id: i64,
    pub event_name: String,
    pub product_type: i64,
    pub session_id: String,
    pub track_id: String,
    pub date_of_creation: Option<String>,
}

/// Terminal result of the primary-store check for one event
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub event: Arc<Event>,
    pub found: bool,
    pub error: Option<CheckError>,
    pub collection: String,
    /// Batch tag of the recovery document this event came from
    pub batch_offset: usize,
    /// Probe calls actually made (0 when input validation short-circuited)
    pub attempts: u32,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.found
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match (&self.error, self.found) {
            (Some(e), _) => format!("error: {}", e),
            (None, true) => "found".to_string(),
            (None, false) => "not found".to_string(),
        };
        write!(
            f,
            "Outcome{{event: {}, collection: {}, status: {}}}",
            self.event.id, self.collection, status
        )
    }
}

/// Result of a secondary-store check, only present when escalation applied
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryOutcome {
    pub event: Arc<Event>,
    pub found: bool,
    pub error: Option<CheckError>,
    /// Secondary-store key resolved from the entity type, if any
    pub product_type: Option<i64>,
    pub matched: Option<TrackingRecord>,
}

/// Primary outcome plus the optional secondary outcome for the same event
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedOutcome {
    pub primary: ValidationOutcome,
    pub secondary: Option<SecondaryOutcome>,
}

impl CombinedOutcome {
    pub fn primary_only(primary: ValidationOutcome) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn event(&self) -> &Event {
        &self.primary.event
    }

    pub fn is_success(&self) -> bool {
        self.primary.is_success()
            && self
                .secondary
                .as_ref()
                .map_or(true, |s| s.error.is_none() && s.found)
    }
}
