//! Read-only lookup tables consulted during escalation
//!
//! Both tables are built once before a run and shared behind an `Arc`; nothing
//! writes to them while batches are in flight.
//!
//! - **Requirement table**: event display name -> expected screen names.
//!   An empty (or absent) entry means the event is not tracked relationally.
//! - **Collection ids**: entity type -> numeric product type used as the
//!   relational key.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::types::{ReconcileError, Result};

/// Event display name -> ordered set of screen names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequirementTable {
    entries: HashMap<String, Vec<String>>,
}

impl RequirementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a requirement, dropping blanks and duplicate screen names
    pub fn insert<I, S>(&mut self, event_name: impl Into<String>, screens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for screen in screens {
            let screen = screen.into().trim().to_string();
            if !screen.is_empty() && !ordered.contains(&screen) {
                ordered.push(screen);
            }
        }
        self.entries.insert(event_name.into(), ordered);
    }

    /// Requirement set for an event name (empty when absent)
    pub fn requirement(&self, event_name: &str) -> &[String] {
        self.entries
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn requires_secondary(&self, event_name: &str) -> bool {
        !self.requirement(event_name).is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Built-in fallback table
    pub fn defaults() -> Self {
        let mut table = Self::new();
        table.insert("DETAIL_EXIT", ["CURRENT_SCREEN", "SERIES_DETAIL"]);
        table
    }

    /// Load from a CSV file with header `event_name,screen_names`
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Mapping(format!("opening {}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut reader = csv_reader(content, &["event_name", "screen_names"])?;

        let mut table = Self::new();
        for record in reader.records() {
            let record = record.map_err(|e| ReconcileError::Mapping(format!("reading CSV: {}", e)))?;
            let (Some(event_name), Some(screens)) = (record.get(0), record.get(1)) else {
                return Err(ReconcileError::Mapping(format!(
                    "invalid record on line {}",
                    record_line(&record)
                )));
            };
            table.insert(event_name, screens.split(','));
        }
        Ok(table)
    }
}

/// Entity type -> numeric relational key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionIds {
    entries: HashMap<String, i64>,
}

impl CollectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, id: i64) {
        self.entries.insert(collection.into(), id);
    }

    pub fn get(&self, collection: &str) -> Option<i64> {
        self.entries.get(collection).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn defaults() -> Self {
        let mut ids = Self::new();
        ids.insert("other", 0);
        ids.insert("doctalk", 36);
        ids
    }

    /// Load from a CSV file with header `collection_name,product_type_id`
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Mapping(format!("opening {}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut reader = csv_reader(content, &["collection_name", "product_type_id"])?;

        let mut ids = Self::new();
        for record in reader.records() {
            let record = record.map_err(|e| ReconcileError::Mapping(format!("reading CSV: {}", e)))?;
            let (Some(collection), Some(raw_id)) = (record.get(0), record.get(1)) else {
                continue;
            };
            if collection.is_empty() || raw_id.is_empty() {
                continue;
            }
            match raw_id.parse::<i64>() {
                Ok(id) => ids.insert(collection, id),
                Err(e) => {
                    warn!(
                        line = record_line(&record),
                        value = raw_id,
                        error = %e,
                        "Skipping row with invalid product_type_id"
                    );
                }
            }
        }

        if ids.is_empty() {
            return Err(ReconcileError::Mapping(
                "no valid mappings found in the CSV file".into(),
            ));
        }
        Ok(ids)
    }
}

/// Both lookup tables, threaded explicitly into the escalator
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    pub requirements: RequirementTable,
    pub collection_ids: CollectionIds,
}

impl Lookups {
    pub fn new(requirements: RequirementTable, collection_ids: CollectionIds) -> Self {
        Self {
            requirements,
            collection_ids,
        }
    }

    /// Load both tables, falling back to the built-in defaults on failure
    pub fn load_or_default(requirements_csv: Option<&Path>, collection_ids_csv: Option<&Path>) -> Self {
        let requirements = match requirements_csv.map(RequirementTable::from_csv_path) {
            Some(Ok(table)) => table,
            Some(Err(e)) => {
                warn!("Failed to load requirement table: {}. Using defaults.", e);
                RequirementTable::defaults()
            }
            None => RequirementTable::defaults(),
        };

        let collection_ids = match collection_ids_csv.map(CollectionIds::from_csv_path) {
            Some(Ok(ids)) => ids,
            Some(Err(e)) => {
                warn!("Failed to load collection ids: {}. Using defaults.", e);
                CollectionIds::defaults()
            }
            None => CollectionIds::defaults(),
        };

        info!(
            requirements = requirements.len(),
            collection_ids = collection_ids.len(),
            "Lookup tables ready"
        );
        Self::new(requirements, collection_ids)
    }
}

/// Reader over trimmed, variable-width records after checking the header
fn csv_reader<'a>(content: &'a str, expected: &[&str]) -> Result<csv::Reader<&'a [u8]>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| ReconcileError::Mapping(format!("reading CSV header: {}", e)))?;
    let matches = header.len() >= expected.len()
        && expected
            .iter()
            .zip(header.iter())
            .all(|(want, got)| got.eq_ignore_ascii_case(want));
    if !matches {
        return Err(ReconcileError::Mapping(format!(
            "invalid CSV header, expected: {}",
            expected.join(",")
        )));
    }
    Ok(reader)
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map_or(0, |pos| pos.line())
}
