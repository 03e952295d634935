//! Relational tracking-table adapter (secondary store)
//!
//! Rows live in `app_tracking_new`. A secondary check looks for the newest row
//! with the event's product type, display name and session. SQLite calls are
//! blocking, so each probe runs on the blocking pool under the attempt deadline.

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::models::{Event, TrackingRecord};
use crate::types::{CheckError, ReconcileError, Result};
use crate::validator::probe::{with_deadline, StoreProbe};

pub const TRACKING_TABLE: &str = "app_tracking_new";

const LOOKUP_SQL: &str = "SELECT id, event_name, product_type, session_id, track_id, date_of_creation
     FROM app_tracking_new
     WHERE product_type = ?1 AND event_name = ?2 AND session_id = ?3
     ORDER BY id DESC LIMIT 1";

/// Schema of the tracking table, used by fixtures and local setups
pub const TRACKING_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS app_tracking_new (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_name TEXT NOT NULL,
        product_type INTEGER NOT NULL,
        session_id TEXT NOT NULL,
        track_id TEXT NOT NULL,
        date_of_creation TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tracking_lookup
        ON app_tracking_new (product_type, event_name, session_id);";

/// Shared handle to the tracking database
#[derive(Clone)]
pub struct TrackingStore {
    db: Arc<Mutex<Connection>>,
}

impl TrackingStore {
    /// Open an existing tracking database read-only and check the table exists
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| {
                ReconcileError::Database(format!("opening tracking db {}: {}", path.display(), e))
            })?;

        let present: Option<String> = db
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [TRACKING_TABLE],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ReconcileError::Database(format!("inspecting tracking db: {}", e)))?;
        if present.is_none() {
            return Err(ReconcileError::Database(format!(
                "table {} not found in {}",
                TRACKING_TABLE,
                path.display()
            )));
        }

        info!(path = %path.display(), "Tracking database opened");
        Ok(Self::from_connection(db))
    }

    pub fn from_connection(db: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn lookup(
        db: &Mutex<Connection>,
        product_type: i64,
        event_name: &str,
        session_id: &str,
    ) -> std::result::Result<Option<TrackingRecord>, CheckError> {
        let db = db
            .lock()
            .map_err(|_| CheckError::Permanent("tracking connection poisoned".into()))?;
        let mut stmt = db.prepare_cached(LOOKUP_SQL).map_err(classify_sqlite_error)?;
        stmt.query_row(rusqlite::params![product_type, event_name, session_id], |row| {
            Ok(TrackingRecord {
                id: row.get(0)?,
                event_name: row.get(1)?,
                product_type: row.get(2)?,
                session_id: row.get(3)?,
                track_id: row.get(4)?,
                date_of_creation: row.get(5)?,
            })
        })
        .optional()
        .map_err(classify_sqlite_error)
    }
}

#[async_trait]
impl StoreProbe for TrackingStore {
    type Key = i64;
    type Record = TrackingRecord;

    fn store_name(&self) -> &'static str {
        "tracking"
    }

    async fn probe(
        &self,
        event: &Event,
        key: &i64,
        deadline: Duration,
    ) -> std::result::Result<Option<TrackingRecord>, CheckError> {
        let db = Arc::clone(&self.db);
        let product_type = *key;
        let event_name = event.event_name.clone();
        let session_id = event.session_id.clone();

        with_deadline(deadline, "tracking lookup", async move {
            tokio::task::spawn_blocking(move || {
                Self::lookup(&db, product_type, &event_name, &session_id)
            })
            .await
            .map_err(|e| CheckError::Permanent(format!("tracking lookup task failed: {}", e)))?
        })
        .await
    }
}

/// Busy / locked database is worth retrying; anything else is not
fn classify_sqlite_error(err: rusqlite::Error) -> CheckError {
    let transient = matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    );
    if transient {
        CheckError::Transient(format!("tracking query: {}", err))
    } else {
        CheckError::Permanent(format!("tracking query failed: {}", err))
    }
}
