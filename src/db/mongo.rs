//! MongoDB client, recovery-log reader and primary-store probe
//!
//! Connection pattern adapted from the gateway's MongoDB wrapper: timeouts are
//! pushed into the URI so an unreachable server fails fast, then a `ping`
//! verifies the connection before any batch starts.

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use mongodb::Client;
use std::time::Duration;
use tracing::info;

use crate::models::{Event, EventRecovery};
use crate::types::{CheckError, ReconcileError, Result};
use crate::validator::probe::{with_deadline, StoreProbe};

/// Server-side `maxTimeMS` expiry
const MAX_TIME_MS_EXPIRED: i32 = 50;

/// Recovery documents are fetched in batches of this size
const FIND_BATCH_SIZE: u32 = 100;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping, failing within `connect_timeout`
    pub async fn new(uri: &str, db_name: &str, connect_timeout: Duration) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        let timeout_ms = connect_timeout.as_millis();
        let separator = if uri.contains('?') { '&' } else { '?' };
        let timeout_uri = format!(
            "{}{}serverSelectionTimeoutMS={}&connectTimeoutMS={}",
            uri, separator, timeout_ms, timeout_ms
        );

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ReconcileError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ReconcileError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Read recovery documents from the source collection (`limit == 0` reads all)
    pub async fn fetch_recoveries(
        &self,
        collection: &str,
        limit: i64,
        timeout: Duration,
    ) -> Result<Vec<EventRecovery>> {
        let coll = self
            .client
            .database(&self.db_name)
            .collection::<EventRecovery>(collection);

        let read = async {
            let mut find = coll
                .find(doc! {})
                .batch_size(FIND_BATCH_SIZE)
                .no_cursor_timeout(true);
            if limit > 0 {
                find = find.limit(limit);
            }
            let cursor = find.await?;
            let recoveries: Vec<EventRecovery> = cursor.try_collect().await?;
            Ok::<_, MongoError>(recoveries)
        };

        let recoveries = tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| {
                ReconcileError::Database(format!(
                    "reading {} timed out after {:?}",
                    collection, timeout
                ))
            })?
            .map_err(|e| ReconcileError::Database(format!("reading {}: {}", collection, e)))?;

        info!(
            collection,
            documents = recoveries.len(),
            "Loaded recovery documents"
        );
        if limit > 0 && (recoveries.len() as i64) < limit {
            info!(
                "Requested {} documents but only found {}",
                limit,
                recoveries.len()
            );
        }
        Ok(recoveries)
    }
}

/// Primary-store probe: counts `{"event.mappingId": <id>}` in `<entity_type>`
#[derive(Clone)]
pub struct MongoProbe {
    client: MongoClient,
}

impl MongoProbe {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StoreProbe for MongoProbe {
    type Key = String;
    type Record = u64;

    fn store_name(&self) -> &'static str {
        "mongodb"
    }

    async fn probe(
        &self,
        event: &Event,
        key: &String,
        deadline: Duration,
    ) -> std::result::Result<Option<u64>, CheckError> {
        let coll = self
            .client
            .inner()
            .database(self.client.db_name())
            .collection::<Document>(key);

        let count = with_deadline(deadline, "count", async {
            coll.count_documents(doc! { "event.mappingId": event.id.as_str() })
                .max_time(deadline)
                .await
                .map_err(classify_mongo_error)
        })
        .await?;

        Ok((count > 0).then_some(count))
    }
}

/// Tag a driver error as transient (deadline class) or permanent
pub fn classify_mongo_error(err: MongoError) -> CheckError {
    let transient = match err.kind.as_ref() {
        MongoErrorKind::Command(cmd) => cmd.code == MAX_TIME_MS_EXPIRED,
        MongoErrorKind::ServerSelection { .. } => true,
        MongoErrorKind::Io(io) => io.kind() == std::io::ErrorKind::TimedOut,
        _ => false,
    };

    if transient {
        CheckError::Transient(format!("error querying collection: {}", err))
    } else {
        CheckError::Permanent(format!("error querying collection: {}", err))
    }
}
