//! Configuration for the reconciler
//!
//! CLI arguments with environment fallbacks; `.env` is loaded before parsing.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::report::PublishMode;
use crate::types::{ReconcileError, Result};
use crate::validator::{DispatchConfig, RetryPolicy, DEFAULT_BACKOFF_UNIT};

/// Reconcile recovered analytics events against the document and tracking stores
#[derive(Parser, Debug, Clone)]
#[command(name = "event-reconciler")]
#[command(about = "Detect events missing from downstream stores")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGO_DB_URL", default_value = "mongodb://localhost:27017", value_parser = unquoted)]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "DATABASE_NAME", default_value = "analytics", value_parser = unquoted)]
    pub mongodb_db: String,

    /// Collection holding recovery documents
    #[arg(long, env = "SOURCE_COLLECTION", default_value = "new_event_recovery", value_parser = unquoted)]
    pub collection: String,

    /// Number of recovery documents to process (0 = all)
    #[arg(long, env = "DOC_LIMIT", default_value = "0")]
    pub limit: i64,

    /// Deadline of the first attempt of every store query, in seconds
    #[arg(long, env = "QUERY_TIMEOUT_SECS", default_value = "15")]
    pub query_timeout_secs: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONN_TIMEOUT_SECS", default_value = "30")]
    pub conn_timeout_secs: u64,

    /// Maximum number of events checked concurrently
    #[arg(long, env = "MAX_CONCURRENT", default_value = "10")]
    pub max_concurrent: usize,

    /// Probe attempts per event per store
    #[arg(long, env = "ATTEMPT_LIMIT", default_value = "2")]
    pub attempt_limit: u32,

    /// Also check required events in the tracking database
    #[arg(long, env = "ENABLE_SECONDARY", default_value = "false")]
    pub enable_secondary: bool,

    /// SQLite tracking database (required with --enable-secondary)
    #[arg(long, env = "TRACKING_DB")]
    pub tracking_db: Option<PathBuf>,

    /// CSV with header `event_name,screen_names`
    #[arg(long, env = "REQUIREMENTS_CSV")]
    pub requirements_csv: Option<PathBuf>,

    /// CSV with header `collection_name,product_type_id`
    #[arg(long, env = "COLLECTION_IDS_CSV")]
    pub collection_ids_csv: Option<PathBuf>,

    /// Directory receiving report files
    #[arg(long, env = "OUTPUT_DIR", default_value = "missing_data")]
    pub output_dir: PathBuf,

    /// Write one combined report instead of one file per category
    #[arg(long, env = "COMBINED_REPORT", default_value = "false")]
    pub combined_report: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.query_timeout_secs == 0 {
            return Err(ReconcileError::Config("query timeout must be positive".into()));
        }
        if self.conn_timeout_secs == 0 {
            return Err(ReconcileError::Config("connection timeout must be positive".into()));
        }
        if self.max_concurrent == 0 {
            return Err(ReconcileError::Config("max concurrent must be at least 1".into()));
        }
        if self.attempt_limit == 0 {
            return Err(ReconcileError::Config("attempt limit must be at least 1".into()));
        }
        if self.limit < 0 {
            return Err(ReconcileError::Config("document limit cannot be negative".into()));
        }
        if self.enable_secondary && self.tracking_db.is_none() {
            return Err(ReconcileError::Config(
                "--tracking-db is required when secondary validation is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout_secs)
    }

    /// Reading the recovery log is a query, bounded like every other query
    pub fn recovery_read_timeout(&self) -> Duration {
        self.query_timeout()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempt_limit, DEFAULT_BACKOFF_UNIT)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            base_timeout: self.query_timeout(),
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn publish_mode(&self) -> PublishMode {
        if self.combined_report {
            PublishMode::Combined
        } else {
            PublishMode::Separate
        }
    }
}

/// Strip the double quotes some `.env` files wrap values in
fn unquoted(raw: &str) -> std::result::Result<String, String> {
    Ok(raw.trim().trim_matches('"').to_string())
}
