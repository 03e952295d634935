//! Event Reconciler - cross-store analytics event reconciliation
//!
//! Reads batches of recovered analytics events and checks, with bounded
//! concurrency, that each one reached the document store. Events whose name
//! carries a tracking requirement are then looked up in the relational
//! tracking table. Findings are grouped, deduplicated and written as reports.
//!
//! ## Modules
//!
//! - **validator**: probe contract, retrying validator, escalation, dispatch
//! - **report**: aggregation into report variants and report sinks
//! - **db**: MongoDB and tracking-table adapters
//! - **mapping**: requirement and collection-id lookup tables

pub mod config;
pub mod db;
pub mod mapping;
pub mod models;
pub mod report;
pub mod types;
pub mod validator;

pub use config::Args;
pub use models::{CombinedOutcome, Event, SecondaryOutcome, ValidationOutcome};
pub use types::{CheckError, ErrorKind, ReconcileError, Result};
