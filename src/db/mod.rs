//! Store adapters
//!
//! - **mongo**: primary document store (recovery log + existence counts)
//! - **tracking**: relational tracking table (secondary existence checks)

pub mod mongo;
pub mod tracking;

pub use mongo::{classify_mongo_error, MongoClient, MongoProbe};
pub use tracking::{TrackingStore, TRACKING_SCHEMA, TRACKING_TABLE};
