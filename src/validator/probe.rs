//! Leaf existence probe contract
//!
//! A probe answers "is this event present" against exactly one store within a
//! caller-supplied deadline. The primary and secondary stores have different
//! query shapes, expressed through the `Key` and `Record` associated types.

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{Event, TrackingRecord};
use crate::types::CheckError;

/// Trait for store probes (allows stubbing stores in tests)
#[async_trait]
pub trait StoreProbe: Send + Sync {
    /// Store-specific lookup key (collection name, product type, ...)
    type Key: Send + Sync;
    /// Detail returned on a hit
    type Record: Send;

    /// Short store name used in logs and report lines
    fn store_name(&self) -> &'static str;

    /// Look the event up under `key`.
    ///
    /// Returns `Ok(Some(_))` when found, `Ok(None)` when absent. Must not run
    /// materially past `deadline`; an overrun is reported as
    /// [`CheckError::Transient`].
    async fn probe(
        &self,
        event: &Event,
        key: &Self::Key,
        deadline: Duration,
    ) -> Result<Option<Self::Record>, CheckError>;
}

/// Document store probe, keyed by collection name, hit = matching count
pub type PrimaryProbe = dyn StoreProbe<Key = String, Record = u64>;

/// Relational probe, keyed by product type, hit = matched tracking row
pub type SecondaryProbe = dyn StoreProbe<Key = i64, Record = TrackingRecord>;

/// Run a store future under a hard client-side deadline
pub async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T, CheckError>
where
    F: std::future::Future<Output = Result<T, CheckError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(CheckError::Transient(format!(
            "{} exceeded deadline of {:?}",
            what, deadline
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_maps_elapsed_to_transient() {
        let result: Result<(), CheckError> = with_deadline(Duration::from_millis(10), "count", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("count exceeded deadline"));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(Duration::from_secs(1), "count", async {
            Err::<(), _>(CheckError::Permanent("boom".into()))
        })
        .await;
        assert_eq!(result, Err(CheckError::Permanent("boom".into())));
    }
}
