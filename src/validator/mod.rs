//! Concurrent cross-store validation engine
//!
//! - **probe**: leaf store-existence contract
//! - **retry**: bounded retry with linearly growing deadlines
//! - **escalate**: conditional relational check after a primary hit
//! - **dispatch**: semaphore-bounded fan-out over a batch

pub mod dispatch;
pub mod escalate;
pub mod probe;
pub mod retry;

pub use dispatch::{BatchStats, DispatchConfig, Dispatcher};
pub use escalate::CrossStoreEscalator;
pub use probe::{with_deadline, PrimaryProbe, SecondaryProbe, StoreProbe};
pub use retry::{Attempted, RetryPolicy, RetryingValidator, DEFAULT_ATTEMPT_LIMIT, DEFAULT_BACKOFF_UNIT};
