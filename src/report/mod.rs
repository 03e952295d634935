//! Result aggregation and report output

pub mod aggregate;
pub mod dedup;
pub mod sink;

pub use aggregate::{
    Aggregation, Aggregator, CollectionStats, ErrorLine, ErrorReport, MissingEvent,
    MissingInPrimaryReport, MissingInSecondaryReport, ReconcileReport, SecondaryGap, StoreSide,
    SummaryReport,
};
pub use dedup::OrderedSet;
pub use sink::{publish, JsonFileSink, MemorySink, PublishMode, ReportCategory, ReportSink};
