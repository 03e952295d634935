//! Report sinks
//!
//! The aggregator only names categories; where and how a report is stored is
//! the sink's business.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::aggregate::{Aggregation, ReconcileReport};
use crate::types::{ReconcileError, Result};

/// Logical report names handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportCategory {
    MissingInPrimary,
    MissingInSecondary,
    Errors,
    Summary,
    Combined,
}

impl ReportCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportCategory::MissingInPrimary => "missing_in_primary",
            ReportCategory::MissingInSecondary => "missing_in_secondary",
            ReportCategory::Errors => "errors",
            ReportCategory::Summary => "summary",
            ReportCategory::Combined => "combined",
        }
    }
}

impl std::fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable destination for finished reports
pub trait ReportSink: Send + Sync {
    fn write(&self, category: ReportCategory, payload: &serde_json::Value) -> Result<()>;
}

/// Writes pretty-printed JSON files under one directory
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for JsonFileSink {
    fn write(&self, category: ReportCategory, payload: &serde_json::Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ReconcileError::Report(format!("creating {}: {}", self.dir.display(), e))
        })?;

        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let path = self.dir.join(format!("{}_report_{}.json", category, stamp));
        let body = serde_json::to_vec_pretty(payload)
            .map_err(|e| ReconcileError::Report(format!("encoding {} report: {}", category, e)))?;
        std::fs::write(&path, body)
            .map_err(|e| ReconcileError::Report(format!("writing {}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Wrote {} report", category);
        Ok(())
    }
}

/// Keeps written reports in memory
#[derive(Default)]
pub struct MemorySink {
    written: Mutex<Vec<(ReportCategory, serde_json::Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<(ReportCategory, serde_json::Value)> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<ReportCategory> {
        self.written().into_iter().map(|(c, _)| c).collect()
    }
}

impl ReportSink for MemorySink {
    fn write(&self, category: ReportCategory, payload: &serde_json::Value) -> Result<()> {
        self.written
            .lock()
            .map_err(|_| ReconcileError::Report("memory sink poisoned".into()))?
            .push((category, payload.clone()));
        Ok(())
    }
}

/// How `publish` lays reports out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// One write per non-empty variant plus the summary
    #[default]
    Separate,
    /// A single write carrying every variant
    Combined,
}

/// Hand an aggregation to a sink; returns what was written (nothing on all-clear)
pub fn publish(
    aggregation: &Aggregation,
    sink: &dyn ReportSink,
    mode: PublishMode,
) -> Result<Vec<ReportCategory>> {
    let report = match aggregation {
        Aggregation::AllClear { events_checked } => {
            info!(events_checked, "All validations passed. No reports generated.");
            return Ok(Vec::new());
        }
        Aggregation::Findings(report) => report,
    };

    match mode {
        PublishMode::Combined => {
            write_one(sink, ReportCategory::Combined, report)?;
            Ok(vec![ReportCategory::Combined])
        }
        PublishMode::Separate => publish_separate(report, sink),
    }
}

fn publish_separate(report: &ReconcileReport, sink: &dyn ReportSink) -> Result<Vec<ReportCategory>> {
    let mut written = Vec::new();
    if let Some(missing) = &report.missing_in_primary {
        write_one(sink, ReportCategory::MissingInPrimary, missing)?;
        written.push(ReportCategory::MissingInPrimary);
    }
    if let Some(gaps) = &report.missing_in_secondary {
        write_one(sink, ReportCategory::MissingInSecondary, gaps)?;
        written.push(ReportCategory::MissingInSecondary);
    }
    if let Some(errors) = &report.errors {
        write_one(sink, ReportCategory::Errors, errors)?;
        written.push(ReportCategory::Errors);
    }
    write_one(sink, ReportCategory::Summary, &report.summary)?;
    written.push(ReportCategory::Summary);
    Ok(written)
}

fn write_one<T: Serialize>(sink: &dyn ReportSink, category: ReportCategory, report: &T) -> Result<()> {
    let payload = serde_json::to_value(report)
        .map_err(|e| ReconcileError::Report(format!("encoding {} report: {}", category, e)))?;
    sink.write(category, &payload)
}
