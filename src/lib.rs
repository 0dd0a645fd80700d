pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod report;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped set of metric readings from a single source.
///
/// Metrics are kept in a `BTreeMap` so that iteration order (and therefore
/// alert order) is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

impl Sample {
    /// Create a sample stamped with the current time
    pub fn new(source_id: impl Into<String>, metrics: BTreeMap<String, f64>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp: Utc::now(),
            metrics,
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A threshold breach observed in one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub source_id: String,
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}
