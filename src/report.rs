//! Health report aggregation
//!
//! The [`ReportAggregator`] folds [`SourceEvent`]s into per-source state and
//! renders a fresh [`HealthReport`] after each one. It is driven by a single
//! task, so updates are serialised; readers only ever see whole reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::scheduler::{CycleOutcome, CycleReport, SourceEvent, SourceState};
use crate::sources::SourceKind;
use crate::{Alert, Sample, Severity};

/// Overall health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Warning,
    Critical,
}

impl From<Severity> for OverallStatus {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => OverallStatus::Warning,
            Severity::Critical => OverallStatus::Critical,
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OverallStatus::Healthy => "HEALTHY",
            OverallStatus::Degraded => "DEGRADED",
            OverallStatus::Warning => "WARNING",
            OverallStatus::Critical => "CRITICAL",
        };
        write!(f, "{label}")
    }
}

/// Last known state of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub kind: SourceKind,
    pub state: SourceState,

    /// Latest successful sample
    pub latest: Option<Sample>,

    /// Whether `latest` predates the most recent cycle
    pub stale: bool,

    /// Failed or skipped cycles since `latest` was taken
    pub staleness: u64,

    pub last_error: Option<String>,

    /// Alerts raised by `latest`
    pub alerts: Vec<Alert>,

    /// Thresholded metrics `latest` did not contain
    pub missing_metrics: Vec<String>,

    /// Completed cycles
    pub cycles: u64,

    /// Cycles that overran their interval far enough to drop a tick
    pub overruns: u64,

    pub last_cycle: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn new(source_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            state: SourceState::Idle,
            latest: None,
            stale: false,
            staleness: 0,
            last_error: None,
            alerts: vec![],
            missing_metrics: vec![],
            cycles: 0,
            overruns: 0,
            last_cycle: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.state == SourceState::Degraded
    }

    /// Worst of: alert severity of the latest sample, degraded state
    pub fn status(&self) -> OverallStatus {
        let alerts = self
            .alerts
            .iter()
            .map(|alert| OverallStatus::from(alert.severity))
            .max()
            .unwrap_or(OverallStatus::Healthy);

        if self.is_degraded() {
            alerts.max(OverallStatus::Degraded)
        } else {
            alerts
        }
    }

    fn record(&mut self, report: CycleReport) {
        self.cycles += 1;
        if report.skipped > 0 {
            self.overruns += 1;
        }
        self.last_cycle = Some(Utc::now());

        match report.outcome {
            CycleOutcome::Sampled { sample, evaluation } => {
                self.state = SourceState::Healthy;
                self.latest = Some(sample);
                self.stale = false;
                self.staleness = 0;
                self.last_error = None;
                self.alerts = evaluation.alerts;
                self.missing_metrics = evaluation.missing;
            }
            CycleOutcome::Failed(error) => {
                self.mark_failed(error.to_string(), report.skipped);
            }
            CycleOutcome::Defect { error, .. } => {
                self.mark_failed(format!("evaluation error: {error}"), report.skipped);
            }
        }
    }

    fn mark_failed(&mut self, error: String, skipped: u64) {
        self.state = SourceState::Degraded;
        self.staleness += 1 + skipped;
        self.stale = self.latest.is_some();
        self.last_error = Some(error);
    }
}

/// Snapshot of the whole monitored estate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,

    /// Worst status across all sources
    pub status: OverallStatus,

    pub sources: BTreeMap<String, SourceHealth>,

    /// Alerts of every source's latest sample, ordered by source then metric
    pub alerts: Vec<Alert>,
}

impl HealthReport {
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            status: OverallStatus::Healthy,
            sources: BTreeMap::new(),
            alerts: vec![],
        }
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceHealth> {
        self.sources.get(source_id)
    }

    pub fn degraded_sources(&self) -> impl Iterator<Item = &SourceHealth> {
        self.sources.values().filter(|source| source.is_degraded())
    }

    /// Whether `other` differs in overall status or in any source's state
    pub fn health_differs(&self, other: &HealthReport) -> bool {
        self.status != other.status
            || !self
                .sources
                .iter()
                .map(|(id, source)| (id, source.state))
                .eq(other.sources.iter().map(|(id, source)| (id, source.state)))
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::empty()
    }
}

/// Single-writer fold of source events into a report
#[derive(Debug, Default)]
pub struct ReportAggregator {
    sources: BTreeMap<String, SourceHealth>,

    /// Actor generation currently reporting for each source
    generations: BTreeMap<String, u64>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_current(&self, source_id: &str, generation: u64) -> bool {
        self.generations.get(source_id) == Some(&generation)
    }

    /// Apply one event. Returns the alerts raised by it, or `None` if the
    /// event came from an actor that is no longer tracked, such as a removed
    /// source whose id has since been re-added.
    pub fn apply(&mut self, event: SourceEvent) -> Option<Vec<Alert>> {
        match event {
            SourceEvent::Registered {
                source_id,
                generation,
                kind,
            } => {
                if self
                    .generations
                    .get(&source_id)
                    .is_some_and(|current| *current >= generation)
                {
                    trace!("late registration of {source_id} (generation {generation})");
                    return None;
                }

                self.generations.insert(source_id.clone(), generation);
                self.sources
                    .insert(source_id.clone(), SourceHealth::new(source_id, kind));
                Some(vec![])
            }

            SourceEvent::Completed(report) => {
                if !self.is_current(&report.source_id, report.generation) {
                    trace!(
                        "cycle report for untracked source {} (generation {})",
                        report.source_id, report.generation
                    );
                    return None;
                }
                let source = self.sources.get_mut(&report.source_id)?;

                let alerts = match &report.outcome {
                    CycleOutcome::Sampled { evaluation, .. } => evaluation.alerts.clone(),
                    _ => vec![],
                };
                source.record(report);
                Some(alerts)
            }

            SourceEvent::Stopped {
                source_id,
                generation,
            } => {
                if !self.is_current(&source_id, generation) {
                    return None;
                }
                let source = self.sources.get_mut(&source_id)?;
                source.state = SourceState::Stopped;
                Some(vec![])
            }

            SourceEvent::Removed {
                source_id,
                generation,
            } => {
                if !self.is_current(&source_id, generation) {
                    trace!("late removal of {source_id} (generation {generation})");
                    return None;
                }
                self.generations.remove(&source_id);
                self.sources.remove(&source_id)?;
                Some(vec![])
            }
        }
    }

    pub fn report(&self) -> HealthReport {
        let status = self
            .sources
            .values()
            .map(SourceHealth::status)
            .max()
            .unwrap_or(OverallStatus::Healthy);

        let alerts = self
            .sources
            .values()
            .flat_map(|source| source.alerts.iter().cloned())
            .collect();

        HealthReport {
            generated_at: Utc::now(),
            status,
            sources: self.sources.clone(),
            alerts,
        }
    }
}
