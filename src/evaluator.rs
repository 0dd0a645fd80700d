//! Threshold evaluation
//!
//! Maps a [`Sample`] and a [`ThresholdSet`] to the alerts it triggers. The
//! evaluation is pure: the same inputs always produce the same alerts in the
//! same order (sorted by metric name).
//!
//! ```text
//! value > critical            → CRITICAL (warning is subsumed)
//! warning < value <= critical → WARNING
//! value <= warning            → no alert
//! metric not in thresholds    → no alert
//! threshold not in sample     → no alert, listed in `missing`
//! ```

use tracing::trace;

use crate::config::ThresholdSet;
use crate::error::EvaluationError;
use crate::{Alert, Sample};

/// Result of evaluating one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Triggered alerts, ordered by metric name
    pub alerts: Vec<Alert>,

    /// Metrics that have thresholds but were not part of the sample
    pub missing: Vec<String>,
}

pub fn evaluate(sample: &Sample, thresholds: &ThresholdSet) -> Result<Evaluation, EvaluationError> {
    let mut alerts = vec![];

    for (metric, &value) in &sample.metrics {
        if !value.is_finite() {
            return Err(EvaluationError::NonFiniteValue {
                metric: metric.clone(),
                value,
            });
        }

        // unconfigured metrics never alert
        let Some(threshold) = thresholds.get(metric) else {
            continue;
        };

        let Some(severity) = threshold.classify(value) else {
            continue;
        };

        trace!(
            "{}: {metric} = {value} (warning: {}, critical: {}) -> {severity}",
            sample.source_id, threshold.warning, threshold.critical
        );

        alerts.push(Alert {
            source_id: sample.source_id.clone(),
            metric: metric.clone(),
            value,
            severity,
            timestamp: sample.timestamp,
        });
    }

    let missing = thresholds
        .iter()
        .filter(|(metric, _)| !sample.metrics.contains_key(*metric))
        .map(|(metric, _)| metric.clone())
        .collect();

    Ok(Evaluation { alerts, missing })
}
