use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::Severity;
use crate::error::ConfigurationError;
use crate::sources::SourceKind;

/// Top-level configuration: a set of named profiles
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Config {
    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, ConfigurationError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownProfile(name.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Default sampling cadence for every source of this profile
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Enables debug-level logging in the binary
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub thresholds: ThresholdSet,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Optional webhook that receives alerts and health changes
    pub webhook: Option<WebhookConfig>,
}

impl ProfileConfig {
    pub fn new(interval_ms: u64, thresholds: ThresholdSet, sources: Vec<SourceConfig>) -> Self {
        Self {
            interval_ms,
            debug: false,
            thresholds,
            sources,
            webhook: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Check everything that could make the engine misbehave later on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval_ms == 0 {
            return Err(ConfigurationError::ZeroInterval("profile".to_string()));
        }

        if self.sources.is_empty() {
            return Err(ConfigurationError::NoSources);
        }

        self.thresholds.validate()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;

            let id = source.source_id();
            if !seen.insert(id.clone()) {
                return Err(ConfigurationError::DuplicateSource(id));
            }
        }

        Ok(())
    }
}

/// Warning and critical levels for one metric.
///
/// A value breaches a level when it is strictly greater than it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// Highest severity breached by `value`, if any. Critical subsumes warning.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value > self.critical {
            Some(Severity::Critical)
        } else if value > self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    fn validate(&self, metric: &str) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidThreshold {
            metric: metric.to_string(),
            reason: reason.to_string(),
        };

        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(invalid("levels must be finite numbers"));
        }

        if self.warning > self.critical {
            return Err(invalid("warning level is above critical level"));
        }

        Ok(())
    }
}

/// Metric name to threshold mapping. Immutable once the engine is running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet(BTreeMap<String, Threshold>);

impl ThresholdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly used in tests and embedding code
    pub fn with(mut self, metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        self.0.insert(metric.into(), Threshold::new(warning, critical));
        self
    }

    pub fn get(&self, metric: &str) -> Option<&Threshold> {
        self.0.get(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Threshold)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Profile thresholds with `overrides` applied on top, metric by metric
    pub fn merged(&self, overrides: &ThresholdSet) -> ThresholdSet {
        let mut merged = self.0.clone();
        merged.extend(overrides.0.iter().map(|(k, v)| (k.clone(), *v)));
        ThresholdSet(merged)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.0
            .iter()
            .try_for_each(|(metric, threshold)| threshold.validate(metric))
    }
}

impl FromIterator<(String, Threshold)> for ThresholdSet {
    fn from_iter<T: IntoIterator<Item = (String, Threshold)>>(iter: T) -> Self {
        ThresholdSet(iter.into_iter().collect())
    }
}

/// Descriptor for one monitored target
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// Identifier used in samples, alerts and the report
    pub id: Option<String>,

    /// Connection descriptor for non-local sources
    pub endpoint: Option<String>,

    /// Cloud provider label (e.g. `aws`), CloudProvider sources only
    pub provider: Option<String>,

    /// Per-source cadence, overrides the profile interval
    pub interval_ms: Option<u64>,

    /// Upper bound for a single cycle, defaults to the interval
    pub timeout_ms: Option<u64>,

    /// Sent as `X-MONITORING-SECRET` to remote agents
    pub token: Option<String>,

    /// Metrics a remote agent is expected to report
    pub metrics: Option<Vec<String>>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-source threshold overrides
    pub thresholds: Option<ThresholdSet>,
}

impl SourceConfig {
    fn with_kind(kind: SourceKind) -> Self {
        Self {
            kind,
            id: None,
            endpoint: None,
            provider: None,
            interval_ms: None,
            timeout_ms: None,
            token: None,
            metrics: None,
            retry: RetryConfig::default(),
            thresholds: None,
        }
    }

    pub fn local() -> Self {
        Self::with_kind(SourceKind::LocalHost)
    }

    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::with_kind(SourceKind::RemoteAgent)
        }
    }

    pub fn cloud(provider: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            endpoint: Some(endpoint.into()),
            ..Self::with_kind(SourceKind::CloudProvider)
        }
    }

    /// Configured id, or a stable default derived from the descriptor
    pub fn source_id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }

        match self.kind {
            SourceKind::LocalHost => "local".to_string(),
            SourceKind::RemoteAgent => self.endpoint.clone().unwrap_or_default(),
            SourceKind::CloudProvider => self
                .provider
                .clone()
                .or_else(|| self.endpoint.clone())
                .unwrap_or_default(),
        }
    }

    pub fn interval(&self, profile_interval: Duration) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or(profile_interval)
    }

    pub fn timeout(&self, interval: Duration) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(interval)
    }

    /// Metrics declared for a remote agent
    pub fn declared_metrics(&self) -> Vec<String> {
        self.metrics.clone().unwrap_or_else(default_agent_metrics)
    }

    /// Check a single descriptor on its own
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let id = self.source_id();
        let id = id.as_str();

        if self.interval_ms == Some(0) {
            return Err(ConfigurationError::ZeroInterval(id.to_string()));
        }

        if self.timeout_ms == Some(0) {
            return Err(ConfigurationError::ZeroTimeout(id.to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::ZeroAttempts(id.to_string()));
        }

        if let Some(thresholds) = &self.thresholds {
            thresholds.validate()?;
        }

        if self.kind == SourceKind::LocalHost {
            return Ok(());
        }

        let Some(endpoint) = &self.endpoint else {
            return Err(ConfigurationError::MissingEndpoint(id.to_string()));
        };

        let invalid = |reason: String| ConfigurationError::InvalidEndpoint {
            source_id: id.to_string(),
            endpoint: endpoint.clone(),
            reason,
        };

        let url = reqwest::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }

        if self.kind == SourceKind::RemoteAgent && self.declared_metrics().is_empty() {
            return Err(ConfigurationError::NoMetrics(id.to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

/// Cadence used when a profile does not set one
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_agent_metrics() -> Vec<String> {
    ["cpu", "memory", "disk"].map(String::from).to_vec()
}

/// Parse a configuration file. `.toml` files are read as TOML, everything
/// else as JSON.
pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)?;

    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let config = if is_toml {
        toml::from_str::<Config>(&file_content).map_err(|e| ConfigurationError::Parse(e.to_string()))
    } else {
        serde_json::from_str::<Config>(&file_content)
            .map_err(|e| ConfigurationError::Parse(e.to_string()))
    };

    config.inspect(|config| trace!("loaded config: {config:?}"))
}
