//! Metric sources
//!
//! A [`MetricSource`] produces [`Sample`]s for one monitored target. Every
//! variant owns its transport and declares up front which metrics it reports;
//! the scheduler rejects samples that do not match that declaration.
//!
//! ## Variants
//!
//! - **LocalHost**: reads CPU, memory and disk usage via `sysinfo`
//! - **RemoteAgent**: polls an agent's `/metrics` endpoint over HTTP
//! - **CloudProvider**: polls a provider status endpoint over HTTP

pub mod cloud;
pub mod local;
pub mod remote;
pub mod transport;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Sample;
use crate::config::SourceConfig;
use crate::error::{CollectionError, ConfigurationError};

pub use cloud::CloudProviderSource;
pub use local::LocalHostSource;
pub use remote::RemoteAgentSource;
pub use transport::{HttpTransport, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    LocalHost,
    RemoteAgent,
    CloudProvider,
}

/// A monitored target that can be sampled
///
/// Implementations must be `Send + Sync`: the scheduler drives each source
/// from its own task. A source is never sampled concurrently with itself.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Stable identifier, used as `Sample::source_id`
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Names of the metrics every successful sample contains
    fn metrics(&self) -> &[String];

    async fn sample(&self) -> Result<Sample, CollectionError>;
}

/// Build a source from its configuration descriptor.
///
/// The descriptor is expected to have been validated already.
pub fn build_source(
    config: &SourceConfig,
    timeout: Duration,
) -> Result<Box<dyn MetricSource>, ConfigurationError> {
    let id = config.source_id();

    let source: Box<dyn MetricSource> = match config.kind {
        SourceKind::LocalHost => Box::new(LocalHostSource::new(id)),
        SourceKind::RemoteAgent => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| ConfigurationError::MissingEndpoint(id.clone()))?;
            let transport = HttpTransport::new(
                timeout,
                RetryPolicy::from(config.retry),
                config.token.clone(),
            )?;
            Box::new(RemoteAgentSource::new(
                id,
                endpoint,
                config.declared_metrics(),
                transport,
            ))
        }
        SourceKind::CloudProvider => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| ConfigurationError::MissingEndpoint(id.clone()))?;
            let transport = HttpTransport::new(
                timeout,
                RetryPolicy::from(config.retry),
                config.token.clone(),
            )?;
            let provider = config.provider.clone().unwrap_or_else(|| id.clone());
            Box::new(CloudProviderSource::new(id, provider, endpoint, transport))
        }
    };

    Ok(source)
}
