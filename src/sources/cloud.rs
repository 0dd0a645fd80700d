use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{instrument, trace};

use crate::Sample;
use crate::error::CollectionError;

use super::{HttpTransport, MetricSource, SourceKind};

pub const HEALTH: &str = "health";
pub const INSTANCES: &str = "instances";
pub const LOAD: &str = "load";

/// Body returned by a provider status endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CloudStatus {
    pub instances: u32,
    pub load: f64,
    pub healthy: bool,
}

/// Polls a cloud provider status endpoint.
///
/// Provider SDKs are not linked in; the endpoint is expected to be a small
/// adapter service that summarises the provider's fleet as [`CloudStatus`].
/// Reported metrics: `instances`, `load` and `health` (1.0 healthy, 0.0 not).
pub struct CloudProviderSource {
    id: String,
    provider: String,
    endpoint: String,
    metrics: Vec<String>,
    transport: HttpTransport,
}

impl CloudProviderSource {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        transport: HttpTransport,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            endpoint: endpoint.into(),
            metrics: [HEALTH, INSTANCES, LOAD].map(String::from).to_vec(),
            transport,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl CloudStatus {
    pub fn into_metrics(self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (HEALTH.to_string(), if self.healthy { 1.0 } else { 0.0 }),
            (INSTANCES.to_string(), self.instances as f64),
            (LOAD.to_string(), self.load),
        ])
    }
}

#[async_trait]
impl MetricSource for CloudProviderSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CloudProvider
    }

    fn metrics(&self) -> &[String] {
        &self.metrics
    }

    #[instrument(skip(self), fields(source = %self.id, provider = %self.provider))]
    async fn sample(&self) -> Result<Sample, CollectionError> {
        let status: CloudStatus = self.transport.get_json(&self.endpoint).await?;

        trace!(
            "{}: {} instances, load {:.2}, healthy: {}",
            self.provider, status.instances, status.load, status.healthy
        );

        Ok(Sample::new(self.id.clone(), status.into_metrics()))
    }
}
