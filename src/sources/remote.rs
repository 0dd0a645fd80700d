use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::Sample;
use crate::error::CollectionError;

use super::{HttpTransport, MetricSource, SourceKind};

/// Polls a monitoring agent over HTTP.
///
/// The agent answers `GET <endpoint>/metrics` with a flat JSON object of
/// metric name to number. Extra metrics are dropped; a missing declared metric
/// fails the cycle.
pub struct RemoteAgentSource {
    id: String,
    url: String,
    metrics: Vec<String>,
    transport: HttpTransport,
}

impl RemoteAgentSource {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl AsRef<str>,
        mut metrics: Vec<String>,
        transport: HttpTransport,
    ) -> Self {
        metrics.sort();
        metrics.dedup();

        Self {
            id: id.into(),
            url: format!("{}/metrics", endpoint.as_ref().trim_end_matches('/')),
            metrics,
            transport,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MetricSource for RemoteAgentSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RemoteAgent
    }

    fn metrics(&self) -> &[String] {
        &self.metrics
    }

    #[instrument(skip(self), fields(source = %self.id))]
    async fn sample(&self) -> Result<Sample, CollectionError> {
        let mut reported: BTreeMap<String, f64> = self.transport.get_json(&self.url).await?;

        let metrics = self
            .metrics
            .iter()
            .map(|name| {
                reported.remove(name).map(|value| (name.clone(), value)).ok_or_else(|| {
                    CollectionError::InvalidResponse(format!("agent did not report `{name}`"))
                })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        if !reported.is_empty() {
            trace!("ignoring undeclared metrics: {:?}", reported.keys());
        }

        Ok(Sample::new(self.id.clone(), metrics))
    }
}
