use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sysinfo::{Disks, System};
use tracing::{instrument, trace};

use crate::Sample;
use crate::error::CollectionError;

use super::{MetricSource, SourceKind};

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const DISK: &str = "disk";

/// Samples the machine the monitor runs on.
///
/// Reports `cpu`, `memory` and `disk` usage as percentages. CPU usage is
/// measured between two consecutive samples, so the `System` handle is kept
/// across cycles.
pub struct LocalHostSource {
    id: String,
    metrics: Vec<String>,
    system: Arc<Mutex<System>>,
}

impl LocalHostSource {
    pub fn new(id: impl Into<String>) -> Self {
        let mut system = System::new();
        // establish the baseline for the first cpu usage reading
        system.refresh_cpu_usage();

        Self {
            id: id.into(),
            metrics: [CPU, DISK, MEMORY].map(String::from).to_vec(),
            system: Arc::new(Mutex::new(system)),
        }
    }
}

fn percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

fn read_usage(system: &Mutex<System>) -> BTreeMap<String, f64> {
    let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
    system.refresh_cpu_usage();
    system.refresh_memory();

    let cpu = system.global_cpu_usage() as f64;
    let memory = percentage(system.used_memory(), system.total_memory());

    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks.iter().fold((0u64, 0u64), |(total, available), disk| {
        (total + disk.total_space(), available + disk.available_space())
    });
    let disk = percentage(total.saturating_sub(available), total);

    BTreeMap::from([
        (CPU.to_string(), cpu),
        (DISK.to_string(), disk),
        (MEMORY.to_string(), memory),
    ])
}

#[async_trait]
impl MetricSource for LocalHostSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LocalHost
    }

    fn metrics(&self) -> &[String] {
        &self.metrics
    }

    #[instrument(skip(self), fields(source = %self.id))]
    async fn sample(&self) -> Result<Sample, CollectionError> {
        let system = self.system.clone();

        // sysinfo reads procfs synchronously
        let metrics = tokio::task::spawn_blocking(move || read_usage(&system))
            .await
            .map_err(|e| CollectionError::Unreachable(format!("local sampler failed: {e}")))?;

        trace!("local usage: {metrics:?}");

        Ok(Sample::new(self.id.clone(), metrics))
    }
}
