//! Per-source scheduling
//!
//! Every source gets its own actor task (see [`actor`]) ticking on the
//! source's interval. Sources are never synchronised with each other, and a
//! slow source only delays itself.
//!
//! ```text
//!               ┌──────────────┐
//!               │  Scheduler   │ start / stop / add / remove
//!               └──────┬───────┘
//!          spawns      │
//!        ┌─────────────┼─────────────┐
//!        ▼             ▼             ▼
//!   SourceActor   SourceActor   SourceActor
//!        │             │             │
//!        └─────────────┼─────────────┘
//!                      ▼
//!            SourceEvent channel → aggregator
//! ```

pub mod actor;
pub mod messages;

use std::collections::BTreeMap;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::error::SchedulerError;

pub use actor::{SourceHandle, SourceSpec, SourceState};
pub use messages::{CycleOutcome, CycleReport, SourceCommand, SourceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Stopped,
}

struct RunningSource {
    handle: SourceHandle,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    phase: Phase,

    /// Sources added before `start()`
    pending: Vec<SourceSpec>,

    running: BTreeMap<String, RunningSource>,

    /// Tags each spawned actor, so a re-added id is told apart from the
    /// actor it replaces
    next_generation: u64,

    /// Dropped once the scheduler is joined, which closes the event channel
    event_tx: Option<mpsc::UnboundedSender<SourceEvent>>,
}

impl Scheduler {
    pub fn new(event_tx: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self {
            phase: Phase::Pending,
            pending: vec![],
            running: BTreeMap::new(),
            next_generation: 1,
            event_tx: Some(event_tx),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Ids of all sources, scheduled or waiting for `start()`
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .pending
            .iter()
            .map(|spec| spec.source_id().to_string())
            .chain(self.running.keys().cloned())
            .collect();
        ids.sort();
        ids
    }

    pub fn handle(&self, source_id: &str) -> Option<SourceHandle> {
        self.running.get(source_id).map(|r| r.handle.clone())
    }

    fn contains(&self, source_id: &str) -> bool {
        self.running.contains_key(source_id)
            || self.pending.iter().any(|spec| spec.source_id() == source_id)
    }

    /// Spawn all pending sources. Calling it on a running scheduler is a no-op.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.phase {
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(SchedulerError::Stopped),
            Phase::Pending => {}
        }

        self.phase = Phase::Running;
        debug!("starting {} source(s)", self.pending.len());

        for spec in std::mem::take(&mut self.pending) {
            self.spawn(spec)?;
        }

        Ok(())
    }

    /// Add a source. It starts right away if the scheduler is running.
    #[instrument(skip(self, spec), fields(source = %spec.source_id()))]
    pub fn add_source(&mut self, spec: SourceSpec) -> Result<(), SchedulerError> {
        if self.phase == Phase::Stopped {
            return Err(SchedulerError::Stopped);
        }

        spec.validate().map_err(|e| SchedulerError::InvalidSource {
            source_id: spec.source_id().to_string(),
            reason: e.to_string(),
        })?;

        if self.contains(spec.source_id()) {
            return Err(SchedulerError::DuplicateSource(spec.source_id().to_string()));
        }

        match self.phase {
            Phase::Running => self.spawn(spec),
            _ => {
                self.pending.push(spec);
                Ok(())
            }
        }
    }

    fn spawn(&mut self, spec: SourceSpec) -> Result<(), SchedulerError> {
        let event_tx = self.event_tx.clone().ok_or(SchedulerError::Stopped)?;
        let generation = self.next_generation;
        self.next_generation += 1;
        let (handle, task) = SourceHandle::spawn(spec, generation, event_tx);

        self.running
            .insert(handle.source_id.clone(), RunningSource { handle, task });
        Ok(())
    }

    /// Remove a source. Its in-flight cycle, if any, is allowed to finish;
    /// await the returned task to wait for that. Sources that never started
    /// have no task.
    #[instrument(skip(self))]
    pub async fn remove_source(
        &mut self,
        source_id: &str,
    ) -> Result<Option<JoinHandle<()>>, SchedulerError> {
        if let Some(index) = self
            .pending
            .iter()
            .position(|spec| spec.source_id() == source_id)
        {
            self.pending.remove(index);
            return Ok(None);
        }

        let RunningSource { handle, task } = self
            .running
            .remove(source_id)
            .ok_or_else(|| SchedulerError::UnknownSource(source_id.to_string()))?;

        if let Err(e) = handle.remove().await {
            warn!("source actor already gone: {e:#}");
        }

        Ok(Some(task))
    }

    /// Stop scheduling new cycles. Returns once every actor has been told to
    /// stop; in-flight cycles keep running and are still reported.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }

        self.phase = Phase::Stopped;
        self.pending.clear();
        debug!("stopping {} source(s)", self.running.len());

        for (source_id, running) in &self.running {
            if let Err(e) = running.handle.shutdown().await {
                warn!("{source_id}: failed to send shutdown: {e:#}");
            }
        }
    }

    /// Wait for all actors to finish and close the event channel.
    ///
    /// Implies `stop()`.
    pub async fn join(&mut self) {
        self.stop().await;

        let tasks = std::mem::take(&mut self.running)
            .into_values()
            .map(|running| running.task);

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("source actor panicked: {e}");
            }
        }

        self.event_tx = None;
    }
}
