//! SourceActor - samples one source on its own cadence
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → sample (bounded by timeout) → evaluate → publish CycleReport → [aggregator]
//!     ↑
//!     └─── Commands (PollNow, Shutdown, Remove)
//! ```
//!
//! The cycle runs inside the select handler, so a tick that fires while a
//! cycle is in flight is not acted upon until the cycle is done. Missed ticks
//! are skipped, not queued.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::Sample;
use crate::config::ThresholdSet;
use crate::error::{CollectionError, ConfigurationError};
use crate::evaluator::evaluate;
use crate::sources::{MetricSource, SourceKind};

use super::messages::{CycleOutcome, CycleReport, SourceCommand, SourceEvent};

/// Lifecycle of a source.
///
/// `Idle → Sampling → (Healthy | Degraded) → Sampling → ...`, with `Stopped`
/// as the terminal state. Between cycles a source rests in the state its last
/// cycle ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceState {
    Idle,
    Sampling,
    Healthy,
    Degraded,
    Stopped,
}

/// Everything needed to schedule one source
#[derive(Clone)]
pub struct SourceSpec {
    pub source: Arc<dyn MetricSource>,
    pub interval: Duration,
    pub timeout: Duration,
    pub thresholds: Arc<ThresholdSet>,
}

impl SourceSpec {
    /// Spec with the timeout equal to the interval
    pub fn new(source: Arc<dyn MetricSource>, interval: Duration, thresholds: ThresholdSet) -> Self {
        Self {
            source,
            interval,
            timeout: interval,
            thresholds: Arc::new(thresholds),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    /// Reject specs an actor could not run: zero interval or timeout, and
    /// invalid thresholds
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval.is_zero() {
            return Err(ConfigurationError::ZeroInterval(self.source_id().to_string()));
        }

        if self.timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout(self.source_id().to_string()));
        }

        self.thresholds.validate()
    }
}

pub struct SourceActor {
    spec: SourceSpec,

    generation: u64,

    command_rx: mpsc::Receiver<SourceCommand>,

    event_tx: mpsc::UnboundedSender<SourceEvent>,

    state_tx: watch::Sender<SourceState>,

    /// Declared metric names, sorted
    declared: BTreeSet<String>,
}

impl SourceActor {
    pub fn new(
        spec: SourceSpec,
        generation: u64,
        command_rx: mpsc::Receiver<SourceCommand>,
        event_tx: mpsc::UnboundedSender<SourceEvent>,
        state_tx: watch::Sender<SourceState>,
    ) -> Self {
        let declared = spec.source.metrics().iter().cloned().collect();

        Self {
            spec,
            generation,
            command_rx,
            event_tx,
            state_tx,
            declared,
        }
    }

    fn source_id(&self) -> &str {
        self.spec.source.id()
    }

    fn publish(&self, event: SourceEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("no aggregator listening for source events");
        }
    }

    #[instrument(skip(self), fields(source = %self.spec.source.id()))]
    pub async fn run(mut self) {
        debug!(
            "starting source actor (interval {:?}, timeout {:?})",
            self.spec.interval, self.spec.timeout
        );

        self.publish(SourceEvent::Registered {
            source_id: self.source_id().to_string(),
            generation: self.generation,
            kind: self.spec.source.kind(),
        });

        let mut ticker = interval(self.spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut removed = false;

        loop {
            tokio::select! {
                // commands first, so nothing new starts once a shutdown is queued
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SourceCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let result = self.run_cycle().await;
                            let _ = respond_to.send(result);
                        }

                        Some(SourceCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        Some(SourceCommand::Remove) => {
                            debug!("received remove command");
                            removed = true;
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    let _ = self.run_cycle().await;
                }
            }
        }

        self.state_tx.send_replace(SourceState::Stopped);

        let source_id = self.source_id().to_string();
        let generation = self.generation;
        if removed {
            self.publish(SourceEvent::Removed {
                source_id,
                generation,
            });
        } else {
            self.publish(SourceEvent::Stopped {
                source_id,
                generation,
            });
        }

        debug!("source actor stopped");
    }

    /// Sample, evaluate and publish one cycle
    #[instrument(skip(self), fields(source = %self.spec.source.id()))]
    async fn run_cycle(&mut self) -> Result<(), CollectionError> {
        self.state_tx.send_replace(SourceState::Sampling);

        let started = Instant::now();
        let sampled = match tokio::time::timeout(self.spec.timeout, self.spec.source.sample()).await
        {
            Ok(result) => result.and_then(|sample| self.check_declared(sample)),
            Err(_) => Err(CollectionError::Timeout(self.spec.timeout)),
        };
        let duration = started.elapsed();

        // the first missed tick fires right away as a catch-up, the rest are dropped
        let missed = (duration.as_nanos() / self.spec.interval.as_nanos()) as u64;
        let skipped = missed.saturating_sub(1);
        if skipped > 0 {
            warn!(
                "cycle overran its interval ({duration:?} > {:?}), skipping {skipped} cycle(s)",
                self.spec.interval
            );
        } else if duration > self.spec.interval {
            debug!(
                "cycle took {duration:?}, longer than its {:?} interval",
                self.spec.interval
            );
        }

        let outcome = match sampled {
            Ok(sample) => match evaluate(&sample, &self.spec.thresholds) {
                Ok(evaluation) => {
                    if !evaluation.missing.is_empty() {
                        debug!("no readings for configured metrics {:?}", evaluation.missing);
                    }
                    trace!("sampled in {duration:?}, {} alert(s)", evaluation.alerts.len());
                    CycleOutcome::Sampled { sample, evaluation }
                }
                Err(error) => {
                    error!("failed to evaluate sample: {error}");
                    CycleOutcome::Defect { sample, error }
                }
            },
            Err(e) => {
                warn!("failed to sample: {e}");
                CycleOutcome::Failed(e)
            }
        };

        let state = if outcome.is_healthy() {
            SourceState::Healthy
        } else {
            SourceState::Degraded
        };

        let result = match &outcome {
            CycleOutcome::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        };

        self.publish(SourceEvent::Completed(CycleReport {
            source_id: self.source_id().to_string(),
            generation: self.generation,
            outcome,
            duration,
            skipped,
        }));
        self.state_tx.send_replace(state);

        result
    }

    /// Enforce that a sample belongs to this source and carries exactly the
    /// declared metrics.
    fn check_declared(&self, sample: Sample) -> Result<Sample, CollectionError> {
        if sample.source_id != self.source_id() {
            return Err(CollectionError::InvalidResponse(format!(
                "sample attributed to `{}`",
                sample.source_id
            )));
        }

        if !sample.metrics.keys().eq(self.declared.iter()) {
            return Err(CollectionError::InvalidResponse(format!(
                "sample metrics {:?} do not match declared metrics {:?}",
                sample.metrics.keys().collect::<Vec<_>>(),
                self.declared
            )));
        }

        Ok(sample)
    }
}

/// Handle for controlling a SourceActor
///
/// Cheap to clone; all clones talk to the same actor.
#[derive(Clone)]
pub struct SourceHandle {
    sender: mpsc::Sender<SourceCommand>,

    state: watch::Receiver<SourceState>,

    pub source_id: String,

    pub kind: SourceKind,
}

impl SourceHandle {
    /// Spawn a new source actor and return its handle and task
    pub fn spawn(
        spec: SourceSpec,
        generation: u64,
        event_tx: mpsc::UnboundedSender<SourceEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(SourceState::Idle);

        let source_id = spec.source_id().to_string();
        let kind = spec.source.kind();

        let actor = SourceActor::new(spec, generation, cmd_rx, event_tx, state_tx);
        let task = tokio::spawn(actor.run());

        let handle = Self {
            sender: cmd_tx,
            state: state_rx,
            source_id,
            kind,
        };

        (handle, task)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Current lifecycle state of the source
    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// Wait until the source reaches `state`
    pub async fn wait_for(&self, state: SourceState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .context("source actor went away")?;
        Ok(())
    }

    /// Trigger an immediate cycle
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SourceCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Gracefully shut down the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SourceCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Shut down the actor and drop the source from the report
    pub async fn remove(&self) -> Result<()> {
        self.sender
            .send(SourceCommand::Remove)
            .await
            .context("failed to send Remove command")?;
        Ok(())
    }
}
