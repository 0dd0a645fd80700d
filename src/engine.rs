//! MonitorEngine - ties sources, scheduler, evaluator and sinks together
//!
//! ```text
//! SourceActor ─┐
//! SourceActor ─┼─► SourceEvent ─► aggregator task ─► watch<HealthReport>  (current_report)
//! SourceActor ─┘                         │
//!                                        └─► broadcast<EngineEvent> ─► AlertSink tasks
//! ```
//!
//! The aggregator task is the only writer of the report. Readers get the last
//! published snapshot and never wait on a cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::Alert;
use crate::config::{ProfileConfig, SourceConfig, ThresholdSet};
use crate::error::{ConfigurationError, SchedulerError};
use crate::report::{HealthReport, ReportAggregator};
use crate::scheduler::{Scheduler, SourceEvent, SourceSpec, SourceState};
use crate::sources::build_source;

/// Capacity of the engine event channel. Slow sinks that fall further behind
/// than this miss events.
const EVENT_CAPACITY: usize = 256;

/// Receives alerts and health changes as they happen
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn on_alert(&self, alert: &Alert);

    async fn on_health_change(&self, report: &HealthReport);
}

/// Events pushed to subscribers
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Alert(Alert),

    /// Overall status or the state of some source changed
    HealthChanged(Arc<HealthReport>),
}

enum Aggregator {
    Pending {
        event_rx: mpsc::UnboundedReceiver<SourceEvent>,
        report_tx: watch::Sender<Arc<HealthReport>>,
    },
    Running(JoinHandle<()>),
    Finished,
}

struct Inner {
    scheduler: Scheduler,
    aggregator: Aggregator,

    /// Taken on shutdown, which lets sink tasks drain and exit
    events: Option<broadcast::Sender<EngineEvent>>,

    sink_tasks: Vec<JoinHandle<()>>,
}

pub struct MonitorEngine {
    inner: Mutex<Inner>,
    report_rx: watch::Receiver<Arc<HealthReport>>,

    /// Profile defaults applied to sources added from descriptors
    defaults: Defaults,
}

#[derive(Debug, Clone)]
struct Defaults {
    interval: Duration,
    thresholds: ThresholdSet,
}

impl Defaults {
    /// Turn a source descriptor into a spec
    fn spec_for(&self, config: &SourceConfig) -> Result<SourceSpec, ConfigurationError> {
        let interval = config.interval(self.interval);
        let timeout = config.timeout(interval);
        let source = build_source(config, timeout)?;

        let thresholds = match &config.thresholds {
            Some(overrides) => self.thresholds.merged(overrides),
            None => self.thresholds.clone(),
        };

        Ok(SourceSpec::new(Arc::from(source), interval, thresholds).with_timeout(timeout))
    }
}

impl MonitorEngine {
    /// Build an engine for a profile. Sources are created but not started.
    pub fn new(profile: &ProfileConfig) -> Result<Self, ConfigurationError> {
        profile.validate()?;

        let defaults = Defaults {
            interval: profile.interval(),
            thresholds: profile.thresholds.clone(),
        };

        let specs = profile
            .sources
            .iter()
            .map(|source| defaults.spec_for(source))
            .collect::<Result<Vec<_>, _>>()?;

        Self::build(specs, defaults)
    }

    /// Build an engine from ready-made specs, with no profile thresholds
    pub fn with_specs(specs: Vec<SourceSpec>) -> Result<Self, ConfigurationError> {
        for spec in &specs {
            spec.validate()?;
        }

        let defaults = Defaults {
            interval: Duration::from_millis(crate::config::DEFAULT_INTERVAL_MS),
            thresholds: ThresholdSet::new(),
        };
        Self::build(specs, defaults)
    }

    fn build(specs: Vec<SourceSpec>, defaults: Defaults) -> Result<Self, ConfigurationError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = watch::channel(Arc::new(HealthReport::empty()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut scheduler = Scheduler::new(event_tx);
        for spec in specs {
            let source_id = spec.source_id().to_string();
            if scheduler.add_source(spec).is_err() {
                return Err(ConfigurationError::DuplicateSource(source_id));
            }
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                scheduler,
                aggregator: Aggregator::Pending {
                    event_rx,
                    report_tx,
                },
                events: Some(events),
                sink_tasks: vec![],
            }),
            report_rx,
            defaults,
        })
    }

    /// Begin scheduling every source. Idempotent while running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        inner.scheduler.start()?;

        let aggregator = std::mem::replace(&mut inner.aggregator, Aggregator::Finished);
        inner.aggregator = match (aggregator, inner.events.clone()) {
            (
                Aggregator::Pending {
                    event_rx,
                    report_tx,
                },
                Some(events),
            ) => Aggregator::Running(tokio::spawn(aggregate(event_rx, report_tx, events))),
            (other, _) => other,
        };

        info!("monitoring {} source(s)", inner.scheduler.source_ids().len());
        Ok(())
    }

    /// Stop scheduling new cycles. Returns without waiting for in-flight
    /// samples; their results still reach the report.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.lock().await.scheduler.stop().await;
    }

    /// Stop, then wait until every in-flight cycle is recorded and every
    /// sink has seen every event.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.scheduler.join().await;

        match std::mem::replace(&mut inner.aggregator, Aggregator::Finished) {
            Aggregator::Running(task) => {
                if let Err(e) = task.await {
                    error!("report aggregator panicked: {e}");
                }
            }
            Aggregator::Pending { .. } | Aggregator::Finished => {}
        }

        inner.events = None;
        for result in join_all(std::mem::take(&mut inner.sink_tasks)).await {
            if let Err(e) = result {
                error!("alert sink task panicked: {e}");
            }
        }

        debug!("engine shut down");
    }

    /// Latest health report. Never blocks on a running cycle.
    pub fn current_report(&self) -> Arc<HealthReport> {
        self.report_rx.borrow().clone()
    }

    /// Receiver that is notified whenever a new report is published
    pub fn watch_report(&self) -> watch::Receiver<Arc<HealthReport>> {
        self.report_rx.clone()
    }

    /// Raw event stream. Closed once the engine has shut down.
    pub async fn events(&self) -> broadcast::Receiver<EngineEvent> {
        match &self.inner.lock().await.events {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Deliver every subsequent alert and health change to `sink`
    pub async fn subscribe(&self, sink: Arc<dyn AlertSink>) {
        let mut inner = self.inner.lock().await;
        let Some(events) = &inner.events else {
            warn!("engine is shut down, sink will receive nothing");
            return;
        };

        let task = tokio::spawn(forward(events.subscribe(), sink));
        inner.sink_tasks.push(task);
    }

    /// Schedule a new source. Starts right away if the engine is running.
    /// Specs with a zero interval or timeout, or invalid thresholds, are
    /// rejected with [`SchedulerError::InvalidSource`].
    pub async fn add_source(&self, spec: SourceSpec) -> Result<(), SchedulerError> {
        self.inner.lock().await.scheduler.add_source(spec)
    }

    /// Build and schedule a source from its descriptor, using the engine's
    /// profile defaults
    pub async fn add_source_config(&self, config: &SourceConfig) -> anyhow::Result<()> {
        config.validate()?;
        let spec = self.defaults.spec_for(config)?;
        self.add_source(spec).await?;
        Ok(())
    }

    /// Unschedule a source and drop it from the report. Returns after its
    /// in-flight cycle, if any, has finished.
    pub async fn remove_source(&self, source_id: &str) -> Result<(), SchedulerError> {
        let task = self.inner.lock().await.scheduler.remove_source(source_id).await?;

        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("source actor {source_id} panicked: {e}");
        }
        Ok(())
    }

    /// Live lifecycle state, including the transient `Sampling` state
    pub async fn source_state(&self, source_id: &str) -> Option<SourceState> {
        let inner = self.inner.lock().await;
        match inner.scheduler.handle(source_id) {
            Some(handle) => Some(handle.state()),
            None if inner.scheduler.source_ids().iter().any(|id| id == source_id) => {
                Some(SourceState::Idle)
            }
            None => None,
        }
    }

    /// Run one cycle of a source now
    pub async fn poll_now(&self, source_id: &str) -> anyhow::Result<()> {
        let handle = self
            .inner
            .lock()
            .await
            .scheduler
            .handle(source_id)
            .ok_or_else(|| SchedulerError::UnknownSource(source_id.to_string()))?;

        handle.poll_now().await
    }

    pub async fn source_ids(&self) -> Vec<String> {
        self.inner.lock().await.scheduler.source_ids()
    }
}

/// Fold source events into reports until every source actor is gone
async fn aggregate(
    mut event_rx: mpsc::UnboundedReceiver<SourceEvent>,
    report_tx: watch::Sender<Arc<HealthReport>>,
    events: broadcast::Sender<EngineEvent>,
) {
    let mut aggregator = ReportAggregator::new();

    while let Some(event) = event_rx.recv().await {
        trace!("source event: {event:?}");

        let Some(alerts) = aggregator.apply(event) else {
            continue;
        };

        let report = Arc::new(aggregator.report());
        let previous = report_tx.send_replace(report.clone());

        // send only fails when nobody is subscribed
        for alert in alerts {
            let _ = events.send(EngineEvent::Alert(alert));
        }

        if previous.health_differs(&report) {
            debug!("overall health is now {}", report.status);
            let _ = events.send(EngineEvent::HealthChanged(report));
        }
    }

    debug!("all sources gone, report aggregator exiting");
}

async fn forward(mut rx: broadcast::Receiver<EngineEvent>, sink: Arc<dyn AlertSink>) {
    loop {
        match rx.recv().await {
            Ok(EngineEvent::Alert(alert)) => sink.on_alert(&alert).await,
            Ok(EngineEvent::HealthChanged(report)) => sink.on_health_change(&report).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("alert sink lagged behind, missed {n} event(s)");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
