//! Message types exchanged between the scheduler, source actors and the
//! report aggregator
//!
//! 1. **Commands**: sent to one source actor via its mpsc channel
//! 2. **Events**: every actor reports into a single channel read by the
//!    aggregator, which is the only writer of the health report

use std::time::Duration;

use tokio::sync::oneshot;

use crate::Sample;
use crate::error::{CollectionError, EvaluationError};
use crate::evaluator::Evaluation;
use crate::sources::SourceKind;

/// Commands that can be sent to a source actor
#[derive(Debug)]
pub enum SourceCommand {
    /// Run a cycle now instead of waiting for the next tick.
    ///
    /// Still subject to the at-most-one-in-flight rule: the command is only
    /// picked up once the current cycle is done.
    PollNow {
        respond_to: oneshot::Sender<Result<(), CollectionError>>,
    },

    /// Finish any in-flight cycle, then stop. The source stays in the report
    /// as stopped.
    Shutdown,

    /// Like `Shutdown`, but the source is dropped from the report afterwards.
    Remove,
}

/// How a single cycle ended
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Sampled {
        sample: Sample,
        evaluation: Evaluation,
    },

    Failed(CollectionError),

    /// The sample could not be evaluated. Indicates a broken source.
    Defect {
        sample: Sample,
        error: EvaluationError,
    },
}

impl CycleOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CycleOutcome::Sampled { .. })
    }
}

/// Published by a source actor when a cycle completes
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub source_id: String,

    /// Generation of the actor that ran the cycle
    pub generation: u64,

    pub outcome: CycleOutcome,

    /// How long sampling took
    pub duration: Duration,

    /// Ticks dropped because this cycle overran its interval. The catch-up
    /// tick fired right after an overrun does not count.
    pub skipped: u64,
}

/// Events published by source actors, in order per actor.
///
/// Every actor gets a fresh `generation` from the scheduler, so events of a
/// removed actor can be told apart from those of a newer actor that reuses
/// its source id.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Registered {
        source_id: String,
        generation: u64,
        kind: SourceKind,
    },
    Completed(CycleReport),
    Stopped {
        source_id: String,
        generation: u64,
    },
    Removed {
        source_id: String,
        generation: u64,
    },
}
