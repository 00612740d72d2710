//! Per-record state machine
//!
//! ```text
//! Pending -> Admitted -> Processing -> Persisting -> Committed -> Released
//!                             |             |
//!                             +-> Failed <--+-------------------> Released
//! ```
//!
//! Only `Released` frees the record's slot. There is no retry edge.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use mediavec_common::types::RecordId;

use super::gate::InFlightSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Pending,
    Admitted,
    Processing,
    Persisting,
    Committed,
    Failed,
    Released,
}

impl RecordState {
    pub fn can_transition_to(self, next: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, next),
            (Pending, Admitted)
                | (Admitted, Processing)
                | (Processing, Persisting)
                | (Processing, Failed)
                | (Persisting, Committed)
                | (Persisting, Failed)
                | (Committed, Released)
                | (Failed, Released)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Committed | RecordState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::Pending => "pending",
            RecordState::Admitted => "admitted",
            RecordState::Processing => "processing",
            RecordState::Persisting => "persisting",
            RecordState::Committed => "committed",
            RecordState::Failed => "failed",
            RecordState::Released => "released",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a record once its slot has been released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub record_id: RecordId,
    /// `Committed` or `Failed`
    pub state: RecordState,
    pub rows_written: usize,
    pub elapsed: Duration,
}

impl RecordOutcome {
    pub fn is_committed(&self) -> bool {
        self.state == RecordState::Committed
    }
}

/// Tracks one admitted record and owns its slot until release
#[derive(Debug)]
pub struct RecordLifecycle {
    record_id: RecordId,
    state: RecordState,
    slot: Option<InFlightSlot>,
    rows_written: usize,
    started: Instant,
}

impl RecordLifecycle {
    /// Start tracking a record that has just taken `slot`
    pub fn admitted(record_id: RecordId, slot: InFlightSlot) -> Self {
        let mut lifecycle = Self {
            record_id,
            state: RecordState::Pending,
            slot: Some(slot),
            rows_written: 0,
            started: Instant::now(),
        };
        lifecycle.transition(RecordState::Admitted);
        lifecycle
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn start_processing(&mut self) -> bool {
        self.transition(RecordState::Processing)
    }

    pub fn start_persisting(&mut self) -> bool {
        self.transition(RecordState::Persisting)
    }

    pub fn commit(&mut self, rows_written: usize) -> bool {
        let moved = self.transition(RecordState::Committed);
        if moved {
            self.rows_written = rows_written;
        }
        moved
    }

    pub fn fail(&mut self) -> bool {
        self.transition(RecordState::Failed)
    }

    /// Free the slot and report how the record ended.
    ///
    /// A record released before reaching a terminal state counts as failed.
    pub fn release(mut self) -> RecordOutcome {
        if !self.state.is_terminal() {
            warn!(
                record_id = %self.record_id,
                state = %self.state,
                "Record released before reaching a terminal state"
            );
            self.state = RecordState::Failed;
        }

        let terminal = self.state;
        self.transition(RecordState::Released);
        drop(self.slot.take());

        RecordOutcome {
            record_id: self.record_id.clone(),
            state: terminal,
            rows_written: self.rows_written,
            elapsed: self.started.elapsed(),
        }
    }

    fn transition(&mut self, next: RecordState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                record_id = %self.record_id,
                from = %self.state,
                to = %next,
                "Ignoring invalid record state transition"
            );
            return false;
        }

        debug!(record_id = %self.record_id, from = %self.state, to = %next, "Record state");
        self.state = next;
        true
    }
}
