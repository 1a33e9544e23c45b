//! Run events: progress notifications from the orchestrator.
//!
//! The orchestrator publishes an event on every transition. Subscribers
//! (the CLI progress printer, tests) react without the orchestrator knowing
//! about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::artifact::PlanVersion;
use crate::role::{RoleKind, RunPhase};

/// Everything observable about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// `run_task` was called
    RunStarted {
        run_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The state machine entered a phase
    PhaseEntered {
        phase: RunPhase,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// A role is about to be invoked
    RoleInvoked {
        role: RoleKind,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// A Planner output parsed and was stored
    PlanAccepted {
        version: PlanVersion,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// The Executor finished one step
    StepExecuted {
        step_id: u32,
        failed: bool,
        timestamp: DateTime<Utc>,
    },

    /// The Critic routed back to the Planner
    GapsReported {
        plan_version: PlanVersion,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A recoverable deviation from the role contract
    ProtocolViolation {
        role: RoleKind,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The run reached Terminated or Failed
    RunFinished {
        run_id: String,
        phase: RunPhase,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for run events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RunEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RunEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
