//! The closed set of participants and the phases of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the five fixed roles. Not user-extensible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    User,
    Planner,
    Engineer,
    Executor,
    Critic,
}

impl RoleKind {
    /// All roles in control-flow order.
    pub const ALL: [RoleKind; 5] = [
        RoleKind::User,
        RoleKind::Planner,
        RoleKind::Engineer,
        RoleKind::Executor,
        RoleKind::Critic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::User => "User",
            RoleKind::Planner => "Planner",
            RoleKind::Engineer => "Engineer",
            RoleKind::Executor => "Executor",
            RoleKind::Critic => "Critic",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    AwaitingTask,
    Planning,
    Executing,
    Critiquing,
    Terminated,
    Failed,
}

impl RunPhase {
    pub fn is_final(&self) -> bool {
        matches!(self, RunPhase::Terminated | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::AwaitingTask => "AwaitingTask",
            RunPhase::Planning => "Planning",
            RunPhase::Executing => "Executing",
            RunPhase::Critiquing => "Critiquing",
            RunPhase::Terminated => "Terminated",
            RunPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}
