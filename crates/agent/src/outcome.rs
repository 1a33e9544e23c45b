//! What `run_task` hands back.

use std::fmt;

use planloop_core::artifact::{GapReport, PlanDocument};
use planloop_core::error::{Error, ProviderError};
use planloop_core::role::{RoleKind, RunPhase};
use serde::{Deserialize, Serialize};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Terminated,
    Failed,
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credentials missing or rejected
    Authentication,
    /// Retries exhausted or the backend is unreachable
    BackendUnavailable,
    /// A role's output did not parse into the expected artifact
    InvalidResponse,
    IterationCeilingExceeded,
    /// A structural guard of the orchestrator refused a transition
    Protocol,
    Internal,
}

impl FailureKind {
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Provider(e) => match e {
                ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => {
                    FailureKind::Authentication
                }
                ProviderError::InvalidResponse(_) => FailureKind::InvalidResponse,
                ProviderError::ApiError { status_code, .. } if *status_code < 500 => {
                    FailureKind::InvalidResponse
                }
                ProviderError::BackendUnavailable { .. }
                | ProviderError::ApiError { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Network(_) => FailureKind::BackendUnavailable,
            },
            Error::InvalidArtifact { .. } => FailureKind::InvalidResponse,
            Error::Protocol(_) => FailureKind::Protocol,
            Error::Internal(_) => FailureKind::Internal,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Authentication => "authentication failed",
            FailureKind::BackendUnavailable => "backend unavailable",
            FailureKind::InvalidResponse => "invalid response",
            FailureKind::IterationCeilingExceeded => "iteration ceiling exceeded",
            FailureKind::Protocol => "protocol error",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// The fatal error that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Role whose invocation failed; `None` for orchestrator-level failures.
    pub role: Option<RoleKind>,
}

impl RunFailure {
    pub fn from_error(role: RoleKind, error: &Error) -> Self {
        Self {
            kind: FailureKind::classify(error),
            message: error.to_string(),
            role: Some(role),
        }
    }

    /// A failure raised by the orchestrator itself rather than a role.
    pub fn unattributed(error: &Error) -> Self {
        Self {
            kind: FailureKind::classify(error),
            message: error.to_string(),
            role: None,
        }
    }

    pub fn ceiling(max_iterations: u32) -> Self {
        Self {
            kind: FailureKind::IterationCeilingExceeded,
            message: format!("no termination within {max_iterations} iteration(s)"),
            role: None,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "{} ({role}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// A tolerated deviation from a role's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolViolation {
    pub iteration: u32,
    pub role: RoleKind,
    pub detail: String,
}

/// Run state captured for diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub failure: Option<RunFailure>,
    /// Phase the run was in when it ended or failed.
    pub phase: RunPhase,
    pub last_role: Option<RoleKind>,
    pub iteration: u32,
    pub plan: Option<PlanDocument>,
    pub gap_report: Option<GapReport>,
    pub violations: Vec<ProtocolViolation>,
}

/// Result of one `run_task` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// The Critic's final summary, or the failure description.
    pub result: String,
    pub iterations: u32,
    /// Always present on failure; present on success only if violations were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<RunDiagnostics>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Terminated
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.diagnostics
            .as_ref()
            .and_then(|d| d.failure.as_ref())
            .map(|f| f.kind)
    }
}
