//! The orchestrator: the run state machine.
//!
//! ```text
//! AwaitingTask ──► Planning ──► Executing ──► Critiquing ──► Terminated
//!                     ▲                           │
//!                     └──────── gap report ◄──────┘
//!
//!           (any phase) ──► Failed
//! ```
//!
//! The orchestrator is the only writer of [`RunState`]. Roles return text;
//! the orchestrator parses it into artifacts and folds them in between
//! invocations. Every phase handler returns the next phase or a
//! [`RunFailure`], so each reachable state maps to exactly one of: keep
//! looping, Terminated, or Failed.

use std::sync::Arc;

use chrono::Utc;
use planloop_config::{AppConfig, OrchestratorConfig};
use planloop_core::artifact::{
    ExecutionRecord, GapReport, PlanDocument, PlanVersion, TaskDescription,
};
use planloop_core::error::{Error, Result};
use planloop_core::event::{EventBus, RunEvent};
use planloop_core::provider::{CompletionOptions, Provider};
use planloop_core::role::{RoleKind, RunPhase};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::critic::{CriticVerdict, Route, find_marker};
use crate::engineer::ExecutionPass;
use crate::outcome::{ProtocolViolation, RunDiagnostics, RunFailure, RunOutcome, RunStatus};
use crate::role::{ContextBlock, RoleSet};

/// Everything one run knows. Lives for exactly one `run_task` call.
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    phase: RunPhase,
    iteration: u32,
    task: Option<TaskDescription>,
    plan: Option<PlanDocument>,
    gap_report: Option<GapReport>,
    records: Vec<ExecutionRecord>,
    engineer_report: Option<String>,
    last_role: Option<RoleKind>,
    violations: Vec<ProtocolViolation>,
    result: Option<String>,
    failure: Option<RunFailure>,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            phase: RunPhase::AwaitingTask,
            iteration: 1,
            task: None,
            plan: None,
            gap_report: None,
            records: Vec::new(),
            engineer_report: None,
            last_role: None,
            violations: Vec::new(),
            result: None,
            failure: None,
        }
    }

    pub fn task(&self) -> Option<&TaskDescription> {
        self.task.as_ref()
    }

    pub fn plan(&self) -> Option<&PlanDocument> {
        self.plan.as_ref()
    }

    /// The Task Description can be set once per run.
    fn record_task(&mut self, task: TaskDescription) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::Protocol(
                "Task Description already produced; the User role speaks once per run".into(),
            ));
        }
        self.task = Some(task);
        Ok(())
    }

    /// The version the next plan must carry.
    fn next_plan_version(&self) -> Result<PlanVersion> {
        match &self.plan {
            None => Ok(PlanVersion::FIRST),
            Some(current) => current.plan_version.next().ok_or_else(|| {
                Error::invalid(
                    "plan document",
                    format!("plan_version {} has no successor", current.plan_version),
                )
            }),
        }
    }

    /// Replace the current plan. The first plan is version 1 and later
    /// versions must strictly increase; an accepted plan supersedes the gap
    /// report it answered.
    fn accept_plan(&mut self, plan: PlanDocument) -> Result<()> {
        match &self.plan {
            None if plan.plan_version != PlanVersion::FIRST => {
                return Err(Error::invalid(
                    "plan document",
                    format!(
                        "first plan must be version {}, got {}",
                        PlanVersion::FIRST,
                        plan.plan_version
                    ),
                ));
            }
            Some(current) if plan.plan_version <= current.plan_version => {
                return Err(Error::invalid(
                    "plan document",
                    format!(
                        "plan_version {} does not follow version {}",
                        plan.plan_version, current.plan_version
                    ),
                ));
            }
            _ => {}
        }
        self.plan = Some(plan);
        self.gap_report = None;
        Ok(())
    }
}

/// Drives one task through the roles.
pub struct Orchestrator {
    roles: RoleSet,
    config: OrchestratorConfig,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        options: CompletionOptions,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            roles: RoleSet::new(provider, options),
            config,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Build from the application config. Sampling options come from the
    /// backend section.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let options = CompletionOptions {
            temperature: config.backend.temperature,
            top_p: config.backend.top_p,
            ..CompletionOptions::new(&config.backend.model)
        };
        Self::new(provider, options, config.orchestrator.clone())
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Run one task to Terminated or Failed. Never returns an error; failures
    /// are folded into the outcome.
    pub async fn run_task(&self, initial_input: &str) -> RunOutcome {
        let mut state = RunState::new();
        info!(run_id = %state.run_id, max_iterations = self.config.max_iterations, "Run started");
        self.event_bus.publish(RunEvent::RunStarted {
            run_id: state.run_id.clone(),
            timestamp: Utc::now(),
        });

        while !state.phase.is_final() {
            self.event_bus.publish(RunEvent::PhaseEntered {
                phase: state.phase,
                iteration: state.iteration,
                timestamp: Utc::now(),
            });
            debug!(phase = %state.phase, iteration = state.iteration, "Entering phase");

            let step = match state.phase {
                RunPhase::AwaitingTask => self.obtain_task(&mut state, initial_input).await,
                RunPhase::Planning => self.plan(&mut state).await,
                RunPhase::Executing => self.execute(&mut state).await,
                RunPhase::Critiquing => self.critique(&mut state).await,
                RunPhase::Terminated | RunPhase::Failed => break,
            };

            match step {
                Ok(next) => state.phase = next,
                Err(failure) => {
                    error!(
                        phase = %state.phase,
                        iteration = state.iteration,
                        failure = %failure,
                        "Run failed"
                    );
                    state.failure = Some(failure);
                    break;
                }
            }
        }

        self.finish(state)
    }

    // ── Phase handlers ─────────────────────────────────────────────────────

    async fn obtain_task(
        &self,
        state: &mut RunState,
        initial_input: &str,
    ) -> std::result::Result<RunPhase, RunFailure> {
        if state.task.is_some() {
            let err = Error::Protocol("User role invoked a second time".into());
            return Err(RunFailure::from_error(RoleKind::User, &err));
        }

        let output = self
            .invoke(state, RoleKind::User, initial_input, &[])
            .await?;
        let task = TaskDescription::parse(&output)
            .map_err(|e| RunFailure::from_error(RoleKind::User, &e))?;
        state
            .record_task(task)
            .map_err(|e| RunFailure::from_error(RoleKind::User, &e))?;

        info!(run_id = %state.run_id, "Task Description recorded");
        Ok(RunPhase::Planning)
    }

    async fn plan(&self, state: &mut RunState) -> std::result::Result<RunPhase, RunFailure> {
        let expected = state
            .next_plan_version()
            .map_err(|e| RunFailure::from_error(RoleKind::Planner, &e))?;
        let Some(task) = state.task.clone() else {
            return Err(internal("planning without a Task Description"));
        };

        let mut context = vec![ContextBlock::new("Task Description", task.render())];
        let input = match (&state.gap_report, &state.plan) {
            (Some(report), Some(previous)) => {
                context.push(ContextBlock::new("Current Plan Document", previous.render()));
                context.push(ContextBlock::new("Gap Report", report.render()));
                format!(
                    "Revise the plan so that every gap in the Gap Report is addressed. \
                     Emit the complete plan with plan_version \"{expected}\"."
                )
            }
            _ => format!("Produce the plan for this task with plan_version \"{expected}\"."),
        };

        let output = self.invoke(state, RoleKind::Planner, &input, &context).await?;
        if let Some(marker) = find_marker(&output) {
            self.violation(
                state,
                RoleKind::Planner,
                format!("Planner emitted {marker}; ignored"),
            );
        }

        let plan = PlanDocument::parse(&output)
            .map_err(|e| RunFailure::from_error(RoleKind::Planner, &e))?;
        let (version, steps) = (plan.plan_version, plan.steps.len());
        state
            .accept_plan(plan)
            .map_err(|e| RunFailure::from_error(RoleKind::Planner, &e))?;
        if version != expected {
            self.violation(
                state,
                RoleKind::Planner,
                format!("Planner emitted plan_version {version}; expected {expected}"),
            );
        }

        info!(plan_version = %version, steps, "Plan accepted");
        self.event_bus.publish(RunEvent::PlanAccepted {
            version,
            steps,
            timestamp: Utc::now(),
        });
        Ok(RunPhase::Executing)
    }

    async fn execute(&self, state: &mut RunState) -> std::result::Result<RunPhase, RunFailure> {
        let (Some(task), Some(plan)) = (state.task.clone(), state.plan.clone()) else {
            return Err(internal("executing without a task and a plan"));
        };

        state.last_role = Some(RoleKind::Engineer);
        self.event_bus.publish(RunEvent::RoleInvoked {
            role: RoleKind::Engineer,
            iteration: state.iteration,
            timestamp: Utc::now(),
        });

        let pass = ExecutionPass::new(
            self.roles.get(RoleKind::Engineer),
            self.roles.get(RoleKind::Executor),
        )
        .with_max_concurrent(self.config.max_concurrent_steps)
        .with_report(self.config.engineer_report)
        .run(&task, &plan, &self.event_bus)
        .await
        .map_err(|failure| {
            state.last_role = Some(failure.role);
            RunFailure::from_error(failure.role, &failure.source)
        })?;

        state.last_role = Some(if self.config.engineer_report {
            RoleKind::Engineer
        } else {
            RoleKind::Executor
        });
        for (role, detail) in pass.violations {
            self.violation(state, role, detail);
        }
        state.records.extend(pass.records);
        state.engineer_report = pass.report;
        Ok(RunPhase::Critiquing)
    }

    async fn critique(&self, state: &mut RunState) -> std::result::Result<RunPhase, RunFailure> {
        let (Some(task), Some(plan)) = (state.task.clone(), state.plan.clone()) else {
            return Err(internal("critiquing without a task and a plan"));
        };

        let records = state
            .records
            .iter()
            .map(ExecutionRecord::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut context = vec![
            ContextBlock::new("Task Description", task.render()),
            ContextBlock::new("Plan Document", plan.render()),
            ContextBlock::new("Execution Records", records),
        ];
        if let Some(report) = &state.engineer_report {
            context.push(ContextBlock::new("Engineer Report", report.clone()));
        }

        let output = self
            .invoke(
                state,
                RoleKind::Critic,
                "Evaluate whether the work so far satisfies the Task Description.",
                &context,
            )
            .await?;

        let decision = CriticVerdict::parse(&output).decide(&plan);
        for detail in decision.violations {
            self.violation(state, RoleKind::Critic, detail);
        }

        match decision.route {
            Route::Terminate { summary } => {
                let result = if summary.is_empty() {
                    state.engineer_report.clone().unwrap_or_default()
                } else {
                    summary
                };
                info!(iteration = state.iteration, "Critic signalled termination");
                state.result = Some(result);
                Ok(RunPhase::Terminated)
            }
            Route::Replan(report) => {
                info!(
                    plan_version = %report.plan_version,
                    gaps = report.len(),
                    "Critic reported gaps"
                );
                self.event_bus.publish(RunEvent::GapsReported {
                    plan_version: report.plan_version,
                    count: report.len(),
                    timestamp: Utc::now(),
                });
                state.gap_report = Some(report);
                state.iteration += 1;

                if state.iteration > self.config.max_iterations {
                    return Err(RunFailure::ceiling(self.config.max_iterations));
                }
                Ok(RunPhase::Planning)
            }
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    async fn invoke(
        &self,
        state: &mut RunState,
        role: RoleKind,
        input: &str,
        context: &[ContextBlock],
    ) -> std::result::Result<String, RunFailure> {
        state.last_role = Some(role);
        self.event_bus.publish(RunEvent::RoleInvoked {
            role,
            iteration: state.iteration,
            timestamp: Utc::now(),
        });
        info!(role = %role, iteration = state.iteration, "Invoking role");

        self.roles
            .get(role)
            .respond(input, context)
            .await
            .map_err(|e| RunFailure::from_error(role, &e))
    }

    fn violation(&self, state: &mut RunState, role: RoleKind, detail: String) {
        warn!(role = %role, iteration = state.iteration, detail = %detail, "Protocol violation");
        self.event_bus.publish(RunEvent::ProtocolViolation {
            role,
            detail: detail.clone(),
            timestamp: Utc::now(),
        });
        state.violations.push(ProtocolViolation {
            iteration: state.iteration,
            role,
            detail,
        });
    }

    fn finish(&self, state: RunState) -> RunOutcome {
        let status = if state.failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Terminated
        };
        let final_phase = match status {
            RunStatus::Terminated => RunPhase::Terminated,
            RunStatus::Failed => RunPhase::Failed,
        };

        info!(
            run_id = %state.run_id,
            status = ?status,
            iterations = state.iteration,
            violations = state.violations.len(),
            "Run finished"
        );
        self.event_bus.publish(RunEvent::RunFinished {
            run_id: state.run_id.clone(),
            phase: final_phase,
            iteration: state.iteration,
            timestamp: Utc::now(),
        });

        let result = match (&state.failure, state.result) {
            (Some(failure), _) => failure.to_string(),
            (None, Some(result)) => result,
            (None, None) => String::new(),
        };
        let diagnostics = if state.failure.is_some() || !state.violations.is_empty() {
            Some(RunDiagnostics {
                failure: state.failure,
                phase: state.phase,
                last_role: state.last_role,
                iteration: state.iteration,
                plan: state.plan,
                gap_report: state.gap_report,
                violations: state.violations,
            })
        } else {
            None
        };

        RunOutcome {
            run_id: state.run_id,
            status,
            result,
            iterations: state.iteration,
            diagnostics,
        }
    }
}

fn internal(message: &str) -> RunFailure {
    RunFailure::unattributed(&Error::Internal(message.to_string()))
}
