//! The execution pass: Engineer delegates, Executor performs.
//!
//! For every step of the current plan the Engineer is asked for one concrete
//! operation, and the Executor performs exactly that operation. Steps run
//! strictly in plan order unless `max_concurrent_steps > 1`, in which case up
//! to that many run at once; results are still collected in plan order.
//!
//! ```text
//! Plan Document ──► Engineer ──operation──► Executor ──► Execution Record
//!                      ▲                                        │
//!                      └──────────── (next step) ◄──────────────┘
//! ```

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use planloop_core::artifact::{ExecutionRecord, PlanDocument, Step, TaskDescription};
use planloop_core::error::Error;
use planloop_core::event::{EventBus, RunEvent};
use planloop_core::role::RoleKind;
use tracing::{debug, info, warn};

use crate::critic::find_marker;
use crate::role::{ContextBlock, RoleAgent};

/// A role call that failed during the pass.
#[derive(Debug, thiserror::Error)]
#[error("{role} failed on step {step_id}: {source}")]
pub struct StepFailure {
    pub role: RoleKind,
    /// `0` for the closing report.
    pub step_id: u32,
    #[source]
    pub source: Error,
}

/// What one pass over the plan produced.
#[derive(Debug, Clone, Default)]
pub struct EngineerPass {
    /// One record per step, in plan order.
    pub records: Vec<ExecutionRecord>,
    pub report: Option<String>,
    pub violations: Vec<(RoleKind, String)>,
}

/// Drives the Engineer and Executor over one plan version.
pub struct ExecutionPass<'a> {
    engineer: &'a RoleAgent,
    executor: &'a RoleAgent,
    max_concurrent: usize,
    report: bool,
}

struct StepOutcome {
    record: ExecutionRecord,
    violations: Vec<(RoleKind, String)>,
}

impl<'a> ExecutionPass<'a> {
    pub fn new(engineer: &'a RoleAgent, executor: &'a RoleAgent) -> Self {
        Self {
            engineer,
            executor,
            max_concurrent: 1,
            report: true,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Whether the Engineer closes the pass with a progress report.
    pub fn with_report(mut self, report: bool) -> Self {
        self.report = report;
        self
    }

    /// Execute every step of `plan`.
    ///
    /// The first failing role call aborts the pass; steps still in flight
    /// are dropped with it.
    pub async fn run(
        &self,
        task: &TaskDescription,
        plan: &PlanDocument,
        events: &EventBus,
    ) -> Result<EngineerPass, StepFailure> {
        info!(
            plan_version = %plan.plan_version,
            steps = plan.steps.len(),
            max_concurrent = self.max_concurrent,
            "Executing plan"
        );

        let outcomes: Vec<StepOutcome> = stream::iter(plan.steps.iter())
            .map(|step| self.execute_step(task, plan, step, events))
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let mut pass = EngineerPass::default();
        for outcome in outcomes {
            pass.records.push(outcome.record);
            pass.violations.extend(outcome.violations);
        }

        if self.report {
            let report = self.summarise(task, plan, &pass.records).await?;
            if let Some(marker) = find_marker(&report) {
                warn!(marker, "Engineer report contains a termination marker");
                pass.violations.push((
                    RoleKind::Engineer,
                    format!("Engineer report contained {marker}; ignored"),
                ));
            }
            pass.report = Some(report);
        }

        Ok(pass)
    }

    async fn execute_step(
        &self,
        task: &TaskDescription,
        plan: &PlanDocument,
        step: &Step,
        events: &EventBus,
    ) -> Result<StepOutcome, StepFailure> {
        let mut violations = Vec::new();
        let step_json = serde_json::to_string_pretty(step).unwrap_or_else(|_| step.label());

        let operation = self
            .engineer
            .respond(
                &format!(
                    "Delegate step {} of plan version {} to the Executor.",
                    step.step_id, plan.plan_version
                ),
                &[
                    ContextBlock::new("Task Description", task.render()),
                    ContextBlock::new("Plan Document", plan.render()),
                    ContextBlock::new("Step", step_json),
                ],
            )
            .await
            .map_err(|source| StepFailure {
                role: RoleKind::Engineer,
                step_id: step.step_id,
                source,
            })?;

        if let Some(marker) = find_marker(&operation) {
            warn!(step_id = step.step_id, marker, "Engineer emitted a termination marker");
            violations.push((
                RoleKind::Engineer,
                format!("Engineer emitted {marker} for step {}; ignored", step.step_id),
            ));
        }
        debug!(step = %step.label(), "Operation delegated");

        let output = self
            .executor
            .respond(&operation, &[])
            .await
            .map_err(|source| StepFailure {
                role: RoleKind::Executor,
                step_id: step.step_id,
                source,
            })?;

        if let Some(marker) = find_marker(&output) {
            warn!(step_id = step.step_id, marker, "Executor emitted a termination marker");
            violations.push((
                RoleKind::Executor,
                format!("Executor emitted {marker} for step {}; ignored", step.step_id),
            ));
        }

        let record =
            ExecutionRecord::from_executor_output(plan.plan_version, step, &operation, &output);
        events.publish(RunEvent::StepExecuted {
            step_id: step.step_id,
            failed: record.error.is_some(),
            timestamp: Utc::now(),
        });
        info!(
            step_id = step.step_id,
            failed = record.error.is_some(),
            "Step executed"
        );

        Ok(StepOutcome { record, violations })
    }

    async fn summarise(
        &self,
        task: &TaskDescription,
        plan: &PlanDocument,
        records: &[ExecutionRecord],
    ) -> Result<String, StepFailure> {
        let rendered = records
            .iter()
            .map(ExecutionRecord::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.engineer
            .respond(
                &format!(
                    "Report on the execution of plan version {}.",
                    plan.plan_version
                ),
                &[
                    ContextBlock::new("Task Description", task.render()),
                    ContextBlock::new("Execution Records", rendered),
                ],
            )
            .await
            .map_err(|source| StepFailure {
                role: RoleKind::Engineer,
                step_id: 0,
                source,
            })
    }
}
