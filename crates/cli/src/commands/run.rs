//! `planloop run`: Take one request through the loop.

use std::path::PathBuf;
use std::sync::Arc;

use planloop_agent::{Orchestrator, RunOutcome, RunStatus};
use planloop_config::AppConfig;
use planloop_core::event::RunEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub json: bool,
    /// Print a line per run event on stderr
    pub progress: bool,
}

/// Returns whether the run terminated successfully.
pub async fn run(input: &str, options: RunOptions) -> Result<bool, Box<dyn std::error::Error>> {
    let path = super::config_path(options.config_path);
    let mut config =
        AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(n) = options.max_iterations {
        config.orchestrator.max_iterations = n;
        config.validate()?;
    }

    // Check for API key early: give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables (a .env file works too):");
        eprintln!("    PLANLOOP_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", path.display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = planloop_providers::build_from_config(&config.backend)?;
    let orchestrator = Orchestrator::from_config(provider, &config);

    let printer = (options.progress && !options.json).then(|| {
        let rx = orchestrator.event_bus().subscribe();
        tokio::spawn(relay_progress(rx, |line| eprintln!("  · {line}")))
    });

    let outcome = orchestrator.run_task(input).await;

    // Dropping the orchestrator closes the bus; the printer drains and exits.
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(outcome.status == RunStatus::Terminated)
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome.status {
        RunStatus::Terminated => println!("{}", outcome.result),
        RunStatus::Failed => {
            eprintln!("Run failed: {}", outcome.result);
            if let Some(diag) = &outcome.diagnostics {
                eprintln!("  phase:      {}", diag.phase);
                if let Some(role) = diag.last_role {
                    eprintln!("  last role:  {role}");
                }
                eprintln!("  iteration:  {}", diag.iteration);
                if let Some(plan) = &diag.plan {
                    eprintln!(
                        "  plan:       version {} ({} steps)",
                        plan.plan_version,
                        plan.steps.len()
                    );
                }
                if let Some(report) = &diag.gap_report {
                    eprint!("{}", report.render());
                }
            }
        }
    }

    if let Some(diag) = &outcome.diagnostics
        && !diag.violations.is_empty()
    {
        eprintln!("{} protocol violation(s):", diag.violations.len());
        for v in &diag.violations {
            eprintln!("  [iteration {}] {}: {}", v.iteration, v.role, v.detail);
        }
    }
}

/// Emit a progress line per event until the bus closes.
async fn relay_progress(
    mut rx: broadcast::Receiver<Arc<RunEvent>>,
    mut emit: impl FnMut(String) + Send,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    emit(line);
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

/// One progress line per event, or `None` for events not worth showing.
fn describe(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::PhaseEntered {
            phase, iteration, ..
        } => Some(format!("{phase} (iteration {iteration})")),
        RunEvent::PlanAccepted { version, steps, .. } => {
            Some(format!("plan v{version} accepted with {steps} step(s)"))
        }
        RunEvent::StepExecuted {
            step_id, failed, ..
        } => Some(if *failed {
            format!("step {step_id} reported an error")
        } else {
            format!("step {step_id} done")
        }),
        RunEvent::GapsReported {
            plan_version,
            count,
            ..
        } => Some(format!("{count} gap(s) in plan v{plan_version}")),
        RunEvent::ProtocolViolation { role, detail, .. } => {
            Some(format!("protocol violation by {role}: {detail}"))
        }
        RunEvent::RunFinished { phase, .. } => Some(format!("finished: {phase}")),
        RunEvent::RunStarted { .. } | RunEvent::RoleInvoked { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planloop_core::artifact::PlanVersion;
    use planloop_core::event::EventBus;
    use planloop_core::role::{RoleKind, RunPhase};

    #[test]
    fn describe_progress_events() {
        let now = chrono::Utc::now();
        assert_eq!(
            describe(&RunEvent::PlanAccepted {
                version: PlanVersion(2),
                steps: 3,
                timestamp: now,
            })
            .as_deref(),
            Some("plan v2 accepted with 3 step(s)")
        );
        assert_eq!(
            describe(&RunEvent::PhaseEntered {
                phase: RunPhase::Critiquing,
                iteration: 1,
                timestamp: now,
            })
            .as_deref(),
            Some("Critiquing (iteration 1)")
        );
        assert!(
            describe(&RunEvent::RoleInvoked {
                role: RoleKind::Critic,
                iteration: 1,
                timestamp: now,
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn relay_drains_final_event_after_bus_closes() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(RunEvent::RunFinished {
            run_id: "run-1".into(),
            phase: RunPhase::Failed,
            iteration: 2,
            timestamp: chrono::Utc::now(),
        });
        drop(bus);

        let mut lines = Vec::new();
        relay_progress(rx, |line| lines.push(line)).await;
        assert_eq!(lines, vec!["finished: Failed".to_string()]);
    }
}
