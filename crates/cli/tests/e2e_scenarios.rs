//! End-to-end scenarios for the planloop orchestration loop.
//!
//! These drive the public `Orchestrator` API the way `planloop run` does,
//! with a scripted backend standing in for the completion service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use planloop_agent::{FailureKind, Orchestrator, RunStatus};
use planloop_config::{AppConfig, OrchestratorConfig};
use planloop_core::error::ProviderError;
use planloop_core::message::Role;
use planloop_core::provider::{CompletionOptions, Provider, ProviderRequest, ProviderResponse};
use planloop_core::role::RoleKind;
use planloop_core::{PlanDocument, PlanVersion};
use planloop_providers::RetryingProvider;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Answers each role from its own script, keyed by the `Role:` system line.
struct ScriptedProvider {
    scripts: Mutex<HashMap<RoleKind, VecDeque<String>>>,
    fallback: HashMap<RoleKind, String>,
    requests: Mutex<Vec<(RoleKind, ProviderRequest)>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn on(self, role: RoleKind, text: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(text.into());
        self
    }

    fn always(mut self, role: RoleKind, text: impl Into<String>) -> Self {
        self.fallback.insert(role, text.into());
        self
    }

    fn calls(&self, role: RoleKind) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    fn requests(&self, role: RoleKind) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, req)| req.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .expect("system message");
        let role = system
            .content
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Role:"))
            .and_then(RoleKind::from_name)
            .expect("Role: line");

        let queued = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front());
        let content = queued
            .or_else(|| self.fallback.get(&role).cloned())
            .unwrap_or_else(|| panic!("no script for {role}"));

        self.requests.lock().unwrap().push((role, request));
        Ok(ProviderResponse {
            content,
            model: "e2e-model".into(),
            usage: None,
        })
    }
}

/// Never answers.
struct HangingProvider {
    calls: Mutex<usize>,
}

#[async_trait::async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

const REQUEST: &str = "list top 5 security incidents this month";

const TASK: &str = "- Task Objective: List the top 5 security incidents of this month\n\
                    - Expected Deliverables: A ranked list of 5 incidents with date and severity";

const PLAN_V1: &str = r#"{
  "task_type": "security_report",
  "plan_version": "1",
  "steps": [
    {"step_id": 1, "name": "Collect incidents", "action_type": "query",
     "goal": "Gather this month's incidents", "description": "Query the incident feed since the 1st",
     "expected_output": "Incident list", "required_capability": "incident_search"},
    {"step_id": 2, "name": "Rank incidents", "action_type": "analysis",
     "goal": "Pick the top 5", "description": "Rank by impact",
     "expected_output": "Top 5 list", "required_capability": "analysis"}
  ]
}"#;

const PLAN_V2: &str = r#"```json
{
  "task_type": "security_report",
  "plan_version": "2",
  "steps": [
    {"step_id": 1, "name": "Collect incidents", "action_type": "query",
     "goal": "Gather this month's incidents", "description": "Query the incident feed since the 1st",
     "expected_output": "Incident list", "required_capability": "incident_search"},
    {"step_id": 2, "name": "Rank incidents", "action_type": "analysis",
     "goal": "Pick the top 5", "description": "Rank by impact",
     "expected_output": "Top 5 list", "required_capability": "analysis"},
    {"step_id": 3, "name": "Attach severity", "action_type": "enrichment",
     "goal": "Add severity to each incident", "description": "Look up CVSS severity",
     "expected_output": "Top 5 with severity", "required_capability": "vuln_lookup"}
  ]
}
```"#;

const EXEC: &str = "- Execution Input: incident_feed.search(since=month_start)\n\
                    - Execution Result: 5 incidents returned\n\
                    - Execution Error (if any): None";

const FINAL: &str = "1. INC-101 2024-05-02 critical\n\
                     2. INC-087 2024-05-09 high\n\
                     3. INC-112 2024-05-11 high\n\
                     4. INC-095 2024-05-14 medium\n\
                     5. INC-120 2024-05-20 medium\n\
                     TERMINATE";

fn config(max_iterations: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        max_iterations,
        engineer_report: true,
        max_concurrent_steps: 1,
    }
}

fn orchestrator(provider: Arc<dyn Provider>, max_iterations: u32) -> Orchestrator {
    Orchestrator::new(provider, CompletionOptions::new("e2e-model"), config(max_iterations))
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_single_pass_terminates() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(RoleKind::User, TASK)
            .on(RoleKind::Planner, PLAN_V1)
            .on(RoleKind::Engineer, "incident_feed.search(since=month_start)")
            .on(RoleKind::Engineer, "rank(incidents, by=impact, top=5)")
            .on(RoleKind::Engineer, "Both steps ran; 5 incidents ranked.")
            .always(RoleKind::Executor, EXEC)
            .on(RoleKind::Critic, FINAL),
    );
    let orch = orchestrator(provider.clone(), 5);

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.status, RunStatus::Terminated);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.result.starts_with("1. INC-101"));
    assert!(!outcome.result.contains("TERMINATE"));

    assert_eq!(provider.calls(RoleKind::User), 1);
    assert_eq!(provider.calls(RoleKind::Planner), 1);
    // At least one Execution Record per step
    assert_eq!(provider.calls(RoleKind::Executor), 2);

    // The Critic judges against the task, the plan and every record
    let critic = &provider.requests(RoleKind::Critic)[0].messages[1].content;
    assert!(critic.contains("Task Objective: List the top 5 security incidents of this month"));
    assert!(critic.contains("\"plan_version\": \"1\""));
    assert!(critic.contains("[Plan v1 / Step 1: Collect incidents]"));
    assert!(critic.contains("[Plan v1 / Step 2: Rank incidents]"));
}

#[tokio::test]
async fn scenario_b_gap_triggers_revision_then_terminates() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(RoleKind::User, TASK)
            .on(RoleKind::Planner, PLAN_V1)
            .on(RoleKind::Planner, PLAN_V2)
            .always(RoleKind::Engineer, "do the step")
            .always(RoleKind::Executor, EXEC)
            .on(
                RoleKind::Critic,
                "The list has no severity.\n\
                 ```json\n\
                 {\"status\": \"incomplete\", \"summary\": \"severity missing\",\n  \
                  \"gaps\": [{\"step_id\": 2, \"description\": \"severity is not reported\"}]}\n\
                 ```",
            )
            .on(RoleKind::Critic, FINAL),
    );
    let orch = orchestrator(provider.clone(), 5);
    let mut events = orch.event_bus().subscribe();

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.status, RunStatus::Terminated);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(provider.calls(RoleKind::User), 1);
    assert_eq!(provider.calls(RoleKind::Planner), 2);
    // Plan v1 has 2 steps, plan v2 has 3
    assert_eq!(provider.calls(RoleKind::Executor), 5);

    let revision = &provider.requests(RoleKind::Planner)[1].messages[1].content;
    assert!(revision.contains("GAP 1 (step 2): severity is not reported"));
    assert!(revision.contains("plan_version \"2\""));

    let mut versions = Vec::new();
    let mut gaps_reported = 0;
    while let Ok(event) = events.try_recv() {
        match event.as_ref() {
            planloop_core::RunEvent::PlanAccepted { version, .. } => versions.push(*version),
            planloop_core::RunEvent::GapsReported { count, .. } => gaps_reported += count,
            _ => {}
        }
    }
    assert_eq!(versions, vec![PlanVersion(1), PlanVersion(2)]);
    assert_eq!(gaps_reported, 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_backend_timeouts_fail_the_run() {
    let hanging = Arc::new(HangingProvider {
        calls: Mutex::new(0),
    });
    let provider = Arc::new(
        RetryingProvider::new(hanging.clone(), 3)
            .with_timeout(Duration::from_secs(120))
            .with_backoff(Duration::from_millis(500)),
    );
    let orch = orchestrator(provider, 5);

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::BackendUnavailable));
    assert_eq!(*hanging.calls.lock().unwrap(), 4);

    let diag = outcome.diagnostics.unwrap();
    assert_eq!(diag.last_role, Some(RoleKind::User));
    assert_eq!(diag.iteration, 1);
    assert!(outcome.result.starts_with("backend unavailable (User)"));
}

#[tokio::test]
async fn scenario_d_prose_plan_fails_without_engineer() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(RoleKind::User, TASK)
            .on(
                RoleKind::Planner,
                "Sure! First I will search the incident feed, then rank the results.",
            ),
    );
    let orch = orchestrator(provider.clone(), 5);

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidResponse));
    assert_eq!(provider.calls(RoleKind::Engineer), 0);
    assert_eq!(provider.calls(RoleKind::Executor), 0);
    assert_eq!(provider.calls(RoleKind::Critic), 0);
    assert_eq!(
        outcome.diagnostics.unwrap().last_role,
        Some(RoleKind::Planner)
    );
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn never_terminating_critic_hits_the_ceiling() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(RoleKind::User, TASK)
            .on(RoleKind::Planner, PLAN_V1)
            .on(RoleKind::Planner, PLAN_V2)
            .always(RoleKind::Engineer, "do the step")
            .always(RoleKind::Executor, EXEC)
            .always(RoleKind::Critic, "GAP 1 (step 1): dates are wrong"),
    );
    let orch = orchestrator(provider.clone(), 2);

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::IterationCeilingExceeded));
    assert_eq!(outcome.iterations, 3);
    assert_eq!(provider.calls(RoleKind::Critic), 2);

    let diag = outcome.diagnostics.unwrap();
    let plan: PlanDocument = diag.plan.expect("final plan kept");
    assert_eq!(plan.plan_version, PlanVersion(2));
    assert_eq!(diag.gap_report.expect("final gaps kept").len(), 1);
}

#[tokio::test]
async fn critic_routing_is_stable_for_identical_inputs() {
    let script = |p: ScriptedProvider| {
        p.on(RoleKind::User, TASK)
            .on(RoleKind::Planner, PLAN_V1)
            .always(RoleKind::Engineer, "do the step")
            .always(RoleKind::Executor, EXEC)
            .on(RoleKind::Critic, FINAL)
    };
    let first = Arc::new(script(ScriptedProvider::new()));
    let second = Arc::new(script(ScriptedProvider::new()));

    let a = orchestrator(first.clone(), 5).run_task(REQUEST).await;
    let b = orchestrator(second.clone(), 5).run_task(REQUEST).await;

    assert_eq!(a.status, b.status);
    assert_eq!(a.result, b.result);
    // Identical inputs reach the Critic
    assert_eq!(
        first.requests(RoleKind::Critic)[0].messages[1].content,
        second.requests(RoleKind::Critic)[0].messages[1].content
    );
}

#[tokio::test]
async fn config_file_drives_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[backend]\nmodel = \"gpt-4o-mini\"\ntemperature = 0.2\n\n\
         [orchestrator]\nmax_iterations = 1\nengineer_report = false\n",
    )
    .unwrap();
    let config = AppConfig::load_from(&path).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new()
            .on(RoleKind::User, TASK)
            .on(RoleKind::Planner, PLAN_V1)
            .always(RoleKind::Engineer, "do the step")
            .always(RoleKind::Executor, EXEC)
            .always(RoleKind::Critic, "GAP 1: severity missing"),
    );
    let orch = Orchestrator::from_config(provider.clone(), &config);

    let outcome = orch.run_task(REQUEST).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::IterationCeilingExceeded));
    assert_eq!(outcome.iterations, 2);
    // No report pass: one Engineer call per step
    assert_eq!(provider.calls(RoleKind::Engineer), 2);

    let req = &provider.requests(RoleKind::Planner)[0];
    assert_eq!(req.options.model, "gpt-4o-mini");
    assert!((req.options.temperature - 0.2).abs() < f32::EPSILON);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["diagnostics"]["failure"]["kind"], "iteration_ceiling_exceeded");
}
