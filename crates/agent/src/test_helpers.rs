//! Shared test helpers for orchestration tests.

use planloop_core::artifact::{PlanDocument, PlanVersion, Step, TaskDescription};
use planloop_core::error::ProviderError;
use planloop_core::message::Role;
use planloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use planloop_core::role::RoleKind;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A mock backend that answers per role.
///
/// The role is read from the `Role: <Name>` first line of the system
/// message. Each role has its own queue of scripted replies; once a queue is
/// empty the role's `always` reply is used. Panics when neither exists.
pub struct RoleScriptedProvider {
    scripts: Mutex<HashMap<RoleKind, VecDeque<Result<String, ProviderError>>>>,
    defaults: HashMap<RoleKind, String>,
    calls: Mutex<Vec<(RoleKind, ProviderRequest)>>,
    delay: Option<Duration>,
}

impl RoleScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            defaults: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Queue one reply for `role`.
    pub fn reply(self, role: RoleKind, text: impl Into<String>) -> Self {
        self.push(role, Ok(text.into()))
    }

    /// Queue one failure for `role`.
    pub fn fail(self, role: RoleKind, error: ProviderError) -> Self {
        self.push(role, Err(error))
    }

    /// Reply used for `role` once its queue is exhausted.
    pub fn always(mut self, role: RoleKind, text: impl Into<String>) -> Self {
        self.defaults.insert(role, text.into());
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, role: RoleKind, entry: Result<String, ProviderError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(entry);
        self
    }

    pub fn calls_for(&self, role: RoleKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    pub fn requests_for(&self, role: RoleKind) -> Vec<ProviderRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, req)| req.clone())
            .collect()
    }

    /// Roles in the order they were invoked.
    pub fn call_order(&self) -> Vec<RoleKind> {
        self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }
}

fn role_of(request: &ProviderRequest) -> Option<RoleKind> {
    let system = request.messages.iter().find(|m| m.role == Role::System)?;
    let first = system.content.lines().next()?;
    RoleKind::from_name(first.strip_prefix("Role:")?)
}

#[async_trait::async_trait]
impl Provider for RoleScriptedProvider {
    fn name(&self) -> &str {
        "role_scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let role = role_of(&request).expect("request without a Role: system line");
        let queued = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&role).and_then(|q| q.pop_front())
        };
        let next = queued
            .or_else(|| self.defaults.get(&role).cloned().map(Ok))
            .unwrap_or_else(|| panic!("RoleScriptedProvider: no response scripted for {role}"));

        self.calls.lock().unwrap().push((role, request));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        next.map(|content| ProviderResponse {
            content,
            model: "mock-model".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

pub fn sample_task() -> TaskDescription {
    TaskDescription {
        objective: "List the top 5 security incidents this month".into(),
        deliverables: "A ranked list with dates and severity".into(),
    }
}

/// User output that parses into [`sample_task`].
pub const USER_REPLY: &str = "- Task Objective: List the top 5 security incidents this month\n\
                              - Expected Deliverables: A ranked list with dates and severity";

pub fn plan_with_steps(version: u32, ids: &[u32]) -> PlanDocument {
    PlanDocument {
        task_type: "security_report".into(),
        plan_version: PlanVersion(version),
        steps: ids
            .iter()
            .map(|&id| Step {
                step_id: id,
                name: format!("step {id}"),
                action_type: "query".into(),
                goal: format!("goal {id}"),
                description: format!("do thing {id}"),
                expected_output: format!("output {id}"),
                required_capability: "incident_search".into(),
            })
            .collect(),
    }
}

/// Planner output for a plan with the given version and step IDs.
pub fn plan_json(version: u32, ids: &[u32]) -> String {
    serde_json::to_string(&plan_with_steps(version, ids)).unwrap()
}
