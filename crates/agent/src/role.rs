//! The five roles and their behavioural contracts.
//!
//! Each role is a goal plus a fixed instruction block sent as the system
//! message on every invocation. The instruction blocks also pin down the
//! output format the orchestrator parses, so a role's contract and its wire
//! format live in one place.

use std::sync::Arc;

use planloop_core::error::Result;
use planloop_core::message::Message;
use planloop_core::provider::{CompletionOptions, Provider, ProviderRequest};
use planloop_core::role::RoleKind;
use serde::Serialize;
use tracing::debug;

/// Static description of one role.
#[derive(Debug, Clone, Serialize)]
pub struct RoleSpec {
    pub kind: RoleKind,
    pub goal: &'static str,
    pub instructions: &'static str,
}

const USER_INSTRUCTIONS: &str = "\
You state what the requester wants. You do not plan, execute, or judge work.

Turn the request into a task description with exactly these two fields:
- Task Objective: what must be achieved, in one paragraph
- Expected Deliverables: what must be handed back when the work is done

Rules:
- Output only the two labelled fields.
- Do not list steps or tools.
- You speak once per run. Never revise the task after it is stated.";

const PLANNER_INSTRUCTIONS: &str = "\
You turn a task description into an ordered plan. You do not execute steps,
report results, or declare the work finished.

Output exactly one JSON document and nothing else:
{
  \"task_type\": \"<short category>\",
  \"plan_version\": \"<version number you were told to emit>\",
  \"steps\": [
    {
      \"step_id\": 1,
      \"name\": \"<short name>\",
      \"action_type\": \"<query | analysis | transform | ...>\",
      \"goal\": \"<what this step achieves>\",
      \"description\": \"<how to carry it out>\",
      \"expected_output\": \"<what the step produces>\",
      \"required_capability\": \"<capability needed>\"
    }
  ]
}

Rules:
- step_id values are unique positive integers.
- When given a gap report, emit a full revised plan that addresses every gap.
- Never write TERMINATE or FINISH.";

const ENGINEER_INSTRUCTIONS: &str = "\
You carry a plan into execution. You do not change the plan or judge whether
the task is complete.

When given a single plan step, output the one concrete operation the Executor
must perform for it: the exact query, command, or transformation, with every
parameter filled in. Output only the operation.

When asked for a report, summarise the execution records you were given:
what ran, what came back, and what failed.

Rules:
- Never add, drop, or reorder steps.
- Never write TERMINATE or FINISH.";

const EXECUTOR_INSTRUCTIONS: &str = "\
You perform exactly one operation and report what happened. You do not plan,
pick operations, or evaluate the overall task.

Output exactly these labelled fields:
- Execution Input: the operation as you performed it
- Execution Result: the output it produced
- Execution Error (if any): the failure, or None

Rules:
- Report errors as they occurred; never invent a successful result.
- Never write TERMINATE or FINISH.";

const CRITIC_INSTRUCTIONS: &str = "\
You compare the work done against the task description. You never execute
steps or change the plan.

If any deliverable is missing, wrong, or incomplete, list every gap, one per
line, naming the plan step when one applies:
GAP 1 (step 2): <what is missing or wrong>
GAP 2: <what is missing or wrong>

If everything expected has been delivered, write the final answer for the
requester and end your message with the single word TERMINATE.

Always close with a verdict block:
```json
{\"status\": \"complete\" | \"incomplete\", \"summary\": \"<final answer or short assessment>\",
 \"gaps\": [{\"step_id\": 2, \"description\": \"<gap>\"}]}
```

Rules:
- Write TERMINATE only when there are no gaps.
- Judge only what the execution records show.";

const ROLE_TABLE: [RoleSpec; 5] = [
    RoleSpec {
        kind: RoleKind::User,
        goal: "State the task objective and the expected deliverables",
        instructions: USER_INSTRUCTIONS,
    },
    RoleSpec {
        kind: RoleKind::Planner,
        goal: "Produce and revise a structured plan for the task",
        instructions: PLANNER_INSTRUCTIONS,
    },
    RoleSpec {
        kind: RoleKind::Engineer,
        goal: "Turn each plan step into a concrete operation and report progress",
        instructions: ENGINEER_INSTRUCTIONS,
    },
    RoleSpec {
        kind: RoleKind::Executor,
        goal: "Perform one delegated operation and report its outcome",
        instructions: EXECUTOR_INSTRUCTIONS,
    },
    RoleSpec {
        kind: RoleKind::Critic,
        goal: "Find the gaps between the work done and the task, or declare completion",
        instructions: CRITIC_INSTRUCTIONS,
    },
];

/// The contract for `kind`.
pub fn role_spec(kind: RoleKind) -> &'static RoleSpec {
    match kind {
        RoleKind::User => &ROLE_TABLE[0],
        RoleKind::Planner => &ROLE_TABLE[1],
        RoleKind::Engineer => &ROLE_TABLE[2],
        RoleKind::Executor => &ROLE_TABLE[3],
        RoleKind::Critic => &ROLE_TABLE[4],
    }
}

/// Every role contract in control-flow order.
pub fn role_table() -> &'static [RoleSpec] {
    &ROLE_TABLE
}

/// A labelled block of context appended to a role's input.
#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub label: &'static str,
    pub body: String,
}

impl ContextBlock {
    pub fn new(label: &'static str, body: impl Into<String>) -> Self {
        Self {
            label,
            body: body.into(),
        }
    }
}

/// A role bound to a completion backend.
pub struct RoleAgent {
    spec: &'static RoleSpec,
    provider: Arc<dyn Provider>,
    options: CompletionOptions,
}

impl RoleAgent {
    pub fn new(kind: RoleKind, provider: Arc<dyn Provider>, options: CompletionOptions) -> Self {
        Self {
            spec: role_spec(kind),
            provider,
            options,
        }
    }

    pub fn kind(&self) -> RoleKind {
        self.spec.kind
    }

    /// The system message for this role.
    ///
    /// The first line is always `Role: <Name>`.
    pub fn system_prompt(&self) -> String {
        format!(
            "Role: {}\nGoal: {}\n\n{}",
            self.spec.kind, self.spec.goal, self.spec.instructions
        )
    }

    /// Build the request without sending it. Deterministic in its inputs.
    pub fn build_request(&self, input: &str, context: &[ContextBlock]) -> ProviderRequest {
        let mut content = input.trim().to_string();
        for block in context {
            content.push_str(&format!("\n\n## {}\n{}", block.label, block.body.trim()));
        }
        ProviderRequest {
            messages: vec![Message::system(self.system_prompt()), Message::user(content)],
            options: self.options.clone(),
        }
    }

    /// Invoke the role once and return its raw text.
    pub async fn respond(&self, input: &str, context: &[ContextBlock]) -> Result<String> {
        let request = self.build_request(input, context);
        let response = self.provider.complete(request).await?;
        debug!(
            role = %self.spec.kind,
            model = %response.model,
            chars = response.content.len(),
            "Role responded"
        );
        Ok(response.content)
    }
}

/// All five roles sharing one backend.
pub struct RoleSet {
    // Indexed by `RoleKind` discriminant; `RoleKind::ALL` is declaration order.
    agents: [RoleAgent; 5],
}

impl RoleSet {
    pub fn new(provider: Arc<dyn Provider>, options: CompletionOptions) -> Self {
        let agents =
            RoleKind::ALL.map(|kind| RoleAgent::new(kind, provider.clone(), options.clone()));
        Self { agents }
    }

    pub fn get(&self, kind: RoleKind) -> &RoleAgent {
        &self.agents[kind as usize]
    }
}
