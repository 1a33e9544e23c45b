//! Artifacts exchanged between roles.
//!
//! Every role returns raw text. The orchestrator turns that text into one of
//! these value types with the parsers below and refuses anything that does
//! not fit; nothing here ever fills in a default artifact.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// ── Task Description ───────────────────────────────────────────────────────

/// What the User role asked for. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    #[serde(alias = "task_objective")]
    pub objective: String,
    #[serde(alias = "expected_deliverables")]
    pub deliverables: String,
}

impl TaskDescription {
    /// Parse User output.
    ///
    /// Accepts either a JSON object with `objective`/`deliverables` or the
    /// labelled text form:
    ///
    /// ```text
    /// - Task Objective: ...
    /// - Expected Deliverables: ...
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let body = strip_code_fence(text);
        let task = if body.starts_with('{') {
            serde_json::from_str::<TaskDescription>(body)
                .map_err(|e| Error::invalid("task description", e.to_string()))?
        } else {
            let mut fields =
                labeled_fields(body, &["task objective", "expected deliverables"]).into_iter();
            TaskDescription {
                objective: fields.next().flatten().unwrap_or_default(),
                deliverables: fields.next().flatten().unwrap_or_default(),
            }
        };

        if task.objective.trim().is_empty() {
            return Err(Error::invalid("task description", "missing task objective"));
        }
        if task.deliverables.trim().is_empty() {
            return Err(Error::invalid(
                "task description",
                "missing expected deliverables",
            ));
        }
        Ok(task)
    }

    /// Canonical text form handed to downstream roles.
    pub fn render(&self) -> String {
        format!(
            "Task Objective: {}\nExpected Deliverables: {}",
            self.objective, self.deliverables
        )
    }
}

// ── Plan Document ──────────────────────────────────────────────────────────

/// Monotonic plan revision number.
///
/// Serialized as a string on the wire; integers and `"v2"`-style strings are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlanVersion(pub u32);

impl PlanVersion {
    pub const FIRST: PlanVersion = PlanVersion(1);

    /// The following version, or `None` once the counter is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(PlanVersion)
    }
}

impl fmt::Display for PlanVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PlanVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for PlanVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => u32::try_from(n)
                .map(PlanVersion)
                .map_err(|_| D::Error::custom(format!("plan_version {n} out of range"))),
            Raw::Text(s) => s
                .trim()
                .trim_start_matches(['v', 'V'])
                .parse::<u32>()
                .map(PlanVersion)
                .map_err(|_| D::Error::custom(format!("plan_version {s:?} is not an integer"))),
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u32,
    pub name: String,
    pub action_type: String,
    pub goal: String,
    pub description: String,
    pub expected_output: String,
    pub required_capability: String,
}

impl Step {
    /// Short single-line label used in logs and prompts.
    pub fn label(&self) -> String {
        format!("Step {} ({}): {}", self.step_id, self.action_type, self.name)
    }
}

/// The Planner's structured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub task_type: String,
    pub plan_version: PlanVersion,
    pub steps: Vec<Step>,
}

impl PlanDocument {
    /// Parse Planner output.
    ///
    /// The output must be exactly one JSON document. A single surrounding
    /// markdown code fence is tolerated; any other prose is rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let plan: PlanDocument = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| Error::invalid("plan document", e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check the within-version invariants: at least one step, unique IDs.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::invalid("plan document", "plan has no steps"));
        }
        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(step.step_id) {
                return Err(Error::invalid(
                    "plan document",
                    format!("duplicate step_id {}", step.step_id),
                ));
            }
        }
        Ok(())
    }

    pub fn step(&self, step_id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Pretty JSON form handed to downstream roles.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

// ── Gap Report ─────────────────────────────────────────────────────────────

/// One discrepancy between the work done and the Task Description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub description: String,
    /// The plan step this gap is about, if the Critic named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<u32>,
}

/// The Critic's list of gaps, tied to the plan version it evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub plan_version: PlanVersion,
    pub gaps: Vec<Gap>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    /// Clear step references that do not exist in `plan`.
    ///
    /// The gap text is kept so the Planner still sees it. Returns the
    /// orphaned step IDs.
    pub fn reconcile(&mut self, plan: &PlanDocument) -> Vec<u32> {
        let mut orphaned = Vec::new();
        for gap in &mut self.gaps {
            if let Some(id) = gap.step_id
                && plan.step(id).is_none()
            {
                orphaned.push(id);
                gap.step_id = None;
            }
        }
        orphaned
    }

    /// Numbered text form handed to the Planner.
    pub fn render(&self) -> String {
        let mut out = format!("Gaps found in plan version {}:\n", self.plan_version);
        for (i, gap) in self.gaps.iter().enumerate() {
            match gap.step_id {
                Some(id) => out.push_str(&format!("GAP {} (step {}): {}\n", i + 1, id, gap.description)),
                None => out.push_str(&format!("GAP {}: {}\n", i + 1, gap.description)),
            }
        }
        out
    }
}

// ── Execution Record ───────────────────────────────────────────────────────

/// Outcome of one operation the Executor performed for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plan_version: PlanVersion,
    pub step_id: u32,
    pub step_name: String,
    pub input: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Build a record from Executor output.
    ///
    /// Reads the `Execution Input` / `Execution Result` / `Execution Error`
    /// labels when present. Without an input label the delegated operation is
    /// used; without a result label the whole output is the result.
    pub fn from_executor_output(
        plan_version: PlanVersion,
        step: &Step,
        operation: &str,
        output: &str,
    ) -> Self {
        let mut fields = labeled_fields(
            output,
            &["execution input", "execution result", "execution error"],
        )
        .into_iter();
        let input = fields.next().flatten();
        let result = fields.next().flatten();
        let error = fields.next().flatten().filter(|e| !is_blank_error(e));

        Self {
            plan_version,
            step_id: step.step_id,
            step_name: step.name.clone(),
            input: input
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| operation.trim().to_string()),
            result: result.unwrap_or_else(|| output.trim().to_string()),
            error,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "[Plan v{} / Step {}: {}]\nExecution Input: {}\nExecution Result: {}",
            self.plan_version, self.step_id, self.step_name, self.input, self.result
        );
        if let Some(err) = &self.error {
            out.push_str(&format!("\nExecution Error: {err}"));
        }
        out
    }
}

fn is_blank_error(value: &str) -> bool {
    let v = value.trim().trim_end_matches('.').to_ascii_lowercase();
    matches!(v.as_str(), "" | "none" | "n/a" | "na" | "null" | "-" | "no error")
}

// ── Text helpers ───────────────────────────────────────────────────────────

/// Remove one surrounding markdown code fence, if the whole text is fenced.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    if let Some(body) = t.strip_prefix("```").and_then(|r| r.strip_suffix("```")) {
        return match body.find('\n') {
            Some(nl) => body[nl + 1..].trim(),
            None => body.trim(),
        };
    }
    t
}

/// Split `- Label: value` style text into one slot per label.
///
/// Labels match case-insensitively and ignore list bullets, markdown bold
/// and parenthesised suffixes such as `(if any)`. A value runs until the next
/// recognised label line.
fn labeled_fields(text: &str, labels: &[&str]) -> Vec<Option<String>> {
    let mut values: Vec<Option<String>> = vec![None; labels.len()];
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some((idx, rest)) = match_label(line, labels) {
            current = Some(idx);
            let value = values[idx].get_or_insert_with(String::new);
            if !value.is_empty() {
                value.push('\n');
            }
            value.push_str(rest.trim());
        } else if let Some(idx) = current {
            let value = values[idx].get_or_insert_with(String::new);
            value.push('\n');
            value.push_str(line.trim_end());
        }
    }

    values
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect()
}

fn match_label<'a>(line: &'a str, labels: &[&str]) -> Option<(usize, &'a str)> {
    let stripped = line.trim_start().trim_start_matches(['-', '*', '#', ' ']);
    let colon = stripped.find(':')?;
    let head = stripped[..colon].trim().trim_matches('*');
    let head = head.split('(').next().unwrap_or_default().trim();
    let idx = labels.iter().position(|l| l.eq_ignore_ascii_case(head))?;
    Some((idx, stripped[colon + 1..].trim_start_matches('*')))
}
