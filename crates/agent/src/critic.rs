//! Reading the Critic's verdict and routing on it.
//!
//! The Critic answers in free text. Two signals are extracted from it:
//!
//! - a termination marker (`TERMINATE`, or the legacy `FINISH`) as a whole
//!   uppercase word
//! - gaps, either as `GAP n (step m): ...` lines or in a fenced
//!   ```` ```json ```` verdict block
//!
//! [`CriticVerdict::decide`] turns the parsed verdict into a [`Route`]. It is
//! a pure function of the verdict and the plan being judged.

use planloop_core::artifact::{Gap, GapReport, PlanDocument};
use serde::Deserialize;

pub const TERMINATE: &str = "TERMINATE";
pub const FINISH: &str = "FINISH";

/// Completion status declared in the verdict block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredStatus {
    Complete,
    Incomplete,
}

/// Everything extracted from one Critic output.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticVerdict {
    /// The termination marker found, if any.
    pub marker: Option<&'static str>,
    pub declared: Option<DeclaredStatus>,
    pub gaps: Vec<Gap>,
    /// Final-answer text with markers and the verdict block removed.
    pub summary: String,
    /// Contract deviations noticed while parsing.
    pub violations: Vec<String>,
}

/// Where the run goes after critique.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Terminate { summary: String },
    Replan(GapReport),
}

/// A routing decision plus the deviations it tolerated.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub route: Route,
    pub violations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictBlock {
    status: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    gaps: Vec<Gap>,
}

impl CriticVerdict {
    pub fn parse(text: &str) -> Self {
        let mut violations = Vec::new();

        let marker = find_marker(text);
        if marker == Some(FINISH) {
            violations.push("Critic used FINISH instead of TERMINATE".to_string());
        }

        let (block, block_span) = match find_verdict_block(text) {
            Some((block, span)) => (Some(block), Some(span)),
            None => (None, None),
        };

        let declared = block.as_ref().and_then(|b| {
            match b.status.trim().to_ascii_lowercase().as_str() {
                "complete" => Some(DeclaredStatus::Complete),
                "incomplete" => Some(DeclaredStatus::Incomplete),
                other => {
                    violations.push(format!("unknown verdict status {other:?}"));
                    None
                }
            }
        });

        let prose = match block_span {
            Some((start, end)) => format!("{}{}", &text[..start], &text[end..]),
            None => text.to_string(),
        };

        let mut gaps: Vec<Gap> = prose.lines().filter_map(parse_gap_line).collect();
        if let Some(block) = &block {
            for gap in &block.gaps {
                if gap.description.trim().is_empty() {
                    continue;
                }
                if !gaps.iter().any(|g| g.description == gap.description) {
                    gaps.push(gap.clone());
                }
            }
        }

        let summary = block
            .and_then(|b| b.summary)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| strip_markers(&prose).trim().to_string());

        Self {
            marker,
            declared,
            gaps,
            summary,
            violations,
        }
    }

    /// Whether the Critic signalled completion. Only a marker ends the run;
    /// a `complete` verdict block alone does not.
    pub fn signals_completion(&self) -> bool {
        self.marker.is_some()
    }

    /// Route the run.
    ///
    /// A marker wins over gaps; a contradiction is reported, not resolved
    /// towards replanning. With no marker and no gaps the run replans on a
    /// single gap carrying the Critic's own words.
    pub fn decide(&self, plan: &PlanDocument) -> Decision {
        let mut violations = self.violations.clone();

        if self.signals_completion() {
            if !self.gaps.is_empty() {
                violations.push(format!(
                    "termination signalled alongside {} gap(s); terminating",
                    self.gaps.len()
                ));
            }
            if self.declared == Some(DeclaredStatus::Incomplete) {
                violations.push("termination marker contradicts an incomplete verdict".into());
            }
            return Decision {
                route: Route::Terminate {
                    summary: self.summary.clone(),
                },
                violations,
            };
        }

        if self.declared == Some(DeclaredStatus::Complete) {
            violations.push("verdict declared complete without a termination marker".into());
        }

        let gaps = if self.gaps.is_empty() {
            violations.push("Critic reported neither gaps nor termination".into());
            vec![Gap {
                description: format!(
                    "Critic did not confirm completion: {}",
                    truncate(&self.summary, 500)
                ),
                step_id: None,
            }]
        } else {
            self.gaps.clone()
        };

        let mut report = GapReport {
            plan_version: plan.plan_version,
            gaps,
        };
        for id in report.reconcile(plan) {
            violations.push(format!(
                "gap references step {id}, which plan version {} does not contain",
                plan.plan_version
            ));
        }

        Decision {
            route: Route::Replan(report),
            violations,
        }
    }
}

/// The termination marker present in `text`, if any.
///
/// Only whole uppercase words count, so "terminated" or "FINISHED" do not.
/// `TERMINATE` wins when both markers appear.
pub fn find_marker(text: &str) -> Option<&'static str> {
    let spans = marker_spans(text);
    if spans.iter().any(|&(_, _, m)| m == TERMINATE) {
        Some(TERMINATE)
    } else if spans.is_empty() {
        None
    } else {
        Some(FINISH)
    }
}

fn marker_spans(text: &str) -> Vec<(usize, usize, &'static str)> {
    let mut spans = Vec::new();
    for marker in [TERMINATE, FINISH] {
        let mut from = 0;
        while let Some(pos) = text[from..].find(marker) {
            let start = from + pos;
            let end = start + marker.len();
            let before_ok = text[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
            let after_ok = text[end..].chars().next().is_none_or(|c| !is_word_char(c));
            if before_ok && after_ok {
                spans.push((start, end, marker));
            }
            from = end;
        }
    }
    spans.sort_unstable();
    spans
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn strip_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end, _) in marker_spans(text) {
        out.push_str(&text[last..start]);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// The last fenced block that parses as a verdict, with its byte span.
fn find_verdict_block(text: &str) -> Option<(VerdictBlock, (usize, usize))> {
    let mut found = None;
    let mut from = 0;
    while let Some(open) = text[from..].find("```") {
        let open = from + open;
        let body_start = match text[open + 3..].find('\n') {
            Some(nl) => open + 3 + nl + 1,
            None => break,
        };
        let Some(close) = text[body_start..].find("```") else {
            break;
        };
        let close = body_start + close;
        let end = close + 3;
        if let Ok(block) = serde_json::from_str::<VerdictBlock>(text[body_start..close].trim()) {
            found = Some((block, (open, end)));
        }
        from = end;
    }

    if found.is_none() {
        let trimmed = text.trim();
        if trimmed.starts_with('{')
            && let Ok(block) = serde_json::from_str::<VerdictBlock>(trimmed)
        {
            let start = text.len() - text.trim_start().len();
            found = Some((block, (start, start + trimmed.len())));
        }
    }
    found
}

/// Parse one `GAP n (step m): description` line.
fn parse_gap_line(line: &str) -> Option<Gap> {
    let s = line.trim_start().trim_start_matches(['-', '*', '#', ' ', '\t']);
    if !s.get(..3)?.eq_ignore_ascii_case("gap") {
        return None;
    }
    let rest = &s[3..];
    if rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    let sep = rest.find([':', '-'])?;
    let head = &rest[..sep];
    let lowered = head.to_ascii_lowercase().replace("step", "");
    if !lowered
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || "#()*.,".contains(c))
    {
        return None;
    }

    let description = rest[sep + 1..].trim().trim_matches('*').trim();
    if description.is_empty() {
        return None;
    }
    Some(Gap {
        description: description.to_string(),
        step_id: step_reference(head),
    })
}

fn step_reference(head: &str) -> Option<u32> {
    let lower = head.to_ascii_lowercase();
    let after = &lower[lower.find("step")? + 4..];
    let digits: String = after
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
