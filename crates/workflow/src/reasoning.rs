//! Prompts for the agent mode's planning turns and lenient parsing of the
//! replies.
//!
//! Models wrap JSON in prose or code fences and play loose with types
//! (priorities as strings, findings as lists). Every reply struct defaults
//! each field, and the deserializers below accept the common variants.

use crate::task_tree::{DEFAULT_PRIORITY, NewTask, NodeId, RiskLevel, TaskTree, clamp_priority};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt::Write as _;
use tracing::debug;

/// At most this many ranked candidates are offered to the model.
pub const MAX_LISTED_CANDIDATES: usize = 10;

/// Tool output beyond this many characters is cut before analysis.
pub const MAX_ANALYZED_OUTPUT: usize = 2000;

/// Tool suggestion meaning "no tool, answer from knowledge".
pub const MANUAL_TOOL: &str = "manual";

/// The first JSON object in `text`: a fenced code block if there is one,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    fenced_blocks(text)
        .chain(brace_span(text))
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    text.split("```").skip(1).step_by(2).map(|block| {
        let block = block.trim_start();
        block
            .strip_prefix("json")
            .or_else(|| block.strip_prefix("JSON"))
            .unwrap_or(block)
    })
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extract and deserialize a reply. `None` if it holds no usable object.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json(text)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(error = %e, "Reply JSON did not match the expected shape");
            None
        }
    }
}

/// Numbers, numeric strings and "8/10" style strings, clamped to 1-10.
fn lenient_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_in(&value).map_or(DEFAULT_PRIORITY, |n| clamp_priority(n.clamp(0, 255) as u8)))
}

/// Confidence as a percentage, clamped to 0-100.
fn lenient_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_in(&value).map_or(0, |n| n.clamp(0, 100) as u8))
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_in(&value).and_then(|n| usize::try_from(n).ok()))
}

fn number_in(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '-')
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Strings as-is; arrays joined by newlines; other values as JSON text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(text_of(&value))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(text_of(&value).unwrap_or_default())
}

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(text_of)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    })
}

/// Reply to the planning prompt.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TreePlan {
    #[serde(deserialize_with = "lenient_string")]
    pub analysis: String,
    pub structure: Vec<PlannedStructure>,
    pub initial_tasks: Vec<PlannedTask>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlannedStructure {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlannedTask {
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    /// Name of the phase the task belongs under; empty or "root" for the
    /// objective itself.
    #[serde(alias = "parent_phase", deserialize_with = "lenient_string")]
    pub parent: String,
    #[serde(alias = "tool", deserialize_with = "lenient_text")]
    pub tool_suggestion: Option<String>,
    #[serde(deserialize_with = "lenient_priority")]
    pub priority: u8,
    #[serde(deserialize_with = "lenient_string")]
    pub risk_level: String,
    #[serde(deserialize_with = "lenient_text")]
    pub rationale: Option<String>,
}

impl Default for PlannedTask {
    fn default() -> Self {
        Self {
            description: String::new(),
            parent: String::new(),
            tool_suggestion: None,
            priority: DEFAULT_PRIORITY,
            risk_level: String::new(),
            rationale: None,
        }
    }
}

impl PlannedTask {
    pub fn is_root_level(&self) -> bool {
        let parent = self.parent.trim();
        parent.is_empty() || parent.eq_ignore_ascii_case("root")
    }

    pub fn into_new_task(self) -> NewTask {
        let mut task = NewTask::new(self.description.trim())
            .with_priority(self.priority)
            .with_risk(RiskLevel::parse_or_low(&self.risk_level));
        task.tool = self.tool_suggestion;
        task.rationale = self.rationale;
        task
    }
}

/// Reply to the next-action prompt.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActionChoice {
    /// 1-based position in the offered candidate list
    #[serde(deserialize_with = "lenient_index")]
    pub selected_task_index: Option<usize>,
    #[serde(deserialize_with = "lenient_text")]
    pub rationale: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub command: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub tool: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub expected_outcome: Option<String>,
}

/// Reply to the tree-update prompt.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TreeUpdate {
    pub node_updates: NodeFindings,
    pub new_tasks: Vec<PlannedTask>,
    #[serde(deserialize_with = "lenient_text")]
    pub insights: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeFindings {
    #[serde(deserialize_with = "lenient_text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub findings: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub output_summary: Option<String>,
}

/// Reply to the goal-check prompt.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GoalAssessment {
    #[serde(deserialize_with = "lenient_bool")]
    pub goal_achieved: bool,
    #[serde(deserialize_with = "lenient_percent")]
    pub confidence: u8,
    #[serde(deserialize_with = "lenient_text")]
    pub evidence: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub remaining_objectives: Option<String>,
}

fn tool_list(tools: &[String]) -> String {
    if tools.is_empty() {
        "none (answer from your own knowledge)".to_string()
    } else {
        tools.join(", ")
    }
}

fn header(tree: &TaskTree) -> String {
    let mut out = format!("GOAL: {}\nTARGET: {}\n", tree.goal(), tree.target());
    if let Some(notes) = tree.notes() {
        let _ = writeln!(out, "NOTES: {notes}");
    }
    out
}

/// Ask for the initial structure and first tasks of a new tree.
pub fn plan_prompt(tree: &TaskTree, tools: &[String]) -> String {
    format!(
        "You are planning an authorized security assessment as a task tree.\n\n\
         {header}AVAILABLE TOOLS: {tools}\n\n\
         Break the goal into the phases it actually needs and the first concrete tasks under \
         them. Stay within the goal: a goal that asks for information does not call for \
         exploitation. Suggest one of the available tools for each task, or \"{MANUAL_TOOL}\" \
         when none fits.\n\n\
         Reply with JSON only, in this shape:\n\
         {{\n  \"analysis\": \"what the goal needs\",\n  \
         \"structure\": [{{\"name\": \"Phase 1\", \"description\": \"what it covers\"}}],\n  \
         \"initial_tasks\": [{{\"description\": \"task\", \"parent\": \"Phase 1 or root\", \
         \"tool_suggestion\": \"tool\", \"priority\": 1-10, \"risk_level\": \"low/medium/high\", \
         \"rationale\": \"why\"}}]\n}}",
        header = header(tree),
        tools = tool_list(tools),
    )
}

/// Ask which of the `ranked` candidates to run next.
pub fn next_action_prompt(tree: &TaskTree, ranked: &[NodeId], tools: &[String]) -> String {
    let mut candidates = String::new();
    for (position, id) in ranked.iter().take(MAX_LISTED_CANDIDATES).enumerate() {
        if let Some(node) = tree.node(*id) {
            let _ = write!(
                candidates,
                "{}. {} (priority {}, status {}",
                position + 1,
                node.description,
                node.priority,
                node.status
            );
            if let Some(tool) = &node.tool {
                let _ = write!(candidates, ", suggested tool {tool}");
            }
            candidates.push_str(")\n");
        }
    }
    format!(
        "{header}AVAILABLE TOOLS: {tools}\n\n\
         CURRENT TREE:\n{tree}\n\
         CANDIDATE TASKS:\n{candidates}\n\
         Pick the candidate that moves the goal forward most. Write the command as a request \
         that uses one of the available tools.\n\n\
         Reply with JSON only:\n\
         {{\"selected_task_index\": 1, \"rationale\": \"why\", \"command\": \"request to execute\", \
         \"tool\": \"tool or {MANUAL_TOOL}\", \"expected_outcome\": \"what it should show\"}}",
        header = header(tree),
        tools = tool_list(tools),
        tree = tree.render(),
    )
}

/// Ask for the tree changes that follow from one executed task.
pub fn update_prompt(tree: &TaskTree, node: NodeId, command: &str, output: &str) -> String {
    let task = tree
        .node(node)
        .map(|n| n.description.as_str())
        .unwrap_or_default();
    let output = truncate_chars(output, MAX_ANALYZED_OUTPUT);
    format!(
        "{header}\nEXECUTED TASK: {task}\nCOMMAND: {command}\n\nOUTPUT:\n{output}\n\n\
         Record what this task established. Add follow-up tasks only where the output points \
         to more work toward the goal.\n\n\
         Reply with JSON only:\n\
         {{\"node_updates\": {{\"status\": \"completed/failed/vulnerable/not_vulnerable\", \
         \"findings\": \"key findings\", \"output_summary\": \"short technical summary\"}}, \
         \"new_tasks\": [{{\"description\": \"task\", \"parent_phase\": \"phase name\", \
         \"tool_suggestion\": \"tool\", \"priority\": 1-10, \"risk_level\": \"low/medium/high\", \
         \"rationale\": \"why\"}}], \"insights\": \"patterns noticed\"}}",
        header = header(tree),
    )
}

/// Ask whether the goal has been met.
pub fn goal_check_prompt(tree: &TaskTree) -> String {
    let mut findings = String::new();
    for node in tree.nodes() {
        if let Some(found) = &node.findings {
            let _ = writeln!(findings, "- {}: {}", node.description, found);
        }
    }
    if findings.is_empty() {
        findings.push_str("(none yet)\n");
    }
    format!(
        "{header}\nFINDINGS SO FAR:\n{findings}\n\
         Judge only the goal as written. Do not widen it.\n\n\
         Reply with JSON only:\n\
         {{\"goal_achieved\": true/false, \"confidence\": 0-100, \
         \"evidence\": \"findings that meet the goal\", \
         \"remaining_objectives\": \"what is still missing\"}}",
        header = header(tree),
    )
}

/// The query sent when a task has no command of its own.
pub fn default_task_query(tree: &TaskTree, task: &str) -> String {
    format!("{task} (target: {})", tree.target())
}

/// Rephrase a task whose suggested tool is not connected.
pub fn adaptation_query(task: &str, missing_tool: &str, tools: &[String]) -> String {
    format!(
        "{task}\n\nThe suggested tool '{missing_tool}' is not available. \
         Use one of these instead: {}. Pick the closest fit and explain what it covers.",
        tool_list(tools)
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_block_wins_over_surrounding_prose() {
        let reply = "Plan follows {not json}\n```json\n{\"analysis\": \"fenced\"}\n```\nDone.";
        assert_eq!(extract_json(reply), Some(json!({"analysis": "fenced"})));
    }

    #[test]
    fn bare_object_in_prose_is_found() {
        let reply = "Sure. {\"goal_achieved\": true, \"confidence\": 90} Hope that helps.";
        assert_eq!(
            extract_json(reply),
            Some(json!({"goal_achieved": true, "confidence": 90}))
        );
    }

    #[test]
    fn unfenced_code_block_is_accepted() {
        let reply = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(reply), Some(json!({"a": 1})));
    }

    #[test]
    fn text_without_an_object_yields_nothing() {
        assert_eq!(extract_json("no structure here"), None);
        assert_eq!(extract_json("[1, 2, 3]"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn planned_tasks_tolerate_loose_types() {
        let plan: TreePlan = parse_reply(
            r#"{"structure": [{"name": "Phase 1"}],
                "initial_tasks": [
                    {"description": "Port scan", "parent": "Phase 1", "priority": "8/10", "risk_level": "Medium"},
                    {"description": "Check TLS", "priority": 42, "tool_suggestion": null},
                    {"description": "Whois", "priority": "soon", "rationale": ["public", "cheap"]}
                ]}"#,
        )
        .unwrap();

        assert_eq!(plan.analysis, "");
        assert_eq!(plan.structure[0].name, "Phase 1");
        let [scan, tls, whois] = &plan.initial_tasks[..] else {
            panic!("expected three tasks");
        };
        assert_eq!(scan.priority, 8);
        assert!(!scan.is_root_level());
        assert_eq!(tls.priority, 10);
        assert!(tls.is_root_level());
        assert_eq!(tls.tool_suggestion, None);
        assert_eq!(whois.priority, DEFAULT_PRIORITY);
        assert_eq!(whois.rationale.as_deref(), Some("public\ncheap"));
    }

    #[test]
    fn planned_task_becomes_a_tree_task() {
        let planned = PlannedTask {
            description: " Enumerate subdomains ".into(),
            tool_suggestion: Some("dns".into()),
            priority: 7,
            risk_level: "HIGH".into(),
            ..Default::default()
        };
        let task = planned.into_new_task();
        assert_eq!(task.description, "Enumerate subdomains");
        assert_eq!(task.tool.as_deref(), Some("dns"));
        assert_eq!(task.priority, 7);
        assert_eq!(task.risk, RiskLevel::High);
    }

    #[test]
    fn action_choice_index_may_be_a_string() {
        let choice: ActionChoice =
            parse_reply(r#"{"selected_task_index": "2", "command": "scan it"}"#).unwrap();
        assert_eq!(choice.selected_task_index, Some(2));
        assert_eq!(choice.command.as_deref(), Some("scan it"));

        let empty: ActionChoice = parse_reply("{}").unwrap();
        assert_eq!(empty.selected_task_index, None);
    }

    #[test]
    fn goal_assessment_reads_strings_and_clamps() {
        let assessment: GoalAssessment =
            parse_reply(r#"{"goal_achieved": "yes", "confidence": "95%", "evidence": ["v2.4.1"]}"#)
                .unwrap();
        assert!(assessment.goal_achieved);
        assert_eq!(assessment.confidence, 95);
        assert_eq!(assessment.evidence.as_deref(), Some("v2.4.1"));

        let capped: GoalAssessment = parse_reply(r#"{"confidence": 250}"#).unwrap();
        assert!(!capped.goal_achieved);
        assert_eq!(capped.confidence, 100);
    }

    #[test]
    fn update_prompt_cuts_long_output() {
        let mut tree = TaskTree::new("Find open ports", "10.0.0.1");
        let task = tree.add_task(TaskTree::ROOT, NewTask::new("Port scan"));
        let output = "x".repeat(MAX_ANALYZED_OUTPUT + 500);

        let prompt = update_prompt(&tree, task, "scan 10.0.0.1", &output);

        assert!(prompt.contains("EXECUTED TASK: Port scan"));
        assert!(prompt.contains("[truncated]"));
        assert!(!prompt.contains(&"x".repeat(MAX_ANALYZED_OUTPUT + 1)));
    }

    #[test]
    fn next_action_prompt_lists_at_most_ten_candidates() {
        let mut tree = TaskTree::new("Map the network", "10.0.0.0/24");
        let ids: Vec<_> = (1..=12)
            .map(|i| tree.add_task(TaskTree::ROOT, NewTask::new(format!("task {i}"))))
            .collect();

        let prompt = next_action_prompt(&tree, &ids, &["nmap".into()]);

        assert!(prompt.contains("10. task 10 (priority 5, status pending)"));
        assert!(!prompt.contains("11. task 11"));
        assert!(prompt.contains("AVAILABLE TOOLS: nmap"));
    }

    #[test]
    fn goal_check_lists_recorded_findings() {
        let mut tree = TaskTree::new("Identify the web server version", "shop.test");
        let task = tree.add_task(TaskTree::ROOT, NewTask::new("Grab banner"));
        tree.apply(
            task,
            crate::task_tree::NodeUpdate {
                findings: Some("nginx/1.18.0".into()),
                ..Default::default()
            },
        );

        let prompt = goal_check_prompt(&tree);
        assert!(prompt.contains("GOAL: Identify the web server version"));
        assert!(prompt.contains("- Grab banner: nginx/1.18.0"));
    }
}
