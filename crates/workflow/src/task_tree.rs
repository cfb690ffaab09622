//! TaskTree: the agent mode's working plan for one engagement.
//!
//! The root node is the objective. Phases group related work, tasks are the
//! units the agent actually executes. Nodes live in one arena and point at
//! each other by [`NodeId`], so the tree can be walked, updated and
//! serialized without shared ownership.
//!
//! Only leaves are ever executed. A leaf is a candidate while it is pending
//! (or failed, so it can be retried) and every task it depends on has
//! completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Vulnerable,
    NotVulnerable,
}

impl NodeStatus {
    /// Parse a status label as a model would write it ("in progress",
    /// "not-vulnerable", "COMPLETED").
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" | "done" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "vulnerable" => Some(Self::Vulnerable),
            "not_vulnerable" => Some(Self::NotVulnerable),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Vulnerable => "vulnerable",
            Self::NotVulnerable => "not vulnerable",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Failed => "[!]",
            Self::Blocked => "[#]",
            Self::Vulnerable => "[V]",
            Self::NotVulnerable => "[-]",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Anything unrecognised is treated as low risk.
    pub fn parse_or_low(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "medium" | "moderate" => Self::Medium,
            "high" | "critical" => Self::High,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Objective,
    Phase,
    Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub description: String,
    pub status: NodeStatus,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub risk: RiskLevel,
    pub dependencies: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A task to attach to the tree.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub tool: Option<String>,
    pub priority: u8,
    pub risk: RiskLevel,
    pub rationale: Option<String>,
    pub dependencies: Vec<NodeId>,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool: None,
            priority: DEFAULT_PRIORITY,
            risk: RiskLevel::Low,
            rationale: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn depends_on(mut self, node: NodeId) -> Self {
        self.dependencies.push(node);
        self
    }
}

/// Fields to overwrite on an existing node. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub status: Option<NodeStatus>,
    pub findings: Option<String>,
    pub output_summary: Option<String>,
    pub command: Option<String>,
}

pub const DEFAULT_PRIORITY: u8 = 5;

pub(crate) fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(1, 10)
}

const RECON_MARKERS: &[&str] = &["recon", "scan"];

/// Below this many completed nodes, reconnaissance work is boosted.
const EARLY_STAGE_COMPLETED: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub vulnerable: usize,
    pub candidates: usize,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes: {} completed, {} pending, {} in progress, {} failed, {} vulnerable; {} ready",
            self.total,
            self.completed,
            self.pending,
            self.in_progress,
            self.failed,
            self.vulnerable,
            self.candidates
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    goal: String,
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    created_at: DateTime<Utc>,
    nodes: Vec<TaskNode>,
}

impl TaskTree {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(goal: impl Into<String>, target: impl Into<String>) -> Self {
        let goal = goal.into();
        let root = TaskNode {
            id: Self::ROOT,
            kind: NodeKind::Objective,
            description: format!("Goal: {goal}"),
            status: NodeStatus::Pending,
            parent: None,
            children: Vec::new(),
            tool: None,
            command: None,
            findings: None,
            output_summary: None,
            rationale: None,
            priority: DEFAULT_PRIORITY,
            risk: RiskLevel::Low,
            dependencies: Vec::new(),
            updated_at: None,
        };
        Self {
            goal,
            target: target.into(),
            notes: None,
            created_at: Utc::now(),
            nodes: vec![root],
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn node(&self, id: NodeId) -> Option<&TaskNode> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn add_phase(&mut self, parent: NodeId, name: &str, details: &str) -> NodeId {
        let description = if details.trim().is_empty() {
            name.trim().to_string()
        } else {
            format!("{}: {}", name.trim(), details.trim())
        };
        self.push(parent, NodeKind::Phase, description, |_| {})
    }

    /// Attach a task. An unknown parent attaches it to the root instead.
    pub fn add_task(&mut self, parent: NodeId, task: NewTask) -> NodeId {
        let NewTask {
            description,
            tool,
            priority,
            risk,
            rationale,
            dependencies,
        } = task;
        self.push(parent, NodeKind::Task, description, |node| {
            node.tool = tool.filter(|t| !t.trim().is_empty());
            node.priority = clamp_priority(priority);
            node.risk = risk;
            node.rationale = rationale;
            node.dependencies = dependencies;
        })
    }

    fn push(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        description: String,
        fill: impl FnOnce(&mut TaskNode),
    ) -> NodeId {
        let parent = if parent.0 < self.nodes.len() {
            parent
        } else {
            Self::ROOT
        };
        let id = NodeId(self.nodes.len());
        let mut node = TaskNode {
            id,
            kind,
            description,
            status: NodeStatus::Pending,
            parent: Some(parent),
            children: Vec::new(),
            tool: None,
            command: None,
            findings: None,
            output_summary: None,
            rationale: None,
            priority: DEFAULT_PRIORITY,
            risk: RiskLevel::Low,
            dependencies: Vec::new(),
            updated_at: Some(Utc::now()),
        };
        fill(&mut node);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) -> bool {
        self.apply(
            id,
            NodeUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
    }

    /// Returns false if `id` is not in the tree.
    pub fn apply(&mut self, id: NodeId, update: NodeUpdate) -> bool {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        if let Some(status) = update.status {
            node.status = status;
        }
        if let Some(findings) = update.findings {
            node.findings = Some(findings);
        }
        if let Some(summary) = update.output_summary {
            node.output_summary = Some(summary);
        }
        if let Some(command) = update.command {
            node.command = Some(command);
        }
        node.updated_at = Some(Utc::now());
        true
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Leaves that could run next, in tree order.
    pub fn candidates(&self) -> Vec<NodeId> {
        self.leaves()
            .filter(|n| matches!(n.status, NodeStatus::Pending | NodeStatus::Failed))
            .filter(|n| self.dependencies_met(n))
            .map(|n| n.id)
            .collect()
    }

    fn dependencies_met(&self, node: &TaskNode) -> bool {
        node.dependencies.iter().all(|dep| {
            self.node(*dep)
                .is_some_and(|d| d.status == NodeStatus::Completed)
        })
    }

    /// Order `candidates` from most to least promising. Ties keep their
    /// original order.
    pub fn prioritize(&self, candidates: &[NodeId]) -> Vec<NodeId> {
        let completed = self.count(NodeStatus::Completed);
        let recon_done = self.has_completed_recon();
        let mut ranked: Vec<(i32, NodeId)> = candidates
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|node| (self.score(node, completed, recon_done), node.id))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    fn score(&self, node: &TaskNode, completed: usize, recon_done: bool) -> i32 {
        let description = node.description.to_lowercase();
        let mut score = i32::from(node.priority);
        if completed < EARLY_STAGE_COMPLETED && is_recon(&description) {
            score += 3;
        }
        if recon_done && description.contains("vuln") {
            score += 2;
        }
        if node.risk == RiskLevel::High {
            score -= 2;
        }
        score
    }

    fn has_completed_recon(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.status == NodeStatus::Completed && is_recon(&n.description.to_lowercase()))
    }

    /// The first phase (or the objective) whose description mentions `name`,
    /// ignoring case. Falls back to the root.
    pub fn find_structure(&self, name: &str) -> NodeId {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Self::ROOT;
        }
        self.nodes
            .iter()
            .filter(|n| n.kind != NodeKind::Task)
            .find(|n| n.description.to_lowercase().contains(&needle))
            .map_or(Self::ROOT, |n| n.id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total: self.nodes.len(),
            pending: self.count(NodeStatus::Pending),
            in_progress: self.count(NodeStatus::InProgress),
            completed: self.count(NodeStatus::Completed),
            failed: self.count(NodeStatus::Failed),
            vulnerable: self.count(NodeStatus::Vulnerable),
            candidates: self.candidates().len(),
        }
    }

    /// Indented outline of the tree with status, tool, priority and findings.
    pub fn render(&self) -> String {
        let mut out = format!("Target: {}\n", self.target);
        if let Some(notes) = &self.notes {
            let _ = writeln!(out, "Notes: {notes}");
        }
        self.render_node(Self::ROOT, 0, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}{} {}", node.status.marker(), node.description);
        if node.kind == NodeKind::Task {
            let _ = write!(out, " (priority {}", node.priority);
            if node.risk != RiskLevel::Low {
                let _ = write!(out, ", {:?} risk", node.risk);
            }
            if let Some(tool) = &node.tool {
                let _ = write!(out, ", tool: {tool}");
            }
            out.push(')');
        }
        out.push('\n');
        if let Some(findings) = &node.findings {
            let _ = writeln!(out, "{indent}    findings: {}", first_line(findings));
        }
        for child in &node.children {
            self.render_node(*child, depth + 1, out);
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn is_recon(lowercase: &str) -> bool {
    RECON_MARKERS.iter().any(|m| lowercase.contains(m))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
