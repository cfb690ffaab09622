//! Agent mode: an autonomous loop over a [`TaskTree`].
//!
//! [`AgentMode::start`] asks the model for an initial plan. Each iteration
//! of [`AgentMode::drive`] then picks the most promising ready task, runs it
//! as an ordinary turn through the [`TurnInvoker`], folds the result back
//! into the tree and checks whether the goal has been met. The loop ends on
//! the goal, the iteration limit, an empty candidate list or a pause
//! request. A paused session can be changed and driven again.
//!
//! Only task executions enter the shared history. Planning, selection,
//! update and goal-check turns see the history but leave it unchanged.

use crate::reasoning::{
    self, ActionChoice, GoalAssessment, MANUAL_TOOL, TreePlan, TreeUpdate, parse_reply,
};
use crate::task_tree::{NewTask, NodeId, NodeStatus, NodeUpdate, TaskNode, TaskTree, TreeStats};
use chrono::{DateTime, Utc};
use redscope_agent::{ConversationHistoryStore, TurnInvoker};
use redscope_config::AgentModeConfig;
use redscope_core::error::WorkflowError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Iterations allowed when the configured limit is 0.
pub const UNBOUNDED_ITERATION_CAP: usize = 500;

/// Goal words that ask for information rather than access.
const INFORMATION_GOAL_WORDS: &[&str] = &[
    "check",
    "identify",
    "determine",
    "find",
    "discover",
    "enumerate",
    "list",
    "version",
    "banner",
];

/// Task words that go past an information goal.
const SCOPE_EXPANSION_WORDS: &[&str] = &[
    "exploit",
    "compromise",
    "attack",
    "penetrate",
    "shell",
    "backdoor",
    "privilege",
    "escalat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GoalAchieved,
    IterationLimit,
    NoViableActions,
    Paused,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GoalAchieved => "goal achieved",
            Self::IterationLimit => "iteration limit reached",
            Self::NoViableActions => "no viable tasks left",
            Self::Paused => "paused",
        })
    }
}

/// A task chosen for execution, with the query that will run it.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub task: NodeId,
    pub query: String,
    pub tool: Option<String>,
    pub rationale: Option<String>,
    pub expected_outcome: Option<String>,
}

/// Shared flag asking a running [`AgentMode::drive`] to stop after the
/// current iteration.
#[derive(Debug, Clone, Default)]
pub struct PauseSwitch(Arc<AtomicBool>);

impl PauseSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Progress callbacks for a running agent.
pub trait AgentModeObserver: Send {
    fn plan_ready(&mut self, _tree: &TaskTree) {}

    fn iteration_started(&mut self, _iteration: usize, _limit: usize, _stats: &TreeStats) {}

    fn action_selected(&mut self, _task: &TaskNode, _action: &PlannedAction) {}

    fn task_finished(&mut self, _task: &TaskNode) {}

    fn goal_checked(&mut self, _assessment: &GoalAssessment) {}
}

impl AgentModeObserver for crate::engine::NullObserver {}

/// One agent-mode engagement: the tree plus loop bookkeeping.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub id: Uuid,
    pub tree: TaskTree,
    pub iterations: usize,
    iteration_limit: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub goal_achieved: bool,
    pub evidence: Option<String>,
    pub stop: Option<StopReason>,
}

impl AgentSession {
    fn new(tree: TaskTree, iteration_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            tree,
            iterations: 0,
            iteration_limit,
            started_at: Utc::now(),
            finished_at: None,
            goal_achieved: false,
            evidence: None,
            stop: None,
        }
    }

    /// The configured limit; 0 means "until done".
    pub fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }

    pub fn set_iteration_limit(&mut self, limit: usize) {
        self.iteration_limit = limit;
    }

    /// The limit the loop actually enforces.
    pub fn effective_limit(&self) -> usize {
        match self.iteration_limit {
            0 => UNBOUNDED_ITERATION_CAP,
            limit => limit,
        }
    }

    /// Attach a task by hand, under the phase matching `phase` if any.
    pub fn add_manual_task(&mut self, phase: Option<&str>, task: NewTask) -> NodeId {
        let parent = phase.map_or(TaskTree::ROOT, |p| self.tree.find_structure(p));
        self.tree.add_task(parent, task)
    }

    pub fn summary(&self) -> String {
        let stats = self.tree.stats();
        format!(
            "Iterations: {}/{}, tasks completed: {}/{}, vulnerable: {}",
            self.iterations,
            self.effective_limit(),
            stats.completed,
            stats.total,
            stats.vulnerable
        )
    }
}

#[derive(Debug, Clone)]
pub struct AgentMode {
    iteration_limit: usize,
    goal_confidence: u8,
    action_delay: Duration,
}

impl AgentMode {
    pub fn new(iteration_limit: usize, goal_confidence: u8, action_delay: Duration) -> Self {
        Self {
            iteration_limit,
            goal_confidence,
            action_delay,
        }
    }

    pub fn from_config(config: &AgentModeConfig) -> Self {
        Self::new(
            config.iteration_limit,
            config.goal_confidence,
            config.action_delay(),
        )
    }

    pub fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }

    /// Plan a new engagement. A reply without a usable plan leaves a tree
    /// holding only the objective, which then runs as the first task.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        &self,
        goal: &str,
        target: &str,
        notes: Option<String>,
        tools: &[String],
        history: &ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
        observer: &mut dyn AgentModeObserver,
    ) -> Result<AgentSession, WorkflowError> {
        let goal = goal.trim();
        let target = target.trim();
        if goal.is_empty() {
            return Err(WorkflowError::EmptyGoal);
        }
        if target.is_empty() {
            return Err(WorkflowError::EmptyTarget);
        }

        let mut tree = TaskTree::new(goal, target).with_notes(notes);
        let reply = invoker
            .invoke(&reasoning::plan_prompt(&tree, tools), history)
            .await;
        match parse_reply::<TreePlan>(&reply.output) {
            Some(plan) if !plan.initial_tasks.is_empty() => apply_plan(&mut tree, plan),
            _ => warn!("No usable plan in reply; starting from the objective alone"),
        }

        let session = AgentSession::new(tree, self.iteration_limit);
        info!(session_id = %session.id, %goal, %target, nodes = session.tree.len(), "Agent mode planned");
        observer.plan_ready(&session.tree);
        Ok(session)
    }

    /// Run iterations until the goal is met, the limit is hit, nothing is
    /// left to try or `pause` is requested.
    pub async fn drive(
        &self,
        session: &mut AgentSession,
        tools: &[String],
        history: &mut ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
        observer: &mut dyn AgentModeObserver,
        pause: &PauseSwitch,
    ) -> StopReason {
        let stop = loop {
            if session.goal_achieved {
                break StopReason::GoalAchieved;
            }
            if pause.take() {
                break StopReason::Paused;
            }
            if session.iterations >= session.effective_limit() {
                break StopReason::IterationLimit;
            }

            session.iterations += 1;
            observer.iteration_started(
                session.iterations,
                session.effective_limit(),
                &session.tree.stats(),
            );

            let Some(action) = self.select_action(session, tools, history, invoker).await else {
                self.check_goal(session, history, invoker, observer).await;
                break if session.goal_achieved {
                    StopReason::GoalAchieved
                } else {
                    StopReason::NoViableActions
                };
            };
            if let Some(task) = session.tree.node(action.task) {
                observer.action_selected(task, &action);
            }

            self.execute(session, &action, history, invoker).await;
            if let Some(task) = session.tree.node(action.task) {
                observer.task_finished(task);
            }

            self.check_goal(session, history, invoker, observer).await;
            if session.goal_achieved {
                break StopReason::GoalAchieved;
            }

            tokio::time::sleep(self.action_delay).await;
        };

        session.stop = Some(stop);
        session.finished_at = Some(Utc::now());
        info!(session_id = %session.id, reason = %stop, summary = %session.summary(), "Agent mode stopped");
        stop
    }

    async fn select_action(
        &self,
        session: &AgentSession,
        tools: &[String],
        history: &ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
    ) -> Option<PlannedAction> {
        let tree = &session.tree;
        let ranked = tree.prioritize(&tree.candidates());
        let first = *ranked.first()?;

        let reply = invoker
            .invoke(&reasoning::next_action_prompt(tree, &ranked, tools), history)
            .await;
        let choice = parse_reply::<ActionChoice>(&reply.output).unwrap_or_default();

        let listed = ranked.len().min(reasoning::MAX_LISTED_CANDIDATES);
        let task = match choice.selected_task_index {
            Some(index @ 1..) if index <= listed => ranked[index - 1],
            other => {
                debug!(index = ?other, "Selection out of range; taking the top candidate");
                first
            }
        };
        let node = tree.node(task)?;

        let tool = choice.tool.or_else(|| node.tool.clone());
        let base = choice
            .command
            .unwrap_or_else(|| reasoning::default_task_query(tree, &node.description));
        let query = match &tool {
            Some(name) if is_unavailable(name, tools) => {
                debug!(tool = %name, "Suggested tool not connected; asking for an alternative");
                reasoning::adaptation_query(&base, name, tools)
            }
            _ => base,
        };

        Some(PlannedAction {
            task,
            query,
            tool,
            rationale: choice.rationale,
            expected_outcome: choice.expected_outcome,
        })
    }

    async fn execute(
        &self,
        session: &mut AgentSession,
        action: &PlannedAction,
        history: &mut ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
    ) {
        session.tree.set_status(action.task, NodeStatus::InProgress);
        let outcome = invoker.invoke(&action.query, history).await;

        if outcome.output.trim().is_empty() {
            let reason = outcome
                .interruption
                .as_ref()
                .map_or_else(|| "no output".to_string(), |i| i.error().to_string());
            warn!(task = %action.task, %reason, "Agent task produced nothing");
            session.tree.apply(
                action.task,
                NodeUpdate {
                    status: Some(NodeStatus::Failed),
                    findings: Some(format!("Execution failed: {reason}")),
                    command: Some(action.query.clone()),
                    ..Default::default()
                },
            );
            return;
        }

        history.append_turn(action.query.clone(), outcome.output.clone());

        let prompt = reasoning::update_prompt(&session.tree, action.task, &action.query, &outcome.output);
        let reply = invoker.invoke(&prompt, history).await;
        let Some(update) = parse_reply::<TreeUpdate>(&reply.output) else {
            session.tree.apply(
                action.task,
                NodeUpdate {
                    status: Some(NodeStatus::Completed),
                    command: Some(action.query.clone()),
                    ..Default::default()
                },
            );
            return;
        };

        let findings = update.node_updates;
        let status = findings
            .status
            .as_deref()
            .and_then(NodeStatus::parse)
            .filter(|s| !matches!(s, NodeStatus::Pending | NodeStatus::InProgress))
            .unwrap_or(NodeStatus::Completed);
        session.tree.apply(
            action.task,
            NodeUpdate {
                status: Some(status),
                findings: findings.findings,
                output_summary: findings.output_summary,
                command: Some(action.query.clone()),
            },
        );

        if information_goal_met(&session.tree) {
            debug!("Information goal answered; not expanding the tree");
            return;
        }
        let information_goal = is_information_goal(session.tree.goal());
        for planned in update.new_tasks {
            if planned.description.trim().is_empty() {
                continue;
            }
            if information_goal && expands_scope(&planned.description) {
                debug!(task = %planned.description, "Dropping task outside an information goal");
                continue;
            }
            let parent = session.tree.find_structure(&planned.parent);
            session.tree.add_task(parent, planned.into_new_task());
        }
    }

    async fn check_goal(
        &self,
        session: &mut AgentSession,
        history: &ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
        observer: &mut dyn AgentModeObserver,
    ) {
        let reply = invoker
            .invoke(&reasoning::goal_check_prompt(&session.tree), history)
            .await;
        let Some(assessment) = parse_reply::<GoalAssessment>(&reply.output) else {
            return;
        };
        observer.goal_checked(&assessment);
        if assessment.goal_achieved && assessment.confidence >= self.goal_confidence {
            session.goal_achieved = true;
            session.evidence = assessment.evidence;
        }
    }
}

fn apply_plan(tree: &mut TaskTree, plan: TreePlan) {
    let mut phases: HashMap<String, NodeId> = HashMap::new();
    for structure in plan.structure {
        let name = structure.name.trim();
        if name.is_empty() || phases.contains_key(&name.to_lowercase()) {
            continue;
        }
        let id = tree.add_phase(TaskTree::ROOT, name, &structure.description);
        phases.insert(name.to_lowercase(), id);
    }

    for planned in plan.initial_tasks {
        if planned.description.trim().is_empty() {
            continue;
        }
        let parent = if planned.is_root_level() {
            TaskTree::ROOT
        } else {
            phases
                .get(&planned.parent.trim().to_lowercase())
                .copied()
                .unwrap_or_else(|| tree.find_structure(&planned.parent))
        };
        tree.add_task(parent, planned.into_new_task());
    }
}

fn is_unavailable(tool: &str, tools: &[String]) -> bool {
    !tools.is_empty()
        && !tool.eq_ignore_ascii_case(MANUAL_TOOL)
        && !tools.iter().any(|t| t.eq_ignore_ascii_case(tool))
}

fn is_information_goal(goal: &str) -> bool {
    let goal = goal.to_lowercase();
    INFORMATION_GOAL_WORDS.iter().any(|w| goal.contains(w))
}

fn expands_scope(task: &str) -> bool {
    let task = task.to_lowercase();
    SCOPE_EXPANSION_WORDS.iter().any(|w| task.contains(w))
}

/// Cheap check for an information goal already answered by a completed
/// task's findings.
fn information_goal_met(tree: &TaskTree) -> bool {
    let goal = tree.goal().to_lowercase();
    if !is_information_goal(&goal) {
        return false;
    }
    tree.nodes()
        .iter()
        .filter(|n| n.status == NodeStatus::Completed)
        .any(|node| {
            let Some(findings) = &node.findings else {
                return false;
            };
            let findings = findings.to_lowercase();
            let description = node.description.to_lowercase();
            ["version", "banner"]
                .iter()
                .any(|w| goal.contains(w) && findings.contains(w))
                || INFORMATION_GOAL_WORDS
                    .iter()
                    .any(|w| goal.contains(w) && description.contains(w))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NullObserver;
    use async_trait::async_trait;
    use redscope_agent::{Interruption, TokenCounter, TurnOutcome};
    use std::sync::Mutex;

    /// Answers each query from a script and remembers what it saw.
    struct ScriptedInvoker {
        answers: Mutex<Vec<TurnOutcome>>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedInvoker {
        fn new(answers: Vec<&str>) -> Self {
            Self::with_outcomes(
                answers
                    .into_iter()
                    .map(|a| TurnOutcome {
                        output: a.to_string(),
                        max_tokens: 4096,
                        interruption: None,
                    })
                    .collect(),
            )
        }

        fn with_outcomes(outcomes: Vec<TurnOutcome>) -> Self {
            Self {
                answers: Mutex::new(outcomes.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(q, _)| q.clone()).collect()
        }

        fn history_sizes(&self) -> Vec<usize> {
            self.seen.lock().unwrap().iter().map(|(_, n)| *n).collect()
        }
    }

    #[async_trait]
    impl TurnInvoker for ScriptedInvoker {
        async fn invoke(&self, query: &str, history: &ConversationHistoryStore) -> TurnOutcome {
            self.seen.lock().unwrap().push((query.to_string(), history.len()));
            self.answers.lock().unwrap().pop().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct Events(Vec<String>);

    impl AgentModeObserver for Events {
        fn plan_ready(&mut self, tree: &TaskTree) {
            self.0.push(format!("plan {}", tree.len()));
        }

        fn iteration_started(&mut self, iteration: usize, limit: usize, _stats: &TreeStats) {
            self.0.push(format!("iteration {iteration}/{limit}"));
        }

        fn action_selected(&mut self, task: &TaskNode, _action: &PlannedAction) {
            self.0.push(format!("run {}", task.description));
        }

        fn task_finished(&mut self, task: &TaskNode) {
            self.0.push(format!("{} {}", task.status, task.description));
        }

        fn goal_checked(&mut self, assessment: &GoalAssessment) {
            self.0.push(format!("goal {}", assessment.confidence));
        }
    }

    const PLAN: &str = r#"```json
{"analysis": "two phases",
 "structure": [{"name": "Phase 1", "description": "Reconnaissance"},
               {"name": "Phase 2", "description": "Vulnerability assessment"}],
 "initial_tasks": [
   {"description": "Review TLS configuration", "parent": "Phase 2", "tool_suggestion": "web", "priority": 6},
   {"description": "Port scan of the host", "parent": "Phase 1", "tool_suggestion": "nmap", "priority": 5},
   {"description": "Whois lookup", "parent": "root", "tool_suggestion": "manual", "priority": 2}
 ]}
```"#;

    const NOT_YET: &str = r#"{"goal_achieved": false, "confidence": 20}"#;
    const DONE: &str = r#"{"goal_achieved": true, "confidence": 90, "evidence": "ports 22, 80 open"}"#;

    fn history() -> ConversationHistoryStore {
        ConversationHistoryStore::new(Arc::new(TokenCounter::heuristic()), 4000, 50)
    }

    fn mode(limit: usize) -> AgentMode {
        AgentMode::new(limit, 80, Duration::from_secs(2))
    }

    fn tools() -> Vec<String> {
        vec!["nmap".into(), "web".into()]
    }

    async fn planned(invoker: &ScriptedInvoker, limit: usize) -> AgentSession {
        mode(limit)
            .start(
                "Assess exposure of the host",
                "10.0.0.5",
                None,
                &tools(),
                &history(),
                invoker,
                &mut NullObserver,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plan_builds_phases_and_tasks() {
        let invoker = ScriptedInvoker::new(vec![PLAN]);
        let mut events = Events::default();
        let session = mode(5)
            .start("Assess exposure", "10.0.0.5", None, &tools(), &history(), &invoker, &mut events)
            .await
            .unwrap();

        let tree = &session.tree;
        assert_eq!(tree.len(), 6);
        let phase1 = tree.find_structure("phase 1");
        let scan = tree
            .nodes()
            .iter()
            .find(|n| n.description == "Port scan of the host")
            .unwrap();
        assert_eq!(scan.parent, Some(phase1));
        assert_eq!(scan.tool.as_deref(), Some("nmap"));
        let whois = tree.nodes().iter().find(|n| n.description == "Whois lookup").unwrap();
        assert_eq!(whois.parent, Some(TaskTree::ROOT));

        // scan 5+3 beats TLS review 6
        let ranked = tree.prioritize(&tree.candidates());
        assert_eq!(ranked[0], scan.id);
        assert_eq!(events.0, vec!["plan 6"]);
        assert!(invoker.queries()[0].contains("AVAILABLE TOOLS: nmap, web"));
    }

    #[tokio::test]
    async fn empty_goal_or_target_is_rejected() {
        let invoker = ScriptedInvoker::new(vec![]);
        let agent = mode(5);
        let err = agent
            .start(" ", "h", None, &[], &history(), &invoker, &mut NullObserver)
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::EmptyGoal);

        let err = agent
            .start("Find ports", "", None, &[], &history(), &invoker, &mut NullObserver)
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::EmptyTarget);
        assert!(invoker.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn goal_met_after_first_task_stops_the_loop() {
        let invoker = ScriptedInvoker::new(vec![
            PLAN,
            r#"{"selected_task_index": 1, "command": "Scan 10.0.0.5 for open ports", "tool": "nmap"}"#,
            "22/tcp open ssh\n80/tcp open http",
            r#"{"node_updates": {"status": "completed", "findings": "ports 22, 80 open"}}"#,
            DONE,
        ]);
        let mut session = planned(&invoker, 5).await;
        let mut history = history();
        let mut events = Events::default();

        let stop = mode(5)
            .drive(&mut session, &tools(), &mut history, &invoker, &mut events, &PauseSwitch::new())
            .await;

        assert_eq!(stop, StopReason::GoalAchieved);
        assert_eq!(session.iterations, 1);
        assert!(session.goal_achieved);
        assert_eq!(session.evidence.as_deref(), Some("ports 22, 80 open"));
        assert!(session.finished_at.is_some());

        let scan = session
            .tree
            .nodes()
            .iter()
            .find(|n| n.description == "Port scan of the host")
            .unwrap();
        assert_eq!(scan.status, NodeStatus::Completed);
        assert_eq!(scan.findings.as_deref(), Some("ports 22, 80 open"));
        assert_eq!(scan.command.as_deref(), Some("Scan 10.0.0.5 for open ports"));

        assert_eq!(history.len(), 1);
        assert_eq!(history.snapshot()[0].user_query, "Scan 10.0.0.5 for open ports");
        assert_eq!(
            events.0,
            vec![
                "iteration 1/5",
                "run Port scan of the host",
                "completed Port scan of the host",
                "goal 90",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn low_confidence_runs_to_the_iteration_limit() {
        let mut script = vec![PLAN];
        for _ in 0..2 {
            script.extend([
                r#"{"selected_task_index": 1}"#,
                "some output",
                r#"{"node_updates": {"status": "completed", "findings": "noted"}}"#,
                r#"{"goal_achieved": true, "confidence": 50}"#,
            ]);
        }
        let invoker = ScriptedInvoker::new(script);
        let mut session = planned(&invoker, 2).await;
        let mut history = history();

        let started = tokio::time::Instant::now();
        let stop = mode(2)
            .drive(&mut session, &tools(), &mut history, &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        assert_eq!(stop, StopReason::IterationLimit);
        assert_eq!(session.iterations, 2);
        assert!(!session.goal_achieved);
        assert_eq!(session.tree.count(NodeStatus::Completed), 2);
        assert_eq!(history.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(session.summary(), "Iterations: 2/2, tasks completed: 2/6, vulnerable: 0");
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_plan_runs_the_objective_itself() {
        let invoker = ScriptedInvoker::new(vec![
            "I would start with a scan.",
            "not json either",
            "Found nginx 1.18",
            "unparsable update",
            NOT_YET,
            NOT_YET,
        ]);
        let mut session = planned(&invoker, 3).await;
        assert_eq!(session.tree.len(), 1);

        let stop = mode(3)
            .drive(&mut session, &[], &mut history(), &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        let root = session.tree.node(TaskTree::ROOT).unwrap();
        assert_eq!(root.status, NodeStatus::Completed);
        assert_eq!(stop, StopReason::NoViableActions);
        assert_eq!(session.iterations, 2);
        let queries = invoker.queries();
        assert_eq!(queries[2], "Goal: Assess exposure of the host (target: 10.0.0.5)");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_execution_marks_the_task_failed_for_retry() {
        let invoker = ScriptedInvoker::with_outcomes(vec![
            TurnOutcome {
                output: PLAN.into(),
                ..Default::default()
            },
            TurnOutcome {
                output: r#"{"selected_task_index": 2}"#.into(),
                ..Default::default()
            },
            TurnOutcome {
                output: String::new(),
                max_tokens: 4096,
                interruption: Some(Interruption::Failed {
                    error: "Connection lost".into(),
                }),
            },
            TurnOutcome {
                output: NOT_YET.into(),
                ..Default::default()
            },
        ]);
        let mut session = planned(&invoker, 1).await;
        let mut history = history();

        let stop = mode(1)
            .drive(&mut session, &tools(), &mut history, &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        assert_eq!(stop, StopReason::IterationLimit);
        let tls = session
            .tree
            .nodes()
            .iter()
            .find(|n| n.description == "Review TLS configuration")
            .unwrap();
        assert_eq!(tls.status, NodeStatus::Failed);
        assert_eq!(tls.findings.as_deref(), Some("Execution failed: Connection lost"));
        assert!(session.tree.candidates().contains(&tls.id));
        assert!(history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_tool_asks_for_an_alternative() {
        let invoker = ScriptedInvoker::new(vec![
            PLAN,
            r#"{"selected_task_index": 1, "command": "Run sslscan on 10.0.0.5", "tool": "sslscan"}"#,
            "TLS 1.2 only",
            "{}",
            DONE,
        ]);
        let mut session = planned(&invoker, 5).await;

        mode(5)
            .drive(&mut session, &tools(), &mut history(), &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        let execution = &invoker.queries()[2];
        assert!(execution.starts_with("Run sslscan on 10.0.0.5"));
        assert!(execution.contains("'sslscan' is not available"));
        assert!(execution.contains("nmap, web"));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_selection_takes_the_top_candidate() {
        let invoker = ScriptedInvoker::new(vec![
            PLAN,
            r#"{"selected_task_index": 9}"#,
            "open ports",
            "{}",
            DONE,
        ]);
        let mut session = planned(&invoker, 5).await;

        mode(5)
            .drive(&mut session, &tools(), &mut history(), &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        let scan = session
            .tree
            .nodes()
            .iter()
            .find(|n| n.description == "Port scan of the host")
            .unwrap();
        assert_eq!(scan.status, NodeStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_before_the_next_iteration_and_resume_continues() {
        let invoker = ScriptedInvoker::new(vec![
            PLAN,
            r#"{"selected_task_index": 1, "command": "Try default credentials on the admin panel"}"#,
            "admin panel at /admin",
            r#"{"node_updates": {"status": "vulnerable", "findings": "default credentials"}}"#,
            DONE,
        ]);
        let mut session = planned(&invoker, 5).await;
        let pause = PauseSwitch::new();
        let agent = mode(5);

        pause.request();
        let stop = agent
            .drive(&mut session, &tools(), &mut history(), &invoker, &mut NullObserver, &pause)
            .await;
        assert_eq!(stop, StopReason::Paused);
        assert_eq!(session.iterations, 0);
        assert!(!pause.is_requested());

        let manual = session.add_manual_task(
            Some("phase 2"),
            NewTask::new("Check the admin panel").with_priority(10),
        );
        assert_eq!(
            session.tree.node(manual).unwrap().parent,
            Some(session.tree.find_structure("phase 2"))
        );

        let stop = agent
            .drive(&mut session, &tools(), &mut history(), &invoker, &mut NullObserver, &pause)
            .await;
        assert_eq!(stop, StopReason::GoalAchieved);
        assert_eq!(session.tree.node(manual).unwrap().status, NodeStatus::Vulnerable);
    }

    #[tokio::test(start_paused = true)]
    async fn information_goal_drops_exploitation_follow_ups() {
        let invoker = ScriptedInvoker::new(vec![
            r#"{"initial_tasks": [{"description": "Fetch the HTTP headers", "tool_suggestion": "web"}]}"#,
            r#"{"selected_task_index": 1}"#,
            "Server: Apache",
            r#"{"node_updates": {"status": "completed", "findings": "Apache httpd"},
                "new_tasks": [
                    {"description": "Exploit Apache path traversal", "priority": 9},
                    {"description": "Read the default error page", "priority": 4}
                ]}"#,
            NOT_YET,
        ]);
        let agent = mode(1);
        let mut session = agent
            .start(
                "Identify the web server software",
                "shop.test",
                None,
                &tools(),
                &history(),
                &invoker,
                &mut NullObserver,
            )
            .await
            .unwrap();

        agent
            .drive(&mut session, &tools(), &mut history(), &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        let descriptions: Vec<_> = session
            .tree
            .nodes()
            .iter()
            .map(|n| n.description.as_str())
            .collect();
        assert!(descriptions.contains(&"Read the default error page"));
        assert!(!descriptions.iter().any(|d| d.contains("Exploit")));
    }

    #[tokio::test(start_paused = true)]
    async fn answered_version_goal_adds_no_follow_ups() {
        let invoker = ScriptedInvoker::new(vec![
            r#"{"initial_tasks": [{"description": "Grab the SSH banner"}]}"#,
            r#"{"selected_task_index": 1}"#,
            "SSH-2.0-OpenSSH_8.9",
            r#"{"node_updates": {"findings": "OpenSSH version 8.9"},
                "new_tasks": [{"description": "Look up CVEs for OpenSSH 8.9"}]}"#,
            NOT_YET,
        ]);
        let agent = mode(1);
        let mut session = agent
            .start("Find the SSH version", "10.0.0.9", None, &[], &history(), &invoker, &mut NullObserver)
            .await
            .unwrap();

        agent
            .drive(&mut session, &[], &mut history(), &invoker, &mut NullObserver, &PauseSwitch::new())
            .await;

        assert_eq!(session.tree.len(), 2);
        assert_eq!(session.tree.count(NodeStatus::Completed), 1);
    }

    #[test]
    fn zero_limit_means_bounded_until_done() {
        let mut session = AgentSession::new(TaskTree::new("g", "t"), 0);
        assert_eq!(session.effective_limit(), UNBOUNDED_ITERATION_CAP);
        session.set_iteration_limit(7);
        assert_eq!(session.effective_limit(), 7);
    }

    #[test]
    fn tool_availability_ignores_case_and_manual() {
        let tools = tools();
        assert!(!is_unavailable("NMAP", &tools));
        assert!(!is_unavailable("manual", &tools));
        assert!(is_unavailable("sqlmap", &tools));
        assert!(!is_unavailable("sqlmap", &[]));
    }
}
