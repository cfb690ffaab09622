//! Terminal output for streamed turns, workflow progress and agent mode.
//!
//! Model text goes to stdout as it arrives. Notices go to stderr so piping
//! `redscope ask` keeps only the answer.

use redscope_agent::DisplaySink;
use redscope_workflow::{
    AgentModeObserver, GoalAssessment, PlannedAction, StepResult, TaskNode, TaskTree, TreeStats,
    WorkflowObserver,
};
use serde_json::{Map, Value};
use std::io::Write;

/// Longest tool result shown in full.
const MAX_RESULT_CHARS: usize = 2000;

#[derive(Debug, Default)]
pub struct ConsoleSink {
    mid_line: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

impl DisplaySink for ConsoleSink {
    fn text(&mut self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
        self.mid_line = !text.ends_with('\n');
    }

    fn flush(&mut self) {
        self.end_line();
        let _ = std::io::stdout().flush();
    }

    fn tool_invocation(&mut self, name: &str, arguments: &Map<String, Value>) {
        self.end_line();
        let args = Value::Object(arguments.clone());
        println!("  [tool] {name} {args}");
    }

    fn tool_result(&mut self, call_id: &str, output: &str) {
        self.end_line();
        println!("  [result {call_id}]");
        for line in truncate(output, MAX_RESULT_CHARS).lines() {
            println!("    {line}");
        }
    }

    fn notice(&mut self, message: &str) {
        self.end_line();
        eprintln!("  [!] {message}");
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... ({} more characters)", &text[..cut], text[cut..].chars().count()),
        None => text.to_string(),
    }
}

/// Prints step headers and completions.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl WorkflowObserver for ConsoleObserver {
    fn step_started(&mut self, index: usize, total: usize, description: &str) {
        println!();
        println!("  Step {index}/{total}: {description}");
        println!();
    }

    fn step_finished(&mut self, result: &StepResult) {
        match &result.error {
            None => println!("  Step {} completed", result.index),
            Some(error) => println!("  Step {} incomplete: {error}", result.index),
        }
    }
}

/// Prints agent-mode planning, task choices and goal checks.
#[derive(Debug, Default)]
pub struct ConsoleAgentObserver;

impl AgentModeObserver for ConsoleAgentObserver {
    fn plan_ready(&mut self, tree: &TaskTree) {
        println!();
        println!("  Initial plan:");
        for line in tree.render().lines() {
            println!("    {line}");
        }
    }

    fn iteration_started(&mut self, iteration: usize, limit: usize, stats: &TreeStats) {
        println!();
        println!("  Iteration {iteration}/{limit} ({stats})");
    }

    fn action_selected(&mut self, task: &TaskNode, action: &PlannedAction) {
        println!("  Task: {}", task.description);
        if let Some(rationale) = &action.rationale {
            println!("  Why: {rationale}");
        }
        if let Some(tool) = &action.tool {
            println!("  Tool: {tool}");
        }
        println!();
    }

    fn task_finished(&mut self, task: &TaskNode) {
        println!();
        println!("  Task {}: {}", task.status, task.description);
        if let Some(findings) = &task.findings {
            println!("  Findings: {}", truncate(findings, 300));
        }
    }

    fn goal_checked(&mut self, assessment: &GoalAssessment) {
        if assessment.goal_achieved {
            println!("  Goal check: achieved ({}% confidence)", assessment.confidence);
        } else if let Some(remaining) = &assessment.remaining_objectives {
            println!("  Goal check: not yet ({}% confidence); remaining: {remaining}", assessment.confidence);
        }
    }
}
