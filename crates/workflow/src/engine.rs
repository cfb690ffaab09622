//! WorkflowEngine: runs a workflow's steps strictly in order.
//!
//! Each step's query embeds the target, the resolved step and the available
//! tools. The step's turn is appended to the shared history before the next
//! step starts, so later steps build on earlier findings. A step that
//! produces nothing usable is recorded with an empty output and the run
//! moves on.

use crate::catalog::WorkflowDefinition;
use chrono::{DateTime, Utc};
use redscope_agent::{ConversationHistoryStore, TurnInvoker};
use redscope_core::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// The outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the workflow
    pub index: usize,

    /// The step template with the target substituted
    pub description: String,

    /// The model's answer; empty if the step produced nothing usable
    pub output: String,

    /// Why the step produced nothing, or was cut short
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.output.trim().is_empty()
    }
}

/// A finished (or in-progress) execution of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_key: String,
    pub workflow_name: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub steps: Vec<StepResult>,
}

impl WorkflowRun {
    fn start(definition: &WorkflowDefinition, target: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_key: definition.key.clone(),
            workflow_name: definition.name.clone(),
            target: target.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            total_steps: definition.steps.len(),
            steps: Vec::with_capacity(definition.steps.len()),
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_complete()).count()
    }

    pub fn summary(&self) -> String {
        format!("Steps executed: {}/{}", self.completed_steps(), self.total_steps)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Progress callbacks for a running workflow.
pub trait WorkflowObserver: Send {
    fn step_started(&mut self, index: usize, total: usize, description: &str);

    fn step_finished(&mut self, result: &StepResult);
}

#[derive(Debug, Default)]
pub struct NullObserver;

impl WorkflowObserver for NullObserver {
    fn step_started(&mut self, _index: usize, _total: usize, _description: &str) {}
    fn step_finished(&mut self, _result: &StepResult) {}
}

/// The query sent to the model for one step.
pub fn step_query(target: &str, step: &str, tool_names: &[String]) -> String {
    let tools = if tool_names.is_empty() {
        "none".to_string()
    } else {
        tool_names.join(", ")
    };
    format!(
        "TARGET: {target}\n\
         STEP: {step}\n\
         AVAILABLE TOOLS: {tools}\n\n\
         Execute this step against the target, using the available tools where they help. \
         Report your findings, rate the severity of each, and give remediation guidance."
    )
}

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    step_delay: Duration,
}

impl WorkflowEngine {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        target: &str,
        tool_names: &[String],
        history: &mut ConversationHistoryStore,
        invoker: &dyn TurnInvoker,
        observer: &mut dyn WorkflowObserver,
    ) -> Result<WorkflowRun, WorkflowError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(WorkflowError::EmptyTarget);
        }
        definition.validate()?;

        let mut run = WorkflowRun::start(definition, target);
        let total = definition.steps.len();
        info!(run_id = %run.id, workflow = %definition.key, %target, steps = total, "Starting workflow");

        for (position, description) in definition.resolved_steps(target).into_iter().enumerate() {
            let index = position + 1;
            observer.step_started(index, total, &description);

            let query = step_query(target, &description, tool_names);
            let outcome = invoker.invoke(&query, history).await;

            let error = match (&outcome.interruption, outcome.output.trim().is_empty()) {
                (Some(interruption), _) => Some(interruption.error().to_string()),
                (None, true) => Some("no output".to_string()),
                (None, false) => None,
            };
            if let Some(error) = &error {
                warn!(workflow = %definition.key, step = index, %error, "Workflow step incomplete");
            }

            history.append_turn(query, outcome.output.clone());

            let result = StepResult {
                index,
                description,
                output: outcome.output,
                error,
            };
            observer.step_finished(&result);
            run.steps.push(result);

            if index < total {
                tokio::time::sleep(self.step_delay).await;
            }
        }

        run.finished_at = Some(Utc::now());
        info!(run_id = %run.id, workflow = %definition.key, summary = %run.summary(), "Workflow finished");
        Ok(run)
    }
}
