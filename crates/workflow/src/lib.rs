//! Workflows: named sequences of templated steps run against one target,
//! and agent mode, which plans and runs its own steps.
//!
//! The [`WorkflowCatalog`] holds the built-in assessments plus any defined in
//! config. The [`WorkflowEngine`] runs one of them step by step through the
//! same single-turn path as interactive queries, so each step sees the
//! history the previous steps produced. [`AgentMode`] drives the same path
//! from a [`TaskTree`] it keeps up to date as results come in.

pub mod agent_mode;
pub mod catalog;
pub mod engine;
pub mod reasoning;
pub mod task_tree;

pub use agent_mode::{
    AgentMode, AgentModeObserver, AgentSession, PauseSwitch, PlannedAction, StopReason,
    UNBOUNDED_ITERATION_CAP,
};
pub use catalog::{TARGET_PLACEHOLDER, WorkflowCatalog, WorkflowDefinition, substitute_target};
pub use engine::{NullObserver, StepResult, WorkflowEngine, WorkflowObserver, WorkflowRun, step_query};
pub use reasoning::GoalAssessment;
pub use task_tree::{NewTask, NodeId, NodeKind, NodeStatus, RiskLevel, TaskNode, TaskTree, TreeStats};
