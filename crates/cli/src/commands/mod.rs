//! Subcommand implementations.

pub mod agent;
pub mod ask;
pub mod config_cmd;
pub mod interactive;
pub mod tools;
pub mod workflow;
pub mod workflows;

use crate::runtime::Runtime;

/// Commands that need a running [`Runtime`].
pub enum Session {
    Interactive,
    Ask(String),
    Workflow { key: String, target: String },
    Agent(agent::Engagement),
    Tools,
}

pub async fn dispatch(runtime: &Runtime, session: Session) -> anyhow::Result<()> {
    match session {
        Session::Interactive => interactive::run(runtime).await,
        Session::Ask(query) => ask::run(runtime, &query).await,
        Session::Workflow { key, target } => workflow::run(runtime, &key, &target).await,
        Session::Agent(engagement) => agent::run(runtime, engagement).await,
        Session::Tools => tools::run(runtime).await,
    }
}
