//! `redscope ask`: answer one query and exit.

use crate::runtime::Runtime;
use redscope_agent::TurnInvoker;

pub async fn run(runtime: &Runtime, query: &str) -> anyhow::Result<()> {
    let history = runtime.agent.context().new_history();
    let outcome = runtime.agent.invoke(query, &history).await;

    if let Some(interruption) = &outcome.interruption {
        anyhow::bail!("Turn did not complete: {}", interruption.error());
    }
    Ok(())
}
