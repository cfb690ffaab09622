//! `redscope workflow`: run one workflow against a target.

use crate::console::ConsoleObserver;
use crate::runtime::Runtime;
use redscope_agent::ConversationHistoryStore;
use redscope_workflow::{WorkflowDefinition, WorkflowRun};

pub async fn run(runtime: &Runtime, selector: &str, target: &str) -> anyhow::Result<()> {
    let definition = runtime.catalog.resolve(selector)?;
    let mut history = runtime.agent.context().new_history();
    execute(runtime, definition, target, &mut history).await?;
    Ok(())
}

/// Run `definition`, printing progress and the final summary.
pub async fn execute(
    runtime: &Runtime,
    definition: &WorkflowDefinition,
    target: &str,
    history: &mut ConversationHistoryStore,
) -> anyhow::Result<WorkflowRun> {
    let tools = runtime.tool_names();

    println!();
    println!("  Workflow:     {}", definition.name);
    println!("  Target:       {}", target.trim());
    println!(
        "  Tools:        {}",
        if tools.is_empty() { "none".to_string() } else { tools.join(", ") }
    );
    println!("  Description:  {}", definition.description);

    let run = runtime
        .engine
        .run(definition, target, tools, history, &runtime.agent, &mut ConsoleObserver)
        .await?;

    println!();
    println!("  {}", run.summary());
    if let Some(duration) = run.duration() {
        println!("  Finished in {}s", duration.num_seconds());
    }
    Ok(run)
}
