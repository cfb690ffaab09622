//! `redscope interactive`: the main menu, chat mode, workflow menu and
//! agent mode.

use super::agent::{self, Engagement, Leave};
use super::workflow;
use super::workflows::print_catalog;
use crate::input::{Control, Prompt, parse_control};
use crate::runtime::Runtime;
use redscope_agent::{ConversationHistoryStore, TurnInvoker};

/// Where the user wants to go after leaving a sub-mode.
enum Next {
    Menu,
    Quit,
}

pub async fn run(runtime: &Runtime) -> anyhow::Result<()> {
    let mut prompt = Prompt::stdin();
    let mut history = runtime.agent.context().new_history();

    banner(runtime);

    loop {
        println!();
        println!("  1. Chat");
        println!("  2. Workflows");
        println!("  3. Agent mode");
        println!("  4. Exit");
        println!();

        let Some(line) = prompt.read_line("Select > ").await? else {
            break;
        };

        let next = match line.trim() {
            "1" => chat(runtime, &mut prompt, &mut history).await?,
            "2" => workflow_menu(runtime, &mut prompt, &mut history).await?,
            "3" => agent_mode(runtime, &mut prompt, &mut history).await?,
            "4" | "quit" | "exit" => Next::Quit,
            "" => Next::Menu,
            other => {
                println!("  Unknown option '{other}'");
                Next::Menu
            }
        };

        if let Next::Quit = next {
            break;
        }
    }

    println!();
    println!("  Goodbye.");
    Ok(())
}

fn banner(runtime: &Runtime) {
    println!();
    println!("  redscope: security analysis assistant");
    println!();
    println!("  Model:    {}", runtime.config.model);
    let providers = runtime.provider_lines();
    if providers.is_empty() {
        println!("  Tools:    none configured");
    } else {
        println!("  Tools:");
        for line in providers {
            println!("    {line}");
        }
    }
}

async fn chat(
    runtime: &Runtime,
    prompt: &mut Prompt,
    history: &mut ConversationHistoryStore,
) -> anyhow::Result<Next> {
    println!();
    println!("  Ask a question. 'multi' for multi-line input (end with an empty line),");
    println!("  'history' to show the conversation, 'clear' to reset it,");
    println!("  'menu' to go back, 'quit' to exit.");

    loop {
        println!();
        let Some(line) = prompt.read_line("You > ").await? else {
            return Ok(Next::Quit);
        };

        let query = match parse_control(&line) {
            Control::Quit => return Ok(Next::Quit),
            Control::Menu => return Ok(Next::Menu),
            Control::Empty => continue,
            Control::History => {
                if history.is_empty() {
                    println!("  (no conversation yet)");
                } else {
                    print!("{}", history.export_text());
                }
                continue;
            }
            Control::Clear => {
                history.clear();
                println!("  Conversation cleared.");
                continue;
            }
            Control::Multi => {
                println!("  Multi-line mode. Finish with an empty line.");
                match prompt.read_multiline().await? {
                    Some(text) => text,
                    None => continue,
                }
            }
            Control::Query(text) => text,
        };

        println!();
        let outcome = runtime.agent.invoke(&query, history).await;
        history.append_turn(query, outcome.output);
    }
}

async fn workflow_menu(
    runtime: &Runtime,
    prompt: &mut Prompt,
    history: &mut ConversationHistoryStore,
) -> anyhow::Result<Next> {
    let catalog = &runtime.catalog;
    print_catalog(catalog);
    let back = catalog.len() + 1;
    println!("  {back}. Back to main menu");
    println!();

    let Some(selection) = prompt.read_line("Workflow > ").await? else {
        return Ok(Next::Quit);
    };
    let selection = selection.trim();
    if selection.is_empty() || selection == back.to_string() || selection == "menu" {
        return Ok(Next::Menu);
    }

    let definition = match catalog.resolve(selection) {
        Ok(definition) => definition,
        Err(e) => {
            println!("  {e}");
            return Ok(Next::Menu);
        }
    };

    let Some(target) = prompt.read_line("Target > ").await? else {
        return Ok(Next::Quit);
    };
    if target.trim().is_empty() {
        println!("  No target given, workflow cancelled.");
        return Ok(Next::Menu);
    }

    let Some(confirm) = prompt
        .read_line(&format!("Run '{}' against {}? [y/N] > ", definition.name, target.trim()))
        .await?
    else {
        return Ok(Next::Quit);
    };
    if !matches!(confirm.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        println!("  Workflow cancelled.");
        return Ok(Next::Menu);
    }

    if let Err(e) = workflow::execute(runtime, definition, &target, history).await {
        println!("  Workflow failed: {e}");
    }
    Ok(Next::Menu)
}

async fn agent_mode(
    runtime: &Runtime,
    prompt: &mut Prompt,
    history: &mut ConversationHistoryStore,
) -> anyhow::Result<Next> {
    println!();
    println!("  Agent mode plans the assessment as a task tree and works through it");
    println!("  on its own. Only use it against systems you are authorized to test.");
    println!();

    let Some(goal) = prompt.read_line("Goal > ").await? else {
        return Ok(Next::Quit);
    };
    if goal.trim().is_empty() {
        println!("  No goal given, agent mode cancelled.");
        return Ok(Next::Menu);
    }

    let Some(target) = prompt.read_line("Target > ").await? else {
        return Ok(Next::Quit);
    };
    if target.trim().is_empty() {
        println!("  No target given, agent mode cancelled.");
        return Ok(Next::Menu);
    }

    let default_limit = runtime.agent_mode.iteration_limit();
    let iterations = loop {
        let Some(answer) = prompt
            .read_line(&format!("Iteration limit [{default_limit}, 0 = until done] > "))
            .await?
        else {
            return Ok(Next::Quit);
        };
        match agent::parse_limit(&answer) {
            Ok(limit) => break limit,
            Err(message) => println!("  {message}"),
        }
    };

    let Some(notes) = prompt.read_line("Notes or constraints (optional) > ").await? else {
        return Ok(Next::Quit);
    };

    let Some(confirm) = prompt
        .read_line(&format!("Start agent mode against {}? [y/N] > ", target.trim()))
        .await?
    else {
        return Ok(Next::Quit);
    };
    if !matches!(confirm.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        println!("  Agent mode cancelled.");
        return Ok(Next::Menu);
    }

    let engagement = Engagement {
        goal,
        target,
        notes: Some(notes.trim().to_string()).filter(|n| !n.is_empty()),
        iterations,
    };
    let mut session = match agent::plan(runtime, &engagement, history).await {
        Ok(session) => session,
        Err(e) => {
            println!("  Agent mode failed: {e}");
            return Ok(Next::Menu);
        }
    };

    Ok(match agent::drive_interactive(runtime, &mut session, prompt, history).await? {
        Leave::Menu => Next::Menu,
        Leave::Quit => Next::Quit,
    })
}
