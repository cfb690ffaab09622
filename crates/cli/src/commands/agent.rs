//! `redscope agent`: autonomous agent mode, plus the interactive driver with
//! its pause menu.

use crate::console::ConsoleAgentObserver;
use crate::input::Prompt;
use crate::runtime::Runtime;
use redscope_agent::ConversationHistoryStore;
use redscope_config::MAX_ITERATION_LIMIT;
use redscope_workflow::{AgentSession, NewTask, PauseSwitch, RiskLevel, StopReason};

/// What the user asked for when agent mode handed back control.
pub enum Leave {
    Menu,
    Quit,
}

pub struct Engagement {
    pub goal: String,
    pub target: String,
    pub notes: Option<String>,
    /// Overrides the configured limit
    pub iterations: Option<usize>,
}

pub async fn run(runtime: &Runtime, engagement: Engagement) -> anyhow::Result<()> {
    let mut history = runtime.agent.context().new_history();
    let mut session = plan(runtime, &engagement, &history).await?;

    let stop = runtime
        .agent_mode
        .drive(
            &mut session,
            runtime.tool_names(),
            &mut history,
            &runtime.agent,
            &mut ConsoleAgentObserver,
            &PauseSwitch::new(),
        )
        .await;
    report(&session, stop);
    Ok(())
}

/// Validate the engagement and ask the model for the initial tree.
pub async fn plan(
    runtime: &Runtime,
    engagement: &Engagement,
    history: &ConversationHistoryStore,
) -> anyhow::Result<AgentSession> {
    if let Some(limit) = engagement.iterations {
        anyhow::ensure!(
            limit <= MAX_ITERATION_LIMIT,
            "Iteration limit must be at most {MAX_ITERATION_LIMIT} (0 runs until done)"
        );
    }

    let tools = runtime.tool_names();
    println!();
    println!("  Agent mode");
    println!("  Goal:         {}", engagement.goal.trim());
    println!("  Target:       {}", engagement.target.trim());
    println!(
        "  Tools:        {}",
        if tools.is_empty() { "none".to_string() } else { tools.join(", ") }
    );

    let mut session = runtime
        .agent_mode
        .start(
            &engagement.goal,
            &engagement.target,
            engagement.notes.clone(),
            tools,
            history,
            &runtime.agent,
            &mut ConsoleAgentObserver,
        )
        .await?;
    if let Some(limit) = engagement.iterations {
        session.set_iteration_limit(limit);
    }
    Ok(session)
}

/// Drive `session` while watching the prompt for a pause request, and show
/// the pause menu whenever the agent stops on one.
pub async fn drive_interactive(
    runtime: &Runtime,
    session: &mut AgentSession,
    prompt: &mut Prompt,
    history: &mut ConversationHistoryStore,
) -> anyhow::Result<Leave> {
    let mut input_open = true;
    let mut observer = ConsoleAgentObserver;

    loop {
        println!();
        println!("  Type 'pause' and press Enter to pause after the current task.");

        let pause = PauseSwitch::new();
        let stop = {
            let drive = runtime.agent_mode.drive(
                session,
                runtime.tool_names(),
                history,
                &runtime.agent,
                &mut observer,
                &pause,
            );
            tokio::pin!(drive);

            loop {
                tokio::select! {
                    stop = &mut drive => break stop,
                    line = prompt.read_line(""), if input_open => match line? {
                        Some(line) if is_pause(&line) => {
                            pause.request();
                            println!("  Pausing after the current task...");
                        }
                        Some(_) => {}
                        None => input_open = false,
                    },
                }
            }
        };

        if stop != StopReason::Paused {
            report(session, stop);
            return Ok(Leave::Menu);
        }

        match pause_menu(session, prompt).await? {
            PauseChoice::Resume => continue,
            PauseChoice::Stop => {
                report(session, stop);
                return Ok(Leave::Menu);
            }
            PauseChoice::Quit => return Ok(Leave::Quit),
        }
    }
}

fn is_pause(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "pause" | "p")
}

enum PauseChoice {
    Resume,
    Stop,
    Quit,
}

async fn pause_menu(session: &mut AgentSession, prompt: &mut Prompt) -> anyhow::Result<PauseChoice> {
    loop {
        println!();
        println!("  Agent paused. {}", session.summary());
        println!("  1. Resume");
        println!("  2. Show task tree");
        println!("  3. Add a task");
        println!("  4. Change iteration limit");
        println!("  5. Stop agent mode");
        println!();

        let Some(choice) = prompt.read_line("Paused > ").await? else {
            return Ok(PauseChoice::Quit);
        };
        match choice.trim() {
            "1" | "resume" => return Ok(PauseChoice::Resume),
            "2" => print!("{}", indent(&session.tree.render())),
            "3" => {
                if !add_task(session, prompt).await? {
                    return Ok(PauseChoice::Quit);
                }
            }
            "4" => {
                let Some(answer) = prompt
                    .read_line(&format!(
                        "Iterations (used {}, limit {}, 0 = until done) > ",
                        session.iterations,
                        session.iteration_limit()
                    ))
                    .await?
                else {
                    return Ok(PauseChoice::Quit);
                };
                match parse_limit(&answer) {
                    Ok(Some(limit)) => {
                        session.set_iteration_limit(limit);
                        println!("  Iteration limit set to {limit}.");
                    }
                    Ok(None) => {}
                    Err(message) => println!("  {message}"),
                }
            }
            "5" | "stop" => return Ok(PauseChoice::Stop),
            "" => {}
            other => println!("  Unknown option '{other}'"),
        }
    }
}

/// Returns false if input ended.
async fn add_task(session: &mut AgentSession, prompt: &mut Prompt) -> anyhow::Result<bool> {
    let Some(description) = prompt.read_line("Task description > ").await? else {
        return Ok(false);
    };
    if description.trim().is_empty() {
        println!("  No description, nothing added.");
        return Ok(true);
    }
    let Some(phase) = prompt.read_line("Phase (empty for top level) > ").await? else {
        return Ok(false);
    };
    let Some(priority) = prompt.read_line("Priority 1-10 [5] > ").await? else {
        return Ok(false);
    };
    let Some(risk) = prompt.read_line("Risk low/medium/high [low] > ").await? else {
        return Ok(false);
    };

    let mut task = NewTask::new(description.trim()).with_risk(RiskLevel::parse_or_low(&risk));
    if let Ok(priority) = priority.trim().parse::<u8>() {
        task = task.with_priority(priority);
    }
    let phase = phase.trim();
    let id = session.add_manual_task((!phase.is_empty()).then_some(phase), task);
    println!("  Added task {id}.");
    Ok(true)
}

/// Empty input keeps the current value.
pub fn parse_limit(answer: &str) -> Result<Option<usize>, String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    match answer.parse::<usize>() {
        Ok(limit) if limit <= MAX_ITERATION_LIMIT => Ok(Some(limit)),
        Ok(_) => Err(format!("The limit must be at most {MAX_ITERATION_LIMIT}.")),
        Err(_) => Err(format!("'{answer}' is not a number.")),
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("    {line}\n")).collect()
}

fn report(session: &AgentSession, stop: StopReason) {
    println!();
    println!("  Agent mode finished: {stop}");
    println!("  {}", session.summary());
    if let Some(evidence) = &session.evidence {
        println!("  Evidence: {evidence}");
    }
    println!();
    print!("{}", indent(&session.tree.render()));
}
