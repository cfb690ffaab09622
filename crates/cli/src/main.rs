//! redscope CLI: the main entry point.
//!
//! Commands:
//! - `interactive`  Menu-driven chat, workflows and agent mode (default)
//! - `ask`          Answer a single query and exit
//! - `workflow`     Run one workflow against a target
//! - `agent`        Plan and run an assessment autonomously
//! - `workflows`    List available workflows
//! - `tools`        Connect tool providers and list their tools
//! - `config`       Show the effective configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use redscope_config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod console;
mod input;
mod runtime;

use runtime::{Finish, Runtime, StartOptions};

#[derive(Parser)]
#[command(
    name = "redscope",
    about = "redscope: security-analysis assistant with tool providers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to config.toml (default: ~/.redscope/config.toml)
    #[arg(long, global = true, env = "REDSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the tool server document (overrides config)
    #[arg(long, global = true)]
    servers: Option<PathBuf>,

    /// Do not start any tool providers
    #[arg(long, global = true)]
    no_tools: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Menu-driven chat, workflows and agent mode
    Interactive,

    /// Answer a single query and exit
    Ask {
        /// The question to ask
        query: String,
    },

    /// Run a workflow against a target
    Workflow {
        /// Workflow key or menu number
        key: String,

        /// Host, URL or network range to assess
        target: String,
    },

    /// Plan and run an assessment autonomously
    Agent {
        /// Host, URL or network range to assess
        target: String,

        /// What the assessment should establish
        goal: String,

        /// Iteration limit (0 runs until done; default from config)
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Scope notes or constraints passed to the planner
        #[arg(long)]
        notes: Option<String>,
    },

    /// List available workflows
    Workflows,

    /// Connect tool providers and list their tools
    Tools,

    /// Show the effective configuration
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let session = match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Workflows => return commands::workflows::run(cli.config.as_deref()),
        Commands::Config => return commands::config_cmd::run(cli.config.as_deref()),
        Commands::Interactive => commands::Session::Interactive,
        Commands::Ask { query } => commands::Session::Ask(query),
        Commands::Workflow { key, target } => commands::Session::Workflow { key, target },
        Commands::Agent {
            target,
            goal,
            iterations,
            notes,
        } => commands::Session::Agent(commands::agent::Engagement {
            goal,
            target,
            notes,
            iterations,
        }),
        Commands::Tools => commands::Session::Tools,
    };

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let options = StartOptions {
        servers_path: cli.servers,
        connect_tools: !cli.no_tools,
    };

    let mut runtime = Runtime::prepare(config, &options)?;

    // Installed before the first provider connects, so an interrupt at any
    // point after startup reaches the cleanup below.
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let outcome = runtime.serve(session, interrupt).await;
    if let Ok(Finish::Interrupted) = outcome {
        eprintln!();
        eprintln!("Interrupted, shutting down...");
    }

    let report = runtime.shutdown().await;
    if !report.is_clean() {
        eprintln!("Tool provider cleanup: {report}");
    }

    outcome.map(|_| ())
}
