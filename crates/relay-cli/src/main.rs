mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    agent::AgentSubcommand, config::ConfigSubcommand, skill::SkillSubcommand,
    task::TaskSubcommand,
};
use relay_core::RelayError;
use std::path::PathBuf;

/// Exit code for configuration load failures.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Skill resolution and gated role-to-role hand-offs for agent pipelines",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .relay/ or .git/)
    #[arg(long, global = true, env = "RELAY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize relay in the current project with sample agents and skills
    Init,

    /// Manage tasks
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Run tasks through the pipeline (several tasks run concurrently)
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Show a task's stage, status, and unmet requirements
    Status { task: String },

    /// Show a task's hand-off history
    History {
        task: String,
        /// Print one record in full
        #[arg(long)]
        seq: Option<u32>,
    },

    /// Cancel a task at its next gate boundary
    Cancel { task: String },

    /// Inspect skills
    Skill {
        #[command(subcommand)]
        subcommand: SkillSubcommand,
    },

    /// Inspect agent profiles
    Agent {
        #[command(subcommand)]
        subcommand: AgentSubcommand,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root).map(|()| 0),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json).map(|()| 0),
        Commands::Run { tasks } => cmd::run::run(&root, &tasks, cli.json),
        Commands::Status { task } => cmd::status::run(&root, &task, cli.json).map(|()| 0),
        Commands::History { task, seq } => {
            cmd::history::run(&root, &task, seq, cli.json).map(|()| 0)
        }
        Commands::Cancel { task } => cmd::cancel::run(&root, &task, cli.json).map(|()| 0),
        Commands::Skill { subcommand } => cmd::skill::run(&root, subcommand, cli.json).map(|()| 0),
        Commands::Agent { subcommand } => cmd::agent::run(&root, subcommand, cli.json).map(|()| 0),
        Commands::Config { subcommand } => {
            cmd::config::run(&root, subcommand, cli.json).map(|()| 0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_code(&e));
        }
    }
}

/// Configuration problems exit 2 so callers can tell them from task
/// failures.
fn exit_code(e: &anyhow::Error) -> i32 {
    let configuration = e.chain().any(|cause| {
        cause
            .downcast_ref::<RelayError>()
            .is_some_and(RelayError::is_configuration)
    });
    if configuration {
        EXIT_CONFIG
    } else {
        1
    }
}
