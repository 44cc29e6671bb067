//! codeloop CLI, the main entry point.
//!
//! Commands:
//! - `run`    Run one goal and print the report
//! - `repl`   Read goals line by line (default)
//! - `tools`  List the available tools
//! - `init`   Write a default config file

use clap::{Parser, Subcommand};

mod commands;
mod host;
mod input;
mod progress;

#[derive(Parser)]
#[command(
    name = "codeloop",
    about = "codeloop: an agentic coding assistant for one workspace",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single goal and exit
    Run {
        /// What the agent should do
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,
    },

    /// Enter goals interactively
    Repl,

    /// List tool names and descriptions
    Tools,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Run { goal } => commands::run::run(goal.join(" ")).await?,
        Commands::Repl => commands::repl::run().await?,
        Commands::Tools => commands::tools::run()?,
        Commands::Init { force } => commands::init::run(force)?,
    }

    Ok(())
}
