use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::{Generator, generate};
use colored::Colorize;
use colsync::cli::{Cli, Commands};
use colsync::commands;
use colsync::output::{self, Verbosity};
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "COLSYNC_LOG";

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    output::set_verbosity(verbosity);
    init_logging(verbosity);

    match cli.command {
        Commands::Status { roots } => commands::status::execute(&roots)?,
        Commands::Update { roots } => commands::update::execute(&roots)?,
        Commands::Sync { roots, dry_run } => commands::sync::execute(&roots, dry_run)?,
        Commands::Check { roots } => commands::check::execute(&roots)?,
        Commands::Completion { shell } => {
            print_completions(shell, &mut Cli::command());
        }
    }

    Ok(())
}

/// Logs go to stderr. `COLSYNC_LOG` wins over the verbosity flags.
fn init_logging(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Verbose => "colsync=debug",
        Verbosity::Normal | Verbosity::Quiet => "warn",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_completions<G: Generator>(g: G, cmd: &mut clap::Command) {
    generate(g, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
