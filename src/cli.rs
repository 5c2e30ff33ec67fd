//! Command-line interface definitions for colsync.
//!
//! The definitions are shared between the main binary and the xtask man page
//! generator.
//!
//! Note: Field-level documentation is provided via clap attributes, so we
//! allow missing_docs for this module.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Main CLI structure for colsync.
#[derive(Parser)]
#[command(
    name = "colsync",
    version = crate::VERSION,
    about = "Keep directory trees on several drives in sync",
    long_about = "Tracks files and directories by identity across several roots of one \
                  collection, detects local adds, moves and deletions, and reconciles \
                  the roots pairwise"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// All available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show what changed on disk since the last update, without recording it
    Status {
        /// Instance roots to inspect
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Record local changes of each root in its state file
    Update {
        /// Instance roots to update
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Update every root, reconcile roots of the same collection, and save
    Sync {
        /// Instance roots to synchronise
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Only print the actions that would run
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Check the recorded state of each root for inconsistencies
    Check {
        /// Instance roots to check
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
