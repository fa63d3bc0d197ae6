//! CLI argument parsing for cast

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cast")]
#[command(author, version, about = "Baseline-tracked sync of Markdown documents across casts", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Cast root to operate on (default: current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a cast in the root directory
    Init {
        /// Cast name
        #[arg(required = true)]
        name: String,

        /// Vault directory relative to the root
        #[arg(short, long)]
        location: Option<String>,

        /// Also register the cast on this machine
        #[arg(long)]
        install: bool,
    },

    /// Register the cast in the machine registry
    Install,

    /// Remove a cast from the machine registry
    Uninstall {
        /// Cast name or cast-id (default: the root's cast)
        target: Option<String>,
    },

    /// List registered casts and codebases
    List {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync documents with peer casts
    Hsync {
        /// Only this document (vault-relative path or cast-id)
        #[arg(short, long)]
        file: Option<String>,

        /// Only these peers of this cast
        #[arg(short, long = "peer")]
        peers: Vec<String>,

        /// Resolve conflicts with the default policy
        #[arg(long)]
        non_interactive: bool,

        /// Do not follow peers of peers
        #[arg(long)]
        no_cascade: bool,

        /// Report what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync documents with a codebase docs directory
    Cbsync {
        /// Codebase name
        #[arg(required = true)]
        codebase: String,

        /// Only this document (vault-relative path or cast-id)
        #[arg(short, long)]
        file: Option<String>,

        /// Resolve conflicts with the default policy
        #[arg(long)]
        non_interactive: bool,

        /// Report what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage installed codebases
    Codebase {
        #[command(subcommand)]
        command: CodebaseCommand,
    },

    /// Dump the cast's document index as JSON
    Report,
}

#[derive(Subcommand, Debug)]
pub enum CodebaseCommand {
    /// Register a codebase docs directory
    Add {
        name: String,
        path: PathBuf,
    },

    /// Unregister a codebase
    Remove {
        name: String,
    },
}
