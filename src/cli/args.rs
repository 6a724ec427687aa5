//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueHint};

/// Compiler for tree-rewriting rules: match patterns in a labeled tree, rewrite, repeat
#[derive(Parser, Debug)]
#[command(name = "bonsai")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (repeat for more: -d info, -dd debug, -ddd trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub debug: u8,

    /// Project directory (default: cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and validate rule files
    Check {
        /// Rule files, or directories searched for *.bonsai files
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },

    /// Generate a Cargo project from a rule file
    Compile {
        /// Rule file
        #[arg(value_hint = ValueHint::FilePath)]
        rules: PathBuf,
        /// Initial state planted by the bootstrap rule
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        state: Option<PathBuf>,
        /// Output directory (default: <out_dir>/<rule file stem>)
        #[arg(short, long, value_hint = ValueHint::DirPath)]
        output: Option<PathBuf>,
        /// Build the generated project with cargo
        #[arg(short, long)]
        build: bool,
    },

    /// Interpret a rule file without generating code (rules must not carry code)
    Run {
        /// Rule file
        #[arg(value_hint = ValueHint::FilePath)]
        rules: PathBuf,
        /// Initial state planted by the bootstrap rule
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        state: Option<PathBuf>,
        /// Give up after this many rule applications
        #[arg(long)]
        max_steps: Option<u64>,
    },

    /// Show a state file as a tree
    Tree {
        /// State file
        #[arg(value_hint = ValueHint::FilePath)]
        state: PathBuf,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Print a config template
    Template,

    /// Show config paths
    Path,
}
