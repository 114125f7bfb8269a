//! CLI argument definitions using clap derive

use crate::state::TuningScope;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// gitmirror - local cache of bare git mirrors
///
/// Maps remote repository URLs to mirror directories under one cache root
/// and manages their lifecycle.
#[derive(Parser, Debug)]
#[command(name = "gitmirror")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "GITMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the mirror directory for a URL, allocating one if needed
    Resolve(ResolveArgs),

    /// List known mirrors
    List(ListArgs),

    /// Retire a mirror directory and delete it
    Invalidate(InvalidateArgs),

    /// Show which mirrors would be proposed for eviction
    Evict(EvictArgs),

    /// Remove mirrors unused for longer than the expiration
    Cleanup(CleanupArgs),

    /// Inspect or reset the named cache
    Cache(CacheArgs),

    /// Read or write per-repository state
    State(StateArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Remote repository URL
    pub url: String,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the invalidate command
#[derive(Parser, Debug)]
pub struct InvalidateArgs {
    /// Mirror directory (a direct child of the cache root)
    pub dir: PathBuf,
}

/// Arguments for the evict command
#[derive(Parser, Debug)]
pub struct EvictArgs {
    /// URLs referenced by the current job
    #[arg(short, long = "keep", value_name = "URL")]
    pub keep: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the cleanup command
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Remove mirrors unused for more than N hours (default: from config)
    #[arg(long)]
    pub hours: Option<u64>,

    /// Dry run - show what would be removed
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache names
    List,

    /// Show whether a cache holds any mirrors
    Status {
        /// Cache name
        name: String,
    },

    /// Delete every mirror of a cache
    Reset {
        /// Cache name
        name: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the state command
#[derive(Parser, Debug)]
pub struct StateArgs {
    /// Subcommand for state
    #[command(subcommand)]
    pub action: StateAction,
}

/// State subcommands
#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Print a stored value
    Get {
        /// Repository directory holding the state file
        repo_dir: PathBuf,
        /// Namespace, e.g. fetch or patch
        namespace: String,
        /// Key within the namespace
        key: String,
    },

    /// Store a value
    Set {
        repo_dir: PathBuf,
        namespace: String,
        key: String,
        /// Integer value
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },

    /// Delete a value
    Unset {
        repo_dir: PathBuf,
        namespace: String,
        key: String,
    },

    /// Show the remembered subprocess heap size
    Memory {
        repo_dir: PathBuf,
        /// fetch or patch
        scope: TuningScope,
        /// Print and remember the heap size for the next run instead
        #[arg(long)]
        next: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
