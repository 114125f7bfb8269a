//! gitmirror - local git mirror cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use gitmirror::cli::{commands, Cli, Commands};
use gitmirror::config::ConfigManager;
use gitmirror::error::MirrorResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> MirrorResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await;

    // Logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("gitmirror=warn"),
        1 => EnvFilter::new("gitmirror=info"),
        _ => EnvFilter::new("gitmirror=debug"),
    };
    let json = cli.log_json
        || config
            .as_ref()
            .is_ok_and(|c| c.general.log_format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }

    // Config commands still work when the file does not parse
    let command = match cli.command {
        Commands::Config(args) => return commands::config(args, config, &config_manager).await,
        command => command,
    };
    let config = config?;
    debug!("Loaded configuration from {}", config_manager.path().display());

    match command {
        Commands::Resolve(args) => commands::resolve(args, &config).await,
        Commands::List(args) => commands::list(args, &config).await,
        Commands::Invalidate(args) => commands::invalidate(args, &config).await,
        Commands::Evict(args) => commands::evict(args, &config).await,
        Commands::Cleanup(args) => commands::cleanup(args, &config).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
        Commands::State(args) => commands::state(args, &config).await,
        Commands::Config(_) => unreachable!("Config handled above"),
    }
}
