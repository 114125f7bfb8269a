//! Cache command - inspect and reset the named mirror cache

use super::mirror::print_failures;
use super::{blocking, open_manager};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::MirrorResult;
use crate::reset::CacheResetController;
use console::style;
use std::io::{self, Write};
use std::sync::Arc;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> MirrorResult<()> {
    let controller = Arc::new(CacheResetController::new(open_manager(config)?));

    match args.action {
        CacheAction::List => {
            for name in controller.list_caches() {
                println!("{}", name);
            }
            Ok(())
        }
        CacheAction::Status { name } => {
            let state = if controller.is_empty(&name)? {
                style("empty").dim()
            } else {
                style("in use").green()
            };
            println!("{}: {}", name, state);
            Ok(())
        }
        CacheAction::Reset { name, yes } => reset(controller, name, yes).await,
    }
}

async fn reset(controller: Arc<CacheResetController>, name: String, skip_confirm: bool) -> MirrorResult<()> {
    if controller.is_empty(&name)? {
        println!("Cache {} is already empty.", name);
        return Ok(());
    }

    if !skip_confirm {
        print!("This will delete every mirror of cache {}. Are you sure? [y/N] ", name);
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    print!("Resetting cache {}... ", name);
    let _ = io::stdout().flush();

    let report = blocking(move || controller.reset(&name)).await?;

    println!("{} removed {} mirror(s)", style("✓").green(), report.removed.len());
    if !report.is_success() {
        eprintln!("{} {} mirror(s) could not be deleted and were invalidated:", style("!").yellow(), report.failed.len());
        print_failures(&report);
    }
    Ok(())
}
