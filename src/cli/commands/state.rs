//! State command - per-repository key/value state

use crate::cli::args::{StateAction, StateArgs};
use crate::config::Config;
use crate::error::MirrorResult;
use crate::state::{MemoryTuning, RepositoryStateStore};
use console::style;

/// Execute the state command
pub async fn execute(args: StateArgs, config: &Config) -> MirrorResult<()> {
    let file_name = config.state.file_name.as_str();

    match args.action {
        StateAction::Get { repo_dir, namespace, key } => {
            let store = RepositoryStateStore::with_file_name(&repo_dir, file_name, &namespace);
            store.check_key(&key)?;
            print_value(store.read(&key));
        }
        StateAction::Set {
            repo_dir,
            namespace,
            key,
            value,
        } => {
            let store = RepositoryStateStore::with_file_name(&repo_dir, file_name, &namespace);
            store.write(&key, Some(value))?;
            println!("{} {}.{} = {}", style("✓").green(), namespace, key, value);
        }
        StateAction::Unset { repo_dir, namespace, key } => {
            let store = RepositoryStateStore::with_file_name(&repo_dir, file_name, &namespace);
            store.write(&key, None)?;
            println!("{} {}.{} removed", style("✓").green(), namespace, key);
        }
        StateAction::Memory { repo_dir, scope, next } => {
            let tuning = MemoryTuning::with_file_name(&repo_dir, file_name, scope);
            let heap = if next {
                tuning.ladder(config.state.heap_limits()).next_heap_mb()
            } else {
                tuning.remembered_heap_mb()
            };
            match heap {
                Some(mb) => println!("{}M", mb),
                None => println!("{}", style("unset").dim()),
            }
        }
    }

    Ok(())
}

fn print_value(value: Option<i64>) {
    match value {
        Some(value) => println!("{}", value),
        None => println!("{}", style("unset").dim()),
    }
}
