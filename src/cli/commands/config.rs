//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::MirrorResult;
use console::style;

/// Execute the config command
///
/// `config` is the load result; only `show` needs it to be valid.
pub async fn execute(args: ConfigArgs, config: MirrorResult<Config>, manager: &ConfigManager) -> MirrorResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(&config?)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }
    Ok(())
}

fn show_config(config: &Config) -> MirrorResult<()> {
    let mut effective = config.clone();
    effective.mirrors.cache_dir = Some(config.mirrors.cache_dir());
    println!("{}", toml::to_string_pretty(&effective)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> MirrorResult<()> {
    let path = manager.path();
    if path.exists() && !force {
        println!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        println!("  Use --force to overwrite");
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!("{} Configuration initialized at {}", style("✓").green(), path.display());
    Ok(())
}
