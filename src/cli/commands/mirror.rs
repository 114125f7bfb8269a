//! Mirror commands - resolve, list, invalidate, evict, cleanup

use super::{blocking, open_manager};
use crate::cli::args::{CleanupArgs, EvictArgs, InvalidateArgs, ListArgs, OutputFormat, ResolveArgs};
use crate::config::Config;
use crate::error::MirrorResult;
use crate::evict::{EvictionCandidate, MirrorEvictor};
use crate::mirror::{remove_expired, remove_mirror, FsRemover, MirrorManager, RemovalReport};
use chrono::{DateTime, Duration, Utc};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execute the resolve command
pub async fn resolve(args: ResolveArgs, config: &Config) -> MirrorResult<()> {
    let manager = open_manager(config)?;
    let dir = manager.resolve(&args.url)?;
    println!("{}", dir.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct MirrorEntry {
    url: String,
    dir: PathBuf,
    last_used: Option<DateTime<Utc>>,
}

/// Execute the list command
pub async fn list(args: ListArgs, config: &Config) -> MirrorResult<()> {
    let manager = open_manager(config)?;
    let entries: Vec<MirrorEntry> = manager
        .mappings()
        .into_iter()
        .map(|(url, dir)| MirrorEntry {
            last_used: manager.last_used_time(&dir),
            url,
            dir,
        })
        .collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{} = {}", entry.url, entry.dir.display());
            }
        }
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("No mirrors in {}.", manager.base_mirrors_dir().display());
                return Ok(());
            }
            print_mirror_table(&entries);
        }
    }
    Ok(())
}

fn print_mirror_table(entries: &[MirrorEntry]) {
    println!("{:<24} {:<18} URL", "DIRECTORY", "LAST USED");
    println!("{}", "-".repeat(80));

    for entry in entries {
        let name = entry
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("{:<24} {:<18} {}", name, format_time(entry.last_used), entry.url);
    }

    println!();
    println!("Total: {} mirror(s)", entries.len());
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "never".to_string(),
    }
}

/// Accept either a full path or a bare directory name
fn mirror_path(manager: &MirrorManager, dir: &Path) -> PathBuf {
    if dir.components().count() == 1 && !dir.is_absolute() {
        manager.base_mirrors_dir().join(dir)
    } else {
        dir.to_path_buf()
    }
}

/// Execute the invalidate command
pub async fn invalidate(args: InvalidateArgs, config: &Config) -> MirrorResult<()> {
    let manager = open_manager(config)?;
    let dir = mirror_path(&manager, &args.dir);
    let url = manager.url_for_dir_name(&manager.dir_name(&dir)?);

    manager.invalidate(&dir)?;
    let report = blocking(move || {
        let mut report = RemovalReport::default();
        remove_mirror(&manager, &FsRemover, &dir, &mut report);
        Ok(report)
    })
    .await?;

    match url {
        Some(url) => println!("{} invalidated mirror of {}", style("✓").green(), url),
        None => println!("{} invalidated unmapped directory", style("✓").green()),
    }
    print_failures(&report);
    Ok(())
}

/// Execute the evict command
pub async fn evict(args: EvictArgs, config: &Config) -> MirrorResult<()> {
    let manager = open_manager(config)?;
    let evictor = MirrorEvictor::new(manager);
    let keep = args.keep;
    let (candidates, report) = blocking(move || {
        let mut candidates: Vec<EvictionCandidate> = Vec::new();
        let report = evictor.register_candidates(keep.iter().map(String::as_str), &mut candidates);
        Ok((candidates, report))
    })
    .await?;

    match args.format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct EvictJson<'a> {
                candidates: &'a [EvictionCandidate],
                report: &'a crate::evict::EvictionReport,
            }
            let json = EvictJson {
                candidates: &candidates,
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Plain => {
            for candidate in &candidates {
                println!("{}", candidate.dir.display());
            }
        }
        OutputFormat::Table => {
            if candidates.is_empty() {
                println!("No eviction candidates.");
            } else {
                println!("Eviction candidates:");
                for candidate in &candidates {
                    println!(
                        "  {} {} (last used {})",
                        style("•").red(),
                        candidate.dir.display(),
                        format_time(Some(candidate.last_used))
                    );
                }
            }
            if !report.orphans.removed.is_empty() {
                println!("Removed {} unused mirror dir(s).", report.orphans.removed.len());
            }
            print_failures(&report.orphans);
        }
    }
    Ok(())
}

/// Execute the cleanup command
pub async fn cleanup(args: CleanupArgs, config: &Config) -> MirrorResult<()> {
    let hours = args.hours.unwrap_or(config.mirrors.expiration_hours);
    let timeout = match i64::try_from(hours).ok().and_then(Duration::try_hours) {
        Some(timeout) if hours > 0 => timeout,
        _ => {
            println!("Mirror cleanup is disabled (expiration_hours = 0)");
            return Ok(());
        }
    };

    let manager = open_manager(config)?;
    let expired = manager.expired_dirs(timeout);
    if expired.is_empty() {
        println!("No mirrors unused for more than {} hours.", hours);
        return Ok(());
    }

    println!("Found {} mirror(s) unused for more than {} hours:", expired.len(), hours);
    for dir in &expired {
        println!(
            "  {} {} (last used {})",
            style("•").red(),
            dir.display(),
            format_time(manager.last_used_time(dir))
        );
    }

    if args.dry_run {
        println!();
        println!("Dry run - no mirrors removed.");
        return Ok(());
    }

    debug!("Removing {} expired mirrors", expired.len());
    let report = blocking(move || Ok(remove_expired(&manager, &FsRemover, timeout))).await?;
    println!();
    println!("{} removed {} mirror(s)", style("✓").green(), report.removed.len());
    print_failures(&report);
    Ok(())
}

pub(crate) fn print_failures(report: &RemovalReport) {
    for failure in &report.failed {
        eprintln!(
            "  {} {}: {}",
            style("✗").red(),
            failure.dir.display(),
            failure.reason
        );
    }
}
