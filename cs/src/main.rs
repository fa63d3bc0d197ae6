use std::io::IsTerminal;
use std::path::Path;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::json;
use tracing::{debug, info};

use castcore::{CastConfig, CastSelector, IndexOptions};
use castsync::cast::Cast;
use castsync::cli::{Cli, CodebaseCommand, Command};
use castsync::config::Config;
use castsync::report::EdgeStatus;
use castsync::{
    CastLock, ConflictResolver, DefaultResolver, InteractiveResolver, SyncOptions, SyncReport, TerminalPrompter,
    cbsync, hsync,
};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    debug!(?level, "Logging initialized");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    debug!(root = %root.display(), command = ?cli.command, "cast starting");

    match cli.command {
        Command::Init {
            name,
            location,
            install,
        } => {
            let location = location.unwrap_or_else(|| config.vault_location.clone());
            let cast = CastConfig::init(&root, &name, &location)
                .wrap_err_with(|| format!("Failed to initialize cast at {}", root.display()))?;
            println!("{} Initialized cast {} ({})", "✓".green(), cast.cast_name.cyan(), cast.cast_id.dimmed());
            if install {
                cmd_install(&config, &root)?;
            }
        }
        Command::Install => cmd_install(&config, &root)?,
        Command::Uninstall { target } => {
            let mut registry = config.load_registry()?;
            let selector = match target {
                None => CastSelector::Root(root.clone()),
                Some(t) if registry.resolve_by_id(&t).is_some() => CastSelector::Id(t),
                Some(t) => CastSelector::Name(t),
            };
            let removed = registry
                .unregister(&selector)
                .ok_or_else(|| eyre!("No registered cast matches {:?}", selector))?;
            registry.save()?;
            println!("{} Uninstalled {} ({})", "✓".green(), removed.name.cyan(), removed.root.display());
        }
        Command::List { json } => cmd_list(&config, json)?,
        Command::Hsync {
            file,
            peers,
            non_interactive,
            no_cascade,
            dry_run,
            json,
        } => {
            let registry = config.load_registry()?;
            let options = SyncOptions {
                file,
                peers,
                cascade: config.cascade && !no_cascade,
                dry_run,
            };
            let _lock = CastLock::acquire(&root)?;
            let mut resolver = make_resolver(non_interactive || config.non_interactive)?;
            let report = hsync(&root, registry, &options, resolver.as_mut())
                .wrap_err_with(|| format!("hsync failed for {}", root.display()))?;
            finish(&report, json)?;
        }
        Command::Cbsync {
            codebase,
            file,
            non_interactive,
            dry_run,
            json,
        } => {
            let registry = config.load_registry()?;
            let options = SyncOptions {
                file,
                dry_run,
                cascade: false,
                ..Default::default()
            };
            let _lock = CastLock::acquire(&root)?;
            let mut resolver = make_resolver(non_interactive || config.non_interactive)?;
            let report = cbsync(&root, &registry, &codebase, &options, resolver.as_mut())
                .wrap_err_with(|| format!("cbsync {} failed for {}", codebase, root.display()))?;
            finish(&report, json)?;
        }
        Command::Codebase { command } => {
            let mut registry = config.load_registry()?;
            match command {
                CodebaseCommand::Add { name, path } => {
                    let path = registry.install_codebase(&name, &path)?;
                    registry.save()?;
                    println!("{} Installed codebase {} at {}", "✓".green(), name.cyan(), path.display());
                }
                CodebaseCommand::Remove { name } => {
                    registry
                        .uninstall_codebase(&name)
                        .ok_or_else(|| eyre!("Unknown codebase: {}", name))?;
                    registry.save()?;
                    println!("{} Removed codebase {}", "✓".green(), name.cyan());
                }
            }
        }
        Command::Report => cmd_report(&root)?,
    }

    Ok(())
}

fn make_resolver(non_interactive: bool) -> Result<Box<dyn ConflictResolver>> {
    if non_interactive || !std::io::stdin().is_terminal() {
        return Ok(Box::new(DefaultResolver));
    }
    Ok(Box::new(InteractiveResolver::new(TerminalPrompter::new()?)))
}

fn cmd_install(config: &Config, root: &Path) -> Result<()> {
    let mut registry = config.load_registry()?;
    let entry = registry
        .register_cast(root)
        .wrap_err_with(|| format!("Failed to register cast at {}", root.display()))?;
    registry.save()?;
    info!(name = %entry.name, registry = %registry.path().display(), "Installed cast");
    println!("{} Installed cast {} at {}", "✓".green(), entry.name.cyan(), entry.root.display());
    Ok(())
}

fn cmd_list(config: &Config, as_json: bool) -> Result<()> {
    let registry = config.load_registry()?;
    let casts = registry.list_casts();
    let codebases = registry.list_codebases();

    if as_json {
        let value = json!({
            "casts": casts.iter().map(|c| json!({
                "cast-id": c.cast_id,
                "name": c.name,
                "root": c.root,
                "vault": c.vault_path(),
            })).collect::<Vec<_>>(),
            "codebases": codebases.iter().map(|(name, path)| json!({
                "name": name,
                "path": path,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if casts.is_empty() && codebases.is_empty() {
        println!("No casts installed");
        return Ok(());
    }
    for cast in &casts {
        println!("{} {} {}", cast.name.cyan(), cast.root.display(), cast.cast_id.dimmed());
    }
    for (name, path) in &codebases {
        println!("{} {} {}", "cb:".dimmed(), name.yellow(), path.display());
    }
    Ok(())
}

fn cmd_report(root: &Path) -> Result<()> {
    let cast = Cast::open(root, &IndexOptions::default())
        .wrap_err_with(|| format!("Failed to open cast at {}", root.display()))?;
    let docs: Vec<_> = cast
        .index
        .docs()
        .map(|d| {
            json!({
                "id": d.id.as_str(),
                "path": d.relpath,
                "digest": d.digest,
                "version": d.version,
                "peers": d.peers.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "codebases": d.codebases,
            })
        })
        .collect();
    let value = json!({
        "cast": cast.name,
        "cast-id": cast.cast_id,
        "vault": cast.vault(),
        "documents": docs,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print the report and exit with its code
fn finish(report: &SyncReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report);
    }
    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    for outcome in report.changes() {
        let path = outcome.path.as_deref().unwrap_or(&outcome.id);
        let action = outcome.action.map_or_else(|| "-".to_string(), |a| a.to_string());
        let (marker, detail) = match &outcome.status {
            EdgeStatus::Applied => ("✓".green(), action),
            EdgeStatus::Planned => ("~".yellow(), format!("would {}", action)),
            EdgeStatus::Resolved { resolution } => ("!".yellow(), format!("conflict, {}", resolution)),
            EdgeStatus::Unresolved => ("!".red(), "conflict left unresolved".to_string()),
            EdgeStatus::Failed { error } => ("✗".red(), error.clone()),
            EdgeStatus::InSync | EdgeStatus::Skipped { .. } => continue,
        };
        println!("{} {} {} {} {}", marker, outcome.cast.cyan(), "->".dimmed(), outcome.peer.cyan(), path);
        println!("    {}", detail.dimmed());
    }
    for outcome in report.outcomes.iter() {
        if let EdgeStatus::Skipped { reason } = &outcome.status {
            println!("{} {} -> {} skipped: {}", "-".dimmed(), outcome.cast, outcome.peer, reason);
        }
    }
    for sidecar in &report.sidecars {
        println!("{} sidecar {}", "+".yellow(), sidecar.display());
    }
    for collision in &report.collisions {
        println!("{} written alongside {}", "+".yellow(), collision.display());
    }
    for note in &report.notes {
        println!("{} {}", "·".dimmed(), note);
    }

    let counts = report.counts();
    let prefix = if report.dry_run { "Dry run" } else { "Synced" };
    let mark = if report.is_clean() { "✓".green() } else { "!".red() };
    println!(
        "{} {} {}: {} in sync, {} synced, {} planned, {} conflicts ({} unresolved), {} skipped, {} failed",
        mark,
        prefix,
        report.origin.cyan(),
        counts.in_sync,
        counts.synced,
        counts.planned,
        counts.conflicts,
        counts.unresolved,
        counts.skipped,
        counts.failed
    );
}
