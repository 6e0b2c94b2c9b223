//! UpdateKit CLI - Main entry point for CLI binary
//!
//! This binary provides the `updatekit` tool for checking, downloading,
//! installing and rolling back updates.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use updatekit_lib::engine::{
    cli::{Cli, Commands, OutputFormat},
    config::UpdaterConfig,
    updater::{
        AppliedState, Collaborators, EnvLocale, FileStagingCache, FileStore, FsInstaller,
        HttpTransport, KeyType, Notifier, UpdateEvent, UpdateManager, UpdateOutcome, UpdaterLayout, Version,
    },
};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "updatekit=debug,updatekit_lib=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let layout = cli.layout()?;
    let json = cli.format == OutputFormat::Json;
    let build_version = Version::parse(&cli.current_version)
        .with_context(|| format!("invalid --current-version {}", cli.current_version))?;

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init { manifest_url, channel, key_type, public_key, public_key_file } => {
            let public_key = match public_key_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read public key {}", path.display()))?,
                ),
                None => public_key,
            };
            cmd_init(&layout, &manifest_url, channel, key_type, public_key, json)
        }
        Commands::Check { silent } => runtime.block_on(cmd_check(&layout, build_version, silent, json)),
        Commands::Update { yes } => runtime.block_on(cmd_update(&layout, build_version, yes, json)),
        Commands::Status => runtime.block_on(cmd_status(&layout, build_version, json)),
        Commands::Rollback => runtime.block_on(cmd_rollback(&layout, build_version, json)),
        Commands::ClearCache => runtime.block_on(cmd_clear_cache(&layout, build_version, json)),
        Commands::Watch => runtime.block_on(cmd_watch(&layout, build_version, json)),
    }
}

/// Prints observations as they arrive
struct ConsoleNotifier {
    json: bool,
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: UpdateEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
            return;
        }

        match event {
            UpdateEvent::Checking => println!("{}", "Checking for updates...".dimmed()),
            UpdateEvent::UpToDate { version } => {
                println!("{} Up to date ({})", "✓".green(), version)
            }
            UpdateEvent::UpdateAvailable { version, changelog, size, breaking } => {
                println!("{} Update available: {}", "↑".cyan(), version.to_string().bold());
                println!("  Size: {} bytes", size);
                if breaking {
                    println!("  {}", "Breaking update, restart required".yellow());
                }
                if !changelog.is_empty() {
                    println!("  {}", changelog);
                }
            }
            UpdateEvent::DownloadProgress { percent } => println!("  Downloading... {}%", percent),
            UpdateEvent::Downloaded { version } => println!("{} Downloaded {}", "✓".green(), version),
            UpdateEvent::Installing { version } => println!("  Installing {}...", version),
            UpdateEvent::Completed { version } => {
                println!("{} Updated to {}", "✓".green().bold(), version)
            }
            UpdateEvent::RolledBack { version, reason } => {
                println!("{} Rolled back to {}: {}", "↺".yellow(), version, reason)
            }
            UpdateEvent::Error { message, phase, .. } => {
                eprintln!("{} [{}] {}", "✗".red(), phase, message)
            }
            UpdateEvent::RollbackFailed { message, .. } => {
                eprintln!("{} Rollback failed, installation may be incomplete: {}", "✗".red().bold(), message)
            }
            UpdateEvent::ReloadScheduled { delay_ms } => {
                println!("  Reloading in {} ms", delay_ms)
            }
            UpdateEvent::RestartRequired { version } => {
                println!("{} Restart the application to finish updating to {}", "!".yellow(), version)
            }
        }
    }
}

fn load_config(layout: &UpdaterLayout) -> Result<UpdaterConfig> {
    UpdaterConfig::load(layout.base_dir())
        .with_context(|| format!("run `updatekit init --manifest-url <url> --dir {}` first", layout.base_dir().display()))
}

fn build_manager(layout: &UpdaterLayout, config: UpdaterConfig, build_version: Version, json: bool) -> Result<UpdateManager> {
    layout.init()?;
    let transport = HttpTransport::new(config.request_timeout())?;
    let collaborators = Collaborators {
        transport: Arc::new(transport),
        store: Arc::new(FileStore::new(layout.state_dir())),
        staging: Arc::new(FileStagingCache::new(layout.staging_dir())),
        installer: Arc::new(FsInstaller::new(layout.app_dir())),
        notifier: Arc::new(ConsoleNotifier { json }),
        locale: Arc::new(EnvLocale),
    };
    Ok(UpdateManager::new(config, build_version, collaborators)?)
}

/// Errors are already rendered by the notifier; only the exit code is left
fn outcome_result(outcome: UpdateOutcome) -> Result<()> {
    match outcome {
        UpdateOutcome::Failed(e) => Err(anyhow!(e)),
        UpdateOutcome::Busy => bail!("an update cycle is already running"),
        _ => Ok(()),
    }
}

fn cmd_init(
    layout: &UpdaterLayout,
    manifest_url: &str,
    channel: updatekit_lib::engine::updater::Channel,
    key_type: KeyType,
    public_key: Option<String>,
    json: bool,
) -> Result<()> {
    let mut config = UpdaterConfig::for_manifest_url(manifest_url);
    config.channel = channel;
    config.key_type = key_type;
    if public_key.is_some() {
        config.public_key = public_key;
        config.allow_unsigned = false;
    }
    config.validate()?;

    layout.init()?;
    config.save(layout.base_dir())?;

    if json {
        println!("{}", serde_json::json!({
            "success": true,
            "dir": layout.base_dir().display().to_string(),
            "channel": config.channel,
        }));
    } else {
        println!("{} Initialized updater in {}", "✓".green(), layout.base_dir().display());
        println!("  Manifest: {}", config.manifest_url);
        println!("  Channel:  {}", config.channel);
        if config.allow_unsigned {
            println!("  {}", "Unsigned manifests are accepted; pass --public-key to require signatures".yellow());
        }
    }
    Ok(())
}

async fn cmd_check(layout: &UpdaterLayout, build_version: Version, silent: bool, json: bool) -> Result<()> {
    let mut config = load_config(layout)?;
    // One-shot process, a retry chain would not outlive it
    config.max_retries = 0;

    let manager = build_manager(layout, config, build_version, json)?;
    let outcome = manager.check_for_updates(silent).await;
    finish(&manager, outcome).await
}

/// Let a scheduled reload run before the runtime stops
async fn finish(manager: &UpdateManager, outcome: UpdateOutcome) -> Result<()> {
    if matches!(outcome, UpdateOutcome::Installed(_)) {
        tokio::time::sleep(manager.config().reload_delay()).await;
        tokio::task::yield_now().await;
    }
    manager.shutdown();
    outcome_result(outcome)
}

async fn cmd_update(layout: &UpdaterLayout, build_version: Version, yes: bool, json: bool) -> Result<()> {
    let mut config = load_config(layout)?;
    config.auto_download = false;
    config.auto_install = false;
    config.max_retries = 0;

    let manager = build_manager(layout, config, build_version, json)?;
    match manager.check_for_updates(false).await {
        UpdateOutcome::Available(version) => {
            if manager.pending_is_breaking() == Some(true) && !yes {
                bail!("{} is a breaking update; re-run with --yes to install it", version);
            }
        }
        other => return outcome_result(other),
    }

    outcome_result(manager.download_update().await)?;
    let outcome = manager.install_update().await;
    finish(&manager, outcome).await
}

async fn cmd_status(layout: &UpdaterLayout, build_version: Version, json: bool) -> Result<()> {
    let config = load_config(layout)?;
    let manager = build_manager(layout, config, build_version, json)?;
    let applied: AppliedState = manager.applied_state().await?;
    let snapshot = manager.snapshot().await?;

    if json {
        println!("{}", serde_json::json!({
            "version": applied.version,
            "channel": manager.config().channel,
            "files": applied.file_digests.len(),
            "updatedAt": applied.updated_at,
            "snapshot": snapshot.as_ref().map(|s| serde_json::json!({
                "version": s.version,
                "createdAt": s.created_at,
            })),
        }));
    } else {
        println!("{}", "UpdateKit Status".bold());
        println!("  Version:  {}", applied.version.to_string().cyan());
        println!("  Channel:  {}", manager.config().channel);
        println!("  Files:    {}", applied.file_digests.len());
        if let Some(updated_at) = applied.updated_at {
            println!("  Updated:  {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        match snapshot {
            Some(s) => println!("  Snapshot: {} ({})", s.version, s.created_at.format("%Y-%m-%d %H:%M")),
            None => println!("  Snapshot: {}", "none".dimmed()),
        }
    }
    Ok(())
}

async fn cmd_rollback(layout: &UpdaterLayout, build_version: Version, json: bool) -> Result<()> {
    let config = load_config(layout)?;
    let manager = build_manager(layout, config, build_version, json)?;
    manager.rollback().await?;
    Ok(())
}

async fn cmd_clear_cache(layout: &UpdaterLayout, build_version: Version, json: bool) -> Result<()> {
    let config = load_config(layout)?;
    let manager = build_manager(layout, config, build_version, json)?;
    manager.clear_cache().await?;

    if json {
        println!("{}", serde_json::json!({ "success": true }));
    } else {
        println!("{} Staged files removed", "✓".green());
    }
    Ok(())
}

async fn cmd_watch(layout: &UpdaterLayout, build_version: Version, json: bool) -> Result<()> {
    let mut config = load_config(layout)?;
    config.auto_check = true;
    let manager = build_manager(layout, config, build_version, json)?;

    let periodic = manager
        .start_periodic_checks()
        .ok_or_else(|| anyhow!("periodic checks are disabled"))?;
    if !json {
        println!(
            "Watching for updates every {}s, press Ctrl+C to stop",
            manager.config().check_interval_secs
        );
    }

    tokio::signal::ctrl_c().await?;
    periodic.stop();
    manager.shutdown();
    Ok(())
}
