//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "binary"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Binary entrypoint for the upswatch daemon."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

use upswatch_common::config::AppConfig;
use upswatch_common::logging::init_tracing;
use upswatch_core::{MonitorExit, UpsMonitor};
use upswatch_notify::{spawn_worker, Severity, WebhookDispatcher};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "UPS monitoring and staged-shutdown daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Dry-run mode: log intent, execute nothing (overrides config)")]
    dry_run: bool,

    #[arg(
        long,
        help = "Exit after a completed shutdown sequence instead of waiting for the host to die"
    )]
    exit_after_shutdown: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the monitor (default)")]
    Run,
    #[command(about = "Parse and validate the configuration, then exit")]
    ValidateConfig,
    #[command(about = "Enqueue a probe notification, drain the queue, and exit")]
    TestNotifications,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("upswatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/upswatch/config.toml"));
    candidates.push(PathBuf::from("./config.toml"));

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::ValidateConfig = command {
        return validate_config(&candidates);
    }

    let config_path = AppConfig::resolve_path(&candidates)?;
    let mut config = AppConfig::read_from(&config_path)?;
    if cli.dry_run {
        config.behavior.dry_run = true;
    }
    init_tracing(&config.logging)?;
    info!(config_path = %config_path.display(), "configuration loaded");

    match command {
        Commands::Run => run_daemon(config, cli.exit_after_shutdown).await,
        Commands::TestNotifications => test_notifications(config).await,
        Commands::ValidateConfig => unreachable!("handled before tracing init"),
    }
}

fn validate_config(candidates: &[PathBuf]) -> Result<()> {
    let outcome = AppConfig::resolve_path(candidates).and_then(|path| {
        AppConfig::read_from(&path).map(|config| (path, config))
    });
    let (path, config) = match outcome {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("configuration invalid: {err:#}");
            std::process::exit(1);
        }
    };
    println!("Configuration is valid: {}", path.display());
    println!("  UPS: {}", config.ups.name);
    println!("  Dry-run: {}", config.behavior.dry_run);
    println!("  VMs enabled: {}", config.virtual_machines.enabled);
    if config.containers.enabled {
        println!(
            "  Containers enabled: true (runtime: {:?}, {} compose files)",
            config.containers.runtime,
            config.containers.compose_files.len()
        );
    } else {
        println!("  Containers enabled: false");
    }
    println!(
        "  Unmount targets: {}",
        config.filesystems.unmount.mounts.len()
    );
    println!(
        "  Remote servers: {}",
        config.enabled_remote_servers().count()
    );
    println!("  Notification sinks: {}", config.notifications.urls.len());
    Ok(())
}

async fn run_daemon(config: AppConfig, exit_after_shutdown: bool) -> Result<()> {
    let dispatcher = WebhookDispatcher::new(
        config.ups.name.clone(),
        config.notifications.avatar_url.clone(),
    )?;
    let (notifier, worker) = spawn_worker(&config.notifications, Arc::new(dispatcher));

    let monitor = UpsMonitor::new(config, notifier, exit_after_shutdown);
    let exit = monitor.run().await;

    // Drain the queue even when the monitor failed; a startup error is
    // exactly the kind of message operators want delivered.
    if let Some(worker) = worker {
        worker.shutdown().await;
    }

    match exit? {
        MonitorExit::SignalStop => info!("monitor stopped by signal"),
        MonitorExit::ShutdownComplete(report) => info!(
            cause = report.cause.tag(),
            dry_run = report.dry_run,
            stages = report.executed().len(),
            "shutdown sequence completed"
        ),
    }
    Ok(())
}

async fn test_notifications(config: AppConfig) -> Result<()> {
    let dispatcher = WebhookDispatcher::new(
        config.ups.name.clone(),
        config.notifications.avatar_url.clone(),
    )?;
    let (notifier, worker) = spawn_worker(&config.notifications, Arc::new(dispatcher));
    if !notifier.enabled() {
        println!("No notification sinks configured.");
        return Ok(());
    }

    notifier.enqueue(
        Severity::Info,
        format!(
            "Test notification from upswatch.\nMonitoring {}.",
            config.ups.name
        ),
    );
    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    println!("Probe notification sent (check the configured sinks).");
    Ok(())
}
