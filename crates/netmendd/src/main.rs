//! netmendd: the netmend daemon.
//!
//! Single binary that assembles the engine:
//! - Device state store and healing log
//! - History store (redb) with a retention sweep
//! - Probe set and SSH remediation
//! - Monitoring scheduler
//! - Read-only status API
//!
//! # Usage
//!
//! ```text
//! netmendd --config /etc/netmend/netmend.toml run
//! netmendd check --heal
//! netmendd heal 192.168.1.20
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netmend_core::NetmendConfig;
use netmend_monitor::FileConfigSource;
use netmend_remote::SshConnector;
use netmendd::{Engine, RETENTION_SWEEP_INTERVAL, run_retention};

const DEFAULT_FILTER: &str = "info,netmendd=debug,netmend=debug";

#[derive(Parser)]
#[command(name = "netmendd", about = "netmend device health and self-healing daemon")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "netmend.toml")]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, the status API and the retention sweep until Ctrl-C.
    Run,

    /// Run exactly one monitoring cycle and print the device snapshot.
    Check {
        /// Also dispatch healing for devices past the failure threshold.
        #[arg(long)]
        heal: bool,
    },

    /// Make one manual remediation attempt against a device.
    Heal {
        /// Device identity (IP address) as configured.
        ip: String,
    },

    /// Write a starter configuration file.
    Init {
        #[arg(long, default_value = "lab_1")]
        lab: String,

        #[arg(long, default_value = "192.168.1.10")]
        ip: String,

        #[arg(long, default_value = "device-1")]
        label: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run => run(&cli.config).await,
        Command::Check { heal } => check(&cli.config, heal).await,
        Command::Heal { ip } => heal(&cli.config, &ip).await,
        Command::Init {
            lab,
            ip,
            label,
            force,
        } => init(&cli.config, &lab, &ip, &label, force),
    }
}

fn load(path: &Path) -> anyhow::Result<(Arc<FileConfigSource>, NetmendConfig)> {
    let config = NetmendConfig::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok((Arc::new(FileConfigSource::new(path)), config))
}

fn connector(config: &NetmendConfig) -> Arc<SshConnector> {
    Arc::new(SshConnector::new(config.healing.command_timeout * 3))
}

async fn run(path: &Path) -> anyhow::Result<()> {
    info!(config = %path.display(), "netmend daemon starting");

    let (source, config) = load(path)?;
    let connector = connector(&config);
    let engine = Engine::build(source, config, connector)?;
    let set = engine.config.devices();
    info!(
        devices = set.devices.len(),
        rejected = set.rejected.len(),
        healing = engine.config.healing.enabled,
        "engine initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let monitor = engine.monitor.clone();
    let monitor_shutdown = shutdown_rx.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let retention_handle = engine.history.clone().map(|history| {
        tokio::spawn(run_retention(
            history,
            engine.config.storage.retention,
            RETENTION_SWEEP_INTERVAL,
            shutdown_rx.clone(),
        ))
    });

    // ── API server or plain wait ───────────────────────────────

    if engine.config.api.enabled {
        let router = netmend_api::build_router(engine.api_state());
        let addr = engine.config.api.listen;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding API listener on {addr}"))?;
        info!(%addr, "API server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                wait_for_ctrl_c().await;
                let _ = shutdown_tx.send(true);
            })
            .await?;
    } else {
        wait_for_ctrl_c().await;
        let _ = shutdown_tx.send(true);
    }

    // The monitor finishes its in-flight cycle first.
    let _ = monitor_handle.await;
    if let Some(handle) = retention_handle {
        let _ = handle.await;
    }

    info!("netmend daemon stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("shutdown signal received");
}

async fn check(path: &Path, heal: bool) -> anyhow::Result<()> {
    let (source, mut config) = load(path)?;
    if !heal {
        config.healing.enabled = false;
    }
    let connector = connector(&config);
    let engine = Engine::build(source, config, connector)?;

    let report = engine.monitor.run_cycle().await?;
    let output = serde_json::json!({
        "report": report,
        "devices": engine.store.snapshot(),
        "healing": engine.log.recent(usize::MAX),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn heal(path: &Path, ip: &str) -> anyhow::Result<()> {
    let (source, config) = load(path)?;
    let connector = connector(&config);
    let engine = Engine::build(source, config, connector)?;
    engine.monitor.reconcile()?;

    match engine.healer.heal_device(ip).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => anyhow::bail!("healing {ip} failed: {e}"),
    }
}

fn init(path: &Path, lab: &str, ip: &str, label: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = NetmendConfig::scaffold(lab, ip, label);
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "configuration written");
    Ok(())
}
