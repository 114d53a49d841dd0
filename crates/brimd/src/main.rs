//! `brimd` — the brim mirror daemon.
//!
//! Mirrors an object-store bucket into a local directory tree. A full
//! list-and-compare sync runs at start-up (and optionally on a timer),
//! and an HTTP(S) ingress consumes push notifications to keep the mirror
//! current between passes.
//!
//! # Usage
//!
//! ```text
//! brimd start -c brim.toml              # run the daemon
//! brimd start --bucket b --root-dir ./m # minimal ad-hoc mirror
//! brimd sync -c brim.toml               # one full pass, then exit
//! brimd check-config -c brim.toml       # validate and print options
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use brim_fs::MirrorTree;
use brim_ingress::{Dispatcher, Ingress, MessageVerifier, RecordFilter, Subscription};
use brim_queue::{OpQueue, TaskFailure};
use brim_remote::{ObjectStore, PubSubControl, S3Client, SnsClient};
use brim_sync::{ActionSink, MirrorEngine, SyncError, failure_is_fatal};

use config::MirrorConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "brimd", version, about = "Mirror an object-store bucket into a directory")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mirror daemon.
    Start {
        #[command(flatten)]
        overrides: Overrides,

        /// Override the ingress port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Skip the start-up full sync.
        #[arg(long)]
        skip_initial_sync: bool,
    },

    /// Run one full synchronization pass, drain, and exit.
    Sync {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Validate the configuration and print the effective options.
    CheckConfig,
}

/// Flags shared by `start` and `sync`. CLI values override the config
/// file.
#[derive(clap::Args)]
struct Overrides {
    /// Override the remote bucket.
    #[arg(short, long)]
    bucket: Option<String>,

    /// Override the mirror root directory.
    #[arg(short, long)]
    root_dir: Option<PathBuf>,

    /// Permit deletions during reconciliation.
    #[arg(long)]
    remove: bool,
}

impl Overrides {
    fn apply(self, config: &mut MirrorConfig) {
        if let Some(bucket) = self.bucket {
            config.remote.bucket = bucket;
        }
        if let Some(root_dir) = self.root_dir {
            config.mirror.root_dir = root_dir;
        }
        if self.remove {
            config.mirror.remove = true;
        }
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = MirrorConfig::load(cli.config.as_deref()).context("failed to load config")?;
    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start {
            overrides,
            port,
            skip_initial_sync,
        } => {
            overrides.apply(&mut config);
            if let Some(port) = port {
                config.ingress.port = Some(port);
            }
            if skip_initial_sync {
                config.sync.skip_initial_sync = true;
            }
            cmd_start(config).await
        }
        Commands::Sync { overrides } => {
            overrides.apply(&mut config);
            cmd_sync(config).await
        }
        Commands::CheckConfig => cmd_check_config(&config),
    }
}

// -----------------------------------------------------------------------
// brimd start
// -----------------------------------------------------------------------

async fn cmd_start(config: MirrorConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    info!(
        bucket = %config.remote.bucket,
        root_dir = %config.mirror.root_dir.display(),
        remove = config.mirror.remove,
        ingress = config.ingress.port.is_some(),
        "starting brimd"
    );

    let (engine, failure_rx) = build_engine(&config)?;

    // Shutdown fan-out: signals, hard remote errors, and ingress failures
    // all converge on one watch channel.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = tx.send(true);
        });
    }

    spawn_failure_watcher(failure_rx, shutdown_tx.clone());

    // --- Ingress + subscription (only when a port is configured) ---
    let control: Arc<dyn PubSubControl> =
        Arc::new(SnsClient::new(config.sns_config()).context("control-plane client")?);
    let subscription = Subscription::new(
        control,
        config.subscription_config(),
        config.subscription.ignore_unsubscribe_on_shutdown,
    );

    let (server_close_tx, server_close_rx) = watch::channel(false);
    let ingress_task = match config.ingress_config() {
        Some(ingress_config) => {
            let dispatcher = Dispatcher::new(
                Arc::clone(&engine) as Arc<dyn ActionSink>,
                engine.pipeline().clone(),
                RecordFilter {
                    bucket: config.remote.bucket.clone(),
                    prefix: config.remote.prefix.clone(),
                    suffix: config.remote.suffix.clone(),
                    min_minor_version: 1,
                },
            );
            let verifier = (!config.ingress.ignore_message_validation).then(|| {
                let mut verifier = MessageVerifier::new();
                for host in &config.ingress.extra_cert_hosts {
                    verifier = verifier.with_extra_host(host.clone());
                }
                verifier
            });
            if verifier.is_none() {
                warn!("message signature validation is disabled");
            }
            let ingress = Ingress::new(
                ingress_config,
                dispatcher,
                verifier,
                Arc::clone(&subscription),
            );

            let mut close_rx = server_close_rx.clone();
            let tx = shutdown_tx.clone();
            Some(tokio::spawn(async move {
                let result = ingress
                    .serve(async move {
                        let _ = close_rx.changed().await;
                    })
                    .await;
                if let Err(e) = &result {
                    error!(error = %e, "notification ingress failed");
                    let _ = tx.send(true);
                }
                result
            }))
        }
        None => None,
    };

    // --- Initial full sync ---
    if config.sync.skip_initial_sync {
        info!("initial sync skipped (configured)");
    } else {
        let report = engine.full_sync().await.context("initial sync failed")?;
        info!(
            writes = report.writes,
            removals = report.removals,
            "initial sync submitted"
        );
    }

    // --- Resync timer ---
    if config.sync.resync_interval_ms > 0 {
        spawn_resync_timer(
            Arc::clone(&engine),
            Duration::from_millis(config.sync.resync_interval_ms),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        );
    }

    // --- Wait for a shutdown trigger ---
    if !*shutdown_rx.borrow_and_update() {
        let _ = shutdown_rx.changed().await;
    }
    info!("shutting down");

    // 1. Refuse new submissions; outstanding ones keep draining below.
    engine.queue().stop(false);

    // 2. Unsubscribe while the listener is still up (the control plane
    //    may deliver a final acknowledgement to it).
    if let Err(e) = subscription.unsubscribe().await {
        warn!(error = %e, "unsubscribe failed");
    }

    // 3. Close the HTTP server.
    let _ = server_close_tx.send(true);
    if let Some(task) = ingress_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e).context("notification ingress"),
            Err(e) => warn!(error = %e, "ingress task join failed"),
        }
    }

    // 4. Drain the queue, bounded by the shutdown timeout.
    let clean = engine.queue().drain(config.shutdown_timeout()).await;
    if !clean {
        warn!("queue drain timed out — remaining tasks were discarded");
    }

    info!("shutdown complete");
    Ok(())
}

// -----------------------------------------------------------------------
// brimd sync
// -----------------------------------------------------------------------

async fn cmd_sync(config: MirrorConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let (engine, failure_rx) = build_engine(&config)?;

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    spawn_failure_watcher(failure_rx, shutdown_tx);

    let report = engine.full_sync().await.context("full sync failed")?;
    let clean = engine.queue().drain(config.shutdown_timeout()).await;

    println!(
        "sync complete: {} writes, {} removals{}",
        report.writes,
        report.removals,
        if clean { "" } else { " (drain timed out)" }
    );
    Ok(())
}

// -----------------------------------------------------------------------
// brimd check-config
// -----------------------------------------------------------------------

fn cmd_check_config(config: &MirrorConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    println!("configuration OK");
    println!("  bucket:       {}", config.remote.bucket);
    println!("  region:       {}", config.remote.region);
    println!("  root_dir:     {}", config.mirror.root_dir.display());
    println!("  remove:       {}", config.mirror.remove);
    println!(
        "  ingress:      {}",
        match config.ingress.port {
            Some(port) => format!("{}:{port}", config.ingress.host),
            None => "disabled".to_owned(),
        }
    );
    println!(
        "  subscription: {}",
        config.subscription.topic_arn.as_deref().unwrap_or("none")
    );
    Ok(())
}

// -----------------------------------------------------------------------
// Component assembly
// -----------------------------------------------------------------------

fn build_engine(
    config: &MirrorConfig,
) -> Result<(Arc<MirrorEngine>, mpsc::UnboundedReceiver<TaskFailure>)> {
    let pipeline = config.key_pipeline()?;

    let mut tree = MirrorTree::new(&config.mirror.root_dir)
        .context("creating mirror root")?
        .with_tmp_suffix(config.mirror.tmp_suffix.clone())
        .with_prune_empty_dirs(config.mirror.prune_empty_dirs);
    if let Some(dir) = &config.mirror.tmp_dir {
        tree = tree.with_tmp_dir(dir).context("creating staging directory")?;
    }

    let store: Arc<dyn ObjectStore> =
        Arc::new(S3Client::new(config.s3_config()).context("object-store client")?);

    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let queue = OpQueue::with_failure_sink(config.queue_config(), failure_tx);

    let engine = MirrorEngine::new(
        store,
        Arc::new(tree),
        queue,
        pipeline,
        config.sync_options(),
    );
    Ok((engine, failure_rx))
}

/// Log every task failure; hard remote errors shut the daemon down.
fn spawn_failure_watcher(
    mut failures: mpsc::UnboundedReceiver<TaskFailure>,
    shutdown_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            if failure_is_fatal(&failure) {
                error!(
                    key = %failure.key,
                    error = %failure.error,
                    "hard remote error — shutting down"
                );
                let _ = shutdown_tx.send(true);
            } else {
                error!(key = %failure.key, error = %failure.error, "queued task failed");
            }
        }
    });
}

/// Re-run the full sync on a timer. Ticks while a pass is still running
/// are no-ops (the engine's reentrancy guard reports them as skipped).
fn spawn_resync_timer(
    engine: Arc<MirrorEngine>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; the initial sync covers it.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown_rx.changed() => {
                    debug!("resync timer cancelled by shutdown");
                    break;
                }
            }
            match engine.full_sync().await {
                Ok(report) if report.skipped => {
                    debug!("resync tick skipped — previous pass still running");
                }
                Ok(report) => {
                    debug!(
                        writes = report.writes,
                        removals = report.removals,
                        "resync pass submitted"
                    );
                }
                Err(SyncError::Remote(e)) if e.is_fatal() => {
                    error!(error = %e, "hard remote error during resync — shutting down");
                    let _ = shutdown_tx.send(true);
                    break;
                }
                Err(e) => warn!(error = %e, "resync pass failed"),
            }
        }
    });
}

// -----------------------------------------------------------------------
// Signal handling
// -----------------------------------------------------------------------

/// Wait for SIGTERM or SIGINT. A second signal during shutdown forces an
/// immediate exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
        () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }

    tokio::spawn(async {
        let second = async {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to install second SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
        };
        second.await;
        warn!("received second signal during shutdown — forcing exit");
        std::process::exit(1);
    });
}
