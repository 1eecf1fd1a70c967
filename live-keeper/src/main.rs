use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use live_keeper::capture::{YtDlpLauncher, YtDlpProbe};
use live_keeper::cli::Args;
use live_keeper::config::ConfigWatcher;
use live_keeper::finalizer::Finalizer;
use live_keeper::logging::init_logging;
use live_keeper::panic_hook;
use live_keeper::supervisor::{SupervisorConfig, SupervisorPool};
use live_keeper::utils::fs::ensure_dir_all_with_op;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let mut settings = args.settings();

    let logging = init_logging(&settings.log_dir).context("failed to initialize logging")?;
    panic_hook::install(logging.log_dir());

    let shutdown = CancellationToken::new();
    let retention_task = logging.start_retention_cleanup(shutdown.child_token());

    info!(version = env!("CARGO_PKG_VERSION"), "live-keeper starting");

    settings.capture.auth = settings.capture.auth.clone().resolve();
    ensure_dir_all_with_op("creating scratch root", &settings.scratch_root).await?;

    let (watcher, mut sources) = ConfigWatcher::load(
        &settings.config_path,
        &settings.scratch_root,
        settings.capture.auth.clone(),
        settings.config_reload_interval,
    )
    .await
    .with_context(|| format!("failed to load {}", settings.config_path.display()))?;

    let probe = Arc::new(YtDlpProbe::new(
        &settings.capture.program,
        settings.capture.auth.clone(),
    ));
    let launcher = Arc::new(YtDlpLauncher::new(
        &settings.capture.program,
        settings.capture.auth.clone(),
    ));
    let mut pool = SupervisorPool::new(
        SupervisorConfig::from_settings(&settings),
        probe,
        launcher,
        shutdown.child_token(),
        settings.shutdown_timeout,
    );

    let finalizer = Finalizer::new(&settings.finalizer, watcher.subscribe());
    let finalizer_task = tokio::spawn(finalizer.run(shutdown.child_token()));
    let watcher_task = tokio::spawn(watcher.run(shutdown.child_token()));

    let initial = sources.borrow_and_update().clone();
    pool.reconcile(&initial).await;

    // Reconciling is idempotent; the periodic pass restarts crashed supervisors.
    let mut reconcile_ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.config_reload_interval,
        settings.config_reload_interval,
    );

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            result = &mut signal => {
                if let Err(e) = result {
                    error!(error = %e, "Signal handler failed, shutting down");
                }
                info!("Shutdown signal received");
                break;
            }
            changed = sources.changed() => {
                if changed.is_err() {
                    warn!("Config watcher stopped, shutting down");
                    break;
                }
                let list = sources.borrow_and_update().clone();
                pool.reconcile(&list).await;
            }
            Some(exit) = pool.join_next() => {
                if exit.is_crash() {
                    warn!(source = %exit.name, "Supervisor failed, restarting on next reconciliation");
                }
            }
            _ = reconcile_ticker.tick() => {
                let list = sources.borrow().clone();
                pool.reconcile(&list).await;
            }
        }
    }

    let report = pool.shutdown().await;
    if !report.all_graceful() {
        warn!(
            forced = report.forced_terminations,
            message_failures = report.stop_message_failures,
            "Some supervisors did not stop gracefully"
        );
    }

    shutdown.cancel();
    if let Err(e) = finalizer_task.await {
        error!(error = %e, "Finalizer task failed");
    }
    let _ = watcher_task.await;
    let _ = retention_task.await;

    info!("live-keeper stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
