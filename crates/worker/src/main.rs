use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;

use taskgrid_common::config::{self, WorkerConfig};

use taskgrid_worker::cycle::{self, CycleOutcome};
use taskgrid_worker::{discovery, heartbeat, runner, session::WorkerSession};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("taskgrid worker starting");

    let config_path = std::env::var("TASKGRID_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/worker.toml"));
    let mut config: WorkerConfig = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Optional positional argument: the coordinator port.
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {}
        [port] => match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                tracing::error!(arg = %port, "Port argument is not a number");
                std::process::exit(1);
            }
        },
        _ => {
            tracing::error!("Too many arguments given");
            std::process::exit(1);
        }
    }

    // SIGINT flips this watch channel; discovery, heartbeat, and the task
    // cycle all observe it.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            let _ = cancel_tx.send(true);
        }
    });

    std::process::exit(run_worker(config, cancel_rx).await);
}

async fn run_worker(config: WorkerConfig, mut cancel: watch::Receiver<bool>) -> i32 {
    let probe_timeout = Duration::from_millis(config.discovery_probe_timeout_ms);
    let rescan = Duration::from_secs_f64(config.discovery_rescan_secs);
    let probe_client = reqwest::Client::new();

    // Poll the network until a coordinator answers.
    let host = loop {
        if *cancel.borrow() {
            return 0;
        }
        if let Some(host) = discovery::scan(&probe_client, config.port, probe_timeout).await {
            break host;
        }
        tracing::info!("No coordinator found, retrying");
        tokio::select! {
            _ = tokio::time::sleep(rescan) => {}
            _ = cancel.changed() => {}
        }
    };

    let session = match WorkerSession::connect(&host, config.port) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build session");
            return 1;
        }
    };
    tracing::info!(host = %host, connection_id = %session.connection_id, "Session established");

    let base_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(error = %e, "No working directory");
            return 1;
        }
    };

    let ctx = match cycle::bootstrap(&session, &base_dir).await {
        Ok(Some(ctx)) => ctx,
        Ok(None) => {
            tracing::info!("Coordinator has no job for us, exiting");
            return 0;
        }
        Err(e) => {
            tracing::error!(error = %e, "Job bootstrap failed");
            return 1;
        }
    };

    let hb = heartbeat::spawn(
        session.client().clone(),
        session.heartbeat_url(),
        &config,
    );

    let outcome = cycle::run(
        &session,
        &ctx,
        &config,
        hb.dead_signal(),
        cancel.clone(),
        Path::new(runner::RESULT_LOG),
    )
    .await;

    hb.stop();
    hb.join().await;

    match outcome {
        Ok(CycleOutcome::JobComplete) => {
            tracing::info!(job_id = ctx.info.job_id, "Graceful shutdown after job end");
            0
        }
        Ok(CycleOutcome::Cancelled) => 0,
        Ok(CycleOutcome::HeartbeatLost) => {
            tracing::error!("Lost the coordinator, exiting");
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error in task cycle");
            1
        }
    }
}
