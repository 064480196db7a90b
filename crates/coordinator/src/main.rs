use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use taskgrid_common::config::{self, CoordinatorConfig};

use taskgrid_coordinator::routes::{self, AppState};
use taskgrid_coordinator::{job, Coordinator};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("taskgrid coordinator starting");

    let config_path = std::env::var("TASKGRID_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/coordinator.toml"));
    let config: CoordinatorConfig = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let jobfile = std::env::var("TASKGRID_JOBFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("jobfile.json"));
    let (info, tasks) = match job::load_manifest(&jobfile) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, jobfile = %jobfile.display(), "Failed to load jobfile");
            std::process::exit(1);
        }
    };

    let coordinator = Coordinator::new(&config);
    if let Err(e) = coordinator.init_job(info).await {
        tracing::error!(error = %e, "Failed to initialize job");
        std::process::exit(1);
    }
    if let Err(e) = coordinator.load_tasks(tasks).await {
        tracing::error!(error = %e, "Failed to load tasks");
        std::process::exit(1);
    }

    coordinator.connections.start_sweeper();
    tokio::spawn(status_loop(
        Arc::clone(&coordinator),
        Duration::from_secs_f64(config.status_interval_secs),
    ));

    let state = Arc::new(AppState {
        coordinator,
        metrics_handle,
    });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = config.port, "taskgrid coordinator listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

/// Log the progress line until the job finishes, then drain the finished
/// queue into `<job_path>/results/`. The server keeps running afterwards so
/// late workers still receive the JOB_END sentinel.
async fn status_loop(coordinator: Arc<Coordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let status = coordinator.status.render().await;
        tracing::info!(status = %status, "Job status");
        if coordinator.status.is_job_done().await {
            break;
        }
    }

    if let Err(e) = write_results(&coordinator).await {
        tracing::error!(error = %e, "Failed to write results");
    }
}

async fn write_results(coordinator: &Coordinator) -> std::io::Result<()> {
    let Some(info) = coordinator.job_info().await else {
        return Ok(());
    };
    let results_dir = std::path::Path::new(&info.job_path).join("results");
    tokio::fs::create_dir_all(&results_dir).await?;

    let finished = coordinator.tasks.flush_finished().await;
    let count = finished.len();
    for task in finished {
        tokio::fs::write(results_dir.join(&task.result_filename), &task.payload).await?;
    }
    tracing::info!(count, dir = %results_dir.display(), "Results written");
    Ok(())
}
