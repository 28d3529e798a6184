#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fallwatch::broadcast::{JobEventBroadcaster, JobEventKind};
use fallwatch::config::{load_config, Config};
use fallwatch::telemetry::init_logging;
use fallwatch::{
    AlertStore, AnalysisService, AnalysisSettings, AppState, Database, JobStore, StaleJobReaper,
    SubprocessRunner,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "fallwatch", version, about = "Video fall-analysis API server")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "FALLWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.bind`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "fallwatch exited with an error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> fallwatch::Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    init_logging(&config.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "Starting fallwatch"
    );

    let db = Database::open(&config.database_path())?;
    let jobs = JobStore::new(db.clone());
    let alerts = AlertStore::new(db);
    let events = JobEventBroadcaster::default();

    let runner = SubprocessRunner::from_config(&config.inference);
    let service = AnalysisService::new(
        jobs.clone(),
        Arc::new(runner),
        events.clone(),
        AnalysisSettings::from_config(&config.inference),
    );

    let reaper = config.reaper.enabled.then(|| {
        let reaper =
            StaleJobReaper::from_config(jobs.clone(), service.reconciler().clone(), &config.reaper);
        let handle = reaper.start();
        info!(
            interval_secs = config.reaper.interval_secs,
            grace_secs = config.reaper.grace_secs,
            "Stale job reaper started"
        );
        (reaper, handle)
    });

    tokio::spawn(log_job_events(events));

    let listener = TcpListener::bind(&config.server.bind).await?;
    let state = AppState::new(service, alerts, &config);
    fallwatch::serve(listener, state, shutdown_signal()).await?;

    if let Some((reaper, handle)) = reaper {
        reaper.stop();
        if let Err(e) = handle.await {
            warn!(error = %e, "Stale job reaper did not stop cleanly");
        }
    }
    info!("fallwatch stopped");
    Ok(())
}

/// Logs terminal job outcomes and raised alerts.
async fn log_job_events(events: JobEventBroadcaster) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                JobEventKind::AlertCreated { alert_id, severity, .. } => warn!(
                    job_id = %event.job_id,
                    owner_id = %event.owner_id,
                    alert_id = %alert_id,
                    severity = %severity,
                    "Fall alert raised"
                ),
                JobEventKind::Completed { fall_detected, is_simulated, .. } => info!(
                    job_id = %event.job_id,
                    fall_detected,
                    is_simulated,
                    "Analysis completed"
                ),
                JobEventKind::Failed { error } => warn!(
                    job_id = %event.job_id,
                    error = %error,
                    "Analysis failed"
                ),
                JobEventKind::Submitted => {}
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Job event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
