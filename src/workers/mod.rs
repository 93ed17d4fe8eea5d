use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::cognitive::{CognitiveEngine, EngineError};
use crate::config::WorkerToggles;

const SESSION_REAPER_SCHEDULE: &str = "*/30 * * * * *";

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<CognitiveEngine>,
    toggles: WorkerToggles,
}

impl WorkerManager {
    pub async fn new(engine: Arc<CognitiveEngine>, toggles: WorkerToggles) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            toggles,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let scheduler = self.scheduler.lock().await;

        if self.toggles.session_reaper {
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(SESSION_REAPER_SCHEDULE, move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        _ = async {
                            let reaped = engine.reap_sessions();
                            if reaped > 0 {
                                debug!(reaped, active = engine.sessions().active_sessions(), "session reaper pass");
                            }
                        } => {}
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!("Session reaper scheduled (every 30 seconds)");
        }

        if self.toggles.risk_sweep {
            let schedule = self.toggles.risk_sweep_schedule.clone();
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = run_risk_sweep(&engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Risk sweep worker error");
                            }
                        }
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!(schedule = %schedule, "Risk sweep worker scheduled");
        }

        scheduler.start().await?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        info!("Workers stopped");
    }
}

pub async fn run_risk_sweep(engine: &CognitiveEngine) -> Result<(), WorkerError> {
    let report = engine.sweep_risk(Utc::now()).await?;
    info!(
        learners = report.learners,
        weeks_materialized = report.weeks_materialized,
        opened = report.opened,
        closed = report.closed,
        failed = report.failed,
        "Risk sweep finished"
    );
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}
