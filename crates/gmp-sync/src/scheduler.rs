//! Cron-driven runs. Every run goes through a [`RunGuard`] so at most one
//! reconciliation writes at a time.

use std::sync::Arc;

use anyhow::{Context, Result};
use gmp_storage::{MemoryGateway, PgStore};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::pipeline::{SyncPipeline, SyncRunSummary};

/// Single-writer guard shared by every trigger of a run.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    lock: Arc<Mutex<()>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another run holds the guard.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.lock).try_lock_owned().ok()
    }
}

/// Where scheduled runs write.
#[derive(Debug, Clone)]
pub enum RunTarget {
    Database(PgStore),
    /// Reconcile and report without persisting.
    DryRun,
}

pub struct ScheduledSync {
    pipeline: Arc<SyncPipeline>,
    target: RunTarget,
    guard: RunGuard,
}

impl ScheduledSync {
    pub fn new(pipeline: Arc<SyncPipeline>, target: RunTarget, guard: RunGuard) -> Self {
        Self {
            pipeline,
            target,
            guard,
        }
    }

    /// Run once unless a run is already in progress, in which case the tick
    /// is skipped and `Ok(None)` returned.
    pub async fn tick(&self) -> Result<Option<SyncRunSummary>> {
        let Some(_running) = self.guard.try_begin() else {
            warn!("previous sync still running; skipping tick");
            return Ok(None);
        };

        let summary = match &self.target {
            RunTarget::Database(store) => {
                let mut session = store.session().await.context("opening run session")?;
                let result = self.pipeline.run_once(&mut session).await;
                session.release();
                result?
            }
            RunTarget::DryRun => {
                let mut gateway = MemoryGateway::new();
                self.pipeline.run_once(&mut gateway).await?
            }
        };
        Ok(Some(summary))
    }
}

pub async fn build_scheduler(sync: Arc<ScheduledSync>, crons: &[&str]) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in crons {
        let sync = Arc::clone(&sync);
        let job = Job::new_async(*cron, move |_uuid, _l| {
            let sync = Arc::clone(&sync);
            Box::pin(async move {
                match sync.tick().await {
                    Ok(Some(summary)) => info!(
                        run_id = %summary.run_id,
                        groups = summary.groups,
                        persisted = summary.persisted,
                        "scheduled sync finished"
                    ),
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(sched)
}

/// `None` unless scheduling is enabled in the pipeline's config.
pub async fn maybe_build_scheduler(sync: Arc<ScheduledSync>) -> Result<Option<JobScheduler>> {
    let config = sync.pipeline.config();
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let crons = [config.sync_cron_1.clone(), config.sync_cron_2.clone()];
    let crons: Vec<&str> = crons.iter().map(String::as_str).collect();
    build_scheduler(Arc::clone(&sync), &crons).await.map(Some)
}
