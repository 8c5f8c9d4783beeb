//! Run orchestration: collect every enabled source, reconcile, persist, report.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use gmp_adapters::{collector_for_source, Collector, PageOrigin};
use gmp_core::{CandidateRecord, Source};
use gmp_storage::{PageFetcher, PersistenceGateway};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ReconcilePolicy, SourceConfig, SourceMode, SourceRegistry, SyncConfig};
use crate::reconcile::{persist_outcomes, reconcile, GroupFailure};
use crate::report::{previous_quotes, quote_moves, run_dir, write_reports, QUOTES_FILE};

/// How one source fared in a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: Source,
    pub candidates: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub today: NaiveDate,
    pub enabled_sources: usize,
    pub collected_candidates: usize,
    pub groups: usize,
    pub persisted: usize,
    pub failed_groups: Vec<GroupFailure>,
    pub sources: Vec<SourceOutcome>,
    pub reports_dir: String,
    pub quotes_snapshot: String,
}

pub struct SyncPipeline {
    config: SyncConfig,
    registry: SourceRegistry,
    policy: ReconcilePolicy,
    fetcher: Arc<PageFetcher>,
}

/// Listing pages fetched at once across all live sources.
const MAX_PAGES_IN_FLIGHT: usize = 4;

impl SyncPipeline {
    /// Load `sources.yaml` from the configured workspace.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path())?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: SyncConfig, registry: SourceRegistry) -> Result<Self> {
        let fetcher = Arc::new(PageFetcher::new(Some(&config.user_agent), MAX_PAGES_IN_FLIGHT)?);
        let policy = registry.policy(config.match_threshold);
        Ok(Self {
            config,
            registry,
            policy,
            fetcher,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    fn origin_for(&self, source: &SourceConfig) -> PageOrigin {
        match (source.mode, &source.listing_url) {
            (SourceMode::Live, Some(url)) => PageOrigin::Live {
                url: url.clone(),
                fetcher: Arc::clone(&self.fetcher),
                policy: source.fetch_policy(self.config.fetch_policy()),
                capture_dir: Some(self.config.pages_dir.clone()),
            },
            _ => PageOrigin::Fixture(self.config.fixture_bundle_path(source.source)),
        }
    }

    /// Run every enabled collector concurrently, then pool candidates in
    /// registry order. A failing collector contributes nothing.
    pub async fn collect_all(&self) -> (Vec<CandidateRecord>, Vec<SourceOutcome>) {
        let enabled: Vec<&SourceConfig> = self.registry.enabled().collect();
        let mut tasks = JoinSet::new();
        for (idx, source) in enabled.iter().enumerate() {
            let collector: Box<dyn Collector> =
                collector_for_source(source.source, self.origin_for(source));
            let span = info_span!("collect", source = %source.source);
            tasks.spawn(
                async move {
                    let result = collector.collect().await;
                    (idx, result)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<Result<Vec<CandidateRecord>, String>>> = vec![None; enabled.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result.map_err(|err| err.to_string())),
                Err(err) => warn!(error = %err, "collector task aborted"),
            }
        }

        let mut pooled = Vec::new();
        let mut outcomes = Vec::with_capacity(enabled.len());
        for (source, slot) in enabled.iter().zip(slots) {
            let result = slot.unwrap_or_else(|| Err("collector task aborted".to_string()));
            let outcome = match result {
                Ok(candidates) => {
                    if candidates.is_empty() {
                        warn!(source = %source.source, "source returned no rows");
                    } else {
                        info!(source = %source.source, candidates = candidates.len(), "collected");
                    }
                    let count = candidates.len();
                    pooled.extend(candidates);
                    SourceOutcome {
                        source: source.source,
                        candidates: count,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(source = %source.source, error = %err, "source unavailable");
                    SourceOutcome {
                        source: source.source,
                        candidates: 0,
                        error: Some(err),
                    }
                }
            };
            outcomes.push(outcome);
        }
        (pooled, outcomes)
    }

    /// One run with statuses derived against the local calendar date.
    pub async fn run_once<G>(&self, gateway: &mut G) -> Result<SyncRunSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        self.run_once_on(gateway, Local::now().date_naive()).await
    }

    pub async fn run_once_on<G>(&self, gateway: &mut G, today: NaiveDate) -> Result<SyncRunSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, %today);
        self.run_inner(gateway, run_id, today).instrument(span).await
    }

    async fn run_inner<G>(
        &self,
        gateway: &mut G,
        run_id: Uuid,
        today: NaiveDate,
    ) -> Result<SyncRunSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        let started_at = Utc::now();
        let (candidates, sources) = self.collect_all().await;
        let collected_candidates = candidates.len();

        let outcomes = reconcile(candidates, &self.policy, today);
        let persist = persist_outcomes(gateway, &outcomes, started_at).await;
        info!(
            groups = outcomes.len(),
            persisted = persist.persisted,
            failed = persist.failures.len(),
            "reconciled"
        );

        let reports_root = &self.config.reports_dir;
        let previous = previous_quotes(reports_root).context("loading previous quote snapshot")?;
        let moves = quote_moves(&outcomes, &previous);

        let reports_dir = run_dir(reports_root, run_id);
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            today,
            enabled_sources: self.registry.enabled().count(),
            collected_candidates,
            groups: outcomes.len(),
            persisted: persist.persisted,
            failed_groups: persist.failures,
            sources,
            reports_dir: reports_dir.display().to_string(),
            quotes_snapshot: reports_dir.join(QUOTES_FILE).display().to_string(),
        };
        write_reports(reports_root, &summary, &moves)
            .await
            .context("writing run reports")?;
        Ok(summary)
    }
}
