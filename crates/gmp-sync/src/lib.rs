//! Reconciliation engine and run orchestration.
//!
//! Candidates from every enabled source are pooled in registry order, grouped
//! by fuzzy identity, merged under per-field source priority and written
//! through a [`gmp_storage::PersistenceGateway`].

pub mod config;
pub mod grouping;
pub mod merge;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod scheduler;

pub use config::{ReconcilePolicy, SourceConfig, SourceMode, SourceRegistry, SyncConfig};
pub use grouping::{token_set_ratio, Group, GroupingEngine, NameScorer, TokenSetScorer};
pub use merge::{MergeOutcome, Merger, SourcePriority};
pub use pipeline::{SourceOutcome, SyncPipeline, SyncRunSummary};
pub use reconcile::{persist_outcomes, reconcile, GroupFailure, PersistReport};
pub use report::{quote_moves, read_run_index, report_recent_runs, QuoteMove, RunIndexEntry};
pub use scheduler::{maybe_build_scheduler, RunGuard, RunTarget, ScheduledSync};

pub const CRATE_NAME: &str = "gmp-sync";
