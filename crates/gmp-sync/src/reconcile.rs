//! One reconciliation pass: group, merge, then write through a gateway.

use chrono::{DateTime, NaiveDate, Utc};
use gmp_core::CandidateRecord;
use gmp_storage::{GatewayError, PersistenceGateway};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ReconcilePolicy;
use crate::grouping::{Group, GroupingEngine};
use crate::merge::{MergeOutcome, Merger};

/// Candidates must arrive pooled in registry order, each source's candidates
/// in collector order.
pub fn reconcile(
    candidates: Vec<CandidateRecord>,
    policy: &ReconcilePolicy,
    today: NaiveDate,
) -> Vec<MergeOutcome> {
    let groups = GroupingEngine::new(policy.match_threshold).group(candidates);
    merge_groups(&groups, policy, today)
}

pub fn merge_groups(groups: &[Group], policy: &ReconcilePolicy, today: NaiveDate) -> Vec<MergeOutcome> {
    let merger = Merger::new(policy.field_priority.clone(), policy.quote_priority.clone());
    groups.iter().map(|group| merger.merge(group, today)).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub identity_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistReport {
    pub persisted: usize,
    pub failures: Vec<GroupFailure>,
}

async fn persist_one<G: PersistenceGateway + ?Sized>(
    gateway: &mut G,
    outcome: &MergeOutcome,
    observed_at: DateTime<Utc>,
) -> Result<(), GatewayError> {
    let key = &outcome.record.identity_key;
    let id = gateway
        .record_observation(key, &outcome.record, outcome.quote, observed_at)
        .await?;
    debug!(identity_key = %key, id, quote = outcome.quote, "persisted offering");
    Ok(())
}

/// Upsert each record and append its quote. A failing group is logged and
/// reported; the remaining groups are still written.
pub async fn persist_outcomes<G: PersistenceGateway + ?Sized>(
    gateway: &mut G,
    outcomes: &[MergeOutcome],
    observed_at: DateTime<Utc>,
) -> PersistReport {
    let mut report = PersistReport::default();
    for outcome in outcomes {
        match persist_one(gateway, outcome, observed_at).await {
            Ok(()) => report.persisted += 1,
            Err(err) => {
                warn!(identity_key = %outcome.record.identity_key, error = %err, "persisting group failed");
                report.failures.push(GroupFailure {
                    identity_key: outcome.record.identity_key.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use gmp_core::{CanonicalRecord, LifecycleStatus, Source};
    use gmp_storage::{MemoryGateway, RecordId};

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).single().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
    }

    fn fractal_candidates() -> Vec<CandidateRecord> {
        vec![
            CandidateRecord::builder(Source::Chittorgarh, "Fractal Analytics", observed())
                .quote_value(Some(0.0))
                .build(),
            CandidateRecord::builder(Source::IpoWatch, "Fractal Analytics Ltd", observed())
                .price_band(Some("₹900".into()))
                .quote_value(Some(42.0))
                .build(),
            CandidateRecord::builder(Source::InvestorGain, "FRACTAL ANALYTICS", observed())
                .quote_value(Some(38.0))
                .build(),
        ]
    }

    #[tokio::test]
    async fn three_source_fractal_run_end_to_end() {
        let outcomes = reconcile(fractal_candidates(), &ReconcilePolicy::default(), today());
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.record.identity_key, "fractal analytics");
        assert_eq!(outcome.record.price_band.as_deref(), Some("₹900"));
        assert_eq!(outcome.quote, 42.0);
        assert_eq!(outcome.quote_source, Some(Source::IpoWatch));

        let mut gateway = MemoryGateway::new();
        let report = persist_outcomes(&mut gateway, &outcomes, observed()).await;
        assert_eq!(report.persisted, 1);
        assert!(report.failures.is_empty());
        assert_eq!(gateway.len(), 1);
        let history = gateway.quote_history("fractal analytics");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 42.0);
        assert_eq!(history[0].observed_at, observed());
    }

    #[tokio::test]
    async fn rerun_updates_in_place_and_extends_history() {
        let mut gateway = MemoryGateway::new();
        let outcomes = reconcile(fractal_candidates(), &ReconcilePolicy::default(), today());
        persist_outcomes(&mut gateway, &outcomes, observed()).await;
        persist_outcomes(&mut gateway, &outcomes, observed()).await;
        assert_eq!(gateway.len(), 1);
        assert_eq!(gateway.quote_history("fractal analytics").len(), 2);
    }

    #[tokio::test]
    async fn quoteless_group_still_records_zero() {
        let candidates = vec![CandidateRecord::builder(Source::Chittorgarh, "Aequs Limited", observed())
            .lot_size(120)
            .build()];
        let outcomes = reconcile(candidates, &ReconcilePolicy::default(), today());
        let mut gateway = MemoryGateway::new();
        persist_outcomes(&mut gateway, &outcomes, observed()).await;
        let history = gateway.quote_history("aequs");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 0.0);
        assert_eq!(gateway.record("aequs").unwrap().status, LifecycleStatus::Upcoming);
    }

    #[tokio::test]
    async fn group_with_unstorable_quote_is_not_half_written() {
        let mut outcomes = reconcile(fractal_candidates(), &ReconcilePolicy::default(), today());
        outcomes[0].quote = f64::NAN;

        let mut gateway = MemoryGateway::new();
        let report = persist_outcomes(&mut gateway, &outcomes, observed()).await;
        assert_eq!(report.persisted, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(gateway.record("fractal analytics").is_none());
        assert!(gateway.quote_history("fractal analytics").is_empty());
    }

    /// Rejects one identity key, delegates the rest.
    struct FlakyGateway {
        inner: MemoryGateway,
        reject: &'static str,
    }

    #[async_trait]
    impl PersistenceGateway for FlakyGateway {
        async fn upsert(
            &mut self,
            identity_key: &str,
            record: &CanonicalRecord,
        ) -> Result<RecordId, GatewayError> {
            if identity_key == self.reject {
                return Err(GatewayError::Rejected {
                    identity_key: identity_key.to_string(),
                    reason: "constraint violation".to_string(),
                });
            }
            self.inner.upsert(identity_key, record).await
        }

        async fn append_quote(
            &mut self,
            record_id: RecordId,
            value: f64,
            observed_at: DateTime<Utc>,
        ) -> Result<(), GatewayError> {
            self.inner.append_quote(record_id, value, observed_at).await
        }

        async fn record_observation(
            &mut self,
            identity_key: &str,
            record: &CanonicalRecord,
            quote: f64,
            observed_at: DateTime<Utc>,
        ) -> Result<RecordId, GatewayError> {
            let id = self.upsert(identity_key, record).await?;
            self.append_quote(id, quote, observed_at).await?;
            Ok(id)
        }
    }

    #[tokio::test]
    async fn failing_group_does_not_abort_the_rest() {
        let mut candidates = fractal_candidates();
        candidates.push(
            CandidateRecord::builder(Source::IpoWatch, "Aequs Ltd", observed())
                .quote_value(Some(6.0))
                .build(),
        );
        let outcomes = reconcile(candidates, &ReconcilePolicy::default(), today());
        assert_eq!(outcomes.len(), 2);

        let mut gateway = FlakyGateway {
            inner: MemoryGateway::new(),
            reject: "fractal analytics",
        };
        let report = persist_outcomes(&mut gateway, &outcomes, observed()).await;
        assert_eq!(report.persisted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identity_key, "fractal analytics");
        assert_eq!(gateway.inner.quote_history("aequs")[0].value, 6.0);
        assert!(gateway.inner.record("fractal analytics").is_none());
    }
}
