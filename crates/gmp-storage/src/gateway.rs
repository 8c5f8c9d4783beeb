//! Egress contract for reconciled offerings.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gmp_core::{CanonicalRecord, QuoteEntry};
use thiserror::Error;

pub type RecordId = i64;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("record `{identity_key}` rejected: {reason}")]
    Rejected { identity_key: String, reason: String },
    #[error("no stored record with id {0}")]
    UnknownRecord(RecordId),
    #[error("quote {value} for record {record_id} is not a finite number")]
    InvalidQuote { record_id: RecordId, value: f64 },
}

/// Sink for canonical records and their quote history.
///
/// `upsert` is idempotent per identity key. Name, class and status are always
/// replaced; an empty optional field or a zero lot size keeps what is stored.
/// `append_quote` only ever inserts.
#[async_trait]
pub trait PersistenceGateway: Send {
    async fn upsert(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
    ) -> Result<RecordId, GatewayError>;

    async fn append_quote(
        &mut self,
        record_id: RecordId,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Upsert `record` and append `quote` as one unit: both land or neither does.
    async fn record_observation(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
        quote: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<RecordId, GatewayError>;
}

pub(crate) fn check_identity_key(identity_key: &str) -> Result<(), GatewayError> {
    if identity_key.trim().is_empty() {
        return Err(GatewayError::Rejected {
            identity_key: identity_key.to_string(),
            reason: "empty identity key".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_quote(record_id: RecordId, value: f64) -> Result<(), GatewayError> {
    if !value.is_finite() {
        return Err(GatewayError::InvalidQuote { record_id, value });
    }
    Ok(())
}

/// Incoming values win, except that an empty field leaves the stored one in place.
fn keep_stored_fields(stored: &CanonicalRecord, incoming: &CanonicalRecord) -> CanonicalRecord {
    CanonicalRecord {
        price_band: incoming.price_band.clone().or_else(|| stored.price_band.clone()),
        open_date: incoming.open_date.or(stored.open_date),
        close_date: incoming.close_date.or(stored.close_date),
        listing_date: incoming.listing_date.or(stored.listing_date),
        lot_size: if incoming.lot_size > 0 {
            incoming.lot_size
        } else {
            stored.lot_size
        },
        issue_size: incoming.issue_size.clone().or_else(|| stored.issue_size.clone()),
        ..incoming.clone()
    }
}

/// In-process gateway for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryGateway {
    ids: HashMap<String, RecordId>,
    records: BTreeMap<RecordId, CanonicalRecord>,
    quotes: BTreeMap<RecordId, Vec<QuoteEntry>>,
    next_id: RecordId,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn id_for(&self, identity_key: &str) -> Option<RecordId> {
        self.ids.get(identity_key).copied()
    }

    pub fn record(&self, identity_key: &str) -> Option<&CanonicalRecord> {
        self.records.get(&self.id_for(identity_key)?)
    }

    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.values()
    }

    pub fn quote_history(&self, identity_key: &str) -> &[QuoteEntry] {
        self.id_for(identity_key)
            .and_then(|id| self.quotes.get(&id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn upsert(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
    ) -> Result<RecordId, GatewayError> {
        check_identity_key(identity_key)?;
        let id = match self.ids.get(identity_key) {
            Some(id) => *id,
            None => {
                self.next_id += 1;
                self.ids.insert(identity_key.to_string(), self.next_id);
                self.next_id
            }
        };
        let merged = match self.records.get(&id) {
            Some(stored) => keep_stored_fields(stored, record),
            None => record.clone(),
        };
        self.records.insert(id, merged);
        Ok(id)
    }

    async fn append_quote(
        &mut self,
        record_id: RecordId,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        if !self.records.contains_key(&record_id) {
            return Err(GatewayError::UnknownRecord(record_id));
        }
        check_quote(record_id, value)?;
        self.quotes
            .entry(record_id)
            .or_default()
            .push(QuoteEntry { value, observed_at });
        Ok(())
    }

    async fn record_observation(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
        quote: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<RecordId, GatewayError> {
        let before = self.clone();
        let id = match self.upsert(identity_key, record).await {
            Ok(id) => id,
            Err(err) => {
                *self = before;
                return Err(err);
            }
        };
        if let Err(err) = self.append_quote(id, quote, observed_at).await {
            *self = before;
            return Err(err);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use gmp_core::{LifecycleStatus, OfferingClass};

    fn record(key: &str, price_band: Option<&str>) -> CanonicalRecord {
        CanonicalRecord {
            identity_key: key.to_string(),
            name: "Fractal Analytics".to_string(),
            offering_class: OfferingClass::Mainboard,
            price_band: price_band.map(str::to_string),
            open_date: NaiveDate::from_ymd_opt(2026, 2, 9),
            close_date: NaiveDate::from_ymd_opt(2026, 2, 11),
            listing_date: None,
            lot_size: 16,
            issue_size: None,
            status: LifecycleStatus::Open,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, hour, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_key() {
        let mut gateway = MemoryGateway::new();
        let first = gateway
            .upsert("fractal analytics", &record("fractal analytics", None))
            .await
            .unwrap();
        let second = gateway
            .upsert("fractal analytics", &record("fractal analytics", Some("₹900")))
            .await
            .unwrap();
        let other = gateway.upsert("aequs", &record("aequs", None)).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(gateway.len(), 2);
        assert_eq!(
            gateway.record("fractal analytics").unwrap().price_band.as_deref(),
            Some("₹900")
        );
    }

    #[tokio::test]
    async fn empty_fields_keep_stored_values() {
        let mut gateway = MemoryGateway::new();
        let mut full = record("fractal analytics", Some("857.00 to 900.00"));
        full.issue_size = Some("2,834.00".to_string());
        gateway.upsert("fractal analytics", &full).await.unwrap();

        let mut sparse = record("fractal analytics", None);
        sparse.open_date = None;
        sparse.close_date = None;
        sparse.lot_size = 0;
        sparse.status = LifecycleStatus::Upcoming;
        gateway.upsert("fractal analytics", &sparse).await.unwrap();

        let stored = gateway.record("fractal analytics").unwrap();
        assert_eq!(stored.price_band.as_deref(), Some("857.00 to 900.00"));
        assert_eq!(stored.issue_size.as_deref(), Some("2,834.00"));
        assert_eq!(stored.lot_size, 16);
        assert_eq!(stored.open_date, NaiveDate::from_ymd_opt(2026, 2, 9));
        assert_eq!(stored.close_date, NaiveDate::from_ymd_opt(2026, 2, 11));
        assert_eq!(stored.status, LifecycleStatus::Upcoming);
    }

    #[tokio::test]
    async fn quotes_only_append() {
        let mut gateway = MemoryGateway::new();
        let id = gateway
            .upsert("fractal analytics", &record("fractal analytics", None))
            .await
            .unwrap();
        gateway.append_quote(id, 38.0, at(9)).await.unwrap();
        gateway.append_quote(id, 42.0, at(18)).await.unwrap();

        let history = gateway.quote_history("fractal analytics");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, 38.0);
        assert_eq!(history[1].value, 42.0);
        assert!(history[0].observed_at < history[1].observed_at);
    }

    #[tokio::test]
    async fn failed_quote_leaves_no_partial_write() {
        let mut gateway = MemoryGateway::new();
        let id = gateway
            .record_observation("fractal analytics", &record("fractal analytics", Some("₹900")), 42.0, at(9))
            .await
            .unwrap();

        let err = gateway
            .record_observation("fractal analytics", &record("fractal analytics", Some("₹950")), f64::NAN, at(18))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidQuote { record_id, .. } if record_id == id));
        assert_eq!(
            gateway.record("fractal analytics").unwrap().price_band.as_deref(),
            Some("₹900")
        );
        assert_eq!(gateway.quote_history("fractal analytics").len(), 1);

        assert!(gateway
            .record_observation("aequs", &record("aequs", None), f64::INFINITY, at(9))
            .await
            .is_err());
        assert!(gateway.id_for("aequs").is_none());
        assert_eq!(gateway.len(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_ids_and_empty_keys() {
        let mut gateway = MemoryGateway::new();
        assert!(matches!(
            gateway.append_quote(7, 1.0, at(9)).await,
            Err(GatewayError::UnknownRecord(7))
        ));
        assert!(matches!(
            gateway.upsert("  ", &record("", None)).await,
            Err(GatewayError::Rejected { .. })
        ));
        assert!(gateway.is_empty());
        assert!(gateway.quote_history("missing").is_empty());
    }
}
