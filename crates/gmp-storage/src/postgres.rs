//! Postgres-backed gateway. One [`PgSession`] is opened per reconciliation run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gmp_core::CanonicalRecord;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool, Postgres, Row};
use tracing::debug;

use crate::gateway::{check_identity_key, check_quote, GatewayError, PersistenceGateway, RecordId};

const UPSERT_OFFERING: &str = r#"
INSERT INTO offerings (
    identity_key, name, offering_class, price_band, open_date, close_date,
    listing_date, lot_size, issue_size, status, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
ON CONFLICT (identity_key) DO UPDATE SET
    name = EXCLUDED.name,
    offering_class = EXCLUDED.offering_class,
    price_band = COALESCE(EXCLUDED.price_band, offerings.price_band),
    open_date = COALESCE(EXCLUDED.open_date, offerings.open_date),
    close_date = COALESCE(EXCLUDED.close_date, offerings.close_date),
    listing_date = COALESCE(EXCLUDED.listing_date, offerings.listing_date),
    lot_size = CASE WHEN EXCLUDED.lot_size > 0 THEN EXCLUDED.lot_size ELSE offerings.lot_size END,
    issue_size = COALESCE(EXCLUDED.issue_size, offerings.issue_size),
    status = EXCLUDED.status,
    updated_at = now()
RETURNING id
"#;

const INSERT_QUOTE: &str = r#"
INSERT INTO quote_history (offering_id, value, observed_at)
VALUES ($1, $2, $3)
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Check out the connection a single run writes through.
    pub async fn session(&self) -> Result<PgSession, GatewayError> {
        let conn = self.pool.acquire().await?;
        Ok(PgSession { conn })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Run-scoped handle; dropping or [`PgSession::release`] returns the connection.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    pub fn release(self) {
        drop(self.conn);
    }
}

async fn upsert_offering(
    conn: &mut PgConnection,
    identity_key: &str,
    record: &CanonicalRecord,
) -> Result<RecordId, GatewayError> {
    check_identity_key(identity_key)?;
    let row = sqlx::query(UPSERT_OFFERING)
        .bind(identity_key)
        .bind(&record.name)
        .bind(record.offering_class.as_str())
        .bind(record.price_band.as_deref())
        .bind(record.open_date)
        .bind(record.close_date)
        .bind(record.listing_date)
        .bind(i64::from(record.lot_size))
        .bind(record.issue_size.as_deref())
        .bind(record.status.as_str())
        .fetch_one(&mut *conn)
        .await?;
    let id: RecordId = row.try_get("id")?;
    debug!(identity_key, id, "upserted offering");
    Ok(id)
}

async fn insert_quote(
    conn: &mut PgConnection,
    record_id: RecordId,
    value: f64,
    observed_at: DateTime<Utc>,
) -> Result<(), GatewayError> {
    check_quote(record_id, value)?;
    let result = sqlx::query(INSERT_QUOTE)
        .bind(record_id)
        .bind(value)
        .bind(observed_at)
        .execute(&mut *conn)
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
            Err(GatewayError::UnknownRecord(record_id))
        }
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl PersistenceGateway for PgSession {
    async fn upsert(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
    ) -> Result<RecordId, GatewayError> {
        upsert_offering(&mut self.conn, identity_key, record).await
    }

    async fn append_quote(
        &mut self,
        record_id: RecordId,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        insert_quote(&mut self.conn, record_id, value, observed_at).await
    }

    async fn record_observation(
        &mut self,
        identity_key: &str,
        record: &CanonicalRecord,
        quote: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<RecordId, GatewayError> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.conn.begin().await?;
        let id = upsert_offering(&mut tx, identity_key, record).await?;
        insert_quote(&mut tx, id, quote, observed_at).await?;
        tx.commit().await?;
        Ok(id)
    }
}
