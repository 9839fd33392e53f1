use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::BigDecimal;
use sqlx::{prelude::FromRow, PgPool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::store::StatusStore;
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    id, provider, event_id, tx_hash, order_id, destination_address, amount, memo,
    payload, status, retries, next_attempt_at, last_error, processed_at,
    created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, provider, tx_hash, order_id, destination_address, asset, memo, amount,
    status, ledger, retries, failure_reason, last_checked_at, created_at, updated_at
"#;

const CURSOR_COLUMNS: &str = "id, provider, stream_key, cursor, created_at, updated_at";

/// `payment_transactions` row; `amount` travels as NUMERIC
#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    provider: String,
    tx_hash: String,
    order_id: Option<String>,
    destination_address: Option<String>,
    asset: Option<String>,
    memo: Option<String>,
    amount: Option<BigDecimal>,
    status: TransactionStatus,
    ledger: Option<String>,
    retries: i32,
    failure_reason: Option<String>,
    last_checked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> AppResult<Self> {
        let amount = row
            .amount
            .map(|value| Decimal::from_str(&value.to_string()))
            .transpose()
            .map_err(|e| AppError::Internal(format!("Invalid stored amount: {}", e)))?;

        Ok(PaymentTransaction {
            id: row.id,
            provider: row.provider,
            tx_hash: row.tx_hash,
            order_id: row.order_id,
            destination_address: row.destination_address,
            asset: row.asset,
            memo: row.memo,
            amount,
            status: row.status,
            ledger: row.ledger,
            retries: row.retries,
            failure_reason: row.failure_reason,
            last_checked_at: row.last_checked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_big_decimal(amount: Option<Decimal>) -> AppResult<Option<BigDecimal>> {
    amount
        .map(|value| BigDecimal::from_str(&value.to_string()))
        .transpose()
        .map_err(|e| AppError::Internal(format!("Amount conversion failed: {}", e)))
}

/// PostgreSQL-backed status store
pub struct PgStatusStore {
    pub pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    // ========== EVENT OPERATIONS ==========

    async fn find_event(&self, provider: &str, event_id: &str) -> AppResult<Option<PaymentEvent>> {
        let event = sqlx::query_as::<_, PaymentEvent>(&format!(
            "SELECT {} FROM payment_events WHERE provider = $1 AND event_id = $2",
            EVENT_COLUMNS
        ))
        .bind(provider)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn insert_event(&self, event: &PaymentEvent) -> AppResult<Option<PaymentEvent>> {
        let inserted = sqlx::query_as::<_, PaymentEvent>(&format!(
            r#"
            INSERT INTO payment_events (
                id, provider, event_id, tx_hash, order_id, destination_address, amount, memo,
                payload, status, retries, next_attempt_at, last_error, processed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(&event.provider)
        .bind(&event.event_id)
        .bind(&event.tx_hash)
        .bind(&event.order_id)
        .bind(&event.destination_address)
        .bind(&event.amount)
        .bind(&event.memo)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.retries)
        .bind(event.next_attempt_at)
        .bind(&event.last_error)
        .bind(event.processed_at)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            debug!(
                provider = %event.provider,
                event_id = %event.event_id,
                "event insert lost to an existing row"
            );
        }

        Ok(inserted)
    }

    async fn find_due_events(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<PaymentEvent>> {
        let events = sqlx::query_as::<_, PaymentEvent>(&format!(
            r#"
            SELECT {}
            FROM payment_events
            WHERE status IN ('received', 'failed', 'processing')
              AND next_attempt_at <= $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
            EVENT_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn save_event(&self, event: &PaymentEvent) -> AppResult<PaymentEvent> {
        let saved = sqlx::query_as::<_, PaymentEvent>(&format!(
            r#"
            UPDATE payment_events
            SET status = $2,
                retries = $3,
                next_attempt_at = $4,
                last_error = $5,
                processed_at = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(event.status)
        .bind(event.retries)
        .bind(event.next_attempt_at)
        .bind(&event.last_error)
        .bind(event.processed_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}", event.id)))?;

        Ok(saved)
    }

    // ========== TRANSACTION OPERATIONS ==========

    async fn find_transaction(&self, tx_hash: &str) -> AppResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE tx_hash = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn insert_transaction(
        &self,
        tx: &PaymentTransaction,
    ) -> AppResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO payment_transactions (
                id, provider, tx_hash, order_id, destination_address, asset, memo, amount,
                status, ledger, retries, failure_reason, last_checked_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (tx_hash) DO NOTHING
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(&tx.provider)
        .bind(&tx.tx_hash)
        .bind(&tx.order_id)
        .bind(&tx.destination_address)
        .bind(&tx.asset)
        .bind(&tx.memo)
        .bind(to_big_decimal(tx.amount)?)
        .bind(tx.status)
        .bind(&tx.ledger)
        .bind(tx.retries)
        .bind(&tx.failure_reason)
        .bind(tx.last_checked_at)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_optional(&self.pool)
        .await?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn save_transaction(&self, tx: &PaymentTransaction) -> AppResult<PaymentTransaction> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE payment_transactions
            SET provider = $2,
                order_id = $3,
                destination_address = $4,
                asset = $5,
                memo = $6,
                amount = $7,
                status = CASE
                    WHEN payment_transactions.status = 'confirmed' OR $8 = 'confirmed'
                        THEN 'confirmed'::payment_transaction_status
                    WHEN payment_transactions.status = 'failed'
                        THEN 'failed'::payment_transaction_status
                    ELSE $8
                END,
                ledger = $9,
                retries = $10,
                failure_reason = $11,
                last_checked_at = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(&tx.provider)
        .bind(&tx.order_id)
        .bind(&tx.destination_address)
        .bind(&tx.asset)
        .bind(&tx.memo)
        .bind(to_big_decimal(tx.amount)?)
        .bind(tx.status)
        .bind(&tx.ledger)
        .bind(tx.retries)
        .bind(&tx.failure_reason)
        .bind(tx.last_checked_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", tx.tx_hash)))
        .and_then(PaymentTransaction::try_from)
    }

    async fn find_reconciliation_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM payment_transactions
            WHERE status IN ('pending', 'submitted')
              AND (last_checked_at IS NULL OR last_checked_at <= $1)
            ORDER BY last_checked_at ASC NULLS FIRST, updated_at ASC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(stale_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentTransaction::try_from)
        .collect()
    }

    async fn find_transactions_by_order(&self, order_id: &str) -> AppResult<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM payment_transactions
            WHERE order_id = $1
            ORDER BY created_at DESC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentTransaction::try_from)
        .collect()
    }

    // ========== CURSOR OPERATIONS ==========

    async fn find_cursor(&self, provider: &str, stream_key: &str) -> AppResult<Option<StreamCursor>> {
        let cursor = sqlx::query_as::<_, StreamCursor>(&format!(
            "SELECT {} FROM payment_stream_cursors WHERE provider = $1 AND stream_key = $2",
            CURSOR_COLUMNS
        ))
        .bind(provider)
        .bind(stream_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    async fn upsert_cursor(
        &self,
        provider: &str,
        stream_key: &str,
        cursor: &str,
    ) -> AppResult<StreamCursor> {
        let record = sqlx::query_as::<_, StreamCursor>(&format!(
            r#"
            INSERT INTO payment_stream_cursors (id, provider, stream_key, cursor)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, stream_key)
            DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = NOW()
            RETURNING {}
            "#,
            CURSOR_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(stream_key)
        .bind(cursor)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }
}
