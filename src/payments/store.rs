use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::*;
use crate::error::AppResult;

/// Persistence boundary for the payment pipeline.
///
/// Implementations MUST enforce uniqueness of `(provider, event_id)` for
/// events, `tx_hash` for transactions and `(provider, stream_key)` for cursors.
/// No operation spans more than one row.
#[async_trait]
pub trait StatusStore: Send + Sync {
    // ========== EVENT OPERATIONS ==========

    async fn find_event(&self, provider: &str, event_id: &str) -> AppResult<Option<PaymentEvent>>;

    /// Insert unless `(provider, event_id)` already exists.
    /// Returns `None` when another writer got there first.
    async fn insert_event(&self, event: &PaymentEvent) -> AppResult<Option<PaymentEvent>>;

    /// Events in `received`/`failed` whose `next_attempt_at <= now`, plus
    /// `processing` events whose lease has expired, oldest first
    async fn find_due_events(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<PaymentEvent>>;

    async fn save_event(&self, event: &PaymentEvent) -> AppResult<PaymentEvent>;

    // ========== TRANSACTION OPERATIONS ==========

    async fn find_transaction(&self, tx_hash: &str) -> AppResult<Option<PaymentTransaction>>;

    /// Insert unless `tx_hash` already exists; `None` on conflict
    async fn insert_transaction(
        &self,
        tx: &PaymentTransaction,
    ) -> AppResult<Option<PaymentTransaction>>;

    /// Overwrite by identity. `status` is merged with the stored value at
    /// write time, so a save built from an older read cannot regress it.
    async fn save_transaction(&self, tx: &PaymentTransaction) -> AppResult<PaymentTransaction>;

    /// `pending`/`submitted` transactions never checked or last checked at or
    /// before `stale_before`, least recently checked first
    async fn find_reconciliation_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<PaymentTransaction>>;

    /// Newest first
    async fn find_transactions_by_order(&self, order_id: &str) -> AppResult<Vec<PaymentTransaction>>;

    // ========== CURSOR OPERATIONS ==========

    async fn find_cursor(&self, provider: &str, stream_key: &str) -> AppResult<Option<StreamCursor>>;

    async fn upsert_cursor(
        &self,
        provider: &str,
        stream_key: &str,
        cursor: &str,
    ) -> AppResult<StreamCursor>;
}
