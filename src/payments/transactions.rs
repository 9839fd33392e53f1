use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::models::*;
use super::store::StatusStore;
use crate::error::{AppError, AppResult};

/// Transaction records keyed by `tx_hash`, updated through the monotonic merge
pub struct PaymentTransactions {
    store: Arc<dyn StatusStore>,
}

impl PaymentTransactions {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Read-then-upsert. A concurrent first insert is folded in as an update.
    pub async fn upsert_by_tx_hash(&self, input: TransactionUpsert) -> AppResult<PaymentTransaction> {
        let now = Utc::now();

        if let Some(mut existing) = self.store.find_transaction(&input.tx_hash).await? {
            return self.merge_into(&mut existing, input, now).await;
        }

        let candidate = input.clone().into_transaction(now);
        if let Some(created) = self.store.insert_transaction(&candidate).await? {
            debug!(tx_hash = %created.tx_hash, status = %created.status, "payment transaction recorded");
            return Ok(created);
        }

        let mut existing = self
            .store
            .find_transaction(&input.tx_hash)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("transaction {} vanished after conflict", input.tx_hash))
            })?;
        self.merge_into(&mut existing, input, now).await
    }

    async fn merge_into(
        &self,
        existing: &mut PaymentTransaction,
        input: TransactionUpsert,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentTransaction> {
        let previous = existing.status;
        input.apply_to(existing, now);

        if previous != existing.status {
            debug!(
                tx_hash = %existing.tx_hash,
                from = %previous,
                to = %existing.status,
                "payment transaction status advanced"
            );
        }

        self.store.save_transaction(existing).await
    }

    pub async fn find_by_tx_hash(&self, tx_hash: &str) -> AppResult<Option<PaymentTransaction>> {
        self.store.find_transaction(tx_hash).await
    }

    pub async fn find_by_order_id(&self, order_id: &str) -> AppResult<Vec<PaymentTransaction>> {
        self.store.find_transactions_by_order(order_id).await
    }

    pub async fn find_reconciliation_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<PaymentTransaction>> {
        self.store.find_reconciliation_candidates(stale_before, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::memory::InMemoryStatusStore;
    use rust_decimal_macros::dec;

    fn service() -> PaymentTransactions {
        PaymentTransactions::new(Arc::new(InMemoryStatusStore::new()))
    }

    #[tokio::test]
    async fn test_first_upsert_defaults_to_pending() {
        let transactions = service();
        let tx = transactions
            .upsert_by_tx_hash(TransactionUpsert::new("stellar", "hash-1"))
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.retries, 0);
        assert!(tx.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_survives_stale_pending_then_confirms() {
        let transactions = service();
        transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-2").with_status(TransactionStatus::Failed),
            )
            .await
            .unwrap();

        let stale = transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-2").with_status(TransactionStatus::Pending),
            )
            .await
            .unwrap();
        assert_eq!(stale.status, TransactionStatus::Failed);

        let confirmed = transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-2").with_status(TransactionStatus::Confirmed),
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Confirmed);

        let regress = transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-2").with_status(TransactionStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(regress.status, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_find_by_order_id_newest_first() {
        let transactions = service();
        for hash in ["a", "b", "c"] {
            let mut upsert = TransactionUpsert::new("stellar", hash);
            upsert.order_id = Some("order-1".into());
            upsert.amount = Some(dec!(1.5));
            transactions.upsert_by_tx_hash(upsert).await.unwrap();
        }
        transactions
            .upsert_by_tx_hash(TransactionUpsert::new("stellar", "unrelated"))
            .await
            .unwrap();

        let found = transactions.find_by_order_id("order-1").await.unwrap();
        let hashes: Vec<_> = found.iter().map(|tx| tx.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_save_from_stale_read_keeps_confirmed() {
        let store = Arc::new(InMemoryStatusStore::new());
        let transactions = PaymentTransactions::new(store.clone());
        transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-3").with_status(TransactionStatus::Submitted),
            )
            .await
            .unwrap();

        // Reconciler reads the row, then the processor confirms it before the reconciler writes
        let mut stale = store.find_transaction("hash-3").await.unwrap().unwrap();
        transactions
            .upsert_by_tx_hash(
                TransactionUpsert::new("stellar", "hash-3").with_status(TransactionStatus::Confirmed),
            )
            .await
            .unwrap();

        TransactionUpsert::new("stellar", "hash-3")
            .with_status(TransactionStatus::Pending)
            .apply_to(&mut stale, Utc::now());
        assert_eq!(stale.status, TransactionStatus::Pending);
        let saved = store.save_transaction(&stale).await.unwrap();

        assert_eq!(saved.status, TransactionStatus::Confirmed);
        let stored = transactions.find_by_tx_hash("hash-3").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Confirmed);
    }
}
