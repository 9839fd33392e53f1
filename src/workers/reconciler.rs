use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ReconciliationSettings;
use crate::error::AppResult;
use crate::payments::models::{TransactionStatus, TransactionUpsert};
use crate::payments::PaymentTransactions;
use crate::providers::PaymentProvider;
use crate::workers::guard::SingleFlight;
use crate::workers::scheduler::PeriodicTask;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub confirmed: usize,
    pub query_errors: usize,
}

/// Re-checks transactions whose outcome is still uncertain
pub struct TransactionReconciler {
    provider: Arc<dyn PaymentProvider>,
    transactions: Arc<PaymentTransactions>,
    settings: ReconciliationSettings,
    guard: SingleFlight,
}

impl TransactionReconciler {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        transactions: Arc<PaymentTransactions>,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            provider,
            transactions,
            settings,
            guard: SingleFlight::new(),
        }
    }

    /// One pass over stale `pending`/`submitted` transactions, least recently
    /// checked first. Results go through the monotonic merge of the upsert.
    pub async fn reconcile_pending(&self) -> AppResult<ReconcileSummary> {
        let stale_before =
            Utc::now() - chrono::Duration::milliseconds(self.settings.stale_ms as i64);
        let candidates = self
            .transactions
            .find_reconciliation_candidates(stale_before, self.settings.batch_size as usize)
            .await?;

        let mut summary = ReconcileSummary::default();

        for tx in candidates {
            summary.checked += 1;

            let upsert = match self.provider.get_status(&tx.tx_hash).await {
                Ok(status) => {
                    debug!(tx_hash = %tx.tx_hash, status = ?status, "ledger status read");
                    TransactionUpsert {
                        status: status.as_transaction_status(),
                        ..TransactionUpsert::from_existing(&tx)
                    }
                }
                // Soft failure: stays uncertain, the next tick is the retry
                Err(e) => {
                    summary.query_errors += 1;
                    warn!(tx_hash = %tx.tx_hash, "ledger status query failed: {}", e);
                    TransactionUpsert {
                        status: Some(TransactionStatus::Pending),
                        failure_reason: Some(e.to_string()),
                        increment_retries: true,
                        ..TransactionUpsert::from_existing(&tx)
                    }
                }
            };

            match self.transactions.upsert_by_tx_hash(upsert).await {
                Ok(updated) if updated.status == TransactionStatus::Confirmed => {
                    summary.confirmed += 1
                }
                Ok(_) => {}
                Err(e) => warn!(tx_hash = %tx.tx_hash, "could not store reconciliation result: {}", e),
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl PeriodicTask for TransactionReconciler {
    fn name(&self) -> &'static str {
        "payment reconciler"
    }

    async fn tick(&self) {
        let Some(_permit) = self.guard.try_acquire() else {
            debug!("payment reconciler still running, tick skipped");
            return;
        };

        match self.reconcile_pending().await {
            Ok(summary) if summary.checked > 0 => info!(
                checked = summary.checked,
                confirmed = summary.confirmed,
                query_errors = summary.query_errors,
                "🔁 payment reconciliation pass finished"
            ),
            Ok(_) => {}
            Err(e) => error!("❌ payment reconciliation batch failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::models::PaymentTransaction;
    use crate::payments::InMemoryStatusStore;
    use crate::workers::testing::{FakeProvider, Ledger};
    use rust_decimal_macros::dec;

    struct Fixture {
        provider: Arc<FakeProvider>,
        transactions: Arc<PaymentTransactions>,
        reconciler: TransactionReconciler,
    }

    fn fixture(stale_ms: u64) -> Fixture {
        let store = Arc::new(InMemoryStatusStore::new());
        let provider = Arc::new(FakeProvider::new());
        let transactions = Arc::new(PaymentTransactions::new(store));
        let reconciler = TransactionReconciler::new(
            provider.clone(),
            transactions.clone(),
            ReconciliationSettings { interval_ms: 60_000, batch_size: 50, stale_ms },
        );
        Fixture { provider, transactions, reconciler }
    }

    async fn seed(f: &Fixture, tx_hash: &str, status: TransactionStatus) -> PaymentTransaction {
        let mut upsert = TransactionUpsert::new("stellar", tx_hash).with_status(status);
        upsert.order_id = Some("order-1".into());
        upsert.amount = Some(dec!(10));
        f.transactions.upsert_by_tx_hash(upsert).await.unwrap()
    }

    async fn stored(f: &Fixture, tx_hash: &str) -> PaymentTransaction {
        f.transactions.find_by_tx_hash(tx_hash).await.unwrap().unwrap()
    }

    async fn wait_until_stale() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn test_pending_becomes_confirmed() {
        let f = fixture(1);
        seed(&f, "tx-1", TransactionStatus::Submitted).await;
        f.provider.set("tx-1", Ledger::Confirmed);
        wait_until_stale().await;

        let summary = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(summary, ReconcileSummary { checked: 1, confirmed: 1, query_errors: 0 });
        let tx = stored(&f, "tx-1").await;
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.order_id.as_deref(), Some("order-1"));
        assert_eq!(tx.amount, Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_not_indexed_stays_pending() {
        let f = fixture(1);
        let seeded = seed(&f, "tx-2", TransactionStatus::Pending).await;
        wait_until_stale().await;

        f.reconciler.reconcile_pending().await.unwrap();

        let tx = stored(&f, "tx-2").await;
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.retries, 0);
        assert!(tx.last_checked_at > seeded.last_checked_at);
    }

    #[tokio::test]
    async fn test_query_error_is_soft_failure() {
        let f = fixture(1);
        seed(&f, "tx-3", TransactionStatus::Submitted).await;
        f.provider.set("tx-3", Ledger::Down);
        wait_until_stale().await;

        let summary = f.reconciler.reconcile_pending().await.unwrap();
        assert_eq!(summary.query_errors, 1);

        let tx = stored(&f, "tx-3").await;
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.retries, 1);
        assert!(tx.failure_reason.unwrap().contains("horizon down"));
    }

    #[tokio::test]
    async fn test_recently_checked_is_not_a_candidate() {
        let f = fixture(60_000);
        seed(&f, "tx-4", TransactionStatus::Pending).await;

        let summary = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(summary.checked, 0);
        assert_eq!(f.provider.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_final_statuses_are_not_candidates() {
        let f = fixture(1);
        seed(&f, "tx-5", TransactionStatus::Confirmed).await;
        seed(&f, "tx-6", TransactionStatus::Failed).await;
        wait_until_stale().await;

        let summary = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(summary.checked, 0);
        assert_eq!(f.provider.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_survives_stale_read_until_confirmed() {
        let f = fixture(1);
        // Failed by a previous observer while a stale pending read is in flight
        let seeded = seed(&f, "tx-7", TransactionStatus::Failed).await;

        let merged = f
            .transactions
            .upsert_by_tx_hash(TransactionUpsert {
                status: Some(TransactionStatus::Pending),
                ..TransactionUpsert::from_existing(&seeded)
            })
            .await
            .unwrap();
        assert_eq!(merged.status, TransactionStatus::Failed);

        let merged = f
            .transactions
            .upsert_by_tx_hash(TransactionUpsert {
                status: Some(TransactionStatus::Confirmed),
                ..TransactionUpsert::from_existing(&seeded)
            })
            .await
            .unwrap();
        assert_eq!(merged.status, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_one_error_does_not_abort_pass() {
        let f = fixture(1);
        seed(&f, "tx-a", TransactionStatus::Pending).await;
        seed(&f, "tx-b", TransactionStatus::Pending).await;
        f.provider.set("tx-a", Ledger::Down);
        f.provider.set("tx-b", Ledger::Failed);
        wait_until_stale().await;

        let summary = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(summary.checked, 2);
        assert_eq!(stored(&f, "tx-a").await.status, TransactionStatus::Pending);
        assert_eq!(stored(&f, "tx-b").await.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_tick_releases_guard() {
        let f = fixture(1);
        seed(&f, "tx-8", TransactionStatus::Pending).await;
        f.provider.set("tx-8", Ledger::Down);
        wait_until_stale().await;

        f.reconciler.tick().await;

        assert!(!f.reconciler.guard.is_running());
        assert_eq!(f.provider.status_calls(), 1);
    }
}
