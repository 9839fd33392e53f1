use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorSettings;
use crate::error::{AppError, AppResult, ProviderError};
use crate::payments::models::{PaymentEvent, TransactionStatus, TransactionUpsert};
use crate::payments::{PaymentEvents, PaymentTransactions};
use crate::providers::traits::{normalize_amount, VerifyPayment};
use crate::providers::PaymentProvider;
use crate::workers::guard::SingleFlight;
use crate::workers::scheduler::PeriodicTask;

/// Delay before retry number `retries` (1-based): `min(max, base * 2^(retries - 1))`
pub fn backoff_delay(retries: i32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = retries.saturating_sub(1).max(0) as u32;
    let delay_ms = 2u64
        .checked_pow(exponent)
        .and_then(|factor| base_ms.checked_mul(factor))
        .map_or(max_ms, |ms| ms.min(max_ms));
    Duration::from_millis(delay_ms)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Drains due events and verifies them against the ledger
pub struct EventProcessor {
    provider: Arc<dyn PaymentProvider>,
    events: Arc<PaymentEvents>,
    transactions: Arc<PaymentTransactions>,
    settings: ProcessorSettings,
    guard: SingleFlight,
}

impl EventProcessor {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        events: Arc<PaymentEvents>,
        transactions: Arc<PaymentTransactions>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            provider,
            events,
            transactions,
            settings,
            guard: SingleFlight::new(),
        }
    }

    /// Process one batch. Per-event failures are recorded on the event and
    /// never abort the batch; only the candidate query can fail the call.
    pub async fn process_pending(&self) -> AppResult<ProcessSummary> {
        let candidates = self
            .events
            .find_pending(self.settings.batch_size as usize)
            .await?;
        let mut summary = ProcessSummary::default();

        for mut event in candidates {
            match self.process_event(&mut event).await {
                Ok(()) => summary.processed += 1,
                // Bad input never verifies, so it is closed instead of retried
                Err(AppError::Provider(e)) if e.is_validation() => {
                    summary.failed += 1;
                    self.reject(&mut event, e).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    self.schedule_retry(&mut event, e).await;
                }
            }
        }

        Ok(summary)
    }

    async fn process_event(&self, event: &mut PaymentEvent) -> AppResult<()> {
        let lease = chrono::Duration::from_std(self.settings.processing_lease())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.events.mark_processing(event, lease).await?;

        let (Some(tx_hash), Some(destination), Some(amount)) = (
            event.tx_hash.clone(),
            event.destination_address.clone(),
            event.amount.clone(),
        ) else {
            debug!(event_id = %event.event_id, "event lacks correlation fields, nothing to verify");
            return self.events.mark_processed(event).await;
        };

        if let Some(existing) = self.transactions.find_by_tx_hash(&tx_hash).await? {
            if existing.status == TransactionStatus::Confirmed {
                debug!(event_id = %event.event_id, tx_hash = %tx_hash, "transaction already confirmed");
                return self.events.mark_processed(event).await;
            }
        }

        let Some(order_id) = event.correlation_id().map(str::to_string) else {
            debug!(event_id = %event.event_id, tx_hash = %tx_hash, "event has no order correlation");
            return self.events.mark_processed(event).await;
        };

        let verified = self
            .provider
            .verify(VerifyPayment {
                tx_hash: tx_hash.clone(),
                order_id: order_id.clone(),
                expected_amount: amount.clone(),
                expected_destination_address: destination.clone(),
            })
            .await?;

        self.transactions
            .upsert_by_tx_hash(TransactionUpsert {
                order_id: Some(order_id),
                destination_address: Some(destination),
                memo: event.memo.clone(),
                amount: normalize_amount(&amount).ok(),
                status: verified.status.as_transaction_status(),
                ledger: verified.ledger,
                ..TransactionUpsert::new(event.provider.clone(), tx_hash.clone())
            })
            .await?;

        if !verified.confirmed {
            return Err(AppError::Provider(ProviderError::NotConfirmed));
        }

        info!(event_id = %event.event_id, tx_hash = %tx_hash, "✅ payment confirmed");
        self.events.mark_processed(event).await
    }

    async fn reject(&self, event: &mut PaymentEvent, cause: ProviderError) {
        warn!(event_id = %event.event_id, "payment event rejected: {}", cause);

        if let Err(e) = self.events.mark_rejected(event, cause.to_string()).await {
            error!(event_id = %event.event_id, "could not record event rejection: {}", e);
        }
    }

    async fn schedule_retry(&self, event: &mut PaymentEvent, cause: AppError) {
        let delay = backoff_delay(
            event.retries + 1,
            self.settings.retry_base_ms,
            self.settings.retry_max_ms,
        );
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        warn!(
            event_id = %event.event_id,
            retries = event.retries + 1,
            retry_in_ms = delay.as_millis() as u64,
            "payment event verification failed: {}",
            cause
        );

        if let Err(e) = self
            .events
            .mark_failed(event, cause.to_string(), next_attempt_at)
            .await
        {
            error!(event_id = %event.event_id, "could not record event failure: {}", e);
        }
    }
}

#[async_trait]
impl PeriodicTask for EventProcessor {
    fn name(&self) -> &'static str {
        "payment event processor"
    }

    async fn tick(&self) {
        let Some(_permit) = self.guard.try_acquire() else {
            debug!("payment event processor still running, tick skipped");
            return;
        };

        match self.process_pending().await {
            Ok(summary) if summary.processed + summary.failed > 0 => info!(
                processed = summary.processed,
                failed = summary.failed,
                "🔄 payment event batch processed"
            ),
            Ok(_) => {}
            Err(e) => error!("❌ payment event processing batch failed: {}", e),
        }
    }
}
