use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::models::*;
use super::store::StatusStore;
use crate::error::{AppError, AppResult};

/// Outcome of an `enqueue` call
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub event: PaymentEvent,
    pub created: bool,
}

/// Event ingestion gateway and the processor's state transitions.
///
/// Ingestion is idempotent on `(provider, event_id)`: a re-delivered event
/// returns the stored record untouched.
pub struct PaymentEvents {
    store: Arc<dyn StatusStore>,
}

impl PaymentEvents {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, input: NewPaymentEvent) -> AppResult<Enqueued> {
        if input.event_id.trim().is_empty() {
            return Err(AppError::Validation("eventId is required".to_string()));
        }

        if let Some(existing) = self.store.find_event(&input.provider, &input.event_id).await? {
            debug!(
                provider = %input.provider,
                event_id = %input.event_id,
                "duplicate payment event ignored"
            );
            return Ok(Enqueued { event: existing, created: false });
        }

        let provider = input.provider.clone();
        let event_id = input.event_id.clone();
        let candidate = input.into_event(Utc::now());

        match self.store.insert_event(&candidate).await? {
            Some(event) => {
                info!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    tx_hash = event.tx_hash.as_deref().unwrap_or("-"),
                    "payment event enqueued"
                );
                Ok(Enqueued { event, created: true })
            }
            // Another writer inserted the same key between our read and write
            None => {
                let existing = self
                    .store
                    .find_event(&provider, &event_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict(format!("event {}/{} vanished after conflict", provider, event_id))
                    })?;
                Ok(Enqueued { event: existing, created: false })
            }
        }
    }

    pub async fn find(&self, provider: &str, event_id: &str) -> AppResult<Option<PaymentEvent>> {
        self.store.find_event(provider, event_id).await
    }

    pub async fn find_pending(&self, limit: usize) -> AppResult<Vec<PaymentEvent>> {
        self.store.find_due_events(Utc::now(), limit).await
    }

    /// Claim the event until `lease` runs out; an abandoned claim becomes due again
    pub async fn mark_processing(&self, event: &mut PaymentEvent, lease: Duration) -> AppResult<()> {
        event.status = PaymentEventStatus::Processing;
        event.next_attempt_at = Some(Utc::now() + lease);
        *event = self.store.save_event(event).await?;
        Ok(())
    }

    pub async fn mark_processed(&self, event: &mut PaymentEvent) -> AppResult<()> {
        event.status = PaymentEventStatus::Processed;
        event.processed_at = Some(Utc::now());
        event.last_error = None;
        event.next_attempt_at = None;
        *event = self.store.save_event(event).await?;
        Ok(())
    }

    /// Close out an event whose input can never verify. Nothing is retried.
    pub async fn mark_rejected(&self, event: &mut PaymentEvent, reason: String) -> AppResult<()> {
        event.status = PaymentEventStatus::Processed;
        event.processed_at = Some(Utc::now());
        event.last_error = Some(reason);
        event.next_attempt_at = None;
        *event = self.store.save_event(event).await?;
        Ok(())
    }

    /// Schedule a retry. `failed` is retry-pending, not terminal.
    pub async fn mark_failed(
        &self,
        event: &mut PaymentEvent,
        last_error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> AppResult<()> {
        event.status = PaymentEventStatus::Failed;
        event.retries += 1;
        event.last_error = Some(last_error);
        event.next_attempt_at = Some(next_attempt_at);
        *event = self.store.save_event(event).await?;
        Ok(())
    }
}
