use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LoopSettings;
use crate::error::AppResult;
use crate::payments::models::NewPaymentEvent;
use crate::payments::{PaymentEvents, StreamCursors};
use crate::providers::PaymentStream;
use crate::workers::guard::SingleFlight;
use crate::workers::scheduler::PeriodicTask;

/// What one poll did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub skipped: usize,
    /// New cursor, when it moved
    pub advanced_to: Option<String>,
}

/// Cursor-tracked poller that turns a provider payment stream into events
pub struct PaymentListener {
    stream: Arc<dyn PaymentStream>,
    events: Arc<PaymentEvents>,
    cursors: Arc<StreamCursors>,
    start_cursor: String,
    batch_size: usize,
    guard: SingleFlight,
}

impl PaymentListener {
    pub fn new(
        stream: Arc<dyn PaymentStream>,
        events: Arc<PaymentEvents>,
        cursors: Arc<StreamCursors>,
        start_cursor: String,
        settings: LoopSettings,
    ) -> Self {
        Self {
            stream,
            events,
            cursors,
            start_cursor,
            batch_size: settings.batch_size as usize,
            guard: SingleFlight::new(),
        }
    }

    /// Fetch one page from the stored cursor and ingest it.
    ///
    /// The cursor is written once, after every record of the page is ingested.
    /// Any error leaves it where it was so the page is replayed next time.
    pub async fn poll_once(&self) -> AppResult<PollSummary> {
        let provider = self.stream.provider();
        let stream_key = self.stream.stream_key();

        let current = self
            .cursors
            .get_cursor(provider.as_str(), &stream_key)
            .await?
            .unwrap_or_else(|| self.start_cursor.clone());

        let records = self.stream.fetch_page(&current, self.batch_size).await?;
        let mut summary = PollSummary { fetched: records.len(), ..Default::default() };
        let mut latest = current.clone();

        for record in records {
            let Some(paging_token) = record.paging_token else {
                summary.skipped += 1;
                continue;
            };

            match record.transaction_hash {
                Some(tx_hash) => {
                    let enqueued = self
                        .events
                        .enqueue(NewPaymentEvent {
                            tx_hash: Some(tx_hash),
                            destination_address: record.destination_address,
                            amount: record.amount,
                            memo: record.memo,
                            payload: Some(record.payload),
                            ..NewPaymentEvent::new(provider.as_str(), self.stream.event_id(&paging_token))
                        })
                        .await?;

                    if enqueued.created {
                        summary.ingested += 1;
                    } else {
                        summary.duplicates += 1;
                    }
                }
                None => summary.skipped += 1,
            }

            latest = paging_token;
        }

        if latest != current {
            self.cursors
                .upsert_cursor(provider.as_str(), &stream_key, &latest)
                .await?;
            summary.advanced_to = Some(latest);
        }

        Ok(summary)
    }
}

#[async_trait]
impl PeriodicTask for PaymentListener {
    fn name(&self) -> &'static str {
        "payment listener"
    }

    async fn tick(&self) {
        let Some(_permit) = self.guard.try_acquire() else {
            debug!("payment listener still running, tick skipped");
            return;
        };

        match self.poll_once().await {
            Ok(summary) if summary.fetched > 0 => info!(
                stream_key = %self.stream.stream_key(),
                fetched = summary.fetched,
                ingested = summary.ingested,
                duplicates = summary.duplicates,
                cursor = summary.advanced_to.as_deref().unwrap_or("-"),
                "📥 payment stream polled"
            ),
            Ok(_) => debug!(stream_key = %self.stream.stream_key(), "payment stream idle"),
            Err(e) => warn!(
                stream_key = %self.stream.stream_key(),
                "payment listener poll failed: {}",
                e
            ),
        }
    }
}
