use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
#[cfg(test)]
use std::collections::HashSet;
use uuid::Uuid;

use super::models::*;
use super::store::StatusStore;
use crate::error::{AppError, AppResult};

type EventKey = (String, String);
type CursorKey = (String, String);

#[derive(Default)]
struct Tables {
    events: HashMap<EventKey, (u64, PaymentEvent)>,
    transactions: HashMap<String, (u64, PaymentTransaction)>,
    cursors: HashMap<CursorKey, StreamCursor>,
    /// Insertion counter, breaks ties between equal timestamps
    sequence: u64,
    #[cfg(test)]
    poisoned_events: HashSet<String>,
    #[cfg(test)]
    cursor_writes: usize,
}

impl Tables {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// Process-local `StatusStore` with the same uniqueness guarantees as the
/// PostgreSQL schema. Used for local runs without `DATABASE_URL` and in tests.
#[derive(Default)]
pub struct InMemoryStatusStore {
    tables: Mutex<Tables>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn event_count(&self) -> usize {
        self.tables.lock().events.len()
    }

    /// Make every insert of `event_id` fail with a database-style error
    #[cfg(test)]
    pub fn poison_event(&self, event_id: &str) {
        self.tables.lock().poisoned_events.insert(event_id.to_string());
    }

    #[cfg(test)]
    pub fn cursor_writes(&self) -> usize {
        self.tables.lock().cursor_writes
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    // ========== EVENT OPERATIONS ==========

    async fn find_event(&self, provider: &str, event_id: &str) -> AppResult<Option<PaymentEvent>> {
        let tables = self.tables.lock();
        Ok(tables
            .events
            .get(&(provider.to_string(), event_id.to_string()))
            .map(|(_, event)| event.clone()))
    }

    async fn insert_event(&self, event: &PaymentEvent) -> AppResult<Option<PaymentEvent>> {
        let mut tables = self.tables.lock();

        #[cfg(test)]
        if tables.poisoned_events.contains(&event.event_id) {
            return Err(AppError::Internal(format!(
                "insert rejected for {}",
                event.event_id
            )));
        }

        let key = (event.provider.clone(), event.event_id.clone());
        if tables.events.contains_key(&key) {
            return Ok(None);
        }

        let sequence = tables.next_sequence();
        tables.events.insert(key, (sequence, event.clone()));
        Ok(Some(event.clone()))
    }

    async fn find_due_events(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<PaymentEvent>> {
        let tables = self.tables.lock();
        let mut due: Vec<&(u64, PaymentEvent)> = tables
            .events
            .values()
            .filter(|(_, event)| event.is_due(now))
            .collect();

        due.sort_by(|(seq_a, a), (seq_b, b)| {
            a.created_at.cmp(&b.created_at).then(seq_a.cmp(seq_b))
        });

        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn save_event(&self, event: &PaymentEvent) -> AppResult<PaymentEvent> {
        let mut tables = self.tables.lock();
        let key = (event.provider.clone(), event.event_id.clone());

        match tables.events.get_mut(&key) {
            Some((_, stored)) if stored.id == event.id => {
                *stored = event.clone();
                stored.updated_at = Utc::now();
                Ok(stored.clone())
            }
            Some(_) => Err(AppError::Conflict(format!(
                "event {}/{} is owned by another record",
                event.provider, event.event_id
            ))),
            None => Err(AppError::NotFound(format!(
                "event {}/{}",
                event.provider, event.event_id
            ))),
        }
    }

    // ========== TRANSACTION OPERATIONS ==========

    async fn find_transaction(&self, tx_hash: &str) -> AppResult<Option<PaymentTransaction>> {
        let tables = self.tables.lock();
        Ok(tables.transactions.get(tx_hash).map(|(_, tx)| tx.clone()))
    }

    async fn insert_transaction(
        &self,
        tx: &PaymentTransaction,
    ) -> AppResult<Option<PaymentTransaction>> {
        let mut tables = self.tables.lock();
        if tables.transactions.contains_key(&tx.tx_hash) {
            return Ok(None);
        }

        let sequence = tables.next_sequence();
        tables
            .transactions
            .insert(tx.tx_hash.clone(), (sequence, tx.clone()));
        Ok(Some(tx.clone()))
    }

    async fn save_transaction(&self, tx: &PaymentTransaction) -> AppResult<PaymentTransaction> {
        let mut tables = self.tables.lock();
        match tables.transactions.get_mut(&tx.tx_hash) {
            Some((_, stored)) if stored.id == tx.id => {
                // Merge against the row as it is now, not as the caller read it
                let status = stored.status.merge(tx.status);
                *stored = tx.clone();
                stored.status = status;
                Ok(stored.clone())
            }
            Some(_) => Err(AppError::Conflict(format!(
                "transaction {} is owned by another record",
                tx.tx_hash
            ))),
            None => Err(AppError::NotFound(format!("transaction {}", tx.tx_hash))),
        }
    }

    async fn find_reconciliation_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<PaymentTransaction>> {
        let tables = self.tables.lock();
        let mut candidates: Vec<&(u64, PaymentTransaction)> = tables
            .transactions
            .values()
            .filter(|(_, tx)| {
                tx.status.is_uncertain()
                    && tx.last_checked_at.map(|at| at <= stale_before).unwrap_or(true)
            })
            .collect();

        // Never-checked first, then least recently checked
        candidates.sort_by(|(seq_a, a), (seq_b, b)| {
            a.last_checked_at
                .cmp(&b.last_checked_at)
                .then(a.updated_at.cmp(&b.updated_at))
                .then(seq_a.cmp(seq_b))
        });

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|(_, tx)| tx.clone())
            .collect())
    }

    async fn find_transactions_by_order(&self, order_id: &str) -> AppResult<Vec<PaymentTransaction>> {
        let tables = self.tables.lock();
        let mut matching: Vec<&(u64, PaymentTransaction)> = tables
            .transactions
            .values()
            .filter(|(_, tx)| tx.order_id.as_deref() == Some(order_id))
            .collect();

        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        Ok(matching.into_iter().map(|(_, tx)| tx.clone()).collect())
    }

    // ========== CURSOR OPERATIONS ==========

    async fn find_cursor(&self, provider: &str, stream_key: &str) -> AppResult<Option<StreamCursor>> {
        let tables = self.tables.lock();
        Ok(tables
            .cursors
            .get(&(provider.to_string(), stream_key.to_string()))
            .cloned())
    }

    async fn upsert_cursor(
        &self,
        provider: &str,
        stream_key: &str,
        cursor: &str,
    ) -> AppResult<StreamCursor> {
        let mut tables = self.tables.lock();
        #[cfg(test)]
        {
            tables.cursor_writes += 1;
        }

        let now = Utc::now();
        let record = tables
            .cursors
            .entry((provider.to_string(), stream_key.to_string()))
            .or_insert_with(|| StreamCursor {
                id: Uuid::new_v4(),
                provider: provider.to_string(),
                stream_key: stream_key.to_string(),
                cursor: None,
                created_at: now,
                updated_at: now,
            });

        record.cursor = Some(cursor.to_string());
        record.updated_at = now;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_event_uniqueness() {
        let store = InMemoryStatusStore::new();
        let event = NewPaymentEvent::new("stellar", "stellar:1").into_event(Utc::now());

        assert!(store.insert_event(&event).await.unwrap().is_some());

        let duplicate = NewPaymentEvent::new("stellar", "stellar:1").into_event(Utc::now());
        assert!(store.insert_event(&duplicate).await.unwrap().is_none());

        // Same event id from another provider is a different event
        let other = NewPaymentEvent::new("flare", "stellar:1").into_event(Utc::now());
        assert!(store.insert_event(&other).await.unwrap().is_some());
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_due_events_are_oldest_first_and_limited() {
        let store = InMemoryStatusStore::new();
        let now = Utc::now();

        for (offset, id) in [(3, "c"), (1, "a"), (2, "b")] {
            let event = NewPaymentEvent::new("stellar", id)
                .into_event(now - Duration::seconds(10 - offset));
            store.insert_event(&event).await.unwrap();
        }

        let mut future = NewPaymentEvent::new("stellar", "later").into_event(now);
        future.next_attempt_at = Some(now + Duration::minutes(5));
        future.status = PaymentEventStatus::Failed;
        store.insert_event(&future).await.unwrap();

        let due = store.find_due_events(now, 2).await.unwrap();
        let ids: Vec<_> = due.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let all_due = store.find_due_events(now, 10).await.unwrap();
        assert_eq!(all_due.len(), 3);
    }

    #[tokio::test]
    async fn test_reconciliation_candidates() {
        let store = InMemoryStatusStore::new();
        let now = Utc::now();
        let stale_before = now - Duration::seconds(30);

        let mut never_checked = TransactionUpsert::new("stellar", "never").into_transaction(now);
        never_checked.last_checked_at = None;
        let mut stale = TransactionUpsert::new("stellar", "stale")
            .with_status(TransactionStatus::Submitted)
            .into_transaction(now);
        stale.last_checked_at = Some(now - Duration::minutes(5));
        let fresh = TransactionUpsert::new("stellar", "fresh").into_transaction(now);
        let mut confirmed = TransactionUpsert::new("stellar", "done")
            .with_status(TransactionStatus::Confirmed)
            .into_transaction(now);
        confirmed.last_checked_at = None;

        for tx in [&fresh, &stale, &confirmed, &never_checked] {
            store.insert_transaction(tx).await.unwrap();
        }

        let candidates = store
            .find_reconciliation_candidates(stale_before, 10)
            .await
            .unwrap();
        let hashes: Vec<_> = candidates.iter().map(|tx| tx.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["never", "stale"]);
    }

    #[tokio::test]
    async fn test_cursor_upsert() {
        let store = InMemoryStatusStore::new();
        assert!(store.find_cursor("stellar", "account:G1").await.unwrap().is_none());

        let first = store.upsert_cursor("stellar", "account:G1", "100").await.unwrap();
        let second = store.upsert_cursor("stellar", "account:G1", "200").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.cursor.as_deref(), Some("200"));
        assert_eq!(store.cursor_writes(), 2);
    }
}
