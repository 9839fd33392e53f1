use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Type, prelude::FromRow};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of an observed provider notification.
///
/// `Failed` means "retry pending": the processor picks failed events up again
/// once `next_attempt_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentEventStatus {
    Received,
    Processing,
    Processed,
    Failed,
}

impl PaymentEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventStatus::Received => "received",
            PaymentEventStatus::Processing => "processing",
            PaymentEventStatus::Processed => "processed",
            PaymentEventStatus::Failed => "failed",
        }
    }

    /// Statuses the processor drains. A `processing` event is only due once
    /// its lease (`next_attempt_at`) has run out, i.e. its tick was abandoned.
    pub fn is_due_candidate(&self) -> bool {
        matches!(
            self,
            PaymentEventStatus::Received | PaymentEventStatus::Failed | PaymentEventStatus::Processing
        )
    }
}

impl fmt::Display for PaymentEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a ledger transaction as far as this service knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Submitted,
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Submitted => "submitted",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Statuses the reconciler re-checks against the ledger
    pub fn is_uncertain(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Submitted)
    }

    /// Monotonic merge of a stored status with a freshly observed one.
    ///
    /// INVARIANTS:
    /// - `Confirmed` is absorbing
    /// - an incoming `Confirmed` always wins
    /// - `Failed` sticks against anything but `Confirmed`
    pub fn merge(self, incoming: TransactionStatus) -> TransactionStatus {
        match (self, incoming) {
            (TransactionStatus::Confirmed, _) => TransactionStatus::Confirmed,
            (_, TransactionStatus::Confirmed) => TransactionStatus::Confirmed,
            (TransactionStatus::Failed, _) => TransactionStatus::Failed,
            (_, incoming) => incoming,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single notification observed from a provider (webhook push or stream pull).
///
/// Identity is `(provider, event_id)`. Events are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub tx_hash: Option<String>,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<String>,
    pub memo: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub status: PaymentEventStatus,
    pub retries: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// Order correlation id: explicit order id, falling back to the memo
    pub fn correlation_id(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .or(self.memo.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_due_candidate()
            && self.next_attempt_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Fields accepted by the ingestion gateway
#[derive(Debug, Clone, Default)]
pub struct NewPaymentEvent {
    pub provider: String,
    pub event_id: String,
    pub tx_hash: Option<String>,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<String>,
    pub memo: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl NewPaymentEvent {
    pub fn new(provider: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            event_id: event_id.into(),
            ..Default::default()
        }
    }

    /// Materialize a fresh `received` event, due immediately
    pub fn into_event(self, now: DateTime<Utc>) -> PaymentEvent {
        PaymentEvent {
            id: Uuid::new_v4(),
            provider: self.provider,
            event_id: self.event_id,
            tx_hash: self.tx_hash,
            order_id: self.order_id,
            destination_address: self.destination_address,
            amount: self.amount,
            memo: self.memo,
            payload: self.payload,
            status: PaymentEventStatus::Received,
            retries: 0,
            next_attempt_at: Some(now),
            last_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Canonical record of a ledger transaction tied to an order.
///
/// Identity is `tx_hash`. Status changes go through `TransactionStatus::merge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub provider: String,
    pub tx_hash: String,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub asset: Option<String>,
    pub memo: Option<String>,
    pub amount: Option<Decimal>,
    pub status: TransactionStatus,
    pub ledger: Option<String>,
    pub retries: i32,
    pub failure_reason: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Observation to fold into a stored transaction.
///
/// Absent fields keep whatever is already stored.
#[derive(Debug, Clone)]
pub struct TransactionUpsert {
    pub provider: String,
    pub tx_hash: String,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub asset: Option<String>,
    pub memo: Option<String>,
    pub amount: Option<Decimal>,
    pub status: Option<TransactionStatus>,
    pub ledger: Option<String>,
    pub failure_reason: Option<String>,
    pub increment_retries: bool,
}

impl TransactionUpsert {
    pub fn new(provider: impl Into<String>, tx_hash: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            tx_hash: tx_hash.into(),
            order_id: None,
            destination_address: None,
            asset: None,
            memo: None,
            amount: None,
            status: None,
            ledger: None,
            failure_reason: None,
            increment_retries: false,
        }
    }

    /// Carry over the descriptive fields of a stored transaction
    pub fn from_existing(tx: &PaymentTransaction) -> Self {
        Self {
            order_id: tx.order_id.clone(),
            destination_address: tx.destination_address.clone(),
            asset: tx.asset.clone(),
            memo: tx.memo.clone(),
            amount: tx.amount,
            ledger: tx.ledger.clone(),
            ..Self::new(tx.provider.clone(), tx.tx_hash.clone())
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// First sighting. A missing status defaults to `pending`.
    pub fn into_transaction(self, now: DateTime<Utc>) -> PaymentTransaction {
        PaymentTransaction {
            id: Uuid::new_v4(),
            provider: self.provider,
            tx_hash: self.tx_hash,
            order_id: self.order_id,
            destination_address: self.destination_address,
            asset: self.asset,
            memo: self.memo,
            amount: self.amount,
            status: self.status.unwrap_or(TransactionStatus::Pending),
            ledger: self.ledger,
            retries: if self.increment_retries { 1 } else { 0 },
            failure_reason: self.failure_reason,
            last_checked_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold this observation into a stored record
    pub fn apply_to(self, existing: &mut PaymentTransaction, now: DateTime<Utc>) {
        existing.provider = self.provider;
        if self.order_id.is_some() {
            existing.order_id = self.order_id;
        }
        if self.destination_address.is_some() {
            existing.destination_address = self.destination_address;
        }
        if self.asset.is_some() {
            existing.asset = self.asset;
        }
        if self.memo.is_some() {
            existing.memo = self.memo;
        }
        if self.amount.is_some() {
            existing.amount = self.amount;
        }
        if let Some(incoming) = self.status {
            existing.status = existing.status.merge(incoming);
        }
        if self.ledger.is_some() {
            existing.ledger = self.ledger;
        }
        if self.failure_reason.is_some() {
            existing.failure_reason = self.failure_reason;
        }
        if self.increment_retries {
            existing.retries += 1;
        }
        existing.last_checked_at = Some(now);
        existing.updated_at = now;
    }
}

/// Watermark of the last externally observed position in a provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StreamCursor {
    pub id: Uuid,
    pub provider: String,
    pub stream_key: String,
    pub cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
