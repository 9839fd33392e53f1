use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ProviderError, ProviderResult};
use crate::payments::models::TransactionStatus;
use crate::providers::registry::ProviderKind;

/// Fixed decimal precision used when comparing ledger amounts (Stellar uses 7)
pub const AMOUNT_SCALE: u32 = 7;

/// Status vocabulary spoken by provider adapters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Submitted,
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    /// `Created` has no stored counterpart; an intent is not a transaction yet
    pub fn as_transaction_status(&self) -> Option<TransactionStatus> {
        match self {
            PaymentStatus::Created => None,
            PaymentStatus::Submitted => Some(TransactionStatus::Submitted),
            PaymentStatus::Pending => Some(TransactionStatus::Pending),
            PaymentStatus::Confirmed => Some(TransactionStatus::Confirmed),
            PaymentStatus::Failed => Some(TransactionStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntent {
    pub order_id: String,
    pub amount: String,
    pub currency: String,
    pub destination_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub provider: ProviderKind,
    pub reference: String,
    pub amount: String,
    pub currency: String,
    pub destination_address: String,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayment {
    pub signed_payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedPayment {
    pub provider: ProviderKind,
    pub tx_hash: String,
    pub status: PaymentStatus,
    /// Ledger result codes when the broadcast was rejected
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPayment {
    pub tx_hash: String,
    pub order_id: String,
    pub expected_amount: String,
    pub expected_destination_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub provider: ProviderKind,
    pub tx_hash: String,
    /// `Confirmed` only when `confirmed` holds; a final ledger transaction that
    /// does not pay the order is reported as `Failed`
    pub status: PaymentStatus,
    pub confirmed: bool,
    pub ledger: Option<String>,
}

/// One record of a provider's ordered payment stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub paging_token: Option<String>,
    pub transaction_hash: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<String>,
    pub memo: Option<String>,
    pub payload: serde_json::Value,
}

/// Ledger provider adapter.
///
/// Exactly one implementation is active per process, chosen at startup.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn id(&self) -> ProviderKind;

    async fn create_intent(&self, input: CreatePaymentIntent) -> ProviderResult<PaymentIntent>;

    /// A broadcast rejected by the ledger comes back as `PaymentStatus::Failed`,
    /// not as an error, so the attempt can still be persisted.
    async fn submit(&self, input: SubmitPayment) -> ProviderResult<SubmittedPayment>;

    async fn verify(&self, input: VerifyPayment) -> ProviderResult<VerifiedPayment>;

    /// `Pending` when the ledger does not know the hash yet; transport failures
    /// propagate.
    async fn get_status(&self, tx_hash: &str) -> ProviderResult<PaymentStatus>;
}

/// Cursor-addressable, ascending stream of payments into the watched account
#[async_trait]
pub trait PaymentStream: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn stream_key(&self) -> String;

    /// Deterministic event id for a record, stable across re-fetches
    fn event_id(&self, paging_token: &str) -> String {
        format!("{}:{}", self.provider().as_str(), paging_token)
    }

    async fn fetch_page(&self, cursor: &str, limit: usize) -> ProviderResult<Vec<StreamRecord>>;
}

/// Parse and normalize an amount to `AMOUNT_SCALE` decimal places.
///
/// Accepts plain and scientific notation; rejects non-numeric and non-positive input.
pub fn normalize_amount(raw: &str) -> ProviderResult<Decimal> {
    let trimmed = raw.trim();
    let parsed = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ProviderError::InvalidInput(format!("Invalid amount: {}", raw)))?;

    if parsed <= Decimal::ZERO {
        return Err(ProviderError::InvalidInput(format!("Invalid amount: {}", raw)));
    }

    let mut normalized =
        parsed.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    normalized.rescale(AMOUNT_SCALE);
    Ok(normalized)
}

/// Normalized amount rendered with exactly `AMOUNT_SCALE` decimals
pub fn format_amount(raw: &str) -> ProviderResult<String> {
    normalize_amount(raw).map(|amount| amount.to_string())
}

/// Amount equality after normalization; unparsable operands never match
pub fn amounts_match(left: &str, right: &str) -> bool {
    match (normalize_amount(left), normalize_amount(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
