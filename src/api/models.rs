use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::payments::models::{NewPaymentEvent, PaymentTransaction, TransactionStatus};
use crate::providers::traits::{CreatePaymentIntent, PaymentStatus};
use crate::providers::ProviderKind;

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

// ========== REQUEST MODELS ==========

/// Push notification from a Stellar watcher
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StellarWebhookPayload {
    /// Missing and blank ids are both rejected
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "eventId is required"))]
    pub event_id: String,
    pub tx_hash: Option<String>,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<String>,
    pub memo: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl StellarWebhookPayload {
    pub fn into_event(self) -> NewPaymentEvent {
        NewPaymentEvent {
            tx_hash: self.tx_hash,
            order_id: self.order_id,
            destination_address: self.destination_address,
            amount: self.amount,
            memo: self.memo,
            payload: self.payload,
            ..NewPaymentEvent::new(ProviderKind::Stellar.as_str(), self.event_id)
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    #[validate(custom(function = "not_blank", message = "orderId is required"))]
    pub order_id: String,
    #[validate(custom(function = "not_blank", message = "amount is required"))]
    pub amount: String,
    #[validate(length(min = 1, max = 12, message = "currency must be 1-12 characters"))]
    pub currency: String,
    pub destination_address: Option<String>,
}

impl From<CreateIntentRequest> for CreatePaymentIntent {
    fn from(request: CreateIntentRequest) -> Self {
        CreatePaymentIntent {
            order_id: request.order_id,
            amount: request.amount,
            currency: request.currency,
            destination_address: request.destination_address,
        }
    }
}

/// Signed envelope to broadcast, with the order context the attempt is stored under
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentRequest {
    #[validate(custom(function = "not_blank", message = "signedPayload is required"))]
    pub signed_payload: String,
    pub order_id: Option<String>,
    pub amount: Option<String>,
    pub destination_address: Option<String>,
    pub asset: Option<String>,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAcceptedResponse {
    pub accepted: bool,
    pub duplicate: bool,
    pub event_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub provider: String,
    pub tx_hash: String,
    pub order_id: Option<String>,
    pub destination_address: Option<String>,
    pub asset: Option<String>,
    pub memo: Option<String>,
    /// Fixed 7-decimal string
    pub amount: Option<String>,
    pub status: TransactionStatus,
    pub ledger: Option<String>,
    pub retries: i32,
    pub failure_reason: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentTransaction> for TransactionResponse {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            provider: tx.provider,
            tx_hash: tx.tx_hash,
            order_id: tx.order_id,
            destination_address: tx.destination_address,
            asset: tx.asset,
            memo: tx.memo,
            amount: tx.amount.map(|amount| amount.to_string()),
            status: tx.status,
            ledger: tx.ledger,
            retries: tx.retries,
            failure_reason: tx.failure_reason,
            last_checked_at: tx.last_checked_at,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentResponse {
    pub provider: ProviderKind,
    pub tx_hash: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub transaction: TransactionResponse,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub provider: ProviderKind,
    pub background_sync: bool,
    pub timestamp: DateTime<Utc>,
}
