//! Scripted provider and stream fakes for worker and handler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::providers::registry::ProviderKind;
use crate::providers::traits::*;

/// What the fake ledger knows about a transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    /// Successful and pays the order
    Confirmed,
    /// Successful on the ledger but no payment operation matches the order
    Unmatched,
    /// Failed on the ledger
    Failed,
    /// Not indexed yet
    Missing,
    /// Provider unreachable
    Down,
}

pub struct FakeProvider {
    ledger: Mutex<HashMap<String, Ledger>>,
    verify_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(HashMap::new()),
            verify_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, tx_hash: &str, state: Ledger) {
        self.ledger.lock().insert(tx_hash.to_string(), state);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, tx_hash: &str) -> Ledger {
        self.ledger.lock().get(tx_hash).copied().unwrap_or(Ledger::Missing)
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn id(&self) -> ProviderKind {
        ProviderKind::Stellar
    }

    async fn create_intent(&self, input: CreatePaymentIntent) -> ProviderResult<PaymentIntent> {
        let destination_address = input
            .destination_address
            .ok_or_else(|| ProviderError::InvalidInput("destination required".into()))?;
        Ok(PaymentIntent {
            provider: self.id(),
            reference: format!("stellar-{}-1", input.order_id),
            amount: format_amount(&input.amount)?,
            currency: input.currency,
            destination_address,
            memo: Some(input.order_id),
        })
    }

    async fn submit(&self, input: SubmitPayment) -> ProviderResult<SubmittedPayment> {
        if input.signed_payload == "rejected" {
            return Ok(SubmittedPayment {
                provider: self.id(),
                tx_hash: "tx-rejected".into(),
                status: PaymentStatus::Failed,
                failure_reason: Some("tx_bad_seq".into()),
            });
        }
        Ok(SubmittedPayment {
            provider: self.id(),
            tx_hash: format!("tx-{}", input.signed_payload),
            status: PaymentStatus::Submitted,
            failure_reason: None,
        })
    }

    async fn verify(&self, input: VerifyPayment) -> ProviderResult<VerifiedPayment> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        normalize_amount(&input.expected_amount)?;

        let confirmed = match self.lookup(&input.tx_hash) {
            Ledger::Confirmed => true,
            Ledger::Unmatched | Ledger::Failed => false,
            Ledger::Missing => return Err(ProviderError::NotFound(input.tx_hash)),
            Ledger::Down => return Err(ProviderError::Unavailable("horizon down".into())),
        };

        Ok(VerifiedPayment {
            provider: self.id(),
            tx_hash: input.tx_hash,
            status: if confirmed { PaymentStatus::Confirmed } else { PaymentStatus::Failed },
            confirmed,
            ledger: Some("100".into()),
        })
    }

    async fn get_status(&self, tx_hash: &str) -> ProviderResult<PaymentStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        match self.lookup(tx_hash) {
            Ledger::Confirmed | Ledger::Unmatched => Ok(PaymentStatus::Confirmed),
            Ledger::Failed => Ok(PaymentStatus::Failed),
            Ledger::Missing => Ok(PaymentStatus::Pending),
            Ledger::Down => Err(ProviderError::Unavailable("horizon down".into())),
        }
    }
}

/// Stream that serves queued pages, then empty pages
pub struct FakeStream {
    pages: Mutex<VecDeque<ProviderResult<Vec<StreamRecord>>>>,
    requests: Mutex<Vec<(String, usize)>>,
    delay: Option<Duration>,
}

impl FakeStream {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::new() }
    }

    pub fn push_page(&self, page: Vec<StreamRecord>) {
        self.pages.lock().push_back(Ok(page));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.pages.lock().push_back(Err(error));
    }

    /// `(cursor, limit)` of every fetch so far
    pub fn requests(&self) -> Vec<(String, usize)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PaymentStream for FakeStream {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Stellar
    }

    fn stream_key(&self) -> String {
        "account:GDEST".to_string()
    }

    async fn fetch_page(&self, cursor: &str, limit: usize) -> ProviderResult<Vec<StreamRecord>> {
        self.requests.lock().push((cursor.to_string(), limit));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A complete payment record into `account:GDEST`
pub fn record(paging_token: &str, tx_hash: &str) -> StreamRecord {
    StreamRecord {
        paging_token: Some(paging_token.to_string()),
        transaction_hash: Some(tx_hash.to_string()),
        destination_address: Some("GDEST".to_string()),
        amount: Some("10.0000000".to_string()),
        memo: Some("order-1".to_string()),
        payload: serde_json::json!({ "paging_token": paging_token, "transaction_hash": tx_hash }),
    }
}
