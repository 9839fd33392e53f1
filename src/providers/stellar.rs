use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, AppResult, ProviderError, ProviderResult};
use crate::providers::registry::ProviderKind;
use crate::providers::traits::*;

/// Horizon caps `limit` on collection endpoints
const HORIZON_MAX_PAGE_SIZE: usize = 200;

// ========== HORIZON CLIENT ==========

/// Thin JSON client over a Horizon base URL
#[derive(Clone)]
pub struct Horizon {
    client: Client,
    base_url: Url,
}

impl Horizon {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            AppError::Config(format!("Invalid STELLAR_HORIZON_URL '{}': {}", base_url, e))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Invalid STELLAR_HORIZON_URL '{}'",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build Horizon client: {}", e)))?;

        Ok(Self { client, base_url: parsed })
    }

    /// Base URL with `segments` appended, each percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ProviderResult<T> {
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        read_json(response).await
    }
}

fn unreachable(error: reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(format!("Stellar Horizon is unreachable: {}", error))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message: detail(&body),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

fn detail(body: &Value) -> String {
    body.get("detail")
        .and_then(Value::as_str)
        .unwrap_or("Stellar Horizon request failed")
        .to_string()
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

// ========== HORIZON RESOURCES ==========

#[derive(Debug, Deserialize)]
struct HorizonTransaction {
    hash: String,
    successful: bool,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    ledger: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HorizonSubmitted {
    hash: String,
    successful: bool,
}

#[derive(Debug, Deserialize)]
struct HorizonOperation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    amount: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct HorizonPage<T> {
    #[serde(rename = "_embedded", default)]
    embedded: Option<Embedded<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Embedded<T> {
    #[serde(default)]
    records: Vec<T>,
}

impl<T> HorizonPage<T> {
    fn into_records(self) -> Vec<T> {
        self.embedded.map(|e| e.records).unwrap_or_default()
    }
}

// ========== PROVIDER ==========

pub struct StellarPaymentProvider {
    horizon: Horizon,
    default_destination: Option<String>,
}

impl StellarPaymentProvider {
    pub fn new(horizon: Horizon, default_destination: Option<String>) -> Self {
        Self { horizon, default_destination }
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> ProviderResult<HorizonTransaction> {
        self.horizon
            .get_json(self.horizon.url(&["transactions", tx_hash]))
            .await
            .map_err(|error| match error {
                ProviderError::Http { status: 404, .. } => ProviderError::NotFound(tx_hash.to_string()),
                other => other,
            })
    }
}

fn require(value: &str, name: &str) -> ProviderResult<()> {
    if value.trim().is_empty() {
        return Err(ProviderError::InvalidInput(format!("{} is required", name)));
    }
    Ok(())
}

#[async_trait]
impl PaymentProvider for StellarPaymentProvider {
    fn id(&self) -> ProviderKind {
        ProviderKind::Stellar
    }

    async fn create_intent(&self, input: CreatePaymentIntent) -> ProviderResult<PaymentIntent> {
        require(&input.order_id, "orderId")?;

        let destination_address = input
            .destination_address
            .filter(|address| !address.trim().is_empty())
            .or_else(|| self.default_destination.clone())
            .ok_or_else(|| {
                ProviderError::InvalidInput(
                    "Missing Stellar destination address in request and STELLAR_DESTINATION_ADDRESS"
                        .to_string(),
                )
            })?;

        Ok(PaymentIntent {
            provider: self.id(),
            reference: format!("stellar-{}-{}", input.order_id, Utc::now().timestamp_millis()),
            amount: format_amount(&input.amount)?,
            currency: input.currency,
            destination_address,
            memo: Some(input.order_id),
        })
    }

    #[instrument(skip(self, input))]
    async fn submit(&self, input: SubmitPayment) -> ProviderResult<SubmittedPayment> {
        require(&input.signed_payload, "signedPayload")?;

        let response = self
            .horizon
            .client
            .post(self.horizon.url(&["transactions"]))
            .form(&[("tx", input.signed_payload.as_str())])
            .send()
            .await
            .map_err(unreachable)?;

        if response.status().is_success() {
            let submitted: HorizonSubmitted = read_json(response).await?;
            return Ok(SubmittedPayment {
                provider: self.id(),
                tx_hash: submitted.hash,
                status: if submitted.successful {
                    PaymentStatus::Submitted
                } else {
                    PaymentStatus::Failed
                },
                failure_reason: None,
            });
        }

        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        // A 400 carrying the envelope hash is a ledger-level rejection of a
        // well-formed transaction; the attempt is still recordable.
        if status == 400 {
            if let Some(tx_hash) = text(&body, "/extras/hash") {
                let failure_reason = body
                    .pointer("/extras/result_codes")
                    .map(Value::to_string)
                    .unwrap_or_else(|| detail(&body));
                warn!(tx_hash = %tx_hash, reason = %failure_reason, "Stellar rejected submitted transaction");
                return Ok(SubmittedPayment {
                    provider: self.id(),
                    tx_hash,
                    status: PaymentStatus::Failed,
                    failure_reason: Some(failure_reason),
                });
            }
            return Err(ProviderError::Rejected(detail(&body)));
        }

        Err(ProviderError::Http { status, message: detail(&body) })
    }

    #[instrument(skip(self, input), fields(tx_hash = %input.tx_hash, order_id = %input.order_id))]
    async fn verify(&self, input: VerifyPayment) -> ProviderResult<VerifiedPayment> {
        require(&input.tx_hash, "txHash")?;
        let expected_amount = normalize_amount(&input.expected_amount)?;

        let tx = self.fetch_transaction(&input.tx_hash).await?;
        let operations: HorizonPage<HorizonOperation> = {
            let mut url = self.horizon.url(&["transactions", input.tx_hash.as_str(), "operations"]);
            url.query_pairs_mut()
                .append_pair("limit", &HORIZON_MAX_PAGE_SIZE.to_string());
            self.horizon.get_json(url).await?
        };

        let payment_matches = operations.into_records().iter().any(|op| {
            op.kind == "payment"
                && op.to.as_deref() == Some(input.expected_destination_address.as_str())
                && op
                    .amount
                    .as_deref()
                    .and_then(|amount| normalize_amount(amount).ok())
                    .map_or(false, |amount| amount == expected_amount)
        });
        let memo_matches = tx.memo.as_deref().unwrap_or_default() == input.order_id;
        let confirmed = tx.successful && memo_matches && payment_matches;

        debug!(
            successful = tx.successful,
            memo_matches,
            payment_matches,
            "Stellar transaction verified"
        );

        Ok(VerifiedPayment {
            provider: self.id(),
            tx_hash: tx.hash,
            status: if confirmed {
                PaymentStatus::Confirmed
            } else {
                PaymentStatus::Failed
            },
            confirmed,
            ledger: tx.ledger.map(|ledger| ledger.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn get_status(&self, tx_hash: &str) -> ProviderResult<PaymentStatus> {
        require(tx_hash, "txHash")?;

        match self.fetch_transaction(tx_hash).await {
            Ok(tx) if tx.successful => Ok(PaymentStatus::Confirmed),
            Ok(_) => Ok(PaymentStatus::Failed),
            // Horizon indexes a few ledgers behind submission
            Err(error) if error.is_not_found() => Ok(PaymentStatus::Pending),
            Err(error) => Err(error),
        }
    }
}

// ========== PAYMENTS STREAM ==========

/// Ascending `/accounts/{destination}/payments` feed
pub struct StellarPaymentStream {
    horizon: Horizon,
    destination_address: String,
}

impl StellarPaymentStream {
    pub fn new(horizon: Horizon, destination_address: String) -> Self {
        Self { horizon, destination_address }
    }
}

fn stream_record(record: Value) -> StreamRecord {
    StreamRecord {
        paging_token: text(&record, "/paging_token"),
        transaction_hash: text(&record, "/transaction_hash"),
        destination_address: text(&record, "/to"),
        amount: text(&record, "/amount"),
        // Payment operations carry no memo; it comes from the joined parent transaction
        memo: text(&record, "/memo").or_else(|| text(&record, "/transaction/memo")),
        payload: record,
    }
}

#[async_trait]
impl PaymentStream for StellarPaymentStream {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Stellar
    }

    fn stream_key(&self) -> String {
        format!("account:{}", self.destination_address)
    }

    async fn fetch_page(&self, cursor: &str, limit: usize) -> ProviderResult<Vec<StreamRecord>> {
        let mut url = self
            .horizon
            .url(&["accounts", self.destination_address.as_str(), "payments"]);
        url.query_pairs_mut()
            .append_pair("order", "asc")
            .append_pair("limit", &limit.clamp(1, HORIZON_MAX_PAGE_SIZE).to_string())
            .append_pair("cursor", cursor)
            .append_pair("join", "transactions");

        let page: HorizonPage<Value> = self.horizon.get_json(url).await?;
        Ok(page.into_records().into_iter().map(stream_record).collect())
    }
}
