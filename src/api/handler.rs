use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    payments::{models::TransactionUpsert, PaymentEvents, PaymentTransactions},
    providers::{
        traits::{normalize_amount, PaymentIntent, SubmitPayment},
        ProviderHandle,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub provider: ProviderHandle,
    pub events: Arc<PaymentEvents>,
    pub transactions: Arc<PaymentTransactions>,
}

/// Run derive-based validation and flatten the field errors into one message
fn validate_payload<T: Validate>(payload: &T) -> AppResult<()> {
    payload.validate().map_err(|e| {
        let mut errors: Vec<String> = e
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    error
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field))
                })
            })
            .collect();
        errors.sort();
        AppError::Validation(errors.join("; "))
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        provider: state.provider.kind,
        background_sync: state.provider.supports_background_sync(),
        timestamp: Utc::now(),
    })
}

/// POST /payments/webhooks/stellar
///
/// Duplicates are accepted too: push sources retry anything that is not 2xx.
pub async fn stellar_webhook(
    State(state): State<AppState>,
    Json(payload): Json<StellarWebhookPayload>,
) -> AppResult<(StatusCode, Json<WebhookAcceptedResponse>)> {
    validate_payload(&payload)?;

    let event_id = payload.event_id.clone();
    let enqueued = state.events.enqueue(payload.into_event()).await?;

    info!(
        event_id = %event_id,
        duplicate = !enqueued.created,
        "🔔 Stellar webhook received"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAcceptedResponse {
            accepted: true,
            duplicate: !enqueued.created,
            event_id,
        }),
    ))
}

/// POST /payments/intents
pub async fn create_intent(
    State(state): State<AppState>,
    Json(request): Json<CreateIntentRequest>,
) -> AppResult<Json<PaymentIntent>> {
    validate_payload(&request)?;

    let intent = state.provider.provider.create_intent(request.into()).await?;
    info!(reference = %intent.reference, amount = %intent.amount, "Payment intent created");

    Ok(Json(intent))
}

/// POST /payments/submit
///
/// Broadcasts the envelope and records the attempt, rejected or not, so the
/// reconciler can follow it up.
pub async fn submit_payment(
    State(state): State<AppState>,
    Json(request): Json<SubmitPaymentRequest>,
) -> AppResult<(StatusCode, Json<SubmitPaymentResponse>)> {
    validate_payload(&request)?;

    let amount = request
        .amount
        .as_deref()
        .map(normalize_amount)
        .transpose()?;

    let submitted = state
        .provider
        .provider
        .submit(SubmitPayment { signed_payload: request.signed_payload })
        .await?;

    let transaction = state
        .transactions
        .upsert_by_tx_hash(TransactionUpsert {
            order_id: request.order_id,
            destination_address: request.destination_address,
            asset: request.asset,
            amount,
            status: submitted.status.as_transaction_status(),
            failure_reason: submitted.failure_reason.clone(),
            ..TransactionUpsert::new(submitted.provider.as_str(), submitted.tx_hash.clone())
        })
        .await?;

    info!(tx_hash = %submitted.tx_hash, status = ?submitted.status, "Payment submitted");

    Ok((
        StatusCode::CREATED,
        Json(SubmitPaymentResponse {
            provider: submitted.provider,
            tx_hash: submitted.tx_hash,
            status: submitted.status,
            failure_reason: submitted.failure_reason,
            transaction: transaction.into(),
        }),
    ))
}

/// GET /payments/transactions/:tx_hash
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> AppResult<Json<TransactionResponse>> {
    let tx = state
        .transactions
        .find_by_tx_hash(&tx_hash)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", tx_hash)))?;

    Ok(Json(tx.into()))
}

/// GET /payments/orders/:order_id/transactions, newest first
pub async fn list_order_transactions(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> AppResult<Json<Vec<TransactionResponse>>> {
    let transactions = state.transactions.find_by_order_id(&order_id).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::models::{PaymentEventStatus, TransactionStatus};
    use crate::payments::InMemoryStatusStore;
    use crate::providers::traits::PaymentStatus;
    use crate::providers::ProviderKind;
    use crate::server::create_app;
    use crate::workers::testing::FakeProvider;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (AppState, Router) {
        let store = Arc::new(InMemoryStatusStore::new());
        let state = AppState {
            provider: ProviderHandle {
                kind: ProviderKind::Stellar,
                provider: Arc::new(FakeProvider::new()),
                stream: None,
            },
            events: Arc::new(PaymentEvents::new(store.clone())),
            transactions: Arc::new(PaymentTransactions::new(store)),
        };
        let router = create_app(state.clone()).await;
        (state, router)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn parse<T: DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, router) = app().await;
        let (status, body) = send(&router, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = parse(body);
        assert_eq!(health.provider, ProviderKind::Stellar);
        assert!(health.background_sync);
    }

    #[tokio::test]
    async fn test_webhook_accepts_and_flags_duplicates() {
        let (state, router) = app().await;
        let body = json!({
            "eventId": "stellar:123",
            "txHash": "tx-1",
            "destinationAddress": "GDEST",
            "amount": "10",
            "memo": "order-1"
        });

        let (status, first) =
            send(&router, Method::POST, "/api/v1/payments/webhooks/stellar", Some(body.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let first: WebhookAcceptedResponse = parse(first);
        assert!(first.accepted);
        assert!(!first.duplicate);
        assert_eq!(first.event_id, "stellar:123");

        let (status, second) =
            send(&router, Method::POST, "/api/v1/payments/webhooks/stellar", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let second: WebhookAcceptedResponse = parse(second);
        assert!(second.duplicate);

        let event = state.events.find("stellar", "stellar:123").await.unwrap().unwrap();
        assert_eq!(event.status, PaymentEventStatus::Received);
        assert_eq!(event.memo.as_deref(), Some("order-1"));
    }

    #[tokio::test]
    async fn test_webhook_rejects_missing_event_id() {
        let (_, router) = app().await;

        for body in [json!({ "txHash": "tx-1" }), json!({ "eventId": "  " })] {
            let (status, error) =
                send(&router, Method::POST, "/api/v1/payments/webhooks/stellar", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(error["error_code"], "VALIDATION_FAILED");
            assert_eq!(error["error"], "eventId is required");
        }
    }

    #[tokio::test]
    async fn test_create_intent() {
        let (_, router) = app().await;
        let body = json!({
            "orderId": "order-1",
            "amount": "12.5",
            "currency": "XLM",
            "destinationAddress": "GDEST"
        });

        let (status, intent) =
            send(&router, Method::POST, "/api/v1/payments/intents", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let intent: PaymentIntent = parse(intent);
        assert_eq!(intent.amount, "12.5000000");
        assert_eq!(intent.memo.as_deref(), Some("order-1"));

        let invalid = json!({ "orderId": "order-1", "amount": "0", "currency": "XLM", "destinationAddress": "GDEST" });
        let (status, _) = send(&router, Method::POST, "/api/v1/payments/intents", Some(invalid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_records_attempt() {
        let (_, router) = app().await;
        let body = json!({
            "signedPayload": "envelope",
            "orderId": "order-1",
            "amount": "10",
            "destinationAddress": "GDEST"
        });

        let (status, submitted) =
            send(&router, Method::POST, "/api/v1/payments/submit", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let submitted: SubmitPaymentResponse = parse(submitted);
        assert_eq!(submitted.tx_hash, "tx-envelope");
        assert_eq!(submitted.status, PaymentStatus::Submitted);
        assert_eq!(submitted.transaction.status, TransactionStatus::Submitted);
        assert_eq!(submitted.transaction.amount.as_deref(), Some("10.0000000"));

        let (status, tx) =
            send(&router, Method::GET, "/api/v1/payments/transactions/tx-envelope", None).await;
        assert_eq!(status, StatusCode::OK);
        let tx: TransactionResponse = parse(tx);
        assert_eq!(tx.order_id.as_deref(), Some("order-1"));

        let (status, list) =
            send(&router, Method::GET, "/api/v1/payments/orders/order-1/transactions", None).await;
        assert_eq!(status, StatusCode::OK);
        let list: Vec<TransactionResponse> = parse(list);
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejection_is_recorded_as_failed() {
        let (state, router) = app().await;
        let body = json!({ "signedPayload": "rejected", "orderId": "order-2" });

        let (status, submitted) =
            send(&router, Method::POST, "/api/v1/payments/submit", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let submitted: SubmitPaymentResponse = parse(submitted);
        assert_eq!(submitted.status, PaymentStatus::Failed);
        assert_eq!(submitted.failure_reason.as_deref(), Some("tx_bad_seq"));

        let tx = state.transactions.find_by_tx_hash("tx-rejected").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.failure_reason.as_deref(), Some("tx_bad_seq"));
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let (_, router) = app().await;
        let (status, error) =
            send(&router, Method::GET, "/api/v1/payments/transactions/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_inert_provider_surfaces_not_implemented() {
        let store = Arc::new(InMemoryStatusStore::new());
        let state = AppState {
            provider: ProviderHandle {
                kind: ProviderKind::Flare,
                provider: Arc::new(crate::providers::flare::FlarePaymentProvider),
                stream: None,
            },
            events: Arc::new(PaymentEvents::new(store.clone())),
            transactions: Arc::new(PaymentTransactions::new(store)),
        };
        let router = create_app(state).await;

        let body = json!({ "orderId": "order-1", "amount": "1", "currency": "FLR" });
        let (status, error) = send(&router, Method::POST, "/api/v1/payments/intents", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(error["details"]["provider"], "Flare");
    }
}
