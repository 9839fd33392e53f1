use async_trait::async_trait;

use crate::error::{ProviderError, ProviderResult};
use crate::providers::registry::ProviderKind;
use crate::providers::traits::*;

/// Selectable placeholder. Every operation fails with `NotImplemented`.
pub struct FlarePaymentProvider;

const FLARE: &str = "Flare";

#[async_trait]
impl PaymentProvider for FlarePaymentProvider {
    fn id(&self) -> ProviderKind {
        ProviderKind::Flare
    }

    async fn create_intent(&self, _input: CreatePaymentIntent) -> ProviderResult<PaymentIntent> {
        Err(ProviderError::NotImplemented(FLARE))
    }

    async fn submit(&self, _input: SubmitPayment) -> ProviderResult<SubmittedPayment> {
        Err(ProviderError::NotImplemented(FLARE))
    }

    async fn verify(&self, _input: VerifyPayment) -> ProviderResult<VerifiedPayment> {
        Err(ProviderError::NotImplemented(FLARE))
    }

    async fn get_status(&self, _tx_hash: &str) -> ProviderResult<PaymentStatus> {
        Err(ProviderError::NotImplemented(FLARE))
    }
}
