use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::providers::flare::FlarePaymentProvider;
use crate::providers::stellar::{Horizon, StellarPaymentProvider, StellarPaymentStream};
use crate::providers::traits::{PaymentProvider, PaymentStream};

/// Closed set of ledger providers this service can be configured with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stellar,
    Flare,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Stellar, ProviderKind::Flare];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stellar => "stellar",
            ProviderKind::Flare => "flare",
        }
    }

    /// Whether the processor and reconciler have anything to verify against
    pub fn supports_background_sync(&self) -> bool {
        matches!(self, ProviderKind::Stellar)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let supported: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                AppError::Config(format!(
                    "Unsupported PAYMENT_PROVIDER '{}'. Supported providers: {}",
                    value,
                    supported.join(", ")
                ))
            })
    }
}

/// The provider resolved for this process
#[derive(Clone)]
pub struct ProviderHandle {
    pub kind: ProviderKind,
    pub provider: Arc<dyn PaymentProvider>,
    /// Present only when the provider exposes a stream and a watched account is configured
    pub stream: Option<Arc<dyn PaymentStream>>,
}

impl ProviderHandle {
    pub fn supports_background_sync(&self) -> bool {
        self.kind.supports_background_sync()
    }
}

/// Resolve the configured provider once at startup. Any error here is fatal.
pub fn resolve(config: &Config) -> AppResult<ProviderHandle> {
    let kind: ProviderKind = config.payment_provider.parse()?;

    let handle = match kind {
        ProviderKind::Stellar => {
            let horizon = Horizon::new(&config.stellar.horizon_url, config.provider_timeout())?;
            let destination = config.stellar.destination_address.clone();
            info!(
                "🌍 Stellar {} network via {}",
                config.stellar.network, config.stellar.horizon_url
            );

            let stream = destination.clone().map(|address| {
                Arc::new(StellarPaymentStream::new(horizon.clone(), address)) as Arc<dyn PaymentStream>
            });

            ProviderHandle {
                kind,
                provider: Arc::new(StellarPaymentProvider::new(horizon, destination)),
                stream,
            }
        }
        ProviderKind::Flare => ProviderHandle {
            kind,
            provider: Arc::new(FlarePaymentProvider),
            stream: None,
        },
    };

    info!(
        "✅ Payment provider resolved: {} (stream: {}, background sync: {})",
        handle.kind,
        handle.stream.is_some(),
        handle.supports_background_sync()
    );

    Ok(handle)
}
