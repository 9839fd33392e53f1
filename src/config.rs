use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

const STELLAR_PUBLIC_HORIZON: &str = "https://horizon.stellar.org";
const STELLAR_TESTNET_HORIZON: &str = "https://horizon-testnet.stellar.org";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Unset means an in-process store; nothing survives a restart
    pub database_url: Option<String>,
    pub bind_address: String,
    /// Raw provider selector, resolved by `providers::registry` at startup
    pub payment_provider: String,
    pub provider_timeout_ms: u64,
    pub stellar: StellarSettings,
    pub listener: LoopSettings,
    pub processor: ProcessorSettings,
    pub reconciliation: ReconciliationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StellarSettings {
    pub network: String,
    pub horizon_url: String,
    pub destination_address: Option<String>,
    pub payments_start_cursor: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LoopSettings {
    pub interval_ms: u64,
    pub batch_size: u64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ProcessorSettings {
    pub interval_ms: u64,
    pub batch_size: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// How long a claimed event stays `processing` before another tick may take it over
    pub processing_lease_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ReconciliationSettings {
    pub interval_ms: u64,
    pub batch_size: u64,
    pub stale_ms: u64,
}

impl LoopSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ProcessorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn processing_lease(&self) -> Duration {
        Duration::from_millis(self.processing_lease_ms)
    }
}

impl ReconciliationSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load from process environment (after `.env` has been applied by `main`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        Ok(Self::from_source(&source))
    }

    pub fn from_source(source: &config::Config) -> Self {
        let network = string_or(source, "stellar_network", "testnet");
        let horizon_url = optional_string(source, "stellar_horizon_url").unwrap_or_else(|| {
            if network == "public" {
                STELLAR_PUBLIC_HORIZON.to_string()
            } else {
                STELLAR_TESTNET_HORIZON.to_string()
            }
        });

        Self {
            database_url: optional_string(source, "database_url"),
            bind_address: string_or(source, "bind_address", "0.0.0.0:8080"),
            payment_provider: string_or(source, "payment_provider", "stellar").to_lowercase(),
            provider_timeout_ms: positive_or(source, "payment_provider_timeout_ms", 10_000),
            stellar: StellarSettings {
                network,
                horizon_url: horizon_url.trim_end_matches('/').to_string(),
                destination_address: optional_string(source, "stellar_destination_address"),
                payments_start_cursor: string_or(source, "stellar_payments_start_cursor", "now"),
            },
            listener: LoopSettings {
                interval_ms: positive_or(source, "payment_listener_interval_ms", 20_000),
                batch_size: positive_or(source, "payment_listener_batch_size", 50),
            },
            processor: ProcessorSettings {
                interval_ms: positive_or(source, "payment_event_processor_interval_ms", 5_000),
                batch_size: positive_or(source, "payment_event_processor_batch_size", 25),
                retry_base_ms: positive_or(source, "payment_event_retry_base_ms", 5_000),
                retry_max_ms: positive_or(source, "payment_event_retry_max_ms", 300_000),
                processing_lease_ms: positive_or(source, "payment_event_processing_lease_ms", 300_000),
            },
            reconciliation: ReconciliationSettings {
                interval_ms: positive_or(source, "payment_reconciliation_interval_ms", 60_000),
                batch_size: positive_or(source, "payment_reconciliation_batch_size", 50),
                stale_ms: positive_or(source, "payment_reconciliation_stale_ms", 30_000),
            },
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

fn optional_string(source: &config::Config, key: &str) -> Option<String> {
    source
        .get_string(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn string_or(source: &config::Config, key: &str, fallback: &str) -> String {
    optional_string(source, key).unwrap_or_else(|| fallback.to_string())
}

/// Missing, unparsable and non-positive values all fall back to the default.
fn positive_or(source: &config::Config, key: &str, fallback: u64) -> u64 {
    match source.get_int(key) {
        Ok(value) if value > 0 => value as u64,
        _ => fallback,
    }
}
