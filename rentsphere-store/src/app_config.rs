use rentsphere_shared::Masked;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Masked<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Masked<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub api_base: String,
    pub secret_key: Masked<String>,
    pub webhook_secret: Masked<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_seconds: i64,
    /// Serve intents from the in-process mock instead of the processor
    #[serde(default)]
    pub use_mock: bool,
}

fn default_currency() -> String { "usd".to_string() }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_tolerance() -> i64 { 300 }

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    pub item_flip_attempts: u32,
    pub item_flip_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            item_flip_attempts: 3,
            item_flip_backoff_ms: 200,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `RENTSPHERE__PAYMENT__WEBHOOK_SECRET=whsec_...`
            .add_source(config::Environment::with_prefix("RENTSPHERE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
