use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::claims::{parse_units, validate_wallet_address};

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub disbursement: DisbursementConfig,
}

impl ClaimsConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("SOLUNA_CLAIMS_CONFIG")
            .unwrap_or_else(|_| "config/claims.toml".to_string());
        ensure!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("SOLUNA_CLAIMS_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/claims.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize claims configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        ensure!(self.server.port > 0, "Server port must be greater than zero");
        ensure!(
            self.database.max_connections >= self.database.min_connections.unwrap_or(1),
            "Max connections must be >= min connections"
        );
        ensure!(
            self.database.max_connections <= 128,
            "Connection pool oversized"
        );
        self.chain.ensure_bounds()?;
        self.disbursement.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub request_timeout_ms: Option<u64>,
    /// Account the node or signing proxy sends transfers from
    pub sender_address: String,
    /// ERC-20 contract being distributed
    pub token_address: String,
    /// Prefix for transaction links in logs, e.g. `https://sepolia.etherscan.io/tx/`
    pub explorer_tx_url: Option<String>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(10_000))
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure!(!self.rpc_url.is_empty(), "Chain RPC URL must be specified");
        let millis = self.request_timeout().as_millis();
        ensure!(millis >= 100, "RPC timeout must be at least 100ms");
        ensure!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        validate_wallet_address(&self.sender_address).context("Invalid chain.sender_address")?;
        validate_wallet_address(&self.token_address).context("Invalid chain.token_address")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisbursementConfig {
    #[serde(default = "DisbursementConfig::default_enabled")]
    pub enabled: bool,
    /// Decimal token amount paid per claim, e.g. "100" or "0.5"
    #[serde(default = "DisbursementConfig::default_amount")]
    pub amount: String,
    #[serde(default = "DisbursementConfig::default_decimals")]
    pub decimals: u32,
    #[serde(default = "DisbursementConfig::default_batch_size")]
    pub batch_size: u64,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    #[serde(default = "DisbursementConfig::default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "DisbursementConfig::default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "DisbursementConfig::default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl DisbursementConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Transfer amount in integer base units.
    pub fn transfer_amount(&self) -> Result<u128> {
        parse_units(&self.amount, self.decimals)
            .with_context(|| format!("Invalid disbursement amount {:?}", self.amount))
    }

    pub fn ensure_bounds(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "Batch size must be positive");
        ensure!(self.batch_size <= 512, "Batch size exceeds defensive limit");
        ensure!(
            self.poll_interval_ms >= 100,
            "Poll interval must be >= 100ms"
        );
        ensure!(
            self.poll_interval_ms <= 86_400_000,
            "Poll interval must be <= one day"
        );
        ensure!(
            self.confirmation_timeout_ms >= 1_000,
            "Confirmation timeout must be at least one second"
        );
        ensure!(
            self.receipt_poll_interval_ms >= 50,
            "Receipt poll interval must be >= 50ms"
        );
        ensure!(
            self.receipt_poll_interval_ms < self.confirmation_timeout_ms,
            "Receipt poll interval must be shorter than the confirmation timeout"
        );
        ensure!(self.confirmations >= 1, "At least one confirmation is required");
        ensure!(
            self.confirmations <= 64,
            "Confirmation depth exceeds defensive limit"
        );
        ensure!(
            self.stale_after() > self.confirmation_timeout(),
            "stale_after_secs must exceed the confirmation timeout"
        );
        ensure!(
            self.stale_after_secs <= 7 * 86_400,
            "stale_after_secs must be <= one week"
        );
        let amount = self.transfer_amount()?;
        ensure!(amount > 0, "Disbursement amount must be positive");
        Ok(())
    }

    const fn default_enabled() -> bool {
        true
    }

    fn default_amount() -> String {
        "100".to_string()
    }

    const fn default_decimals() -> u32 {
        18
    }

    const fn default_batch_size() -> u64 {
        10
    }

    const fn default_receipt_poll_interval_ms() -> u64 {
        2_000
    }

    const fn default_confirmations() -> u64 {
        1
    }

    const fn default_stale_after_secs() -> u64 {
        900
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
