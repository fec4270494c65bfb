use crate::types::Contract;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;
const MIN_TICK_INTERVAL_MS: u64 = 10_000;
const DEFAULT_FULFILLED_FRACTION: f64 = 0.5;
const DEFAULT_GAP_THRESHOLD: f64 = 0.02;
const MAX_GAP_THRESHOLD: f64 = 0.05;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// Listen address for the management/health server (e.g. `0.0.0.0:9000`).
    pub binding: Option<String>,
    /// Wallets the orchestrator connects at startup.
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
    /// Exchange pair contracts available to controllers.
    #[serde(default)]
    pub contracts: Vec<Contract>,
    /// Denom to display-symbol overrides, e.g. `ukuji = "KUJI"`.
    #[serde(default)]
    pub symbols: std::collections::BTreeMap<String, String>,
    /// Controllers seeded when the store holds none for a wallet.
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    /// Tick loop and reconciliation thresholds.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Venue gateway network parameters.
    #[serde(default)]
    pub venue: VenueConfig,
    /// Telegram notification parameters.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Persistence location.
    #[serde(default)]
    pub store: StoreConfig,
    /// Graceful-exit time control.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalletConfig {
    /// Venue gateway endpoint this wallet signs against.
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the account credential.
    #[serde(default = "default_wallet_credential_env")]
    pub credential_env: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ControllerConfig {
    /// Address of the contract this controller trades.
    pub contract: String,
    /// Wallet address; empty means the first connected wallet.
    #[serde(default)]
    pub wallet: String,
    /// Price deltas for the ladder, both signs listed explicitly.
    #[serde(default)]
    pub offsets: Vec<f64>,
    /// Target base/total value ratio in (0, 1). Absent means seed from
    /// the observed balance at startup.
    pub target_rate: Option<f64>,
    /// Levels whose base-quantity delta falls below this are dropped.
    #[serde(default)]
    pub order_min: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// Reconciliation interval (milliseconds), clamped to a 10s floor.
    pub tick_interval_ms: Option<u64>,
    /// Fulfilled-order fraction that triggers a full ladder reset.
    pub fulfilled_fraction: Option<f64>,
    /// One-sided gap fraction that triggers a reset. Clamped to 0.05.
    pub gap_threshold: Option<f64>,
}

impl EngineConfig {
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS)
            .max(MIN_TICK_INTERVAL_MS)
    }

    pub fn fulfilled_fraction(&self) -> f64 {
        self.fulfilled_fraction
            .filter(|value| *value > 0.0 && *value <= 1.0)
            .unwrap_or(DEFAULT_FULFILLED_FRACTION)
    }

    pub fn gap_threshold(&self) -> f64 {
        self.gap_threshold
            .filter(|value| *value > 0.0)
            .unwrap_or(DEFAULT_GAP_THRESHOLD)
            .min(MAX_GAP_THRESHOLD)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VenueConfig {
    /// Base URL of the venue gateway REST service.
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the gateway API token.
    #[serde(default = "default_venue_token_env")]
    pub token_env: String,
    /// Request timeout (milliseconds).
    pub request_timeout_ms: Option<u64>,
}

impl VenueConfig {
    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
            .filter(|value| *value > 0)
            .unwrap_or(10_000)
    }

    pub fn token(&self) -> Result<String> {
        let env_name = self.token_env.trim();
        if env_name.is_empty() {
            anyhow::bail!("venue.token_env must name an environment variable");
        }
        std::env::var(env_name)
            .with_context(|| format!("venue token environment variable {env_name} is not set"))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Name of the environment variable holding the Telegram bot token.
    #[serde(default = "default_telegram_token_env")]
    pub token_env: String,
    /// Telegram chat id messages are delivered to.
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// Directory for json record files. Unset means in-memory only.
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ShutdownConfig {
    /// Timeout for driving controllers through their closing steps (ms).
    pub close_timeout_ms: Option<u64>,
    /// Path of the summary file written on exit.
    pub summary_path: Option<String>,
}

impl ShutdownConfig {
    pub fn close_timeout_ms(&self) -> u64 {
        self.close_timeout_ms
            .filter(|value| *value > 0)
            .unwrap_or(30_000)
    }

    pub fn summary_path(&self) -> String {
        self.summary_path
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "shutdown_summary.json".to_string())
    }
}

fn default_wallet_credential_env() -> String {
    "MM_WALLET_CREDENTIAL".to_string()
}

fn default_venue_token_env() -> String {
    "MM_VENUE_TOKEN".to_string()
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let _ = dotenv();
        if let Some(path) = cli_config_path() {
            return Self::load_from_path(path);
        }
        if let Some(path) = env_config_path() {
            return Self::load_from_path(path);
        }
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }
}

fn cli_config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                return Some(path.into());
            }
        } else if let Some(value) = arg.strip_prefix("--config=") {
            return Some(value.to_string().into());
        }
    }
    None
}

fn env_config_path() -> Option<PathBuf> {
    std::env::var("APP_CONFIG_PATH").ok().map(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_and_clamps() {
        let engine = EngineConfig::default();
        assert_eq!(engine.tick_interval_ms(), 10_000);
        assert_eq!(engine.fulfilled_fraction(), 0.5);
        assert_eq!(engine.gap_threshold(), 0.02);

        let engine = EngineConfig {
            tick_interval_ms: Some(2_000),
            fulfilled_fraction: Some(1.5),
            gap_threshold: Some(0.2),
        };
        assert_eq!(engine.tick_interval_ms(), 10_000);
        assert_eq!(engine.fulfilled_fraction(), 0.5);
        assert_eq!(engine.gap_threshold(), 0.05);
    }

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            binding = "127.0.0.1:9000"

            [[wallets]]
            endpoint = "https://gateway.example"
            credential_env = "WALLET_ONE"

            [[contracts]]
            address = "kujira1pair"
            price_decimals = 3
            decimal_delta = 0

            [contracts.denoms]
            base = "ukuji"
            quote = "uusdc"

            [[controllers]]
            contract = "kujira1pair"
            offsets = [-0.02, -0.01, 0.01, 0.02]
            target_rate = 0.5
            order_min = 1.0

            [engine]
            tick_interval_ms = 15000
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.binding.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cfg.wallets.len(), 1);
        assert_eq!(cfg.contracts[0].denoms.base, "ukuji");
        assert_eq!(cfg.controllers[0].offsets.len(), 4);
        assert_eq!(cfg.engine.tick_interval_ms(), 15_000);
    }
}
