//! Application configuration.
//!
//! A TOML file layered with `CHASER__`-prefixed environment overrides,
//! e.g. `CHASER__CHASE__MAX_ATTEMPTS=50` or `CHASER__POLL_INTERVAL_MS=500`.

use crate::error::{AppError, AppResult};
use chaser_detector::DetectorConfig;
use chaser_executor::ChaseConfig;
use chaser_gateway::GatewaySettings;
use chaser_position::ReconcilerConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "CHASER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Cached credentials are reloaded after this long.
    #[serde(default = "default_credentials_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_credentials_ttl_secs() -> u64 {
    300
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_credentials_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Signed-RPC request deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_listen_key_renew_secs")]
    pub listen_key_renew_secs: u64,
    /// Book ticks with a wider spread (percent) are dropped.
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,
    /// recvWindow sent with signed REST calls.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_listen_key_renew_secs() -> u64 {
    30 * 60
}

fn default_max_spread_pct() -> Decimal {
    Decimal::from(5)
}

fn default_recv_window_ms() -> u64 {
    5_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            listen_key_renew_secs: default_listen_key_renew_secs(),
            max_spread_pct: default_max_spread_pct(),
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

impl WebSocketConfig {
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            reconnect_delay_ms: self.reconnect_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            listen_key_renew: Duration::from_secs(self.listen_key_renew_secs),
            max_spread_pct: self.max_spread_pct,
            recv_window_ms: self.recv_window_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bind address of the `/health` and `/metrics` endpoint.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// JSON snapshot of the durable store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Directory of the daily chase journal files.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
    /// Pending-signal poll period.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Oldest cached price used for trigger evaluation before REST fallback.
    #[serde(default = "default_price_max_age_ms")]
    pub price_max_age_ms: u64,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub chase: ChaseConfig,
    #[serde(default)]
    pub trigger: DetectorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store.json")
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_price_max_age_ms() -> u64 {
    5_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            journal_dir: default_journal_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            price_max_age_ms: default_price_max_age_ms(),
            credentials: CredentialsConfig::default(),
            websocket: WebSocketConfig::default(),
            chase: ChaseConfig::default(),
            trigger: DetectorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` (optional when `required` is false) plus environment overrides.
    pub fn load(path: &str, required: bool) -> AppResult<Self> {
        let file = File::new(path, FileFormat::Toml).required(required);
        Self::build(config::Config::builder().add_source(file))
    }

    /// Parse TOML content plus environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        Self::build(config::Config::builder().add_source(File::from_str(content, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> AppResult<Self> {
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.chase.max_attempts == 0 {
            return Err(AppError::Config("chase.max_attempts must be positive".to_string()));
        }
        if self.chase.completion_threshold <= Decimal::ZERO
            || self.chase.completion_threshold > Decimal::ONE
        {
            return Err(AppError::Config(format!(
                "chase.completion_threshold {} outside (0, 1]",
                self.chase.completion_threshold
            )));
        }
        let ladder_total: Decimal = self.chase.tp_ladder.iter().copied().sum();
        if ladder_total > Decimal::ONE {
            return Err(AppError::Config(format!(
                "chase.tp_ladder sums to {ladder_total}, above 1"
            )));
        }
        self.metrics_addr()?;
        Ok(())
    }

    pub fn metrics_addr(&self) -> AppResult<SocketAddr> {
        self.telemetry.metrics_addr.parse().map_err(|e| {
            AppError::Config(format!(
                "Invalid telemetry.metrics_addr {}: {e}",
                self.telemetry.metrics_addr
            ))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn price_max_age(&self) -> Duration {
        Duration::from_millis(self.price_max_age_ms)
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credentials.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.chase.max_attempts, 100);
        assert_eq!(config.chase.completion_threshold, dec!(0.98));
        assert_eq!(config.trigger.idle_checks, 5);
        assert_eq!(config.reconciler.zero_threshold, dec!(0.000001));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            poll_interval_ms = 250

            [chase]
            max_attempts = 40
            market_fallback = false
            tp_ladder = [0.5, 0.5]

            [telemetry]
            metrics_addr = "127.0.0.1:9900"
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.chase.max_attempts, 40);
        assert!(!config.chase.market_fallback);
        assert_eq!(config.chase.tp_ladder, vec![dec!(0.5), dec!(0.5)]);
        assert_eq!(config.chase.confirm_wait_ms, 3_000);
        assert_eq!(config.websocket.reconnect_delay_ms, 5_000);
        assert_eq!(config.metrics_addr().unwrap().port(), 9900);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = AppConfig::from_toml_str("[chase]\ncompletion_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = AppConfig::load(path.to_str().unwrap(), false).unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        tokio_test::assert_err!(AppConfig::load(path.to_str().unwrap(), true));
    }

    #[test]
    fn test_gateway_settings_mapping() {
        let ws = WebSocketConfig {
            request_timeout_ms: 1_500,
            listen_key_renew_secs: 60,
            ..WebSocketConfig::default()
        };
        let settings = ws.gateway_settings();
        assert_eq!(settings.request_timeout, Duration::from_millis(1_500));
        assert_eq!(settings.listen_key_renew, Duration::from_secs(60));
        assert_eq!(settings.max_spread_pct, dec!(5));
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string(&AppConfig::default()).unwrap();
        assert!(toml_str.contains("poll_interval_ms"));
        assert!(toml_str.contains("[chase]"));
    }
}
