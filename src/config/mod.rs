use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub whale: WhaleConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub valkey: ValkeyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Candidate JSON-RPC endpoints, tried in ascending priority order.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    /// Per-call time box for every RPC request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Block explorer base URL for alert deep links.
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Scan loop period in seconds (both streams).
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// How often the freshness registry and subscriber cache are rebuilt
    /// from the store.
    #[serde(default = "default_registry_refresh")]
    pub registry_refresh_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecodeConfig {
    /// Registry contract addresses whose transactions are asset-creation
    /// candidates.
    #[serde(default)]
    pub registry_contracts: Vec<String>,
    /// 4-byte function selectors (hex) that mark asset-creation calls sent
    /// to arbitrary contracts.
    #[serde(default)]
    pub creation_selectors: Vec<String>,
    /// Solidity event signature emitted when an asset is registered.
    #[serde(default = "default_creation_event")]
    pub creation_event: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhaleConfig {
    /// Fallback threshold when no subscriber has configured one.
    #[serde(default = "default_whale_threshold")]
    pub default_threshold: f64,
    /// Tokens created within this many hours get the discounted threshold.
    #[serde(default = "default_freshness_hours")]
    pub freshness_window_hours: u64,
    /// Multiplier applied to thresholds for fresh tokens.
    #[serde(default = "default_freshness_discount")]
    pub freshness_discount: f64,
    /// Tokens above this market cap are never whale candidates.
    #[serde(default = "default_mcap_ceiling")]
    pub market_cap_ceiling_usd: f64,
    /// Rolling volume windows, evaluated in the order given. Empty list
    /// switches detection to the single-transaction fallback path.
    #[serde(default = "default_windows")]
    pub windows: Vec<WindowConfig>,
    /// Known router/exchange addresses used to classify transfers as
    /// buys or sells. Empty = everything is a plain transfer.
    #[serde(default)]
    pub router_addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub duration_secs: u64,
    pub volume_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Token endpoint of a Blockscout-compatible explorer API, used for the
    /// market-cap ceiling check. Empty disables the lookup (and with it the
    /// high-cap exclusion).
    #[serde(default)]
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Delay between consecutive recipients of one alert, in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Telegram Bot API base URL.
    #[serde(default = "default_telegram_api")]
    pub telegram_api_url: String,
    /// Bot token - loaded from env BOT_TOKEN, never stored in the file.
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValkeyConfig {
    #[serde(default = "default_valkey_url")]
    pub url: String,
    /// Key namespace prefix, so multiple instances can share one Valkey.
    #[serde(default = "default_valkey_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig {
        url: "https://mainnet.storyrpc.io".to_string(),
        priority: 0,
    }]
}
fn default_request_timeout() -> u64 {
    5
}
fn default_explorer_url() -> String {
    "https://www.storyscan.io".to_string()
}
fn default_scan_interval() -> u64 {
    30
}
fn default_registry_refresh() -> u64 {
    300
}
fn default_creation_event() -> String {
    "IPAssetRegistered(address,address,string,uint256)".to_string()
}
fn default_whale_threshold() -> f64 {
    40.0
}
fn default_freshness_hours() -> u64 {
    4
}
fn default_freshness_discount() -> f64 {
    0.7
}
fn default_mcap_ceiling() -> f64 {
    200_000.0
}
fn default_windows() -> Vec<WindowConfig> {
    vec![
        WindowConfig { duration_secs: 15, volume_threshold: 50.0 },
        WindowConfig { duration_secs: 30, volume_threshold: 100.0 },
        WindowConfig { duration_secs: 60, volume_threshold: 200.0 },
        WindowConfig { duration_secs: 300, volume_threshold: 500.0 },
    ]
}
fn default_pacing_ms() -> u64 {
    100
}
fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}
fn default_valkey_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_valkey_prefix() -> String {
    "ipwatch".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            request_timeout_secs: default_request_timeout(),
            explorer_url: default_explorer_url(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            registry_refresh_secs: default_registry_refresh(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            registry_contracts: Vec::new(),
            creation_selectors: Vec::new(),
            creation_event: default_creation_event(),
        }
    }
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_whale_threshold(),
            freshness_window_hours: default_freshness_hours(),
            freshness_discount: default_freshness_discount(),
            market_cap_ceiling_usd: default_mcap_ceiling(),
            windows: default_windows(),
            router_addresses: Vec::new(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self { api_url: String::new() }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            telegram_api_url: default_telegram_api(),
            bot_token: String::new(),
        }
    }
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            url: default_valkey_url(),
            prefix: default_valkey_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Load a default config with env-only secrets (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            chain: ChainConfig::default(),
            monitor: MonitorConfig::default(),
            decode: DecodeConfig::default(),
            whale: WhaleConfig::default(),
            market: MarketConfig::default(),
            alert: AlertConfig::default(),
            valkey: ValkeyConfig::default(),
            logging: LoggingConfig::default(),
        };
        if let Ok(url) = std::env::var("IPWATCH_RPC_URL") {
            config.chain.endpoints = vec![EndpointConfig { url, priority: 0 }];
        }
        config.overlay_env();
        config
    }

    fn overlay_env(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.alert.bot_token = token;
        }
        if let Ok(url) = std::env::var("VALKEY_URL") {
            self.valkey.url = url;
        }
    }

    pub fn has_bot_token(&self) -> bool {
        !self.alert.bot_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_from_minimal_toml() {
        let config: Config = toml::from_str("[chain]\n").unwrap();
        assert_eq!(config.monitor.scan_interval_secs, 30);
        assert_eq!(config.whale.default_threshold, 40.0);
        assert_eq!(config.whale.freshness_window_hours, 4);
        assert_eq!(config.whale.freshness_discount, 0.7);
        assert_eq!(config.whale.market_cap_ceiling_usd, 200_000.0);
        assert_eq!(config.whale.windows.len(), 4);
        assert_eq!(config.alert.pacing_ms, 100);
        assert_eq!(config.chain.endpoints.len(), 1);
    }

    #[test]
    fn test_windows_override() {
        let toml = r#"
            [chain]
            [[whale.windows]]
            duration_secs = 10
            volume_threshold = 25.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.whale.windows.len(), 1);
        assert_eq!(config.whale.windows[0].duration_secs, 10);
    }
}
