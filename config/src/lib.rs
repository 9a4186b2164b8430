use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "PRICEWATCH_";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidValue { key: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(error) => write!(f, "config io error: {}", error),
            ConfigError::Yaml(error) => write!(f, "config yaml error: {}", error),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid config value {}={:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        ConfigError::Yaml(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    #[default]
    Gbm,
    Ws,
}

impl FromStr for FeedMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gbm" => Ok(FeedMode::Gbm),
            "ws" | "websocket" => Ok(FeedMode::Ws),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub mode: FeedMode,
    pub url: String,
    pub symbol: String,
    pub reconnect_delay_ms: u64,
    pub initial_price: f64,
    pub drift: f64,
    pub volatility: f64,
    pub count_per_batch: usize,
    pub batch_interval_ms: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            mode: FeedMode::Gbm,
            url: "ws://127.0.0.1:3001/stocks/prices".to_string(),
            symbol: "BTC/USD".to_string(),
            reconnect_delay_ms: 5000,
            initial_price: 100.0,
            drift: 0.0001,
            volatility: 0.005,
            count_per_batch: 10,
            batch_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    pub bucket_ms: i64,
    pub history_capacity: usize,
    pub max_lag_ms: i64,
    pub intermediate_throttle_ms: i64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            bucket_ms: 60_000,
            history_capacity: 1000,
            max_lag_ms: 60_000,
            intermediate_throttle_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSection {
    /// Zone used to render bar timestamps as wall-clock HH:mm.
    pub utc_offset_minutes: i32,
    pub default_interval_ms: i64,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            default_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub capacity: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub dispatch_interval_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            max_retries: 3,
            dispatch_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub channel_capacity: usize,
    pub monitor_capacity: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            monitor_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PricewatchConfig {
    pub feed: FeedSection,
    pub aggregator: AggregatorSection,
    pub evaluator: EvaluatorSection,
    pub queue: QueueSection,
    pub gateway: GatewaySection,
    pub logging: LoggingSection,
}

impl PricewatchConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Apply `PRICEWATCH_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `PRICEWATCH_*` overrides, reading each variable through `lookup`.
    pub fn apply_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = get("FEED_MODE") {
            self.feed.mode = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })?;
        }
        if let Some((_, value)) = get("FEED_URL") {
            self.feed.url = value;
        }
        if let Some((_, value)) = get("SYMBOL") {
            self.feed.symbol = value;
        }
        if let Some((_, value)) = get("LOG_LEVEL") {
            self.logging.level = value;
        }

        override_number(get("RECONNECT_DELAY_MS"), &mut self.feed.reconnect_delay_ms)?;
        override_number(get("GBM_INITIAL_PRICE"), &mut self.feed.initial_price)?;
        override_number(get("GBM_DRIFT"), &mut self.feed.drift)?;
        override_number(get("GBM_VOLATILITY"), &mut self.feed.volatility)?;
        override_number(get("BUCKET_MS"), &mut self.aggregator.bucket_ms)?;
        override_number(get("HISTORY_CAPACITY"), &mut self.aggregator.history_capacity)?;
        override_number(get("UTC_OFFSET_MINUTES"), &mut self.evaluator.utc_offset_minutes)?;
        override_number(get("DEFAULT_INTERVAL_MS"), &mut self.evaluator.default_interval_ms)?;
        override_number(get("QUEUE_CAPACITY"), &mut self.queue.capacity)?;
        override_number(get("QUEUE_BATCH_SIZE"), &mut self.queue.batch_size)?;
        override_number(get("QUEUE_MAX_RETRIES"), &mut self.queue.max_retries)?;
        override_number(get("DISPATCH_INTERVAL_MS"), &mut self.queue.dispatch_interval_ms)?;
        override_number(get("CHANNEL_CAPACITY"), &mut self.gateway.channel_capacity)?;
        override_number(get("MONITOR_CAPACITY"), &mut self.gateway.monitor_capacity)?;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("aggregator.bucket_ms", self.aggregator.bucket_ms)?;
        positive("aggregator.intermediate_throttle_ms", self.aggregator.intermediate_throttle_ms)?;
        positive("evaluator.default_interval_ms", self.evaluator.default_interval_ms)?;
        positive("queue.capacity", self.queue.capacity as i64)?;
        positive("queue.batch_size", self.queue.batch_size as i64)?;
        if self.evaluator.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid(
                "evaluator.utc_offset_minutes",
                self.evaluator.utc_offset_minutes,
            ));
        }
        if !self.feed.initial_price.is_finite() || self.feed.initial_price <= 0.0 {
            return Err(invalid("feed.initial_price", self.feed.initial_price));
        }
        if self.feed.mode == FeedMode::Ws && self.feed.url.trim().is_empty() {
            return Err(invalid("feed.url", &self.feed.url));
        }
        Ok(())
    }
}

fn override_number<T: FromStr>(
    entry: Option<(String, String)>,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some((key, value)) = entry {
        *slot = value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value })?;
    }
    Ok(())
}

fn positive(key: &str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(invalid(key, value));
    }
    Ok(())
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
