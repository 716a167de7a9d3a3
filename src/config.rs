//! Configuration loading.
//!
//! Two on-disk formats produce the same [`Config`]:
//!
//! - `*.toml` files are parsed as sectioned TOML.
//! - Any other file is read as flat `KEY VALUE` lines, with `#` comment lines.
//!
//! ```text
//! # capture.conf
//! HTTP_ADDRESS 0.0.0.0
//! HTTP_PORT 8088
//! REDIS_ADDRESS 127.0.0.1
//! MAX_PAIRS 24
//! ```
//!
//! Missing keys fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use toml::{Table, Value};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_http_address")]
    pub http_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            http_port: default_http_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_address, self.http_port)
    }
}

fn default_http_address() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8088
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_address")]
    pub address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,
    /// Fixed wait between connection attempts, at startup and after a loss.
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait_secs: u64,
    /// Name of the ordering list shared by producers and the worker.
    #[serde(default = "default_list_key")]
    pub list_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_broker_address(),
            port: default_broker_port(),
            timeout_secs: default_broker_timeout(),
            reconnect_wait_secs: default_reconnect_wait(),
            list_key: default_list_key(),
        }
    }
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.address, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_secs(self.reconnect_wait_secs)
    }
}

fn default_broker_address() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    6379
}
fn default_broker_timeout() -> u64 {
    2
}
fn default_reconnect_wait() -> u64 {
    3
}
fn default_list_key() -> String {
    "capturevate_keys".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    #[serde(default = "default_max_field_size")]
    pub max_field_size: usize,
    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,
    /// Placeholder used for `user`/`path` when the body has none.
    #[serde(default = "default_unknown_key")]
    pub unknown_key: char,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_pairs: default_max_pairs(),
            max_field_size: default_max_field_size(),
            max_data_size: default_max_data_size(),
            unknown_key: default_unknown_key(),
        }
    }
}

fn default_max_pairs() -> usize {
    24
}
fn default_max_field_size() -> usize {
    1024
}
fn default_max_data_size() -> usize {
    default_max_field_size() * default_max_pairs() * 2
}
fn default_unknown_key() -> char {
    '?'
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
        }
    }
}

fn default_store_url() -> String {
    "sqlite:./data/capture.sqlite".to_string()
}
fn default_collection() -> String {
    "log.useractions".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    /// Sleep after finding the ordering list empty.
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_secs: u64,
    /// Delay after every iteration, whatever the outcome.
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idle_sleep_secs: default_idle_sleep(),
            poll_delay_ms: default_poll_delay(),
        }
    }
}

fn default_idle_sleep() -> u64 {
    3
}
fn default_poll_delay() -> u64 {
    10
}

/// Flat-format keys and the `section.field` each one sets.
const FLAT_KEYS: &[(&str, &str, &str, FlatKind)] = &[
    ("HTTP_ADDRESS", "server", "http_address", FlatKind::Text),
    ("HTTP_PORT", "server", "http_port", FlatKind::Integer),
    ("REDIS_ADDRESS", "broker", "address", FlatKind::Text),
    ("REDIS_PORT", "broker", "port", FlatKind::Integer),
    ("REDIS_TIMEOUT", "broker", "timeout_secs", FlatKind::Integer),
    ("RECONNECT_WAIT", "broker", "reconnect_wait_secs", FlatKind::Integer),
    ("QUEUE_LIST", "broker", "list_key", FlatKind::Text),
    ("MAX_PAIRS", "capture", "max_pairs", FlatKind::Integer),
    ("MAX_FIELD_SIZE", "capture", "max_field_size", FlatKind::Integer),
    ("MAX_DATA_SIZE", "capture", "max_data_size", FlatKind::Integer),
    ("UNKNOWN_USER_CHAR", "capture", "unknown_key", FlatKind::Char),
    ("STORE_URL", "store", "url", FlatKind::Text),
    ("STORE_COLLECTION", "store", "collection", FlatKind::Text),
    ("MONGODB_COLLECTION", "store", "collection", FlatKind::Text),
    ("NO_RESULTS_SLEEP", "transfer", "idle_sleep_secs", FlatKind::Integer),
    ("POLL_DELAY_MS", "transfer", "poll_delay_ms", FlatKind::Integer),
];

#[derive(Debug, Clone, Copy)]
enum FlatKind {
    Text,
    Integer,
    Char,
}

/// Loads and validates a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let config = if is_toml {
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        parse_flat(&content)?
    };

    validate(&config)?;
    Ok(config)
}

/// Parses the flat `KEY VALUE` format.
pub fn parse_flat(content: &str) -> Result<Config> {
    let mut root = Table::new();

    for (lineno, line) in content.lines().enumerate() {
        if line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(key), Some(raw)) = (parts.next(), parts.next()) else {
            continue;
        };

        let Some(&(_, section, field, kind)) = FLAT_KEYS.iter().find(|(k, ..)| *k == key) else {
            tracing::warn!(line = lineno + 1, key, "ignoring unknown config key");
            continue;
        };

        let value = match kind {
            FlatKind::Text => Value::String(raw.to_string()),
            FlatKind::Integer => Value::Integer(raw.parse::<i64>().with_context(|| {
                format!("line {}: {} expects an integer, got '{}'", lineno + 1, key, raw)
            })?),
            FlatKind::Char => Value::String(raw.chars().take(1).collect()),
        };

        let section = root
            .entry(section)
            .or_insert(Value::Table(Table::new()));
        if let Value::Table(table) = section {
            table.insert(field.to_string(), value);
        }
    }

    Value::Table(root)
        .try_into()
        .with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.capture.max_pairs == 0 {
        anyhow::bail!("capture.max_pairs must be >= 1");
    }
    if config.capture.max_field_size < 2 {
        anyhow::bail!("capture.max_field_size must be >= 2");
    }
    if config.capture.max_data_size < 2 {
        anyhow::bail!("capture.max_data_size must be >= 2");
    }
    if config.broker.list_key.is_empty() {
        anyhow::bail!("broker.list_key must not be empty");
    }
    if config.broker.reconnect_wait_secs == 0 {
        anyhow::bail!("broker.reconnect_wait_secs must be >= 1");
    }
    if config.broker.timeout_secs == 0 {
        anyhow::bail!("broker.timeout_secs must be >= 1");
    }
    if config.store.collection.is_empty() {
        anyhow::bail!("store.collection must not be empty");
    }
    Ok(())
}
