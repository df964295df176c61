use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub version: Option<String>,
    /// Capture source identifiers: device names, or `file:<path>` for replay.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Public suffix list on disk; the copy built into the binary is used when unset.
    #[serde(default)]
    pub public_suffix_list: Option<PathBuf>,
    /// Pause before waiting on capture tasks at startup.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    /// libpcap filter expression.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
    #[serde(default = "default_true")]
    pub promiscuous: bool,
    #[serde(default = "default_true")]
    pub immediate_mode: bool,
    /// Longest a live read blocks before the capture loop checks for shutdown.
    #[serde(default = "default_capture_read_timeout_ms")]
    pub read_timeout_ms: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    /// Flush once this many events are pending.
    #[serde(default = "default_count_threshold")]
    pub count_threshold: usize,
    /// Flush when an event arrives and this long has passed since the last flush.
    #[serde(default = "default_time_threshold_ms")]
    pub time_threshold_ms: u64,
    /// Capacity of the event channel between sources and the accumulator.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Bulk insert into ClickHouse over its HTTP interface.
    #[serde(rename = "clickhouse")]
    ClickHouse(ClickHouseConfig),
    /// JSON lines on stdout.
    Stdout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// Environment variable holding the password; never read from the file.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_true")]
    pub provision_schema: bool,
    /// Table engine clause used when provisioning.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Timezone of the `timestamp` column.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            version: None,
            sources: default_sources(),
            capture: CaptureSettings::default(),
            batch: BatchSettings::default(),
            cache: CacheSettings::default(),
            public_suffix_list: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            snaplen: default_snaplen(),
            promiscuous: true,
            immediate_mode: true,
            read_timeout_ms: default_capture_read_timeout_ms(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            count_threshold: default_count_threshold(),
            time_threshold_ms: default_time_threshold_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::ClickHouse(ClickHouseConfig::default())
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_database(),
            table: default_table(),
            user: default_user(),
            password_env: default_password_env(),
            provision_schema: true,
            engine: default_engine(),
            timezone: default_timezone(),
            retention_hours: default_retention_hours(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl BatchSettings {
    pub fn time_threshold(&self) -> Duration {
        Duration::from_millis(self.time_threshold_ms)
    }
}

impl LoggerConfig {
    pub fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.cache.capacity).context("cache.capacity must be greater than 0")
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("at least one capture source is required");
        }
        if self.sources.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("capture source names cannot be empty");
        }
        if self.batch.count_threshold == 0 {
            anyhow::bail!("batch.count_threshold must be greater than 0");
        }
        if self.batch.channel_capacity == 0 {
            anyhow::bail!("batch.channel_capacity must be greater than 0");
        }
        self.cache_capacity()?;
        if self.capture.snaplen <= 0 {
            anyhow::bail!("capture.snaplen must be greater than 0");
        }
        if self.capture.read_timeout_ms <= 0 {
            anyhow::bail!("capture.read_timeout_ms must be greater than 0");
        }
        if let SinkConfig::ClickHouse(ch) = &self.sink {
            if !ch.url.starts_with("http://") && !ch.url.starts_with("https://") {
                anyhow::bail!("sink.url must start with http:// or https://: {:?}", ch.url);
            }
            let ident_ok = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !ident_ok(&ch.database) || !ident_ok(&ch.table) {
                anyhow::bail!("sink.database and sink.table must be plain identifiers");
            }
            if !ident_ok(&ch.engine) {
                anyhow::bail!("sink.engine must be a plain engine name: {:?}", ch.engine);
            }
            // IANA names such as Australia/Melbourne, UTC or Etc/GMT+10
            let tz_ok = !ch.timezone.is_empty()
                && ch
                    .timezone
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'));
            if !tz_ok {
                anyhow::bail!("sink.timezone is not a valid timezone name: {:?}", ch.timezone);
            }
            if ch.retention_hours == 0 {
                anyhow::bail!("sink.retention_hours must be greater than 0");
            }
        }
        Ok(())
    }
}

/// Reads and validates the config file; a missing file means all defaults.
pub fn load_config(path: &Path) -> Result<LoggerConfig> {
    let cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse config file: {}", path.display()))?
    } else {
        info!(target = "config", path = %path.display(), "config file not found, using defaults");
        LoggerConfig::default()
    };

    if let Some(version) = cfg.version.as_ref() {
        info!(target = "config", version = %version, "config loaded");
    }

    cfg.validate()
        .with_context(|| format!("validate config: {}", path.display()))?;
    Ok(cfg)
}


fn default_sources() -> Vec<String> {
    vec!["eth1".to_string(), "eth2".to_string()]
}

fn default_filter() -> String {
    "dst port 53".to_string()
}

fn default_snaplen() -> i32 {
    1600
}

fn default_capture_read_timeout_ms() -> i32 {
    250
}

fn default_true() -> bool {
    true
}

fn default_count_threshold() -> usize {
    100_000
}

fn default_time_threshold_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    100_000
}

fn default_cache_capacity() -> usize {
    1_000_000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_clickhouse_url() -> String {
    "http://dns-traffic-ch:8123".to_string()
}

fn default_database() -> String {
    "dns_traffic".to_string()
}

fn default_table() -> String {
    "dns_queries".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_password_env() -> String {
    "DNS_TRAFFIC_DB_PASS".to_string()
}

fn default_engine() -> String {
    "MergeTree".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_retention_hours() -> u32 {
    6
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    20_000
}
