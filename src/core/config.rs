use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub throttling: ThrottlingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Address other peers should dial; defaults to `bind_address`
    pub advertise_address: Option<String>,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Key for the admin endpoints; admin routes refuse everything when unset
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout: i64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReputationConfig {
    #[serde(default = "default_decay_interval")]
    pub decay_interval: u64,
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold: i64,
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottlingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: u32,
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    #[serde(default = "default_leecher_bandwidth")]
    pub leecher_bandwidth: u64,
    #[serde(default = "default_normal_bandwidth")]
    pub normal_bandwidth: u64,
    #[serde(default = "default_premium_bandwidth")]
    pub premium_bandwidth: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

// Default value functions
fn default_node_name() -> String {
    "knowledge-exchange".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_peer_port() -> u16 {
    9000
}

fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_peer_timeout() -> i64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_event_queue_size() -> usize {
    100
}

fn default_subscriber_queue_size() -> usize {
    10
}

fn default_decay_interval() -> u64 {
    3600 // 1 hour
}

fn default_inactivity_threshold() -> i64 {
    24 * 3600
}

fn default_true() -> bool {
    true
}

fn default_bucket_capacity() -> u32 {
    10
}

fn default_refill_interval_ms() -> u64 {
    100
}

fn default_leecher_bandwidth() -> u64 {
    50 * 1024 // 50 KiB/s
}

fn default_normal_bandwidth() -> u64 {
    500 * 1024 // 500 KiB/s
}

fn default_premium_bandwidth() -> u64 {
    5 * 1024 * 1024 // 5 MiB/s
}

fn default_chunk_size() -> usize {
    32 * 1024
}

fn default_max_concurrent() -> usize {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    30
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("data/shared")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_allowed_types() -> Vec<String> {
    [
        ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".txt", ".md", ".epub", ".odt", ".xls", ".xlsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            cleanup_interval: default_cleanup_interval(),
            peer_timeout: default_peer_timeout(),
            probe_timeout: default_probe_timeout(),
            event_queue_size: default_event_queue_size(),
            subscriber_queue_size: default_subscriber_queue_size(),
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            decay_interval: default_decay_interval(),
            inactivity_threshold: default_inactivity_threshold(),
            event_queue_size: default_event_queue_size(),
        }
    }
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_capacity: default_bucket_capacity(),
            refill_interval_ms: default_refill_interval_ms(),
            leecher_bandwidth: default_leecher_bandwidth(),
            normal_bandwidth: default_normal_bandwidth(),
            premium_bandwidth: default_premium_bandwidth(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent: default_max_concurrent(),
            connect_timeout: default_connect_timeout(),
            io_timeout: default_io_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            download_dir: default_download_dir(),
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

impl ServerConfig {
    /// Address advertised to other peers
    pub fn public_address(&self) -> &str {
        self.advertise_address.as_deref().unwrap_or(&self.bind_address)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            bail!("http_port must be greater than 0");
        }

        if self.server.http_port == self.server.peer_port {
            bail!(
                "http_port and peer_port must differ (both set to {})",
                self.server.http_port
            );
        }

        if self.server.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        if self.server.node_name.trim().is_empty() {
            bail!("node_name must not be empty");
        }

        // Discovery
        if self.discovery.heartbeat_interval == 0 {
            bail!("heartbeat_interval must be greater than 0");
        }

        if self.discovery.cleanup_interval == 0 {
            bail!("cleanup_interval must be greater than 0");
        }

        if self.discovery.peer_timeout <= self.discovery.heartbeat_interval as i64 {
            bail!(
                "peer_timeout ({}) must be greater than heartbeat_interval ({})",
                self.discovery.peer_timeout,
                self.discovery.heartbeat_interval
            );
        }

        if self.discovery.event_queue_size == 0 || self.discovery.subscriber_queue_size == 0 {
            bail!("discovery queue sizes must be greater than 0");
        }

        // Reputation
        if self.reputation.decay_interval == 0 {
            bail!("decay_interval must be greater than 0");
        }

        if self.reputation.inactivity_threshold <= 0 {
            bail!("inactivity_threshold must be greater than 0");
        }

        if self.reputation.event_queue_size == 0 {
            bail!("reputation event_queue_size must be greater than 0");
        }

        // Throttling
        if self.throttling.bucket_capacity == 0 {
            bail!("bucket_capacity must be greater than 0");
        }

        if self.throttling.refill_interval_ms == 0 {
            bail!("refill_interval_ms must be greater than 0");
        }

        let bandwidths = [
            self.throttling.leecher_bandwidth,
            self.throttling.normal_bandwidth,
            self.throttling.premium_bandwidth,
        ];
        if bandwidths.iter().any(|b| *b < self.throttling.bucket_capacity as u64) {
            bail!("tier bandwidths must be at least bucket_capacity bytes per second");
        }

        if !(bandwidths[0] <= bandwidths[1] && bandwidths[1] <= bandwidths[2]) {
            bail!("tier bandwidths must be ordered leecher <= normal <= premium");
        }

        // Transfer
        if self.transfer.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        if self.transfer.max_concurrent == 0 {
            bail!("max_concurrent must be greater than 0");
        }

        if self.transfer.connect_timeout == 0 || self.transfer.io_timeout == 0 {
            bail!("transfer timeouts must be greater than 0");
        }

        if self.transfer.max_message_size < 1024 {
            bail!("max_message_size must be at least 1024 bytes");
        }

        // Library
        if self.library.max_file_size == 0 {
            bail!("max_file_size must be greater than 0");
        }

        if self.library.allowed_types.is_empty() {
            bail!("allowed_types must not be empty");
        }

        if let Some(bad) = self.library.allowed_types.iter().find(|t| !t.starts_with('.')) {
            bail!("Invalid file type '{}'. Types must start with '.'", bad);
        }

        // Logging
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        http_port = 8080
        peer_port = 9000
        num_threads = 2
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).expect("Failed to parse config");

        assert_eq!(config.discovery.heartbeat_interval, 10);
        assert_eq!(config.discovery.peer_timeout, 30);
        assert_eq!(config.discovery.cleanup_interval, 60);
        assert_eq!(config.reputation.decay_interval, 3600);
        assert_eq!(config.throttling.bucket_capacity, 10);
        assert_eq!(config.throttling.leecher_bandwidth, 50 * 1024);
        assert_eq!(config.transfer.chunk_size, 32 * 1024);
        assert_eq!(config.transfer.max_concurrent, 5);
        assert_eq!(config.library.max_file_size, 100 * 1024 * 1024);
        assert!(config.library.allowed_types.contains(&".pdf".to_string()));
        assert!(config.server.api_key.is_none());
        assert_eq!(config.server.public_address(), "0.0.0.0");
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = Config::from_file(&path).expect("Failed to load config.example.toml");

        assert_eq!(config.server.public_address(), "127.0.0.1");
        assert_eq!(config.logging.format, "console");
    }

    #[test]
    fn test_rejects_same_ports() {
        let toml = r#"
            [server]
            http_port = 9000
            peer_port = 9000
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_rejects_timeout_below_heartbeat() {
        let toml = r#"
            [server]
            http_port = 8080

            [discovery]
            heartbeat_interval = 30
            peer_timeout = 30
        "#;
        let err = Config::parse(toml).unwrap_err();
        assert!(err.to_string().contains("peer_timeout"));
    }

    #[test]
    fn test_rejects_unordered_bandwidths() {
        let toml = r#"
            [server]
            http_port = 8080

            [throttling]
            leecher_bandwidth = 1000000
            normal_bandwidth = 1000
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_file_type() {
        let toml = r#"
            [server]
            http_port = 8080

            [library]
            allowed_types = ["pdf"]
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let toml = r#"
            [server]
            http_port = 8080

            [logging]
            level = "verbose"
        "#;
        assert!(Config::parse(toml).is_err());
    }
}
