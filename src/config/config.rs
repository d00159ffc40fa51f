// src/config/config.rs
use crate::{
    network::TlsDesc,
    pool::{PoolConstructionArgs, SwitcherSettings, WorkQueueSettings},
    types::PowType,
    utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Main configuration structure for the miner's pool side
///
/// Contains the prioritized pool list and the tuning of the switcher,
/// the per-pool work queues and the statistics reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pools in descending priority; the first one is preferred
    pub pools: Vec<PoolConfig>,

    /// Failover timing
    #[serde(default)]
    pub switcher: SwitcherConfig,

    /// Work buffer tuning, shared by all pools
    #[serde(default)]
    pub work_queue: WorkQueueConfig,

    /// Statistics reporting
    #[serde(default)]
    pub stats: StatsConfig,
}

/// One `[[pools]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// `stratum+tcp://host:port`, or `stratum+ssl://` / `stratum+tls://` for TLS
    pub url: String,

    /// Login, usually a wallet address with an optional worker suffix
    pub username: String,

    /// Pool password (default: "x")
    #[serde(default = "default_password")]
    pub password: String,

    /// Pow family mined on this pool
    pub pow_type: PowType,

    /// Protocol name as known to the pool registry (default: "stratum")
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// PEM files with trusted roots for TLS; empty uses the system roots
    #[serde(default)]
    pub cert_files: Vec<PathBuf>,
}

/// The `[switcher]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherConfig {
    /// Seconds between liveness checks (default: 20)
    pub check_interval_secs: u64,
    /// Seconds of silence before a pool counts as dead (default: 60)
    pub dead_after_secs: u64,
    /// Milliseconds to wait when no pool is alive (default: 1000)
    pub no_pool_wait_ms: u64,
}

/// The `[work_queue]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Refill once fewer items are buffered (default: 8)
    pub refill_threshold: usize,
    /// Refill up to this many items (default: 16)
    pub max_length: usize,
    /// Milliseconds a work request may block (default: 100)
    pub pop_timeout_ms: u64,
}

/// The `[stats]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between statistics log lines (default: 60)
    pub report_interval_secs: u64,
}

fn default_password() -> String {
    "x".into()
}

fn default_protocol() -> String {
    "stratum".into()
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        let defaults = SwitcherSettings::default();
        SwitcherConfig {
            check_interval_secs: defaults.check_interval.as_secs(),
            dead_after_secs: defaults.dead_after.as_secs(),
            no_pool_wait_ms: defaults.no_pool_wait.as_millis() as u64,
        }
    }
}

impl SwitcherConfig {
    /// Converts into the switcher's settings
    pub fn settings(&self) -> SwitcherSettings {
        SwitcherSettings {
            check_interval: Duration::from_secs(self.check_interval_secs),
            dead_after: Duration::from_secs(self.dead_after_secs),
            no_pool_wait: Duration::from_millis(self.no_pool_wait_ms),
        }
    }
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        let defaults = WorkQueueSettings::default();
        WorkQueueConfig {
            refill_threshold: defaults.refill_threshold,
            max_length: defaults.max_length,
            pop_timeout_ms: defaults.pop_timeout.as_millis() as u64,
        }
    }
}

impl WorkQueueConfig {
    /// Converts into the work queue's settings
    pub fn settings(&self) -> WorkQueueSettings {
        WorkQueueSettings {
            refill_threshold: self.refill_threshold,
            max_length: self.max_length,
            pop_timeout: Duration::from_millis(self.pop_timeout_ms),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            report_interval_secs: 60,
        }
    }
}

impl StatsConfig {
    /// Interval between statistics log lines
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl PoolConfig {
    /// Builds the construction arguments for this pool
    ///
    /// # Arguments
    /// * `queue` - Work buffer settings to hand to the pool
    ///
    /// # Errors
    /// Returns an error if the URL is malformed, has an unsupported scheme,
    /// or lacks a host or port
    pub fn construction_args(&self, queue: WorkQueueSettings) -> Result<PoolConstructionArgs, MinerError> {
        let url = Url::parse(&self.url)?;
        let tls = match url.scheme() {
            "stratum+tcp" | "stratum" | "tcp" => false,
            "stratum+ssl" | "stratum+tls" | "ssl" | "tls" => true,
            other => {
                return Err(MinerError::ConfigError(format!(
                    "Unsupported scheme '{}' in {}",
                    other, self.url
                )));
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| MinerError::ConfigError(format!("Missing host in {}", self.url)))?;
        let port = url
            .port()
            .ok_or_else(|| MinerError::ConfigError(format!("Missing port in {}", self.url)))?;

        Ok(PoolConstructionArgs {
            host,
            port,
            username: self.username.clone(),
            password: self.password.clone(),
            tls: tls.then(|| TlsDesc {
                cert_files: self.cert_files.clone(),
            }),
            queue,
        })
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints serde cannot express
    ///
    /// # Errors
    /// Returns `MinerError::ConfigError` describing the first violation
    pub fn validate(&self) -> Result<(), MinerError> {
        self.pow_type()?;
        if self.work_queue.refill_threshold == 0 {
            return Err(MinerError::ConfigError("work_queue.refill_threshold must be at least 1".into()));
        }
        if self.work_queue.max_length < self.work_queue.refill_threshold {
            return Err(MinerError::ConfigError(
                "work_queue.max_length must not be below refill_threshold".into(),
            ));
        }
        if self.switcher.check_interval_secs == 0 {
            return Err(MinerError::ConfigError("switcher.check_interval_secs must be at least 1".into()));
        }
        for pool in &self.pools {
            pool.construction_args(self.work_queue.settings())?;
        }
        Ok(())
    }

    /// The pow type shared by all configured pools
    ///
    /// # Errors
    /// Returns `MinerError::ConfigError` if no pool is configured or pools disagree
    pub fn pow_type(&self) -> Result<PowType, MinerError> {
        let first = self
            .pools
            .first()
            .ok_or_else(|| MinerError::ConfigError("At least one [[pools]] entry is required".into()))?;
        match self.pools.iter().find(|p| p.pow_type != first.pow_type) {
            Some(other) => Err(MinerError::ConfigError(format!(
                "All pools must share one pow type, found {} and {}",
                first.pow_type, other.pow_type
            ))),
            None => Ok(first.pow_type),
        }
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `pow_type` - Pow type of the example pools
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(pow_type: PowType) -> String {
        let (port, protocol) = match pow_type {
            PowType::Ethash => (4444, "stratum2"),
            PowType::Cuckatoo31 => (3416, "GrinStratum"),
        };

        let mut template = String::new();
        template.push_str("# GPU Miner Configuration\n\n");
        template.push_str("# Pools in descending priority. Later pools are failover backups.\n");
        template.push_str("[[pools]]\n");
        template.push_str(&format!("url = \"stratum+tcp://pool.example.com:{}\"\n", port));
        template.push_str("username = \"your_wallet_address.worker01\"\n");
        template.push_str("password = \"x\"\n");
        template.push_str("# Supported pow types: ethash, cuckatoo31\n");
        template.push_str(&format!("pow_type = \"{}\"\n", pow_type));
        template.push_str(&format!("protocol = \"{}\"\n\n", protocol));

        template.push_str("[[pools]]\n");
        template.push_str("# stratum+ssl:// or stratum+tls:// enables TLS\n");
        template.push_str(&format!("url = \"stratum+ssl://backup.example.com:{}\"\n", port + 1));
        template.push_str("username = \"your_wallet_address.worker01\"\n");
        template.push_str(&format!("pow_type = \"{}\"\n", pow_type));
        template.push_str("# PEM root certificates; leave empty for the system roots\n");
        template.push_str("cert_files = []\n\n");

        let switcher = SwitcherConfig::default();
        template.push_str("[switcher]\n");
        template.push_str("# Seconds between pool liveness checks\n");
        template.push_str(&format!("check_interval_secs = {}\n", switcher.check_interval_secs));
        template.push_str("# Seconds without a message before a pool is declared dead\n");
        template.push_str(&format!("dead_after_secs = {}\n", switcher.dead_after_secs));
        template.push_str(&format!("no_pool_wait_ms = {}\n\n", switcher.no_pool_wait_ms));

        let queue = WorkQueueConfig::default();
        template.push_str("[work_queue]\n");
        template.push_str(&format!("refill_threshold = {}\n", queue.refill_threshold));
        template.push_str(&format!("max_length = {}\n", queue.max_length));
        template.push_str(&format!("pop_timeout_ms = {}\n\n", queue.pop_timeout_ms));

        template.push_str("[stats]\n");
        template.push_str(&format!("report_interval_secs = {}\n", StatsConfig::default().report_interval_secs));

        template
    }
}
