//! Configuration for auction-daemon

use auction_engine::EngineConfig;
use auction_types::Amount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Deadline poller
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// Opening balances handed to the engine's balance source
    #[serde(default)]
    pub balances: BalanceConfig,

    #[serde(default)]
    pub sealing: SealingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8088)),
            enable_cors: true,
        }
    }
}

/// Deadline poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between deadline sweeps
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Run the poller inside the daemon. Disable when an external
    /// scheduler drives `/deadlines/poll` instead.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            enabled: true,
        }
    }
}

/// Balance snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Balance for bidders without an explicit entry
    #[serde(default = "default_balance")]
    pub default_balance: Amount,

    /// Per-bidder opening balances
    #[serde(default)]
    pub bidders: HashMap<String, Amount>,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            default_balance: default_balance(),
            bidders: HashMap::new(),
        }
    }
}

/// Sealing secret configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SealingConfig {
    /// Passphrase the sealing keys are derived from. A random one is
    /// generated at startup when unset.
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_balance() -> Amount {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Defaults, then the optional file, then environment variables with
    /// prefix `AUCTION` and separator `__` (`AUCTION__SERVER__LISTEN_ADDR`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AUCTION")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
