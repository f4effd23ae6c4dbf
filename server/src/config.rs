use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ws::heartbeat::HeartbeatConfig;

/// Command-line flags. Every flag is optional so that only the flags
/// actually given override lower config layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "parley-server", version, about = "Presence-aware message relay")]
pub struct Cli {
    /// Port to listen on
    #[arg(long, env = "PARLEY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long, env = "PARLEY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for the database, signing key and uploads
    #[arg(long, env = "PARLEY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Browser origin allowed to call the API with credentials
    #[arg(long, env = "PARLEY_CLIENT_URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_url: Option<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_url: Option<String>,
    /// Heartbeat timing (loaded from [heartbeat] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatSettings>,
}

/// Liveness check timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Milliseconds between pings (default: 5000)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Milliseconds a client has to answer a ping (default: 1000)
    #[serde(default = "default_ack_deadline_ms")]
    pub ack_deadline_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            ack_deadline_ms: default_ack_deadline_ms(),
        }
    }
}

fn default_ping_interval_ms() -> u64 {
    5000
}

fn default_ack_deadline_ms() -> u64 {
    1000
}

impl HeartbeatSettings {
    pub fn to_config(&self) -> Result<HeartbeatConfig, ConfigError> {
        if self.ping_interval_ms == 0 || self.ack_deadline_ms == 0 {
            return Err(ConfigError::ZeroHeartbeat);
        }
        Ok(HeartbeatConfig {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ack_deadline: Duration::from_millis(self.ack_deadline_ms),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
    #[error("heartbeat intervals must be greater than zero")]
    ZeroHeartbeat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4040,
            bind_address: "0.0.0.0".to_string(),
            config: "./parley.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            client_url: None,
            heartbeat: Some(HeartbeatSettings::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(Cli::parse()))
    }

    fn figment(cli: Cli) -> Figment {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.heartbeat_config()?;
        Ok(config)
    }

    pub fn heartbeat_config(&self) -> Result<HeartbeatConfig, ConfigError> {
        self.heartbeat.clone().unwrap_or_default().to_config()
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.data_path().join("uploads")
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Relay Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4040)
# port = 4040

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database, JWT signing key and uploads
# data_dir = "./data"

# Browser origin allowed to call the API with cookies (enables CORS)
# client_url = "http://localhost:5173"

# The JWT signing secret is read from PARLEY_JWT_SECRET when set,
# otherwise from <data_dir>/jwt_secret (generated on first boot).

# ---- Heartbeat ----
# [heartbeat]

# Milliseconds between protocol pings (default: 5000)
# ping_interval_ms = 5000

# Milliseconds a client has to answer a ping before it is dropped (default: 1000)
# ack_deadline_ms = 1000
"#
    .to_string()
}
