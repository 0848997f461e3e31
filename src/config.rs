//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub overlay: OverlayConfig,

    #[serde(default)]
    pub sse: SseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS/handshake origins. Empty means accept all origins.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Persistent-socket tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Hub endpoint paths. Each path gets its own manager and registry.
    #[serde(default = "default_ws_paths")]
    pub paths: Vec<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Heartbeat supervisor cycle (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Per-connection keepalive ping envelope interval (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_ws_paths() -> Vec<String> {
    vec!["/ws".to_string()]
}

fn default_max_connections() -> usize {
    1000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_probe_interval() -> u64 {
    25
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            paths: default_ws_paths(),
            max_connections: default_max_connections(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

/// Socket-abstraction overlay tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// A connection silent for longer than this is disconnected (seconds).
    #[serde(default = "default_overlay_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Idle sweep task interval (seconds).
    #[serde(default = "default_overlay_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_overlay_path() -> String {
    "/overlay".to_string()
}

fn default_overlay_idle_timeout() -> u64 {
    90
}

fn default_overlay_sweep_interval() -> u64 {
    30
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            path: default_overlay_path(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_overlay_idle_timeout(),
            sweep_interval_secs: default_overlay_sweep_interval(),
        }
    }
}

/// Server-push stream tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Heartbeat envelope interval keeping proxies from timing out (seconds).
    #[serde(default = "default_sse_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_sse_heartbeat_interval() -> u64 {
    15
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            heartbeat_interval_secs: default_sse_heartbeat_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("courier").join("config.toml")),
            Some(PathBuf::from("/etc/courier/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("COURIER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("COURIER_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(interval) = std::env::var("COURIER_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse() {
                self.websocket.heartbeat_interval_secs = secs;
            }
        }

        if let Ok(level) = std::env::var("COURIER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("COURIER_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            websocket: WebSocketConfig::default(),
            overlay: OverlayConfig::default(),
            sse: SseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Courier Configuration
#
# Environment variables override these settings:
# - COURIER_HOST
# - COURIER_PORT
# - COURIER_HEARTBEAT_INTERVAL_SECS
# - COURIER_LOG_LEVEL
# - COURIER_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 8090

# Allowed handshake origins; empty list accepts all origins
allowed_origins = []

[websocket]
# Hub endpoint paths; each path gets its own manager and registry
paths = ["/ws"]

# Maximum concurrent connections per path
max_connections = 1000

# Heartbeat supervisor cycle (seconds)
heartbeat_interval_secs = 30

# Per-connection keepalive ping interval (seconds)
probe_interval_secs = 25

[overlay]
# Overlay endpoint path
path = "/overlay"

# Maximum concurrent overlay connections
max_connections = 1000

# Disconnect a connection silent for longer than this (seconds)
idle_timeout_secs = 90

# Idle sweep interval (seconds)
sweep_interval_secs = 30

[sse]
# Maximum concurrent streams
max_connections = 1000

# Stream heartbeat interval (seconds)
heartbeat_interval_secs = 15

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
