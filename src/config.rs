use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::http::parser::Limits;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Runtime configuration, read from YAML.
///
/// Every section and field is optional; missing values take the defaults
/// below. `LISTEN` in the environment overrides `server.listen_addr`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
    pub tls: Option<TlsConfig>,
    pub logging: LoggingConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub receive_timeout_ms: u64,
    pub receive_retry_budget: u32,
    pub idle_timeout_ms: u64,
    pub accept_timeout_ms: u64,
    pub max_concurrent_connections: usize,
    /// Serve each connection on its own task. Off by default.
    pub per_connection_tasks: bool,
    pub handshake_timeout_ms: u64,
    pub send_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            max_header_size: 8192,
            max_body_size: 16384,
            receive_timeout_ms: 1000,
            receive_retry_budget: 5,
            idle_timeout_ms: 5000,
            accept_timeout_ms: 1000,
            max_concurrent_connections: 1,
            per_connection_tasks: false,
            handshake_timeout_ms: 10_000,
            send_chunk_size: 1460,
        }
    }
}

impl ServerConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            retry_budget: self.receive_retry_budget.max(1),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub lock_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { lock_timeout_ms: 1000 }
    }
}

impl RouterConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub queue_depth: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { queue_depth: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: String,
    pub upload_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data".to_string(),
            upload_dir: "uploads".to_string(),
        }
    }
}

/// PEM files for the server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Settings of the bundled demo application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bearer token required by the mutating program routes; open when unset
    pub api_token: Option<String>,
    pub programs_path: String,
    pub heartbeat_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            programs_path: "/programs.json".to_string(),
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl Config {
    /// Load from the file named by `PICO_CONFIG`, or defaults when unset.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("PICO_CONFIG") {
            Ok(path) => Self::load_from(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            config.server.listen_addr = listen;
        }

        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
