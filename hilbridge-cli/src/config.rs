//! Configuration file support for hilbridge.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HILBRIDGE_*)
//! 3. Local config file (./hilbridge.toml)
//! 4. Global config file (~/.config/hilbridge/config.toml)

use directories::ProjectDirs;
use hilbridge::{ClientConfig, Endpoint, FamilyEndpoints, ProtocolFamily, StreamConfig};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "hilbridge.toml";

/// Instrument endpoints of one protocol family.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Instrument host.
    pub host: Option<String>,
    /// Port configuration messages are sent to.
    pub send_port: Option<u16>,
    /// Port the instrument connects back to.
    pub receive_port: Option<u16>,
}

/// Request/response transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Connect timeout per attempt, in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Response timeout, in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Number of connect attempts.
    pub max_retries: Option<usize>,
    /// Delay between connect attempts, in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Pause between write and read, in milliseconds.
    pub settle_delay_ms: Option<u64>,
    /// Pause before the first connect attempt, in milliseconds.
    pub warmup_delay_ms: Option<u64>,
}

/// Streaming response settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSettings {
    /// Idle timeout, in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Response size cap in bytes.
    pub max_response_bytes: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// UART instrument endpoints.
    #[serde(default)]
    pub uart: EndpointConfig,
    /// I2C instrument endpoints.
    #[serde(default)]
    pub i2c: EndpointConfig,
    /// Transport client settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Streaming worker settings.
    #[serde(default)]
    pub stream: StreamSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hilbridge").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Values set in `other` win.
    fn merge(&mut self, other: Self) {
        self.uart.merge(other.uart);
        self.i2c.merge(other.i2c);

        let (t, o) = (&mut self.transport, other.transport);
        overlay(&mut t.connect_timeout_ms, o.connect_timeout_ms);
        overlay(&mut t.response_timeout_ms, o.response_timeout_ms);
        overlay(&mut t.max_retries, o.max_retries);
        overlay(&mut t.retry_delay_ms, o.retry_delay_ms);
        overlay(&mut t.settle_delay_ms, o.settle_delay_ms);
        overlay(&mut t.warmup_delay_ms, o.warmup_delay_ms);

        overlay(&mut self.stream.response_timeout_ms, other.stream.response_timeout_ms);
        overlay(&mut self.stream.max_response_bytes, other.stream.max_response_bytes);
    }

    /// Endpoints for `family`: built-in defaults, then this file, then the
    /// command-line `host` and `send_port` overrides.
    pub fn endpoints(
        &self,
        family: ProtocolFamily,
        host: Option<&str>,
        send_port: Option<u16>,
    ) -> FamilyEndpoints {
        let mut endpoints = FamilyEndpoints::defaults(family);
        let section = match family {
            ProtocolFamily::Uart => &self.uart,
            ProtocolFamily::I2c => &self.i2c,
        };

        if let Some(host) = host.or(section.host.as_deref()) {
            endpoints = endpoints.with_host(host);
        }
        if let Some(port) = send_port.or(section.send_port) {
            endpoints.send = Endpoint::new(endpoints.send.host, port);
        }
        if let Some(port) = section.receive_port {
            endpoints.receive = Endpoint::new(endpoints.receive.host, port);
        }
        endpoints
    }

    /// Transport client configuration with file overrides applied.
    pub fn client_config(&self) -> ClientConfig {
        let t = &self.transport;
        let mut config = ClientConfig::default();
        if let Some(ms) = t.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = t.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = t.max_retries {
            config = config.with_max_retries(retries);
        }
        if let Some(ms) = t.retry_delay_ms {
            config = config.with_retry_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = t.settle_delay_ms {
            config = config.with_settle_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = t.warmup_delay_ms {
            config = config.with_warmup_delay(Duration::from_millis(ms));
        }
        config
    }

    /// Streaming configuration with file overrides applied.
    pub fn stream_config(&self) -> StreamConfig {
        let mut config = StreamConfig::default();
        if let Some(ms) = self.transport.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.stream.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = self.stream.max_response_bytes {
            config = config.with_max_response_bytes(max);
        }
        config
    }
}

impl EndpointConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.host, other.host);
        overlay(&mut self.send_port, other.send_port);
        overlay(&mut self.receive_port, other.receive_port);
    }
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
