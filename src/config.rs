//! # Configuration Management
//!
//! Centralized configuration for the gateway.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides (`OPENWIRE_GATEWAY_*`)
//!
//! ## Example
//! ```toml
//! [server]
//! address = "0.0.0.0:61616"
//!
//! [detection]
//! max_buffer_size = 4096
//! timeout = 5000
//!
//! [[detection.protocols]]
//! protocol = "openwire"
//!
//! [[detection.protocols]]
//! protocol = "amqp"
//! prefix = "AMQP"
//! ```
//! An empty `protocols` list registers every built-in signature. An entry
//! with neither `prefix` nor `regex` selects the built-in signature of that
//! protocol.

use crate::detecting::signature::{self, Signature};
use crate::error::{ProtocolError, Result};
use crate::openwire::cache::MAX_CACHE_SIZE;
use crate::openwire::registry::MAX_SUPPORTED_VERSION;
use crate::openwire::wire_format::{WireOptions, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default OpenWire listener port
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:61616";

/// Default cap on bytes buffered while detecting a protocol
pub const DEFAULT_DETECTION_BUFFER: usize = 4096;

/// Default detection inactivity timeout
pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    /// Wire options the gateway prefers when negotiating OpenWire sessions
    #[serde(default)]
    pub openwire: OpenWireConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Malformed gateway TOML: {e}")))
    }

    /// Defaults overridden by `OPENWIRE_GATEWAY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup; unparsable values are errors
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value.trim().parse::<T>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid value for {key}: '{value}'"))
            })
        }

        if let Some(addr) = lookup("OPENWIRE_GATEWAY_SERVER_ADDRESS") {
            self.server.address = addr;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_MAX_CONNECTIONS") {
            self.server.max_connections = parse("OPENWIRE_GATEWAY_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_DETECTION_BUFFER") {
            self.detection.max_buffer_size = parse("OPENWIRE_GATEWAY_DETECTION_BUFFER", &v)?;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_DETECTION_TIMEOUT_MS") {
            self.detection.timeout =
                Duration::from_millis(parse("OPENWIRE_GATEWAY_DETECTION_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_TIGHT_ENCODING") {
            self.openwire.tight_encoding = parse("OPENWIRE_GATEWAY_TIGHT_ENCODING", &v)?;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_CACHE_ENABLED") {
            self.openwire.cache_enabled = parse("OPENWIRE_GATEWAY_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_CACHE_SIZE") {
            self.openwire.cache_size = parse("OPENWIRE_GATEWAY_CACHE_SIZE", &v)?;
        }
        if let Some(v) = lookup("OPENWIRE_GATEWAY_LOG_LEVEL") {
            self.logging.log_level = parse("OPENWIRE_GATEWAY_LOG_LEVEL", &v)?;
        }
        Ok(())
    }

    /// Defaults with a closure applied, handy in tests
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The defaults rendered as TOML, a starting point for a config file
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot render config: {e}")))?;
        std::fs::write(path.as_ref(), rendered).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.as_ref().display()))
        })
    }

    /// Every problem found, across all sections. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.detection.validate());
        errors.extend(self.openwire.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// [`validate`](Self::validate) folded into a single `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            problems.join("\n  - ")
        )))
    }
}

/// TCP front end configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub address: String,

    /// Capacity of the per-connection outbound frame queue
    pub backpressure_limit: usize,

    /// Bytes read from a socket per call
    pub read_buffer_size: usize,

    /// How long shutdown waits for open connections to finish
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Sockets accepted beyond this many open connections are dropped
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            backpressure_limit: 32,
            read_buffer_size: 8 * 1024,
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.address.as_str() {
            "" => problems.push("Server address cannot be empty".to_string()),
            addr if addr.parse::<SocketAddr>().is_err() => {
                problems.push(format!("Invalid server address '{addr}', expected host:port"))
            }
            _ => {}
        }

        if !(1..=1_000_000).contains(&self.backpressure_limit) {
            problems.push(format!(
                "Outbound queue capacity {} outside 1-1000000",
                self.backpressure_limit
            ));
        }
        if self.read_buffer_size < 64 {
            problems.push(format!(
                "Read buffer of {} bytes is below the 64 byte minimum",
                self.read_buffer_size
            ));
        }
        if !(1..=60).contains(&self.shutdown_timeout.as_secs()) {
            problems.push(format!(
                "Shutdown timeout {:?} outside 1s-60s",
                self.shutdown_timeout
            ));
        }
        if !(1..=100_000).contains(&self.max_connections) {
            problems.push(format!(
                "Max connections {} outside 1-100000",
                self.max_connections
            ));
        }

        problems
    }
}

/// Protocol detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    /// Bytes buffered without a match before the connection is rejected
    pub max_buffer_size: usize,

    /// Inactivity timeout while buffering
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Signatures in priority order
    #[serde(default)]
    pub protocols: Vec<SignatureConfig>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_DETECTION_BUFFER,
            timeout: DEFAULT_DETECTION_TIMEOUT,
            protocols: Vec::new(),
        }
    }
}

impl DetectionConfig {
    /// Compile the configured signatures, or the built-ins when none are listed
    pub fn signatures(&self) -> Result<Vec<Signature>> {
        if self.protocols.is_empty() {
            return signature::builtin_signatures();
        }
        self.protocols.iter().map(SignatureConfig::build).collect()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_buffer_size == 0 {
            errors.push("Detection buffer size must be greater than 0".to_string());
        } else if self.max_buffer_size > 1024 * 1024 {
            errors.push(format!(
                "Detection buffer too large: {} bytes (maximum: 1 MB)",
                self.max_buffer_size
            ));
        }

        if self.timeout.as_millis() < 10 {
            errors.push("Detection timeout too short (minimum: 10ms)".to_string());
        } else if self.timeout.as_secs() > 300 {
            errors.push("Detection timeout too long (maximum: 300s)".to_string());
        }

        for sig in &self.protocols {
            match sig.build() {
                Ok(built) if built.min_bytes() > self.max_buffer_size => errors.push(format!(
                    "Signature '{}' needs {} bytes, more than the detection buffer holds",
                    sig.protocol,
                    built.min_bytes()
                )),
                Ok(_) => {}
                Err(e) => errors.push(format!("Signature '{}': {e}", sig.protocol)),
            }
        }

        errors
    }
}

/// One registered protocol signature
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SignatureConfig {
    pub protocol: String,

    /// Literal prefix (UTF-8 bytes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Byte regex anchored at the start of the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Bytes required before a regex verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<usize>,
}

impl SignatureConfig {
    pub fn build(&self) -> Result<Signature> {
        match (&self.prefix, &self.regex) {
            (Some(_), Some(_)) => Err(ProtocolError::ConfigError(format!(
                "Signature '{}' sets both prefix and regex",
                self.protocol
            ))),
            (Some(prefix), None) => Signature::prefix(&self.protocol, prefix.as_bytes()),
            (None, Some(regex)) => {
                let min_bytes = self.min_bytes.ok_or_else(|| {
                    ProtocolError::ConfigError(format!(
                        "Regex signature '{}' requires min_bytes",
                        self.protocol
                    ))
                })?;
                Signature::regex(&self.protocol, regex, min_bytes)
            }
            (None, None) => signature::builtin(&self.protocol),
        }
    }
}

/// Wire options the gateway advertises in its `WireFormatInfo`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenWireConfig {
    pub version: u32,
    pub tight_encoding: bool,
    pub cache_enabled: bool,
    pub cache_size: usize,
    pub stack_trace_enabled: bool,
    pub size_prefix_disabled: bool,
    pub tcp_no_delay: bool,
    pub max_frame_size: usize,

    #[serde(with = "duration_serde")]
    pub max_inactivity_duration: Duration,

    #[serde(with = "duration_serde")]
    pub max_inactivity_initial_delay: Duration,
}

impl Default for OpenWireConfig {
    fn default() -> Self {
        let preferred = WireOptions::preferred();
        Self {
            version: preferred.version,
            tight_encoding: preferred.tight_encoding,
            cache_enabled: preferred.cache_enabled,
            cache_size: preferred.cache_size,
            stack_trace_enabled: preferred.stack_trace_enabled,
            size_prefix_disabled: preferred.size_prefix_disabled,
            tcp_no_delay: preferred.tcp_no_delay,
            max_frame_size: preferred.max_frame_size,
            max_inactivity_duration: Duration::from_millis(
                preferred.max_inactivity_duration as u64,
            ),
            max_inactivity_initial_delay: Duration::from_millis(
                preferred.max_inactivity_initial_delay as u64,
            ),
        }
    }
}

impl OpenWireConfig {
    pub fn wire_options(&self) -> WireOptions {
        WireOptions {
            version: self.version,
            tight_encoding: self.tight_encoding,
            cache_enabled: self.cache_enabled,
            cache_size: self.cache_size,
            size_prefix_disabled: self.size_prefix_disabled,
            stack_trace_enabled: self.stack_trace_enabled,
            tcp_no_delay: self.tcp_no_delay,
            max_frame_size: self.max_frame_size,
            max_inactivity_duration: self.max_inactivity_duration.as_millis() as i64,
            max_inactivity_initial_delay: self.max_inactivity_initial_delay.as_millis() as i64,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.version == 0 || self.version > MAX_SUPPORTED_VERSION {
            errors.push(format!(
                "Unsupported OpenWire version: {} (supported: 1-{MAX_SUPPORTED_VERSION})",
                self.version
            ));
        }

        if self.cache_size == 0 || self.cache_size > MAX_CACHE_SIZE {
            errors.push(format!(
                "Invalid cache size: {} (valid range: 1-{MAX_CACHE_SIZE})",
                self.cache_size
            ));
        }

        if self.size_prefix_disabled {
            errors.push("The stream codec requires the size prefix".to_string());
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > DEFAULT_MAX_FRAME_SIZE {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 100 MB)",
                self.max_frame_size
            ));
        }

        errors
    }
}

/// Where and how the gateway logs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Recorded once when logging starts
    pub app_name: String,

    /// Used when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Log to stderr
    pub log_to_console: bool,
    pub log_to_file: bool,
    /// Appended to; required with `log_to_file`
    pub log_file_path: Option<String>,
    /// One JSON object per event instead of the human-readable format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("openwire-gateway"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.app_name.is_empty() || self.app_name.len() > 64 {
            problems.push("Application name cannot be empty or longer than 64 bytes".to_string());
        }

        match (self.log_to_file, self.log_file_path.as_deref()) {
            (true, None) => problems.push("File logging needs log_file_path".to_string()),
            (true, Some(path)) => {
                let dir = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty());
                if let Some(dir) = dir.filter(|d| !d.exists()) {
                    problems.push(format!("Log directory {} does not exist", dir.display()));
                }
            }
            (false, _) => {}
        }

        if !self.log_to_console && !self.log_to_file {
            problems.push("At least one logging output must be enabled".to_string());
        }

        problems
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as a lowercase string
mod log_level_serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("unknown log level '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.detection.signatures().unwrap().len(), 5);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENWIRE_GATEWAY_SERVER_ADDRESS", "0.0.0.0:5000"),
            ("OPENWIRE_GATEWAY_DETECTION_TIMEOUT_MS", "250"),
            ("OPENWIRE_GATEWAY_TIGHT_ENCODING", "false"),
            ("OPENWIRE_GATEWAY_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = GatewayConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.address, "0.0.0.0:5000");
        assert_eq!(config.detection.timeout, Duration::from_millis(250));
        assert!(!config.openwire.tight_encoding);
        assert_eq!(config.logging.log_level, Level::DEBUG);

        let err = config
            .apply_env(|k| (k == "OPENWIRE_GATEWAY_CACHE_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigError(_)));
    }

    #[test]
    fn test_signature_entries() {
        let builtin = SignatureConfig {
            protocol: "mqtt".into(),
            prefix: None,
            regex: None,
            min_bytes: None,
        };
        assert_eq!(builtin.build().unwrap().protocol(), "mqtt");

        let both = SignatureConfig {
            protocol: "x".into(),
            prefix: Some("A".into()),
            regex: Some("A".into()),
            min_bytes: Some(1),
        };
        assert!(both.build().is_err());

        let no_min = SignatureConfig {
            protocol: "x".into(),
            prefix: None,
            regex: Some("A".into()),
            min_bytes: None,
        };
        assert!(no_min.build().is_err());
    }

    #[test]
    fn test_openwire_preferences_map_to_wire_options() {
        let options = OpenWireConfig::default().wire_options();
        assert_eq!(options, WireOptions::preferred());
    }
}
