//! Session configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or LLCP_CONFIG)
//! 3. Environment variables

use llcp_core::MAILBOX_CAPACITY;
use llcp_protocol::{LocalParameters, Version, MAX_LOCAL_MIUX, MAX_SAP, SAP_LINK_MANAGEMENT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest link timeout expressible in the one-byte LTO parameter.
const MAX_LTO_MS: u32 = 255 * 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parameters both peers advertise.
    pub local: LocalConfig,
    /// What the demo session does.
    pub session: SessionConfig,
}

impl Config {
    /// Loads configuration from `path` (or LLCP_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Load from file if specified
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("LLCP_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = path {
            config = Self::from_file(&path)?;
        }

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.local.apply_env_overrides();
        self.session.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local.validate()?;
        self.session.validate()
    }
}

/// Local link parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub version: Version,
    /// MIU extension over the 128-byte base.
    pub miux: u16,
    /// Link timeout in milliseconds, sent in 10 ms units.
    pub lto_ms: u32,
    /// Receive window.
    pub rw: u8,
    pub opt: u8,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let params = LocalParameters::default();
        Self {
            version: params.version,
            miux: params.miux,
            lto_ms: params.lto_ms(),
            rw: params.rw,
            opt: params.opt,
        }
    }
}

impl LocalConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(miux) = std::env::var("LLCP_MIUX") {
            if let Ok(n) = miux.parse() {
                self.miux = n;
            }
        }

        if let Ok(rw) = std::env::var("LLCP_RW") {
            if let Ok(n) = rw.parse() {
                self.rw = n;
            }
        }

        if let Ok(lto) = std::env::var("LLCP_LTO_MS") {
            if let Ok(ms) = lto.parse() {
                self.lto_ms = ms;
            }
        }

        if let Ok(opt) = std::env::var("LLCP_OPT") {
            if let Ok(n) = opt.parse() {
                self.opt = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.miux > MAX_LOCAL_MIUX {
            return Err(ConfigError::ValidationError(format!(
                "local.miux {} exceeds {} (frame capacity)",
                self.miux, MAX_LOCAL_MIUX
            )));
        }
        if self.rw > 15 {
            return Err(ConfigError::ValidationError(format!(
                "local.rw {} exceeds 15",
                self.rw
            )));
        }
        if self.lto_ms > MAX_LTO_MS {
            return Err(ConfigError::ValidationError(format!(
                "local.lto_ms {} exceeds {}",
                self.lto_ms, MAX_LTO_MS
            )));
        }
        Ok(())
    }

    /// Converts to wire parameters. The well-known service bitmap is filled
    /// in by the engine from its registered services.
    pub fn parameters(&self) -> LocalParameters {
        LocalParameters {
            version: self.version,
            miux: self.miux,
            lto: (self.lto_ms / 10).min(255) as u8,
            rw: self.rw,
            opt: self.opt,
            ..LocalParameters::default()
        }
    }
}

/// Demo session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Service address used on both peers.
    pub service_sap: u8,
    /// Bytes sent from initiator to target and echoed back.
    pub payload_bytes: usize,
    /// Link turns before the session gives up.
    pub max_ticks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_sap: 0x10,
            payload_bytes: 300,
            max_ticks: 256,
        }
    }
}

impl SessionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(sap) = std::env::var("LLCP_SERVICE_SAP") {
            if let Ok(n) = sap.parse() {
                self.service_sap = n;
            }
        }

        if let Ok(bytes) = std::env::var("LLCP_PAYLOAD_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.payload_bytes = n;
            }
        }

        if let Ok(ticks) = std::env::var("LLCP_MAX_TICKS") {
            if let Ok(n) = ticks.parse() {
                self.max_ticks = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_sap == SAP_LINK_MANAGEMENT || self.service_sap > MAX_SAP {
            return Err(ConfigError::ValidationError(format!(
                "session.service_sap must be in 1..={}, got {}",
                MAX_SAP, self.service_sap
            )));
        }
        if self.payload_bytes > MAILBOX_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "session.payload_bytes {} exceeds mailbox capacity {}",
                self.payload_bytes, MAILBOX_CAPACITY
            )));
        }
        if self.max_ticks == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_ticks must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
