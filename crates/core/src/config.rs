//! Session configuration
//!
//! Every constant the session consumes, with defaults matching a Vega
//! position sensor streaming 6D tool frames.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CapiError, Result};

pub const FRAME_FREQUENCY_PARAM: &str = "Param.Tracking.Frame Frequency";
pub const TRACK_FREQUENCY_PARAM: &str = "Param.Tracking.Track Frequency";
pub const DEFAULT_TOOL_SROM: &str = "sroms/960-556.rom";
pub const DEFAULT_STREAM_COMMAND: &str = "BX2 --6d=tools";
pub const DEFAULT_STREAM_TAG: &str = "BX2";
pub const DEFAULT_SERVICE_NAME: &str = "_ndi._tcp.local.";
pub const DEFAULT_LOG_TAG: &str = "capi-stream";

/// One named user parameter write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSetting {
    pub name: String,
    pub value: String,
}

impl ParameterSetting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Parameter writes applied after initialize, in order
    pub parameters: Vec<ParameterSetting>,

    /// SROM loaded onto a freshly requested tool port (None skips the request)
    pub tool_srom: Option<String>,

    /// Command string that starts the stream
    pub stream_command: String,

    /// Correlation tag the device stamps on stream packets
    pub stream_tag: String,

    /// Streaming hold, applied before and after the parameter re-read
    pub dwell_ms: u64,

    /// Wait after stop-stream for trailing packets
    pub drain_ms: u64,

    /// Upper bound on mDNS discovery
    pub discovery_timeout_ms: u64,

    /// mDNS service type advertised by devices
    pub service_name: String,

    /// Log every command and reply
    pub log_transit: bool,

    /// Fixed tag printed on every console line
    pub log_tag: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            parameters: vec![
                ParameterSetting::new(FRAME_FREQUENCY_PARAM, "60"),
                ParameterSetting::new(TRACK_FREQUENCY_PARAM, "2"),
            ],
            tool_srom: Some(DEFAULT_TOOL_SROM.to_string()),
            stream_command: DEFAULT_STREAM_COMMAND.to_string(),
            stream_tag: DEFAULT_STREAM_TAG.to_string(),
            dwell_ms: 5_000,
            drain_ms: 1_000,
            discovery_timeout_ms: 5_000,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_transit: false,
            log_tag: DEFAULT_LOG_TAG.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CapiError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_command.trim().is_empty() {
            return Err(CapiError::Config("stream_command must not be empty".into()));
        }
        if self.stream_tag.trim().is_empty() {
            return Err(CapiError::Config("stream_tag must not be empty".into()));
        }
        Ok(())
    }

    /// Names of the configured parameters, in write order
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    #[must_use]
    pub fn with_timing(mut self, dwell_ms: u64, drain_ms: u64) -> Self {
        self.dwell_ms = dwell_ms;
        self.drain_ms = drain_ms;
        self
    }
}
