//! Error types for capi-core
//!
//! Fatal session failures are [`CapiError`]. Collaborator failures are
//! [`DeviceError`]. Conditions that are logged and tolerated (parameter
//! rejection, skipped packets) are plain values and live next to the
//! component that produces them.

use thiserror::Error;

use crate::types::PortHandle;

/// Failure reported by a collaborator (transport, decoder)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{command} rejected by device: {reason}")]
    Rejected { command: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Shorthand for a device-side rejection
    pub fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// An API revision string that could not be interpreted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("revision {revision:?} is too short (need at least {min} characters)")]
    TooShort { revision: String, min: usize },

    #[error("revision {revision:?} has no '.' after the device family")]
    MissingSeparator { revision: String },

    #[error("revision {revision:?} has a non-numeric major version {field:?}")]
    NonNumericVersion { revision: String, field: String },
}

/// Why streaming cannot be used on this device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("could not determine streaming support: {0}")]
    Parse(#[from] ParseError),

    #[error("device revision {revision} does not support streaming")]
    Unsupported { revision: String },
}

/// Fatal session error
#[derive(Debug, Error)]
pub enum CapiError {
    #[error("Could not connect to {info}: {source}")]
    Connect {
        info: String,
        #[source]
        source: DeviceError,
    },

    #[error("Could not disconnect: {0}")]
    Disconnect(#[source] DeviceError),

    #[error("Could not read API revision: {0}")]
    Revision(#[source] DeviceError),

    #[error("Capability check failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Could not initialize: {0}")]
    Initialization(#[source] DeviceError),

    #[error("Could not load SROM {path} onto port {port}: {source}")]
    PortLoad {
        port: PortHandle,
        path: String,
        #[source]
        source: DeviceError,
    },

    #[error("Could not {step} port {port}: {source}")]
    PortBringup {
        port: PortHandle,
        step: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("Port search failed: {0}")]
    PortSearch(#[source] DeviceError),

    #[error("Could not {action} tracking: {source}")]
    TrackingControl {
        action: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("Could not start stream {command:?}: {source}")]
    StreamStart {
        command: String,
        #[source]
        source: DeviceError,
    },

    #[error("Could not stop stream {tag:?}: {source}")]
    StreamStop {
        tag: String,
        #[source]
        source: DeviceError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CapiError>;

impl From<serde_json::Error> for CapiError {
    fn from(err: serde_json::Error) -> Self {
        CapiError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CapiError::Initialization(DeviceError::NotConnected);
        assert_eq!(err.to_string(), "Could not initialize: Not connected");
    }

    #[test]
    fn test_capability_conversion() {
        let parse = ParseError::TooShort {
            revision: "X".into(),
            min: 5,
        };
        let err: CapiError = CapabilityError::from(parse).into();
        assert!(matches!(
            err,
            CapiError::Capability(CapabilityError::Parse(ParseError::TooShort { .. }))
        ));
    }

    #[test]
    fn test_port_bringup_names_port() {
        let err = CapiError::PortBringup {
            port: PortHandle::new("0B"),
            step: "enable",
            source: DeviceError::rejected("PENA", "ERROR0D"),
        };
        assert_eq!(
            err.to_string(),
            "Could not enable port 0B: PENA rejected by device: ERROR0D"
        );
    }

    #[test]
    fn test_json_error_becomes_config() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: CapiError = json_err.into();
        assert!(matches!(err, CapiError::Config(_)));
    }
}
