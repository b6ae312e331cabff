//! Port (tool slot) types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque port handle token assigned by the device (e.g. `"0A"`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortHandle(String);

impl PortHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Filter for port handle searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSearch {
    All,
    ToBeFreed,
    NotInitialized,
    InitializedNotEnabled,
    Enabled,
}

impl fmt::Display for PortSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::ToBeFreed => "to-be-freed",
            Self::NotInitialized => "not-initialized",
            Self::InitializedNotEnabled => "initialized",
            Self::Enabled => "enabled",
        };
        f.write_str(s)
    }
}

/// Bring-up state of a port
///
/// Ordered: a port only ever moves forward through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortState {
    Unrequested,
    Requested,
    SromLoaded,
    Initialized,
    Enabled,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unrequested => "Unrequested",
            Self::Requested => "Requested",
            Self::SromLoaded => "SROM-Loaded",
            Self::Initialized => "Initialized",
            Self::Enabled => "Enabled",
        };
        f.write_str(s)
    }
}

/// Descriptive fields reported by the device for a port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo(BTreeMap<String, String>);

impl PortInfo {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for PortInfo {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One physical tool slot and its bring-up progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub handle: PortHandle,
    pub state: PortState,
    pub info: PortInfo,
}

impl Port {
    pub fn new(handle: PortHandle, state: PortState) -> Self {
        Self {
            handle,
            state,
            info: PortInfo::new(),
        }
    }

    /// Move to `next`, ignoring any attempt to go backward
    pub fn advance(&mut self, next: PortState) {
        if next > self.state {
            self.state = next;
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {} [{}]", self.handle, self.state)?;
        for (key, value) in self.info.iter() {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}
