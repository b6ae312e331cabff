//! Best-effort user parameter configuration
//!
//! Not every device accepts every parameter, so a rejected write or read
//! becomes a [`ParameterWarning`] and the sequence carries on.

use std::fmt;
use std::sync::Arc;

use crate::config::ParameterSetting;
use crate::error::DeviceError;
use crate::log::LogSink;
use crate::protocol::Capi;

/// Which half of a parameter round trip failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterAccess {
    Write,
    Read,
}

/// Non-fatal parameter failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterWarning {
    pub name: String,
    pub access: ParameterAccess,
    pub error: DeviceError,
}

impl fmt::Display for ParameterWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.access {
            ParameterAccess::Write => "set",
            ParameterAccess::Read => "read",
        };
        write!(f, "Could not {} {}: {}", verb, self.name, self.error)
    }
}

/// Applies and reads back named parameters
pub struct ParameterConfigurator {
    log: Arc<dyn LogSink>,
}

impl ParameterConfigurator {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self { log }
    }

    /// Write every setting in order. Never aborts; returns one warning per rejection.
    pub async fn apply<C: Capi + ?Sized>(
        &self,
        capi: &mut C,
        settings: &[ParameterSetting],
    ) -> Vec<ParameterWarning> {
        let mut warnings = Vec::new();
        for setting in settings {
            match capi.set_user_parameter(&setting.name, &setting.value).await {
                Ok(()) => {
                    tracing::debug!(name = %setting.name, value = %setting.value, "parameter set");
                }
                Err(error) => {
                    let warning = ParameterWarning {
                        name: setting.name.clone(),
                        access: ParameterAccess::Write,
                        error,
                    };
                    self.log.log(&warning.to_string());
                    warnings.push(warning);
                }
            }
        }
        warnings
    }

    /// Read back each name and log the reply, or the error text on failure
    pub async fn read_back<C: Capi + ?Sized>(
        &self,
        capi: &mut C,
        names: &[String],
    ) -> Vec<ParameterWarning> {
        let mut warnings = Vec::new();
        for name in names {
            match capi.get_user_parameter(name).await {
                Ok(reply) => self.log.log(&reply),
                Err(error) => {
                    let warning = ParameterWarning {
                        name: name.clone(),
                        access: ParameterAccess::Read,
                        error,
                    };
                    self.log.log(&warning.to_string());
                    warnings.push(warning);
                }
            }
        }
        warnings
    }
}
