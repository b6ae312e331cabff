//! Port bring-up sequence
//!
//! 1. Request a handle for the optional tool port and load its SROM.
//! 2. Initialize then enable every port not yet initialized, in order.
//! 3. Log an info snapshot of every enabled port.
//!
//! A missing free slot is tolerated. A failed SROM load, initialize or
//! enable aborts the whole sequence; ports enabled before the failure stay
//! enabled.

use std::sync::Arc;

use crate::error::{CapiError, Result};
use crate::log::LogSink;
use crate::protocol::Capi;
use crate::types::{Port, PortHandle, PortSearch, PortState};

/// Drives ports from requested to enabled
pub struct PortSequencer {
    log: Arc<dyn LogSink>,
    ports: Vec<Port>,
}

impl PortSequencer {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            log,
            ports: Vec::new(),
        }
    }

    /// Every port touched so far, in the order it was first seen
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn into_ports(self) -> Vec<Port> {
        self.ports
    }

    /// Run the full sequence; returns the enabled ports with their info
    pub async fn bring_up<C: Capi + ?Sized>(
        &mut self,
        capi: &mut C,
        tool_srom: Option<&str>,
    ) -> Result<Vec<Port>> {
        if let Some(path) = tool_srom {
            self.load_tool_port(capi, path).await?;
        }
        self.enable_pending(capi).await?;
        self.snapshot_enabled(capi).await
    }

    async fn load_tool_port<C: Capi + ?Sized>(&mut self, capi: &mut C, path: &str) -> Result<()> {
        let handle = match capi.port_handle_request().await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                self.log.log("Could not get available port for tool.");
                return Ok(());
            }
            Err(e) => {
                self.log
                    .log(&format!("Could not get available port for tool: {}", e));
                return Ok(());
            }
        };
        let idx = self.track(Port::new(handle.clone(), PortState::Requested));

        if let Err(source) = capi.port_load_srom(&handle, path).await {
            self.log.log("Could not load SROM file for tool.");
            return Err(CapiError::PortLoad {
                port: handle,
                path: path.to_string(),
                source,
            });
        }
        self.ports[idx].advance(PortState::SromLoaded);
        tracing::debug!(port = %handle, path, "SROM loaded");
        Ok(())
    }

    async fn enable_pending<C: Capi + ?Sized>(&mut self, capi: &mut C) -> Result<()> {
        let pending = self.search(capi, PortSearch::NotInitialized).await?;

        for handle in pending {
            let idx = self.track(Port::new(handle.clone(), PortState::Requested));

            if let Err(source) = capi.port_initialize(&handle).await {
                self.log
                    .log(&format!("Could not initialize port {}.", handle));
                return Err(CapiError::PortBringup {
                    port: handle,
                    step: "initialize",
                    source,
                });
            }
            self.ports[idx].advance(PortState::Initialized);

            if let Err(source) = capi.port_enable(&handle).await {
                self.log.log(&format!("Could not enable port {}.", handle));
                return Err(CapiError::PortBringup {
                    port: handle,
                    step: "enable",
                    source,
                });
            }
            self.ports[idx].advance(PortState::Enabled);
        }
        Ok(())
    }

    async fn snapshot_enabled<C: Capi + ?Sized>(&mut self, capi: &mut C) -> Result<Vec<Port>> {
        self.log.log("Enabled Ports:");
        let enabled = self.search(capi, PortSearch::Enabled).await?;

        let mut result = Vec::with_capacity(enabled.len());
        for handle in enabled {
            let idx = self.track(Port::new(handle.clone(), PortState::Enabled));
            self.ports[idx].advance(PortState::Enabled);
            match capi.port_info(&handle).await {
                Ok(info) => self.ports[idx].info = info,
                Err(e) => {
                    self.log
                        .log(&format!("Could not get info for port {}: {}", handle, e));
                }
            }
            self.log.log(&self.ports[idx].to_string());
            result.push(self.ports[idx].clone());
        }
        Ok(result)
    }

    async fn search<C: Capi + ?Sized>(
        &self,
        capi: &mut C,
        filter: PortSearch,
    ) -> Result<Vec<PortHandle>> {
        match capi.port_handle_search(filter).await {
            Ok(handles) => Ok(handles),
            Err(e) => {
                self.log
                    .log(&format!("Could not search ports ({}): {}", filter, e));
                Err(CapiError::PortSearch(e))
            }
        }
    }

    /// Index of `port` in the tracked list, inserting it when new
    fn track(&mut self, port: Port) -> usize {
        match self.ports.iter().position(|p| p.handle == port.handle) {
            Some(idx) => idx,
            None => {
                self.ports.push(port);
                self.ports.len() - 1
            }
        }
    }
}
