//! mDNS device discovery

use async_trait::async_trait;
use capi_core::Resolver;
use mdns_sd::{ServiceDaemon, ServiceEvent};

/// Browses for a service type and answers with the first resolved address
pub struct MdnsResolver;

/// Shuts the daemon down however `resolve` ends, including cancellation
struct DaemonGuard(ServiceDaemon);

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.shutdown() {
            tracing::debug!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

#[async_trait]
impl Resolver for MdnsResolver {
    async fn resolve(&self, service: &str) -> Option<String> {
        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => DaemonGuard(daemon),
            Err(e) => {
                tracing::warn!("mDNS daemon unavailable: {}", e);
                return None;
            }
        };
        let events = match daemon.0.browse(service) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to browse {}: {}", service, e);
                return None;
            }
        };

        while let Ok(event) = events.recv_async().await {
            if let ServiceEvent::ServiceResolved(info) = event {
                tracing::debug!(fullname = info.get_fullname(), "service resolved");
                if let Some(addr) = info.get_addresses().iter().next() {
                    return Some(addr.to_string());
                }
            }
        }
        None
    }
}
