//! Device discovery
//!
//! The concrete resolver (mDNS) lives in the binary. The core only needs
//! something that turns a service name into a host within a deadline.

use async_trait::async_trait;
use std::time::Duration;

/// Resolves a service name to the first matching host
#[async_trait]
pub trait Resolver: Send + Sync {
    /// `None` when nothing answers
    async fn resolve(&self, service: &str) -> Option<String>;
}

/// Ask `resolver` for `service`, giving up after `timeout`
pub async fn discover_host<R: Resolver + ?Sized>(
    resolver: &R,
    service: &str,
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, resolver.resolve(service)).await {
        Ok(Some(host)) => {
            tracing::info!(%service, %host, "device discovered");
            Some(host)
        }
        Ok(None) => {
            tracing::debug!(%service, "no device answered");
            None
        }
        Err(_) => {
            tracing::debug!(%service, ?timeout, "discovery timed out");
            None
        }
    }
}

/// Resolver that always answers with the same host
#[derive(Debug, Clone)]
pub struct StaticResolver {
    host: Option<String>,
}

impl StaticResolver {
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _service: &str) -> Option<String> {
        self.host.clone()
    }
}
