//! Reverse DNS used to validate self-registering agents.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::{ResolveError, TokioResolver};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("lookup remote host name: {0}")]
pub struct DnsError(pub String);

impl From<ResolveError> for DnsError {
    fn from(e: ResolveError) -> Self {
        Self(e.to_string())
    }
}

/// Resolve an IP address back to its host names.
#[async_trait]
pub trait ReverseDns: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<Vec<String>, DnsError>;
}

/// Resolver backed by the system configuration (`/etc/resolv.conf`).
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    /// # Errors
    ///
    /// Returns a [`DnsError`] when the system resolver configuration cannot be
    /// read.
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let inner = TokioResolver::builder_tokio()?.build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl ReverseDns for SystemResolver {
    async fn lookup(&self, ip: IpAddr) -> Result<Vec<String>, DnsError> {
        let response = self.inner.reverse_lookup(ip).await?;
        Ok(response.iter().map(|ptr| ptr.0.to_utf8()).collect())
    }
}
