//! Endpoint resolution
//!
//! Turns symbolic peer endpoints into numeric ones before a configuration is
//! handed to the provider. Resolution is best-effort per peer: an entry that
//! cannot be resolved comes back as `None` and the remaining peers are still
//! usable.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ResolverSettings;
use crate::endpoint::{Endpoint, Host};

/// Hostname lookup backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Resolve `host` to socket addresses carrying `port`
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Lookup through the operating system resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }
}

/// Fixed host table, consulted without any network access
#[derive(Debug, Default, Clone)]
pub struct StaticLookup {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.hosts.insert(host.to_ascii_lowercase(), addrs.into_iter().collect());
        self
    }
}

#[async_trait]
impl HostLookup for StaticLookup {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)))
    }
}

/// Resolves the peer endpoints of a tunnel configuration
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn HostLookup>,
    settings: ResolverSettings,
}

impl EndpointResolver {
    pub fn new(lookup: Arc<dyn HostLookup>, settings: ResolverSettings) -> Self {
        Self { lookup, settings }
    }

    /// Resolver backed by the operating system
    pub fn system(settings: ResolverSettings) -> Self {
        Self::new(Arc::new(SystemLookup), settings)
    }

    /// Return the endpoints unchanged if none of them needs a lookup
    pub fn resolve_without_network(endpoints: &[Option<Endpoint>]) -> Option<Vec<Option<Endpoint>>> {
        if endpoints.iter().flatten().all(Endpoint::is_numeric) {
            Some(endpoints.to_vec())
        } else {
            None
        }
    }

    /// Resolve every symbolic endpoint concurrently
    ///
    /// The result is parallel to `endpoints`: numeric entries are passed
    /// through, resolved names become numeric, and failures become `None`.
    pub async fn resolve(&self, endpoints: &[Option<Endpoint>]) -> Vec<Option<Endpoint>> {
        let pending = endpoints.iter().map(|endpoint| async move {
            match endpoint {
                None => None,
                Some(ep) if ep.is_numeric() => Some(ep.clone()),
                Some(ep) => self.resolve_one(ep).await,
            }
        });

        let resolved = join_all(pending).await;
        info!(
            "Resolved {}/{} peer endpoints",
            resolved.iter().flatten().count(),
            endpoints.iter().flatten().count()
        );
        resolved
    }

    async fn resolve_one(&self, endpoint: &Endpoint) -> Option<Endpoint> {
        let Host::Name(name) = &endpoint.host else {
            return Some(endpoint.clone());
        };

        debug!("Resolving endpoint {}", endpoint);
        let lookup = self.lookup.lookup(name, endpoint.port);
        let addrs = match tokio::time::timeout(self.settings.timeout(), lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                warn!("Failed to resolve {}: {}", endpoint, e);
                return None;
            }
            Err(_) => {
                warn!("Timed out resolving {} after {:?}", endpoint, self.settings.timeout());
                return None;
            }
        };

        let chosen = if self.settings.prefer_ipv4 {
            addrs.iter().find(|a| a.is_ipv4()).or_else(|| addrs.first())
        } else {
            addrs.first()
        };

        match chosen {
            Some(addr) => {
                debug!("Resolved {} to {}", endpoint, addr);
                Some(Endpoint::new(addr.ip().into(), endpoint.port))
            }
            None => {
                warn!("Resolving {} returned no addresses", endpoint);
                None
            }
        }
    }
}
