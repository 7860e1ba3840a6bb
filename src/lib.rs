//! tunnelmgr - VPN Tunnel Lifecycle Library
//!
//! Async tunnel management core providing:
//! - Tunnel registry (ordered, uniquely named, persisted through a provider)
//! - Activation state machine (endpoint resolution, start retries, restart)
//! - Endpoint resolution for symbolic peer endpoints
//! - Status observation of the OS VPN provider
//! - wg-quick configuration import/export
//!
//! At most one tunnel is engaged at any time; the provider is the only
//! component that actually tunnels traffic.

pub mod error;
pub mod validation;
pub mod endpoint;
pub mod tunnel_config;
pub mod wg_quick;
pub mod resolver;
pub mod provider;
pub mod tunnel;
pub mod config;

// Re-export commonly used types
pub use error::{BatchAddError, ProviderError, TunnelError, TunnelResult, WriteOperation};
pub use endpoint::{Endpoint, Host};
pub use tunnel_config::{InterfaceConfiguration, Key, PeerConfiguration, TunnelConfiguration};
pub use resolver::{EndpointResolver, HostLookup, StaticLookup, SystemLookup};
pub use provider::{ConnectionState, InMemoryProvider, ProviderHandle, StartOptions, TunnelProvider};
pub use tunnel::{TunnelEvent, TunnelId, TunnelRegistry, TunnelStatus, TunnelSummary};
pub use config::ManagerSettings;
