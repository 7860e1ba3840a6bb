//! Provider adapter
//!
//! The provider is the OS-owned VPN subsystem that persists tunnel
//! configurations and performs the actual tunneling. The core only talks to
//! it through the `TunnelProvider` trait:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        TunnelRegistry        │
//! └──────────────┬───────────────┘
//!                │ persist / update / remove
//!                │ start / stop / enable / reload
//!                ▼
//! ┌──────────────────────────────┐      status notifications
//! │   TunnelProvider (trait)     │ ───────────────────────────▶ observer
//! └──────────────────────────────┘
//! ```
//!
//! `memory::InMemoryProvider` simulates a provider in-process.

pub mod memory;
pub mod options;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::error::ProviderError;
use crate::tunnel_config::TunnelConfiguration;

pub use memory::InMemoryProvider;
pub use options::StartOptions;

/// Opaque reference to a configuration persisted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderHandle(String);

impl ProviderHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native connection state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}

/// Interface every OS VPN provider adapter implements
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Every configuration the provider has persisted
    async fn load_all(&self) -> Result<Vec<(ProviderHandle, TunnelConfiguration)>, ProviderError>;

    /// Persist a new configuration, enabled
    async fn persist(&self, config: &TunnelConfiguration) -> Result<ProviderHandle, ProviderError>;

    /// Replace a persisted configuration, re-enabling it
    async fn update(&self, handle: &ProviderHandle, config: &TunnelConfiguration) -> Result<(), ProviderError>;

    /// Remove a persisted configuration
    async fn remove(&self, handle: &ProviderHandle) -> Result<(), ProviderError>;

    /// Re-enable a disabled configuration and persist it again
    async fn enable(&self, handle: &ProviderHandle) -> Result<(), ProviderError>;

    /// Reload the persisted configuration after an invalid/stale report
    async fn reload(&self, handle: &ProviderHandle) -> Result<(), ProviderError>;

    /// Request the tunnel to start; progress is reported via notifications
    async fn start(&self, handle: &ProviderHandle, options: &StartOptions) -> Result<(), ProviderError>;

    /// Request the tunnel to stop; completion is reported via notifications
    async fn stop(&self, handle: &ProviderHandle);

    /// Current native connection state
    async fn current_status(&self, handle: &ProviderHandle) -> ConnectionState;

    /// Subscribe to status notifications for one tunnel
    async fn subscribe(&self, handle: &ProviderHandle) -> broadcast::Receiver<ConnectionState>;
}
