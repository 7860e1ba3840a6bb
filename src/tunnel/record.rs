use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::TunnelStatus;
use crate::provider::ProviderHandle;
use crate::tunnel_config::TunnelConfiguration;

/// Stable identifier of a tunnel record, unaffected by renames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelId(Uuid);

impl TunnelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-memory state of one tunnel, owned by the registry
pub(crate) struct TunnelRecord {
    pub id: TunnelId,
    pub name: String,
    /// Position in the name-sorted sequence
    pub index: usize,
    pub status: TunnelStatus,
    pub handle: ProviderHandle,
    pub configuration: TunnelConfiguration,
    /// Set while resolution or the start/retry loop has not returned
    pub activation_in_flight: bool,
    /// A disconnect arrived while the activation was in flight and was held back
    pub held_disconnect: bool,
    /// Status observer task, present while the tunnel is being observed
    pub observer: Option<JoinHandle<()>>,
}

impl TunnelRecord {
    pub fn new(handle: ProviderHandle, configuration: TunnelConfiguration, status: TunnelStatus) -> Self {
        Self {
            id: TunnelId::new(),
            name: configuration.name().to_string(),
            index: 0,
            status,
            handle,
            configuration,
            activation_in_flight: false,
            held_disconnect: false,
            observer: None,
        }
    }

    pub fn summary(&self) -> TunnelSummary {
        TunnelSummary {
            id: self.id,
            name: self.name.clone(),
            index: self.index,
            status: self.status,
        }
    }

    /// Reserve the record for an activation sequence
    pub fn begin_activation(&mut self) {
        self.activation_in_flight = true;
        self.held_disconnect = false;
    }

    pub fn is_observed(&self) -> bool {
        self.observer.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop observing provider notifications; idempotent
    pub fn stop_observing(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
    }
}

/// Caller-facing snapshot of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelSummary {
    pub id: TunnelId,
    pub name: String,
    pub index: usize,
    pub status: TunnelStatus,
}
