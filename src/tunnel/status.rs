use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::ConnectionState;

/// Lifecycle status of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelStatus {
    Inactive,
    /// Peer hostnames are being resolved before the provider is contacted
    ResolvingEndpoints,
    Activating,
    Active,
    Reasserting,
    /// Stopping in order to start again with a modified configuration
    Restarting,
    Deactivating,
}

impl TunnelStatus {
    /// Any status other than `Inactive`
    pub fn is_engaged(self) -> bool {
        self != TunnelStatus::Inactive
    }

    /// Statuses from which a configuration change triggers a restart
    pub fn can_restart(self) -> bool {
        matches!(self, TunnelStatus::Active | TunnelStatus::Activating | TunnelStatus::Reasserting)
    }

    /// Apply a provider notification
    ///
    /// `activation_in_flight` is set while the activation sequence
    /// (resolution plus start/retry) has not returned yet; a disconnect seen
    /// in that window belongs to a failed attempt that is about to be retried.
    pub fn on_provider_state(self, state: ConnectionState, activation_in_flight: bool) -> Transition {
        use ConnectionState::*;

        match (self, state) {
            (TunnelStatus::Restarting, Disconnecting) => Transition::Hold,
            (TunnelStatus::Restarting, Disconnected) => Transition::Reactivate,
            (_, Disconnected | Disconnecting | Invalid) if activation_in_flight => Transition::Hold,
            (_, state) => Transition::Set(state.into()),
        }
    }
}

impl From<ConnectionState> for TunnelStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => TunnelStatus::Active,
            ConnectionState::Connecting => TunnelStatus::Activating,
            ConnectionState::Disconnected => TunnelStatus::Inactive,
            ConnectionState::Disconnecting => TunnelStatus::Deactivating,
            ConnectionState::Reasserting => TunnelStatus::Reasserting,
            ConnectionState::Invalid => TunnelStatus::Inactive,
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelStatus::Inactive => "inactive",
            TunnelStatus::ResolvingEndpoints => "resolving",
            TunnelStatus::Activating => "activating",
            TunnelStatus::Active => "active",
            TunnelStatus::Reasserting => "reasserting",
            TunnelStatus::Restarting => "restarting",
            TunnelStatus::Deactivating => "deactivating",
        };
        f.write_str(s)
    }
}

/// Outcome of a provider notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Overwrite the status
    Set(TunnelStatus),
    /// Keep the current status
    Hold,
    /// The restart stop completed; start again with the current configuration
    Reactivate,
}
