use serde::Serialize;

use super::{TunnelId, TunnelStatus};

/// Notification pushed to registry subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TunnelEvent {
    /// A tunnel was inserted at `index`
    Added { id: TunnelId, index: usize, name: String },
    /// A tunnel's configuration changed without moving it
    Modified { id: TunnelId, index: usize },
    /// A rename moved a tunnel; indices between `from` and `to` shifted by one
    Moved { id: TunnelId, from: usize, to: usize },
    /// A tunnel was removed from `index`
    Removed { id: TunnelId, index: usize, name: String },
    /// A tunnel's status changed
    StatusChanged { id: TunnelId, name: String, status: TunnelStatus },
}

impl TunnelEvent {
    pub fn id(&self) -> TunnelId {
        match self {
            TunnelEvent::Added { id, .. }
            | TunnelEvent::Modified { id, .. }
            | TunnelEvent::Moved { id, .. }
            | TunnelEvent::Removed { id, .. }
            | TunnelEvent::StatusChanged { id, .. } => *id,
        }
    }
}
