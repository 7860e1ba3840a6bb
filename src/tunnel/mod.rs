//! Tunnel lifecycle
//!
//! - `registry` - ordered collection and caller-facing operations
//! - `activation` - resolve, start with retries, deactivate, restart
//! - `observer` - provider notifications to tunnel statuses
//! - `status` - statuses and the notification transition table

mod activation;
pub mod events;
mod observer;
mod record;
pub mod registry;
pub mod status;
mod table;

pub use events::TunnelEvent;
pub use record::{TunnelId, TunnelSummary};
pub use registry::TunnelRegistry;
pub use status::{Transition, TunnelStatus};
