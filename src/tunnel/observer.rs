//! Per-tunnel status observer
//!
//! One task per observed tunnel translates provider connection states into
//! tunnel statuses through the transition table in `status`. The task ends
//! once the tunnel is back to `Inactive` or the provider channel closes.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::activation;
use super::registry::Shared;
use super::{TunnelId, Transition};
use crate::provider::{ConnectionState, ProviderHandle};

/// Start observing a tunnel unless an observer is already running
pub(crate) async fn ensure_observing(shared: &Arc<Shared>, id: TunnelId) {
    let handle = {
        let table = shared.table.read().await;
        match table.get(id) {
            Ok(record) if !record.is_observed() => record.handle.clone(),
            _ => return,
        }
    };

    let rx = shared.provider.subscribe(&handle).await;

    let mut table = shared.table.write().await;
    let Ok(record) = table.get_mut(id) else {
        return;
    };
    if record.is_observed() {
        return;
    }
    debug!("Observing tunnel '{}'", record.name);
    record.observer = Some(tokio::spawn(observe(Arc::clone(shared), id, handle, rx)));
}

async fn observe(
    shared: Arc<Shared>,
    id: TunnelId,
    handle: ProviderHandle,
    mut rx: broadcast::Receiver<ConnectionState>,
) {
    loop {
        let state = match rx.recv().await {
            Ok(state) => state,
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} notification(s) for {}, re-reading state", missed, handle);
                shared.provider.current_status(&handle).await
            }
            Err(RecvError::Closed) => {
                debug!("Notification channel for {} closed", handle);
                break;
            }
        };

        if !apply(&shared, id, state).await {
            break;
        }
    }
}

/// Apply one provider state; returns whether to keep observing
async fn apply(shared: &Arc<Shared>, id: TunnelId, state: ConnectionState) -> bool {
    let (status, in_flight) = {
        let table = shared.table.read().await;
        match table.get(id) {
            Ok(record) => (record.status, record.activation_in_flight),
            Err(_) => return false,
        }
    };

    match status.on_provider_state(state, in_flight) {
        Transition::Hold => {
            debug!("Holding {:?} for {} while {}", state, id, status);
            if in_flight {
                let mut table = shared.table.write().await;
                if let Ok(record) = table.get_mut(id) {
                    if record.activation_in_flight {
                        record.held_disconnect = true;
                    }
                }
            }
            true
        }
        Transition::Set(next) => {
            shared.set_status(id, next).await;
            next.is_engaged()
        }
        Transition::Reactivate => {
            if let Err(e) = activation::reactivate(shared, id).await {
                warn!("Restart of {} failed: {}", id, e);
            }
            shared.status(id).await.map(|s| s.is_engaged()).unwrap_or(false)
        }
    }
}
