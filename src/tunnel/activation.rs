//! Activation state machine
//!
//! Sequences one tunnel through endpoint resolution, the provider start
//! request with bounded retries, deactivation and restart-after-modify.
//! The registry decides *whether* a transition may start; this module
//! performs it and owns every status change along the way.
//!
//! ```text
//!            start
//! inactive ───────▶ resolving ──▶ activating ──(notify)──▶ active
//!    ▲                  │              │                     │
//!    │   dns / no peer  │   fatal /    │                     │ modify
//!    ├──────────────────┘   exhausted  │                     ▼
//!    ├─────────────────────────────────┘                 restarting
//!    │                                                       │ stopped
//!    └──(notify)── deactivating ◀── stop                     └──▶ resolving …
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::registry::Shared;
use super::{TunnelId, TunnelStatus};
use crate::error::{ProviderError, TunnelError, TunnelResult};
use crate::provider::{ProviderHandle, StartOptions, TunnelProvider};
use crate::resolver::EndpointResolver;
use crate::tunnel_config::TunnelConfiguration;

/// Run the activation sequence for a record already marked in flight
///
/// On failure the tunnel is returned to `Inactive`, which also releases the
/// single-active slot.
pub(crate) async fn activate(shared: &Arc<Shared>, id: TunnelId) -> TunnelResult<()> {
    let snapshot = {
        let table = shared.table.read().await;
        table.get(id).map(|r| (r.name.clone(), r.handle.clone(), r.configuration.clone()))
    };
    let (name, handle, config) = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // Removed while waiting for the operation lock
            let mut table = shared.table.write().await;
            if table.current == Some(id) {
                table.current = None;
            }
            return Err(e);
        }
    };

    info!("Activating tunnel '{}'", name);
    match run(shared, id, &name, &handle, &config).await {
        Ok(()) => {
            shared.settle_activation(id, &handle).await;
            info!("Start requested for tunnel '{}'", name);
            Ok(())
        }
        Err(e) => {
            error!("Failed to activate tunnel '{}': {}", name, e);
            shared.set_status(id, TunnelStatus::Inactive).await;
            Err(e)
        }
    }
}

async fn run(
    shared: &Arc<Shared>,
    id: TunnelId,
    name: &str,
    handle: &ProviderHandle,
    config: &TunnelConfiguration,
) -> TunnelResult<()> {
    let endpoints = config.endpoints();
    if !endpoints.iter().any(Option::is_some) {
        warn!("Tunnel '{}' has no peer with an endpoint", name);
        return Err(TunnelError::NoEndpoint);
    }

    let resolved = match EndpointResolver::resolve_without_network(&endpoints) {
        Some(resolved) => {
            debug!("All endpoints of '{}' are numeric, skipping resolution", name);
            resolved
        }
        None => {
            shared.set_status(id, TunnelStatus::ResolvingEndpoints).await;
            let resolved = shared.resolver.resolve(&endpoints).await;
            if resolved.iter().all(Option::is_none) {
                return Err(TunnelError::DnsResolutionFailed);
            }
            resolved
        }
    };

    if !resolved.iter().any(Option::is_some) {
        return Err(TunnelError::NoEndpoint);
    }

    let options = StartOptions::generate(config, &resolved);
    shared.set_status(id, TunnelStatus::Activating).await;

    start_with_retry(
        shared.provider.as_ref(),
        name,
        handle,
        &options,
        shared.settings.activation.max_attempts,
    )
    .await
}

/// Ask the provider to start, recovering from disabled/invalid/stale reports
///
/// Each start call counts as one attempt. A recovery step (re-enable or
/// reload) only runs if another attempt will follow.
pub(crate) async fn start_with_retry(
    provider: &dyn TunnelProvider,
    name: &str,
    handle: &ProviderHandle,
    options: &StartOptions,
    max_attempts: u32,
) -> TunnelResult<()> {
    let mut last_error: Option<ProviderError> = None;

    for attempt in 1..=max_attempts {
        debug!("Starting tunnel '{}' (attempt {}/{})", name, attempt, max_attempts);

        let err = match provider.start(handle, options).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let recoverable = err == ProviderError::Disabled || err.is_invalid_or_stale();
        if !recoverable {
            return Err(TunnelError::ProviderOperationFailed(err));
        }
        let more_attempts = attempt < max_attempts;

        if err == ProviderError::Disabled {
            info!("Tunnel '{}' is disabled in the provider", name);
            if more_attempts {
                info!("Re-enabling tunnel '{}'", name);
                provider.enable(handle).await.map_err(TunnelError::ProviderOperationFailed)?;
            }
        } else {
            info!("Provider reports '{}' configuration as {}", name, err);
            if more_attempts {
                info!("Reloading configuration of '{}' before retrying", name);
                provider.reload(handle).await.map_err(TunnelError::ProviderOperationFailed)?;
            }
        }
        last_error = Some(err);
    }

    let err = last_error.unwrap_or_else(|| ProviderError::Other("no start attempt made".to_string()));
    error!("Giving up on tunnel '{}' after {} attempts: {}", name, max_attempts, err);
    Err(TunnelError::ProviderOperationFailed(err))
}

/// Start again after the restart stop completed
///
/// Runs on the observer task. Uses the configuration current at this point,
/// so a modification made during the stop is picked up.
pub(crate) async fn reactivate(shared: &Arc<Shared>, id: TunnelId) -> TunnelResult<()> {
    let _op = shared.operations.lock().await;

    {
        let mut table = shared.table.write().await;
        let record = table.get_mut(id)?;
        if record.status != TunnelStatus::Restarting {
            debug!("Restart of '{}' superseded (now {})", record.name, record.status);
            return Ok(());
        }
        record.begin_activation();
    }

    activate(shared, id).await
}

/// Stop the tunnel so it comes back with its current configuration
pub(crate) async fn begin_restart(shared: &Arc<Shared>, id: TunnelId) -> TunnelResult<()> {
    let handle = {
        let table = shared.table.read().await;
        let record = table.get(id)?;
        info!("Restarting tunnel '{}' to apply its configuration", record.name);
        record.handle.clone()
    };

    super::observer::ensure_observing(shared, id).await;
    shared.set_status(id, TunnelStatus::Restarting).await;
    shared.provider.stop(&handle).await;
    Ok(())
}

/// Ask the provider to stop; `Inactive` follows from its notification
pub(crate) async fn deactivate(shared: &Arc<Shared>, id: TunnelId) -> TunnelResult<()> {
    let handle = {
        let table = shared.table.read().await;
        let record = table.get(id)?;
        if record.status == TunnelStatus::Inactive {
            return Err(TunnelError::AlreadyInactive);
        }
        if record.activation_in_flight {
            return Err(TunnelError::NotYetEngaged);
        }
        info!("Deactivating tunnel '{}'", record.name);
        record.handle.clone()
    };

    super::observer::ensure_observing(shared, id).await;
    shared.set_status(id, TunnelStatus::Deactivating).await;
    shared.provider.stop(&handle).await;
    Ok(())
}
