//! Tunnel registry
//!
//! The caller-facing surface: an ordered, uniquely named collection of
//! tunnels plus the activation entry points. Structural changes are
//! persisted through the provider first and only then applied in memory, so
//! a failed provider write leaves the registry untouched.

use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::activation;
use super::events::TunnelEvent;
use super::observer::ensure_observing;
use super::record::{TunnelId, TunnelRecord, TunnelSummary};
use super::table::TunnelTable;
use super::TunnelStatus;
use crate::config::ManagerSettings;
use crate::error::{BatchAddError, TunnelError, TunnelResult, WriteOperation};
use crate::provider::{ProviderHandle, TunnelProvider};
use crate::resolver::EndpointResolver;
use crate::tunnel_config::TunnelConfiguration;

/// State shared by the registry, activation sequences and observer tasks
pub(crate) struct Shared {
    pub provider: Arc<dyn TunnelProvider>,
    pub resolver: EndpointResolver,
    pub settings: ManagerSettings,
    pub table: RwLock<TunnelTable>,
    /// Serializes structural mutations and activation sequences
    pub operations: Mutex<()>,
    events: broadcast::Sender<TunnelEvent>,
}

impl Shared {
    pub fn notify(&self, event: TunnelEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }

    /// Overwrite a tunnel's status and notify on change
    ///
    /// Going `Inactive` also clears the in-flight marker, stops observing
    /// and releases the engaged slot if this tunnel held it.
    pub async fn set_status(&self, id: TunnelId, status: TunnelStatus) {
        let mut table = self.table.write().await;
        let Ok(record) = table.get_mut(id) else {
            debug!("Status {} for removed tunnel {} dropped", status, id);
            return;
        };

        let previous = record.status;
        record.status = status;
        let name = record.name.clone();
        if status == TunnelStatus::Inactive {
            record.activation_in_flight = false;
            record.held_disconnect = false;
            record.stop_observing();
            if table.current == Some(id) {
                table.current = None;
            }
        }

        if previous != status {
            info!("Tunnel '{}': {} -> {}", name, previous, status);
            self.notify(TunnelEvent::StatusChanged { id, name, status });
        }
    }

    /// Clear the in-flight marker once the start request was accepted
    ///
    /// The tunnel stays in its activation status and later notifications
    /// drive it. Only when a disconnect was held back while the sequence ran
    /// is the provider's current state consulted, since that notification
    /// will not be replayed.
    pub async fn settle_activation(&self, id: TunnelId, handle: &ProviderHandle) {
        let held_disconnect = {
            let mut table = self.table.write().await;
            match table.get_mut(id) {
                Ok(record) => {
                    record.activation_in_flight = false;
                    std::mem::take(&mut record.held_disconnect)
                }
                Err(_) => return,
            }
        };
        if !held_disconnect {
            return;
        }

        let state = self.provider.current_status(handle).await;
        if TunnelStatus::from(state).is_engaged() {
            return;
        }
        let restarting = {
            let table = self.table.read().await;
            table.get(id).map(|r| r.status == TunnelStatus::Restarting).unwrap_or(false)
        };
        if !restarting {
            debug!("Provider still reports {:?} for {} after a held disconnect", state, id);
            self.set_status(id, TunnelStatus::Inactive).await;
        }
    }

    pub async fn status(&self, id: TunnelId) -> TunnelResult<TunnelStatus> {
        self.table.read().await.get(id).map(|r| r.status)
    }
}

/// Ordered collection of tunnels and their lifecycle
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TunnelRegistry {
    shared: Arc<Shared>,
}

impl TunnelRegistry {
    /// Create an empty registry
    pub fn new(provider: Arc<dyn TunnelProvider>, resolver: EndpointResolver, settings: ManagerSettings) -> Self {
        let (events, _) = broadcast::channel(settings.events.channel_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                provider,
                resolver,
                settings,
                table: RwLock::new(TunnelTable::default()),
                operations: Mutex::new(()),
                events,
            }),
        }
    }

    /// Create a registry from every configuration the provider has persisted
    ///
    /// Duplicate names are skipped. The first tunnel the provider reports as
    /// engaged becomes the current one and is observed; any other engaged
    /// configuration, including a skipped duplicate, is asked to stop.
    pub async fn load(
        provider: Arc<dyn TunnelProvider>,
        resolver: EndpointResolver,
        settings: ManagerSettings,
    ) -> TunnelResult<Self> {
        let registry = Self::new(provider, resolver, settings);
        let shared = &registry.shared;

        let mut persisted = shared
            .provider
            .load_all()
            .await
            .map_err(TunnelError::ProviderOperationFailed)?;
        persisted.sort_by(|a, b| a.1.name().cmp(b.1.name()));

        let mut engaged = None;
        for (handle, config) in persisted {
            let name = config.name().to_string();
            let mut status = TunnelStatus::from(shared.provider.current_status(&handle).await);
            let duplicate = shared.table.read().await.contains_name(&name);

            // Nothing may stay engaged outside the engaged slot
            if status.is_engaged() && (duplicate || engaged.is_some()) {
                warn!("Tunnel '{}' is engaged but cannot be adopted, stopping it", name);
                shared.provider.stop(&handle).await;
                status = TunnelStatus::Inactive;
            }
            if duplicate {
                warn!("Skipping persisted tunnel with duplicate name '{}'", name);
                continue;
            }

            let mut table = shared.table.write().await;
            let record = TunnelRecord::new(handle, config, status);
            let id = record.id;
            table.insert(record)?;
            if status.is_engaged() {
                table.current = Some(id);
                engaged = Some(id);
            }
        }

        if let Some(id) = engaged {
            ensure_observing(shared, id).await;
        }
        info!("Loaded {} tunnel(s)", registry.len().await);
        Ok(registry)
    }

    /// Subscribe to structural and status notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.shared.events.subscribe()
    }

    pub async fn list(&self) -> Vec<TunnelSummary> {
        self.shared.table.read().await.iter().map(TunnelRecord::summary).collect()
    }

    pub async fn len(&self) -> usize {
        self.shared.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn tunnel_at(&self, index: usize) -> Option<TunnelSummary> {
        self.shared.table.read().await.at(index).map(TunnelRecord::summary)
    }

    pub async fn find(&self, name: &str) -> Option<TunnelSummary> {
        self.shared.table.read().await.find_by_name(name).map(TunnelRecord::summary)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.shared.table.read().await.contains_name(name)
    }

    pub async fn configuration(&self, id: TunnelId) -> TunnelResult<TunnelConfiguration> {
        self.shared.table.read().await.get(id).map(|r| r.configuration.clone())
    }

    pub async fn status(&self, id: TunnelId) -> TunnelResult<TunnelStatus> {
        self.shared.status(id).await
    }

    /// The tunnel currently holding the single engaged slot
    pub async fn current(&self) -> Option<TunnelSummary> {
        let table = self.shared.table.read().await;
        let id = table.current?;
        table.get(id).ok().map(TunnelRecord::summary)
    }

    /// Persist a new tunnel and insert it at its sorted position
    pub async fn add(&self, config: TunnelConfiguration) -> TunnelResult<TunnelSummary> {
        config.validate()?;
        let _op = self.shared.operations.lock().await;

        if self.shared.table.read().await.contains_name(config.name()) {
            return Err(TunnelError::DuplicateName(config.name().to_string()));
        }

        let handle = self.shared.provider.persist(&config).await.map_err(|source| {
            warn!("Provider refused to persist '{}': {}", config.name(), source);
            TunnelError::ProviderWriteFailed { operation: WriteOperation::Add, source }
        })?;

        let record = TunnelRecord::new(handle, config, TunnelStatus::Inactive);
        let mut table = self.shared.table.write().await;
        let index = table.insert(record)?;
        let summary = table.at(index).map(TunnelRecord::summary).ok_or_else(|| {
            TunnelError::NotFound(format!("index {}", index))
        })?;

        info!("Added tunnel '{}' at index {}", summary.name, index);
        self.shared.notify(TunnelEvent::Added { id: summary.id, index, name: summary.name.clone() });
        Ok(summary)
    }

    /// Add configurations one at a time, stopping at the first failure
    pub async fn add_batch(
        &self,
        configs: impl IntoIterator<Item = TunnelConfiguration>,
    ) -> Result<Vec<TunnelSummary>, BatchAddError> {
        let configs: Vec<_> = configs.into_iter().collect();
        let total = configs.len();
        let mut added = Vec::with_capacity(total);

        for (i, config) in configs.into_iter().enumerate() {
            match self.add(config).await {
                Ok(summary) => added.push(summary),
                Err(error) => {
                    return Err(BatchAddError { added, not_attempted: total - i - 1, error });
                }
            }
        }
        Ok(added)
    }

    /// Replace a tunnel's configuration
    ///
    /// A rename moves the record to its new sorted position. An engaged
    /// tunnel is restarted so the new configuration takes effect.
    pub async fn modify(&self, id: TunnelId, config: TunnelConfiguration) -> TunnelResult<TunnelSummary> {
        config.validate()?;
        let _op = self.shared.operations.lock().await;

        let handle = {
            let table = self.shared.table.read().await;
            let record = table.get(id)?;
            if record.name != config.name() && table.contains_name(config.name()) {
                return Err(TunnelError::DuplicateName(config.name().to_string()));
            }
            record.handle.clone()
        };

        self.shared.provider.update(&handle, &config).await.map_err(|source| {
            warn!("Provider refused to update '{}': {}", config.name(), source);
            TunnelError::ProviderWriteFailed { operation: WriteOperation::Modify, source }
        })?;

        let (summary, restart) = {
            let mut table = self.shared.table.write().await;
            let new_name = config.name().to_string();
            let (from, to) = table.rename(id, &new_name)?;
            let record = table.get_mut(id)?;
            record.configuration = config;
            let restart = record.status.can_restart() && !record.activation_in_flight;
            let summary = record.summary();

            if from == to {
                info!("Modified tunnel '{}'", summary.name);
                self.shared.notify(TunnelEvent::Modified { id, index: to });
            } else {
                info!("Modified tunnel '{}', moved {} -> {}", summary.name, from, to);
                self.shared.notify(TunnelEvent::Moved { id, from, to });
            }
            (summary, restart)
        };

        if restart {
            activation::begin_restart(&self.shared, id).await?;
        }
        Ok(summary)
    }

    /// Remove a tunnel from the provider and the registry
    pub async fn remove(&self, id: TunnelId) -> TunnelResult<()> {
        let _op = self.shared.operations.lock().await;

        let (handle, name, engaged) = {
            let table = self.shared.table.read().await;
            let record = table.get(id)?;
            (record.handle.clone(), record.name.clone(), record.status.is_engaged())
        };

        if engaged {
            info!("Stopping '{}' before removing it", name);
            self.shared.provider.stop(&handle).await;
        }

        self.shared.provider.remove(&handle).await.map_err(|source| {
            warn!("Provider refused to remove '{}': {}", name, source);
            TunnelError::ProviderWriteFailed { operation: WriteOperation::Remove, source }
        })?;

        let mut table = self.shared.table.write().await;
        let index = table.position(id).ok_or_else(|| TunnelError::NotFound(id.to_string()))?;
        let mut record = table.remove_at(index);
        record.stop_observing();

        info!("Removed tunnel '{}' from index {}", name, index);
        self.shared.notify(TunnelEvent::Removed { id, index, name });
        Ok(())
    }

    /// Activate an inactive tunnel
    ///
    /// Returns once the provider accepted the start request; `Active` is
    /// reported later through a status notification.
    pub async fn start_activation(&self, id: TunnelId) -> TunnelResult<()> {
        let initial = {
            let mut table = self.shared.table.write().await;
            let current = table.current;
            let record = table.get_mut(id)?;
            if record.status != TunnelStatus::Inactive || record.activation_in_flight {
                return Err(TunnelError::NotInactive);
            }
            if let Some(other) = current {
                debug!("Refusing to activate '{}', {} is engaged", record.name, other);
                return Err(TunnelError::AnotherTunnelActive);
            }
            if !record.configuration.has_endpoint() {
                warn!("Tunnel '{}' has no peer with an endpoint", record.name);
                return Err(TunnelError::NoEndpoint);
            }
            record.begin_activation();
            let endpoints = record.configuration.endpoints();
            table.current = Some(id);

            if EndpointResolver::resolve_without_network(&endpoints).is_some() {
                TunnelStatus::Activating
            } else {
                TunnelStatus::ResolvingEndpoints
            }
        };

        // Engaged from here on, also while waiting for other operations
        self.shared.set_status(id, initial).await;
        ensure_observing(&self.shared, id).await;
        let _op = self.shared.operations.lock().await;
        activation::activate(&self.shared, id).await
    }

    /// Deactivate an engaged tunnel
    ///
    /// Returns once the stop was requested; `Inactive` follows through a
    /// status notification.
    pub async fn start_deactivation(&self, id: TunnelId) -> TunnelResult<()> {
        activation::deactivate(&self.shared, id).await
    }

    /// Stop and start an engaged tunnel with its current configuration
    pub async fn restart(&self, id: TunnelId) -> TunnelResult<()> {
        {
            let table = self.shared.table.read().await;
            let record = table.get(id)?;
            if record.status == TunnelStatus::Inactive {
                return Err(TunnelError::AlreadyInactive);
            }
            if record.activation_in_flight || !record.status.can_restart() {
                return Err(TunnelError::NotYetEngaged);
            }
        }
        activation::begin_restart(&self.shared, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ConnectionState, MockTunnelProvider};
    use crate::resolver::MockHostLookup;
    use crate::tunnel_config::tests::sample;

    fn registry(provider: MockTunnelProvider, lookup: MockHostLookup) -> TunnelRegistry {
        let settings = ManagerSettings::default();
        let resolver = EndpointResolver::new(Arc::new(lookup), settings.resolver.clone());
        TunnelRegistry::new(Arc::new(provider), resolver, settings)
    }

    fn persisting(provider: &mut MockTunnelProvider) {
        provider.expect_persist().returning(|c| Ok(ProviderHandle::new(c.name())));
    }

    async fn wait_for_status(registry: &TunnelRegistry, id: TunnelId, status: TunnelStatus) {
        let reached = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while registry.status(id).await.unwrap() != status {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "still {:?}, wanted {}", registry.status(id).await, status);
    }

    #[tokio::test]
    async fn test_no_endpoint_never_reaches_provider() {
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider.expect_subscribe().never();
        provider.expect_start().never();
        provider.expect_reload().never();
        provider.expect_enable().never();
        let mut lookup = MockHostLookup::new();
        lookup.expect_lookup().never();

        let registry = registry(provider, lookup);
        let added = registry.add(sample("bare", &[None, None])).await.unwrap();

        let result = registry.start_activation(added.id).await;
        assert!(matches!(result, Err(TunnelError::NoEndpoint)));
        assert_eq!(registry.status(added.id).await.unwrap(), TunnelStatus::Inactive);
        assert!(registry.current().await.is_none());
    }

    #[tokio::test]
    async fn test_numeric_endpoints_skip_lookup() {
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider.expect_subscribe().returning(|_| broadcast::channel(4).1);
        provider.expect_start().times(1).returning(|_, _| Ok(()));
        provider
            .expect_current_status()
            .returning(|_| ConnectionState::Connecting);
        let mut lookup = MockHostLookup::new();
        lookup.expect_lookup().never();

        let registry = registry(provider, lookup);
        let added = registry.add(sample("num", &[Some("192.0.2.1:51820")])).await.unwrap();

        registry.start_activation(added.id).await.unwrap();
        assert_eq!(registry.status(added.id).await.unwrap(), TunnelStatus::Activating);
        assert_eq!(registry.current().await.map(|t| t.id), Some(added.id));
    }

    #[tokio::test]
    async fn test_provider_reporting_state_after_start_keeps_slot() {
        // The provider accepts the start but is still disconnected when asked
        let (notifications, _) = broadcast::channel(16);
        let subscribed = notifications.clone();
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider.expect_subscribe().returning(move |_| subscribed.subscribe());
        provider.expect_start().times(1).returning(|_, _| Ok(()));
        provider
            .expect_current_status()
            .returning(|_| ConnectionState::Disconnected);

        let registry = registry(provider, MockHostLookup::new());
        let a = registry.add(sample("a", &[Some("192.0.2.1:51820")])).await.unwrap();
        let b = registry.add(sample("b", &[Some("192.0.2.2:51820")])).await.unwrap();

        registry.start_activation(a.id).await.unwrap();
        assert_eq!(registry.status(a.id).await.unwrap(), TunnelStatus::Activating);
        assert_eq!(registry.current().await.map(|t| t.id), Some(a.id));

        notifications.send(ConnectionState::Connecting).unwrap();
        notifications.send(ConnectionState::Connected).unwrap();
        wait_for_status(&registry, a.id, TunnelStatus::Active).await;

        assert!(matches!(registry.start_activation(b.id).await, Err(TunnelError::AnotherTunnelActive)));
        assert_eq!(registry.status(b.id).await.unwrap(), TunnelStatus::Inactive);
    }

    #[tokio::test]
    async fn test_disconnect_right_after_start_releases_slot() {
        let (notifications, _) = broadcast::channel(16);
        let subscribed = notifications.clone();
        let dropped = notifications.clone();
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider.expect_subscribe().returning(move |_| subscribed.subscribe());
        provider.expect_start().times(1).returning(move |_, _| {
            let _ = dropped.send(ConnectionState::Disconnected);
            Ok(())
        });
        provider
            .expect_current_status()
            .returning(|_| ConnectionState::Disconnected);

        let registry = registry(provider, MockHostLookup::new());
        let t = registry.add(sample("flaky", &[Some("192.0.2.1:51820")])).await.unwrap();

        registry.start_activation(t.id).await.unwrap();
        wait_for_status(&registry, t.id, TunnelStatus::Inactive).await;
        assert!(registry.current().await.is_none());
    }

    #[tokio::test]
    async fn test_activation_is_visible_while_waiting_for_other_operations() {
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider.expect_subscribe().returning(|_| broadcast::channel(4).1);
        provider.expect_start().times(1).returning(|_, _| Ok(()));

        let registry = registry(provider, MockHostLookup::new());
        let queued = registry.add(sample("queued", &[Some("192.0.2.1:51820")])).await.unwrap();
        let other = registry.add(sample("other", &[Some("192.0.2.2:51820")])).await.unwrap();

        let busy = registry.shared.operations.lock().await;
        let activating = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.start_activation(queued.id).await })
        };
        wait_for_status(&registry, queued.id, TunnelStatus::Activating).await;

        let listed = registry.find("queued").await.unwrap();
        assert_eq!(listed.status, TunnelStatus::Activating);
        assert_eq!(registry.current().await.map(|t| t.id), Some(queued.id));
        assert!(matches!(registry.start_activation(other.id).await, Err(TunnelError::AnotherTunnelActive)));
        assert!(matches!(registry.start_deactivation(queued.id).await, Err(TunnelError::NotYetEngaged)));

        drop(busy);
        activating.await.unwrap().unwrap();
        assert_eq!(registry.status(queued.id).await.unwrap(), TunnelStatus::Activating);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected_before_persist() {
        let mut provider = MockTunnelProvider::new();
        provider.expect_persist().never();

        let registry = registry(provider, MockHostLookup::new());
        let result = registry.add(sample("", &[])).await;
        assert!(matches!(result, Err(TunnelError::InvalidConfiguration(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_tunnel() {
        let mut provider = MockTunnelProvider::new();
        persisting(&mut provider);
        provider
            .expect_remove()
            .times(1)
            .returning(|_| Err(crate::error::ProviderError::Other("busy".into())));

        let registry = registry(provider, MockHostLookup::new());
        let added = registry.add(sample("keep", &[])).await.unwrap();

        let result = registry.remove(added.id).await;
        assert!(matches!(
            result,
            Err(TunnelError::ProviderWriteFailed { operation: WriteOperation::Remove, .. })
        ));
        assert!(registry.contains("keep").await);
    }
}
