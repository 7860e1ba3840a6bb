//! In-process provider
//!
//! Simulates an OS VPN subsystem: configurations are persisted as opaque
//! JSON blobs, `start`/`stop` drive a connection state machine and every
//! state change is broadcast to subscribers. Failures can be injected to
//! exercise the activation retry paths.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::{ConnectionState, ProviderHandle, StartOptions, TunnelProvider};
use crate::error::ProviderError;
use crate::tunnel_config::TunnelConfiguration;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One persisted configuration
struct Entry {
    blob: Vec<u8>,
    enabled: bool,
    state: ConnectionState,
    events: broadcast::Sender<ConnectionState>,
    last_options: Option<StartOptions>,
}

impl Entry {
    fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        // No receivers is fine; nobody is observing yet
        let _ = self.events.send(state);
    }
}

#[derive(Default)]
struct Counters {
    start: usize,
    stop: usize,
    reload: usize,
    enable: usize,
    writes: usize,
}

struct State {
    entries: HashMap<ProviderHandle, Entry>,
    /// Insertion order, so `load_all` is deterministic
    order: Vec<ProviderHandle>,
    start_failures: VecDeque<ProviderError>,
    fail_writes: Option<ProviderError>,
    auto_connect: bool,
    counters: Counters,
}

/// In-memory `TunnelProvider`
pub struct InMemoryProvider {
    state: Mutex<State>,
    channel_capacity: usize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Create a provider whose tunnels connect as soon as they are started
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                order: Vec::new(),
                start_failures: VecDeque::new(),
                fail_writes: None,
                auto_connect: true,
                counters: Counters::default(),
            }),
            channel_capacity,
        }
    }

    fn encode(config: &TunnelConfiguration) -> Result<Vec<u8>, ProviderError> {
        serde_json::to_vec(config).map_err(|e| ProviderError::Other(format!("encode failed: {}", e)))
    }

    fn decode(blob: &[u8]) -> Result<TunnelConfiguration, ProviderError> {
        serde_json::from_slice(blob).map_err(|e| ProviderError::Other(format!("decode failed: {}", e)))
    }

    fn new_entry(&self, blob: Vec<u8>, state: ConnectionState) -> Entry {
        let (events, _) = broadcast::channel(self.channel_capacity);
        Entry { blob, enabled: true, state, events, last_options: None }
    }

    /// Persist a configuration in a given state, as if left over from a previous run
    pub async fn seed(
        &self,
        config: &TunnelConfiguration,
        state: ConnectionState,
    ) -> Result<ProviderHandle, ProviderError> {
        let handle = ProviderHandle::new(uuid::Uuid::new_v4().to_string());
        let entry = self.new_entry(Self::encode(config)?, state);
        let mut st = self.state.lock().await;
        st.entries.insert(handle.clone(), entry);
        st.order.push(handle.clone());
        Ok(handle)
    }

    /// Make the next `start` calls fail with these errors, in order
    pub async fn fail_next_starts(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state.lock().await.start_failures.extend(errors);
    }

    /// Make every persistence write fail with `error` (or succeed again with `None`)
    pub async fn fail_writes(&self, error: Option<ProviderError>) {
        self.state.lock().await.fail_writes = error;
    }

    /// Whether started tunnels go straight to connected
    ///
    /// When disabled, tunnels stay in `Connecting` until `emit` is called.
    pub async fn set_auto_connect(&self, auto_connect: bool) {
        self.state.lock().await.auto_connect = auto_connect;
    }

    /// Disable a persisted configuration, as the OS does when another app takes the slot
    pub async fn disable(&self, handle: &ProviderHandle) {
        if let Some(entry) = self.state.lock().await.entries.get_mut(handle) {
            entry.enabled = false;
        }
    }

    /// Push a status notification as if it came from the OS
    pub async fn emit(&self, handle: &ProviderHandle, state: ConnectionState) {
        if let Some(entry) = self.state.lock().await.entries.get_mut(handle) {
            entry.transition(state);
        }
    }

    /// Decode the stored configuration blob
    pub async fn stored_configuration(&self, handle: &ProviderHandle) -> Option<TunnelConfiguration> {
        let st = self.state.lock().await;
        st.entries.get(handle).and_then(|e| Self::decode(&e.blob).ok())
    }

    /// Options passed to the most recent successful `start`
    pub async fn last_start_options(&self, handle: &ProviderHandle) -> Option<StartOptions> {
        let st = self.state.lock().await;
        st.entries.get(handle).and_then(|e| e.last_options.clone())
    }

    pub async fn is_enabled(&self, handle: &ProviderHandle) -> bool {
        let st = self.state.lock().await;
        st.entries.get(handle).map(|e| e.enabled).unwrap_or(false)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn start_count(&self) -> usize {
        self.state.lock().await.counters.start
    }

    pub async fn stop_count(&self) -> usize {
        self.state.lock().await.counters.stop
    }

    pub async fn reload_count(&self) -> usize {
        self.state.lock().await.counters.reload
    }

    pub async fn enable_count(&self) -> usize {
        self.state.lock().await.counters.enable
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.counters.writes
    }
}

fn unknown(handle: &ProviderHandle) -> ProviderError {
    ProviderError::Other(format!("unknown configuration {}", handle))
}

#[async_trait]
impl TunnelProvider for InMemoryProvider {
    async fn load_all(&self) -> Result<Vec<(ProviderHandle, TunnelConfiguration)>, ProviderError> {
        let st = self.state.lock().await;
        st.order
            .iter()
            .filter_map(|h| st.entries.get(h).map(|e| (h, e)))
            .map(|(h, e)| Self::decode(&e.blob).map(|config| (h.clone(), config)))
            .collect()
    }

    async fn persist(&self, config: &TunnelConfiguration) -> Result<ProviderHandle, ProviderError> {
        let blob = Self::encode(config)?;
        let entry = self.new_entry(blob, ConnectionState::Disconnected);
        let mut st = self.state.lock().await;
        st.counters.writes += 1;
        if let Some(err) = st.fail_writes.clone() {
            return Err(err);
        }

        let handle = ProviderHandle::new(uuid::Uuid::new_v4().to_string());
        st.entries.insert(handle.clone(), entry);
        st.order.push(handle.clone());
        info!("Provider persisted '{}' as {}", config.name(), handle);
        Ok(handle)
    }

    async fn update(&self, handle: &ProviderHandle, config: &TunnelConfiguration) -> Result<(), ProviderError> {
        let blob = Self::encode(config)?;
        let mut st = self.state.lock().await;
        st.counters.writes += 1;
        if let Some(err) = st.fail_writes.clone() {
            return Err(err);
        }

        let entry = st.entries.get_mut(handle).ok_or_else(|| unknown(handle))?;
        entry.blob = blob;
        entry.enabled = true;
        debug!("Provider updated {}", handle);
        Ok(())
    }

    async fn remove(&self, handle: &ProviderHandle) -> Result<(), ProviderError> {
        let mut st = self.state.lock().await;
        st.counters.writes += 1;
        if let Some(err) = st.fail_writes.clone() {
            return Err(err);
        }

        let mut entry = st.entries.remove(handle).ok_or_else(|| unknown(handle))?;
        st.order.retain(|h| h != handle);
        if entry.state != ConnectionState::Disconnected {
            entry.transition(ConnectionState::Disconnected);
        }
        debug!("Provider removed {}", handle);
        Ok(())
    }

    async fn enable(&self, handle: &ProviderHandle) -> Result<(), ProviderError> {
        let mut st = self.state.lock().await;
        st.counters.enable += 1;
        let entry = st.entries.get_mut(handle).ok_or_else(|| unknown(handle))?;
        entry.enabled = true;
        Ok(())
    }

    async fn reload(&self, handle: &ProviderHandle) -> Result<(), ProviderError> {
        let mut st = self.state.lock().await;
        st.counters.reload += 1;
        if st.entries.contains_key(handle) {
            Ok(())
        } else {
            Err(unknown(handle))
        }
    }

    async fn start(&self, handle: &ProviderHandle, options: &StartOptions) -> Result<(), ProviderError> {
        let mut st = self.state.lock().await;
        st.counters.start += 1;
        let auto_connect = st.auto_connect;

        let enabled = st.entries.get(handle).ok_or_else(|| unknown(handle))?.enabled;
        if !enabled {
            return Err(ProviderError::Disabled);
        }
        if let Some(err) = st.start_failures.pop_front() {
            debug!("Provider start of {} failing with injected error: {}", handle, err);
            return Err(err);
        }

        let entry = st.entries.get_mut(handle).ok_or_else(|| unknown(handle))?;
        entry.last_options = Some(options.clone());
        entry.transition(ConnectionState::Connecting);
        if auto_connect {
            entry.transition(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn stop(&self, handle: &ProviderHandle) {
        let mut st = self.state.lock().await;
        st.counters.stop += 1;
        if let Some(entry) = st.entries.get_mut(handle) {
            if entry.state != ConnectionState::Disconnected {
                entry.transition(ConnectionState::Disconnecting);
                entry.transition(ConnectionState::Disconnected);
            }
        }
    }

    async fn current_status(&self, handle: &ProviderHandle) -> ConnectionState {
        let st = self.state.lock().await;
        st.entries.get(handle).map(|e| e.state).unwrap_or(ConnectionState::Invalid)
    }

    async fn subscribe(&self, handle: &ProviderHandle) -> broadcast::Receiver<ConnectionState> {
        let st = self.state.lock().await;
        match st.entries.get(handle) {
            Some(entry) => entry.events.subscribe(),
            // Sender dropped right away: the receiver reports Closed
            None => broadcast::channel(1).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel_config::tests::sample;

    #[tokio::test]
    async fn test_persist_stores_opaque_blob() {
        let provider = InMemoryProvider::new();
        let config = sample("a", &[Some("10.0.0.1:1")]);

        let handle = provider.persist(&config).await.unwrap();
        assert_eq!(provider.stored_configuration(&handle).await, Some(config.clone()));
        assert_eq!(provider.load_all().await.unwrap(), vec![(handle, config)]);
    }

    #[tokio::test]
    async fn test_start_stop_notifications() {
        let provider = InMemoryProvider::new();
        let config = sample("a", &[Some("10.0.0.1:1")]);
        let handle = provider.persist(&config).await.unwrap();
        let mut rx = provider.subscribe(&handle).await;

        let options = StartOptions::generate(&config, &config.endpoints());
        provider.start(&handle, &options).await.unwrap();
        provider.stop(&handle).await;

        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connected);
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Disconnecting);
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(provider.current_status(&handle).await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let provider = InMemoryProvider::new();
        let config = sample("a", &[Some("10.0.0.1:1")]);
        let handle = provider.persist(&config).await.unwrap();
        let options = StartOptions::generate(&config, &config.endpoints());

        provider.fail_next_starts([ProviderError::StaleConfiguration]).await;
        assert_eq!(provider.start(&handle, &options).await, Err(ProviderError::StaleConfiguration));

        provider.disable(&handle).await;
        assert_eq!(provider.start(&handle, &options).await, Err(ProviderError::Disabled));
        provider.enable(&handle).await.unwrap();
        assert!(provider.start(&handle, &options).await.is_ok());
        assert_eq!(provider.start_count().await, 3);

        provider.fail_writes(Some(ProviderError::Other("read-only".into()))).await;
        assert!(provider.persist(&config).await.is_err());
        assert_eq!(provider.len().await, 1);
    }

    #[tokio::test]
    async fn test_seed_keeps_state_and_decodable_blob() {
        let provider = InMemoryProvider::new();
        let config = sample("seeded", &[Some("10.0.0.1:1")]);

        let handle = provider.seed(&config, ConnectionState::Connected).await.unwrap();
        assert_eq!(provider.current_status(&handle).await, ConnectionState::Connected);
        assert_eq!(provider.stored_configuration(&handle).await, Some(config.clone()));
        assert_eq!(provider.load_all().await.unwrap(), vec![(handle, config)]);
        assert_eq!(provider.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let provider = InMemoryProvider::new();
        let handle = ProviderHandle::new("missing");
        assert_eq!(provider.current_status(&handle).await, ConnectionState::Invalid);
        assert!(provider.reload(&handle).await.is_err());

        let mut rx = provider.subscribe(&handle).await;
        assert!(rx.recv().await.is_err());
    }
}
