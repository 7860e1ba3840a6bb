//! Settings for the tunnel manager

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::error::{TunnelError, TunnelResult};

/// Main tunnel manager settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Activation state machine settings
    #[serde(default)]
    pub activation: ActivationSettings,
    /// Endpoint resolver settings
    #[serde(default)]
    pub resolver: ResolverSettings,
    /// Notification channel settings
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationSettings {
    /// Start attempts before giving up on a disabled/invalid/stale provider configuration
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Per-hostname resolution timeout (milliseconds)
    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,
    /// Prefer an IPv4 result when a name has both address families
    #[serde(default = "default_prefer_ipv4")]
    pub prefer_ipv4: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Buffer size of the notification broadcast channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_resolver_timeout_ms() -> u64 {
    5000
}

fn default_prefer_ipv4() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts() }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolver_timeout_ms(),
            prefer_ipv4: default_prefer_ipv4(),
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

impl ResolverSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ManagerSettings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TunnelError::ConfigError(format!("Failed to read settings: {}", e)))?;

        let settings: Self = toml::from_str(&content)
            .map_err(|e| TunnelError::ConfigError(format!("Failed to parse settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TunnelResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TunnelError::ConfigError(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| TunnelError::ConfigError(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    fn validate(&self) -> TunnelResult<()> {
        if self.activation.max_attempts == 0 {
            return Err(TunnelError::ConfigError(
                "activation.max_attempts must be at least 1".to_string()
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(TunnelError::ConfigError(
                "events.channel_capacity must be at least 1".to_string()
            ));
        }
        Ok(())
    }
}
