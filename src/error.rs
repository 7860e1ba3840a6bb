//! Error types for tunnelmgr

use std::fmt;
use std::io;
use thiserror::Error;

use crate::tunnel::TunnelSummary;

/// Errors reported by the OS-level VPN provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The persisted provider configuration is disabled
    #[error("provider configuration is disabled")]
    Disabled,
    /// The provider rejected the persisted configuration as invalid
    #[error("provider configuration is invalid")]
    InvalidConfiguration,
    /// The persisted configuration changed underneath the provider
    #[error("provider configuration is stale")]
    StaleConfiguration,
    /// Any other provider failure
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether a reload of the persisted configuration may fix this error
    pub fn is_invalid_or_stale(&self) -> bool {
        matches!(self, ProviderError::InvalidConfiguration | ProviderError::StaleConfiguration)
    }
}

/// Provider write that failed during a structural operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Add,
    Modify,
    Remove,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOperation::Add => write!(f, "add"),
            WriteOperation::Modify => write!(f, "modify"),
            WriteOperation::Remove => write!(f, "remove"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TunnelError {
    /// A tunnel with this name already exists
    #[error("A tunnel named '{0}' already exists")]
    DuplicateName(String),
    /// Tunnel not found
    #[error("Tunnel not found: {0}")]
    NotFound(String),
    /// Configuration rejected before reaching the provider
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The provider refused to persist a change
    #[error("Provider failed to {operation} tunnel: {source}")]
    ProviderWriteFailed {
        operation: WriteOperation,
        #[source]
        source: ProviderError,
    },
    /// No peer carries an endpoint
    #[error("No peer has an endpoint")]
    NoEndpoint,
    /// No peer endpoint could be resolved
    #[error("DNS resolution of peer endpoints failed")]
    DnsResolutionFailed,
    /// Provider start/stop/reload failed or retries were exhausted
    #[error("Tunnel operation failed: {0}")]
    ProviderOperationFailed(#[source] ProviderError),
    /// Activation requested for a tunnel that is not inactive
    #[error("Tunnel is not inactive")]
    NotInactive,
    /// Activation requested while another tunnel is engaged
    #[error("Another tunnel is already active")]
    AnotherTunnelActive,
    /// Deactivation requested for an inactive tunnel
    #[error("Tunnel is already inactive")]
    AlreadyInactive,
    /// Deactivation requested while an activation is still in flight
    #[error("Tunnel activation is still in progress")]
    NotYetEngaged,
    /// Settings error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type TunnelResult<T> = Result<T, TunnelError>;

/// Failure part-way through a sequential batch add
#[derive(Debug, Error)]
#[error("Batch add stopped with {not_attempted} configuration(s) not attempted: {error}")]
pub struct BatchAddError {
    /// Items added before the failure
    pub added: Vec<TunnelSummary>,
    /// Items after the failing one that were never attempted
    pub not_attempted: usize,
    #[source]
    pub error: TunnelError,
}
