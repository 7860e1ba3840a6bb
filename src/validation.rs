//! Input validation for tunnel configurations
//!
//! Everything here runs before a configuration is handed to the provider,
//! so a rejected configuration never causes a provider write.

use crate::error::{TunnelError, TunnelResult};

/// Maximum length for tunnel names
const MAX_TUNNEL_NAME_LEN: usize = 64;

/// Length of WireGuard key material in bytes
pub const KEY_LEN: usize = 32;

/// Smallest MTU accepted for a tunnel interface
const MIN_MTU: u16 = 576;

/// Validate a tunnel name
///
/// Names are compared case-sensitively by the registry; here we only reject
/// names that cannot be displayed or persisted.
pub fn validate_tunnel_name(name: &str) -> TunnelResult<()> {
    if name.trim().is_empty() {
        return Err(TunnelError::InvalidConfiguration(
            "Tunnel name cannot be empty".to_string()
        ));
    }

    if name.chars().count() > MAX_TUNNEL_NAME_LEN {
        return Err(TunnelError::InvalidConfiguration(
            format!("Tunnel name too long (max {} characters)", MAX_TUNNEL_NAME_LEN)
        ));
    }

    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(TunnelError::InvalidConfiguration(
            format!("Tunnel name contains control character {:?}", c)
        ));
    }

    Ok(())
}

/// Validate the length of decoded key material
pub fn validate_key_length(what: &str, bytes: &[u8]) -> TunnelResult<()> {
    if bytes.len() != KEY_LEN {
        return Err(TunnelError::InvalidConfiguration(
            format!("{} must be {} bytes, got {}", what, KEY_LEN, bytes.len())
        ));
    }
    Ok(())
}

/// Validate MTU value
pub fn validate_mtu(mtu: u16) -> TunnelResult<()> {
    if mtu < MIN_MTU {
        return Err(TunnelError::InvalidConfiguration(
            format!("MTU must be at least {} bytes", MIN_MTU)
        ));
    }
    Ok(())
}

/// Validate listen port
pub fn validate_listen_port(port: u16) -> TunnelResult<()> {
    if port == 0 {
        return Err(TunnelError::InvalidConfiguration(
            "Listen port cannot be 0 (omit it to pick a random port)".to_string()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_name_validation() {
        assert!(validate_tunnel_name("home").is_ok());
        assert!(validate_tunnel_name("Office VPN (US)").is_ok());
        assert!(validate_tunnel_name("züri").is_ok());

        assert!(validate_tunnel_name("").is_err());
        assert!(validate_tunnel_name("   ").is_err());
        assert!(validate_tunnel_name("bad\nname").is_err());
        assert!(validate_tunnel_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_key_length_validation() {
        assert!(validate_key_length("Private key", &[0u8; 32]).is_ok());
        assert!(validate_key_length("Private key", &[0u8; 31]).is_err());
        assert!(validate_key_length("Public key", &[]).is_err());
    }

    #[test]
    fn test_mtu_and_port_validation() {
        assert!(validate_mtu(1420).is_ok());
        assert!(validate_mtu(575).is_err());
        assert!(validate_listen_port(51820).is_ok());
        assert!(validate_listen_port(0).is_err());
    }
}
