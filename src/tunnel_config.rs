//! Tunnel configuration value objects
//!
//! A `TunnelConfiguration` is what configuration storage hands us and what
//! the provider persists: one local interface plus an ordered list of peers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::endpoint::Endpoint;
use crate::error::{TunnelError, TunnelResult};
use crate::validation::{self, KEY_LEN};

/// 32 bytes of WireGuard key material, base64 on the wire
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: &[u8]) -> TunnelResult<Self> {
        validation::validate_key_length("Key", bytes)?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn from_base64(encoded: &str) -> TunnelResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| TunnelError::InvalidConfiguration(format!("Invalid base64 key: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; KEY_LEN]> for Key {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

// Keys end up in tracing output via Debug; only show a short prefix.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base64();
        write!(f, "Key({}…)", &encoded[..4])
    }
}

impl TryFrom<String> for Key {
    type Error = TunnelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_base64()
    }
}

/// Local interface side of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfiguration {
    pub name: String,
    pub private_key: Key,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<IpAddr>,
}

impl InterfaceConfiguration {
    pub fn new(name: impl Into<String>, private_key: Key) -> Self {
        Self {
            name: name.into(),
            private_key,
            addresses: Vec::new(),
            listen_port: None,
            mtu: None,
            dns: Vec::new(),
        }
    }
}

/// One remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfiguration {
    pub public_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<Key>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_ips: Vec<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfiguration {
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            persistent_keepalive: None,
        }
    }
}

/// Complete tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfiguration {
    pub interface: InterfaceConfiguration,
    #[serde(default)]
    pub peers: Vec<PeerConfiguration>,
}

impl TunnelConfiguration {
    pub fn new(interface: InterfaceConfiguration) -> Self {
        Self { interface, peers: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.interface.name
    }

    /// Peer endpoints in peer order, `None` where a peer has no endpoint
    pub fn endpoints(&self) -> Vec<Option<Endpoint>> {
        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Whether at least one peer carries an endpoint
    pub fn has_endpoint(&self) -> bool {
        self.peers.iter().any(|p| p.endpoint.is_some())
    }

    /// First peer endpoint, used as the provider-visible server address
    pub fn first_endpoint(&self) -> Option<&Endpoint> {
        self.peers.iter().find_map(|p| p.endpoint.as_ref())
    }

    /// Check invariants that must hold before the configuration is persisted
    pub fn validate(&self) -> TunnelResult<()> {
        validation::validate_tunnel_name(&self.interface.name)?;

        if let Some(mtu) = self.interface.mtu {
            validation::validate_mtu(mtu)?;
        }
        if let Some(port) = self.interface.listen_port {
            validation::validate_listen_port(port)?;
        }

        for (i, peer) in self.peers.iter().enumerate() {
            if peer.public_key == self.interface.private_key {
                return Err(TunnelError::InvalidConfiguration(
                    format!("Peer {} public key equals the interface private key", i)
                ));
            }
            if self.peers[..i].iter().any(|p| p.public_key == peer.public_key) {
                return Err(TunnelError::InvalidConfiguration(
                    format!("Peer {} duplicates the public key of an earlier peer", i)
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn key(byte: u8) -> Key {
        Key::from([byte; KEY_LEN])
    }

    pub(crate) fn sample(name: &str, endpoints: &[Option<&str>]) -> TunnelConfiguration {
        let mut config = TunnelConfiguration::new(InterfaceConfiguration::new(name, key(1)));
        for (i, endpoint) in endpoints.iter().enumerate() {
            let mut peer = PeerConfiguration::new(key(10 + i as u8));
            peer.endpoint = endpoint.map(|e| e.parse().unwrap());
            peer.allowed_ips = vec!["0.0.0.0/0".parse().unwrap()];
            config.peers.push(peer);
        }
        config
    }

    #[test]
    fn test_key_base64_round_trip_and_length() {
        let k = key(7);
        assert_eq!(Key::from_base64(&k.to_base64()).unwrap(), k);
        assert_eq!(k.to_hex().len(), 64);

        assert!(Key::from_base64("AAAA").is_err());
        assert!(Key::from_base64("not base64!").is_err());
        assert!(Key::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_key_debug_is_truncated() {
        let shown = format!("{:?}", key(7));
        assert!(shown.starts_with("Key("));
        assert!(!shown.contains(&key(7).to_base64()));
    }

    #[test]
    fn test_endpoint_helpers() {
        let config = sample("a", &[None, Some("vpn.example.com:51820"), Some("10.0.0.1:1")]);
        assert!(config.has_endpoint());
        assert_eq!(config.endpoints().len(), 3);
        assert_eq!(config.first_endpoint().unwrap().to_string(), "vpn.example.com:51820");

        let bare = sample("b", &[None]);
        assert!(!bare.has_endpoint());
        assert!(bare.first_endpoint().is_none());
    }

    #[test]
    fn test_validate() {
        assert!(sample("ok", &[Some("10.0.0.1:1")]).validate().is_ok());

        let mut bad_mtu = sample("mtu", &[]);
        bad_mtu.interface.mtu = Some(100);
        assert!(bad_mtu.validate().is_err());

        let mut dup = sample("dup", &[Some("10.0.0.1:1"), Some("10.0.0.2:1")]);
        dup.peers[1].public_key = dup.peers[0].public_key.clone();
        assert!(dup.validate().is_err());

        assert!(sample("", &[]).validate().is_err());
    }

    #[test]
    fn test_serde_json_round_trip() {
        let config = sample("json", &[Some("[2001:db8::1]:51820")]);
        let blob = serde_json::to_vec(&config).unwrap();
        let back: TunnelConfiguration = serde_json::from_slice(&blob).unwrap();
        assert_eq!(back, config);
    }
}
