use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::endpoint::Endpoint;
use crate::tunnel_config::TunnelConfiguration;

/// Options handed to the provider when starting a tunnel
///
/// Carries the configuration with every peer endpoint replaced by its
/// resolved numeric form. Peers whose endpoint could not be resolved are
/// passed without an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    pub configuration: TunnelConfiguration,
}

impl StartOptions {
    /// Build start options from a configuration and its resolved endpoints
    ///
    /// `resolved` is parallel to `config.peers`.
    pub fn generate(config: &TunnelConfiguration, resolved: &[Option<Endpoint>]) -> Self {
        let mut configuration = config.clone();

        for (i, peer) in configuration.peers.iter_mut().enumerate() {
            peer.endpoint = match resolved.get(i).cloned().flatten() {
                Some(ep) if ep.is_numeric() => Some(ep),
                Some(ep) => {
                    warn!("Dropping unresolved endpoint {} for peer {}", ep, i);
                    None
                }
                None => None,
            };
        }

        Self { configuration }
    }

    /// Endpoints the provider will use, in peer order
    pub fn endpoints(&self) -> Vec<Option<Endpoint>> {
        self.configuration.endpoints()
    }

    /// Render the WireGuard UAPI set-device text for the data plane
    pub fn uapi_config(&self) -> String {
        let iface = &self.configuration.interface;
        let mut out = String::new();

        out.push_str(&format!("private_key={}\n", iface.private_key.to_hex()));
        if let Some(port) = iface.listen_port {
            out.push_str(&format!("listen_port={}\n", port));
        }
        out.push_str("replace_peers=true\n");

        for peer in &self.configuration.peers {
            out.push_str(&format!("public_key={}\n", peer.public_key.to_hex()));
            if let Some(psk) = &peer.preshared_key {
                out.push_str(&format!("preshared_key={}\n", psk.to_hex()));
            }
            if let Some(addr) = peer.endpoint.as_ref().and_then(Endpoint::socket_addr) {
                out.push_str(&format!("endpoint={}\n", addr));
            }
            out.push_str(&format!(
                "persistent_keepalive_interval={}\n",
                peer.persistent_keepalive.unwrap_or(0)
            ));
            out.push_str("replace_allowed_ips=true\n");
            for range in &peer.allowed_ips {
                out.push_str(&format!("allowed_ip={}\n", range));
            }
        }

        out
    }
}
