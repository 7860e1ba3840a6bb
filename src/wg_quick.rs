//! wg-quick configuration files
//!
//! Import and export of the `[Interface]` / `[Peer]` text format used by
//! wg-quick and most WireGuard tooling. The tunnel name is not part of the
//! file; callers pass it in (usually the file stem).

use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{TunnelError, TunnelResult};
use crate::tunnel_config::{InterfaceConfiguration, Key, PeerConfiguration, TunnelConfiguration};

#[derive(Debug, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

/// Partially parsed `[Interface]` section
#[derive(Default)]
struct InterfaceDraft {
    private_key: Option<Key>,
    addresses: Vec<IpNet>,
    listen_port: Option<u16>,
    mtu: Option<u16>,
    dns: Vec<IpAddr>,
}

fn parse_error(line_no: usize, msg: impl std::fmt::Display) -> TunnelError {
    TunnelError::ParseError(format!("line {}: {}", line_no, msg))
}

fn parse_list<T: std::str::FromStr>(line_no: usize, value: &str) -> TunnelResult<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(|e| parse_error(line_no, format!("'{}': {}", v, e))))
        .collect()
}

fn parse_number<T: std::str::FromStr>(line_no: usize, key: &str, value: &str) -> TunnelResult<T> {
    value
        .parse::<T>()
        .map_err(|_| parse_error(line_no, format!("invalid {} '{}'", key, value)))
}

/// Parse wg-quick text into a tunnel configuration named `name`
pub fn parse(name: &str, content: &str) -> TunnelResult<TunnelConfiguration> {
    let mut section = Section::None;
    let mut interface = InterfaceDraft::default();
    let mut seen_interface = false;
    let mut peers: Vec<PeerConfiguration> = Vec::new();
    // Peer keys may appear in any order, so the public key is only known at
    // the end of the section.
    let mut peer_draft: Option<(Option<Key>, PeerConfiguration)> = None;

    let finish_peer = |draft: Option<(Option<Key>, PeerConfiguration)>,
                       peers: &mut Vec<PeerConfiguration>,
                       line_no: usize|
     -> TunnelResult<()> {
        if let Some((public_key, mut peer)) = draft {
            peer.public_key = public_key
                .ok_or_else(|| parse_error(line_no, "[Peer] section without PublicKey"))?;
            peers.push(peer);
        }
        Ok(())
    };

    let mut line_no = 0;
    for raw in content.lines() {
        line_no += 1;
        let line = raw.split('#').next().unwrap_or("").trim();

        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            finish_peer(peer_draft.take(), &mut peers, line_no)?;
            section = match line[1..line.len() - 1].trim().to_ascii_lowercase().as_str() {
                "interface" => {
                    if seen_interface {
                        return Err(parse_error(line_no, "duplicate [Interface] section"));
                    }
                    seen_interface = true;
                    Section::Interface
                }
                "peer" => {
                    // Placeholder key, replaced when the section is finished
                    peer_draft = Some((None, PeerConfiguration::new(Key::from([0u8; 32]))));
                    Section::Peer
                }
                other => return Err(parse_error(line_no, format!("unknown section [{}]", other))),
            };
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error(line_no, format!("expected 'Key = Value', got '{}'", line)))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match section {
            Section::None => return Err(parse_error(line_no, "key outside of a section")),
            Section::Interface => match key.as_str() {
                "privatekey" => interface.private_key = Some(Key::from_base64(value)?),
                "address" => interface.addresses.extend(parse_list::<IpNet>(line_no, value)?),
                "listenport" => interface.listen_port = Some(parse_number(line_no, "ListenPort", value)?),
                "mtu" => interface.mtu = Some(parse_number(line_no, "MTU", value)?),
                "dns" => {
                    for entry in value.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                        match entry.parse::<IpAddr>() {
                            Ok(addr) => interface.dns.push(addr),
                            Err(_) => debug!("Ignoring DNS search domain '{}'", entry),
                        }
                    }
                }
                other => warn!("Ignoring unsupported [Interface] key '{}'", other),
            },
            Section::Peer => {
                let Some((public_key, peer)) = peer_draft.as_mut() else {
                    return Err(parse_error(line_no, "key outside of a section"));
                };
                match key.as_str() {
                    "publickey" => *public_key = Some(Key::from_base64(value)?),
                    "presharedkey" => peer.preshared_key = Some(Key::from_base64(value)?),
                    "allowedips" => peer.allowed_ips.extend(parse_list::<IpNet>(line_no, value)?),
                    "endpoint" => peer.endpoint = Some(value.parse()?),
                    "persistentkeepalive" => {
                        // "off" is accepted by wg(8)
                        if !value.eq_ignore_ascii_case("off") {
                            peer.persistent_keepalive =
                                Some(parse_number(line_no, "PersistentKeepalive", value)?);
                        }
                    }
                    other => warn!("Ignoring unsupported [Peer] key '{}'", other),
                }
            }
        }
    }
    finish_peer(peer_draft.take(), &mut peers, line_no)?;

    let private_key = interface
        .private_key
        .ok_or_else(|| TunnelError::ParseError("[Interface] section without PrivateKey".to_string()))?;

    let mut config = TunnelConfiguration::new(InterfaceConfiguration {
        name: name.to_string(),
        private_key,
        addresses: interface.addresses,
        listen_port: interface.listen_port,
        mtu: interface.mtu,
        dns: interface.dns,
    });
    config.peers = peers;
    config.validate()?;

    Ok(config)
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Render a tunnel configuration as wg-quick text
pub fn render(config: &TunnelConfiguration) -> String {
    let iface = &config.interface;
    let mut cfg = String::new();

    cfg.push_str("[Interface]\n");
    cfg.push_str(&format!("PrivateKey = {}\n", iface.private_key.to_base64()));
    if !iface.addresses.is_empty() {
        cfg.push_str(&format!("Address = {}\n", join(&iface.addresses)));
    }
    if let Some(listen_port) = iface.listen_port {
        cfg.push_str(&format!("ListenPort = {}\n", listen_port));
    }
    if let Some(mtu) = iface.mtu {
        cfg.push_str(&format!("MTU = {}\n", mtu));
    }
    if !iface.dns.is_empty() {
        cfg.push_str(&format!("DNS = {}\n", join(&iface.dns)));
    }

    for peer in &config.peers {
        cfg.push_str("\n[Peer]\n");
        cfg.push_str(&format!("PublicKey = {}\n", peer.public_key.to_base64()));
        if let Some(psk) = &peer.preshared_key {
            cfg.push_str(&format!("PresharedKey = {}\n", psk.to_base64()));
        }
        if !peer.allowed_ips.is_empty() {
            cfg.push_str(&format!("AllowedIPs = {}\n", join(&peer.allowed_ips)));
        }
        if let Some(endpoint) = &peer.endpoint {
            cfg.push_str(&format!("Endpoint = {}\n", endpoint));
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            cfg.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
        }
    }

    cfg
}

/// Read and parse a wg-quick file, naming the tunnel after the file stem
pub async fn import_file(path: &Path) -> TunnelResult<TunnelConfiguration> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| TunnelError::ParseError(format!("Cannot derive tunnel name from {:?}", path)))?;

    let content = tokio::fs::read_to_string(path).await?;
    parse(name, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel_config::tests::{key, sample};

    const SAMPLE: &str = "\
[Interface]
PrivateKey = AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=
Address = 10.64.0.2/32, fc00::2/128
DNS = 10.64.0.1, corp.example
MTU = 1420
PostUp = iptables -A FORWARD

[Peer]
# exit node
PublicKey = AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=
AllowedIPs = 0.0.0.0/0, ::/0
Endpoint = vpn.example.com:51820
PersistentKeepalive = 25
";

    #[test]
    fn test_parse_sample() {
        let config = parse("work", SAMPLE).unwrap();
        assert_eq!(config.name(), "work");
        assert_eq!(config.interface.private_key, key(1));
        assert_eq!(config.interface.addresses.len(), 2);
        assert_eq!(config.interface.dns, vec!["10.64.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.interface.mtu, Some(1420));
        assert_eq!(config.peers.len(), 1);

        let peer = &config.peers[0];
        assert_eq!(peer.public_key, key(2));
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.endpoint.as_ref().unwrap().to_string(), "vpn.example.com:51820");
        assert_eq!(peer.persistent_keepalive, Some(25));
    }

    #[test]
    fn test_parse_address_lists() {
        let text = "[Interface]\nPrivateKey = AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=\n\
                    Address = 10.8.0.2/32, fd00::2/128\nAddress = 10.9.0.2/24\n\
                    [Peer]\nPublicKey = AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=\n\
                    AllowedIPs = 10.0.0.0/8,,192.168.0.0/16\n";
        let config = parse("lists", text).unwrap();

        let addresses: Vec<IpNet> = ["10.8.0.2/32", "fd00::2/128", "10.9.0.2/24"]
            .iter()
            .map(|a| a.parse().unwrap())
            .collect();
        assert_eq!(config.interface.addresses, addresses);
        assert_eq!(
            config.peers[0].allowed_ips,
            vec!["10.0.0.0/8".parse::<IpNet>().unwrap(), "192.168.0.0/16".parse().unwrap()]
        );

        let bad = text.replace("10.9.0.2/24", "10.9.0.2/99");
        assert!(matches!(parse("lists", &bad), Err(TunnelError::ParseError(_))));
    }

    #[test]
    fn test_render_then_parse_preserves_configuration() {
        let mut config = sample("home", &[Some("192.0.2.1:51820"), None]);
        config.peers[0].preshared_key = Some(key(9));
        config.interface.listen_port = Some(51820);

        let text = render(&config);
        assert!(text.starts_with("[Interface]\n"));
        assert_eq!(text.matches("[Peer]").count(), 2);
        assert_eq!(parse("home", &text).unwrap(), config);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("x", "PrivateKey = abc").is_err());
        assert!(parse("x", "[Interface]\nAddress = 10.0.0.1/32\n").is_err());
        assert!(parse("x", "[Bogus]\n").is_err());
        assert!(parse("x", &format!("{}\n[Peer]\nAllowedIPs = 0.0.0.0/0\n", SAMPLE)).is_err());
        assert!(parse("x", "[Interface]\nPrivateKey = AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=\nMTU = big\n").is_err());
    }

    #[tokio::test]
    async fn test_import_file_uses_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.conf");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let config = import_file(&path).await.unwrap();
        assert_eq!(config.name(), "office");
    }
}
