//! Peer endpoints: numeric or symbolic host plus port

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::TunnelError;

/// Host part of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// Symbolic hostname, needs resolution before it reaches the provider
    Name(String),
}

impl Host {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Host::Name(_))
    }
}

impl From<IpAddr> for Host {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Host::Ipv4(v4),
            IpAddr::V6(v6) => Host::Ipv6(v6),
        }
    }
}

/// Network address at which a peer is reachable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: Host,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn is_numeric(&self) -> bool {
        self.host.is_numeric()
    }

    /// Socket address for numeric endpoints, `None` for hostnames
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.host {
            Host::Ipv4(v4) => Some(SocketAddr::new(IpAddr::V4(*v4), self.port)),
            Host::Ipv6(v6) => Some(SocketAddr::new(IpAddr::V6(*v6), self.port)),
            Host::Name(_) => None,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().into(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv4(v4) => write!(f, "{}:{}", v4, self.port),
            Host::Ipv6(v6) => write!(f, "[{}]:{}", v6, self.port),
            Host::Name(name) => write!(f, "{}:{}", name, self.port),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || TunnelError::ParseError(format!("Invalid endpoint '{}'", s));

        // [v6]:port
        if let Some(rest) = s.strip_prefix('[') {
            let (addr, port) = rest.split_once("]:").ok_or_else(invalid)?;
            let v6 = addr.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            return Ok(Self::new(Host::Ipv6(v6), port));
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains(':') {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        let host = match host.parse::<Ipv4Addr>() {
            Ok(v4) => Host::Ipv4(v4),
            Err(_) => {
                if !host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
                {
                    return Err(invalid());
                }
                Host::Name(host.to_string())
            }
        };

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TunnelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
