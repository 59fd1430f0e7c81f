//! Trusted subnet checks on the agent's reported address.
//!
//! Agents put their outbound address in the `X-Real-IP` header; a server configured
//! with a trusted subnet refuses requests whose header is absent or outside it.

use crate::error::{PulseError, Result};
use ip_network::{IpNetwork, Ipv4Network, Ipv6Network};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;

pub const HEADER_REAL_IP: &str = "X-Real-IP";

/// An accepted client range in CIDR notation. Host bits are ignored, so
/// `192.168.1.7/24` is the same subnet as `192.168.1.0/24`. A bare address is a
/// single-host network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedSubnet(IpNetwork);

impl TrustedSubnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (&self.0, ip) {
            (IpNetwork::V4(network), IpAddr::V4(ip)) => network.contains(ip),
            (IpNetwork::V6(network), IpAddr::V6(ip)) => network.contains(ip),
            _ => false,
        }
    }

    /// Check the raw `X-Real-IP` header value.
    pub fn allows(&self, real_ip: Option<&str>) -> bool {
        real_ip
            .and_then(|raw| raw.trim().parse::<IpAddr>().ok())
            .is_some_and(|ip| self.contains(ip))
    }
}

impl FromStr for TrustedSubnet {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| PulseError::InvalidConfig {
            reason: format!("Invalid trusted subnet {}: {}", s, reason),
        };
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr = IpAddr::from_str(addr.trim()).map_err(|e| invalid(e.to_string()))?;
        let prefix = prefix
            .map(|p| p.trim().parse::<u8>().map_err(|e| invalid(e.to_string())))
            .transpose()?;

        let network = match addr {
            IpAddr::V4(ip) => Ipv4Network::new_truncate(ip, prefix.unwrap_or(32))
                .map(IpNetwork::V4)
                .map_err(|e| invalid(e.to_string()))?,
            IpAddr::V6(ip) => Ipv6Network::new_truncate(ip, prefix.unwrap_or(128))
                .map(IpNetwork::V6)
                .map_err(|e| invalid(e.to_string()))?,
        };
        Ok(Self(network))
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local address the OS would use to reach `base_url`.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn outbound_ip(base_url: &str) -> Option<IpAddr> {
    let url = reqwest::Url::parse(base_url).ok()?;
    let target = url.socket_addrs(|| None).ok()?.into_iter().next()?;
    let unspecified = match target {
        std::net::SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        std::net::SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind((unspecified, 0)).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
