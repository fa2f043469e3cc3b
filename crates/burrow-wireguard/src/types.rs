//! Core types for `WireGuard` configuration.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireGuardError};

/// An allowed IP address or network in CIDR notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedIp {
    network: IpNet,
}

impl AllowedIp {
    /// Creates a new allowed IP from an `IpNet`.
    #[must_use]
    pub fn new(network: IpNet) -> Self {
        Self { network }
    }

    /// Creates a single-host entry (`/32` for IPv4, `/128` for IPv6).
    #[must_use]
    pub fn host(addr: IpAddr) -> Self {
        Self {
            network: IpNet::from(addr),
        }
    }

    /// The IPv4 default route, `0.0.0.0/0`.
    #[must_use]
    pub fn any_v4() -> Self {
        Self::new(IpNet::V4(ipnet::Ipv4Net::default()))
    }

    /// The IPv6 default route, `::/0`.
    #[must_use]
    pub fn any_v6() -> Self {
        Self::new(IpNet::V6(ipnet::Ipv6Net::default()))
    }

    /// Returns the network.
    #[must_use]
    pub fn network(&self) -> &IpNet {
        &self.network
    }

    /// Creates an allowed IP from CIDR notation.
    ///
    /// # Errors
    ///
    /// Returns an error if the CIDR notation is invalid.
    pub fn from_cidr(s: &str) -> Result<Self> {
        let network = s
            .trim()
            .parse::<IpNet>()
            .map_err(|e| WireGuardError::InvalidCidr(format!("{s}: {e}")))?;
        Ok(Self { network })
    }

    /// Parses either CIDR notation or a bare address; a bare address becomes
    /// a single-host entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither.
    pub fn from_cidr_or_host(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.contains('/') {
            return Self::from_cidr(trimmed);
        }
        trimmed
            .parse::<IpAddr>()
            .map(Self::host)
            .map_err(|e| WireGuardError::InvalidCidr(format!("{s}: {e}")))
    }

    /// Returns the CIDR string representation.
    #[must_use]
    pub fn to_cidr(&self) -> String {
        self.network.to_string()
    }
}

impl FromStr for AllowedIp {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_cidr(s)
    }
}

impl fmt::Display for AllowedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// A `WireGuard` peer endpoint, `host:port`.
///
/// The host may be an IPv4 literal, a bracketed IPv6 literal or a DNS name;
/// name resolution is left to the tunnel engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or the port is zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(WireGuardError::InvalidEndpoint("empty host".to_string()));
        }
        if port == 0 {
            return Err(WireGuardError::InvalidEndpoint(format!("{host}: port must be non-zero")));
        }
        if host.chars().any(|c| c.is_whitespace() || c == ',' || c == '#') {
            return Err(WireGuardError::InvalidEndpoint(format!("{host}: invalid host")));
        }
        Ok(Self { host, port })
    }

    /// Returns the host part (IPv6 literals without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || WireGuardError::InvalidEndpoint(format!("'{s}' is not host:port"));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = tail.strip_prefix(':').ok_or_else(invalid)?;
            if host.parse::<std::net::Ipv6Addr>().is_err() {
                return Err(invalid());
            }
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
            // An unbracketed IPv6 literal is ambiguous.
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Self::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Routing scope of a client tunnel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// All traffic goes through the tunnel and DNS is overridden.
    #[default]
    Full,
    /// Only traffic for the VPN subnet goes through the tunnel.
    Split,
}

impl FromStr for TunnelMode {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "split" => Ok(Self::Split),
            other => Err(WireGuardError::InvalidArguments(format!(
                "unknown tunnel mode '{other}', expected 'full' or 'split'"
            ))),
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Split => write!(f, "split"),
        }
    }
}

/// Which side of the tunnel this host plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts many clients.
    Server,
    /// Connects to exactly one server.
    Client,
}

impl Role {
    /// Lowercase name, used as the key file prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
