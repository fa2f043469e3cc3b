//! Builds interface configurations for each role.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;

use crate::config::{InterfaceConfig, PeerConfig};
use crate::environment::EnvironmentProfile;
use crate::error::Result;
use crate::keys::{KeyPair, PublicKey};
use crate::nat::NatRule;
use crate::types::{AllowedIp, Endpoint, TunnelMode};

/// Keepalive interval for client peers, in seconds.
pub const DEFAULT_KEEPALIVE: u16 = 25;

/// Default listen port for servers.
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Resolvers pushed to full-tunnel clients.
pub const DEFAULT_DNS: [IpAddr; 2] = [
    IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)),
    IpAddr::V4(std::net::Ipv4Addr::new(1, 0, 0, 1)),
];

/// Tunables for client configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Resolvers used in full-tunnel mode.
    pub dns: Vec<IpAddr>,
    /// Keepalive interval towards the server.
    pub keepalive: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dns: DEFAULT_DNS.to_vec(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Builds the server's interface configuration.
///
/// The NAT rule for the network containing `vpn_address` is installed and
/// removed by the interface's own up/down hooks. Peers start empty and are
/// appended later.
#[must_use]
pub fn build_server_config(
    identity: &KeyPair,
    vpn_address: IpNet,
    listen_port: u16,
    environment: &EnvironmentProfile,
) -> InterfaceConfig {
    let rule = NatRule::new(vpn_address, environment.egress_interface.clone());
    debug!(
        subnet = %rule.subnet,
        egress = %rule.egress,
        nat = ?environment.nat,
        "building server configuration"
    );

    InterfaceConfig::new(identity.private_key().clone())
        .with_address(AllowedIp::new(vpn_address))
        .with_listen_port(listen_port)
        .with_hooks(environment.nat.up_hooks(&rule), environment.nat.down_hooks(&rule))
}

/// Builds a client's interface configuration with the server as its only peer.
///
/// # Errors
///
/// Returns `InvalidEndpoint` if `server_endpoint` is not `host:port`.
pub fn build_client_config(
    identity: &KeyPair,
    server_public_key: PublicKey,
    server_endpoint: &str,
    client_address: IpNet,
    tunnel_mode: TunnelMode,
    options: &ClientOptions,
) -> Result<InterfaceConfig> {
    let endpoint: Endpoint = server_endpoint.parse()?;

    let server = PeerConfig::new(server_public_key)
        .with_endpoint(endpoint)
        .with_persistent_keepalive(options.keepalive);

    let mut config = InterfaceConfig::new(identity.private_key().clone()).with_address(AllowedIp::new(client_address));

    let server = match tunnel_mode {
        TunnelMode::Full => {
            config.dns = options.dns.clone();
            server
                .with_allowed_ip(AllowedIp::any_v4())
                .with_allowed_ip(AllowedIp::any_v6())
        }
        TunnelMode::Split => server.with_allowed_ip(AllowedIp::new(client_address.trunc())),
    };

    debug!(mode = %tunnel_mode, allowed_ips = %server.allowed_ips_string(), "building client configuration");
    Ok(config.with_peer(server))
}
