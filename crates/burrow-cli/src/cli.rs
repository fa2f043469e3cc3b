//! Command-line argument parsing with clap.

use std::net::IpAddr;
use std::path::PathBuf;

use burrow_wireguard::{TunnelMode, DEFAULT_KEEPALIVE, DEFAULT_LISTEN_PORT};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ipnet::IpNet;

/// burrow - WireGuard server and client lifecycle manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "burrow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Nominal interface name.
    #[arg(short, long, global = true, env = "BURROW_INTERFACE", default_value = "wg0")]
    pub interface: String,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Log progress at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the server document.
    #[arg(long, global = true, env = "BURROW_SERVER_CONFIG_DIR")]
    pub server_config_dir: Option<PathBuf>,

    /// Directory holding the client document.
    #[arg(long, global = true, env = "BURROW_CLIENT_CONFIG_DIR")]
    pub client_config_dir: Option<PathBuf>,

    /// Directory holding identity key files.
    #[arg(long, global = true, env = "BURROW_KEY_DIR")]
    pub key_dir: Option<PathBuf>,

    /// How new keys are generated.
    #[arg(long, global = true, value_enum, env = "BURROW_KEY_ENGINE", default_value_t = KeyEngineArg::Wg)]
    pub key_engine: KeyEngineArg,

    /// Network services whose IPv6 is suspended while a client tunnel is up
    /// (macOS). Defaults to every enabled service.
    #[arg(long = "network-service", global = true, env = "BURROW_NETWORK_SERVICE", value_delimiter = ',')]
    pub network_services: Vec<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Key generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyEngineArg {
    /// `wg genkey` / `wg pubkey`.
    #[default]
    Wg,
    /// In-process x25519.
    Native,
}

/// Routing scope for a client tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Route all traffic through the server and override DNS.
    #[default]
    Full,
    /// Route only the VPN subnet.
    Split,
}

impl From<ModeArg> for TunnelMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => Self::Full,
            ModeArg::Split => Self::Split,
        }
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the server identity and document, and enable forwarding.
    ServerSetup(ServerSetupArgs),

    /// Register a client with the server and hot-reload it.
    AddPeer(AddPeerArgs),

    /// Show the server interface.
    ServerStatus,

    /// Create the client identity and document.
    ClientSetup(ClientSetupArgs),

    /// Bring a tunnel up.
    Connect(TargetArgs),

    /// Bring a tunnel down.
    Disconnect(TargetArgs),

    /// Show a tunnel's state.
    Status(TargetArgs),

    /// Show stored public keys.
    Keys,
}

impl Commands {
    /// The subcommand as typed on the command line.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerSetup(_) => "server-setup",
            Self::AddPeer(_) => "add-peer",
            Self::ServerStatus => "server-status",
            Self::ClientSetup(_) => "client-setup",
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Status(_) => "status",
            Self::Keys => "keys",
        }
    }

    /// Whether the subcommand needs an effective uid of 0.
    #[must_use]
    pub fn requires_root(&self) -> bool {
        matches!(
            self,
            Self::ServerSetup(_) | Self::AddPeer(_) | Self::ServerStatus | Self::Connect(_) | Self::Disconnect(_)
        )
    }
}

/// Arguments for `server-setup`.
#[derive(Args, Debug, Clone)]
pub struct ServerSetupArgs {
    /// Server address inside the VPN, with prefix.
    #[arg(short, long, default_value = "10.0.0.1/24")]
    pub address: IpNet,

    /// UDP listen port.
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,

    /// Overwrite an existing server document.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `add-peer`.
#[derive(Args, Debug, Clone)]
pub struct AddPeerArgs {
    /// The client's public key (base64).
    pub public_key: String,

    /// The client's VPN address; a bare address becomes a host route.
    pub vpn_ip: String,

    /// Label written above the peer section.
    #[arg(short, long)]
    pub label: Option<String>,
}

/// Arguments for `client-setup`.
#[derive(Args, Debug, Clone)]
pub struct ClientSetupArgs {
    /// The server's public key (base64).
    pub server_public_key: String,

    /// The server's endpoint, host:port.
    pub endpoint: String,

    /// This client's VPN address, with prefix.
    #[arg(default_value = "10.0.0.2/24")]
    pub vpn_ip: IpNet,

    /// Routing scope.
    #[arg(value_enum, default_value_t = ModeArg::Full)]
    pub mode: ModeArg,

    /// DNS servers for full-tunnel mode (default 1.1.1.1, 1.0.0.1).
    #[arg(long, value_delimiter = ',')]
    pub dns: Vec<IpAddr>,

    /// Keepalive interval in seconds.
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE)]
    pub keepalive: u16,
}

/// Selects which document `connect`, `disconnect` and `status` act on.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct TargetArgs {
    /// Act on the server document instead of the client document.
    #[arg(long)]
    pub server: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_setup_defaults() {
        let cli = Cli::parse_from(["burrow", "server-setup"]);
        match cli.command {
            Commands::ServerSetup(args) => {
                assert_eq!(args.address.to_string(), "10.0.0.1/24");
                assert_eq!(args.port, 51820);
                assert!(!args.force);
            }
            other => panic!("expected server-setup, got {other:?}"),
        }
        assert_eq!(cli.interface, "wg0");
        assert_eq!(cli.format, Format::Table);
    }

    #[test]
    fn parses_client_setup_positionals() {
        let cli = Cli::parse_from([
            "burrow",
            "client-setup",
            "c2VydmVy",
            "198.51.100.4:51820",
            "10.0.0.7/24",
            "split",
        ]);
        match cli.command {
            Commands::ClientSetup(args) => {
                assert_eq!(args.endpoint, "198.51.100.4:51820");
                assert_eq!(args.vpn_ip.to_string(), "10.0.0.7/24");
                assert_eq!(args.mode, ModeArg::Split);
                assert_eq!(args.keepalive, 25);
            }
            other => panic!("expected client-setup, got {other:?}"),
        }
    }

    #[test]
    fn client_setup_defaults_to_full_tunnel() {
        let cli = Cli::parse_from(["burrow", "client-setup", "key", "vpn.example.com:51820"]);
        match cli.command {
            Commands::ClientSetup(args) => {
                assert_eq!(args.mode, ModeArg::Full);
                assert_eq!(args.vpn_ip.to_string(), "10.0.0.2/24");
            }
            other => panic!("expected client-setup, got {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["burrow", "status", "--format", "json", "-i", "wg1", "--server"]);
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.interface, "wg1");
        assert!(matches!(cli.command, Commands::Status(TargetArgs { server: true })));
    }

    #[test]
    fn privileged_commands() {
        assert!(Cli::parse_from(["burrow", "add-peer", "k", "10.0.0.2"]).command.requires_root());
        assert!(Cli::parse_from(["burrow", "connect"]).command.requires_root());
        assert!(!Cli::parse_from(["burrow", "keys"]).command.requires_root());
        assert!(!Cli::parse_from(["burrow", "client-setup", "k", "h:1"]).command.requires_root());
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["burrow", "client-setup", "k", "h:1", "10.0.0.2/24", "half"]).is_err());
    }
}
