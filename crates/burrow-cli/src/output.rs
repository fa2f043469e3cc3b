//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::path::PathBuf;

use burrow_wireguard::{
    ConnectOutcome, DisconnectOutcome, HotReload, InterfaceState, NatStrategy, PublicKey, Role, TunnelMode,
};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of `server-setup`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSetupReport {
    /// Nominal interface name.
    pub interface: String,
    /// Server document.
    pub config_path: PathBuf,
    /// False when an existing document was kept.
    pub written: bool,
    /// Server public key, to hand to clients.
    pub public_key: PublicKey,
    /// Server VPN address.
    pub address: String,
    /// UDP listen port.
    pub listen_port: u16,
    /// Interface NAT traffic leaves through.
    pub egress_interface: String,
    /// NAT strategy in the hooks.
    pub nat: NatStrategy,
    /// Whether forwarding was enabled now.
    pub forwarding_enabled: bool,
}

impl TableDisplay for ServerSetupReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Server {}", self.interface)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Config:           {}", self.config_path.display())?;
        if !self.written {
            writeln!(writer, "                  (existing document kept, use --force to replace)")?;
        }
        writeln!(writer, "Public key:       {}", self.public_key)?;
        writeln!(writer, "Address:          {}", self.address)?;
        writeln!(writer, "Listen port:      {}", self.listen_port)?;
        writeln!(writer, "Egress:           {} ({:?})", self.egress_interface, self.nat)?;
        writeln!(
            writer,
            "Forwarding:       {}",
            if self.forwarding_enabled { "enabled" } else { "not enabled (applied on interface up)" }
        )?;
        writeln!(writer)?;
        writeln!(writer, "Add clients with: burrow add-peer <client-public-key> <vpn-ip>")?;
        Ok(())
    }
}

/// Result of `add-peer`.
#[derive(Debug, Clone, Serialize)]
pub struct PeerAddedReport {
    /// Nominal interface name.
    pub interface: String,
    /// Peer public key.
    pub public_key: PublicKey,
    /// Peer allowed IPs.
    pub allowed_ips: String,
    /// Peer label.
    pub label: Option<String>,
    /// Live interface update result.
    pub hot_reload: HotReload,
}

impl TableDisplay for PeerAddedReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Peer added to {}", self.interface)?;
        writeln!(writer, "  Public key:     {}", self.public_key)?;
        writeln!(writer, "  Allowed IPs:    {}", self.allowed_ips)?;
        if let Some(ref label) = self.label {
            writeln!(writer, "  Label:          {label}")?;
        }
        match self.hot_reload {
            HotReload::Applied => writeln!(writer, "  Live interface: updated")?,
            HotReload::Skipped => writeln!(writer, "  Live interface: down, applies on next start")?,
            HotReload::Failed(ref reason) => {
                writeln!(writer, "  Live interface: NOT updated ({reason}), applies on next restart")?;
            }
        }
        Ok(())
    }
}

/// Result of `client-setup`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSetupReport {
    /// Nominal interface name.
    pub interface: String,
    /// Client document.
    pub config_path: PathBuf,
    /// Client public key, to register on the server.
    pub public_key: PublicKey,
    /// Client VPN address.
    pub address: String,
    /// Server endpoint.
    pub endpoint: String,
    /// Routing scope.
    pub mode: TunnelMode,
    /// Routes sent through the tunnel.
    pub allowed_ips: String,
}

impl TableDisplay for ClientSetupReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Client {}", self.interface)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Config:           {}", self.config_path.display())?;
        writeln!(writer, "Public key:       {}", self.public_key)?;
        writeln!(writer, "Address:          {}", self.address)?;
        writeln!(writer, "Server:           {}", self.endpoint)?;
        writeln!(writer, "Mode:             {} ({})", self.mode, self.allowed_ips)?;
        writeln!(writer)?;
        writeln!(writer, "On the server run: sudo burrow add-peer {} <vpn-ip>", self.public_key)?;
        Ok(())
    }
}

/// What `connect` or `disconnect` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionResult {
    /// The interface was brought up.
    Connected,
    /// The interface was already up; nothing changed.
    AlreadyConnected,
    /// The interface was torn down.
    Disconnected,
    /// The interface was already down; nothing changed.
    AlreadyDisconnected,
}

impl std::fmt::Display for ConnectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::AlreadyConnected => "already connected",
            Self::Disconnected => "disconnected",
            Self::AlreadyDisconnected => "already disconnected",
        })
    }
}

impl From<&ConnectOutcome> for ConnectionResult {
    fn from(outcome: &ConnectOutcome) -> Self {
        match outcome {
            ConnectOutcome::Connected(_) => Self::Connected,
            ConnectOutcome::AlreadyConnected(_) => Self::AlreadyConnected,
        }
    }
}

impl From<DisconnectOutcome> for ConnectionResult {
    fn from(outcome: DisconnectOutcome) -> Self {
        match outcome {
            DisconnectOutcome::Disconnected => Self::Disconnected,
            DisconnectOutcome::AlreadyDisconnected => Self::AlreadyDisconnected,
        }
    }
}

/// Result of `connect` or `disconnect`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// Nominal interface name.
    pub interface: String,
    /// What happened.
    pub result: ConnectionResult,
    /// OS name of the running interface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_name: Option<String>,
}

impl TableDisplay for ConnectionReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let name = match self.live_name {
            Some(ref live) if *live != self.interface => format!("{} ({live})", self.interface),
            _ => self.interface.clone(),
        };
        writeln!(writer, "{name}: {}", self.result)?;
        Ok(())
    }
}

/// Result of `status` and `server-status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Nominal interface name.
    pub interface: String,
    /// Which document the interface comes from.
    pub role: Role,
    /// Local public key, if an identity exists.
    pub public_key: Option<PublicKey>,
    /// Peers in the document, if it exists.
    pub configured_peers: Option<usize>,
    /// Live state.
    pub state: InterfaceState,
}

impl TableDisplay for StatusReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match self.state {
            InterfaceState::Down => writeln!(writer, "{} ({}): down", self.interface, self.role)?,
            InterfaceState::Up { ref live_name, .. } => {
                writeln!(writer, "{} ({}): up as {live_name}", self.interface, self.role)?;
            }
        }
        if let Some(ref key) = self.public_key {
            writeln!(writer, "Public key:       {key}")?;
        }
        if let Some(count) = self.configured_peers {
            writeln!(writer, "Configured peers: {count}")?;
        }
        if let InterfaceState::Up { ref details, .. } = self.state {
            writeln!(writer)?;
            write!(writer, "{details}")?;
            if !details.ends_with('\n') {
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

/// Result of `keys`.
#[derive(Debug, Clone, Serialize)]
pub struct KeysReport {
    /// Key directory.
    pub key_dir: PathBuf,
    /// Server public key, if generated.
    pub server: Option<PublicKey>,
    /// Client public key, if generated.
    pub client: Option<PublicKey>,
}

impl TableDisplay for KeysReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Keys in {}", self.key_dir.display())?;
        writeln!(writer, "{:<8}  PUBLIC KEY", "ROLE")?;
        writeln!(writer, "{}", "─".repeat(54))?;
        for (role, key) in [("server", self.server), ("client", self.client)] {
            match key {
                Some(key) => writeln!(writer, "{role:<8}  {key}")?,
                None => writeln!(writer, "{role:<8}  (none)")?,
            }
        }
        Ok(())
    }
}
