//! WireGuard configuration documents.
//!
//! This module handles the INI-style format read by `wg-quick`. Rendering is
//! deterministic and always starts with a provenance comment. The parser
//! accepts everything the renderer produces, which makes the round trip
//! testable without the tunnel engine.

use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::error::{Result, WireGuardError};
use crate::fs::write_private;
use crate::keys::{PrivateKey, PublicKey};
use crate::types::{AllowedIp, Endpoint};

/// Tool name written into provenance comments.
pub const TOOL_NAME: &str = "burrow";

/// Configuration for a WireGuard interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// The interface's private key.
    pub private_key: PrivateKey,
    /// Addresses assigned to this interface.
    pub addresses: Vec<AllowedIp>,
    /// Optional listen port.
    pub listen_port: Option<u16>,
    /// DNS servers pushed while the interface is up.
    pub dns: Vec<IpAddr>,
    /// Commands run after the interface comes up.
    pub post_up: Vec<String>,
    /// Commands run after the interface goes down.
    pub post_down: Vec<String>,
    /// Configured peers, in document order.
    pub peers: Vec<PeerConfig>,
}

impl InterfaceConfig {
    /// Creates a new interface configuration with the given private key.
    #[must_use]
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            addresses: Vec::new(),
            listen_port: None,
            dns: Vec::new(),
            post_up: Vec::new(),
            post_down: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// Sets the listen port.
    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Adds an address.
    #[must_use]
    pub fn with_address(mut self, address: AllowedIp) -> Self {
        self.addresses.push(address);
        self
    }

    /// Adds a DNS server.
    #[must_use]
    pub fn with_dns(mut self, dns: IpAddr) -> Self {
        self.dns.push(dns);
        self
    }

    /// Sets the up/down lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, post_up: Vec<String>, post_down: Vec<String>) -> Self {
        self.post_up = post_up;
        self.post_down = post_down;
        self
    }

    /// Adds a peer.
    #[must_use]
    pub fn with_peer(mut self, peer: PeerConfig) -> Self {
        self.peers.push(peer);
        self
    }

    /// The interface's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }
}

/// Configuration for a WireGuard peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    /// The peer's public key.
    pub public_key: PublicKey,
    /// Allowed IPs for this peer.
    pub allowed_ips: Vec<AllowedIp>,
    /// Optional endpoint.
    pub endpoint: Option<Endpoint>,
    /// Optional persistent keepalive interval in seconds.
    pub persistent_keepalive: Option<u16>,
    /// Operator-facing label, written as a comment above the section.
    pub label: Option<String>,
}

impl PeerConfig {
    /// Creates a new peer config with the given public key.
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            allowed_ips: Vec::new(),
            endpoint: None,
            persistent_keepalive: None,
            label: None,
        }
    }

    /// Adds an allowed IP.
    #[must_use]
    pub fn with_allowed_ip(mut self, ip: AllowedIp) -> Self {
        self.allowed_ips.push(ip);
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the persistent keepalive interval.
    #[must_use]
    pub fn with_persistent_keepalive(mut self, seconds: u16) -> Self {
        self.persistent_keepalive = Some(seconds);
        self
    }

    /// Sets the label. Line breaks are replaced so the label stays one comment line.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label: String = label.into();
        let label = label.replace(['\n', '\r'], " ").trim().to_string();
        self.label = (!label.is_empty()).then_some(label);
        self
    }

    /// Comma-joined allowed IP list, as written after `AllowedIPs =`.
    #[must_use]
    pub fn allowed_ips_string(&self) -> String {
        let ips: Vec<String> = self.allowed_ips.iter().map(AllowedIp::to_cidr).collect();
        ips.join(", ")
    }
}

/// Origin stamp written as the first line of every document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    /// Generating tool and version.
    pub tool: String,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

impl Provenance {
    /// Stamp for this build of burrow at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Stamp for this build of burrow at a fixed time.
    #[must_use]
    pub fn at(generated_at: DateTime<Utc>) -> Self {
        Self {
            tool: format!("{TOOL_NAME} {}", env!("CARGO_PKG_VERSION")),
            generated_at,
        }
    }

    /// The comment line, without trailing newline.
    #[must_use]
    pub fn comment(&self) -> String {
        format!(
            "# Generated by {} on {}",
            self.tool,
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Renders a complete configuration document.
#[must_use]
pub fn render(config: &InterfaceConfig, provenance: &Provenance) -> String {
    let mut lines = vec![
        provenance.comment(),
        "[Interface]".to_string(),
        format!("PrivateKey = {}", config.private_key.to_base64()),
    ];
    if !config.addresses.is_empty() {
        lines.push(format!("Address = {}", joined(&config.addresses)));
    }
    lines.extend(config.listen_port.map(|port| format!("ListenPort = {port}")));
    if !config.dns.is_empty() {
        lines.push(format!("DNS = {}", joined(&config.dns)));
    }
    lines.extend(config.post_up.iter().map(|hook| format!("PostUp = {hook}")));
    lines.extend(config.post_down.iter().map(|hook| format!("PostDown = {hook}")));

    let mut text = terminated(&lines);
    for peer in &config.peers {
        text.push_str(&render_peer(peer));
    }
    text
}

/// Renders one peer section, preceded by a blank line.
///
/// Appending this to a rendered document yields a valid document.
#[must_use]
pub fn render_peer(peer: &PeerConfig) -> String {
    let mut lines = vec![String::new()];
    lines.extend(peer.label.as_ref().map(|label| format!("# {label}")));
    lines.push("[Peer]".to_string());
    lines.push(format!("PublicKey = {}", peer.public_key));
    if !peer.allowed_ips.is_empty() {
        lines.push(format!("AllowedIPs = {}", peer.allowed_ips_string()));
    }
    lines.extend(peer.endpoint.as_ref().map(|endpoint| format!("Endpoint = {endpoint}")));
    lines.extend(
        peer.persistent_keepalive
            .map(|seconds| format!("PersistentKeepalive = {seconds}")),
    );
    terminated(&lines)
}

fn joined<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn terminated(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Writes a rendered document to `path` with owner-only permissions,
/// replacing any previous content.
///
/// # Errors
///
/// Returns an IO error if the document cannot be written.
pub fn write_document(path: &Path, text: &str) -> Result<()> {
    write_private(path, text.as_bytes())
}

/// Reads and parses the document at `path`.
///
/// # Errors
///
/// Returns `ConfigNotFound` if the file does not exist, or a parse error.
pub fn read_document(path: &Path) -> Result<InterfaceConfig> {
    if !path.exists() {
        return Err(WireGuardError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    parse(&std::fs::read_to_string(path)?)
}

fn parse_error(line: usize, message: impl Into<String>) -> WireGuardError {
    WireGuardError::ParseError {
        line,
        message: message.into(),
    }
}

/// Parses a comma-separated value list, skipping empty items.
fn each<T>(value: &str, line: usize, key: &str, parse_one: impl Fn(&str) -> Option<T>) -> Result<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_one(item).ok_or_else(|| parse_error(line, format!("invalid {key}: {item}"))))
        .collect()
}

/// Section the parser is currently filling in.
enum Block {
    Preamble,
    Interface,
    Peer(PeerDraft),
}

/// Parses a WireGuard configuration document.
///
/// Comments are ignored, except that a comment directly above `[Peer]`
/// becomes that peer's label. Unknown keys are skipped.
///
/// # Errors
///
/// Returns `ParseError` with the offending line number.
pub fn parse(text: &str) -> Result<InterfaceConfig> {
    let mut interface = InterfaceDraft::default();
    let mut peers = Vec::new();
    let mut block = Block::Preamble;
    let mut comment: Option<&str> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() {
            comment = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            comment = Some(rest.trim());
            continue;
        }
        let label = comment.take();

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let next = match name.trim() {
                "Interface" => {
                    interface.opened_at.get_or_insert(line_no);
                    Block::Interface
                }
                "Peer" => Block::Peer(PeerDraft::new(line_no, label)),
                other => return Err(parse_error(line_no, format!("unknown section: {other}"))),
            };
            if let Block::Peer(draft) = std::mem::replace(&mut block, next) {
                peers.push(draft.finish()?);
            }
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| parse_error(line_no, format!("expected `key = value`, got: {line}")))?;

        match &mut block {
            Block::Preamble => return Err(parse_error(line_no, format!("{key} appears before any section"))),
            Block::Interface => interface.set(key, value, line_no)?,
            Block::Peer(draft) => draft.set(key, value, line_no)?,
        }
    }

    if let Block::Peer(draft) = block {
        peers.push(draft.finish()?);
    }
    interface.finish(peers)
}

#[derive(Default)]
struct InterfaceDraft {
    opened_at: Option<usize>,
    private_key: Option<PrivateKey>,
    addresses: Vec<AllowedIp>,
    listen_port: Option<u16>,
    dns: Vec<IpAddr>,
    post_up: Vec<String>,
    post_down: Vec<String>,
}

impl InterfaceDraft {
    fn set(&mut self, key: &str, value: &str, line_no: usize) -> Result<()> {
        match key {
            "PrivateKey" => {
                let private_key =
                    PrivateKey::from_base64(value).map_err(|e| parse_error(line_no, format!("PrivateKey: {e}")))?;
                self.private_key = Some(private_key);
            }
            "Address" => {
                let addresses = each(value, line_no, key, |a| AllowedIp::from_cidr_or_host(a).ok())?;
                self.addresses.extend(addresses);
            }
            "ListenPort" => {
                let port = value
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("invalid ListenPort: {value}")))?;
                self.listen_port = Some(port);
            }
            "DNS" => {
                let servers = each(value, line_no, key, |a| a.parse::<IpAddr>().ok())?;
                self.dns.extend(servers);
            }
            "PostUp" => self.post_up.push(value.to_string()),
            "PostDown" => self.post_down.push(value.to_string()),
            _ => debug!(key, line = line_no, "ignoring unknown [Interface] key"),
        }
        Ok(())
    }

    fn finish(self, peers: Vec<PeerConfig>) -> Result<InterfaceConfig> {
        let Some(private_key) = self.private_key else {
            return Err(parse_error(self.opened_at.unwrap_or(1), "[Interface] has no PrivateKey"));
        };
        Ok(InterfaceConfig {
            private_key,
            addresses: self.addresses,
            listen_port: self.listen_port,
            dns: self.dns,
            post_up: self.post_up,
            post_down: self.post_down,
            peers,
        })
    }
}

struct PeerDraft {
    opened_at: usize,
    label: Option<String>,
    public_key: Option<PublicKey>,
    allowed_ips: Vec<AllowedIp>,
    endpoint: Option<Endpoint>,
    keepalive: Option<u16>,
}

impl PeerDraft {
    fn new(opened_at: usize, label: Option<&str>) -> Self {
        Self {
            opened_at,
            label: label.filter(|l| !l.is_empty()).map(str::to_string),
            public_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            keepalive: None,
        }
    }

    fn set(&mut self, key: &str, value: &str, line_no: usize) -> Result<()> {
        match key {
            "PublicKey" => {
                let public_key =
                    PublicKey::from_base64(value).map_err(|e| parse_error(line_no, format!("PublicKey: {e}")))?;
                self.public_key = Some(public_key);
            }
            "AllowedIPs" => {
                let ips = each(value, line_no, key, |ip| AllowedIp::from_cidr_or_host(ip).ok())?;
                self.allowed_ips.extend(ips);
            }
            "Endpoint" => {
                let endpoint = value
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("invalid Endpoint: {value}")))?;
                self.endpoint = Some(endpoint);
            }
            "PersistentKeepalive" if value == "off" => self.keepalive = None,
            "PersistentKeepalive" => {
                let seconds = value
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("invalid PersistentKeepalive: {value}")))?;
                self.keepalive = Some(seconds);
            }
            _ => debug!(key, line = line_no, "ignoring unknown [Peer] key"),
        }
        Ok(())
    }

    fn finish(self) -> Result<PeerConfig> {
        let Some(public_key) = self.public_key else {
            return Err(parse_error(self.opened_at, "[Peer] has no PublicKey"));
        };
        Ok(PeerConfig {
            public_key,
            allowed_ips: self.allowed_ips,
            endpoint: self.endpoint,
            persistent_keepalive: self.keepalive,
            label: self.label,
        })
    }
}
