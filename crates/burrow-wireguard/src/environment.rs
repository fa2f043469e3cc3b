//! Host environment detection.
//!
//! Classifies the operating system family once per invocation, finds the
//! outward-facing interface and selects the matching NAT strategy. Detection
//! is read-only.

use serde::Serialize;
use tracing::{debug, warn};

use crate::command::{CommandRunner, Program, SafeCommand};
use crate::error::{Result, WireGuardError};
use crate::nat::NatStrategy;

/// Fallback egress interface on Linux-like hosts.
pub const DEFAULT_LINUX_EGRESS: &str = "eth0";

/// Fallback egress interface on BSD-like hosts.
pub const DEFAULT_BSD_EGRESS: &str = "en0";

/// Operating system family, as far as tunnel management is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    /// Linux: iproute2, iptables, fixed interface names.
    LinuxLike,
    /// macOS and the BSDs: `route`, pf, generated `utun` interface names.
    BsdLike,
}

impl OsFamily {
    /// Classifies an OS name as reported by `std::env::consts::OS`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` for anything that is neither Linux nor BSD-like.
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Self::LinuxLike),
            "macos" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => Ok(Self::BsdLike),
            other => Err(WireGuardError::UnsupportedPlatform { os: other.to_string() }),
        }
    }

    /// Classifies the host this binary was built for.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` on other platforms.
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Whether the tunnel engine assigns its own interface names.
    #[must_use]
    pub const fn has_generated_interface_names(&self) -> bool {
        matches!(self, Self::BsdLike)
    }

    /// Interface used when egress detection yields nothing.
    #[must_use]
    pub const fn default_egress(&self) -> &'static str {
        match self {
            Self::LinuxLike => DEFAULT_LINUX_EGRESS,
            Self::BsdLike => DEFAULT_BSD_EGRESS,
        }
    }
}

/// Everything burrow needs to know about the host, recomputed per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentProfile {
    /// Operating system family.
    pub os_family: OsFamily,
    /// Interface carrying the default route.
    pub egress_interface: String,
    /// NAT strategy matching the OS family.
    pub nat: NatStrategy,
}

impl EnvironmentProfile {
    /// Builds a profile from already-known parts.
    #[must_use]
    pub fn new(os_family: OsFamily, egress_interface: impl Into<String>) -> Self {
        Self {
            os_family,
            egress_interface: egress_interface.into(),
            nat: NatStrategy::for_os(os_family),
        }
    }
}

/// Detects the host profile.
///
/// # Errors
///
/// Returns `UnsupportedPlatform` if the OS family cannot be classified. Egress
/// detection problems never fail this call.
pub async fn detect<R: CommandRunner>(runner: &R) -> Result<EnvironmentProfile> {
    let os_family = OsFamily::current()?;
    let egress = detect_egress_interface(runner, os_family).await;
    Ok(EnvironmentProfile::new(os_family, egress))
}

/// Finds the interface carrying the default route.
///
/// Falls back to [`OsFamily::default_egress`] with a warning when the lookup
/// fails or prints nothing useful.
pub async fn detect_egress_interface<R: CommandRunner>(runner: &R, os: OsFamily) -> String {
    let lookup = match os {
        OsFamily::LinuxLike => SafeCommand::new(Program::Ip).args(["-4", "route", "show", "default"]),
        OsFamily::BsdLike => SafeCommand::new(Program::Route).args(["-n", "get", "default"]),
    };

    let detected = match lookup.execute(runner).await {
        Ok(output) => match os {
            OsFamily::LinuxLike => parse_ip_route_default(&output.stdout),
            OsFamily::BsdLike => parse_route_get_default(&output.stdout),
        },
        Err(e) => {
            debug!(error = %e, "default route lookup failed");
            None
        }
    };

    if let Some(name) = detected {
        debug!(egress = %name, "detected egress interface");
        return name;
    }

    let fallback = os.default_egress();
    warn!(fallback, "could not detect egress interface, using default");
    fallback.to_string()
}

/// Extracts the device from `ip route show default` output
/// (`default via 192.0.2.1 dev eth0 proto dhcp ...`).
#[must_use]
pub fn parse_ip_route_default(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.by_ref().find(|t| *t == "dev")?;
            tokens.next().map(str::to_string)
        })
}

/// Extracts the interface from BSD `route -n get default` output
/// (`  interface: en0`).
#[must_use]
pub fn parse_route_get_default(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("interface:")?.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
