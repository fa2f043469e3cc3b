//! IPv6 leak protection for client tunnels.
//!
//! Client tunnels route IPv4 through the server. A host with a working IPv6
//! stack would still reach the internet directly over IPv6, so the stack is
//! suspended while the tunnel is up and restored when it goes down.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::command::{CommandRunner, Program, SafeCommand};
use crate::environment::OsFamily;
use crate::error::{Result, WireGuardError};

/// Suspends and restores an auxiliary network stack.
#[allow(async_fn_in_trait)]
pub trait LeakGuard {
    /// Suspends the stack before a tunnel comes up.
    async fn suspend(&self) -> Result<()>;

    /// Restores the stack after a tunnel goes down.
    async fn restore(&self) -> Result<()>;
}

/// Toggles IPv6 with `sysctl` (Linux) or `networksetup` (macOS).
#[derive(Debug, Clone)]
pub struct Ipv6LeakGuard<R> {
    runner: R,
    os: OsFamily,
    services: Vec<String>,
}

impl<R: CommandRunner> Ipv6LeakGuard<R> {
    /// Creates a guard for `os`.
    ///
    /// `services` names the network services to toggle on BSD-like hosts.
    /// When empty, every enabled service reported by
    /// `networksetup -listallnetworkservices` is used.
    pub fn new(runner: R, os: OsFamily, services: Vec<String>) -> Self {
        Self { runner, os, services }
    }

    async fn network_services(&self) -> Result<Vec<String>> {
        if !self.services.is_empty() {
            return Ok(self.services.clone());
        }
        let output = SafeCommand::new(Program::Networksetup)
            .arg("-listallnetworkservices")
            .execute(&self.runner)
            .await?;
        Ok(parse_network_services(&output.stdout))
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        match self.os {
            OsFamily::LinuxLike => {
                let value = if enabled { "0" } else { "1" };
                SafeCommand::new(Program::Sysctl)
                    .arg("-w")
                    .arg(format!("net.ipv6.conf.all.disable_ipv6={value}"))
                    .execute(&self.runner)
                    .await?;
            }
            OsFamily::BsdLike => {
                let flag = if enabled { "-setv6automatic" } else { "-setv6off" };
                for service in self.network_services().await? {
                    SafeCommand::new(Program::Networksetup)
                        .args([flag, service.as_str()])
                        .execute(&self.runner)
                        .await?;
                    debug!(service = %service, flag, "toggled ipv6");
                }
            }
        }
        Ok(())
    }
}

impl<R: CommandRunner> LeakGuard for Ipv6LeakGuard<R> {
    async fn suspend(&self) -> Result<()> {
        self.set_enabled(false).await?;
        info!("ipv6 suspended while tunnel is up");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        self.set_enabled(true).await?;
        info!("ipv6 restored");
        Ok(())
    }
}

/// Extracts enabled services from `networksetup -listallnetworkservices`.
///
/// The first line is a banner; disabled services are prefixed with `*`.
#[must_use]
pub fn parse_network_services(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('*'))
        .map(str::to_string)
        .collect()
}

/// A guard that does nothing, used for the server role.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLeakGuard;

impl LeakGuard for NoopLeakGuard {
    async fn suspend(&self) -> Result<()> {
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeGuardState {
    suspended: bool,
    events: Vec<&'static str>,
    fail_suspend: bool,
    fail_restore: bool,
}

/// A guard that records calls, for tests.
#[derive(Clone, Debug, Default)]
pub struct FakeLeakGuard {
    state: Arc<RwLock<FakeGuardState>>,
}

impl FakeLeakGuard {
    /// Creates a guard with the stack enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `suspend` fail.
    pub async fn fail_suspend(&self) {
        self.state.write().await.fail_suspend = true;
    }

    /// Makes `restore` fail.
    pub async fn fail_restore(&self) {
        self.state.write().await.fail_restore = true;
    }

    /// Whether the stack is currently suspended.
    pub async fn is_suspended(&self) -> bool {
        self.state.read().await.suspended
    }

    /// `"suspend"` and `"restore"` events in call order.
    pub async fn events(&self) -> Vec<&'static str> {
        self.state.read().await.events.clone()
    }
}

impl LeakGuard for FakeLeakGuard {
    async fn suspend(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.events.push("suspend");
        if state.fail_suspend {
            return Err(WireGuardError::command_failed("sysctl", 1, "read-only file system"));
        }
        state.suspended = true;
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.events.push("restore");
        if state.fail_restore {
            return Err(WireGuardError::command_failed("sysctl", 1, "read-only file system"));
        }
        state.suspended = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, ScriptedRunner};

    #[tokio::test]
    async fn linux_toggles_sysctl() {
        let runner = ScriptedRunner::new();
        let guard = Ipv6LeakGuard::new(runner.clone(), OsFamily::LinuxLike, Vec::new());

        guard.suspend().await.expect("suspend");
        guard.restore().await.expect("restore");

        assert_eq!(
            runner.descriptions(),
            vec![
                "sysctl -w net.ipv6.conf.all.disable_ipv6=1",
                "sysctl -w net.ipv6.conf.all.disable_ipv6=0",
            ]
        );
    }

    #[tokio::test]
    async fn bsd_toggles_configured_services() {
        let runner = ScriptedRunner::new();
        let guard = Ipv6LeakGuard::new(runner.clone(), OsFamily::BsdLike, vec!["Wi-Fi".to_string()]);

        guard.suspend().await.expect("suspend");
        guard.restore().await.expect("restore");

        assert_eq!(
            runner.descriptions(),
            vec!["networksetup -setv6off Wi-Fi", "networksetup -setv6automatic Wi-Fi"]
        );
    }

    #[tokio::test]
    async fn bsd_discovers_services_when_none_configured() {
        let listing = "An asterisk (*) denotes that a network service is disabled.\nWi-Fi\n*Bluetooth PAN\nThunderbolt Bridge\n";
        let runner = ScriptedRunner::new().respond("networksetup -listallnetworkservices", CommandOutput::ok(listing));
        let guard = Ipv6LeakGuard::new(runner.clone(), OsFamily::BsdLike, Vec::new());

        guard.suspend().await.expect("suspend");

        let calls = runner.descriptions();
        assert!(calls.contains(&"networksetup -setv6off Wi-Fi".to_string()));
        assert!(calls.contains(&"networksetup -setv6off Thunderbolt Bridge".to_string()));
        assert!(!calls.iter().any(|c| c.contains("Bluetooth")));
    }

    #[tokio::test]
    async fn failure_propagates() {
        let runner = ScriptedRunner::new().otherwise(CommandOutput::failed(1, "permission denied"));
        let guard = Ipv6LeakGuard::new(runner, OsFamily::LinuxLike, Vec::new());
        assert!(guard.suspend().await.is_err());
    }

    #[test]
    fn service_listing_skips_banner_and_disabled() {
        let listing = "An asterisk (*) denotes that a network service is disabled.\nEthernet\n*VPN\n";
        assert_eq!(parse_network_services(listing), vec!["Ethernet"]);
    }
}
