//! NAT and packet-forwarding strategies.
//!
//! The server needs two things from the host: packet forwarding enabled,
//! and a masquerading rule that rewrites tunnel traffic leaving through the
//! egress interface. The rule is installed and removed by the tunnel engine
//! itself, through the `PostUp`/`PostDown` hooks rendered here, so it lives
//! exactly as long as the interface does.

use ipnet::IpNet;
use serde::Serialize;
use tracing::{info, warn};

use crate::command::{CommandRunner, Program, SafeCommand};
use crate::environment::OsFamily;
use crate::error::Result;

/// pf anchor holding burrow's NAT rule on BSD-like hosts.
pub const PF_ANCHOR: &str = "com.apple/burrow";

/// Placeholder `wg-quick` replaces with the interface name in hooks.
pub const INTERFACE_PLACEHOLDER: &str = "%i";

/// A masquerading rule for tunnel traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    /// VPN subnet whose source addresses are rewritten.
    pub subnet: IpNet,
    /// Interface the traffic leaves through.
    pub egress: String,
}

impl NatRule {
    /// Creates a rule for the network containing `subnet` (host bits are dropped).
    #[must_use]
    pub fn new(subnet: IpNet, egress: impl Into<String>) -> Self {
        Self {
            subnet: subnet.trunc(),
            egress: egress.into(),
        }
    }
}

/// OS-specific way of applying a [`NatRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NatStrategy {
    /// Linux netfilter via `iptables`.
    Iptables,
    /// BSD packet filter via `pfctl`.
    Pf,
}

impl NatStrategy {
    /// Selects the strategy for an OS family.
    #[must_use]
    pub const fn for_os(os: OsFamily) -> Self {
        match os {
            OsFamily::LinuxLike => Self::Iptables,
            OsFamily::BsdLike => Self::Pf,
        }
    }

    /// Hook commands that install the rule when the interface comes up.
    #[must_use]
    pub fn up_hooks(&self, rule: &NatRule) -> Vec<String> {
        match self {
            Self::Iptables => iptables_rules(rule, "-A"),
            Self::Pf => vec![
                "sysctl -w net.inet.ip.forwarding=1".to_string(),
                format!(
                    "echo \"nat on {egress} from {subnet} to any -> ({egress})\" | pfctl -a {PF_ANCHOR} -f -",
                    egress = rule.egress,
                    subnet = rule.subnet,
                ),
                "pfctl -E".to_string(),
            ],
        }
    }

    /// Hook commands that remove the rule when the interface goes down.
    #[must_use]
    pub fn down_hooks(&self, rule: &NatRule) -> Vec<String> {
        match self {
            Self::Iptables => iptables_rules(rule, "-D"),
            Self::Pf => vec![format!("pfctl -a {PF_ANCHOR} -F all")],
        }
    }
}

fn iptables_rules(rule: &NatRule, action: &str) -> Vec<String> {
    vec![
        format!("iptables {action} FORWARD -i {INTERFACE_PLACEHOLDER} -j ACCEPT"),
        format!("iptables {action} FORWARD -o {INTERFACE_PLACEHOLDER} -j ACCEPT"),
        format!(
            "iptables -t nat {action} POSTROUTING -s {} -o {} -j MASQUERADE",
            rule.subnet, rule.egress
        ),
    ]
}

/// Host packet-forwarding capability.
#[allow(async_fn_in_trait)]
pub trait NatEngine {
    /// Turns on IPv4 forwarding for the running system.
    async fn enable_forwarding(&self, os: OsFamily) -> Result<()>;
}

/// Enables forwarding with `sysctl`.
#[derive(Debug, Clone)]
pub struct SysctlNatEngine<R> {
    runner: R,
}

impl<R: CommandRunner> SysctlNatEngine<R> {
    /// Creates an engine running commands through `runner`.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> NatEngine for SysctlNatEngine<R> {
    async fn enable_forwarding(&self, os: OsFamily) -> Result<()> {
        let key = match os {
            OsFamily::LinuxLike => "net.ipv4.ip_forward=1",
            OsFamily::BsdLike => "net.inet.ip.forwarding=1",
        };
        SafeCommand::new(Program::Sysctl).args(["-w", key]).execute(&self.runner).await?;
        info!(setting = key, "packet forwarding enabled");
        Ok(())
    }
}

/// Enables forwarding, downgrading failure to a warning.
///
/// The up hooks re-apply what they need, so a failure here only matters for
/// an interface that is already running.
pub async fn enable_forwarding_or_warn<N: NatEngine>(engine: &N, os: OsFamily) -> bool {
    match engine.enable_forwarding(os).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "could not enable packet forwarding");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, ScriptedRunner};

    fn rule() -> NatRule {
        NatRule::new("10.0.0.1/24".parse().expect("valid net"), "eth0")
    }

    #[test]
    fn rule_truncates_to_network() {
        assert_eq!(rule().subnet.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn iptables_hooks_mirror_each_other() {
        let up = NatStrategy::Iptables.up_hooks(&rule());
        let down = NatStrategy::Iptables.down_hooks(&rule());
        assert_eq!(up.len(), down.len());
        assert_eq!(
            up[2],
            "iptables -t nat -A POSTROUTING -s 10.0.0.0/24 -o eth0 -j MASQUERADE"
        );
        for (u, d) in up.iter().zip(&down) {
            assert_eq!(u.replace(" -A ", " -D "), *d);
        }
    }

    #[test]
    fn pf_hooks_load_and_flush_anchor() {
        let rule = NatRule::new("10.8.0.0/24".parse().expect("valid net"), "en0");
        let up = NatStrategy::Pf.up_hooks(&rule);
        assert!(up.iter().any(|h| h.contains("nat on en0 from 10.8.0.0/24 to any -> (en0)")));
        assert_eq!(NatStrategy::Pf.down_hooks(&rule), vec!["pfctl -a com.apple/burrow -F all"]);
    }

    #[tokio::test]
    async fn sysctl_engine_uses_os_specific_key() {
        let runner = ScriptedRunner::new();
        let engine = SysctlNatEngine::new(runner.clone());
        engine.enable_forwarding(OsFamily::BsdLike).await.expect("forwarding");
        assert_eq!(runner.descriptions(), vec!["sysctl -w net.inet.ip.forwarding=1"]);
    }

    #[tokio::test]
    async fn forwarding_failure_is_not_fatal() {
        let runner = ScriptedRunner::new().otherwise(CommandOutput::failed(1, "permission denied"));
        let engine = SysctlNatEngine::new(runner);
        assert!(!enable_forwarding_or_warn(&engine, OsFamily::LinuxLike).await);
    }
}
