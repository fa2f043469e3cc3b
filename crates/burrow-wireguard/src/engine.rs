//! The tunnel engine seam.
//!
//! burrow never speaks the WireGuard protocol. Interfaces are brought up and
//! down by `wg-quick` from a configuration document, and inspected or
//! mutated while running through `wg`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::command::{CommandRunner, Program, SafeCommand};
use crate::config::PeerConfig;
use crate::environment::OsFamily;
use crate::error::{Result, WireGuardError};

/// Where `wg-quick` records generated interface names on BSD-like hosts.
pub const DEFAULT_NAME_DIR: &str = "/var/run/wireguard";

/// `wg` error text for an interface that does not exist. Linux reports the
/// netlink error, userspace engines a missing control socket.
const MISSING_DEVICE_MARKERS: [&str; 2] = ["No such device", "No such file or directory"];

fn is_missing_device(stderr: &str) -> bool {
    MISSING_DEVICE_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Operations on live tunnel interfaces.
#[allow(async_fn_in_trait)]
pub trait TunnelEngine {
    /// Brings up the interface described by the document at `config_path`.
    async fn up(&self, config_path: &Path) -> Result<()>;

    /// Tears down the interface described by the document at `config_path`.
    async fn down(&self, config_path: &Path) -> Result<()>;

    /// Returns the engine's report for a running interface, or `None` if it
    /// does not exist.
    async fn show(&self, live_name: &str) -> Result<Option<String>>;

    /// Adds or updates a peer on a running interface.
    async fn set_peer(&self, live_name: &str, peer: &PeerConfig) -> Result<()>;

    /// Maps a nominal interface name to the name the OS assigned, if the
    /// interface is running.
    async fn resolve_live_name(&self, nominal: &str) -> Result<Option<String>>;
}

/// Returns the name to use for live calls on `nominal`.
///
/// On hosts with fixed interface names this is `nominal` itself. Elsewhere
/// the engine is asked; if it cannot answer, `nominal` is used with a warning.
pub async fn live_interface_name<E: TunnelEngine>(engine: &E, os: OsFamily, nominal: &str) -> String {
    if !os.has_generated_interface_names() {
        return nominal.to_string();
    }
    match engine.resolve_live_name(nominal).await {
        Ok(Some(live)) => {
            debug!(interface = nominal, live_name = %live, "resolved live interface name");
            live
        }
        Ok(None) => {
            warn!(interface = nominal, "live interface name unresolved, using nominal name");
            nominal.to_string()
        }
        Err(e) => {
            warn!(interface = nominal, error = %e, "live interface name unresolved, using nominal name");
            nominal.to_string()
        }
    }
}

/// Nominal interface name `wg-quick` derives from a document path.
#[must_use]
pub fn interface_name_from_path(config_path: &Path) -> Option<String> {
    config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Drives the system `wg` and `wg-quick` tools.
#[derive(Debug, Clone)]
pub struct WgQuickEngine<R> {
    runner: R,
    name_dir: PathBuf,
}

impl<R: CommandRunner> WgQuickEngine<R> {
    /// Creates an engine running tools through `runner`.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            name_dir: PathBuf::from(DEFAULT_NAME_DIR),
        }
    }

    /// Overrides the directory holding `<interface>.name` files.
    #[must_use]
    pub fn with_name_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.name_dir = dir.into();
        self
    }
}

impl<R: CommandRunner> TunnelEngine for WgQuickEngine<R> {
    async fn up(&self, config_path: &Path) -> Result<()> {
        SafeCommand::new(Program::WgQuick)
            .arg("up")
            .arg(config_path.to_string_lossy())
            .execute(&self.runner)
            .await?;
        Ok(())
    }

    async fn down(&self, config_path: &Path) -> Result<()> {
        SafeCommand::new(Program::WgQuick)
            .arg("down")
            .arg(config_path.to_string_lossy())
            .execute(&self.runner)
            .await?;
        Ok(())
    }

    async fn show(&self, live_name: &str) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&SafeCommand::new(Program::Wg).args(["show", live_name]))
            .await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else if is_missing_device(&output.stderr) {
            debug!(interface = live_name, stderr = %output.stderr.trim(), "interface not found");
            Ok(None)
        } else {
            Err(WireGuardError::command_failed(
                format!("wg show {live_name}"),
                output.exit_code.unwrap_or(-1),
                output.stderr.trim(),
            ))
        }
    }

    async fn set_peer(&self, live_name: &str, peer: &PeerConfig) -> Result<()> {
        let allowed: Vec<String> = peer.allowed_ips.iter().map(ToString::to_string).collect();
        let mut cmd = SafeCommand::new(Program::Wg)
            .args(["set", live_name, "peer"])
            .arg(peer.public_key.to_base64())
            .arg("allowed-ips")
            .arg(allowed.join(","));
        if let Some(ref endpoint) = peer.endpoint {
            cmd = cmd.args(["endpoint".to_string(), endpoint.to_string()]);
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            cmd = cmd.args(["persistent-keepalive".to_string(), keepalive.to_string()]);
        }
        cmd.execute(&self.runner).await?;
        Ok(())
    }

    async fn resolve_live_name(&self, nominal: &str) -> Result<Option<String>> {
        let path = self.name_dir.join(format!("{nominal}.name"));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let name = text.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WireGuardError::Io(e)),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct FakeInterfaceData {
    live_name: String,
    peers: Vec<PeerConfig>,
}

#[derive(Debug, Default)]
struct FakeState {
    interfaces: HashMap<String, FakeInterfaceData>,
    live_names: HashMap<String, String>,
    fail_up: Option<String>,
    fail_down: Option<String>,
    fail_set_peer: Option<String>,
    calls: Vec<String>,
}

/// An in-memory tunnel engine for tests.
///
/// Interfaces are keyed by the nominal name derived from the document path,
/// like `wg-quick` does.
#[derive(Clone, Debug, Default)]
pub struct FakeTunnelEngine {
    state: Arc<RwLock<FakeState>>,
}

impl FakeTunnelEngine {
    /// Creates an engine with no running interfaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `nominal` as running under `live_name`.
    pub async fn set_running(&self, nominal: &str, live_name: &str) {
        let mut state = self.state.write().await;
        state.interfaces.insert(
            nominal.to_string(),
            FakeInterfaceData {
                live_name: live_name.to_string(),
                peers: Vec::new(),
            },
        );
    }

    /// Name the OS will assign when `nominal` comes up.
    pub async fn assign_live_name(&self, nominal: &str, live_name: &str) {
        self.state
            .write()
            .await
            .live_names
            .insert(nominal.to_string(), live_name.to_string());
    }

    /// Makes every subsequent `up` fail with `stderr`.
    pub async fn fail_up(&self, stderr: &str) {
        self.state.write().await.fail_up = Some(stderr.to_string());
    }

    /// Makes every subsequent `down` fail with `stderr`.
    pub async fn fail_down(&self, stderr: &str) {
        self.state.write().await.fail_down = Some(stderr.to_string());
    }

    /// Makes every subsequent `set_peer` fail with `stderr`.
    pub async fn fail_set_peer(&self, stderr: &str) {
        self.state.write().await.fail_set_peer = Some(stderr.to_string());
    }

    /// Whether `nominal` is running.
    pub async fn is_up(&self, nominal: &str) -> bool {
        self.state.read().await.interfaces.contains_key(nominal)
    }

    /// Peers set on the running interface behind `nominal`.
    pub async fn live_peers(&self, nominal: &str) -> Vec<PeerConfig> {
        self.state
            .read()
            .await
            .interfaces
            .get(nominal)
            .map(|i| i.peers.clone())
            .unwrap_or_default()
    }

    /// Every engine call so far, e.g. `up wg0` or `set utun4`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    fn nominal(config_path: &Path) -> Result<String> {
        interface_name_from_path(config_path)
            .ok_or_else(|| WireGuardError::InvalidArguments(format!("{}: no interface name", config_path.display())))
    }
}

impl TunnelEngine for FakeTunnelEngine {
    async fn up(&self, config_path: &Path) -> Result<()> {
        let nominal = Self::nominal(config_path)?;
        let mut state = self.state.write().await;
        state.calls.push(format!("up {nominal}"));
        if let Some(ref stderr) = state.fail_up {
            return Err(WireGuardError::command_failed(format!("wg-quick up {}", config_path.display()), 1, stderr.clone()));
        }
        if state.interfaces.contains_key(&nominal) {
            return Err(WireGuardError::command_failed(
                format!("wg-quick up {}", config_path.display()),
                1,
                format!("wg-quick: `{nominal}' already exists"),
            ));
        }
        let live_name = state.live_names.get(&nominal).cloned().unwrap_or_else(|| nominal.clone());
        state.interfaces.insert(
            nominal,
            FakeInterfaceData {
                live_name,
                peers: Vec::new(),
            },
        );
        Ok(())
    }

    async fn down(&self, config_path: &Path) -> Result<()> {
        let nominal = Self::nominal(config_path)?;
        let mut state = self.state.write().await;
        state.calls.push(format!("down {nominal}"));
        if let Some(ref stderr) = state.fail_down {
            return Err(WireGuardError::command_failed(format!("wg-quick down {}", config_path.display()), 1, stderr.clone()));
        }
        if state.interfaces.remove(&nominal).is_none() {
            return Err(WireGuardError::command_failed(
                format!("wg-quick down {}", config_path.display()),
                1,
                format!("wg-quick: `{nominal}' is not a WireGuard interface"),
            ));
        }
        Ok(())
    }

    async fn show(&self, live_name: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        state.calls.push(format!("show {live_name}"));
        let report = state.interfaces.values().find(|i| i.live_name == live_name).map(|i| {
            let mut report = format!("interface: {}\n", i.live_name);
            for peer in &i.peers {
                let _ = write!(report, "\npeer: {}\n  allowed ips: {}\n", peer.public_key, peer.allowed_ips_string());
            }
            report
        });
        Ok(report)
    }

    async fn set_peer(&self, live_name: &str, peer: &PeerConfig) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(format!("set {live_name}"));
        if let Some(ref stderr) = state.fail_set_peer {
            return Err(WireGuardError::command_failed(format!("wg set {live_name}"), 1, stderr.clone()));
        }
        let interface = state
            .interfaces
            .values_mut()
            .find(|i| i.live_name == live_name)
            .ok_or_else(|| WireGuardError::command_failed(format!("wg set {live_name}"), 1, "No such device"))?;
        interface.peers.retain(|p| p.public_key != peer.public_key);
        interface.peers.push(peer.clone());
        Ok(())
    }

    async fn resolve_live_name(&self, nominal: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state.interfaces.get(nominal).map(|i| i.live_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, ScriptedRunner};
    use crate::keys::KeyPair;
    use crate::types::AllowedIp;

    fn peer() -> PeerConfig {
        PeerConfig::new(*KeyPair::generate().public_key())
            .with_allowed_ip(AllowedIp::from_cidr("10.0.0.2/32").expect("cidr"))
            .with_allowed_ip(AllowedIp::from_cidr("fd00::2/128").expect("cidr"))
    }

    #[tokio::test]
    async fn up_and_down_pass_document_path() {
        let runner = ScriptedRunner::new();
        let engine = WgQuickEngine::new(runner.clone());
        let path = Path::new("/etc/wireguard/wg0.conf");

        engine.up(path).await.expect("up");
        engine.down(path).await.expect("down");

        assert_eq!(
            runner.descriptions(),
            vec!["wg-quick up /etc/wireguard/wg0.conf", "wg-quick down /etc/wireguard/wg0.conf"]
        );
    }

    #[tokio::test]
    async fn show_missing_interface_is_none() {
        let runner = ScriptedRunner::new().respond(
            "wg show wg0",
            CommandOutput::failed(1, "Unable to access interface: No such device"),
        );
        let engine = WgQuickEngine::new(runner);
        assert_eq!(engine.show("wg0").await.expect("show"), None);
    }

    #[tokio::test]
    async fn show_without_permission_is_an_error() {
        let runner = ScriptedRunner::new().respond(
            "wg show wg0",
            CommandOutput::failed(1, "Unable to access interface: Operation not permitted"),
        );
        let engine = WgQuickEngine::new(runner);
        match engine.show("wg0").await {
            Err(WireGuardError::CommandFailed { command, stderr, .. }) => {
                assert_eq!(command, "wg show wg0");
                assert!(stderr.contains("Operation not permitted"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn show_missing_userspace_socket_is_none() {
        let runner = ScriptedRunner::new().respond(
            "wg show utun4",
            CommandOutput::failed(1, "Unable to access interface: No such file or directory"),
        );
        assert_eq!(WgQuickEngine::new(runner).show("utun4").await.expect("show"), None);
    }

    #[tokio::test]
    async fn show_relays_output_verbatim() {
        let report = "interface: wg0\n  public key: abc=\n  listening port: 51820\n";
        let runner = ScriptedRunner::new().respond("wg show wg0", CommandOutput::ok(report));
        let engine = WgQuickEngine::new(runner);
        assert_eq!(engine.show("wg0").await.expect("show").as_deref(), Some(report));
    }

    #[tokio::test]
    async fn set_peer_builds_wg_set() {
        let runner = ScriptedRunner::new();
        let engine = WgQuickEngine::new(runner.clone());
        let peer = peer();

        engine.set_peer("utun4", &peer).await.expect("set");

        assert_eq!(
            runner.descriptions(),
            vec![format!("wg set utun4 peer {} allowed-ips 10.0.0.2/32,fd00::2/128", peer.public_key)]
        );
    }

    #[tokio::test]
    async fn set_peer_failure_is_command_failed() {
        let runner = ScriptedRunner::new().otherwise(CommandOutput::failed(1, "Operation not permitted"));
        let engine = WgQuickEngine::new(runner);
        assert!(matches!(
            engine.set_peer("wg0", &peer()).await,
            Err(WireGuardError::CommandFailed { exit_code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn resolves_live_name_from_name_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("wg0.name"), "utun4\n").expect("seed");
        let engine = WgQuickEngine::new(ScriptedRunner::new()).with_name_dir(dir.path());

        assert_eq!(engine.resolve_live_name("wg0").await.expect("resolve").as_deref(), Some("utun4"));
        assert_eq!(engine.resolve_live_name("wg1").await.expect("resolve"), None);
    }

    #[tokio::test]
    async fn live_name_is_nominal_on_linux() {
        let engine = FakeTunnelEngine::new();
        engine.set_running("wg0", "utun9").await;
        assert_eq!(live_interface_name(&engine, OsFamily::LinuxLike, "wg0").await, "wg0");
        assert_eq!(live_interface_name(&engine, OsFamily::BsdLike, "wg0").await, "utun9");
    }

    #[tokio::test]
    async fn unresolved_live_name_degrades_to_nominal() {
        let engine = FakeTunnelEngine::new();
        assert_eq!(live_interface_name(&engine, OsFamily::BsdLike, "wg0").await, "wg0");
    }

    #[test]
    fn interface_name_comes_from_file_stem() {
        assert_eq!(
            interface_name_from_path(Path::new("/etc/wireguard/wg0.conf")).as_deref(),
            Some("wg0")
        );
    }

    #[tokio::test]
    async fn fake_engine_tracks_state() {
        let engine = FakeTunnelEngine::new();
        engine.assign_live_name("wg0", "utun3").await;
        let path = Path::new("/tmp/wg0.conf");

        engine.up(path).await.expect("up");
        assert!(engine.is_up("wg0").await);
        assert!(engine.show("utun3").await.expect("show").is_some());
        assert!(engine.up(path).await.is_err());

        engine.down(path).await.expect("down");
        assert!(!engine.is_up("wg0").await);
        assert!(engine.down(path).await.is_err());
    }
}
