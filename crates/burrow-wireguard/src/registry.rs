//! Peer registration on a server.
//!
//! New peers are appended to the server document and, when the interface is
//! running, pushed into it with `wg set` so existing sessions stay up. The
//! two steps are not transactional: the append happens first and the
//! document stays authoritative for the next restart if the live update
//! fails.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{render_peer, PeerConfig};
use crate::engine::{live_interface_name, TunnelEngine};
use crate::environment::OsFamily;
use crate::error::{Result, WireGuardError};
use crate::fs::append_private;
use crate::keys::PublicKey;
use crate::types::AllowedIp;

/// What happened to the running interface after a peer was appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HotReload {
    /// The peer was set on the running interface.
    Applied,
    /// The interface is down; the peer takes effect on next start.
    Skipped,
    /// The live update failed; the peer takes effect on next restart.
    Failed(String),
}

/// Result of [`PeerRegistry::add_peer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPeerOutcome {
    /// The peer as appended.
    pub peer: PeerConfig,
    /// Live interface update result.
    pub hot_reload: HotReload,
}

/// Appends peers to a server document and hot-reloads them.
#[derive(Debug, Clone)]
pub struct PeerRegistry<E> {
    engine: E,
    os: OsFamily,
    interface: String,
}

impl<E: TunnelEngine> PeerRegistry<E> {
    /// Creates a registry for the interface named `interface`.
    pub fn new(engine: E, os: OsFamily, interface: impl Into<String>) -> Self {
        Self {
            engine,
            os,
            interface: interface.into(),
        }
    }

    /// Registers a peer.
    ///
    /// `peer_address` may be a bare address (stored as a host route) or CIDR.
    /// Existing bytes of the document are never rewritten. Duplicate and
    /// overlapping addresses are not checked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` for a malformed address, `ConfigNotFound`
    /// if the document does not exist, or an IO error from the append. A
    /// failed hot-reload is not an error.
    pub async fn add_peer(
        &self,
        config_path: &Path,
        peer_public_key: PublicKey,
        peer_address: &str,
        label: Option<&str>,
    ) -> Result<AddPeerOutcome> {
        let address = AllowedIp::from_cidr_or_host(peer_address)
            .map_err(|_| WireGuardError::InvalidArguments(format!("'{peer_address}' is not an IP address or CIDR")))?;

        if !config_path.is_file() {
            return Err(WireGuardError::ConfigNotFound {
                path: config_path.to_path_buf(),
            });
        }

        let mut peer = PeerConfig::new(peer_public_key).with_allowed_ip(address);
        if let Some(label) = label {
            peer = peer.with_label(label);
        }

        append_private(config_path, render_peer(&peer).as_bytes())?;
        info!(
            public_key = %peer.public_key,
            allowed_ips = %peer.allowed_ips_string(),
            path = %config_path.display(),
            "peer appended"
        );

        let hot_reload = self.hot_reload(&peer).await;
        Ok(AddPeerOutcome { peer, hot_reload })
    }

    async fn hot_reload(&self, peer: &PeerConfig) -> HotReload {
        let live = live_interface_name(&self.engine, self.os, &self.interface).await;

        match self.engine.show(&live).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(interface = %self.interface, "interface is down, peer applies on next start");
                return HotReload::Skipped;
            }
            Err(e) => {
                warn!(interface = %live, error = %e, "could not query interface, peer applies on next restart");
                return HotReload::Failed(e.to_string());
            }
        }

        match self.engine.set_peer(&live, peer).await {
            Ok(()) => {
                info!(interface = %live, public_key = %peer.public_key, "peer hot-reloaded");
                HotReload::Applied
            }
            Err(e) => {
                warn!(
                    interface = %live,
                    error = %e,
                    "hot-reload failed, document and live interface differ until next restart"
                );
                HotReload::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse, render, InterfaceConfig, Provenance};
    use crate::engine::FakeTunnelEngine;
    use crate::keys::KeyPair;
    use std::path::PathBuf;

    fn seed_server(dir: &Path) -> PathBuf {
        let path = dir.join("wg0.conf");
        let config = InterfaceConfig::new(KeyPair::generate().private_key().clone())
            .with_address(AllowedIp::from_cidr("10.0.0.1/24").expect("cidr"))
            .with_listen_port(51820);
        crate::config::write_document(&path, &render(&config, &Provenance::now())).expect("seed");
        path
    }

    #[tokio::test]
    async fn bare_address_becomes_host_route() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let registry = PeerRegistry::new(FakeTunnelEngine::new(), OsFamily::LinuxLike, "wg0");

        let outcome = registry
            .add_peer(&path, *KeyPair::generate().public_key(), "10.0.0.2", None)
            .await
            .expect("add");

        assert_eq!(outcome.peer.allowed_ips_string(), "10.0.0.2/32");
        let v6 = registry
            .add_peer(&path, *KeyPair::generate().public_key(), "fd00::2", None)
            .await
            .expect("add");
        assert_eq!(v6.peer.allowed_ips_string(), "fd00::2/128");
    }

    #[tokio::test]
    async fn append_preserves_prior_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let before = std::fs::read_to_string(&path).expect("read");
        let registry = PeerRegistry::new(FakeTunnelEngine::new(), OsFamily::LinuxLike, "wg0");

        for i in 2..5 {
            registry
                .add_peer(&path, *KeyPair::generate().public_key(), &format!("10.0.0.{i}"), Some("peer"))
                .await
                .expect("add");
        }

        let after = std::fs::read_to_string(&path).expect("read");
        assert!(after.starts_with(&before));
        let parsed = parse(&after).expect("parse");
        assert_eq!(parsed.peers.len(), 3);
        assert!(parsed.peers.iter().all(|p| p.label.as_deref() == Some("peer")));
    }

    #[tokio::test]
    async fn missing_document_is_config_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PeerRegistry::new(FakeTunnelEngine::new(), OsFamily::LinuxLike, "wg0");
        let result = registry
            .add_peer(&dir.path().join("wg0.conf"), *KeyPair::generate().public_key(), "10.0.0.2", None)
            .await;
        assert!(matches!(result, Err(WireGuardError::ConfigNotFound { .. })));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected_before_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let before = std::fs::read(&path).expect("read");
        let registry = PeerRegistry::new(FakeTunnelEngine::new(), OsFamily::LinuxLike, "wg0");

        let result = registry
            .add_peer(&path, *KeyPair::generate().public_key(), "10.0.0", None)
            .await;

        assert!(matches!(result, Err(WireGuardError::InvalidArguments(_))));
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[tokio::test]
    async fn down_interface_skips_hot_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let engine = FakeTunnelEngine::new();
        let registry = PeerRegistry::new(engine.clone(), OsFamily::LinuxLike, "wg0");

        let outcome = registry
            .add_peer(&path, *KeyPair::generate().public_key(), "10.0.0.2", None)
            .await
            .expect("add");

        assert_eq!(outcome.hot_reload, HotReload::Skipped);
        assert!(!engine.calls().await.iter().any(|c| c.starts_with("set")));
    }

    #[tokio::test]
    async fn running_interface_is_hot_reloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let engine = FakeTunnelEngine::new();
        engine.set_running("wg0", "utun4").await;
        let registry = PeerRegistry::new(engine.clone(), OsFamily::BsdLike, "wg0");
        let key = *KeyPair::generate().public_key();

        let outcome = registry.add_peer(&path, key, "10.0.0.2", None).await.expect("add");

        assert_eq!(outcome.hot_reload, HotReload::Applied);
        assert!(engine.calls().await.contains(&"set utun4".to_string()));
        assert_eq!(engine.live_peers("wg0").await[0].public_key, key);
    }

    #[tokio::test]
    async fn hot_reload_failure_keeps_appended_peer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = seed_server(dir.path());
        let engine = FakeTunnelEngine::new();
        engine.set_running("wg0", "wg0").await;
        engine.fail_set_peer("Operation not permitted").await;
        let registry = PeerRegistry::new(engine, OsFamily::LinuxLike, "wg0");

        let outcome = registry
            .add_peer(&path, *KeyPair::generate().public_key(), "10.0.0.2", None)
            .await
            .expect("add succeeds");

        assert!(matches!(outcome.hot_reload, HotReload::Failed(ref reason) if reason.contains("Operation not permitted")));
        let parsed = parse(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(parsed.peers.len(), 1);
    }
}
