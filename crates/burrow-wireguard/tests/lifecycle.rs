//! End-to-end server and client lifecycles against fake engines.

use std::path::Path;

use burrow_wireguard::testing::{FakeLeakGuard, FakeTunnelEngine};
use burrow_wireguard::{
    build_client_config, build_server_config, parse, render, write_document, ClientOptions, ConnectOutcome,
    ConnectionController, DisconnectOutcome, EnvironmentProfile, HotReload, InterfaceState, KeyStore, NativeKeyEngine,
    OsFamily, PeerRegistry, Provenance, Role, TunnelMode,
};

fn write_server(dir: &Path, env: &EnvironmentProfile) -> std::path::PathBuf {
    let path = dir.join("wg0.conf");
    let identity = burrow_wireguard::KeyPair::generate();
    let config = build_server_config(&identity, "10.0.0.1/24".parse().expect("net"), 51820, env);
    write_document(&path, &render(&config, &Provenance::now())).expect("write");
    path
}

#[tokio::test]
async fn server_scenario_appends_peers_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = EnvironmentProfile::new(OsFamily::LinuxLike, "eth0");
    let path = write_server(dir.path(), &env);
    let registry = PeerRegistry::new(FakeTunnelEngine::new(), OsFamily::LinuxLike, "wg0");

    let p1 = *burrow_wireguard::KeyPair::generate().public_key();
    let p2 = *burrow_wireguard::KeyPair::generate().public_key();

    registry.add_peer(&path, p1, "10.0.0.2", None).await.expect("add p1");
    let after_first = std::fs::read_to_string(&path).expect("read");
    assert!(after_first.contains("AllowedIPs = 10.0.0.2/32\n"));

    registry.add_peer(&path, p2, "10.0.0.3", None).await.expect("add p2");
    let after_second = std::fs::read_to_string(&path).expect("read");

    assert!(after_second.starts_with(&after_first));
    assert_eq!(after_second.matches("[Peer]").count(), 2);

    let parsed = parse(&after_second).expect("parse");
    assert_eq!(parsed.listen_port, Some(51820));
    assert_eq!(parsed.peers[0].public_key, p1);
    assert_eq!(parsed.peers[0].allowed_ips_string(), "10.0.0.2/32");
    assert_eq!(parsed.peers[1].public_key, p2);
    assert_eq!(parsed.peers[1].allowed_ips_string(), "10.0.0.3/32");
}

#[tokio::test]
async fn client_split_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = KeyStore::new(dir.path().join("keys"), NativeKeyEngine);
    let client = store.load_or_generate(Role::Client).await.expect("identity");
    let server = burrow_wireguard::KeyPair::generate();

    let config = build_client_config(
        &client,
        *server.public_key(),
        "198.51.100.4:51820",
        "10.0.0.2/24".parse().expect("net"),
        TunnelMode::Split,
        &ClientOptions::default(),
    )
    .expect("config");
    let text = render(&config, &Provenance::now());

    assert!(text.contains("AllowedIPs = 10.0.0.0/24\n"));
    assert!(text.contains("PersistentKeepalive = 25\n"));
    assert!(text.contains("Endpoint = 198.51.100.4:51820\n"));
    assert!(!text.contains("DNS"));
}

#[tokio::test]
async fn server_lifecycle_with_hot_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = EnvironmentProfile::new(OsFamily::LinuxLike, "eth0");
    let path = write_server(dir.path(), &env);
    let engine = FakeTunnelEngine::new();
    let controller = ConnectionController::new(
        engine.clone(),
        burrow_wireguard::NoopLeakGuard,
        Role::Server,
        "wg0",
        &path,
        OsFamily::LinuxLike,
    );
    let registry = PeerRegistry::new(engine.clone(), OsFamily::LinuxLike, "wg0");

    assert_eq!(controller.connect().await.expect("up"), ConnectOutcome::Connected("wg0".into()));

    let peer = *burrow_wireguard::KeyPair::generate().public_key();
    let outcome = registry.add_peer(&path, peer, "10.0.0.2", Some("laptop")).await.expect("add");
    assert_eq!(outcome.hot_reload, HotReload::Applied);

    match controller.status().await.expect("status") {
        InterfaceState::Up { details, .. } => assert!(details.contains(&peer.to_base64())),
        InterfaceState::Down => panic!("expected interface up"),
    }

    assert_eq!(controller.disconnect().await.expect("down"), DisconnectOutcome::Disconnected);
    assert_eq!(controller.disconnect().await.expect("down"), DisconnectOutcome::AlreadyDisconnected);
}

#[tokio::test]
async fn client_full_tunnel_connect_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wg0.conf");
    let config = build_client_config(
        &burrow_wireguard::KeyPair::generate(),
        *burrow_wireguard::KeyPair::generate().public_key(),
        "vpn.example.com:51820",
        "10.0.0.5/24".parse().expect("net"),
        TunnelMode::Full,
        &ClientOptions::default(),
    )
    .expect("config");
    write_document(&path, &render(&config, &Provenance::now())).expect("write");

    let engine = FakeTunnelEngine::new();
    engine.assign_live_name("wg0", "utun7").await;
    let guard = FakeLeakGuard::new();
    let controller = ConnectionController::new(engine, guard.clone(), Role::Client, "wg0", &path, OsFamily::BsdLike);

    assert_eq!(controller.connect().await.expect("up"), ConnectOutcome::Connected("utun7".into()));
    assert!(guard.is_suspended().await);
    assert_eq!(
        controller.connect().await.expect("up"),
        ConnectOutcome::AlreadyConnected("utun7".into())
    );

    controller.disconnect().await.expect("down");
    assert!(!guard.is_suspended().await);
    assert_eq!(controller.status().await.expect("status"), InterfaceState::Down);
}
