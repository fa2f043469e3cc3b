//! WireGuard peer identity and configuration lifecycle management.
//!
//! This crate manages everything around a WireGuard tunnel except the tunnel
//! itself: durable key pairs, server and client configuration documents,
//! peer registration with hot-reload, and idempotent connect/disconnect.
//! The tunnel engine (`wg`, `wg-quick`) and the host network stack are
//! reached through small traits so every step can be exercised with fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use burrow_wireguard::{
//!     build_client_config, render, ClientOptions, KeyPair, Provenance, TunnelMode,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KeyPair::generate();
//! let server = KeyPair::generate();
//! let config = build_client_config(
//!     &client,
//!     *server.public_key(),
//!     "198.51.100.4:51820",
//!     "10.0.0.2/24".parse()?,
//!     TunnelMode::Split,
//!     &ClientOptions::default(),
//! )?;
//! println!("{}", render(&config, &Provenance::now()));
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod controller;
pub mod engine;
pub mod environment;
pub mod error;
pub mod fs;
pub mod generator;
pub mod guard;
pub mod keys;
pub mod keystore;
pub mod nat;
pub mod registry;
pub mod types;

pub use command::{require_tools, CommandOutput, CommandRunner, Program, SafeCommand, SystemRunner};
pub use config::{parse, read_document, render, render_peer, write_document, InterfaceConfig, PeerConfig, Provenance};
pub use controller::{ConnectOutcome, ConnectionController, DisconnectOutcome, InterfaceState};
pub use engine::{live_interface_name, TunnelEngine, WgQuickEngine};
pub use environment::{detect, detect_egress_interface, EnvironmentProfile, OsFamily};
pub use error::{Result, WireGuardError};
pub use fs::Owner;
pub use generator::{
    build_client_config, build_server_config, ClientOptions, DEFAULT_KEEPALIVE, DEFAULT_LISTEN_PORT,
};
pub use guard::{Ipv6LeakGuard, LeakGuard, NoopLeakGuard};
pub use keys::{KeyPair, PrivateKey, PublicKey, KEY_SIZE};
pub use keystore::{KeyEngine, KeyPaths, KeyStore, NativeKeyEngine, WgKeyEngine};
pub use nat::{enable_forwarding_or_warn, NatEngine, NatRule, NatStrategy, SysctlNatEngine};
pub use registry::{AddPeerOutcome, HotReload, PeerRegistry};
pub use types::{AllowedIp, Endpoint, Role, TunnelMode};

/// Test doubles for the external capabilities.
pub mod testing {
    pub use crate::command::ScriptedRunner;
    pub use crate::engine::FakeTunnelEngine;
    pub use crate::guard::FakeLeakGuard;
}
