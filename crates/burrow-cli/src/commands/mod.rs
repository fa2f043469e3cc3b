//! CLI command implementations.
//!
//! Each submodule implements one group of commands:
//! - [`server`] - server setup and status
//! - [`peer`] - peer registration
//! - [`client`] - client setup
//! - [`connection`] - connect, disconnect, status
//! - [`keys`] - stored public keys
//!
//! Commands get a [`Context`] holding the resolved settings and the runner
//! used for external programs, so tests can swap in a scripted runner.

pub mod client;
pub mod connection;
pub mod keys;
pub mod peer;
pub mod server;

pub use client::ClientSetupCommand;
pub use connection::{ConnectCommand, DisconnectCommand, StatusCommand};
pub use keys::KeysCommand;
pub use peer::AddPeerCommand;
pub use server::{ServerSetupCommand, ServerStatusCommand};

use burrow_wireguard::{
    CommandRunner, Ipv6LeakGuard, KeyEngine, KeyStore, NativeKeyEngine, OsFamily, PrivateKey, Program, PublicKey,
    Result, WgKeyEngine, WgQuickEngine,
};

use crate::cli::{Commands, KeyEngineArg};
use crate::settings::Settings;

/// Shared state for one command invocation.
#[derive(Debug, Clone)]
pub struct Context<R> {
    /// Resolved settings.
    pub settings: Settings,
    /// Runner for external programs.
    pub runner: R,
}

impl<R: CommandRunner + Clone> Context<R> {
    /// Creates a context.
    pub fn new(settings: Settings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Identity store with the configured key engine.
    pub fn key_store(&self) -> KeyStore<SelectedKeyEngine<R>> {
        let engine = match self.settings.key_engine {
            KeyEngineArg::Wg => SelectedKeyEngine::Wg(WgKeyEngine::new(self.runner.clone())),
            KeyEngineArg::Native => SelectedKeyEngine::Native(NativeKeyEngine),
        };
        KeyStore::new(self.settings.key_dir.clone(), engine).with_owner(self.settings.owner)
    }

    /// Tunnel engine backed by `wg` and `wg-quick`.
    pub fn tunnel_engine(&self) -> WgQuickEngine<R> {
        WgQuickEngine::new(self.runner.clone())
    }

    /// IPv6 leak guard for client tunnels.
    pub fn leak_guard(&self) -> Ipv6LeakGuard<R> {
        Ipv6LeakGuard::new(self.runner.clone(), self.settings.os, self.settings.network_services.clone())
    }
}

/// The key engine chosen by `--key-engine`.
#[derive(Debug, Clone)]
pub enum SelectedKeyEngine<R> {
    /// `wg genkey` / `wg pubkey`.
    Wg(WgKeyEngine<R>),
    /// In-process x25519.
    Native(NativeKeyEngine),
}

impl<R: CommandRunner> KeyEngine for SelectedKeyEngine<R> {
    async fn generate_private(&self) -> Result<PrivateKey> {
        match self {
            Self::Wg(engine) => engine.generate_private().await,
            Self::Native(engine) => engine.generate_private().await,
        }
    }

    async fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        match self {
            Self::Wg(engine) => engine.derive_public(private).await,
            Self::Native(engine) => engine.derive_public(private).await,
        }
    }
}

/// External programs `command` needs with the given settings.
#[must_use]
pub fn required_tools(command: &Commands, settings: &Settings) -> Vec<Program> {
    let key_tools = match settings.key_engine {
        KeyEngineArg::Wg => vec![Program::Wg],
        KeyEngineArg::Native => Vec::new(),
    };
    match command {
        Commands::ServerSetup(_) => {
            let route = match settings.os {
                OsFamily::LinuxLike => Program::Ip,
                OsFamily::BsdLike => Program::Route,
            };
            [key_tools, vec![route, Program::Sysctl]].concat()
        }
        Commands::ClientSetup(_) => key_tools,
        Commands::AddPeer(_) | Commands::ServerStatus | Commands::Status(_) => vec![Program::Wg],
        Commands::Connect(target) if !target.server => {
            let guard = match settings.os {
                OsFamily::LinuxLike => Program::Sysctl,
                OsFamily::BsdLike => Program::Networksetup,
            };
            vec![Program::Wg, Program::WgQuick, guard]
        }
        Commands::Connect(_) | Commands::Disconnect(_) => vec![Program::Wg, Program::WgQuick],
        Commands::Keys => Vec::new(),
    }
}

/// Parses a base64 public key given on the command line.
pub(crate) fn parse_public_key(what: &str, value: &str) -> std::result::Result<PublicKey, crate::error::CliError> {
    PublicKey::from_base64(value)
        .map_err(|e| crate::error::CliError::InvalidArgument(format!("{what} public key: {e}")))
}
