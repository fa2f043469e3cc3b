//! Connection state transitions.
//!
//! `connect` and `disconnect` are idempotent: asking for the state the
//! interface is already in is a warning, not an error. For clients the IPv6
//! stack is suspended for the lifetime of the tunnel and always restored on
//! the way down, even when the engine fails.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{live_interface_name, TunnelEngine};
use crate::environment::OsFamily;
use crate::error::{Result, WireGuardError};
use crate::guard::LeakGuard;
use crate::types::Role;

/// Observed state of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InterfaceState {
    /// The interface does not exist.
    Down,
    /// The interface is running.
    Up {
        /// Name the OS knows the interface by.
        live_name: String,
        /// The engine's report, verbatim.
        details: String,
    },
}

impl InterfaceState {
    /// Whether the interface is running.
    #[must_use]
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up { .. })
    }
}

/// Result of [`ConnectionController::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The interface was brought up.
    Connected(String),
    /// The interface was already up; nothing changed.
    AlreadyConnected(String),
}

/// Result of [`ConnectionController::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The interface was torn down.
    Disconnected,
    /// The interface was already down; nothing changed.
    AlreadyDisconnected,
}

/// Brings one interface up and down.
#[derive(Debug, Clone)]
pub struct ConnectionController<E, G> {
    engine: E,
    guard: G,
    role: Role,
    interface: String,
    config_path: PathBuf,
    os: OsFamily,
}

impl<E: TunnelEngine, G: LeakGuard> ConnectionController<E, G> {
    /// Creates a controller for the interface described by `config_path`.
    pub fn new(
        engine: E,
        guard: G,
        role: Role,
        interface: impl Into<String>,
        config_path: impl Into<PathBuf>,
        os: OsFamily,
    ) -> Self {
        Self {
            engine,
            guard,
            role,
            interface: interface.into(),
            config_path: config_path.into(),
            os,
        }
    }

    /// The controlled document.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Queries the interface without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be run, or if `wg show` fails
    /// for any reason other than the interface not existing (for example,
    /// missing privilege).
    pub async fn status(&self) -> Result<InterfaceState> {
        let live_name = live_interface_name(&self.engine, self.os, &self.interface).await;
        Ok(match self.engine.show(&live_name).await? {
            Some(details) => InterfaceState::Up { live_name, details },
            None => InterfaceState::Down,
        })
    }

    /// Brings the interface up.
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` if the document is missing, or the engine's
    /// error if bring-up fails. The IPv6 stack is restored before returning
    /// an engine error.
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        if let InterfaceState::Up { live_name, .. } = self.status().await? {
            warn!(interface = %self.interface, live_name = %live_name, "already connected");
            return Ok(ConnectOutcome::AlreadyConnected(live_name));
        }

        if !self.config_path.is_file() {
            return Err(WireGuardError::ConfigNotFound {
                path: self.config_path.clone(),
            });
        }

        if self.role == Role::Client {
            if let Err(e) = self.guard.suspend().await {
                warn!(error = %e, "could not suspend ipv6, traffic may bypass the tunnel");
            }
        }

        if let Err(e) = self.engine.up(&self.config_path).await {
            self.restore_guard().await;
            return Err(e);
        }

        let live_name = live_interface_name(&self.engine, self.os, &self.interface).await;
        info!(interface = %self.interface, live_name = %live_name, "connected");
        Ok(ConnectOutcome::Connected(live_name))
    }

    /// Tears the interface down.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if bring-down fails. For clients the IPv6
    /// stack is restored even then.
    pub async fn disconnect(&self) -> Result<DisconnectOutcome> {
        if !self.status().await?.is_up() {
            warn!(interface = %self.interface, "already disconnected");
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        }

        let result = self.engine.down(&self.config_path).await;
        self.restore_guard().await;
        result?;

        info!(interface = %self.interface, "disconnected");
        Ok(DisconnectOutcome::Disconnected)
    }

    async fn restore_guard(&self) {
        if self.role != Role::Client {
            return;
        }
        if let Err(e) = self.guard.restore().await {
            warn!(error = %e, "could not restore ipv6");
        }
    }
}
