//! Durable identities.
//!
//! Each role owns one key pair stored as two base64 files,
//! `<role>_private.key` and `<role>_public.key`, in a directory only the
//! owner can enter. Loading is idempotent: once both files exist they are
//! returned as-is on every call and never rotated.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::command::{CommandRunner, Program, SafeCommand};
use crate::error::{Result, WireGuardError};
use crate::fs::{ensure_private_dir, write_private, Owner};
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::types::Role;

/// Source of new key material.
#[allow(async_fn_in_trait)]
pub trait KeyEngine {
    /// Generates a fresh private key.
    async fn generate_private(&self) -> Result<PrivateKey>;

    /// Derives the public key for `private`.
    async fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey>;
}

/// Generates keys with the tunnel engine's own `wg genkey` / `wg pubkey`.
#[derive(Debug, Clone)]
pub struct WgKeyEngine<R> {
    runner: R,
}

impl<R: CommandRunner> WgKeyEngine<R> {
    /// Creates an engine running `wg` through `runner`.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> KeyEngine for WgKeyEngine<R> {
    async fn generate_private(&self) -> Result<PrivateKey> {
        let output = SafeCommand::new(Program::Wg)
            .arg("genkey")
            .execute(&self.runner)
            .await
            .map_err(key_generation_failed)?;
        // Never echo stdout here, it is the secret.
        PrivateKey::from_base64(&output.stdout)
            .map_err(|_| WireGuardError::KeyGenerationFailed("wg genkey produced malformed output".to_string()))
    }

    async fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        let output = SafeCommand::new(Program::Wg)
            .arg("pubkey")
            .stdin(format!("{}\n", private.to_base64()))
            .execute(&self.runner)
            .await
            .map_err(key_generation_failed)?;
        PublicKey::from_base64(&output.stdout)
            .map_err(|e| WireGuardError::KeyGenerationFailed(format!("wg pubkey produced malformed output: {e}")))
    }
}

fn key_generation_failed(err: WireGuardError) -> WireGuardError {
    match err {
        WireGuardError::MissingTool { tool, .. } => {
            WireGuardError::KeyGenerationFailed(format!("'{tool}' is not available"))
        }
        other => WireGuardError::KeyGenerationFailed(other.to_string()),
    }
}

/// Generates keys in-process with x25519 and the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeyEngine;

impl KeyEngine for NativeKeyEngine {
    async fn generate_private(&self) -> Result<PrivateKey> {
        Ok(PrivateKey::generate())
    }

    async fn derive_public(&self, private: &PrivateKey) -> Result<PublicKey> {
        Ok(private.public_key())
    }
}

/// Paths of a role's key files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPaths {
    /// `<role>_private.key`.
    pub private: PathBuf,
    /// `<role>_public.key`.
    pub public: PathBuf,
}

/// Loads or generates role identities under one directory.
#[derive(Debug, Clone)]
pub struct KeyStore<E> {
    dir: PathBuf,
    engine: E,
    owner: Option<Owner>,
}

impl<E: KeyEngine> KeyStore<E> {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, engine: E) -> Self {
        Self {
            dir: dir.into(),
            engine,
            owner: None,
        }
    }

    /// Hands directories created for the store, and the client identity, to
    /// `owner`. The server identity stays with the elevated user.
    #[must_use]
    pub fn with_owner(mut self, owner: Option<Owner>) -> Self {
        self.owner = owner;
        self
    }

    /// The storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Key file locations for `role`.
    #[must_use]
    pub fn paths(&self, role: Role) -> KeyPaths {
        KeyPaths {
            private: self.dir.join(format!("{role}_private.key")),
            public: self.dir.join(format!("{role}_public.key")),
        }
    }

    /// Returns the identity for `role`, generating and persisting it on first use.
    ///
    /// # Errors
    ///
    /// Returns `KeyGenerationFailed` if new keys are needed and the engine
    /// cannot produce them, `InvalidKey` if stored files are corrupt or do not
    /// belong together, or an IO error.
    pub async fn load_or_generate(&self, role: Role) -> Result<KeyPair> {
        let paths = self.paths(role);
        if paths.private.exists() && paths.public.exists() {
            let pair = Self::load(&paths)?;
            debug!(%role, public_key = %pair.public_key(), "loaded existing identity");
            return Ok(pair);
        }

        let private = self.engine.generate_private().await?;
        let public = self.engine.derive_public(&private).await?;

        let created = ensure_private_dir(&self.dir)?;
        write_private(&paths.private, format!("{}\n", private.to_base64()).as_bytes())?;
        write_private(&paths.public, format!("{public}\n").as_bytes())?;
        if let Some(owner) = self.owner {
            owner.adopt_all(&created);
            if role == Role::Client {
                owner.adopt(&paths.private);
                owner.adopt(&paths.public);
            }
        }

        info!(%role, public_key = %public, dir = %self.dir.display(), "generated new identity");
        Ok(KeyPair::from_parts(private, public))
    }

    /// Returns the stored public key for `role`, if present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the file exists but is malformed.
    pub fn load_public(&self, role: Role) -> Result<Option<PublicKey>> {
        let path = self.paths(role).public;
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        PublicKey::from_base64(&text)
            .map(Some)
            .map_err(|e| WireGuardError::InvalidKey(format!("{}: {e}", path.display())))
    }

    fn load(paths: &KeyPaths) -> Result<KeyPair> {
        let private_text = std::fs::read_to_string(&paths.private)?;
        let private = PrivateKey::from_base64(&private_text)
            .map_err(|e| WireGuardError::InvalidKey(format!("{}: {e}", paths.private.display())))?;
        let public_text = std::fs::read_to_string(&paths.public)?;
        let public = PublicKey::from_base64(&public_text)
            .map_err(|e| WireGuardError::InvalidKey(format!("{}: {e}", paths.public.display())))?;

        let pair = KeyPair::from_parts(private, public);
        if !pair.is_consistent() {
            return Err(WireGuardError::InvalidKey(format!(
                "{} does not match {}",
                paths.public.display(),
                paths.private.display()
            )));
        }
        Ok(pair)
    }
}
