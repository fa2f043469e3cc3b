//! `keys` command implementation.

use std::io::Write;

use burrow_wireguard::{CommandRunner, Role};

use super::Context;
use crate::error::CliError;
use crate::output::{KeysReport, OutputFormat};

/// `keys` executor.
pub struct KeysCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> KeysCommand<R> {
    /// Create a new keys command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored public key cannot be read or decoded.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let report = self.run()?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Collect the stored public keys. Nothing is generated.
    ///
    /// # Errors
    ///
    /// See [`KeysCommand::execute`].
    pub fn run(&self) -> Result<KeysReport, CliError> {
        let store = self.ctx.key_store();
        Ok(KeysReport {
            key_dir: store.dir().to_path_buf(),
            server: store.load_public(Role::Server)?,
            client: store.load_public(Role::Client)?,
        })
    }
}
