//! `add-peer` command implementation.

use std::io::Write;

use burrow_wireguard::{CommandRunner, PeerRegistry};

use super::{parse_public_key, Context};
use crate::cli::AddPeerArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, PeerAddedReport};

/// `add-peer` executor.
pub struct AddPeerCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> AddPeerCommand<R> {
    /// Create a new add-peer command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed key or address, a missing server
    /// document, or a failed append. A failed hot-reload is reported, not
    /// returned.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, args: &AddPeerArgs) -> Result<(), CliError> {
        let report = self.run(args).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Register the peer and describe the result.
    ///
    /// # Errors
    ///
    /// See [`AddPeerCommand::execute`].
    pub async fn run(&self, args: &AddPeerArgs) -> Result<PeerAddedReport, CliError> {
        let settings = &self.ctx.settings;
        let public_key = parse_public_key("peer", &args.public_key)?;

        let registry = PeerRegistry::new(self.ctx.tunnel_engine(), settings.os, settings.interface.clone());
        let outcome = registry
            .add_peer(&settings.server_config_path(), public_key, &args.vpn_ip, args.label.as_deref())
            .await?;

        Ok(PeerAddedReport {
            interface: settings.interface.clone(),
            public_key: outcome.peer.public_key,
            allowed_ips: outcome.peer.allowed_ips_string(),
            label: outcome.peer.label,
            hot_reload: outcome.hot_reload,
        })
    }
}
