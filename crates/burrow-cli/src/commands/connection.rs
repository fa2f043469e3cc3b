//! `connect`, `disconnect` and `status` command implementations.
//!
//! All three act on the client document unless `--server` is given.

use std::io::Write;

use burrow_wireguard::{
    read_document, CommandRunner, ConnectOutcome, ConnectionController, Ipv6LeakGuard, Role, WgQuickEngine,
};

use super::Context;
use crate::cli::TargetArgs;
use crate::error::CliError;
use crate::output::{ConnectionReport, ConnectionResult, OutputFormat, StatusReport};

fn role_of(target: TargetArgs) -> Role {
    if target.server { Role::Server } else { Role::Client }
}

fn controller<R: CommandRunner + Clone>(
    ctx: &Context<R>,
    role: Role,
) -> ConnectionController<WgQuickEngine<R>, Ipv6LeakGuard<R>> {
    let settings = &ctx.settings;
    let path = match role {
        Role::Server => settings.server_config_path(),
        Role::Client => settings.client_config_path(),
    };
    ConnectionController::new(
        ctx.tunnel_engine(),
        ctx.leak_guard(),
        role,
        settings.interface.clone(),
        path,
        settings.os,
    )
}

/// `connect` executor.
pub struct ConnectCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> ConnectCommand<R> {
    /// Create a new connect command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is missing or the interface cannot
    /// be brought up.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, target: TargetArgs) -> Result<(), CliError> {
        let report = self.run(target).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Bring the interface up.
    ///
    /// # Errors
    ///
    /// See [`ConnectCommand::execute`].
    pub async fn run(&self, target: TargetArgs) -> Result<ConnectionReport, CliError> {
        let outcome = controller(&self.ctx, role_of(target)).connect().await?;
        let result = ConnectionResult::from(&outcome);
        let (ConnectOutcome::Connected(live_name) | ConnectOutcome::AlreadyConnected(live_name)) = outcome;
        Ok(ConnectionReport {
            interface: self.ctx.settings.interface.clone(),
            result,
            live_name: Some(live_name),
        })
    }
}

/// `disconnect` executor.
pub struct DisconnectCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> DisconnectCommand<R> {
    /// Create a new disconnect command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be brought down.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, target: TargetArgs) -> Result<(), CliError> {
        let report = self.run(target).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Bring the interface down.
    ///
    /// # Errors
    ///
    /// See [`DisconnectCommand::execute`].
    pub async fn run(&self, target: TargetArgs) -> Result<ConnectionReport, CliError> {
        let outcome = controller(&self.ctx, role_of(target)).disconnect().await?;
        Ok(ConnectionReport {
            interface: self.ctx.settings.interface.clone(),
            result: outcome.into(),
            live_name: None,
        })
    }
}

/// `status` executor.
pub struct StatusCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> StatusCommand<R> {
    /// Create a new status command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the tunnel engine cannot be run.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat, target: TargetArgs) -> Result<(), CliError> {
        let report = self.run(target).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Query the interface.
    ///
    /// # Errors
    ///
    /// See [`StatusCommand::execute`].
    pub async fn run(&self, target: TargetArgs) -> Result<StatusReport, CliError> {
        let role = role_of(target);
        let controller = controller(&self.ctx, role);
        let configured_peers = read_document(controller.config_path()).ok().map(|c| c.peers.len());

        Ok(StatusReport {
            interface: self.ctx.settings.interface.clone(),
            role,
            public_key: self.ctx.key_store().load_public(role)?,
            configured_peers,
            state: controller.status().await?,
        })
    }
}
