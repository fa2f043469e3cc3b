//! Server commands.
//!
//! `server-setup` creates the server identity, writes the server document
//! with NAT hooks for the detected egress interface, and turns on packet
//! forwarding. An existing document is kept unless `--force` is given.

use std::io::Write;

use burrow_wireguard::{
    build_server_config, detect_egress_interface, enable_forwarding_or_warn, read_document, render, write_document,
    CommandRunner, ConnectionController, EnvironmentProfile, NoopLeakGuard, Provenance, Role, SysctlNatEngine,
};
use tracing::{info, warn};

use super::Context;
use crate::cli::ServerSetupArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, ServerSetupReport, StatusReport};

/// `server-setup` executor.
pub struct ServerSetupCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> ServerSetupCommand<R> {
    /// Create a new server-setup command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or writing the document fails.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &ServerSetupArgs,
    ) -> Result<(), CliError> {
        let report = self.run(args).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Perform the setup and describe the result.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or writing the document fails.
    pub async fn run(&self, args: &ServerSetupArgs) -> Result<ServerSetupReport, CliError> {
        let settings = &self.ctx.settings;
        let egress = detect_egress_interface(&self.ctx.runner, settings.os).await;
        let environment = EnvironmentProfile::new(settings.os, egress);

        let identity = self.ctx.key_store().load_or_generate(Role::Server).await?;
        let path = settings.server_config_path();

        let written = if path.exists() && !args.force {
            warn!(
                interface = %settings.interface,
                path = %path.display(),
                "interface already exists, keeping existing document"
            );
            false
        } else {
            let config = build_server_config(&identity, args.address, args.port, &environment);
            write_document(&path, &render(&config, &Provenance::now()))?;
            info!(interface = %settings.interface, path = %path.display(), "server document written");
            true
        };

        let nat = SysctlNatEngine::new(self.ctx.runner.clone());
        let forwarding_enabled = enable_forwarding_or_warn(&nat, settings.os).await;

        Ok(ServerSetupReport {
            interface: settings.interface.clone(),
            config_path: path,
            written,
            public_key: *identity.public_key(),
            address: args.address.to_string(),
            listen_port: args.port,
            egress_interface: environment.egress_interface,
            nat: environment.nat,
            forwarding_enabled,
        })
    }
}

/// `server-status` executor.
pub struct ServerStatusCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> ServerStatusCommand<R> {
    /// Create a new server-status command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the tunnel engine cannot be run.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let report = self.run().await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Query the server interface.
    ///
    /// # Errors
    ///
    /// Returns an error if the tunnel engine cannot be run.
    pub async fn run(&self) -> Result<StatusReport, CliError> {
        let settings = &self.ctx.settings;
        let path = settings.server_config_path();
        let controller = ConnectionController::new(
            self.ctx.tunnel_engine(),
            NoopLeakGuard,
            Role::Server,
            settings.interface.clone(),
            path.clone(),
            settings.os,
        );

        let configured_peers = match read_document(&path) {
            Ok(config) => Some(config.peers.len()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read server document");
                None
            }
        };

        Ok(StatusReport {
            interface: settings.interface.clone(),
            role: Role::Server,
            public_key: self.ctx.key_store().load_public(Role::Server)?,
            configured_peers,
            state: controller.status().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use burrow_wireguard::testing::ScriptedRunner;
    use burrow_wireguard::{parse, CommandOutput, InterfaceState, NatStrategy, OsFamily};

    fn args(force: bool) -> ServerSetupArgs {
        ServerSetupArgs {
            address: "10.0.0.1/24".parse().expect("net"),
            port: 51820,
            force,
        }
    }

    fn runner() -> ScriptedRunner {
        ScriptedRunner::new().respond(
            "ip -4 route show default",
            CommandOutput::ok("default via 203.0.113.1 dev ens3 proto static\n"),
        )
    }

    #[tokio::test]
    async fn setup_writes_server_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner();
        let cmd = ServerSetupCommand::new(Context::new(Settings::rooted(dir.path(), OsFamily::LinuxLike), runner.clone()));

        let report = cmd.run(&args(false)).await.expect("setup");

        assert!(report.written);
        assert!(report.forwarding_enabled);
        assert_eq!(report.egress_interface, "ens3");
        assert_eq!(report.nat, NatStrategy::Iptables);

        let text = std::fs::read_to_string(&report.config_path).expect("read");
        assert!(text.starts_with("# Generated by burrow "));
        assert!(text.contains("-s 10.0.0.0/24 -o ens3 -j MASQUERADE"));
        let parsed = parse(&text).expect("parse");
        assert_eq!(parsed.listen_port, Some(51820));
        assert!(parsed.peers.is_empty());
        assert_eq!(parsed.public_key(), report.public_key);
        assert!(runner.descriptions().contains(&"sysctl -w net.ipv4.ip_forward=1".to_string()));
    }

    #[tokio::test]
    async fn setup_keeps_existing_document_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);
        let cmd = ServerSetupCommand::new(Context::new(settings.clone(), runner()));

        cmd.run(&args(false)).await.expect("first");
        let before = std::fs::read(settings.server_config_path()).expect("read");

        let second = cmd.run(&ServerSetupArgs { port: 443, ..args(false) }).await.expect("second");
        assert!(!second.written);
        assert_eq!(std::fs::read(settings.server_config_path()).expect("read"), before);

        let forced = cmd.run(&ServerSetupArgs { port: 443, ..args(true) }).await.expect("forced");
        assert!(forced.written);
        let parsed = burrow_wireguard::read_document(&settings.server_config_path()).expect("parse");
        assert_eq!(parsed.listen_port, Some(443));
        assert_eq!(forced.public_key, second.public_key);
    }

    #[tokio::test]
    async fn forwarding_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner().respond("sysctl", CommandOutput::failed(1, "permission denied"));
        let cmd = ServerSetupCommand::new(Context::new(Settings::rooted(dir.path(), OsFamily::LinuxLike), runner));

        let report = cmd.run(&args(false)).await.expect("setup");
        assert!(!report.forwarding_enabled);
    }

    #[tokio::test]
    async fn status_reports_peer_count_and_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);
        ServerSetupCommand::new(Context::new(settings.clone(), runner()))
            .run(&args(false))
            .await
            .expect("setup");

        let status_runner = ScriptedRunner::new().respond("wg show wg0", CommandOutput::ok("interface: wg0\n"));
        let report = ServerStatusCommand::new(Context::new(settings, status_runner))
            .run()
            .await
            .expect("status");

        assert_eq!(report.configured_peers, Some(0));
        assert!(report.public_key.is_some());
        assert!(matches!(report.state, InterfaceState::Up { .. }));
    }
}
