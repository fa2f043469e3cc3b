//! burrow CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use burrow_wireguard::{require_tools, SystemRunner, WireGuardError};
use clap::Parser;
use nix::unistd::geteuid;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use burrow_cli::cli::{Cli, Commands};
use burrow_cli::commands::{
    required_tools, AddPeerCommand, ClientSetupCommand, ConnectCommand, Context, DisconnectCommand, KeysCommand,
    ServerSetupCommand, ServerStatusCommand, StatusCommand,
};
use burrow_cli::output::OutputFormat;
use burrow_cli::{CliError, Settings};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "info" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = Settings::from_cli(&cli)?;
    preflight(&cli.command, &settings)?;

    let format = OutputFormat::new(settings.format);
    let ctx = Context::new(settings, SystemRunner);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::ServerSetup(args) => {
            ServerSetupCommand::new(ctx).execute(&mut stdout, &format, &args).await?;
        }
        Commands::AddPeer(args) => {
            AddPeerCommand::new(ctx).execute(&mut stdout, &format, &args).await?;
        }
        Commands::ServerStatus => {
            ServerStatusCommand::new(ctx).execute(&mut stdout, &format).await?;
        }
        Commands::ClientSetup(args) => {
            ClientSetupCommand::new(ctx).execute(&mut stdout, &format, &args).await?;
        }
        Commands::Connect(target) => {
            ConnectCommand::new(ctx).execute(&mut stdout, &format, target).await?;
        }
        Commands::Disconnect(target) => {
            DisconnectCommand::new(ctx).execute(&mut stdout, &format, target).await?;
        }
        Commands::Status(target) => {
            StatusCommand::new(ctx).execute(&mut stdout, &format, target).await?;
        }
        Commands::Keys => {
            KeysCommand::new(ctx).execute(&mut stdout, &format)?;
        }
    }

    Ok(())
}

/// Refuses to start a command that would fail halfway for lack of root or
/// a missing program.
fn preflight(command: &Commands, settings: &Settings) -> Result<(), CliError> {
    if command.requires_root() && !geteuid().is_root() {
        return Err(WireGuardError::insufficient_privilege(command.name()).into());
    }
    let tools = required_tools(command, settings);
    debug!(command = command.name(), ?tools, "checking required tools");
    require_tools(&tools, settings.os)?;
    Ok(())
}
