//! Allow-listed external program execution.
//!
//! Every interaction with the tunnel engine and the host network stack goes
//! through a [`SafeCommand`] run by a [`CommandRunner`]. Commands are executed
//! directly, never through a shell, and arguments are validated while the
//! command is built.
//!
//! Secret material (a private key piped to `wg pubkey`) is passed on stdin
//! and never appears in the command description used for logs and errors.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::trace;

use crate::environment::OsFamily;
use crate::error::{Result, WireGuardError};

/// Programs burrow is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Program {
    /// `wg`, the WireGuard configuration utility.
    Wg,
    /// `wg-quick`, brings interfaces up and down from a config file.
    WgQuick,
    /// `ip` from iproute2.
    Ip,
    /// BSD `route`.
    Route,
    /// `sysctl`.
    Sysctl,
    /// macOS `networksetup`.
    Networksetup,
}

impl Program {
    /// Get the program name to execute.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wg => "wg",
            Self::WgQuick => "wg-quick",
            Self::Ip => "ip",
            Self::Route => "route",
            Self::Sysctl => "sysctl",
            Self::Networksetup => "networksetup",
        }
    }

    /// Installation hint shown when the program is missing.
    #[must_use]
    pub fn install_hint(&self, os: OsFamily) -> String {
        match (self, os) {
            (Self::Wg | Self::WgQuick, OsFamily::LinuxLike) => {
                "install wireguard-tools (e.g. 'apt install wireguard-tools' or 'dnf install wireguard-tools')"
                    .to_string()
            }
            (Self::Wg | Self::WgQuick, OsFamily::BsdLike) => {
                "install wireguard-tools (e.g. 'brew install wireguard-tools' or 'pkg install wireguard-tools')"
                    .to_string()
            }
            (Self::Ip, _) => "install iproute2".to_string(),
            (program, _) => format!("'{program}' is part of the base system; check PATH"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Characters that are never allowed in command arguments.
const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r'];

/// A command builder that validates arguments as they are added.
///
/// Validation failures are collected and reported when the command runs, so
/// builders can be chained without intermediate `?`.
#[derive(Clone)]
pub struct SafeCommand {
    program: Program,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    rejected: Vec<String>,
}

impl SafeCommand {
    /// Create a new command for the given program.
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self {
            program,
            args: Vec::new(),
            stdin: None,
            rejected: Vec::new(),
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        let arg = arg.as_ref();
        if arg.contains(FORBIDDEN_CHARS) {
            self.rejected.push(arg.escape_debug().to_string());
        } else {
            self.args.push(arg.to_string());
        }
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Feed the given bytes to the program's standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program to run.
    #[must_use]
    pub fn program(&self) -> Program {
        self.program
    }

    /// The validated arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Bytes fed to standard input, if any.
    #[must_use]
    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Command line for logs and errors. Never includes stdin.
    #[must_use]
    pub fn description(&self) -> String {
        if self.args.is_empty() {
            self.program.as_str().to_string()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Returns an error if any argument failed validation.
    ///
    /// # Errors
    ///
    /// Returns `CommandRejected` naming the first rejected argument.
    pub fn validate(&self) -> Result<()> {
        match self.rejected.first() {
            Some(arg) => Err(WireGuardError::CommandRejected(format!(
                "{}: argument \"{arg}\" contains a control character",
                self.program
            ))),
            None => Ok(()),
        }
    }

    /// Run the command and require a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns `CommandFailed` on a non-zero exit, or any error from the runner.
    pub async fn execute<R: CommandRunner>(&self, runner: &R) -> Result<CommandOutput> {
        let output = runner.run(self).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(WireGuardError::command_failed(
                self.description(),
                output.exit_code.unwrap_or(-1),
                output.stderr.trim(),
            ))
        }
    }
}

impl fmt::Debug for SafeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal.
    pub exit_code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Check if the command succeeded (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes [`SafeCommand`]s.
///
/// Implementations report the exit status without judging it; see
/// [`SafeCommand::execute`] for the checked variant.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the command to completion.
    async fn run(&self, command: &SafeCommand) -> Result<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &SafeCommand) -> Result<CommandOutput> {
        command.validate()?;
        trace!(command = %command.description(), "executing");

        let mut cmd = TokioCommand::new(command.program().as_str());
        cmd.args(command.arguments())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if command.input().is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WireGuardError::missing_tool(command.program().as_str(), format!("'{}' is not in PATH", command.program()))
            } else {
                WireGuardError::Io(e)
            }
        })?;

        if let Some(input) = command.input() {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
            }
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Checks that every program is on `PATH`.
///
/// # Errors
///
/// Returns `MissingTool` for the first program that cannot be found.
pub fn require_tools(programs: &[Program], os: OsFamily) -> Result<()> {
    for program in programs {
        if which::which(program.as_str()).is_err() {
            return Err(WireGuardError::missing_tool(program.as_str(), program.install_hint(os)));
        }
    }
    Ok(())
}

/// A runner that replays canned outputs and records every command it sees.
///
/// Commands without a matching rule get `default_output` (success, empty
/// stdout, unless changed).
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Arc<Mutex<Vec<(String, VecDeque<CommandOutput>)>>>,
    calls: Arc<Mutex<Vec<SafeCommand>>>,
    default_output: Arc<Mutex<Option<CommandOutput>>>,
}

impl ScriptedRunner {
    /// Creates a runner where every command succeeds with empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for commands whose description starts with `prefix`.
    ///
    /// Outputs for one prefix are replayed in order; the last one repeats.
    #[must_use]
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            match rules.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(output),
                None => rules.push((prefix.to_string(), VecDeque::from([output]))),
            }
        }
        self
    }

    /// Output for commands that match no rule.
    #[must_use]
    pub fn otherwise(self, output: CommandOutput) -> Self {
        if let Ok(mut default) = self.default_output.lock() {
            *default = Some(output);
        }
        self
    }

    /// Every command run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SafeCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Descriptions of every command run so far.
    #[must_use]
    pub fn descriptions(&self) -> Vec<String> {
        self.calls().iter().map(SafeCommand::description).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &SafeCommand) -> Result<CommandOutput> {
        command.validate()?;
        let description = command.description();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }

        if let Ok(mut rules) = self.rules.lock() {
            if let Some((_, queue)) = rules.iter_mut().find(|(p, _)| description.starts_with(p.as_str())) {
                let output = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
                if let Some(output) = output {
                    return Ok(output);
                }
            }
        }

        let default = self.default_output.lock().ok().and_then(|d| d.clone());
        Ok(default.unwrap_or_else(|| CommandOutput::ok("")))
    }
}
