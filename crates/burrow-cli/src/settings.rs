//! Resolved settings for one invocation.
//!
//! Built once from parsed arguments and passed to every command. Paths under
//! the user's home resolve against the invoking user when run through
//! `sudo`, so `sudo burrow connect` finds the same files as `burrow status`.

use std::path::{Path, PathBuf};

use burrow_wireguard::{OsFamily, Owner};
use nix::unistd::{User, geteuid};

use crate::cli::{Cli, Format, KeyEngineArg};
use crate::error::CliError;

/// Default directory for server documents.
pub const DEFAULT_SERVER_CONFIG_DIR: &str = "/etc/wireguard";

/// Home-relative directory for client documents.
pub const CLIENT_CONFIG_SUBDIR: &str = ".config/burrow";

/// Longest interface name the kernel accepts.
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Everything a command needs to know about where things live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Nominal interface name.
    pub interface: String,
    /// Output format.
    pub format: Format,
    /// Directory of the server document.
    pub server_config_dir: PathBuf,
    /// Directory of the client document.
    pub client_config_dir: PathBuf,
    /// Directory of identity key files.
    pub key_dir: PathBuf,
    /// Key generation backend.
    pub key_engine: KeyEngineArg,
    /// macOS network services for the IPv6 leak guard.
    pub network_services: Vec<String>,
    /// Host OS family.
    pub os: OsFamily,
    /// User to hand created files to when running elevated.
    pub owner: Option<Owner>,
}

impl Settings {
    /// Resolves settings from parsed arguments and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error on an unsupported platform, an invalid interface name,
    /// or when no home directory can be found for a home-relative default.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        validate_interface_name(&cli.interface)?;
        let os = OsFamily::current()?;
        let elevated = geteuid().is_root();

        let home = || invoking_home(elevated).ok_or_else(|| {
            CliError::Config("cannot determine home directory; set --client-config-dir and --key-dir".to_string())
        });

        let client_config_dir = match cli.client_config_dir {
            Some(ref dir) => dir.clone(),
            None => home()?.join(CLIENT_CONFIG_SUBDIR),
        };
        let key_dir = match cli.key_dir {
            Some(ref dir) => dir.clone(),
            None => home()?.join(CLIENT_CONFIG_SUBDIR).join("keys"),
        };

        Ok(Self {
            interface: cli.interface.clone(),
            format: cli.format,
            server_config_dir: cli
                .server_config_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_CONFIG_DIR)),
            client_config_dir,
            key_dir,
            key_engine: cli.key_engine,
            network_services: cli.network_services.clone(),
            os,
            owner: if elevated { Owner::from_sudo_env() } else { None },
        })
    }

    /// Settings rooted in `root`, for tests and sandboxes.
    #[must_use]
    pub fn rooted(root: &Path, os: OsFamily) -> Self {
        Self {
            interface: "wg0".to_string(),
            format: Format::Table,
            server_config_dir: root.join("server"),
            client_config_dir: root.join("client"),
            key_dir: root.join("keys"),
            key_engine: KeyEngineArg::Native,
            network_services: Vec::new(),
            os,
            owner: None,
        }
    }

    /// Path of the server document.
    #[must_use]
    pub fn server_config_path(&self) -> PathBuf {
        self.server_config_dir.join(format!("{}.conf", self.interface))
    }

    /// Path of the client document.
    #[must_use]
    pub fn client_config_path(&self) -> PathBuf {
        self.client_config_dir.join(format!("{}.conf", self.interface))
    }
}

/// Checks a name against what `wg-quick` accepts.
///
/// # Errors
///
/// Returns `InvalidArgument` if the name is empty, too long or has characters
/// outside `[A-Za-z0-9_=+.-]`.
pub fn validate_interface_name(name: &str) -> Result<(), CliError> {
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(CliError::InvalidArgument(format!(
            "interface name '{name}' must be 1 to {MAX_INTERFACE_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-')))
    {
        return Err(CliError::InvalidArgument(format!(
            "interface name '{name}' contains '{c}'"
        )));
    }
    Ok(())
}

/// Home directory of the user who ran burrow, looking through `sudo`.
fn invoking_home(elevated: bool) -> Option<PathBuf> {
    if elevated {
        if let Some(home) = std::env::var("SUDO_USER")
            .ok()
            .filter(|user| user != "root")
            .and_then(|user| User::from_name(&user).ok().flatten())
            .map(|user| user.dir)
        {
            return Some(home);
        }
    }
    dirs::home_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn explicit_directories_win() {
        let cli = Cli::parse_from([
            "burrow",
            "--server-config-dir",
            "/tmp/srv",
            "--client-config-dir",
            "/tmp/cli",
            "--key-dir",
            "/tmp/keys",
            "-i",
            "wg7",
            "keys",
        ]);
        let settings = Settings::from_cli(&cli).expect("settings");

        assert_eq!(settings.server_config_path(), PathBuf::from("/tmp/srv/wg7.conf"));
        assert_eq!(settings.client_config_path(), PathBuf::from("/tmp/cli/wg7.conf"));
        assert_eq!(settings.key_dir, PathBuf::from("/tmp/keys"));
    }

    #[test]
    fn server_dir_defaults_to_etc_wireguard() {
        let cli = Cli::parse_from(["burrow", "--client-config-dir", "/tmp/c", "--key-dir", "/tmp/k", "keys"]);
        let settings = Settings::from_cli(&cli).expect("settings");
        assert_eq!(settings.server_config_path(), PathBuf::from("/etc/wireguard/wg0.conf"));
    }

    #[test]
    fn interface_names() {
        assert!(validate_interface_name("wg0").is_ok());
        assert!(validate_interface_name("home-vpn.1").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("averyveryverylongname").is_err());
        assert!(validate_interface_name("../etc").is_err());
        assert!(validate_interface_name("wg 0").is_err());
    }

    #[test]
    fn rooted_settings_keep_everything_under_root() {
        let settings = Settings::rooted(Path::new("/sandbox"), OsFamily::LinuxLike);
        assert!(settings.server_config_path().starts_with("/sandbox"));
        assert!(settings.client_config_path().starts_with("/sandbox"));
        assert!(settings.key_dir.starts_with("/sandbox"));
    }
}
