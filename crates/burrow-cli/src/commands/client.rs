//! `client-setup` command implementation.
//!
//! Writes the client document with the server as its only peer. The
//! document and keys live under the invoking user's home and are handed
//! back to that user when run through `sudo`.

use std::io::Write;

use burrow_wireguard::fs::create_missing_dirs;
use burrow_wireguard::{
    build_client_config, render, write_document, ClientOptions, CommandRunner, Endpoint, Provenance, Role, TunnelMode,
};
use tracing::{info, warn};

use super::{parse_public_key, Context};
use crate::cli::ClientSetupArgs;
use crate::error::CliError;
use crate::output::{ClientSetupReport, OutputFormat};

/// `client-setup` executor.
pub struct ClientSetupCommand<R> {
    ctx: Context<R>,
}

impl<R: CommandRunner + Clone> ClientSetupCommand<R> {
    /// Create a new client-setup command.
    #[must_use]
    pub fn new(ctx: Context<R>) -> Self {
        Self { ctx }
    }

    /// Execute the command.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed key or endpoint, or if key generation
    /// or writing the document fails.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &ClientSetupArgs,
    ) -> Result<(), CliError> {
        let report = self.run(args).await?;
        format.write(writer, &report)?;
        Ok(())
    }

    /// Perform the setup and describe the result.
    ///
    /// # Errors
    ///
    /// See [`ClientSetupCommand::execute`].
    pub async fn run(&self, args: &ClientSetupArgs) -> Result<ClientSetupReport, CliError> {
        let settings = &self.ctx.settings;
        let server_key = parse_public_key("server", &args.server_public_key)?;
        let mode = TunnelMode::from(args.mode);

        let mut options = ClientOptions {
            keepalive: args.keepalive,
            ..ClientOptions::default()
        };
        if !args.dns.is_empty() {
            options.dns.clone_from(&args.dns);
        }

        // Pre-flight: nothing is written if the endpoint is unusable.
        args.endpoint.parse::<Endpoint>()?;
        let path = settings.client_config_path();
        if path.exists() {
            warn!(
                interface = %settings.interface,
                path = %path.display(),
                "interface already exists, rewriting client document"
            );
        }

        let identity = self.ctx.key_store().load_or_generate(Role::Client).await?;
        let config = build_client_config(&identity, server_key, &args.endpoint, args.vpn_ip, mode, &options)?;

        let created = create_missing_dirs(&settings.client_config_dir)?;
        write_document(&path, &render(&config, &Provenance::now()))?;
        if let Some(owner) = settings.owner {
            owner.adopt_all(&created);
            owner.adopt(&path);
        }
        info!(interface = %settings.interface, path = %path.display(), %mode, "client document written");

        let allowed_ips = config
            .peers
            .first()
            .map(burrow_wireguard::PeerConfig::allowed_ips_string)
            .unwrap_or_default();

        Ok(ClientSetupReport {
            interface: settings.interface.clone(),
            config_path: path,
            public_key: *identity.public_key(),
            address: args.vpn_ip.to_string(),
            endpoint: args.endpoint.clone(),
            mode,
            allowed_ips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ModeArg;
    use crate::settings::Settings;
    use burrow_wireguard::testing::ScriptedRunner;
    use burrow_wireguard::{read_document, KeyPair, OsFamily, WireGuardError};

    fn args(server_key: &str, endpoint: &str, mode: ModeArg) -> ClientSetupArgs {
        ClientSetupArgs {
            server_public_key: server_key.to_string(),
            endpoint: endpoint.to_string(),
            vpn_ip: "10.0.0.2/24".parse().expect("net"),
            mode,
            dns: Vec::new(),
            keepalive: 25,
        }
    }

    #[tokio::test]
    async fn split_tunnel_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);
        let server = KeyPair::generate().public_key().to_base64();

        let report = ClientSetupCommand::new(Context::new(settings.clone(), ScriptedRunner::new()))
            .run(&args(&server, "198.51.100.4:51820", ModeArg::Split))
            .await
            .expect("setup");

        assert_eq!(report.allowed_ips, "10.0.0.0/24");
        let text = std::fs::read_to_string(settings.client_config_path()).expect("read");
        assert!(text.contains("AllowedIPs = 10.0.0.0/24\n"));
        assert!(text.contains("PersistentKeepalive = 25\n"));
        assert!(!text.contains("DNS"));
        assert_eq!(burrow_wireguard::fs::mode_of(&settings.client_config_path()).expect("mode"), 0o600);
    }

    #[tokio::test]
    async fn full_tunnel_with_custom_dns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);
        let mut setup = args(&KeyPair::generate().public_key().to_base64(), "vpn.example.com:51820", ModeArg::Full);
        setup.dns = vec!["9.9.9.9".parse().expect("ip")];

        ClientSetupCommand::new(Context::new(settings.clone(), ScriptedRunner::new()))
            .run(&setup)
            .await
            .expect("setup");

        let config = read_document(&settings.client_config_path()).expect("parse");
        assert_eq!(config.dns, setup.dns);
        assert_eq!(config.peers[0].allowed_ips_string(), "0.0.0.0/0, ::/0");
    }

    #[tokio::test]
    async fn re_setup_rewrites_document_and_keeps_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);
        let cmd = ClientSetupCommand::new(Context::new(settings.clone(), ScriptedRunner::new()));
        let server = KeyPair::generate().public_key().to_base64();

        let first = cmd
            .run(&args(&server, "198.51.100.4:51820", ModeArg::Full))
            .await
            .expect("first");
        let second = cmd
            .run(&args(&server, "198.51.100.9:51820", ModeArg::Split))
            .await
            .expect("re-setup");

        assert_eq!(first.public_key, second.public_key);
        let text = std::fs::read_to_string(settings.client_config_path()).expect("read");
        assert!(text.contains("AllowedIPs = 10.0.0.0/24\n"));
        assert!(text.contains("Endpoint = 198.51.100.9:51820\n"));
        assert!(!text.contains("0.0.0.0/0"));
        assert!(!text.contains("198.51.100.4"));
        assert_eq!(text.matches("[Peer]").count(), 1);
    }

    #[tokio::test]
    async fn elevated_setup_hands_home_dirs_back() {
        use burrow_wireguard::Owner;
        use std::os::unix::fs::MetadataExt;

        let uid_of = |path: &std::path::Path| std::fs::metadata(path).expect("stat").uid();
        let euid = nix::unistd::geteuid();
        let owner = if euid.is_root() {
            Owner { uid: 4242, gid: 4242 }
        } else {
            Owner {
                uid: euid.as_raw(),
                gid: nix::unistd::getegid().as_raw(),
            }
        };
        let home = tempfile::tempdir().expect("tempdir");
        let config = home.path().join(".config");
        let mut settings = Settings::rooted(home.path(), OsFamily::LinuxLike);
        settings.client_config_dir = config.join("burrow");
        settings.key_dir = config.join("burrow").join("keys");
        settings.owner = Some(owner);

        ClientSetupCommand::new(Context::new(settings.clone(), ScriptedRunner::new()))
            .run(&args(&KeyPair::generate().public_key().to_base64(), "198.51.100.4:51820", ModeArg::Split))
            .await
            .expect("setup");

        for path in [&config, &settings.client_config_dir, &settings.key_dir, &settings.client_config_path()] {
            assert_eq!(uid_of(path), owner.uid, "{}", path.display());
        }
        assert_eq!(burrow_wireguard::fs::mode_of(&config).expect("mode"), 0o755);
        assert_eq!(burrow_wireguard::fs::mode_of(&settings.key_dir).expect("mode"), 0o700);
    }

    #[tokio::test]
    async fn bad_endpoint_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::rooted(dir.path(), OsFamily::LinuxLike);

        let result = ClientSetupCommand::new(Context::new(settings.clone(), ScriptedRunner::new()))
            .run(&args(&KeyPair::generate().public_key().to_base64(), "198.51.100.4", ModeArg::Split))
            .await;

        assert!(matches!(result, Err(CliError::WireGuard(WireGuardError::InvalidEndpoint(_)))));
        assert!(!settings.client_config_path().exists());
        assert!(!settings.key_dir.exists());
    }
}
