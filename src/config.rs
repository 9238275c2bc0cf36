//! Command-line interface and the resolved daemon configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::errors::PrivilegeError;
use crate::privilege::BuildIdentity;

pub const DEFAULT_BUILD_COMMAND: &str = "makepkg -sr --noconfirm";
pub const DEFAULT_INSTALL_COMMAND: &str = "/usr/lib/saturated/install-package";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "saturated")]
#[command(version, about = "Build-trigger daemon: mirror a repository, build a branch, stream the log over HTTP")]
pub struct Cli {
    /// Address to listen on, e.g. `127.0.0.1:8080` or `:8080`
    pub address: String,

    /// Shell command that builds the package
    #[arg(short = 'm', long, env = "SATURATED_BUILD_COMMAND", default_value = DEFAULT_BUILD_COMMAND)]
    pub build_command: String,

    /// Shell command that installs the built package (empty to skip)
    #[arg(short = 'i', long, env = "SATURATED_INSTALL_COMMAND", default_value = DEFAULT_INSTALL_COMMAND)]
    pub install_command: String,

    /// Directory holding repository mirrors and working dirs
    #[arg(short = 'w', long, env = "SATURATED_WORKDIR", default_value = "/tmp/")]
    pub workdir: PathBuf,

    /// Branch to check out before building
    #[arg(short = 'b', long, env = "SATURATED_BRANCH", default_value = "pkgbuild")]
    pub branch: String,

    /// Number of builds kept in history
    #[arg(short = 'k', long, env = "SATURATED_KEEP", default_value_t = 20,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub keep: u32,

    /// User that runs the build commands
    #[arg(short = 'u', long, env = "SATURATED_USER", default_value = "nobody")]
    pub user: String,

    #[arg(long, env = "SATURATED_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Immutable runtime configuration, shared by every request.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub address: String,
    pub build_command: String,
    pub install_command: String,
    pub workdir: PathBuf,
    pub branch: String,
    pub keep: usize,
    pub identity: BuildIdentity,
}

impl DaemonConfig {
    /// Resolves `cli`, looking up the build user in the system user database.
    pub fn from_cli(cli: &Cli) -> Result<Self, PrivilegeError> {
        let identity = BuildIdentity::lookup(&cli.user)?;
        Ok(Self::with_identity(cli, identity))
    }

    pub fn with_identity(cli: &Cli, identity: BuildIdentity) -> Self {
        Self {
            address: normalize_address(&cli.address),
            build_command: cli.build_command.clone(),
            install_command: cli.install_command.clone(),
            workdir: cli.workdir.clone(),
            branch: cli.branch.clone(),
            keep: cli.keep as usize,
            identity,
        }
    }

    /// The install command, or `None` when the install stage is disabled.
    pub fn install_command(&self) -> Option<&str> {
        let command = self.install_command.trim();
        (!command.is_empty()).then_some(command)
    }
}

/// Turns a bare `:port` into an all-interfaces address.
pub fn normalize_address(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("saturated").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[":8080"]).unwrap();
        assert_eq!(cli.address, ":8080");
        assert_eq!(cli.build_command, DEFAULT_BUILD_COMMAND);
        assert_eq!(cli.install_command, DEFAULT_INSTALL_COMMAND);
        assert_eq!(cli.workdir, PathBuf::from("/tmp/"));
        assert_eq!(cli.branch, "pkgbuild");
        assert_eq!(cli.keep, 20);
        assert_eq!(cli.user, "nobody");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_short_flags() {
        let cli = parse(&[
            "-m", "make", "-i", "", "-w", "/srv/build", "-b", "main", "-k", "5", "-u", "builder",
            "127.0.0.1:9000",
        ])
        .unwrap();
        assert_eq!(cli.build_command, "make");
        assert_eq!(cli.install_command, "");
        assert_eq!(cli.workdir, PathBuf::from("/srv/build"));
        assert_eq!(cli.branch, "main");
        assert_eq!(cli.keep, 5);
        assert_eq!(cli.user, "builder");
        assert_eq!(cli.address, "127.0.0.1:9000");
    }

    #[test]
    fn test_address_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_keep_must_be_positive() {
        assert!(parse(&["-k", "0", ":8080"]).is_err());
    }

    #[test]
    fn test_json_log_format() {
        let cli = parse(&["--log-format", "json", ":8080"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_address("localhost:80"), "localhost:80");
    }

    #[test]
    fn test_empty_install_command_disables_stage() {
        let cli = parse(&["-i", "  ", ":8080"]).unwrap();
        let config = DaemonConfig::with_identity(&cli, BuildIdentity::current());
        assert_eq!(config.install_command(), None);

        let cli = parse(&[":8080"]).unwrap();
        let config = DaemonConfig::with_identity(&cli, BuildIdentity::current());
        assert_eq!(config.install_command(), Some(DEFAULT_INSTALL_COMMAND));
        assert_eq!(config.address, "0.0.0.0:8080");
        assert_eq!(config.keep, 20);
    }
}
