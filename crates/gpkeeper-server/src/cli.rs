use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gpkeeper-server", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Serve,
    /// Decode ACL items and print them as JSON.
    DecodeAcl {
        #[arg(required = true)]
        rules: Vec<String>,
        /// Merge items by grantee.
        #[arg(long)]
        aggregate: bool,
    },
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_parses_serve_subcommand() {
        let cli = Cli::parse_from(["gpkeeper-server", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn cli_parses_config_flag() {
        let cli = Cli::parse_from(["gpkeeper-server", "--config", "/etc/gpkeeper.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/gpkeeper.toml")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_defaults_to_no_subcommand() {
        let cli = Cli::parse_from(["gpkeeper-server"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_decode_acl_with_aggregate() {
        let cli = Cli::parse_from([
            "gpkeeper-server",
            "decode-acl",
            "alice=r/bob",
            "=U/bob",
            "--aggregate",
        ]);
        match cli.command {
            Some(Command::DecodeAcl { rules, aggregate }) => {
                assert_eq!(rules, vec!["alice=r/bob", "=U/bob"]);
                assert!(aggregate);
            }
            other => panic!("expected decode-acl, got {other:?}"),
        }
    }

    #[test]
    fn cli_decode_acl_needs_a_rule() {
        assert!(Cli::try_parse_from(["gpkeeper-server", "decode-acl"]).is_err());
    }

    #[test]
    fn cli_config_flag_works_after_subcommand() {
        let cli = Cli::parse_from([
            "gpkeeper-server",
            "check-config",
            "--config",
            "/etc/gpkeeper.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/gpkeeper.toml")));
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
    }

    #[test]
    fn cli_version_flag() {
        let result = Cli::try_parse_from(["gpkeeper-server", "--version"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
