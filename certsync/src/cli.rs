use certsync_core::TaskKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// certsync - ACME certificate renewal and load balancer listener sync
#[derive(Parser)]
#[command(name = "certsync")]
#[command(version)]
#[command(about = "certsync - ACME certificate renewal and load balancer listener sync")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "CERTSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long, global = true, env = "CERTSYNC_DATABASE")]
    pub database: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or migrate the database
    InitDb,

    /// Register the account and issue a certificate
    Obtain {
        /// Task parameters as JSON
        #[arg(long)]
        params: String,
    },

    /// Renew a certificate when it is due
    Renew {
        /// Task parameters as JSON
        #[arg(long)]
        params: String,
    },

    /// Revoke a certificate
    Revoke {
        /// Task parameters as JSON
        #[arg(long)]
        params: String,
    },

    /// Verify the load balancer serves an adequate certificate, fixing it if not
    Check {
        /// Task parameters as JSON
        #[arg(long)]
        params: String,
    },
}

impl Commands {
    /// Task kind and raw parameters, or `None` for maintenance commands.
    pub fn task(&self) -> Option<(TaskKind, &str)> {
        match self {
            Commands::InitDb => None,
            Commands::Obtain { params } => Some((TaskKind::Obtain, params)),
            Commands::Renew { params } => Some((TaskKind::Renew, params)),
            Commands::Revoke { params } => Some((TaskKind::Revoke, params)),
            Commands::Check { params } => Some((TaskKind::Check, params)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_parses_params() {
        let cli = Cli::try_parse_from([
            "certsync",
            "renew",
            "--params",
            r#"{"acme_user_id":1,"certificate_id":2}"#,
        ])
        .unwrap();
        let (kind, params) = cli.command.task().expect("task command");
        assert_eq!(kind, TaskKind::Renew);
        assert_eq!(params, r#"{"acme_user_id":1,"certificate_id":2}"#);
    }

    #[test]
    fn global_options_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "certsync",
            "check",
            "--params",
            "{}",
            "--database",
            "/tmp/certsync.db",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/certsync.db")));
        assert!(cli.log_json);
    }

    #[test]
    fn init_db_is_not_a_task() {
        let cli = Cli::try_parse_from(["certsync", "init-db"]).unwrap();
        assert!(cli.command.task().is_none());
    }

    #[test]
    fn task_commands_require_params() {
        assert!(Cli::try_parse_from(["certsync", "obtain"]).is_err());
    }
}
