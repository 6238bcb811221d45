//! Command-line surface of the `ferry` binary

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::SessionConfig;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ferry - hand files or a text snippet to the next device on the LAN"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Package files/directories and serve them to the first receiver
    Send {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Share a text snippet (clipboard, then stdin, when omitted)
    Text { text: Option<String> },
    /// Find a sender on the local network and fetch its bundle
    Receive {
        /// Keep receiving until interrupted
        #[arg(long)]
        forever: bool,
    },
    /// List peers answering on the transfer port
    Scan,
}

/// Options accepted by every subcommand; they override the config file
#[derive(Clone, Debug, Default, ClapArgs)]
pub struct CommonOpts {
    /// Config file (defaults to <config dir>/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Transfer port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Documents root: serving root and reconciliation target
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Append event log lines to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Identify as a ferry peer with a managed documents tree
    #[arg(long, global = true)]
    pub managed: bool,

    /// Compact progress counters instead of a bar
    #[arg(long, global = true)]
    pub compact: bool,

    /// Only print results and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl CommonOpts {
    /// Layer the flags that were given over `cfg`
    pub fn apply(&self, cfg: &mut SessionConfig) {
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(root) = &self.root {
            cfg.documents_root = Some(root.clone());
        }
        if let Some(log) = &self.log_file {
            cfg.log_file = Some(log.clone());
        }
        if self.managed {
            cfg.managed_documents = true;
        }
        if self.compact {
            cfg.compact_progress = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_requires_paths() {
        assert!(Args::try_parse_from(["ferry", "send"]).is_err());
        let a = Args::try_parse_from(["ferry", "send", "a.txt", "dir"]).unwrap();
        match a.command {
            Some(Command::Send { paths }) => assert_eq!(paths.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let a = Args::try_parse_from(["ferry", "receive", "--forever", "-p", "9000", "--compact"]).unwrap();
        assert!(matches!(a.command, Some(Command::Receive { forever: true })));
        let mut cfg = SessionConfig::default();
        a.common.apply(&mut cfg);
        assert_eq!(cfg.port, 9000);
        assert!(cfg.compact_progress);
        assert!(!cfg.managed_documents);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let a = Args::try_parse_from(["ferry"]).unwrap();
        assert!(a.command.is_none());
        let mut cfg = SessionConfig {
            port: 7000,
            managed_documents: true,
            ..Default::default()
        };
        a.common.apply(&mut cfg);
        assert_eq!(cfg.port, 7000);
        assert!(cfg.managed_documents);
    }
}
