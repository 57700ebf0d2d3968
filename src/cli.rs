//! Shared CLI fragments for the netcloud client and daemon

use clap::Parser;
use std::path::PathBuf;

/// Daemon options used by netcloudd
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:9044")]
    pub bind: String,

    /// Root directory for stored files
    #[arg(long, default_value = "./cloud")]
    pub root: PathBuf,

    /// Credentials file (one user_id:secret per line)
    #[arg(long)]
    pub secrets: PathBuf,

    /// Append diagnostics to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Connection options shared by all client subcommands
#[derive(Clone, Debug, Parser)]
pub struct ClientOpts {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:9044")]
    pub server: String,

    /// User id
    #[arg(long)]
    pub user: u64,

    /// Long-term user secret
    #[arg(long)]
    pub key: String,

    /// Application id
    #[arg(long, default_value_t = 0)]
    pub app: u32,
}
