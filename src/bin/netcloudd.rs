use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use netcloud::cli::DaemonOpts;
use netcloud::logger::{Logger, StderrLogger, TextLogger};
use netcloud::secrets;
use netcloud::server;
use netcloud::storage::FsStorage;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    netcloud::auth::init().context("crypto self-test")?;

    let store = secrets::load_secrets_file(&opts.secrets)?;

    std::fs::create_dir_all(&opts.root)
        .with_context(|| format!("create root {}", opts.root.display()))?;
    let root = std::fs::canonicalize(&opts.root)
        .with_context(|| format!("canonicalize {}", opts.root.display()))?;

    let log: Arc<dyn Logger> = match &opts.log_file {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(StderrLogger),
    };

    println!("Starting netcloudd:");
    println!("  Root: {}", root.display());
    println!("  Bind: {}", opts.bind);
    if opts.bind.starts_with("0.0.0.0") {
        eprintln!("warning: binding to 0.0.0.0 exposes the daemon to all interfaces");
        eprintln!("         the protocol authenticates but does not encrypt");
    }

    server::serve(
        &opts.bind,
        Arc::new(FsStorage::new(root)),
        Arc::new(store),
        log,
    )
}
