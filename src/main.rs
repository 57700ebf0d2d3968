use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use netcloud::cli::ClientOpts;
use netcloud::session::{CloudSession, NetCloudSession};

#[derive(Parser)]
#[command(name = "netcloud", about = "NetCloud remote storage client")]
struct Args {
    #[command(flatten)]
    opts: ClientOpts,

    #[command(subcommand)]
    op: Op,
}

#[derive(Subcommand)]
enum Op {
    /// Upload a local file
    Put {
        local: PathBuf,
        /// Remote name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a remote file
    Get {
        name: String,
        /// Write to this path instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Largest acceptable file
        #[arg(long, default_value_t = netcloud::protocol::MAX_CONTENT_LEN)]
        max_bytes: usize,
    },
    /// Check whether a remote file exists
    Exists { name: String },
    /// Delete a remote file
    Delete { name: String },
    /// Print the size of a remote file in bytes
    Size { name: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    netcloud::auth::init().context("crypto self-test")?;

    let mut session = NetCloudSession::new(args.opts.server.clone());
    session
        .login(args.opts.user, args.opts.key.as_bytes(), args.opts.app)
        .context("login")?;

    let outcome = run(&mut session, args.op);
    let _ = session.logout();
    outcome
}

fn run(session: &mut NetCloudSession, op: Op) -> Result<()> {
    match op {
        Op::Put { local, name } => {
            let data =
                std::fs::read(&local).with_context(|| format!("read {}", local.display()))?;
            let name = match name {
                Some(name) => name,
                None => local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_owned)
                    .context("cannot derive a remote name; pass --name")?,
            };
            session.file_write(&name, &data)?;
            println!("wrote {name} ({} bytes)", data.len());
        }
        Op::Get {
            name,
            out,
            max_bytes,
        } => {
            let mut buf = vec![0u8; max_bytes];
            let n = session.file_read(&name, &mut buf, max_bytes)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &buf[..n])
                        .with_context(|| format!("write {}", path.display()))?;
                    println!("{n} bytes -> {}", path.display());
                }
                None => std::io::stdout().write_all(&buf[..n])?,
            }
        }
        Op::Exists { name } => println!("{}", session.file_exists(&name)?),
        Op::Delete { name } => {
            let removed = session.file_delete(&name)?;
            println!("{}", if removed { "deleted" } else { "not found" });
        }
        Op::Size { name } => println!("{}", session.file_size(&name)?),
    }
    Ok(())
}
