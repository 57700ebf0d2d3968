//! End-to-end client/server exercises over real loopback TCP.

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use netcloud::logger::NoopLogger;
use netcloud::secrets::MemorySecrets;
use netcloud::server;
use netcloud::session::{CloudSession, NetCloudSession};
use netcloud::storage::FsStorage;
use netcloud::NetCloudError;

const USER: u64 = 42;
const SECRET: &[u8] = b"hunter2";
const OTHER_USER: u64 = 43;
const OTHER_SECRET: &[u8] = b"correct horse battery staple";
const APP: u32 = 7;

/// Start a daemon on an ephemeral port; returns its address. The server
/// thread lives for the rest of the test process.
fn start_server(root: &Path) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();

    let mut secrets = MemorySecrets::new();
    secrets.insert(USER, SECRET);
    secrets.insert(OTHER_USER, OTHER_SECRET);

    let storage = Arc::new(FsStorage::new(root.to_path_buf()));
    thread::spawn(move || {
        let _ = server::serve_listener(listener, storage, Arc::new(secrets), Arc::new(NoopLogger));
    });
    Ok(addr)
}

fn logged_in(addr: &str) -> Result<NetCloudSession> {
    let mut session = NetCloudSession::new(addr.to_string());
    session.login(USER, SECRET, APP)?;
    Ok(session)
}

#[test]
fn write_then_read_round_trip() -> Result<()> {
    netcloud::auth::init()?;
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    session.file_write("notes.txt", b"hello")?;
    let mut buf = [0u8; 5];
    let n = session.file_read("notes.txt", &mut buf, 5)?;
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");

    session.logout()?;
    Ok(())
}

#[test]
fn file_metadata_operations() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    assert!(!session.file_exists("missing.txt")?);

    session.file_write("saves/slot1.dat", &[7u8; 1234])?;
    assert!(session.file_exists("saves/slot1.dat")?);
    assert_eq!(session.file_size("saves/slot1.dat")?, 1234);

    assert!(session.file_delete("saves/slot1.dat")?);
    assert!(!session.file_exists("saves/slot1.dat")?);
    assert!(!session.file_delete("saves/slot1.dat")?);

    Ok(())
}

#[test]
fn truncated_read_returns_a_verified_prefix() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    session.file_write("long.bin", b"0123456789")?;
    let mut buf = [0u8; 4];
    let n = session.file_read("long.bin", &mut buf, 4)?;
    assert_eq!(n, 4);
    assert_eq!(&buf, b"0123");
    Ok(())
}

#[test]
fn reading_a_missing_file_fails() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    let mut buf = [0u8; 16];
    let err = session.file_read("missing.txt", &mut buf, 16).unwrap_err();
    assert!(matches!(err, NetCloudError::Fail));
    let err = session.file_size("missing.txt").unwrap_err();
    assert!(matches!(err, NetCloudError::Fail));
    Ok(())
}

#[test]
fn wrong_secret_cannot_log_in() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;

    // With mismatched secrets the peers derive different keys, so the
    // server's refusal is unverifiable on this side: Network, by design
    // never a trusted Unauthorized.
    let mut session = NetCloudSession::new(addr.clone());
    let err = session.login(USER, b"wrong password", APP).unwrap_err();
    assert!(matches!(err, NetCloudError::Network(_)));

    // and the session is unusable afterwards
    assert!(matches!(
        session.file_exists("anything"),
        Err(NetCloudError::NotConnected)
    ));
    Ok(())
}

#[test]
fn unknown_user_cannot_log_in() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;

    let mut session = NetCloudSession::new(addr);
    let err = session.login(9999, SECRET, APP).unwrap_err();
    assert!(matches!(err, NetCloudError::Network(_)));
    Ok(())
}

#[test]
fn namespaces_are_isolated_between_users() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;

    let mut alice = logged_in(&addr)?;
    alice.file_write("private.txt", b"alice's data")?;

    let mut bob = NetCloudSession::new(addr.clone());
    bob.login(OTHER_USER, OTHER_SECRET, APP)?;
    assert!(!bob.file_exists("private.txt")?);

    // same user, different app id: still isolated
    let mut alice_other_app = NetCloudSession::new(addr);
    alice_other_app.login(USER, SECRET, APP + 1)?;
    assert!(!alice_other_app.file_exists("private.txt")?);
    Ok(())
}

#[test]
fn path_traversal_is_refused_by_the_server() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    assert!(matches!(
        session.file_write("../escape.txt", b"x"),
        Err(NetCloudError::Fail)
    ));
    assert!(!session.file_exists("../../etc/passwd")?);
    Ok(())
}

#[test]
fn relogin_after_logout_works() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;

    let mut session = logged_in(&addr)?;
    session.file_write("sticky.txt", b"persisted")?;
    session.logout()?;
    session.logout()?; // idempotent

    session.login(USER, SECRET, APP)?;
    let mut buf = [0u8; 9];
    assert_eq!(session.file_read("sticky.txt", &mut buf, 9)?, 9);
    assert_eq!(&buf, b"persisted");
    Ok(())
}

#[test]
fn empty_write_and_zero_byte_read() -> Result<()> {
    let root = tempfile::tempdir()?;
    let addr = start_server(root.path())?;
    let mut session = logged_in(&addr)?;

    session.file_write("empty.txt", b"")?;
    assert!(session.file_exists("empty.txt")?);
    assert_eq!(session.file_size("empty.txt")?, 0);

    let mut buf = [0u8; 8];
    assert_eq!(session.file_read("empty.txt", &mut buf, 8)?, 0);
    Ok(())
}
