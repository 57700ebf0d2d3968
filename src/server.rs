//! NetCloud daemon: accept loop and per-connection request handler.
//!
//! Each connection gets its own thread, its own derived session key and
//! namespace; handlers share nothing but the storage backend and the
//! secret store. A request that fails authentication gets a signed
//! negative result and the connection stays open (the historical server
//! behaviour; the client side treats the same failure as fatal).

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::auth::{self, SessionKey};
use crate::error::NetCloudError;
use crate::logger::Logger;
use crate::protocol::{self, Packet, cmd, CHALLENGE_LEN, SHARED_SECRET_LEN};
use crate::secrets::SecretStore;
use crate::storage::{Namespace, Storage};
use crate::transport::{recv_exact, TcpTransport, Transport};

pub fn serve(
    bind: &str,
    storage: Arc<dyn Storage>,
    secrets: Arc<dyn SecretStore>,
    log: Arc<dyn Logger>,
) -> Result<()> {
    let listener = TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
    serve_listener(listener, storage, secrets, log)
}

/// Accept loop over an already-bound listener; tests use this to learn
/// the ephemeral port first.
pub fn serve_listener(
    listener: TcpListener,
    storage: Arc<dyn Storage>,
    secrets: Arc<dyn SecretStore>,
    log: Arc<dyn Logger>,
) -> Result<()> {
    eprintln!("netcloudd listening on {}", listener.local_addr()?);
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                let storage = Arc::clone(&storage);
                let secrets = Arc::clone(&secrets);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    handle_stream(stream, &peer, storage.as_ref(), secrets.as_ref(), log.as_ref());
                });
            }
            Err(e) => eprintln!("accept error: {e}"),
        }
    }
    Ok(())
}

fn handle_stream(
    stream: TcpStream,
    peer: &str,
    storage: &dyn Storage,
    secrets: &dyn SecretStore,
    log: &dyn Logger,
) {
    log.event(&format!("connection from {peer}"));
    let mut t = TcpTransport::from_stream(stream);
    if let Err(e) = handle_conn(&mut t, storage, secrets, log) {
        log.error(peer, &e.to_string());
    }
    t.close();
    log.event(&format!("connection from {peer} closed"));
}

/// Drive one connection from login to disconnect.
pub fn handle_conn(
    t: &mut dyn Transport,
    storage: &dyn Storage,
    secrets: &dyn SecretStore,
    log: &dyn Logger,
) -> Result<()> {
    let (key, ns) = match handshake(t, secrets, log)? {
        Some(established) => established,
        // rejected; the signed refusal has already been sent
        None => return Ok(()),
    };

    loop {
        let (pkt, raw) = match protocol::read_packet_opt(t) {
            Ok(Some(next)) => next,
            Ok(None) => {
                log.event(&format!("user {} disconnected", ns.user_id));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match pkt {
            Packet::FileWrite {
                name_len,
                content_len,
            } => handle_write(t, storage, &key, &ns, name_len, content_len, &raw, log)?,
            Packet::FileRead { max_read, name_len } => {
                handle_read(t, storage, &key, &ns, max_read, name_len, &raw, log)?
            }
            Packet::PathRequest { command, name_len } => {
                handle_path(t, storage, &key, &ns, command, name_len, &raw, log)?
            }
            other => anyhow::bail!(
                "unexpected command {} from user {}",
                other.command(),
                ns.user_id
            ),
        }
    }
}

/// Challenge-response handshake, server side. Returns `None` when the
/// client failed to prove possession of the user secret.
fn handshake(
    t: &mut dyn Transport,
    secrets: &dyn SecretStore,
    log: &dyn Logger,
) -> Result<Option<(SessionKey, Namespace)>> {
    let (pkt, _raw) = protocol::read_packet(t).context("awaiting login")?;
    let (user_id, app_id) = match pkt {
        Packet::Login { user_id, app_id } => (user_id, app_id),
        other => anyhow::bail!("expected login, got command {}", other.command()),
    };
    log.event(&format!("login request: user {user_id} app {app_id}"));

    let mut shared = [0u8; SHARED_SECRET_LEN];
    let mut challenge = [0u8; CHALLENGE_LEN];
    getrandom::getrandom(&mut shared).context("shared secret generation")?;
    getrandom::getrandom(&mut challenge).context("challenge generation")?;

    // The challenge goes out unauthenticated: no key exists yet.
    let bytes = Packet::AuthChallenge { shared, challenge }.encode_fixed();
    t.send_all(&bytes).context("sending challenge")?;

    // Unknown users still get a full handshake against a throwaway key,
    // so the traffic pattern does not reveal which ids exist.
    let secret = secrets.user_secret(user_id);
    let key = match &secret {
        Some(s) => auth::derive_session_key(s, &shared),
        None => {
            let mut junk = [0u8; 32];
            getrandom::getrandom(&mut junk).context("placeholder key")?;
            auth::derive_session_key(&junk, &shared)
        }
    };

    let (pkt, raw) = protocol::read_packet(t).context("awaiting auth answer")?;
    let answer = match pkt {
        Packet::AuthAnswer { answer } => answer,
        other => anyhow::bail!("expected auth answer, got command {}", other.command()),
    };
    let expected = auth::sign_bytes(&challenge, &key);
    let authenticated = secret.is_some()
        && auth::verify_packet(&raw, &[], &key)
        && auth::macs_equal(&expected, &answer);

    let mut result = Packet::AuthResult {
        success: authenticated,
    }
    .encode_fixed();
    auth::sign_packet(&mut result, &[], &key);
    t.send_all(&result).context("sending auth result")?;

    if !authenticated {
        log.event(&format!("user {user_id} failed authentication"));
        return Ok(None);
    }
    log.event(&format!(
        "user {user_id} authenticated (key {}..)",
        key.fingerprint()
    ));
    Ok(Some((key, Namespace { user_id, app_id })))
}

fn send_result(t: &mut dyn Transport, pkt: Packet, key: &SessionKey) -> Result<()> {
    let mut bytes = pkt.encode_fixed();
    auth::sign_packet(&mut bytes, &[], key);
    t.send_all(&bytes)?;
    Ok(())
}

/// Read a declared trailing filename into an owned buffer. The length
/// was already bounded during decode.
fn recv_name(t: &mut dyn Transport, name_len: u32) -> Result<Vec<u8>, NetCloudError> {
    let mut name = vec![0u8; name_len as usize];
    recv_exact(t, &mut name)?;
    Ok(name)
}

fn parse_name(name: &[u8]) -> Option<&str> {
    let name = std::str::from_utf8(name).ok()?;
    if name.is_empty() || name.contains('\0') {
        return None;
    }
    Some(name)
}

#[allow(clippy::too_many_arguments)]
fn handle_write(
    t: &mut dyn Transport,
    storage: &dyn Storage,
    key: &SessionKey,
    ns: &Namespace,
    name_len: u32,
    content_len: u32,
    raw_req: &[u8],
    log: &dyn Logger,
) -> Result<()> {
    let name = recv_name(t, name_len)?;
    let mut content = vec![0u8; content_len as usize];
    recv_exact(t, &mut content)?;

    let success = if auth::verify_packet(raw_req, &[&name, &content], key) {
        match parse_name(&name) {
            Some(n) => match storage.write(ns, n, &content) {
                Ok(()) => {
                    log.event(&format!(
                        "user {} wrote {n:?} ({} bytes)",
                        ns.user_id,
                        content.len()
                    ));
                    true
                }
                Err(e) => {
                    log.error("write", &e.to_string());
                    false
                }
            },
            None => false,
        }
    } else {
        log.error("write", "request failed authentication");
        false
    };
    send_result(t, Packet::FileWriteResult { success }, key)
}

#[allow(clippy::too_many_arguments)]
fn handle_read(
    t: &mut dyn Transport,
    storage: &dyn Storage,
    key: &SessionKey,
    ns: &Namespace,
    max_read: u32,
    name_len: u32,
    raw_req: &[u8],
    log: &dyn Logger,
) -> Result<()> {
    let name = recv_name(t, name_len)?;
    if !auth::verify_packet(raw_req, &[&name], key) {
        log.error("read", "request failed authentication");
        return send_result(t, Packet::GeneralResult { success: false }, key);
    }
    let data = match parse_name(&name) {
        Some(n) => match storage.read(ns, n, max_read as usize) {
            Ok(data) => data,
            Err(e) => {
                log.error("read", &e.to_string());
                return send_result(t, Packet::GeneralResult { success: false }, key);
            }
        },
        None => return send_result(t, Packet::GeneralResult { success: false }, key),
    };

    // MAC covers the fixed part plus the whole payload; the payload is
    // sent after the fixed part so the client can stream it.
    let mut fixed = Packet::FileReadResult {
        read_len: data.len() as u32,
    }
    .encode_fixed();
    auth::sign_packet(&mut fixed, &[&data], key);
    t.send_all(&fixed)?;
    t.send_all(&data)?;
    log.event(&format!(
        "user {} read {} bytes",
        ns.user_id,
        data.len()
    ));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_path(
    t: &mut dyn Transport,
    storage: &dyn Storage,
    key: &SessionKey,
    ns: &Namespace,
    command: u8,
    name_len: u32,
    raw_req: &[u8],
    log: &dyn Logger,
) -> Result<()> {
    let name = recv_name(t, name_len)?;
    if !auth::verify_packet(raw_req, &[&name], key) {
        log.error("path request", "request failed authentication");
        return send_result(t, Packet::GeneralResult { success: false }, key);
    }
    let name = match parse_name(&name) {
        Some(n) => n,
        None => return send_result(t, Packet::GeneralResult { success: false }, key),
    };
    match command {
        cmd::EXISTS => {
            let found = match storage.exists(ns, name) {
                Ok(found) => found,
                Err(e) => {
                    log.error("exists", &e.to_string());
                    false
                }
            };
            send_result(t, Packet::GeneralResult { success: found }, key)
        }
        cmd::DELETE => {
            let removed = match storage.delete(ns, name) {
                Ok(removed) => removed,
                Err(e) => {
                    log.error("delete", &e.to_string());
                    false
                }
            };
            if removed {
                log.event(&format!("user {} deleted {name:?}", ns.user_id));
            }
            send_result(t, Packet::GeneralResult { success: removed }, key)
        }
        cmd::SIZE => match storage.size(ns, name) {
            Ok(size) => send_result(t, Packet::FileSizeResult { size }, key),
            Err(e) => {
                log.error("size", &e.to_string());
                send_result(t, Packet::GeneralResult { success: false }, key)
            }
        },
        other => anyhow::bail!("path request with command {other}"),
    }
}
