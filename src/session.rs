//! Client session: a state machine driving the handshake and the five
//! file operations over a transport.
//!
//! Only `Operation` permits file operations; everything else rejects
//! them without touching the transport. A failed handshake leaves the
//! transport closed and the state at `LoggedOut`; retrying means calling
//! `login` again.

use std::sync::Arc;

use crate::auth::{self, SessionKey};
use crate::error::NetCloudError;
use crate::logger::{Logger, NoopLogger};
use crate::protocol::{self, cmd, Packet, MAC_LEN, MAC_OFFSET, MAX_CONTENT_LEN, MAX_NAME_LEN};
use crate::transport::{TcpTransport, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    SentLogin,
    AnswerSent,
    Operation,
}

/// The NetCloud client capability set: one concrete implementation
/// ([`NetCloudSession`]); test doubles implement the same trait.
pub trait CloudSession {
    fn login(
        &mut self,
        user_id: u64,
        user_secret: &[u8],
        app_id: u32,
    ) -> Result<(), NetCloudError>;
    /// Valid from any state; idempotent.
    fn logout(&mut self) -> Result<(), NetCloudError>;
    fn file_write(&mut self, name: &str, data: &[u8]) -> Result<(), NetCloudError>;
    /// Streams at most `max_bytes` into `dest`, returning the byte count.
    fn file_read(
        &mut self,
        name: &str,
        dest: &mut [u8],
        max_bytes: usize,
    ) -> Result<usize, NetCloudError>;
    fn file_exists(&mut self, name: &str) -> Result<bool, NetCloudError>;
    fn file_delete(&mut self, name: &str) -> Result<bool, NetCloudError>;
    fn file_size(&mut self, name: &str) -> Result<u64, NetCloudError>;
}

type Dialer = Box<dyn FnMut() -> Result<Box<dyn Transport>, NetCloudError> + Send>;

pub struct NetCloudSession {
    dial: Dialer,
    transport: Option<Box<dyn Transport>>,
    key: Option<SessionKey>,
    state: SessionState,
    log: Arc<dyn Logger>,
}

impl NetCloudSession {
    /// A session that dials `addr` (host:port) with default deadlines on
    /// each login.
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self::with_dialer(Box::new(move || {
            let t = TcpTransport::connect(&addr)?;
            Ok(Box::new(t) as Box<dyn Transport>)
        }))
    }

    /// A session over an arbitrary transport source; lets tests
    /// substitute a scripted peer.
    pub fn with_dialer(dial: Dialer) -> Self {
        Self {
            dial,
            transport: None,
            key: None,
            state: SessionState::LoggedOut,
            log: Arc::new(NoopLogger),
        }
    }

    pub fn with_logger(mut self, log: Arc<dyn Logger>) -> Self {
        self.log = log;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Close the transport, discard the key, return to `LoggedOut`.
    fn reset(&mut self) {
        if let Some(mut t) = self.transport.take() {
            t.close();
        }
        self.key = None;
        self.state = SessionState::LoggedOut;
    }

    /// Transport and key, available only in `Operation`.
    fn channel(&mut self) -> Result<(&mut dyn Transport, &SessionKey), NetCloudError> {
        if self.state != SessionState::Operation {
            return Err(NetCloudError::NotConnected);
        }
        match (self.transport.as_deref_mut(), self.key.as_ref()) {
            (Some(t), Some(k)) => Ok((t, k)),
            _ => Err(NetCloudError::NotConnected),
        }
    }

    fn handshake(
        t: &mut dyn Transport,
        user_id: u64,
        user_secret: &[u8],
        app_id: u32,
        state: &mut SessionState,
        log: &dyn Logger,
    ) -> Result<SessionKey, NetCloudError> {
        let login = Packet::Login { user_id, app_id }.encode_fixed();
        t.send_all(&login)?;
        *state = SessionState::SentLogin;

        let (pkt, _raw) = protocol::read_packet(t)?;
        let (shared, challenge) = match pkt {
            Packet::AuthChallenge { shared, challenge } => (shared, challenge),
            other => {
                return Err(NetCloudError::Network(format!(
                    "expected auth challenge, got command {}",
                    other.command()
                )))
            }
        };

        let key = auth::derive_session_key(user_secret, &shared);
        log.event(&format!(
            "derived session key {}.. for user {user_id}",
            key.fingerprint()
        ));

        let answer = auth::sign_bytes(&challenge, &key);
        let mut bytes = Packet::AuthAnswer { answer }.encode_fixed();
        auth::sign_packet(&mut bytes, &[], &key);
        t.send_all(&bytes)?;
        *state = SessionState::AnswerSent;

        let (pkt, raw) = protocol::read_packet(t)?;
        let success = match pkt {
            Packet::AuthResult { success } => success,
            other => {
                return Err(NetCloudError::Network(format!(
                    "expected auth result, got command {}",
                    other.command()
                )))
            }
        };
        // An unverifiable result cannot be trusted either way; only a
        // verified refusal is Unauthorized.
        if !auth::verify_packet(&raw, &[], &key) {
            log.error("login", "auth result failed verification");
            return Err(NetCloudError::Network("unverifiable auth result".into()));
        }
        if !success {
            return Err(NetCloudError::Unauthorized);
        }
        Ok(key)
    }

    /// Send a path-tagged request and receive + verify the small fixed
    /// result. EXISTS, DELETE and SIZE all go through here.
    fn path_request(
        &mut self,
        command: u8,
        name: &str,
    ) -> Result<Packet, NetCloudError> {
        check_name(name)?;
        let (t, key) = self.channel()?;
        let mut req = Packet::PathRequest {
            command,
            name_len: name.len() as u32,
        }
        .encode_fixed();
        auth::sign_packet(&mut req, &[name.as_bytes()], key);
        t.send_all(&req)?;
        t.send_all(name.as_bytes())?;

        let (pkt, raw) = protocol::read_packet(t)?;
        if !auth::verify_packet(&raw, &[], key) {
            return Err(NetCloudError::Network("unverifiable result packet".into()));
        }
        Ok(pkt)
    }

    fn read_into(
        &mut self,
        name: &str,
        dest: &mut [u8],
        max_bytes: usize,
    ) -> Result<usize, NetCloudError> {
        let (t, key) = self.channel()?;
        let mut req = Packet::FileRead {
            max_read: max_bytes as u32,
            name_len: name.len() as u32,
        }
        .encode_fixed();
        auth::sign_packet(&mut req, &[name.as_bytes()], key);
        t.send_all(&req)?;
        t.send_all(name.as_bytes())?;

        let (pkt, raw) = protocol::read_packet(t)?;
        let read_len = match pkt {
            Packet::FileReadResult { read_len } => read_len as usize,
            Packet::GeneralResult { .. } => {
                // negative outcome; believe it only if it verifies
                if auth::verify_packet(&raw, &[], key) {
                    return Err(NetCloudError::Fail);
                }
                return Err(NetCloudError::Network("unverifiable read reply".into()));
            }
            other => {
                return Err(NetCloudError::Network(format!(
                    "expected read result, got command {}",
                    other.command()
                )))
            }
        };
        // Checked before a single payload byte is read; a hostile length
        // must not overrun the buffer or crash the client.
        if read_len > max_bytes {
            return Err(NetCloudError::Capacity {
                declared: read_len,
                capacity: max_bytes,
            });
        }

        let mut received = [0u8; MAC_LEN];
        received.copy_from_slice(&raw[MAC_OFFSET..MAC_OFFSET + MAC_LEN]);

        let mut mac = auth::ReadMac::new(&raw, key);
        let mut filled = 0;
        while filled < read_len {
            let n = match t.recv(&mut dest[filled..read_len]) {
                Ok(0) => {
                    return Err(NetCloudError::Network(format!(
                        "connection closed after {filled} of {read_len} payload bytes"
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            mac.update(&dest[filled..filled + n]);
            filled += n;
        }

        if mac.verify(&received) {
            Ok(read_len)
        } else {
            Err(NetCloudError::Fail)
        }
    }
}

impl CloudSession for NetCloudSession {
    fn login(
        &mut self,
        user_id: u64,
        user_secret: &[u8],
        app_id: u32,
    ) -> Result<(), NetCloudError> {
        self.reset();
        let mut t = (self.dial)()?;
        match Self::handshake(
            &mut *t,
            user_id,
            user_secret,
            app_id,
            &mut self.state,
            self.log.as_ref(),
        ) {
            Ok(key) => {
                self.key = Some(key);
                self.transport = Some(t);
                self.state = SessionState::Operation;
                self.log.event(&format!("user {user_id} logged in"));
                Ok(())
            }
            Err(e) => {
                t.close();
                self.state = SessionState::LoggedOut;
                Err(e)
            }
        }
    }

    fn logout(&mut self) -> Result<(), NetCloudError> {
        self.reset();
        Ok(())
    }

    fn file_write(&mut self, name: &str, data: &[u8]) -> Result<(), NetCloudError> {
        check_name(name)?;
        if data.len() > MAX_CONTENT_LEN {
            return Err(NetCloudError::Capacity {
                declared: data.len(),
                capacity: MAX_CONTENT_LEN,
            });
        }
        let (t, key) = self.channel()?;
        let mut req = Packet::FileWrite {
            name_len: name.len() as u32,
            content_len: data.len() as u32,
        }
        .encode_fixed();
        auth::sign_packet(&mut req, &[name.as_bytes(), data], key);
        // one logical message: fixed part, then name, then content
        t.send_all(&req)?;
        t.send_all(name.as_bytes())?;
        t.send_all(data)?;

        let (pkt, raw) = protocol::read_packet(t)?;
        let success = match pkt {
            Packet::FileWriteResult { success } => success,
            other => {
                return Err(NetCloudError::Network(format!(
                    "expected write result, got command {}",
                    other.command()
                )))
            }
        };
        if !auth::verify_packet(&raw, &[], key) {
            return Err(NetCloudError::Fail);
        }
        if success {
            Ok(())
        } else {
            Err(NetCloudError::Fail)
        }
    }

    fn file_read(
        &mut self,
        name: &str,
        dest: &mut [u8],
        max_bytes: usize,
    ) -> Result<usize, NetCloudError> {
        check_name(name)?;
        if max_bytes > dest.len() {
            return Err(NetCloudError::Capacity {
                declared: max_bytes,
                capacity: dest.len(),
            });
        }
        let res = self.read_into(name, dest, max_bytes);
        if matches!(res, Err(NetCloudError::Capacity { .. })) {
            // the undelivered payload has desynchronized the stream
            self.reset();
        }
        res
    }

    fn file_exists(&mut self, name: &str) -> Result<bool, NetCloudError> {
        match self.path_request(cmd::EXISTS, name)? {
            Packet::GeneralResult { success } => Ok(success),
            other => Err(NetCloudError::Network(format!(
                "expected general result, got command {}",
                other.command()
            ))),
        }
    }

    fn file_delete(&mut self, name: &str) -> Result<bool, NetCloudError> {
        match self.path_request(cmd::DELETE, name)? {
            Packet::GeneralResult { success } => Ok(success),
            other => Err(NetCloudError::Network(format!(
                "expected general result, got command {}",
                other.command()
            ))),
        }
    }

    fn file_size(&mut self, name: &str) -> Result<u64, NetCloudError> {
        match self.path_request(cmd::SIZE, name)? {
            Packet::FileSizeResult { size } => Ok(size),
            // verified negative result: the file does not exist
            Packet::GeneralResult { .. } => Err(NetCloudError::Fail),
            other => Err(NetCloudError::Network(format!(
                "expected size result, got command {}",
                other.command()
            ))),
        }
    }
}

impl Drop for NetCloudSession {
    fn drop(&mut self) {
        self.reset();
    }
}

fn check_name(name: &str) -> Result<(), NetCloudError> {
    if name.is_empty() || name.contains('\0') {
        return Err(NetCloudError::Fail);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NetCloudError::Capacity {
            declared: name.len(),
            capacity: MAX_NAME_LEN,
        });
    }
    Ok(())
}
