//! NetCloud wire format: packet layout, command codes, and framing limits.
//!
//! Every message starts with a 37-byte header: command (1), total_length
//! (u32 LE), mac (32). `total_length` is the exact byte count of the whole
//! message as placed on the wire, including any trailing buffers, so a
//! receiver reads the fixed part first and then exactly the declared
//! remainder. All integers are little-endian.

use crate::error::NetCloudError;
use crate::transport::{recv_exact, Transport};

pub const HEADER_LEN: usize = 37;
pub const MAC_OFFSET: usize = 5;
pub const MAC_LEN: usize = 32;

pub const SHARED_SECRET_LEN: usize = 64;
pub const CHALLENGE_LEN: usize = 32;

/// Longest filename accepted on either side.
pub const MAX_NAME_LEN: usize = 4096;
/// Largest file content in one write or read result (64MB) - prevents
/// memory exhaustion from a hostile peer.
pub const MAX_CONTENT_LEN: usize = 64 * 1024 * 1024;

// Command codes (keep numeric stable; the wire has no version field)
pub mod cmd {
    pub const LOGIN: u8 = 1;
    /// Used by both the server's challenge and the client's answer;
    /// direction disambiguates.
    pub const AUTH: u8 = 2;
    pub const AUTH_RESULT: u8 = 3;
    pub const WRITE: u8 = 4;
    pub const WRITE_RESULT: u8 = 5;
    pub const READ: u8 = 6;
    pub const READ_RESULT: u8 = 7;
    pub const EXISTS: u8 = 8;
    pub const DELETE: u8 = 9;
    pub const SIZE: u8 = 10;
    pub const SIZE_RESULT: u8 = 11;
    pub const GENERAL_RESULT: u8 = 12;
}

/// Default transport deadlines. The protocol has no heartbeat, so a
/// stalled peer would otherwise block a handler forever.
pub mod timeouts {
    pub const CONNECT_MS: u64 = 5_000;
    pub const READ_MS: u64 = 30_000;
    pub const WRITE_MS: u64 = 30_000;
}

const BODY_LOGIN: usize = 12;
const BODY_CHALLENGE: usize = SHARED_SECRET_LEN + CHALLENGE_LEN;
const BODY_ANSWER: usize = MAC_LEN;
const BODY_RESULT: usize = 1;
const BODY_WRITE: usize = 8;
const BODY_READ: usize = 8;
const BODY_READ_RESULT: usize = 4;
const BODY_PATH: usize = 4;
const BODY_SIZE_RESULT: usize = 8;

/// Fixed (non-trailing) portion of every packet, tagged by command.
///
/// Trailing buffers (filename, file content) travel separately so callers
/// can stream them; the fixed part only declares their lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Unauthenticated: no session key exists yet.
    Login { user_id: u64, app_id: u32 },
    /// Server to client, unauthenticated for the same reason.
    AuthChallenge {
        shared: [u8; SHARED_SECRET_LEN],
        challenge: [u8; CHALLENGE_LEN],
    },
    AuthAnswer { answer: [u8; MAC_LEN] },
    AuthResult { success: bool },
    /// Trailing: name, then content.
    FileWrite { name_len: u32, content_len: u32 },
    FileWriteResult { success: bool },
    /// Trailing: name.
    FileRead { max_read: u32, name_len: u32 },
    /// Trailing: content, streamed by the receiver.
    FileReadResult { read_len: u32 },
    /// EXISTS, DELETE, or SIZE; trailing: name.
    PathRequest { command: u8, name_len: u32 },
    GeneralResult { success: bool },
    FileSizeResult { size: u64 },
}

impl Packet {
    pub fn command(&self) -> u8 {
        match self {
            Packet::Login { .. } => cmd::LOGIN,
            Packet::AuthChallenge { .. } | Packet::AuthAnswer { .. } => cmd::AUTH,
            Packet::AuthResult { .. } => cmd::AUTH_RESULT,
            Packet::FileWrite { .. } => cmd::WRITE,
            Packet::FileWriteResult { .. } => cmd::WRITE_RESULT,
            Packet::FileRead { .. } => cmd::READ,
            Packet::FileReadResult { .. } => cmd::READ_RESULT,
            Packet::PathRequest { command, .. } => *command,
            Packet::GeneralResult { .. } => cmd::GENERAL_RESULT,
            Packet::FileSizeResult { .. } => cmd::SIZE_RESULT,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::Login { .. } => BODY_LOGIN,
            Packet::AuthChallenge { .. } => BODY_CHALLENGE,
            Packet::AuthAnswer { .. } => BODY_ANSWER,
            Packet::AuthResult { .. }
            | Packet::FileWriteResult { .. }
            | Packet::GeneralResult { .. } => BODY_RESULT,
            Packet::FileWrite { .. } => BODY_WRITE,
            Packet::FileRead { .. } => BODY_READ,
            Packet::FileReadResult { .. } => BODY_READ_RESULT,
            Packet::PathRequest { .. } => BODY_PATH,
            Packet::FileSizeResult { .. } => BODY_SIZE_RESULT,
        }
    }

    /// Header plus fixed body; what actually gets encoded here.
    pub fn fixed_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// Declared byte count of trailing buffers following the fixed part.
    pub fn trailing_len(&self) -> usize {
        match self {
            Packet::FileWrite {
                name_len,
                content_len,
            } => *name_len as usize + *content_len as usize,
            Packet::FileRead { name_len, .. } => *name_len as usize,
            Packet::PathRequest { name_len, .. } => *name_len as usize,
            Packet::FileReadResult { read_len } => *read_len as usize,
            _ => 0,
        }
    }

    /// Exact on-wire byte count of the whole message.
    pub fn total_len(&self) -> usize {
        self.fixed_len() + self.trailing_len()
    }

    /// Serialize header and fixed body. The MAC slot is left zeroed;
    /// `auth::sign_packet` fills it in.
    pub fn encode_fixed(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.fixed_len());
        buf.push(self.command());
        buf.extend_from_slice(&(self.total_len() as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; MAC_LEN]);
        match self {
            Packet::Login { user_id, app_id } => {
                buf.extend_from_slice(&user_id.to_le_bytes());
                buf.extend_from_slice(&app_id.to_le_bytes());
            }
            Packet::AuthChallenge { shared, challenge } => {
                buf.extend_from_slice(shared);
                buf.extend_from_slice(challenge);
            }
            Packet::AuthAnswer { answer } => buf.extend_from_slice(answer),
            Packet::AuthResult { success }
            | Packet::FileWriteResult { success }
            | Packet::GeneralResult { success } => buf.push(u8::from(*success)),
            Packet::FileWrite {
                name_len,
                content_len,
            } => {
                buf.extend_from_slice(&name_len.to_le_bytes());
                buf.extend_from_slice(&content_len.to_le_bytes());
            }
            Packet::FileRead { max_read, name_len } => {
                buf.extend_from_slice(&max_read.to_le_bytes());
                buf.extend_from_slice(&name_len.to_le_bytes());
            }
            Packet::FileReadResult { read_len } => buf.extend_from_slice(&read_len.to_le_bytes()),
            Packet::PathRequest { name_len, .. } => buf.extend_from_slice(&name_len.to_le_bytes()),
            Packet::FileSizeResult { size } => buf.extend_from_slice(&size.to_le_bytes()),
        }
        debug_assert_eq!(buf.len(), self.fixed_len());
        buf
    }

    /// Parse header plus fixed body. `raw` must hold exactly the fixed
    /// part; declared trailing data is read separately by the caller.
    pub fn decode(raw: &[u8]) -> Result<Packet, NetCloudError> {
        if raw.len() < HEADER_LEN {
            return Err(malformed("truncated header"));
        }
        let command = raw[0];
        let total = rd_u32(&raw[1..5]) as usize;
        let body = &raw[HEADER_LEN..];

        let pkt = match command {
            cmd::LOGIN => {
                need(body, BODY_LOGIN)?;
                Packet::Login {
                    user_id: rd_u64(&body[..8]),
                    app_id: rd_u32(&body[8..12]),
                }
            }
            cmd::AUTH => match body.len() {
                BODY_CHALLENGE => {
                    let mut shared = [0u8; SHARED_SECRET_LEN];
                    let mut challenge = [0u8; CHALLENGE_LEN];
                    shared.copy_from_slice(&body[..SHARED_SECRET_LEN]);
                    challenge.copy_from_slice(&body[SHARED_SECRET_LEN..]);
                    Packet::AuthChallenge { shared, challenge }
                }
                BODY_ANSWER => {
                    let mut answer = [0u8; MAC_LEN];
                    answer.copy_from_slice(body);
                    Packet::AuthAnswer { answer }
                }
                n => return Err(malformed(&format!("auth packet with body of {n} bytes"))),
            },
            cmd::AUTH_RESULT => {
                need(body, BODY_RESULT)?;
                Packet::AuthResult {
                    success: body[0] == 0x01,
                }
            }
            cmd::WRITE => {
                need(body, BODY_WRITE)?;
                Packet::FileWrite {
                    name_len: rd_u32(&body[..4]),
                    content_len: rd_u32(&body[4..8]),
                }
            }
            cmd::WRITE_RESULT => {
                need(body, BODY_RESULT)?;
                Packet::FileWriteResult {
                    success: body[0] == 0x01,
                }
            }
            cmd::READ => {
                need(body, BODY_READ)?;
                Packet::FileRead {
                    max_read: rd_u32(&body[..4]),
                    name_len: rd_u32(&body[4..8]),
                }
            }
            cmd::READ_RESULT => {
                need(body, BODY_READ_RESULT)?;
                Packet::FileReadResult {
                    read_len: rd_u32(&body[..4]),
                }
            }
            cmd::EXISTS | cmd::DELETE | cmd::SIZE => {
                need(body, BODY_PATH)?;
                Packet::PathRequest {
                    command,
                    name_len: rd_u32(&body[..4]),
                }
            }
            cmd::GENERAL_RESULT => {
                need(body, BODY_RESULT)?;
                Packet::GeneralResult {
                    success: body[0] == 0x01,
                }
            }
            cmd::SIZE_RESULT => {
                need(body, BODY_SIZE_RESULT)?;
                Packet::FileSizeResult {
                    size: rd_u64(&body[..8]),
                }
            }
            other => return Err(malformed(&format!("unknown command {other}"))),
        };

        // Declared lengths must be bounded before anyone allocates for them
        match &pkt {
            Packet::FileWrite {
                name_len,
                content_len,
            } => {
                check_name_len(*name_len)?;
                if *content_len as usize > MAX_CONTENT_LEN {
                    return Err(malformed(&format!("content of {content_len} bytes")));
                }
            }
            Packet::FileRead { name_len, .. } | Packet::PathRequest { name_len, .. } => {
                check_name_len(*name_len)?;
            }
            Packet::FileReadResult { read_len } => {
                if *read_len as usize > MAX_CONTENT_LEN {
                    return Err(malformed(&format!("read result of {read_len} bytes")));
                }
            }
            _ => {}
        }

        if total != pkt.total_len() {
            return Err(malformed(&format!(
                "total_length {total} does not match {} for command {}",
                pkt.total_len(),
                pkt.command()
            )));
        }
        Ok(pkt)
    }
}

fn check_name_len(name_len: u32) -> Result<(), NetCloudError> {
    if name_len == 0 || name_len as usize > MAX_NAME_LEN {
        return Err(malformed(&format!("filename of {name_len} bytes")));
    }
    Ok(())
}

fn malformed(what: &str) -> NetCloudError {
    NetCloudError::Network(format!("malformed packet: {what}"))
}

fn need(body: &[u8], n: usize) -> Result<(), NetCloudError> {
    if body.len() != n {
        return Err(malformed(&format!(
            "fixed body of {} bytes, expected {n}",
            body.len()
        )));
    }
    Ok(())
}

fn rd_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn rd_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_le_bytes(a)
}

/// Fixed body size for a command, given the header's declared total.
/// AUTH is the one command whose size depends on direction; the total
/// disambiguates, and `Packet::decode` re-validates either way.
fn fixed_body_len(command: u8, total_len: u32) -> Result<usize, NetCloudError> {
    let n = match command {
        cmd::LOGIN => BODY_LOGIN,
        cmd::AUTH => {
            if total_len as usize == HEADER_LEN + BODY_CHALLENGE {
                BODY_CHALLENGE
            } else {
                BODY_ANSWER
            }
        }
        cmd::AUTH_RESULT | cmd::WRITE_RESULT | cmd::GENERAL_RESULT => BODY_RESULT,
        cmd::WRITE => BODY_WRITE,
        cmd::READ => BODY_READ,
        cmd::READ_RESULT => BODY_READ_RESULT,
        cmd::EXISTS | cmd::DELETE | cmd::SIZE => BODY_PATH,
        cmd::SIZE_RESULT => BODY_SIZE_RESULT,
        other => return Err(malformed(&format!("unknown command {other}"))),
    };
    Ok(n)
}

/// Read one fixed packet part from the transport, or `None` if the peer
/// closed the connection before sending anything. Trailing buffers are
/// left on the wire for the caller. Returns the parsed packet together
/// with its raw fixed bytes, which MAC verification needs.
pub fn read_packet_opt(
    t: &mut dyn Transport,
) -> Result<Option<(Packet, Vec<u8>)>, NetCloudError> {
    let mut header = [0u8; HEADER_LEN];
    loop {
        match t.recv(&mut header[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    recv_exact(t, &mut header[1..])?;

    let command = header[0];
    let total = rd_u32(&header[1..5]);
    let body_len = fixed_body_len(command, total)?;

    let mut raw = vec![0u8; HEADER_LEN + body_len];
    raw[..HEADER_LEN].copy_from_slice(&header);
    recv_exact(t, &mut raw[HEADER_LEN..])?;

    let pkt = Packet::decode(&raw)?;
    Ok(Some((pkt, raw)))
}

/// Like [`read_packet_opt`], but an immediate close is a Network error.
/// The client uses this everywhere a reply is mandatory.
pub fn read_packet(t: &mut dyn Transport) -> Result<(Packet, Vec<u8>), NetCloudError> {
    read_packet_opt(t)?
        .ok_or_else(|| NetCloudError::Network("connection closed by peer".into()))
}
