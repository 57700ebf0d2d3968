//! Packet authentication: session key derivation, HMAC-SHA256 signing,
//! and constant-time verification.
//!
//! The MAC always covers the canonical packet bytes with the header's MAC
//! slot treated as zero, followed by each trailing buffer in declared
//! order. Verification never mutates the received packet; it feeds the
//! same canonical byte sequence into a fresh HMAC instead.

use std::fmt;
use std::sync::OnceLock;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::NetCloudError;
use crate::protocol::{MAC_LEN, MAC_OFFSET, SHARED_SECRET_LEN};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_KEY_LEN: usize = 32;

/// Symmetric key derived once per session during the handshake.
/// Immutable for the life of the session; wiped on drop; never printed.
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex prefix for diagnostics. The full key never leaves this
    /// type.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}..)", self.fingerprint())
    }
}

// RFC 4231 test case 2: HMAC-SHA256("Jefe", "what do ya want for nothing?")
const KAT_TAG: [u8; 32] = [
    0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75,
    0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec,
    0x38, 0x43,
];

/// One-time library initialization: an HMAC-SHA256 known-answer self-test.
/// Call before creating any session; idempotent and cheap after the first
/// call.
pub fn init() -> Result<(), NetCloudError> {
    static SELF_TEST: OnceLock<bool> = OnceLock::new();
    let ok = *SELF_TEST.get_or_init(|| {
        let tag = hmac_raw(b"Jefe", b"what do ya want for nothing?");
        bool::from(tag.ct_eq(&KAT_TAG))
    });
    if ok {
        Ok(())
    } else {
        Err(NetCloudError::SelfTest)
    }
}

fn mac_keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take a key of any size")
}

fn hmac_raw(key: &[u8], message: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = mac_keyed(key);
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Derive the per-session key: HMAC-SHA256 keyed with the user's
/// long-term secret over the server-supplied 64-byte shared secret.
/// Deterministic by construction; both peers arrive at the same key.
pub fn derive_session_key(user_secret: &[u8], shared: &[u8; SHARED_SECRET_LEN]) -> SessionKey {
    SessionKey(hmac_raw(user_secret, shared))
}

/// MAC over arbitrary bytes under the session key. Used for the
/// challenge answer during the handshake.
pub fn sign_bytes(data: &[u8], key: &SessionKey) -> [u8; MAC_LEN] {
    hmac_raw(key.as_bytes(), data)
}

/// Constant-time tag comparison.
pub fn macs_equal(a: &[u8; MAC_LEN], b: &[u8; MAC_LEN]) -> bool {
    bool::from(a.ct_eq(b))
}

fn compute_packet_mac(fixed: &[u8], trailing: &[&[u8]], key: &SessionKey) -> [u8; MAC_LEN] {
    debug_assert!(fixed.len() >= MAC_OFFSET + MAC_LEN);
    let mut mac = mac_keyed(key.as_bytes());
    mac.update(&fixed[..MAC_OFFSET]);
    mac.update(&[0u8; MAC_LEN]);
    mac.update(&fixed[MAC_OFFSET + MAC_LEN..]);
    for part in trailing {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Sign an encoded packet in place: compute the tag over header+body with
/// a zeroed MAC slot, then each trailing buffer in declared order, and
/// write the result into the slot.
pub fn sign_packet(fixed: &mut [u8], trailing: &[&[u8]], key: &SessionKey) {
    let tag = compute_packet_mac(fixed, trailing, key);
    fixed[MAC_OFFSET..MAC_OFFSET + MAC_LEN].copy_from_slice(&tag);
}

/// Verify a received packet. The input is never modified; the comparison
/// is constant-time. On `false` the caller must not trust any field.
pub fn verify_packet(raw: &[u8], trailing: &[&[u8]], key: &SessionKey) -> bool {
    if raw.len() < MAC_OFFSET + MAC_LEN {
        return false;
    }
    let expected = compute_packet_mac(raw, trailing, key);
    let mut received = [0u8; MAC_LEN];
    received.copy_from_slice(&raw[MAC_OFFSET..MAC_OFFSET + MAC_LEN]);
    macs_equal(&expected, &received)
}

/// Running MAC for a packet whose trailing payload arrives in chunks,
/// e.g. a file read result streamed straight into the caller's buffer.
/// Seeded with the fixed part (MAC slot as zero); fold in each chunk as
/// it lands; finish with [`ReadMac::verify`].
pub struct ReadMac {
    mac: HmacSha256,
}

impl ReadMac {
    pub fn new(fixed: &[u8], key: &SessionKey) -> Self {
        let mut mac = mac_keyed(key.as_bytes());
        mac.update(&fixed[..MAC_OFFSET]);
        mac.update(&[0u8; MAC_LEN]);
        mac.update(&fixed[MAC_OFFSET + MAC_LEN..]);
        Self { mac }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.mac.update(chunk);
    }

    /// Finalize and compare against the MAC carried in the packet header.
    pub fn verify(self, received: &[u8; MAC_LEN]) -> bool {
        let tag: [u8; MAC_LEN] = self.mac.finalize().into_bytes().into();
        macs_equal(&tag, received)
    }
}
