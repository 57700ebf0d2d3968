//! Long-term user secrets known to the server.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub trait SecretStore: Send + Sync {
    /// Long-term secret for a user id, if the user is known.
    fn user_secret(&self, user_id: u64) -> Option<Vec<u8>>;
}

#[derive(Default)]
pub struct MemorySecrets {
    map: HashMap<u64, Vec<u8>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: u64, secret: impl Into<Vec<u8>>) {
        self.map.insert(user_id, secret.into());
    }
}

impl SecretStore for MemorySecrets {
    fn user_secret(&self, user_id: u64) -> Option<Vec<u8>> {
        self.map.get(&user_id).cloned()
    }
}

/// Flat credentials file: one `user_id:secret` per line, `#` for
/// comments. The secret is everything after the first colon, verbatim.
pub fn load_secrets_file(path: &Path) -> Result<MemorySecrets> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read secrets file {}", path.display()))?;
    let mut store = MemorySecrets::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, secret) = line
            .split_once(':')
            .with_context(|| format!("line {}: expected user_id:secret", idx + 1))?;
        let id: u64 = id
            .trim()
            .parse()
            .with_context(|| format!("line {}: bad user id", idx + 1))?;
        store.insert(id, secret.as_bytes());
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_credentials_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# test users").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "42:hunter2").unwrap();
        writeln!(f, "7:s3cret:with:colons").unwrap();
        let store = load_secrets_file(f.path()).unwrap();
        assert_eq!(store.user_secret(42).unwrap(), b"hunter2");
        assert_eq!(store.user_secret(7).unwrap(), b"s3cret:with:colons");
        assert!(store.user_secret(1).is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not a credential").unwrap();
        assert!(load_secrets_file(f.path()).is_err());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "abc:secret").unwrap();
        assert!(load_secrets_file(f.path()).is_err());
    }
}
