//! Server-side file storage scoped to a (user, application) namespace.
//!
//! Each namespace gets its own directory under the storage root; a
//! request can never name a path outside it.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub user_id: u64,
    pub app_id: u32,
}

pub trait Storage: Send + Sync {
    fn write(&self, ns: &Namespace, name: &str, data: &[u8]) -> io::Result<()>;
    /// Read at most `max` bytes of the file.
    fn read(&self, ns: &Namespace, name: &str, max: usize) -> io::Result<Vec<u8>>;
    fn exists(&self, ns: &Namespace, name: &str) -> io::Result<bool>;
    /// `Ok(false)` when there was nothing to delete.
    fn delete(&self, ns: &Namespace, name: &str) -> io::Result<bool>;
    fn size(&self, ns: &Namespace, name: &str) -> io::Result<u64>;
}

/// Filesystem-backed storage rooted at `<root>/<user_id>/<app_id>/`.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a client-supplied name into the namespace directory.
    /// Rejects NUL bytes, absolute paths, and any `..` component, so the
    /// result always stays under the namespace.
    fn resolve(&self, ns: &Namespace, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains('\0') {
            return Err(bad_name(name));
        }
        let mut resolved = self
            .root
            .join(ns.user_id.to_string())
            .join(ns.app_id.to_string());
        let mut depth = 0usize;
        for component in Path::new(name).components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(bad_name(name));
                }
            }
        }
        if depth == 0 {
            return Err(bad_name(name));
        }
        Ok(resolved)
    }
}

fn bad_name(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("path {name:?} escapes the storage namespace"),
    )
}

impl Storage for FsStorage {
    fn write(&self, ns: &Namespace, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.resolve(ns, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }

    fn read(&self, ns: &Namespace, name: &str, max: usize) -> io::Result<Vec<u8>> {
        let path = self.resolve(ns, name)?;
        let file = File::open(path)?;
        let mut data = Vec::new();
        file.take(max as u64).read_to_end(&mut data)?;
        Ok(data)
    }

    fn exists(&self, ns: &Namespace, name: &str) -> io::Result<bool> {
        Ok(self.resolve(ns, name)?.is_file())
    }

    fn delete(&self, ns: &Namespace, name: &str) -> io::Result<bool> {
        let path = self.resolve(ns, name)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn size(&self, ns: &Namespace, name: &str) -> io::Result<u64> {
        let path = self.resolve(ns, name)?;
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{name:?} is not a file"),
            ));
        }
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: Namespace = Namespace {
        user_id: 42,
        app_id: 7,
    };

    fn storage() -> (tempfile::TempDir, FsStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().to_path_buf());
        (dir, storage)
    }

    #[test]
    fn write_read_round_trip() {
        let (_dir, s) = storage();
        s.write(&NS, "notes.txt", b"hello").unwrap();
        assert_eq!(s.read(&NS, "notes.txt", 1024).unwrap(), b"hello");
        assert_eq!(s.size(&NS, "notes.txt").unwrap(), 5);
        assert!(s.exists(&NS, "notes.txt").unwrap());
    }

    #[test]
    fn read_honors_max() {
        let (_dir, s) = storage();
        s.write(&NS, "big.bin", &[9u8; 100]).unwrap();
        assert_eq!(s.read(&NS, "big.bin", 10).unwrap().len(), 10);
    }

    #[test]
    fn delete_is_reported_accurately() {
        let (_dir, s) = storage();
        s.write(&NS, "doomed", b"x").unwrap();
        assert!(s.delete(&NS, "doomed").unwrap());
        assert!(!s.delete(&NS, "doomed").unwrap());
        assert!(!s.exists(&NS, "doomed").unwrap());
    }

    #[test]
    fn missing_files_are_absent_not_errors() {
        let (_dir, s) = storage();
        assert!(!s.exists(&NS, "missing.txt").unwrap());
        assert!(s.read(&NS, "missing.txt", 10).is_err());
        assert!(s.size(&NS, "missing.txt").is_err());
    }

    #[test]
    fn namespaces_are_isolated() {
        let (_dir, s) = storage();
        let other = Namespace {
            user_id: 42,
            app_id: 8,
        };
        s.write(&NS, "mine.txt", b"a").unwrap();
        assert!(!s.exists(&other, "mine.txt").unwrap());
    }

    #[test]
    fn traversal_is_rejected() {
        let (_dir, s) = storage();
        for name in ["../escape", "a/../../escape", "/etc/passwd", "", ".", "nul\0byte"] {
            assert!(s.write(&NS, name, b"x").is_err(), "accepted {name:?}");
            assert!(s.exists(&NS, name).is_err());
        }
    }

    #[test]
    fn subdirectories_are_created_on_write() {
        let (_dir, s) = storage();
        s.write(&NS, "saves/slot1/world.dat", b"data").unwrap();
        assert!(s.exists(&NS, "saves/slot1/world.dat").unwrap());
    }
}
