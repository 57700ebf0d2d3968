//! Best-effort diagnostic sink. Never load-bearing: implementations must
//! not fail the operation they are reporting on.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;

pub trait Logger: Send + Sync {
    fn event(&self, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Mirrors diagnostics to stderr; what the daemon uses in the foreground.
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn event(&self, msg: &str) {
        eprintln!("{msg}");
    }
    fn error(&self, context: &str, msg: &str) {
        eprintln!("error: {context}: {msg}");
    }
}

/// Appends timestamped lines to a text file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn event(&self, msg: &str) {
        self.line(msg);
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nc.log");
        let log = TextLogger::new(&path).unwrap();
        log.event("session opened");
        log.error("write", "disk full");
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("session opened"));
        assert!(lines[1].contains("ERROR ctx=write"));
    }
}
