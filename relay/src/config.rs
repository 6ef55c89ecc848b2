//! Connection configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

/// The engine's in-memory sentinel
pub const MEMORY_DESCRIPTOR: &str = ":memory:";

/// Where the database lives
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// Ephemeral, private to the connection
    #[default]
    Memory,
    /// File path or `file:` URI
    File(PathBuf),
}

impl Storage {
    pub fn memory() -> Self { Storage::Memory }

    pub fn file(path: impl Into<PathBuf>) -> Self { Storage::File(path.into()) }

    /// Accepts the engine's own designators, `:memory:` included
    pub fn parse(descriptor: &str) -> Self {
        if descriptor == MEMORY_DESCRIPTOR || descriptor.is_empty() {
            Storage::Memory
        } else {
            Storage::File(PathBuf::from(descriptor))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Storage::Memory => None,
            Storage::File(path) => Some(path),
        }
    }
}

impl From<&str> for Storage {
    fn from(descriptor: &str) -> Self { Storage::parse(descriptor) }
}

impl std::fmt::Display for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::Memory => f.write_str(MEMORY_DESCRIPTOR),
            Storage::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Read-write, creating the file if missing
    #[default]
    Create,
}

/// Configuration for SQLite connections
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub storage: Storage,
    pub mode: OpenMode,
    /// How long a locked database is retried before failing with Busy
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    /// Rows buffered between the worker and the caller
    pub row_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self { Self { storage: Storage::Memory, mode: OpenMode::Create, busy_timeout_ms: 5000, foreign_keys: true, row_buffer: 64 } }
}

impl ConnectionConfig {
    pub fn new(storage: Storage) -> Self { Self { storage, ..Default::default() } }

    pub fn memory() -> Self { Self::new(Storage::Memory) }

    pub fn file(path: impl Into<PathBuf>) -> Self { Self::new(Storage::file(path)) }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn row_buffer(mut self, rows: usize) -> Self {
        self.row_buffer = rows;
        self
    }

    pub(crate) fn channel_capacity(&self) -> usize { self.row_buffer.max(1) }

    /// Serialized threading mode, URI filenames
    pub(crate) fn open_flags(&self) -> OpenFlags {
        let access = match self.mode {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::Create => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        access | OpenFlags::SQLITE_OPEN_FULL_MUTEX | OpenFlags::SQLITE_OPEN_URI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_sentinel() {
        assert_eq!(Storage::parse(":memory:"), Storage::Memory);
        assert_eq!(Storage::parse("/tmp/x.db"), Storage::file("/tmp/x.db"));
        assert_eq!(Storage::Memory.to_string(), ":memory:");
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: ConnectionConfig = serde_json::from_str(r#"{ "storage": { "file": "app.db" }, "busy_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.storage, Storage::file("app.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.mode, OpenMode::Create);
        assert!(config.foreign_keys);
        assert_eq!(ConnectionConfig::memory().row_buffer(0).channel_capacity(), 1);
    }

    #[test]
    fn test_read_only_flags() {
        let flags = ConnectionConfig::memory().mode(OpenMode::ReadOnly).open_flags();
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!flags.contains(OpenFlags::SQLITE_OPEN_CREATE));
        assert!(flags.contains(OpenFlags::SQLITE_OPEN_FULL_MUTEX));
    }
}
