use crate::error::{Error, Result};

/// Encryption key for SQLCipher builds
///
/// Any non-empty byte string. The key bytes are redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Vec<u8>);

impl Passphrase {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::Usage("passphrase must not be empty".into()));
        }
        Ok(Self(bytes))
    }

    #[cfg_attr(not(feature = "sqlcipher"), allow(dead_code))]
    pub(crate) fn expose(&self) -> &[u8] { &self.0 }

    /// Key a freshly opened handle
    #[cfg(feature = "sqlcipher")]
    pub(crate) fn key(&self, conn: &rusqlite::Connection) -> Result<()> { self.apply(conn, cipher::sqlite3_key) }

    /// Re-encrypt under this key
    #[cfg(feature = "sqlcipher")]
    pub(crate) fn rekey(&self, conn: &rusqlite::Connection) -> Result<()> { self.apply(conn, cipher::sqlite3_rekey) }

    #[cfg(feature = "sqlcipher")]
    fn apply(&self, conn: &rusqlite::Connection, call: cipher::KeyFn) -> Result<()> {
        use std::ffi::c_int;

        let key = self.expose();
        let len = c_int::try_from(key.len()).map_err(|_| Error::Usage(format!("passphrase of {} bytes is too long", key.len())))?;
        // SAFETY: the handle is live for the borrow and SQLCipher copies the key bytes
        unsafe {
            let db = conn.handle();
            let rc = call(db, key.as_ptr().cast(), len);
            if rc != rusqlite::ffi::SQLITE_OK {
                return Err(Error::from_handle(db, rc));
            }
        }
        Ok(())
    }
}

/// Keying entry points exported by the bundled SQLCipher build
#[cfg(feature = "sqlcipher")]
mod cipher {
    use std::ffi::{c_int, c_void};

    use rusqlite::ffi::sqlite3;

    pub(super) type KeyFn = unsafe extern "C" fn(*mut sqlite3, *const c_void, c_int) -> c_int;

    extern "C" {
        pub(super) fn sqlite3_key(db: *mut sqlite3, key: *const c_void, len: c_int) -> c_int;
        pub(super) fn sqlite3_rekey(db: *mut sqlite3, key: *const c_void, len: c_int) -> c_int;
    }
}

impl TryFrom<&str> for Passphrase {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self> { Self::new(value) }
}

impl TryFrom<&[u8]> for Passphrase {
    type Error = Error;
    fn try_from(value: &[u8]) -> Result<Self> { Self::new(value) }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Passphrase(***)") }
}
