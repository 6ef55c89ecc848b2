//! Error types for the SQLite relay

use std::ffi::{c_int, CStr};

use rusqlite::ffi;
use thiserror::Error;

use crate::value::ValueType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{reason}: {message}")]
    Sqlite { reason: Reason, message: String },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Cannot convert {found} value to {expected}")]
    Conversion { expected: &'static str, found: ValueType },

    #[error("Column {0:?} not found")]
    ColumnNotFound(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    pub fn sqlite(reason: Reason, message: impl Into<String>) -> Self { Error::Sqlite { reason, message: message.into() } }

    /// Build an error from a native result code and the connection's last error message
    pub(crate) fn from_code(code: c_int, message: impl Into<String>) -> Self { Self::sqlite(Reason::from_code(code), message) }

    /// Read `sqlite3_errmsg` for `db` and pair it with `code`
    ///
    /// # Safety
    /// `db` must be a live connection handle (or null).
    pub(crate) unsafe fn from_handle(db: *mut ffi::sqlite3, code: c_int) -> Self { Self::from_code(code, last_message(db, code)) }

    pub fn reason(&self) -> Reason {
        match self {
            Error::Sqlite { reason, .. } => *reason,
            Error::ConnectionClosed => Reason::Connection,
            Error::Conversion { .. } | Error::ColumnNotFound(_) => Reason::Conversion,
            Error::Usage(_) => Reason::Usage,
            Error::TaskJoin(_) => Reason::Connection,
        }
    }

    /// The message without the reason prefix
    pub fn message(&self) -> String {
        match self {
            Error::Sqlite { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// # Safety
/// `db` must be a live connection handle (or null).
pub(crate) unsafe fn last_message(db: *mut ffi::sqlite3, code: c_int) -> String {
    let ptr = if db.is_null() { ffi::sqlite3_errstr(code) } else { ffi::sqlite3_errmsg(db) };
    if ptr.is_null() {
        return Reason::from_code(code).to_string();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let reason = Reason::from_code(failure.extended_code);
                Error::Sqlite { reason, message: message.unwrap_or_else(|| failure.to_string()) }
            }
            rusqlite::Error::InvalidPath(path) => Error::sqlite(Reason::CantOpen, format!("invalid path {}", path.display())),
            rusqlite::Error::NulError(e) => Error::Usage(e.to_string()),
            rusqlite::Error::UserFunctionError(e) => Error::sqlite(Reason::Error, e.to_string()),
            other => Error::sqlite(Reason::Error, other.to_string()),
        }
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(err: std::ffi::NulError) -> Self { Error::Usage(format!("interior NUL byte at offset {}", err.nul_position())) }
}

const fn ext(base: c_int, n: c_int) -> c_int { base | (n << 8) }

macro_rules! reasons {
    (
        native { $($native:ident = $code:expr => $desc:literal,)* }
        driver { $($driver:ident => $ddesc:literal,)* }
    ) => {
        /// Closed set of failure reasons
        ///
        /// Native variants mirror SQLite's basic and extended result codes. Driver variants are raised by
        /// this crate and have no native code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum Reason {
            $($native,)*
            $($driver,)*
        }

        impl Reason {
            /// Map a (possibly extended) native result code
            pub fn from_code(code: c_int) -> Reason {
                $(if code == $code { return Reason::$native; })*
                let basic = code & 0xff;
                if basic != code {
                    return Reason::from_code(basic);
                }
                Reason::Error
            }

            /// The native result code, or None for driver-internal reasons
            pub fn code(&self) -> Option<c_int> {
                match self {
                    $(Reason::$native => Some($code),)*
                    $(Reason::$driver => None,)*
                }
            }

            fn description(&self) -> &'static str {
                match self {
                    $(Reason::$native => $desc,)*
                    $(Reason::$driver => $ddesc,)*
                }
            }
        }
    };
}

reasons! {
    native {
        Error = ffi::SQLITE_ERROR => "SQL logic error",
        Internal = ffi::SQLITE_INTERNAL => "internal logic error",
        Permission = ffi::SQLITE_PERM => "access permission denied",
        Abort = ffi::SQLITE_ABORT => "query aborted",
        Busy = ffi::SQLITE_BUSY => "database is locked",
        Locked = ffi::SQLITE_LOCKED => "database table is locked",
        NoMemory = ffi::SQLITE_NOMEM => "out of memory",
        ReadOnly = ffi::SQLITE_READONLY => "attempt to write a readonly database",
        Interrupt = ffi::SQLITE_INTERRUPT => "interrupted",
        IoError = ffi::SQLITE_IOERR => "disk I/O error",
        Corrupt = ffi::SQLITE_CORRUPT => "database disk image is malformed",
        NotFound = ffi::SQLITE_NOTFOUND => "unknown operation",
        Full = ffi::SQLITE_FULL => "database or disk is full",
        CantOpen = ffi::SQLITE_CANTOPEN => "unable to open database file",
        Protocol = ffi::SQLITE_PROTOCOL => "locking protocol",
        Empty = ffi::SQLITE_EMPTY => "empty",
        Schema = ffi::SQLITE_SCHEMA => "database schema has changed",
        TooBig = ffi::SQLITE_TOOBIG => "string or blob too big",
        Constraint = ffi::SQLITE_CONSTRAINT => "constraint failed",
        Mismatch = ffi::SQLITE_MISMATCH => "datatype mismatch",
        Misuse = ffi::SQLITE_MISUSE => "bad parameter or other API misuse",
        NoLargeFileSupport = ffi::SQLITE_NOLFS => "large file support is disabled",
        Auth = ffi::SQLITE_AUTH => "authorization denied",
        Format = ffi::SQLITE_FORMAT => "auxiliary database format error",
        Range = ffi::SQLITE_RANGE => "column index out of range",
        NotADatabase = ffi::SQLITE_NOTADB => "file is not a database",
        Notice = ffi::SQLITE_NOTICE => "notification message",
        Warning = ffi::SQLITE_WARNING => "warning message",

        ErrorMissingCollationSequence = ext(ffi::SQLITE_ERROR, 1) => "error: missing collating sequence",
        ErrorRetry = ext(ffi::SQLITE_ERROR, 2) => "error: retry",
        ErrorSnapshot = ext(ffi::SQLITE_ERROR, 3) => "error: snapshot",

        IoErrorRead = ext(ffi::SQLITE_IOERR, 1) => "I/O error: read",
        IoErrorShortRead = ext(ffi::SQLITE_IOERR, 2) => "I/O error: short read",
        IoErrorWrite = ext(ffi::SQLITE_IOERR, 3) => "I/O error: write",
        IoErrorFsync = ext(ffi::SQLITE_IOERR, 4) => "I/O error: fsync",
        IoErrorDirectoryFsync = ext(ffi::SQLITE_IOERR, 5) => "I/O error: directory fsync",
        IoErrorTruncate = ext(ffi::SQLITE_IOERR, 6) => "I/O error: truncate",
        IoErrorFstat = ext(ffi::SQLITE_IOERR, 7) => "I/O error: fstat",
        IoErrorUnlock = ext(ffi::SQLITE_IOERR, 8) => "I/O error: unlock",
        IoErrorReadLock = ext(ffi::SQLITE_IOERR, 9) => "I/O error: read lock",
        IoErrorDelete = ext(ffi::SQLITE_IOERR, 10) => "I/O error: delete",
        IoErrorBlocked = ext(ffi::SQLITE_IOERR, 11) => "I/O error: blocked",
        IoErrorNoMemory = ext(ffi::SQLITE_IOERR, 12) => "I/O error: out of memory",
        IoErrorAccess = ext(ffi::SQLITE_IOERR, 13) => "I/O error: access",
        IoErrorCheckReservedLock = ext(ffi::SQLITE_IOERR, 14) => "I/O error: check reserved lock",
        IoErrorLock = ext(ffi::SQLITE_IOERR, 15) => "I/O error: lock",
        IoErrorClose = ext(ffi::SQLITE_IOERR, 16) => "I/O error: close",
        IoErrorDirectoryClose = ext(ffi::SQLITE_IOERR, 17) => "I/O error: directory close",
        IoErrorShmOpen = ext(ffi::SQLITE_IOERR, 18) => "I/O error: shared memory open",
        IoErrorShmSize = ext(ffi::SQLITE_IOERR, 19) => "I/O error: shared memory size",
        IoErrorShmLock = ext(ffi::SQLITE_IOERR, 20) => "I/O error: shared memory lock",
        IoErrorShmMap = ext(ffi::SQLITE_IOERR, 21) => "I/O error: shared memory map",
        IoErrorSeek = ext(ffi::SQLITE_IOERR, 22) => "I/O error: seek",
        IoErrorDeleteNoEntry = ext(ffi::SQLITE_IOERR, 23) => "I/O error: delete, no entry",
        IoErrorMmap = ext(ffi::SQLITE_IOERR, 24) => "I/O error: mmap",
        IoErrorGetTempPath = ext(ffi::SQLITE_IOERR, 25) => "I/O error: temporary path",
        IoErrorConvertPath = ext(ffi::SQLITE_IOERR, 26) => "I/O error: path conversion",
        IoErrorVnode = ext(ffi::SQLITE_IOERR, 27) => "I/O error: vnode",
        IoErrorAuth = ext(ffi::SQLITE_IOERR, 28) => "I/O error: auth",
        IoErrorBeginAtomic = ext(ffi::SQLITE_IOERR, 29) => "I/O error: begin atomic",
        IoErrorCommitAtomic = ext(ffi::SQLITE_IOERR, 30) => "I/O error: commit atomic",
        IoErrorRollbackAtomic = ext(ffi::SQLITE_IOERR, 31) => "I/O error: rollback atomic",
        IoErrorData = ext(ffi::SQLITE_IOERR, 32) => "I/O error: data checksum",
        IoErrorCorruptFilesystem = ext(ffi::SQLITE_IOERR, 33) => "I/O error: corrupt filesystem",

        LockedSharedCache = ext(ffi::SQLITE_LOCKED, 1) => "locked: shared cache",
        LockedVirtualTable = ext(ffi::SQLITE_LOCKED, 2) => "locked: virtual table",

        BusyRecovery = ext(ffi::SQLITE_BUSY, 1) => "busy: recovery",
        BusySnapshot = ext(ffi::SQLITE_BUSY, 2) => "busy: snapshot",
        BusyTimeout = ext(ffi::SQLITE_BUSY, 3) => "busy: timeout",

        CantOpenNoTempDirectory = ext(ffi::SQLITE_CANTOPEN, 1) => "cannot open: no temporary directory",
        CantOpenIsDirectory = ext(ffi::SQLITE_CANTOPEN, 2) => "cannot open: is a directory",
        CantOpenFullPath = ext(ffi::SQLITE_CANTOPEN, 3) => "cannot open: full path",
        CantOpenConvertPath = ext(ffi::SQLITE_CANTOPEN, 4) => "cannot open: path conversion",
        CantOpenSymlink = ext(ffi::SQLITE_CANTOPEN, 6) => "cannot open: symbolic link",

        CorruptVirtualTable = ext(ffi::SQLITE_CORRUPT, 1) => "corrupt: virtual table",
        CorruptSequence = ext(ffi::SQLITE_CORRUPT, 2) => "corrupt: sequence",
        CorruptIndex = ext(ffi::SQLITE_CORRUPT, 3) => "corrupt: index",

        ReadOnlyRecovery = ext(ffi::SQLITE_READONLY, 1) => "readonly: recovery",
        ReadOnlyCantLock = ext(ffi::SQLITE_READONLY, 2) => "readonly: cannot lock",
        ReadOnlyRollback = ext(ffi::SQLITE_READONLY, 3) => "readonly: rollback",
        ReadOnlyDatabaseMoved = ext(ffi::SQLITE_READONLY, 4) => "readonly: database moved",
        ReadOnlyCantInit = ext(ffi::SQLITE_READONLY, 5) => "readonly: cannot initialize",
        ReadOnlyDirectory = ext(ffi::SQLITE_READONLY, 6) => "readonly: directory",

        AbortRollback = ext(ffi::SQLITE_ABORT, 2) => "abort: rollback",

        ConstraintCheck = ext(ffi::SQLITE_CONSTRAINT, 1) => "constraint: CHECK failed",
        ConstraintCommitHook = ext(ffi::SQLITE_CONSTRAINT, 2) => "constraint: commit hook vetoed",
        ConstraintForeignKey = ext(ffi::SQLITE_CONSTRAINT, 3) => "constraint: FOREIGN KEY failed",
        ConstraintFunction = ext(ffi::SQLITE_CONSTRAINT, 4) => "constraint: function",
        ConstraintNotNull = ext(ffi::SQLITE_CONSTRAINT, 5) => "constraint: NOT NULL failed",
        ConstraintPrimaryKey = ext(ffi::SQLITE_CONSTRAINT, 6) => "constraint: PRIMARY KEY failed",
        ConstraintTrigger = ext(ffi::SQLITE_CONSTRAINT, 7) => "constraint: trigger",
        ConstraintUnique = ext(ffi::SQLITE_CONSTRAINT, 8) => "constraint: UNIQUE failed",
        ConstraintVirtualTable = ext(ffi::SQLITE_CONSTRAINT, 9) => "constraint: virtual table",
        ConstraintRowId = ext(ffi::SQLITE_CONSTRAINT, 10) => "constraint: rowid",
        ConstraintPinned = ext(ffi::SQLITE_CONSTRAINT, 11) => "constraint: pinned",
        ConstraintDataType = ext(ffi::SQLITE_CONSTRAINT, 12) => "constraint: datatype",

        NoticeRecoverWal = ext(ffi::SQLITE_NOTICE, 1) => "notice: recovered WAL",
        NoticeRecoverRollback = ext(ffi::SQLITE_NOTICE, 2) => "notice: recovered rollback journal",
        WarningAutoIndex = ext(ffi::SQLITE_WARNING, 1) => "warning: automatic index",
        AuthUser = ext(ffi::SQLITE_AUTH, 1) => "authorization denied: user",
    }
    driver {
        Connection => "connection error",
        Close => "close error",
        Prepare => "prepare error",
        Bind => "bind error",
        Execute => "execute error",
        Conversion => "conversion error",
        Usage => "usage error",
    }
}

impl Reason {
    /// True for SQLITE_CONSTRAINT and all of its extended codes
    pub fn is_constraint(&self) -> bool { self.code().is_some_and(|c| c & 0xff == ffi::SQLITE_CONSTRAINT) }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.description()) }
}
