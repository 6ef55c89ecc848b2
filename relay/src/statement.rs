//! Prepared statement driver over the raw sqlite3 statement API

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::slice;
use std::sync::Arc;

use rusqlite::ffi;
use tracing::trace;

use crate::error::{last_message, Error, Reason, Result};
use crate::row::{Columns, Row};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Prepared, possibly bound, not stepped yet
    Prepared,
    /// At least one step returned a row
    Stepping,
    /// Exhausted and finalized
    Done,
    /// A step failed; finalized
    Errored,
}

/// One exclusively owned native statement
///
/// The handle is finalized exactly once: on exhaustion, on a step error, by [`Statement::finalize`], or on drop.
pub struct Statement<'conn> {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    columns: Arc<Columns>,
    state: StatementState,
    finalize_calls: u32,
    _conn: PhantomData<&'conn rusqlite::Connection>,
}

impl<'conn> Statement<'conn> {
    /// Prepare the first statement in `sql`
    ///
    /// Authorizer observers fire during this call.
    pub fn prepare(conn: &'conn rusqlite::Connection, sql: &str) -> Result<Self> {
        // SAFETY: the handle stays valid for 'conn, which bounds this statement
        let db = unsafe { conn.handle() };
        let c_sql = CString::new(sql)?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut raw, ptr::null_mut()) };
        if rc != ffi::SQLITE_OK {
            let err = unsafe { Error::from_handle(db, rc) };
            unsafe { ffi::sqlite3_finalize(raw) };
            return Err(err);
        }
        trace!("prepared: {}", sql);

        let columns = Arc::new(Columns::new(column_names(raw)));
        // Whitespace or comment-only SQL yields no statement at all
        let state = if raw.is_null() { StatementState::Done } else { StatementState::Prepared };
        Ok(Self { raw, db, columns, state, finalize_calls: 0, _conn: PhantomData })
    }

    pub fn state(&self) -> StatementState { self.state }

    pub fn columns(&self) -> Arc<Columns> { self.columns.clone() }

    pub fn is_finalized(&self) -> bool { self.raw.is_null() }

    /// Number of native finalize calls made so far (0 or 1)
    pub fn finalize_calls(&self) -> u32 { self.finalize_calls }

    pub fn parameter_count(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        unsafe { ffi::sqlite3_bind_parameter_count(self.raw) as usize }
    }

    /// Bind positionally; the first value goes to `?1`
    ///
    /// Text and blob bytes are copied into the engine (SQLITE_TRANSIENT).
    pub fn bind(&mut self, values: &[Value]) -> Result<()> {
        if self.raw.is_null() && self.finalize_calls == 0 {
            // Empty SQL: nothing to bind to
            if values.is_empty() {
                return Ok(());
            }
            return Err(Error::sqlite(Reason::Range, format!("{} bind values for a statement with no parameters", values.len())));
        }
        if self.state != StatementState::Prepared {
            return Err(Error::Usage("bind after the statement started stepping".into()));
        }
        for (i, value) in values.iter().enumerate() {
            self.bind_value(i as c_int + 1, value)?;
        }
        Ok(())
    }

    fn bind_value(&mut self, index: c_int, value: &Value) -> Result<()> {
        let rc = unsafe {
            match value {
                Value::Integer(i) => ffi::sqlite3_bind_int64(self.raw, index, *i),
                Value::Real(f) => ffi::sqlite3_bind_double(self.raw, index, *f),
                Value::Text(s) => {
                    let len = byte_len(s.as_bytes())?;
                    ffi::sqlite3_bind_text(self.raw, index, s.as_ptr().cast::<c_char>(), len, ffi::SQLITE_TRANSIENT())
                }
                Value::Blob(b) if b.is_empty() => ffi::sqlite3_bind_zeroblob(self.raw, index, 0),
                Value::Blob(b) => {
                    let len = byte_len(b)?;
                    ffi::sqlite3_bind_blob(self.raw, index, b.as_ptr().cast::<c_void>(), len, ffi::SQLITE_TRANSIENT())
                }
                Value::Null => ffi::sqlite3_bind_null(self.raw, index),
            }
        };
        self.check(rc)
    }

    /// Advance one step
    ///
    /// Returns `Ok(None)` once exhausted, and keeps returning it afterwards.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.raw.is_null() {
            self.state = match self.state {
                StatementState::Errored => StatementState::Errored,
                _ => StatementState::Done,
            };
            return Ok(None);
        }

        let rc = unsafe { ffi::sqlite3_step(self.raw) };
        match rc {
            ffi::SQLITE_ROW => {
                self.state = StatementState::Stepping;
                Ok(Some(self.read_row()))
            }
            ffi::SQLITE_DONE => {
                self.finalize_handle();
                self.state = StatementState::Done;
                Ok(None)
            }
            _ => {
                // Capture the message before finalize resets it
                let err = unsafe { Error::from_handle(self.db, rc) };
                self.finalize_handle();
                self.state = StatementState::Errored;
                Err(err)
            }
        }
    }

    /// Run to completion, discarding rows
    pub fn run(&mut self) -> Result<()> {
        while self.next_row()?.is_some() {}
        Ok(())
    }

    /// Explicit early termination
    pub fn finalize(&mut self) {
        if !self.raw.is_null() && self.state != StatementState::Errored {
            self.state = StatementState::Done;
        }
        self.finalize_handle();
    }

    fn finalize_handle(&mut self) {
        if self.raw.is_null() {
            return;
        }
        unsafe { ffi::sqlite3_finalize(self.raw) };
        self.raw = ptr::null_mut();
        self.finalize_calls += 1;
    }

    fn read_row(&self) -> Row {
        let values = (0..self.columns.len() as c_int).map(|i| self.column_value(i)).collect();
        Row::new(self.columns.clone(), values)
    }

    fn column_value(&self, index: c_int) -> Value {
        unsafe {
            match ffi::sqlite3_column_type(self.raw, index) {
                ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(self.raw, index)),
                ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(self.raw, index)),
                ffi::SQLITE_TEXT => {
                    let data = ffi::sqlite3_column_text(self.raw, index);
                    let size = ffi::sqlite3_column_bytes(self.raw, index);
                    Value::from_text_bytes(copy_bytes(data.cast::<u8>(), size))
                }
                ffi::SQLITE_BLOB => {
                    let data = ffi::sqlite3_column_blob(self.raw, index);
                    let size = ffi::sqlite3_column_bytes(self.raw, index);
                    Value::Blob(copy_bytes(data.cast::<u8>(), size).to_vec())
                }
                _ => Value::Null,
            }
        }
    }

    fn check(&self, rc: c_int) -> Result<()> {
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        Err(Error::from_code(rc, unsafe { last_message(self.db, rc) }))
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) { self.finalize_handle(); }
}

fn column_names(raw: *mut ffi::sqlite3_stmt) -> Vec<String> {
    if raw.is_null() {
        return Vec::new();
    }
    let count = unsafe { ffi::sqlite3_column_count(raw) };
    (0..count)
        .map(|i| {
            let name = unsafe { ffi::sqlite3_column_name(raw, i) };
            if name.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
            }
        })
        .collect()
}

/// Borrow `size` bytes of engine memory; the caller copies before the next step
pub(crate) unsafe fn copy_bytes<'a>(data: *const u8, size: c_int) -> &'a [u8] {
    if data.is_null() || size <= 0 {
        return &[];
    }
    slice::from_raw_parts(data, size as usize)
}

fn byte_len(bytes: &[u8]) -> Result<c_int> {
    c_int::try_from(bytes.len()).map_err(|_| Error::sqlite(Reason::TooBig, format!("{} bytes exceed the bind limit", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        unsafe { ffi::sqlite3_extended_result_codes(conn.handle(), 1) };
        conn
    }

    #[test]
    fn test_finalizes_once_on_exhaustion() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT 1 AS a UNION ALL SELECT 2").unwrap();
        assert_eq!(stmt.columns().iter().collect::<Vec<_>>(), vec![("a", 0)]);
        assert_eq!(stmt.next_row().unwrap().unwrap().get("a"), Some(&Value::Integer(1)));
        assert_eq!(stmt.state(), StatementState::Stepping);
        assert!(stmt.next_row().unwrap().is_some());
        assert!(stmt.next_row().unwrap().is_none());
        assert!(stmt.next_row().unwrap().is_none());
        stmt.finalize();
        assert_eq!(stmt.state(), StatementState::Done);
        assert_eq!(stmt.finalize_calls(), 1);
    }

    #[test]
    fn test_finalizes_once_on_error() {
        let conn = conn();
        conn.execute_batch("CREATE TABLE t(v INTEGER NOT NULL)").unwrap();
        let mut stmt = Statement::prepare(&conn, "INSERT INTO t(v) VALUES (?)").unwrap();
        stmt.bind(&[Value::Null]).unwrap();
        let err = stmt.next_row().unwrap_err();
        assert_eq!(err.reason(), Reason::ConstraintNotNull);
        assert_eq!(stmt.state(), StatementState::Errored);
        assert!(stmt.next_row().unwrap().is_none());
        assert_eq!(stmt.state(), StatementState::Errored);
        assert_eq!(stmt.finalize_calls(), 1);
    }

    #[test]
    fn test_early_termination() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT 1 UNION ALL SELECT 2").unwrap();
        assert!(stmt.next_row().unwrap().is_some());
        stmt.finalize();
        stmt.finalize();
        assert!(stmt.is_finalized());
        assert_eq!(stmt.finalize_calls(), 1);
        assert!(stmt.next_row().unwrap().is_none());
    }

    #[test]
    fn test_prepare_error() {
        let conn = conn();
        let err = Statement::prepare(&conn, "SELEKT 1").err().unwrap();
        assert_eq!(err.reason(), Reason::Error);
        assert!(err.message().contains("syntax error"));
        let err = Statement::prepare(&conn, "SELECT * FROM missing").err().unwrap();
        assert!(err.message().contains("no such table"));
    }

    #[test]
    fn test_bind_copies_and_reads_back() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT ?, ?, ?, ?, ?").unwrap();
        let values = vec![Value::Integer(-7), Value::Real(1.5), Value::Text("héllo".into()), Value::Blob(vec![0, 1, 2]), Value::Null];
        {
            let copy = values.clone();
            stmt.bind(&copy).unwrap();
        }
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.into_values(), values);
    }

    #[test]
    fn test_bind_out_of_range() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT ?").unwrap();
        let err = stmt.bind(&[Value::Integer(1), Value::Integer(2)]).unwrap_err();
        assert_eq!(err.reason(), Reason::Range);
    }

    #[test]
    fn test_bind_after_finalize_is_refused() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT ?").unwrap();
        stmt.bind(&[Value::Integer(1)]).unwrap();
        stmt.run().unwrap();
        assert_eq!(stmt.bind(&[Value::Integer(2)]).unwrap_err().reason(), Reason::Usage);
    }

    #[test]
    fn test_non_utf8_text_column_reads_as_blob() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "SELECT CAST(x'ff41' AS TEXT) AS t, typeof(CAST(x'ff41' AS TEXT)) AS k").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.get("k"), Some(&Value::Text("text".into())));
        assert_eq!(row.get("t"), Some(&Value::Blob(vec![0xff, 0x41])));
    }

    #[test]
    fn test_empty_sql() {
        let conn = conn();
        let mut stmt = Statement::prepare(&conn, "  -- nothing").unwrap();
        assert!(stmt.columns().is_empty());
        assert_eq!(stmt.parameter_count(), 0);
        stmt.bind(&[]).unwrap();
        assert_eq!(stmt.bind(&[Value::Integer(1)]).unwrap_err().reason(), Reason::Range);
        assert!(stmt.next_row().unwrap().is_none());
        assert_eq!(stmt.finalize_calls(), 0);
    }
}
