//! Non-blocking connection over one native SQLite handle
//!
//! Every native call runs on the execution context's blocking pool while holding the connection
//! mutex, so one logical operation owns the handle for its whole native call sequence. Rows are
//! streamed back over a bounded channel and handed to the caller's callback in the caller's task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::ffi;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::{ConnectionConfig, Storage};
use crate::context::{join, ExecutionContext};
use crate::error::{Error, Reason, Result};
use crate::function::CustomFunction;
use crate::hooks::registry::HookState;
use crate::hooks::{
    native, Authorization, AuthorizerEvent, CommitDecision, CommitEvent, HookToken, Hooks, Observer, ObserverId, RollbackEvent, UpdateEvent,
};
#[cfg(feature = "sqlcipher")]
use crate::passphrase::Passphrase;
use crate::row::Row;
use crate::statement::Statement;
use crate::value::Value;

/// The native handle plus the registry its trampolines point at
///
/// `conn` is declared before `hooks` so the handle closes while the registry is still alive.
struct Session {
    conn: rusqlite::Connection,
    hooks: Arc<HookState>,
}

impl Session {
    fn open(config: &ConnectionConfig, hooks: Arc<HookState>) -> Result<Self> {
        let flags = config.open_flags();
        let opened = match &config.storage {
            Storage::Memory => rusqlite::Connection::open_in_memory_with_flags(flags),
            Storage::File(path) => rusqlite::Connection::open_with_flags(path, flags),
        };
        let conn = opened.map_err(|e| {
            let err = Error::from(e);
            let reason = match err.reason().code() {
                Some(code) if code & 0xff == ffi::SQLITE_CANTOPEN => err.reason(),
                _ => Reason::CantOpen,
            };
            Error::sqlite(reason, format!("unable to open {}: {}", config.storage, err.message()))
        })?;

        // SAFETY: the handle is live for the duration of the call
        unsafe { ffi::sqlite3_extended_result_codes(conn.handle(), 1) };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;

        Ok(Self { conn, hooks })
    }

    /// Bring the native trampolines in line with registry occupancy
    fn sync_hooks(&self) {
        for transition in self.hooks.reconcile() {
            // SAFETY: `self.hooks` outlives every registration; `close` unregisters them all first
            unsafe { native::apply(self.conn.handle(), Arc::as_ptr(&self.hooks), transition) };
        }
    }

    fn close(self) -> Result<()> {
        self.hooks.close();
        self.sync_hooks();
        let Session { conn, hooks } = self;
        let result = conn.close().map_err(|(_, e)| Error::from(e));
        drop(hooks);
        result
    }
}

/// Lock the session, apply pending hook changes, run `f`, apply again
fn enter<F, T>(inner: &Mutex<Option<Session>>, f: F) -> Result<T>
where F: FnOnce(&Session) -> Result<T> {
    let guard = inner.blocking_lock();
    let session = guard.as_ref().ok_or(Error::ConnectionClosed)?;
    session.sync_hooks();
    let result = f(session);
    session.sync_hooks();
    result
}

/// An open SQLite database
///
/// Must be closed with [`Connection::close`] before it is dropped.
pub struct Connection {
    inner: Arc<Mutex<Option<Session>>>,
    hooks: Hooks,
    context: ExecutionContext,
    config: ConnectionConfig,
    closed: AtomicBool,
}

impl Connection {
    pub async fn open(storage: impl Into<Storage>, context: &ExecutionContext) -> Result<Self> {
        Self::open_with(ConnectionConfig::new(storage.into()), context).await
    }

    pub async fn open_with(config: ConnectionConfig, context: &ExecutionContext) -> Result<Self> {
        let state = Arc::new(HookState::new());
        let session = {
            let config = config.clone();
            let state = state.clone();
            context.run(move || Session::open(&config, state)).await?
        };
        debug!("Opened SQLite connection to {}", config.storage);

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(session))),
            hooks: Hooks::new(state),
            context: context.clone(),
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn spawn_with_session<F, T>(&self, f: F) -> Result<JoinHandle<Result<T>>>
    where
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let inner = self.inner.clone();
        Ok(self.context.spawn(move || enter(&inner, f)))
    }

    async fn with_session<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        join(self.spawn_with_session(f)?).await
    }

    /// Run one statement, handing each row to `on_row` in step order
    ///
    /// `on_row` runs in the calling task, never on the worker. It must not issue queries on this
    /// connection. Dropping the returned future stops stepping and finalizes the statement.
    pub async fn query_with<F>(&self, sql: &str, binds: &[Value], mut on_row: F) -> Result<()>
    where F: FnMut(Row) + Send {
        let (tx, mut rx) = mpsc::channel::<Row>(self.config.channel_capacity());
        let sql = sql.to_owned();
        let binds = binds.to_vec();
        let task = self.spawn_with_session(move |session| {
            trace!("query: {}", sql);
            let mut statement = Statement::prepare(&session.conn, &sql)?;
            statement.bind(&binds)?;
            while let Some(row) = statement.next_row()? {
                if tx.blocking_send(row).is_err() {
                    debug!("Row receiver dropped; abandoning {}", sql);
                    statement.finalize();
                    break;
                }
            }
            Ok(())
        })?;

        while let Some(row) = rx.recv().await {
            on_row(row);
        }
        join(task).await
    }

    /// Run one statement and collect its rows
    pub async fn query(&self, sql: &str, binds: &[Value]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_with(sql, binds, |row| rows.push(row)).await?;
        Ok(rows)
    }

    /// Run several `;`-separated statements without parameters
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_owned();
        self.with_session(move |session| {
            trace!("batch: {}", sql);
            session.conn.execute_batch(&sql).map_err(Error::from)
        })
        .await
    }

    /// Row id of the most recent successful insert
    ///
    /// Racy if other operations on this connection interleave; serialize around it.
    pub async fn last_autoincrement_id(&self) -> Result<i64> { self.with_session(|session| Ok(session.conn.last_insert_rowid())).await }

    /// Register a scalar function or aggregate, replacing one with the same name and arity
    pub async fn install(&self, function: CustomFunction) -> Result<()> { self.with_session(move |session| function.install(&session.conn)).await }

    pub async fn uninstall(&self, function: &CustomFunction) -> Result<()> {
        let function = function.clone();
        self.with_session(move |session| function.uninstall(&session.conn)).await
    }

    /// Close the native handle after any in-flight operation finishes
    ///
    /// Every observer is dropped. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = self.inner.clone();
        let result = self
            .context
            .run(move || match inner.blocking_lock().take() {
                Some(session) => session.close(),
                None => Ok(()),
            })
            .await;
        debug!("Closed SQLite connection to {}", self.config.storage);
        result
    }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    pub fn storage(&self) -> &Storage { &self.config.storage }

    pub fn config(&self) -> &ConnectionConfig { &self.config }

    pub fn execution_context(&self) -> &ExecutionContext { &self.context }

    /// Synchronous registry handle; clone it to capture inside observers
    pub fn hooks(&self) -> &Hooks { &self.hooks }

    async fn apply_hooks(&self) {
        if let Err(err) = self.with_session(|_| Ok(())).await {
            warn!("Deferred hook registration for {}: {}", self.config.storage, err);
        }
    }

    /// Register a scope-bound observer and install its trampoline; None once closed
    pub async fn observe(&self, observer: Observer) -> Option<HookToken> {
        let token = self.hooks.register(observer)?;
        self.apply_hooks().await;
        Some(token)
    }

    /// Register a persistent observer and install its trampoline; None once closed
    pub async fn install_observer(&self, observer: Observer) -> Option<ObserverId> {
        let id = self.hooks.install(observer)?;
        self.apply_hooks().await;
        Some(id)
    }

    /// Remove a persistent observer, uninstalling the trampoline if it was the last of its kind
    pub async fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = self.hooks.remove(id);
        if removed {
            self.apply_hooks().await;
        }
        removed
    }

    pub async fn on_update<F>(&self, f: F) -> Option<HookToken>
    where F: Fn(&UpdateEvent) + Send + Sync + 'static {
        self.observe(Observer::update(f)).await
    }

    pub async fn on_commit<F>(&self, f: F) -> Option<HookToken>
    where F: Fn(&CommitEvent) -> CommitDecision + Send + Sync + 'static {
        self.observe(Observer::commit(f)).await
    }

    pub async fn on_rollback<F>(&self, f: F) -> Option<HookToken>
    where F: Fn(&RollbackEvent) + Send + Sync + 'static {
        self.observe(Observer::rollback(f)).await
    }

    pub async fn on_authorize<F>(&self, f: F) -> Option<HookToken>
    where F: Fn(&AuthorizerEvent) -> Authorization + Send + Sync + 'static {
        self.observe(Observer::authorizer(f)).await
    }

    /// Run `body` with `observer` registered, unregistering on every exit path
    pub async fn with_observer<B, Fut, T, E>(&self, observer: Observer, body: B) -> std::result::Result<T, E>
    where
        B: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let token = self.observe(observer).await.ok_or(Error::ConnectionClosed)?;
        let result = body().await;
        if token.cancel() && !self.is_closed() {
            self.apply_hooks().await;
        }
        result
    }

    /// Key an encrypted database; must precede any statement that reads it
    ///
    /// A wrong key surfaces as `NotADatabase` on the first read.
    #[cfg(feature = "sqlcipher")]
    pub async fn use_passphrase(&self, passphrase: Passphrase) -> Result<()> {
        self.with_session(move |session| passphrase.key(&session.conn)).await
    }

    /// Re-encrypt the database under a new key
    #[cfg(feature = "sqlcipher")]
    pub async fn change_passphrase(&self, passphrase: Passphrase) -> Result<()> {
        self.with_session(move |session| passphrase.rekey(&session.conn)).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("storage", &self.config.storage).field("closed", &self.is_closed()).field("hooks", &self.hooks).finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        error!("Connection to {} dropped without close()", self.config.storage);
        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!("Connection to {} dropped without close()", self.config.storage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookKind;
    use std::sync::Mutex as StdMutex;

    async fn memory() -> Connection { Connection::open(Storage::Memory, &ExecutionContext::current().unwrap()).await.unwrap() }

    #[tokio::test]
    async fn test_query_delivers_rows_in_order() {
        let conn = memory().await;
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t(v) VALUES ('a'), ('b'), ('c');").await.unwrap();
        let mut seen = Vec::new();
        conn.query_with("SELECT v FROM t ORDER BY id", &[], |row| seen.push(row.decode::<String>("v").unwrap())).await.unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(conn.last_autoincrement_id().await.unwrap(), 3);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_row_buffer_of_one_still_streams_everything() {
        let config = ConnectionConfig::memory().row_buffer(0);
        let conn = Connection::open_with(config, &ExecutionContext::current().unwrap()).await.unwrap();
        let rows = conn.query("WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 100) SELECT x FROM n", &[]).await.unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[99].value(0), Some(&Value::Integer(100)));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let conn = memory().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(conn.query("SELECT 1", &[]).await, Err(Error::ConnectionClosed)));
        assert!(conn.on_update(|_| {}).await.is_none());
        assert!(conn.hooks().is_closed());
    }

    #[tokio::test]
    async fn test_native_hooks_follow_registry() {
        let conn = memory().await;
        let seen = Arc::new(StdMutex::new(0));
        let token = {
            let seen = seen.clone();
            conn.on_update(move |_| *seen.lock().unwrap() += 1).await.unwrap()
        };
        assert!(conn.hooks().is_installed(HookKind::Update));
        conn.execute_batch("CREATE TABLE t(v); INSERT INTO t VALUES (1);").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);

        drop(token);
        assert!(conn.hooks().is_installed(HookKind::Update));
        conn.execute_batch("INSERT INTO t VALUES (2);").await.unwrap();
        assert!(!conn.hooks().is_installed(HookKind::Update));
        assert_eq!(*seen.lock().unwrap(), 1);
        conn.close().await.unwrap();
    }
}
