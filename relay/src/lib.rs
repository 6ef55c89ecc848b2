//! Non-blocking SQLite client
//!
//! A [`Connection`] owns one native SQLite handle and runs every native call on the tokio blocking
//! pool, so the calling task is never blocked. On top of that it provides:
//! - row streaming back into the calling task ([`Connection::query_with`])
//! - update, commit, rollback and authorizer observers with token or id lifetimes ([`hooks`])
//! - custom scalar functions and aggregates ([`CustomFunction`])
//!
//! ```no_run
//! # async fn demo() -> sqlite_relay::Result<()> {
//! use sqlite_relay::{Connection, ExecutionContext, Storage, Value};
//!
//! let conn = Connection::open(Storage::Memory, &ExecutionContext::current()?).await?;
//! let _token = conn.on_update(|event| println!("{:?} {}", event.operation, event.rowid)).await;
//! conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)").await?;
//! conn.query("INSERT INTO t(v) VALUES (?)", &[Value::from("hello")]).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod database;
pub mod error;
pub mod function;
pub mod hooks;
pub mod passphrase;
pub mod row;
pub mod statement;
pub mod value;

pub use config::{ConnectionConfig, OpenMode, Storage};
pub use connection::Connection;
pub use context::ExecutionContext;
pub use database::Database;
pub use error::{Error, Reason, Result};
pub use function::{AggregateFunction, CustomFunction, FunctionIdentity, FunctionKind};
pub use hooks::{
    Authorization, AuthorizerAction, AuthorizerEvent, CommitDecision, CommitEvent, HookKind, HookToken, Hooks, Observer, ObserverId,
    RollbackEvent, UpdateEvent, UpdateOperation,
};
pub use passphrase::Passphrase;
pub use row::{Columns, Row};
pub use value::{FromValue, Value, ValueType};
