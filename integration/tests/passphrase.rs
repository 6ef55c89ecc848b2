//! Encrypted databases; only built with `--features sqlcipher`
#![cfg(feature = "sqlcipher")]

mod common;

use std::path::Path;

use anyhow::Result;
use sqlite_relay::{Connection, ExecutionContext, Passphrase, Reason, Storage, Value};

async fn open_keyed(path: &Path, key: Passphrase) -> Result<Connection> {
    let conn = Connection::open(Storage::file(path), &ExecutionContext::current()?).await?;
    conn.use_passphrase(key).await?;
    Ok(conn)
}

#[tokio::test]
async fn test_wrong_key_reads_as_not_a_database() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("secret.db");

    let conn = open_keyed(&path, Passphrase::try_from("correct horse")?).await?;
    conn.execute_batch("CREATE TABLE secrets(v TEXT); INSERT INTO secrets VALUES ('kept');").await?;
    conn.close().await?;

    let conn = open_keyed(&path, Passphrase::try_from("battery staple")?).await?;
    let err = conn.query("SELECT v FROM secrets", &[]).await.unwrap_err();
    assert_eq!(err.reason(), Reason::NotADatabase);
    conn.close().await?;

    let conn = open_keyed(&path, Passphrase::try_from("correct horse")?).await?;
    assert_eq!(conn.query("SELECT v FROM secrets", &[]).await?[0].value(0), Some(&Value::Text("kept".into())));
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_change_to_a_binary_key() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rekeyed.db");
    let binary = vec![0x00, 0x9f, 0x92, 0x96, 0xff];

    let conn = open_keyed(&path, Passphrase::try_from("first")?).await?;
    conn.execute_batch("CREATE TABLE t(v INTEGER); INSERT INTO t VALUES (7);").await?;
    conn.change_passphrase(Passphrase::new(binary.clone())?).await?;
    conn.close().await?;

    let conn = open_keyed(&path, Passphrase::try_from("first")?).await?;
    assert_eq!(conn.query("SELECT v FROM t", &[]).await.unwrap_err().reason(), Reason::NotADatabase);
    conn.close().await?;

    let conn = open_keyed(&path, Passphrase::new(binary)?).await?;
    assert_eq!(conn.query("SELECT v FROM t", &[]).await?[0].value(0), Some(&Value::Integer(7)));
    conn.close().await?;
    Ok(())
}
