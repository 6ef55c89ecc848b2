//! Value marshaling and row shape through a live connection

mod common;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use common::open_memory;
use sqlite_relay::{Error, Reason, Value, ValueType};

#[tokio::test]
async fn test_values_round_trip_through_select() -> Result<()> {
    let conn = open_memory().await?;
    let values = vec![
        Value::Integer(42),
        Value::Integer(i64::MIN),
        Value::Real(1.5),
        Value::Text("héllo, wörld".into()),
        Value::Text(String::new()),
        Value::Blob(vec![0, 1, 2, 255]),
        Value::Blob(Vec::new()),
        Value::Null,
    ];
    for value in values {
        let rows = conn.query("SELECT ?", &[value.clone()]).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value(0), Some(&value), "round trip of {}", value);
    }
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_non_utf8_text_comes_back_as_bytes() -> Result<()> {
    let conn = open_memory().await?;
    let rows = conn.query("SELECT CAST(x'ff41' AS TEXT) AS raw, CAST(x'4142' AS TEXT) AS ok", &[]).await?;
    assert_eq!(rows[0].get("raw"), Some(&Value::Blob(vec![0xff, 0x41])));
    assert_eq!(rows[0].get("ok"), Some(&Value::Text("AB".into())));
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_integral_real_crosses_into_integer_column() -> Result<()> {
    let conn = open_memory().await?;
    conn.execute_batch("CREATE TABLE t(n INTEGER, r REAL)").await?;
    conn.query("INSERT INTO t VALUES (?, ?)", &[Value::Real(3.0), Value::Integer(2)]).await?;

    let rows = conn.query("SELECT n, r FROM t", &[]).await?;
    // Column affinity coerces on storage
    assert_eq!(rows[0].value(0), Some(&Value::Integer(3)));
    assert_eq!(rows[0].value(1), Some(&Value::Real(2.0)));
    assert_eq!(rows[0].decode::<i64>("r")?, 2);
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_host_type_coercions() -> Result<()> {
    let conn = open_memory().await?;
    let at = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();
    let rows = conn
        .query(
            "SELECT ? AS flag, ? AS at, '2024-05-17 08:30:00' AS at_text, ? AS missing, 2 AS two",
            &[Value::from(true), Value::from(at), Value::from(None::<i64>)],
        )
        .await?;
    let row = &rows[0];
    assert!(row.decode::<bool>("flag")?);
    assert_eq!(row.decode::<chrono::DateTime<Utc>>("at")?, at);
    assert_eq!(row.decode::<chrono::DateTime<Utc>>("at_text")?, at);
    assert_eq!(row.decode::<Option<i64>>("missing")?, None);

    match row.decode::<bool>("two") {
        Err(Error::Conversion { found: ValueType::Integer, .. }) => {}
        other => panic!("expected a conversion error, got {:?}", other),
    }
    assert!(matches!(row.decode::<i64>("nope"), Err(Error::ColumnNotFound(_))));
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_column_names_keep_position() -> Result<()> {
    let conn = open_memory().await?;
    let rows = conn.query("SELECT 1 AS a, 2 AS a, 3 AS b", &[]).await?;
    let row = &rows[0];
    assert_eq!(row.len(), 3);
    assert_eq!(row.get("a"), Some(&Value::Integer(1)));
    assert_eq!(row.get_all("a").cloned().collect::<Vec<_>>(), vec![Value::Integer(1), Value::Integer(2)]);
    assert_eq!(row.iter().map(|(name, _)| name).collect::<Vec<_>>(), vec!["a", "a", "b"]);
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_constraint_errors_keep_extended_reason() -> Result<()> {
    let conn = open_memory().await?;
    conn.execute_batch(
        "CREATE TABLE parent(id INTEGER PRIMARY KEY);
         CREATE TABLE child(id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id));",
    )
    .await?;

    let err = conn.query("INSERT INTO child(parent_id) VALUES (?)", &[Value::Null]).await.unwrap_err();
    assert_eq!(err.reason(), Reason::ConstraintNotNull);
    assert!(err.reason().is_constraint());
    assert!(err.message().contains("NOT NULL"));

    let err = conn.query("INSERT INTO child(parent_id) VALUES (?)", &[Value::Integer(99)]).await.unwrap_err();
    assert_eq!(err.reason(), Reason::ConstraintForeignKey);

    let err = conn.query("SELEC 1", &[]).await.unwrap_err();
    assert_eq!(err.reason(), Reason::Error);
    assert!(err.message().contains("syntax error"));
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_bind_count_mismatch() -> Result<()> {
    let conn = open_memory().await?;
    let err = conn.query("SELECT ?", &[Value::Integer(1), Value::Integer(2)]).await.unwrap_err();
    assert_eq!(err.reason(), Reason::Range);
    conn.close().await?;
    Ok(())
}
