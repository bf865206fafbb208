#![cfg(feature = "sqlite")]

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use sqldb::prelude::*;

async fn open() -> Result<Connection, SqlDbError> {
    let conn = Connection::connect(&Config::sqlite(":memory:")).await?;
    conn.batch_execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)")
        .await?;
    Ok(conn)
}

async fn values(conn: &Connection) -> Result<Vec<String>, SqlDbError> {
    conn.query_rows("SELECT v FROM t ORDER BY id", &[])
        .await
        .scan_slice()
}

#[tokio::test]
async fn savepoint_rollback_keeps_outer_work() -> Result<(), SqlDbError> {
    let conn = open().await?;
    let tx = conn.begin(TxOptions::default()).await?;
    tx.execute("INSERT INTO t (v) VALUES (?1)", &args!["outer"]?).await?;

    let sp = tx.begin(TxOptions::default()).await?;
    sp.execute("INSERT INTO t (v) VALUES (?1)", &args!["inner"]?).await?;
    assert_eq!(values(&sp).await?, vec!["outer", "inner"]);
    sp.rollback().await?;

    assert_eq!(values(&tx).await?, vec!["outer"]);
    tx.commit().await?;
    // The in-memory pool has one connection; the handles return it on drop.
    drop(sp);
    drop(tx);
    assert_eq!(values(&conn).await?, vec!["outer"]);
    Ok(())
}

#[tokio::test]
async fn closure_commits_and_rolls_back() -> Result<(), SqlDbError> {
    let conn = open().await?;
    conn.transaction(TxOptions::default(), |tx| async move {
        tx.execute("INSERT INTO t (v) VALUES ('kept')", &[]).await?;
        Ok(())
    })
    .await?;

    let failed: Result<(), SqlDbError> = conn
        .transaction(TxOptions::default(), |tx| async move {
            tx.execute("INSERT INTO t (v) VALUES ('lost')", &[]).await?;
            tx.execute("INSERT INTO t (v) VALUES (NULL)", &[]).await?;
            Ok(())
        })
        .await;
    let err = failed.err().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::Integrity));
    assert_eq!(values(&conn).await?, vec!["kept"]);
    Ok(())
}

#[tokio::test]
async fn nested_closure_failure_only_undoes_its_savepoint() -> Result<(), SqlDbError> {
    let conn = open().await?;
    conn.transaction(TxOptions::default(), |tx| async move {
        tx.execute("INSERT INTO t (v) VALUES ('a')", &[]).await?;
        let inner: Result<(), SqlDbError> = tx
            .transaction(TxOptions::default(), |sp| async move {
                sp.execute("INSERT INTO t (v) VALUES ('b')", &[]).await?;
                Err(SqlDbError::Other("abandon".into()))
            })
            .await;
        assert!(inner.is_err());
        tx.execute("INSERT INTO t (v) VALUES ('c')", &[]).await?;
        Ok(())
    })
    .await?;
    assert_eq!(values(&conn).await?, vec!["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn panic_inside_transaction_rolls_back() -> Result<(), SqlDbError> {
    let conn = open().await?;
    let outcome = AssertUnwindSafe(conn.transaction(TxOptions::default(), |tx| async move {
        tx.execute("INSERT INTO t (v) VALUES ('doomed')", &[]).await?;
        if tx.tx_active() {
            panic!("callback failed");
        }
        Ok(())
    }))
    .catch_unwind()
    .await;
    assert!(outcome.is_err());
    assert!(values(&conn).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn finished_transactions_refuse_more_work() -> Result<(), SqlDbError> {
    let conn = open().await?;
    let tx = conn.begin(TxOptions::default()).await?;
    tx.commit().await?;
    let err = tx.execute("INSERT INTO t (v) VALUES ('late')", &[]).await.err();
    assert!(err.is_some_and(|e| e.is_already_done()));
    assert!(conn.commit().await.is_err());
    Ok(())
}

#[tokio::test]
async fn insert_structs_is_all_or_nothing() -> Result<(), SqlDbError> {
    #[derive(Record, Default)]
    pub struct Entry {
        #[db = "id,pk=t"]
        pub id: i64,
        #[db = "v"]
        pub v: Option<String>,
    }

    let conn = open().await?;
    let entries = vec![
        Entry { id: 1, v: Some("x".into()) },
        Entry { id: 2, v: None },
    ];
    assert!(conn.insert_structs("t", &entries, &[]).await.is_err());
    assert!(values(&conn).await?.is_empty());
    Ok(())
}
