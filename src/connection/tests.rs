use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::error::ErrorKind;
use crate::listener::Notification;
use crate::query_builder::ColumnValues;
use crate::test_utils::{CallKind, RecordingDriver, result_set};
use crate::types::{DriverKind, NestedTxPolicy, RowValues, TxOptions};

fn postgres() -> (RecordingDriver, Connection) {
    let driver = RecordingDriver::new(DriverKind::Postgres);
    let conn = Connection::new(Arc::new(driver.clone()));
    (driver, conn)
}

#[derive(crate::Record, Default, Debug, PartialEq)]
struct Person {
    #[db = "id,pk=people"]
    pub id: i64,
    #[db = "name"]
    pub name: String,
}

#[tokio::test]
async fn savepoints_nest_inside_one_transaction() -> Result<()> {
    let (driver, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await?;
    assert_eq!(tx.tx_depth(), 1);
    let sp = tx.begin(TxOptions::default()).await?;
    assert_eq!(sp.tx_depth(), 2);
    sp.execute("INSERT INTO t(a) VALUES($1)", &[RowValues::Int(1)]).await?;
    sp.rollback().await?;
    tx.commit().await?;

    assert_eq!(
        driver.sql_log(),
        vec![
            "BEGIN",
            "SAVEPOINT sp_1",
            "INSERT INTO t(a) VALUES($1)",
            "ROLLBACK TO SAVEPOINT sp_1",
            "COMMIT",
        ]
    );
    let connections: Vec<u64> = driver.statements().iter().map(|s| s.connection).collect();
    assert!(connections.windows(2).all(|w| w[0] == w[1]));
    assert!(!conn.in_transaction());
    Ok(())
}

#[tokio::test]
async fn commit_and_rollback_need_an_open_level() -> Result<()> {
    let (_, conn) = postgres();
    assert_eq!(conn.commit().await.map_err(|e| e.kind()), Err(ErrorKind::NotWithinTransaction));
    assert_eq!(conn.rollback().await.map_err(|e| e.kind()), Err(ErrorKind::NotWithinTransaction));

    let tx = conn.begin(TxOptions::default()).await?;
    tx.commit().await?;
    assert!(tx.commit().await.is_err_and(|e| e.is_already_done()));
    assert!(tx.rollback().await.is_err_and(|e| e.is_already_done()));
    assert!(tx.execute("SELECT 1", &[]).await.is_err_and(|e| e.is_already_done()));
    Ok(())
}

#[tokio::test]
async fn finished_parent_disables_savepoints() -> Result<()> {
    let (_, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await?;
    let sp = tx.begin(TxOptions::default()).await?;
    tx.rollback().await?;
    assert!(!sp.tx_active());
    assert!(sp.commit().await.is_err_and(|e| e.is_already_done()));
    Ok(())
}

#[tokio::test]
async fn begin_uses_isolation_and_read_only() -> Result<()> {
    let driver = RecordingDriver::new(DriverKind::Postgres);
    let options = ConnectionOptions {
        default_isolation: Some(IsolationLevel::RepeatableRead),
        ..ConnectionOptions::default()
    };
    let conn = Connection::with_options(Arc::new(driver.clone()), options);

    let tx = conn.begin(TxOptions::default().read_only(true)).await?;
    tx.rollback().await?;
    let tx = conn
        .begin(TxOptions::default().isolation(IsolationLevel::Serializable))
        .await?;
    tx.commit().await?;

    assert_eq!(
        driver.sql_log(),
        vec![
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY",
            "ROLLBACK",
            "BEGIN ISOLATION LEVEL SERIALIZABLE",
            "COMMIT",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn transaction_commits_on_ok() -> Result<()> {
    let (driver, conn) = postgres();
    driver.push_result(result_set(&["id"], vec![vec![RowValues::Int(7)]]));
    let id: i64 = conn
        .transaction(TxOptions::default(), |tx| async move {
            tx.execute("INSERT INTO t(a) VALUES($1)", &[RowValues::Int(1)]).await?;
            tx.query_value("SELECT max(id) FROM t", &[]).await
        })
        .await?;
    assert_eq!(id, 7);
    assert_eq!(driver.sql_log().first().map(String::as_str), Some("BEGIN"));
    assert_eq!(driver.sql_log().last().map(String::as_str), Some("COMMIT"));
    Ok(())
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let (driver, conn) = postgres();
    let result: Result<()> = conn
        .transaction(TxOptions::default(), |tx| async move {
            tx.execute("INSERT INTO t(a) VALUES(1)", &[]).await?;
            Err(SqlDbError::CallerError("stop".into()))
        })
        .await;
    assert!(matches!(result, Err(SqlDbError::CallerError(ref m)) if m == "stop"));
    assert_eq!(
        driver.sql_log(),
        vec!["BEGIN", "INSERT INTO t(a) VALUES(1)", "ROLLBACK"]
    );
}

#[tokio::test]
async fn failed_rollback_is_reported_with_the_cause() {
    let (driver, conn) = postgres();
    driver.fail_on("ROLLBACK", "connection reset");
    let result: Result<()> = conn
        .transaction(TxOptions::default(), |_tx| async move {
            Err(SqlDbError::CallerError("stop".into()))
        })
        .await;
    match result {
        Err(SqlDbError::RollbackFailed { error, rollback }) => {
            assert!(matches!(*error, SqlDbError::CallerError(_)));
            assert_eq!(rollback.root().to_string(), "SQL execution error: connection reset");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn failed_root_rollback_discards_the_connection() {
    let (driver, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await.unwrap();
    let sp = tx.begin(TxOptions::default()).await.unwrap();

    driver.fail_on("ROLLBACK", "connection reset");
    assert!(sp.rollback().await.is_err());
    assert!(driver.broken_connections().is_empty());

    let err = tx.rollback().await.unwrap_err();
    assert_eq!(err.root().to_string(), "SQL execution error: connection reset");
    assert!(!tx.tx_active());
    let rollback = driver
        .statements()
        .into_iter()
        .find(|s| s.sql == "ROLLBACK")
        .unwrap();
    assert_eq!(driver.broken_connections(), vec![rollback.connection]);
}

#[tokio::test]
async fn failed_begin_is_wrapped() {
    let (driver, conn) = postgres();
    driver.fail_on("BEGIN", "no");
    let result = conn
        .transaction(TxOptions::default(), |_tx| async move { Ok(()) })
        .await;
    assert!(matches!(result, Err(SqlDbError::TxBegin(_))));
}

#[tokio::test]
async fn panic_rolls_back_and_resumes() {
    let (driver, conn) = postgres();
    let handle = tokio::spawn(async move {
        conn.transaction(TxOptions::default(), |tx| async move {
            tx.execute("DELETE FROM t", &[]).await?;
            if tx.in_transaction() {
                panic!("boom");
            }
            Ok(())
        })
        .await
    });
    let joined = handle.await;
    assert!(joined.is_err_and(|e| e.is_panic()));
    assert_eq!(driver.sql_log(), vec!["BEGIN", "DELETE FROM t", "ROLLBACK"]);
}

#[tokio::test]
async fn nested_policies() -> Result<()> {
    let (driver, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await?;

    let rejected = tx
        .transaction(TxOptions::default().nested(NestedTxPolicy::Reject), |_t| async { Ok(()) })
        .await;
    assert_eq!(rejected.map_err(|e| e.kind()), Err(ErrorKind::WithinTransaction));

    tx.transaction(TxOptions::default().nested(NestedTxPolicy::Inherit), |t| async move {
        assert_eq!(t.tx_depth(), 1);
        t.execute("UPDATE t SET a = 1", &[]).await
    })
    .await?;
    assert!(tx.tx_active());

    tx.transaction(TxOptions::default(), |t| async move {
        assert_eq!(t.tx_depth(), 2);
        t.execute("UPDATE t SET a = 2", &[]).await
    })
    .await?;
    tx.commit().await?;

    assert_eq!(
        driver.sql_log(),
        vec![
            "BEGIN",
            "UPDATE t SET a = 1",
            "SAVEPOINT sp_1",
            "UPDATE t SET a = 2",
            "RELEASE SAVEPOINT sp_1",
            "COMMIT",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn dropped_transaction_rolls_back() -> Result<()> {
    let (driver, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await?;
    drop(tx);
    for _ in 0..50 {
        if driver.sql_log().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(driver.sql_log(), vec!["BEGIN", "ROLLBACK"]);
    Ok(())
}

#[tokio::test]
async fn driver_errors_carry_the_statement() {
    let (driver, conn) = postgres();
    driver.fail_on("FROM missing", "relation does not exist");
    let err = conn
        .execute("SELECT * FROM missing WHERE id = $1", &[RowValues::Int(4)])
        .await
        .err();
    match err {
        Some(SqlDbError::Query { query, source }) => {
            assert_eq!(query, "SELECT * FROM missing WHERE id = 4");
            assert!(matches!(*source, SqlDbError::ExecutionError(_)));
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut rows = conn.query_rows("SELECT * FROM missing", &[]).await;
    assert!(!rows.next());
    assert!(rows.err().is_some());
}

#[tokio::test]
async fn query_helpers_scan_results() -> Result<()> {
    let (driver, conn) = postgres();
    driver.push_result(result_set(
        &["id", "name"],
        vec![
            vec![RowValues::Int(1), RowValues::Text("ann".into())],
            vec![RowValues::Int(2), RowValues::Text("bob".into())],
        ],
    ));
    let people: Vec<Person> = conn.query_struct_slice("SELECT id, name FROM people", &[]).await?;
    assert_eq!(people.len(), 2);
    assert_eq!(people[1].name, "bob");

    driver.push_result(result_set(&["n"], vec![vec![RowValues::Int(1)], vec![RowValues::Int(2)]]));
    let strings = conn.query_strings("SELECT n FROM t", &[], true).await?;
    assert_eq!(strings, vec![vec!["n"], vec!["1"], vec!["2"]]);

    let missing = conn.query_value::<i64>("SELECT 1 WHERE false", &[]).await;
    assert!(missing.is_err_and(|e| e.is_no_rows()));
    Ok(())
}

#[tokio::test]
async fn insert_unique_reports_conflicts() -> Result<()> {
    let (driver, conn) = postgres();
    let mut values = ColumnValues::new();
    values.insert("email".into(), RowValues::Text("a@b.c".into()));

    driver.push_result(result_set(&["bool"], vec![vec![RowValues::Bool(true)]]));
    assert!(conn.insert_unique("users", &values, "email").await?);
    assert!(!conn.insert_unique("users", &values, "email").await?);
    assert_eq!(
        driver.sql_log()[0],
        "INSERT INTO users(\"email\") VALUES($1) ON CONFLICT (email) DO NOTHING RETURNING TRUE"
    );
    Ok(())
}

#[tokio::test]
async fn insert_structs_runs_atomically() -> Result<()> {
    let (driver, conn) = postgres();
    let people = vec![
        Person { id: 1, name: "ann".into() },
        Person { id: 2, name: "bob".into() },
    ];
    assert_eq!(conn.insert_structs("people", &people, &[]).await?, 2);
    let log = driver.sql_log();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "BEGIN");
    assert_eq!(log[3], "COMMIT");

    driver.clear_log();
    assert_eq!(conn.insert_structs::<Person>("people", &[], &[]).await?, 0);
    assert!(driver.sql_log().is_empty());

    driver.fail_on("VALUES", "duplicate key");
    assert!(conn.insert_structs("people", &people, &[]).await.is_err());
    assert_eq!(driver.sql_log().last().map(String::as_str), Some("ROLLBACK"));
    Ok(())
}

#[tokio::test]
async fn statements_use_the_dialect_placeholders() -> Result<()> {
    let driver = RecordingDriver::new(DriverKind::Sqlite);
    let conn = Connection::new(Arc::new(driver.clone()));
    conn.upsert_struct(&Person { id: 3, name: "cy".into() }, &[]).await?;
    let recorded = driver.statements();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, CallKind::Execute);
    assert!(recorded[0].sql.starts_with("INSERT INTO people(\"id\",\"name\") VALUES(?1,?2)"));
    assert_eq!(
        recorded[0].params,
        vec![RowValues::Int(3), RowValues::Text("cy".into())]
    );
    Ok(())
}

#[tokio::test]
async fn cancelled_context_stops_statements() {
    let (driver, conn) = postgres();
    let ctx = Context::new();
    ctx.cancel();
    let scoped = conn.with_context(ctx);
    let err = scoped.execute("SELECT 1", &[]).await.err();
    assert!(matches!(err, Some(SqlDbError::Cancelled)));
    assert!(driver.statements().is_empty());
    assert!(conn.execute("SELECT 1", &[]).await.is_ok());
}

#[tokio::test]
async fn close_is_idempotent_and_final() -> Result<()> {
    let (driver, conn) = postgres();
    let other = conn.clone();
    conn.close().await?;
    conn.close().await?;
    assert!(other.is_closed());
    assert_eq!(
        other.execute("SELECT 1", &[]).await.map_err(|e| e.kind()),
        Err(ErrorKind::Transient)
    );
    assert!(driver.statements().is_empty());
    Ok(())
}

#[tokio::test]
async fn close_inside_transaction_rolls_back() -> Result<()> {
    let (driver, conn) = postgres();
    let tx = conn.begin(TxOptions::default()).await?;
    tx.close().await?;
    assert!(!conn.is_closed());
    assert_eq!(driver.sql_log(), vec!["BEGIN", "ROLLBACK"]);
    Ok(())
}

#[tokio::test]
async fn ping_uses_a_pooled_connection() -> Result<()> {
    let (driver, conn) = postgres();
    conn.ping(Duration::from_secs(1)).await?;
    assert_eq!(driver.statements()[0].kind, CallKind::Ping);
    assert_eq!(driver.checked_out(), 0);
    Ok(())
}

#[tokio::test]
async fn sqlite_has_no_notifications() {
    let driver = RecordingDriver::new(DriverKind::Sqlite);
    let conn = Connection::new(Arc::new(driver));
    let callback: NotifyCallback = Arc::new(|_: &Notification| {});
    let err = conn.listen("jobs", callback, None).await.err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotSupported));
    assert!(conn.is_listening("jobs").is_err());
}

#[tokio::test]
async fn postgres_without_connector_has_no_notifications() {
    let (_, conn) = postgres();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let callback: NotifyCallback = Arc::new(move |_: &Notification| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let err = conn.listen("jobs", callback, None).await.err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotSupported));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
