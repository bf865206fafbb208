#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqldb::listener::ListenerRegistry;
use sqldb::prelude::*;
use sqldb::test_utils::postgres::{setup_postgres_embedded, stop_postgres_embedded};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

#[derive(Record, Debug, Default, Clone, PartialEq)]
pub struct Event {
    #[db = "id,pk=events,default"]
    pub id: i64,
    #[db = "name"]
    pub name: String,
    #[db = "scores"]
    pub scores: Vec<i32>,
    #[db = "meta"]
    pub meta: serde_json::Value,
    #[db = "at"]
    pub at: DateTime<Utc>,
}

#[test]
fn embedded_postgres_end_to_end() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = Config::builder(DriverKind::Postgres)
        .host("localhost")
        .user("test_user")
        .password("test_passwordx(!323341")
        .database("test_db")
        .max_connections(4)
        .build()?;
    let server = setup_postgres_embedded(&cfg)?;
    let cfg = server.config.clone();

    let rt = Runtime::new()?;
    let result = rt.block_on(async move {
        let options = ConnectionOptions {
            listeners: ListenerRegistry::new(Duration::from_secs(5)),
            ..ConnectionOptions::default()
        };
        let conn = Connection::connect_with(&cfg, options).await?;
        conn.batch_execute(
            "CREATE TABLE events (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                scores INTEGER[] NOT NULL,
                meta JSONB NOT NULL,
                at TIMESTAMPTZ NOT NULL
            )",
        )
        .await?;

        let event = Event {
            id: 0,
            name: "launch".into(),
            scores: vec![3, 1, 4],
            meta: json!({"k": [1, 2]}),
            at: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        };
        let mut id = 0_i64;
        conn.insert_returning_struct("events", &event, "id", &[&IgnoreHasDefault])
            .await
            .scan(&mut [&mut id])?;
        assert!(id > 0);

        let loaded: Event = conn
            .query_struct("SELECT * FROM events WHERE id = $1", &args![id]?)
            .await?;
        assert_eq!(loaded, Event { id, ..event.clone() });

        let duplicate = conn
            .insert_struct("events", &event, &[&IgnoreHasDefault])
            .await
            .err();
        assert!(duplicate.is_some_and(|e| e.is_unique_violation()));

        // Savepoints on a real server.
        let tx = conn.begin(TxOptions::default().isolation(IsolationLevel::Serializable)).await?;
        tx.execute("UPDATE events SET name = 'renamed'", &[]).await?;
        let sp = tx.begin(TxOptions::default()).await?;
        sp.execute("DELETE FROM events", &[]).await?;
        sp.rollback().await?;
        tx.commit().await?;
        let name: String = conn.query_value("SELECT name FROM events", &[]).await?;
        assert_eq!(name, "renamed");

        // LISTEN/NOTIFY through the registry.
        let (sender, mut received) = mpsc::unbounded_channel();
        let on_notify: NotifyCallback = Arc::new(move |n: &Notification| {
            let _ = sender.send(n.payload.clone());
        });
        conn.listen("jobs", on_notify, None).await?;
        assert!(conn.is_listening("jobs")?);
        conn.execute("SELECT pg_notify('jobs', $1)", &args!["hello"]?).await?;
        conn.batch_execute("NOTIFY jobs, 'again'").await?;
        let first = tokio::time::timeout(Duration::from_secs(10), received.recv()).await?;
        let second = tokio::time::timeout(Duration::from_secs(10), received.recv()).await?;
        assert_eq!(first.as_deref(), Some("hello"));
        assert_eq!(second.as_deref(), Some("again"));
        conn.unlisten("jobs").await?;
        assert!(!conn.is_listening("jobs")?);

        conn.close().await?;
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    });

    stop_postgres_embedded(server);
    result
}
