use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sqldb::format::{MssqlDialect, MysqlDialect, PostgresDialect, QueryFormatter, SqliteDialect};
use sqldb::prelude::*;
use tokio::runtime::Runtime;

#[derive(Record, Default, Clone)]
pub struct BenchRow {
    #[db = "id,pk=bench"]
    pub id: i64,
    #[db = "a"]
    pub a: i32,
    #[db = "b"]
    pub b: String,
    #[db = "c"]
    pub c: chrono::NaiveDateTime,
    #[db = "d"]
    pub d: f64,
    #[db = "e"]
    pub e: bool,
    #[db = "f"]
    pub f: Option<Vec<u8>>,
    #[db = "tags"]
    pub tags: Vec<String>,
}

fn rows(n: usize) -> Vec<BenchRow> {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (0..n)
        .map(|i| {
            let i64_i = i64::try_from(i).unwrap_or_default();
            BenchRow {
                id: i64_i,
                a: i32::try_from(i % 1000).unwrap_or_default(),
                b: format!("text-{i}"),
                c: base + chrono::Duration::minutes(i64_i),
                d: i64_i as f64 * 0.5,
                e: i % 2 == 0,
                f: (i % 3 == 0).then(|| vec![0xAB; 16]),
                tags: vec![format!("t{i}"), "x,y".into()],
            }
        })
        .collect()
}

fn compose(c: &mut Criterion) {
    let dialects: [(&str, &dyn QueryFormatter); 4] = [
        ("postgres", &PostgresDialect),
        ("sqlite", &SqliteDialect),
        ("mysql", &MysqlDialect),
        ("mssql", &MssqlDialect),
    ];
    let sample = rows(1).remove(0);
    let mut group = c.benchmark_group("compose");
    for (name, dialect) in dialects {
        let builder = StatementBuilder::with_default_mapper(dialect);
        group.bench_with_input(BenchmarkId::new("insert_struct", name), &sample, |b, row| {
            b.iter(|| builder.insert_struct("bench", black_box(row), &[]));
        });
        group.bench_with_input(BenchmarkId::new("upsert_struct", name), &sample, |b, row| {
            b.iter(|| builder.upsert_struct(black_box(row), &[]));
        });
        if let Ok(statement) = builder.insert_struct("bench", &sample, &[]) {
            group.bench_with_input(BenchmarkId::new("debug_format", name), &statement, |b, qp| {
                b.iter(|| dialect.format_query_for_debug(&qp.query, black_box(&qp.params)));
            });
        }
    }
    group.finish();
}

fn sqlite_inserts(c: &mut Criterion) {
    let Ok(rt) = Runtime::new() else {
        return;
    };
    let Ok(conn) = rt.block_on(async {
        let conn = Connection::connect(&Config::sqlite(":memory:")).await?;
        conn.batch_execute(
            "CREATE TABLE bench (id INTEGER PRIMARY KEY, a INTEGER, b TEXT, c TEXT, d REAL, e INTEGER, f BLOB, tags TEXT)",
        )
        .await?;
        Ok::<_, SqlDbError>(conn)
    }) else {
        return;
    };

    let mut group = c.benchmark_group("sqlite");
    for n in [10_usize, 100] {
        let batch = rows(n);
        group.bench_with_input(BenchmarkId::new("upsert_structs", n), &batch, |b, batch| {
            b.to_async(&rt).iter(|| async {
                for row in batch {
                    let _ = conn.upsert_struct(row, &[]).await;
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, compose, sqlite_inserts);
criterion_main!(benches);
