use chrono::{NaiveDate, NaiveDateTime};

use super::*;
use crate::error::ErrorKind;
use crate::format::{MssqlDialect, MysqlDialect, PostgresDialect};
use crate::mapping::{IgnorePrimaryKey, IgnoreReadOnly, UntaggedNamePolicy};

#[derive(crate::Record, Default)]
pub struct TestRow {
    #[db = "id,pk"]
    pub id: i64,
    #[db = "int"]
    pub int: i32,
    #[db = "bool"]
    pub bool: bool,
    #[db = "str"]
    pub str: String,
    #[db = "str_ptr"]
    pub str_ptr: Option<String>,
    #[db = "nil_ptr"]
    pub nil_ptr: Option<u8>,
    pub untagged_field: i64,
    #[db = "created_at,readonly"]
    pub created_at: NaiveDateTime,
    #[db = "bools"]
    pub bools: Vec<bool>,
}

#[derive(crate::Record, Default)]
pub struct MultiPkRow {
    #[db = "first_id,pk=public.multi_pk"]
    pub first_id: String,
    #[db = "second_id,pk"]
    pub second_id: String,
    #[db = "third_id,pk"]
    pub third_id: String,
    #[db = "created_at"]
    pub created_at: NaiveDateTime,
}

#[derive(crate::Record, Default)]
pub struct PkOnly {
    #[db = "id,pk=tags"]
    pub id: i64,
}

#[derive(crate::Record, Default)]
pub struct NoKey {
    #[db = "name"]
    pub name: String,
}

fn created() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 6)
        .and_then(|d| d.and_hms_opt(7, 8, 9))
        .unwrap_or_default()
}

fn multi_pk_row() -> MultiPkRow {
    MultiPkRow {
        first_id: "a".into(),
        second_id: "b".into(),
        third_id: "c".into(),
        created_at: created(),
    }
}

fn values(pairs: &[(&str, RowValues)]) -> ColumnValues {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[test]
fn insert_struct_uses_declaration_order() -> Result<()> {
    let mapper = TaggedFieldMapper::default().with_untagged(UntaggedNamePolicy::SnakeCase);
    let builder = StatementBuilder::new(&PostgresDialect, &mapper);
    let row = TestRow {
        str_ptr: Some("ptr".into()),
        bools: vec![true, false],
        ..TestRow::default()
    };
    let qp = builder.insert_struct("public.table", &row, &[])?;
    assert_eq!(
        qp.query,
        r#"INSERT INTO public.table("id","int","bool","str","str_ptr","nil_ptr","untagged_field","created_at","bools") VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9)"#
    );
    assert_eq!(qp.params.len(), 9);
    assert_eq!(qp.params[5], RowValues::Null);
    assert_eq!(
        qp.params[8],
        RowValues::Array(vec![RowValues::Bool(true), RowValues::Bool(false)])
    );

    let again = builder.insert_struct("public.table", &row, &[])?;
    assert_eq!(qp.query, again.query);
    Ok(())
}

#[test]
fn upsert_struct_with_multi_column_key() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&PostgresDialect);
    let qp = builder.upsert_struct(&multi_pk_row(), &[])?;
    assert_eq!(
        qp.query,
        r#"INSERT INTO public.multi_pk("first_id","second_id","third_id","created_at") VALUES($1,$2,$3,$4) ON CONFLICT("first_id","second_id","third_id") DO UPDATE SET "created_at"=$4"#
    );
    assert_eq!(qp.params.len(), 4);
    Ok(())
}

#[test]
fn update_struct_with_multi_column_key() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&PostgresDialect);
    let qp = builder.update_struct(&multi_pk_row(), &[])?;
    assert_eq!(
        qp.query,
        r#"UPDATE public.multi_pk SET "created_at"=$4 WHERE "first_id"=$1 AND "second_id"=$2 AND "third_id"=$3"#
    );
    assert_eq!(
        qp.params[..3],
        [
            RowValues::Text("a".into()),
            RowValues::Text("b".into()),
            RowValues::Text("c".into())
        ]
    );
    assert_eq!(qp.params[3], RowValues::Timestamp(created()));
    Ok(())
}

#[test]
fn update_offsets_set_placeholders_after_where_args() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&PostgresDialect);
    let vals = values(&[
        ("int", RowValues::Int(66)),
        ("bool", RowValues::Bool(true)),
        ("str", RowValues::Text("changed".into())),
    ]);
    let qp = builder.update(
        "public.table",
        &vals,
        "a=$1 AND b=$2",
        &[RowValues::Int(1), RowValues::Int(2)],
    )?;
    assert_eq!(
        qp.query,
        r#"UPDATE public.table SET "bool"=$3,"int"=$4,"str"=$5 WHERE a=$1 AND b=$2"#
    );
    assert_eq!(
        qp.params,
        vec![
            RowValues::Int(1),
            RowValues::Int(2),
            RowValues::Bool(true),
            RowValues::Int(66),
            RowValues::Text("changed".into()),
        ]
    );
    Ok(())
}

#[test]
fn positional_update_binds_set_values_first() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&MysqlDialect);
    let vals = values(&[("name", RowValues::Text("x".into()))]);
    let qp = builder.update("users", &vals, "id = ?", &[RowValues::Int(3)])?;
    assert_eq!(qp.query, "UPDATE users SET `name`=? WHERE id = ?");
    assert_eq!(qp.params, vec![RowValues::Text("x".into()), RowValues::Int(3)]);

    let qp = builder.update_struct(&multi_pk_row(), &[])?;
    assert_eq!(
        qp.query,
        "UPDATE public.multi_pk SET `created_at`=? WHERE `first_id`=? AND `second_id`=? AND `third_id`=?"
    );
    assert_eq!(qp.params[0], RowValues::Timestamp(created()));
    Ok(())
}

#[test]
fn positional_upsert_binds_update_values_again() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&MysqlDialect);
    let vals = values(&[("id", RowValues::Int(1)), ("name", RowValues::Text("x".into()))]);
    let qp = builder.upsert("users", &vals, &["id"])?;
    assert_eq!(
        qp.query,
        "INSERT INTO users(`id`,`name`) VALUES(?,?) ON CONFLICT(`id`) DO UPDATE SET `name`=?"
    );
    assert_eq!(qp.params.len(), 3);
    assert_eq!(qp.params[2], RowValues::Text("x".into()));
    Ok(())
}

#[test]
fn map_statements() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&MssqlDialect);
    let vals = values(&[("b", RowValues::Int(2)), ("a", RowValues::Int(1))]);
    assert_eq!(
        builder.insert("dbo.t", &vals)?.query,
        "INSERT INTO dbo.t([a],[b]) VALUES(@p1,@p2)"
    );
    assert_eq!(
        builder.insert_unique("dbo.t", &vals, "a")?.query,
        "INSERT INTO dbo.t([a],[b]) VALUES(@p1,@p2) ON CONFLICT (a) DO NOTHING RETURNING TRUE"
    );
    assert_eq!(
        builder.insert_returning("dbo.t", &vals, "id")?.query,
        "INSERT INTO dbo.t([a],[b]) VALUES(@p1,@p2) RETURNING id"
    );
    Ok(())
}

#[test]
fn upsert_with_only_key_columns_does_nothing_on_conflict() -> Result<()> {
    let builder = StatementBuilder::with_default_mapper(&PostgresDialect);
    let qp = builder.upsert_struct(&PkOnly { id: 4 }, &[])?;
    assert_eq!(
        qp.query,
        r#"INSERT INTO tags("id") VALUES($1) ON CONFLICT("id") DO NOTHING"#
    );
    Ok(())
}

#[test]
fn composition_errors() {
    let builder = StatementBuilder::with_default_mapper(&PostgresDialect);

    let empty = builder.insert("t", &ColumnValues::new()).unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Caller);
    assert!(empty.to_string().contains("no values to insert"));

    let filtered = builder
        .insert_struct("t", &PkOnly { id: 1 }, &[&IgnorePrimaryKey])
        .unwrap_err();
    assert_eq!(filtered.kind(), ErrorKind::Caller);

    let no_table = builder.upsert_struct(&NoKey::default(), &[]).unwrap_err();
    assert_eq!(no_table.kind(), ErrorKind::Configuration);

    let no_key = builder
        .upsert_struct(&multi_pk_row(), &[&IgnorePrimaryKey])
        .unwrap_err();
    assert_eq!(no_key.kind(), ErrorKind::Configuration);

    let nothing_to_set = builder.update_struct(&PkOnly { id: 1 }, &[]).unwrap_err();
    assert_eq!(nothing_to_set.kind(), ErrorKind::Caller);

    let bad_column = builder
        .insert("t", &values(&[("bad name", RowValues::Int(1))]))
        .unwrap_err();
    assert_eq!(bad_column.kind(), ErrorKind::Configuration);
}

#[test]
fn read_only_columns_are_inserted_but_never_updated() -> Result<()> {
    let mapper = TaggedFieldMapper::default();
    let builder = StatementBuilder::new(&PostgresDialect, &mapper);
    let row = TestRow::default();
    let insert = builder.insert_struct("t", &row, &[&IgnoreReadOnly])?;
    assert!(!insert.query.contains("created_at"));
    let insert = builder.insert_struct("t", &row, &[])?;
    assert!(insert.query.contains("\"created_at\""));
    Ok(())
}
