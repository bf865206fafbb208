use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use tokio_postgres::Statement;
use tokio_postgres::types::{FromSql, Kind, Type};

use crate::error::{Result, SqlDbError};
use crate::results::ResultSet;
use crate::types::RowValues;

/// Build a result set using statement metadata for column names, so that
/// empty results still report their columns.
///
/// # Errors
/// Returns errors from row value extraction.
pub fn build_result_set(stmt: &Statement, rows: &[tokio_postgres::Row]) -> Result<ResultSet> {
    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));

    for row in rows {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>> {
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

/// Extracts a `RowValues` from a `tokio_postgres` row at the given index.
///
/// # Errors
/// Returns `SqlDbError` if the column cannot be decoded.
pub fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<RowValues> {
    let ty = row.columns()[idx].type_().clone();
    if let Kind::Array(member) = ty.kind() {
        return extract_array(row, idx, member);
    }

    let value = match ty {
        Type::INT2 => get::<i16>(row, idx)?.map(|v| RowValues::Int(i64::from(v))),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| RowValues::Int(i64::from(v))),
        Type::INT8 => get::<i64>(row, idx)?.map(RowValues::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| RowValues::Int(i64::from(v))),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(RowValues::Float),
        Type::BOOL => get::<bool>(row, idx)?.map(RowValues::Bool),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(RowValues::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<FixedOffset>>(row, idx)?.map(RowValues::TimestampTz),
        Type::DATE => get::<NaiveDate>(row, idx)?
            .map(|d| RowValues::Timestamp(d.and_time(NaiveTime::MIN))),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?.map(RowValues::JSON),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(RowValues::Blob),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx)?.map(RowValues::Text)
        }
        _ => {
            return Err(SqlDbError::ConversionError(format!(
                "unsupported postgres column type {} for column {}",
                ty.name(),
                row.columns()[idx].name()
            )));
        }
    };
    Ok(value.unwrap_or(RowValues::Null))
}

fn extract_array(row: &tokio_postgres::Row, idx: usize, member: &Type) -> Result<RowValues> {
    fn collect<T>(items: Option<Vec<Option<T>>>, wrap: impl Fn(T) -> RowValues) -> RowValues {
        items.map_or(RowValues::Null, |items| {
            RowValues::Array(
                items
                    .into_iter()
                    .map(|item| item.map_or(RowValues::Null, &wrap))
                    .collect(),
            )
        })
    }

    let value = match *member {
        Type::INT2 => collect(get::<Vec<Option<i16>>>(row, idx)?, |v| RowValues::Int(i64::from(v))),
        Type::INT4 => collect(get::<Vec<Option<i32>>>(row, idx)?, |v| RowValues::Int(i64::from(v))),
        Type::INT8 => collect(get::<Vec<Option<i64>>>(row, idx)?, RowValues::Int),
        Type::FLOAT4 => collect(get::<Vec<Option<f32>>>(row, idx)?, |v| {
            RowValues::Float(f64::from(v))
        }),
        Type::FLOAT8 => collect(get::<Vec<Option<f64>>>(row, idx)?, RowValues::Float),
        Type::BOOL => collect(get::<Vec<Option<bool>>>(row, idx)?, RowValues::Bool),
        Type::TIMESTAMP => collect(get::<Vec<Option<NaiveDateTime>>>(row, idx)?, RowValues::Timestamp),
        Type::TIMESTAMPTZ => collect(
            get::<Vec<Option<DateTime<FixedOffset>>>>(row, idx)?,
            RowValues::TimestampTz,
        ),
        Type::JSON | Type::JSONB => collect(get::<Vec<Option<Value>>>(row, idx)?, RowValues::JSON),
        Type::BYTEA => collect(get::<Vec<Option<Vec<u8>>>>(row, idx)?, RowValues::Blob),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            collect(get::<Vec<Option<String>>>(row, idx)?, RowValues::Text)
        }
        _ => {
            return Err(SqlDbError::ConversionError(format!(
                "unsupported postgres array element type {} for column {}",
                member.name(),
                row.columns()[idx].name()
            )));
        }
    };
    Ok(value)
}
