use rusqlite::types::Value;

use crate::types::RowValues;
use crate::values::array_to_json;

/// Convert a single `RowValues` to a rusqlite `Value`.
///
/// SQLite has no timestamp, JSON or array storage class: timestamps bind as
/// text in the forms SQLite's date functions read, JSON and arrays as JSON text.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::TimestampTz(dt) => Value::Text(dt.format("%F %T%.f%:z").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
        RowValues::Array(items) => Value::Text(array_to_json(items).to_string()),
    }
}

/// Convert arguments into owned values that can move onto a blocking thread.
#[must_use]
pub fn convert(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    #[test]
    fn timestamps_bind_as_sortable_text() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_micro_opt(3, 4, 5, 120_000))
            .unwrap();
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::Timestamp(naive)),
            Value::Text("2024-01-02 03:04:05.120".into())
        );

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let tz = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::TimestampTz(tz)),
            Value::Text("2024-01-02 03:04:05+02:00".into())
        );
    }

    #[test]
    fn arrays_and_bools() {
        let arr = RowValues::Array(vec![RowValues::Int(1), RowValues::Null]);
        assert_eq!(row_value_to_sqlite_value(&arr), Value::Text("[1,null]".into()));
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
    }
}
