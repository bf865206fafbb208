use std::error::Error;

use chrono::Utc;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::error::SqlDbError;
use crate::types::RowValues;

/// Borrow arguments as the trait objects `tokio-postgres` binds.
pub(crate) fn as_refs(params: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    let mut references = Vec::with_capacity(params.len());
    for p in params {
        references.push(p as &(dyn ToSql + Sync));
    }
    references
}

type BoxError = Box<dyn Error + Sync + Send>;

fn mismatch(value: &RowValues, ty: &Type) -> BoxError {
    Box::new(SqlDbError::ConversionError(format!(
        "cannot bind {} to a {ty} parameter",
        value.type_name()
    )))
}

fn is_text(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn int_to_sql(i: i64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::OID => u32::try_from(i)?.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        _ if is_text(ty) => i.to_string().to_sql(ty, out),
        _ => Err(mismatch(&RowValues::Int(i), ty)),
    }
}

/// The integer a float holds exactly, if any.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn whole_number(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64)
        .then_some(f as i64)
}

fn float_to_sql(f: f64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 => match whole_number(f) {
            Some(i) => int_to_sql(i, ty, out),
            None => Err(Box::new(SqlDbError::ConversionError(format!(
                "{f} is not a whole number for a {ty} parameter"
            )))),
        },
        _ if is_text(ty) => f.to_string().to_sql(ty, out),
        _ => Err(mismatch(&RowValues::Float(f), ty)),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => int_to_sql(s.trim().parse()?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(s.trim().parse()?, ty, out),
        Type::BOOL => s.trim().parse::<bool>()?.to_sql(ty, out),
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        _ if is_text(ty) => s.to_sql(ty, out),
        _ => Err(mismatch(&RowValues::Text(s.to_string()), ty)),
    }
}

impl ToSql for RowValues {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        match self {
            RowValues::Int(i) => int_to_sql(*i, ty, out),
            RowValues::Float(f) => float_to_sql(*f, ty, out),
            RowValues::Text(s) => text_to_sql(s, ty, out),
            RowValues::Bool(b) => match *ty {
                Type::BOOL => (*b).to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(i64::from(*b), ty, out),
                _ if is_text(ty) => b.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            RowValues::Timestamp(dt) => match *ty {
                Type::TIMESTAMP => dt.to_sql(ty, out),
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            RowValues::TimestampTz(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.with_timezone(&Utc).to_sql(ty, out),
                Type::TIMESTAMP => dt.naive_utc().to_sql(ty, out),
                Type::DATE => dt.naive_utc().date().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => match *ty {
                Type::JSON | Type::JSONB => jsval.to_sql(ty, out),
                _ if is_text(ty) => jsval.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            RowValues::Blob(bytes) => match *ty {
                Type::BYTEA => bytes.to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            RowValues::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(ty: &Type) -> bool {
        if let Kind::Array(member) = ty.kind() {
            return Self::accepts(member);
        }
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::OID
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_arrays_of_supported_members() {
        assert!(RowValues::accepts(&Type::INT4_ARRAY));
        assert!(RowValues::accepts(&Type::TEXT_ARRAY));
        assert!(!RowValues::accepts(&Type::POINT));
        assert!(!RowValues::accepts(&Type::POINT_ARRAY));
    }

    #[test]
    fn narrows_integers_to_column_width() {
        let mut out = bytes::BytesMut::new();
        RowValues::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.as_ref(), &7_i32.to_be_bytes());

        let mut out = bytes::BytesMut::new();
        assert!(RowValues::Int(i64::MAX).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn naive_timestamps_bind_to_timestamptz_as_utc() {
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        let mut ours = bytes::BytesMut::new();
        RowValues::Timestamp(naive)
            .to_sql(&Type::TIMESTAMPTZ, &mut ours)
            .unwrap();
        let mut expected = bytes::BytesMut::new();
        naive.and_utc().to_sql(&Type::TIMESTAMPTZ, &mut expected).unwrap();
        assert_eq!(ours, expected);
    }

    fn encode(value: &RowValues, ty: &Type) -> Result<bytes::BytesMut, BoxError> {
        let mut out = bytes::BytesMut::new();
        value.to_sql(ty, &mut out)?;
        Ok(out)
    }

    #[test]
    fn integers_bind_to_float_columns_by_value() {
        let out = encode(&RowValues::Int(5), &Type::FLOAT8).unwrap();
        let bytes: [u8; 8] = <[u8; 8]>::try_from(&out[..]).unwrap();
        assert_eq!(f64::from_be_bytes(bytes), 5.0);

        let out = encode(&RowValues::Int(-3), &Type::FLOAT4).unwrap();
        let bytes: [u8; 4] = <[u8; 4]>::try_from(&out[..]).unwrap();
        assert_eq!(f32::from_be_bytes(bytes), -3.0);
    }

    #[test]
    fn whole_floats_bind_to_integer_columns() {
        let out = encode(&RowValues::Float(42.0), &Type::INT8).unwrap();
        let bytes: [u8; 8] = <[u8; 8]>::try_from(&out[..]).unwrap();
        assert_eq!(i64::from_be_bytes(bytes), 42);

        let out = encode(&RowValues::Float(7.0), &Type::INT2).unwrap();
        assert_eq!(out.as_ref(), &7_i16.to_be_bytes());
    }

    #[test]
    fn fractional_floats_are_rejected_for_integer_columns() {
        let err = encode(&RowValues::Float(1.5), &Type::INT8).unwrap_err();
        assert!(err.to_string().contains("not a whole number"), "{err}");
        assert!(encode(&RowValues::Float(f64::NAN), &Type::INT4).is_err());
        assert!(encode(&RowValues::Float(1e300), &Type::INT8).is_err());
    }

    #[test]
    fn scalars_bind_to_text_columns_as_text() {
        assert_eq!(encode(&RowValues::Int(12), &Type::TEXT).unwrap().as_ref(), b"12");
        assert_eq!(encode(&RowValues::Float(2.5), &Type::VARCHAR).unwrap().as_ref(), b"2.5");
        assert_eq!(encode(&RowValues::Bool(true), &Type::TEXT).unwrap().as_ref(), b"true");
    }

    #[test]
    fn text_is_parsed_for_numeric_and_bool_columns() {
        let out = encode(&RowValues::Text(" 9 ".into()), &Type::INT4).unwrap();
        assert_eq!(out.as_ref(), &9_i32.to_be_bytes());
        let out = encode(&RowValues::Text("t".into()), &Type::INT4);
        assert!(out.is_err());
        let out = encode(&RowValues::Text("false".into()), &Type::BOOL).unwrap();
        assert_eq!(out.as_ref(), &[0]);
    }

    #[test]
    fn bools_bind_to_integer_columns_as_zero_or_one() {
        let out = encode(&RowValues::Bool(true), &Type::INT4).unwrap();
        assert_eq!(out.as_ref(), &1_i32.to_be_bytes());
    }

    #[test]
    fn unsupported_pairings_are_conversion_errors() {
        let err = encode(&RowValues::Blob(vec![1, 2]), &Type::INT8).unwrap_err();
        let err = err.downcast::<SqlDbError>().unwrap();
        assert!(matches!(*err, SqlDbError::ConversionError(_)));
        assert!(encode(&RowValues::Int(1), &Type::TIMESTAMP).is_err());
        assert!(encode(&RowValues::Array(vec![RowValues::Int(1)]), &Type::INT8).is_err());
    }
}
