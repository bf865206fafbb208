//! Conversions between Rust values and [`RowValues`].
//!
//! [`ToRowValue`] adapts outbound arguments, [`ScanValue`] writes scanned
//! columns into existing destinations. Both are implemented for the primitive
//! types, `chrono` date-times, `serde_json::Value`, `Option<T>` and `Vec<T>`.

mod array;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{Result, SqlDbError};
use crate::types::RowValues;

pub use array::{array_to_json, json_to_row_value, split_array_literal};

/// Converts a value into a driver argument.
pub trait ToRowValue: Send + Sync {
    /// # Errors
    /// Returns `ConversionError` when the value cannot be represented.
    fn to_row_value(&self) -> Result<RowValues>;
}

/// Receives a scanned column value in place.
pub trait ScanValue: Send {
    /// # Errors
    /// Returns `ConversionError` when `value` cannot be assigned to `self`.
    fn scan_value(&mut self, value: &RowValues) -> Result<()>;
}

/// Element types that `Vec<T>` binds as an SQL array.
///
/// `u8` is excluded: `Vec<u8>` is a blob.
pub trait ArrayElement: ToRowValue + ScanValue + Default {}

/// Collect heterogeneous arguments into driver values.
///
/// # Errors
/// Returns the first conversion error.
pub fn collect_args(args: &[&dyn ToRowValue]) -> Result<Vec<RowValues>> {
    args.iter().map(|a| a.to_row_value()).collect()
}

/// Build a `Result<Vec<RowValues>>` from a list of expressions.
///
/// ```rust
/// use sqldb::args;
///
/// let args = args![1_i32, "alice", Some(2.5_f64), None::<i64>].unwrap();
/// assert_eq!(args.len(), 4);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::core::result::Result::<::std::vec::Vec<$crate::RowValues>, $crate::SqlDbError>::Ok(
            ::std::vec::Vec::new(),
        )
    };
    ($($value:expr),+ $(,)?) => {
        $crate::values::collect_args(&[$(&$value as &dyn $crate::values::ToRowValue),+])
    };
}

pub(crate) fn mismatch(target: &str, value: &RowValues) -> SqlDbError {
    if value.is_null() {
        SqlDbError::ConversionError(format!(
            "cannot scan NULL into {target}; use Option<{target}>"
        ))
    } else {
        SqlDbError::ConversionError(format!("cannot scan {} into {target}", value.type_name()))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_int_text(text: &str, target: &str) -> Result<i64> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    trimmed
        .parse::<f64>()
        .map(|f| f as i64)
        .map_err(|_| SqlDbError::ConversionError(format!("cannot parse {text:?} as {target}")))
}

macro_rules! int_values {
    ($($t:ty),*) => {$(
        impl ToRowValue for $t {
            fn to_row_value(&self) -> Result<RowValues> {
                i64::try_from(*self).map(RowValues::Int).map_err(|e| {
                    SqlDbError::ConversionError(format!("{} {} out of range: {e}", stringify!($t), self))
                })
            }
        }

        impl ScanValue for $t {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            fn scan_value(&mut self, value: &RowValues) -> Result<()> {
                *self = match value {
                    RowValues::Int(i) => *i as $t,
                    RowValues::Float(f) => *f as $t,
                    RowValues::Bool(b) => <$t>::from(*b),
                    RowValues::Text(s) => parse_int_text(s, stringify!($t))? as $t,
                    other => return Err(mismatch(stringify!($t), other)),
                };
                Ok(())
            }
        }
    )*};
}

int_values!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ArrayElement for i8 {}
impl ArrayElement for i16 {}
impl ArrayElement for i32 {}
impl ArrayElement for i64 {}
impl ArrayElement for u16 {}
impl ArrayElement for u32 {}
impl ArrayElement for u64 {}

macro_rules! float_values {
    ($($t:ty),*) => {$(
        impl ToRowValue for $t {
            fn to_row_value(&self) -> Result<RowValues> {
                Ok(RowValues::Float(f64::from(*self)))
            }
        }

        impl ScanValue for $t {
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            fn scan_value(&mut self, value: &RowValues) -> Result<()> {
                *self = match value {
                    RowValues::Float(f) => *f as $t,
                    RowValues::Int(i) => *i as $t,
                    RowValues::Text(s) => s.trim().parse::<$t>().map_err(|e| {
                        SqlDbError::ConversionError(format!("cannot parse {s:?} as {}: {e}", stringify!($t)))
                    })?,
                    other => return Err(mismatch(stringify!($t), other)),
                };
                Ok(())
            }
        }

        impl ArrayElement for $t {}
    )*};
}

float_values!(f32, f64);

impl ToRowValue for bool {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Bool(*self))
    }
}

impl ScanValue for bool {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = match value {
            RowValues::Bool(b) => *b,
            RowValues::Int(i) => *i != 0,
            RowValues::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "on" => true,
                "f" | "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(SqlDbError::ConversionError(format!(
                        "cannot parse {s:?} as bool"
                    )));
                }
            },
            other => return Err(mismatch("bool", other)),
        };
        Ok(())
    }
}

impl ArrayElement for bool {}

impl ToRowValue for str {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Text(self.to_string()))
    }
}

impl ToRowValue for String {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Text(self.clone()))
    }
}

impl ScanValue for String {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = match value {
            RowValues::Text(s) => s.clone(),
            RowValues::Blob(b) => String::from_utf8(b.clone()).map_err(|e| {
                SqlDbError::ConversionError(format!("blob is not valid UTF-8: {e}"))
            })?,
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) => f.to_string(),
            RowValues::Bool(b) => b.to_string(),
            RowValues::Timestamp(ts) => ts.format("%F %T%.f").to_string(),
            RowValues::TimestampTz(ts) => ts.to_rfc3339(),
            RowValues::JSON(v) => v.to_string(),
            other => return Err(mismatch("String", other)),
        };
        Ok(())
    }
}

impl ArrayElement for String {}

impl ToRowValue for Vec<u8> {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Blob(self.clone()))
    }
}

impl ToRowValue for [u8] {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Blob(self.to_vec()))
    }
}

impl ScanValue for Vec<u8> {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = match value {
            RowValues::Blob(b) => b.clone(),
            RowValues::Text(s) => s.clone().into_bytes(),
            RowValues::Null => Vec::new(),
            other => return Err(mismatch("Vec<u8>", other)),
        };
        Ok(())
    }
}

impl ToRowValue for NaiveDateTime {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::Timestamp(*self))
    }
}

impl ScanValue for NaiveDateTime {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = value
            .as_timestamp()
            .ok_or_else(|| mismatch("NaiveDateTime", value))?;
        Ok(())
    }
}

impl ArrayElement for NaiveDateTime {}

impl ToRowValue for DateTime<Utc> {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::TimestampTz(self.fixed_offset()))
    }
}

impl ScanValue for DateTime<Utc> {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = value
            .as_timestamp_tz()
            .ok_or_else(|| mismatch("DateTime<Utc>", value))?
            .with_timezone(&Utc);
        Ok(())
    }
}

impl ArrayElement for DateTime<Utc> {}

impl ToRowValue for DateTime<FixedOffset> {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::TimestampTz(*self))
    }
}

impl ScanValue for DateTime<FixedOffset> {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = value
            .as_timestamp_tz()
            .ok_or_else(|| mismatch("DateTime<FixedOffset>", value))?;
        Ok(())
    }
}

impl ArrayElement for DateTime<FixedOffset> {}

impl ToRowValue for JsonValue {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(RowValues::JSON(self.clone()))
    }
}

impl ScanValue for JsonValue {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = match value {
            RowValues::JSON(v) => v.clone(),
            RowValues::Null => JsonValue::Null,
            RowValues::Text(s) => serde_json::from_str(s).map_err(|e| {
                SqlDbError::ConversionError(format!("cannot parse text as JSON: {e}"))
            })?,
            RowValues::Blob(b) => serde_json::from_slice(b).map_err(|e| {
                SqlDbError::ConversionError(format!("cannot parse blob as JSON: {e}"))
            })?,
            RowValues::Array(items) => array_to_json(items),
            other => return Err(mismatch("serde_json::Value", other)),
        };
        Ok(())
    }
}

impl ArrayElement for JsonValue {}

impl ToRowValue for RowValues {
    fn to_row_value(&self) -> Result<RowValues> {
        Ok(self.clone())
    }
}

impl ScanValue for RowValues {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        *self = value.clone();
        Ok(())
    }
}

impl<T: ToRowValue + ?Sized> ToRowValue for &T {
    fn to_row_value(&self) -> Result<RowValues> {
        (**self).to_row_value()
    }
}

impl<T: ToRowValue> ToRowValue for Option<T> {
    fn to_row_value(&self) -> Result<RowValues> {
        match self {
            Some(v) => v.to_row_value(),
            None => Ok(RowValues::Null),
        }
    }
}

impl<T: ScanValue + Default> ScanValue for Option<T> {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        let mut inner = T::default();
        inner.scan_value(value)?;
        *self = Some(inner);
        Ok(())
    }
}

impl<T: ArrayElement> ArrayElement for Option<T> {}

impl<T: ArrayElement> ToRowValue for Vec<T> {
    fn to_row_value(&self) -> Result<RowValues> {
        self.iter()
            .map(ToRowValue::to_row_value)
            .collect::<Result<Vec<_>>>()
            .map(RowValues::Array)
    }
}

impl<T: ArrayElement> ScanValue for Vec<T> {
    fn scan_value(&mut self, value: &RowValues) -> Result<()> {
        let items = match value {
            RowValues::Null => Vec::new(),
            RowValues::Array(items) => items.clone(),
            RowValues::Text(text) => split_array_literal(text)?,
            RowValues::JSON(JsonValue::Array(items)) => {
                items.iter().map(json_to_row_value).collect()
            }
            other => return Err(mismatch("Vec", other)),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            let mut element = T::default();
            element.scan_value(item)?;
            out.push(element);
        }
        *self = out;
        Ok(())
    }
}

impl<T: ArrayElement> ArrayElement for Vec<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn integers_wrap_and_truncate() -> Result<()> {
        let mut small: u8 = 0;
        small.scan_value(&RowValues::Int(300))?;
        assert_eq!(small, 44);

        let mut signed: i32 = 0;
        signed.scan_value(&RowValues::Float(-7.9))?;
        assert_eq!(signed, -7);

        let mut from_text: i64 = 0;
        from_text.scan_value(&RowValues::Text(" 42 ".into()))?;
        assert_eq!(from_text, 42);
        Ok(())
    }

    #[test]
    fn null_into_scalar_is_an_error() {
        let mut n: i64 = 5;
        let err = n.scan_value(&RowValues::Null).unwrap_err();
        assert!(err.to_string().contains("Option<i64>"));
        assert_eq!(n, 5);
    }

    #[test]
    fn null_into_option_and_slices() -> Result<()> {
        let mut opt = Some(3_i32);
        opt.scan_value(&RowValues::Null)?;
        assert_eq!(opt, None);

        let mut bytes = vec![1_u8, 2];
        bytes.scan_value(&RowValues::Null)?;
        assert!(bytes.is_empty());

        let mut list = vec!["x".to_string()];
        list.scan_value(&RowValues::Null)?;
        assert!(list.is_empty());
        Ok(())
    }

    #[test]
    fn strings_and_bytes_interchange() -> Result<()> {
        let mut s = String::new();
        s.scan_value(&RowValues::Blob(b"hello".to_vec()))?;
        assert_eq!(s, "hello");

        let mut b: Vec<u8> = Vec::new();
        b.scan_value(&RowValues::Text("hi".into()))?;
        assert_eq!(b, b"hi");
        Ok(())
    }

    #[test]
    fn vec_binds_as_array_but_bytes_as_blob() -> Result<()> {
        assert_eq!(
            vec![true, false].to_row_value()?,
            RowValues::Array(vec![RowValues::Bool(true), RowValues::Bool(false)])
        );
        assert_eq!(vec![1_u8, 2].to_row_value()?, RowValues::Blob(vec![1, 2]));
        Ok(())
    }

    #[test]
    fn vec_scans_from_postgres_literal() -> Result<()> {
        let mut names: Vec<Option<String>> = Vec::new();
        names.scan_value(&RowValues::Text(r#"{alpha,"b,c",NULL}"#.into()))?;
        assert_eq!(
            names,
            vec![Some("alpha".to_string()), Some("b,c".to_string()), None]
        );

        let mut numbers: Vec<i64> = Vec::new();
        numbers.scan_value(&RowValues::Text("[1, 2, 3]".into()))?;
        assert_eq!(numbers, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn timestamps_scan_from_text() -> Result<()> {
        let mut ts = NaiveDateTime::default();
        ts.scan_value(&RowValues::Text("2023-01-02 03:04:05".into()))?;
        let expected = NaiveDate::from_ymd_opt(2023, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .expect("valid date");
        assert_eq!(ts, expected);
        Ok(())
    }

    #[test]
    fn args_macro_collects() -> Result<()> {
        let name = String::from("bob");
        let values = crate::args![1_i32, &name, "x", None::<bool>, vec![1_i64, 2]]?;
        assert_eq!(
            values,
            vec![
                RowValues::Int(1),
                RowValues::Text("bob".into()),
                RowValues::Text("x".into()),
                RowValues::Null,
                RowValues::Array(vec![RowValues::Int(1), RowValues::Int(2)]),
            ]
        );
        Ok(())
    }
}
