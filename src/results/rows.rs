use std::sync::Arc;

use crate::context::Context;
use crate::error::{Result, SqlDbError};
use crate::mapping::{FieldMapper, Record, struct_mapping};
use crate::types::RowValues;
use crate::values::{ScanValue, array_to_json};

use super::result_set::ResultSet;
use super::row::CustomDbRow;

/// Forward-only cursor over a result.
///
/// A fresh cursor sits before the first row; call [`Rows::next`] before every
/// scan, including the first. When `next` returns `false`, [`Rows::err`]
/// tells end-of-stream apart from failure.
///
/// ```rust
/// # use sqldb::prelude::*;
/// # fn demo(mut rows: Rows) -> Result<(), SqlDbError> {
/// while rows.next() {
///     let mut id = 0_i64;
///     let mut name = String::new();
///     rows.scan(&mut [&mut id, &mut name])?;
/// }
/// if let Some(err) = rows.take_err() {
///     return Err(err);
/// }
/// rows.close()
/// # }
/// ```
pub struct Rows {
    columns: Arc<Vec<String>>,
    pending: std::vec::IntoIter<CustomDbRow>,
    current: Option<CustomDbRow>,
    err: Option<SqlDbError>,
    closed: bool,
    pub(crate) mapper: Arc<dyn FieldMapper>,
    pub(crate) ctx: Context,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("remaining", &self.pending.len())
            .field("err", &self.err)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Rows {
    #[must_use]
    pub fn new(set: ResultSet, mapper: Arc<dyn FieldMapper>, ctx: Context) -> Self {
        Self {
            columns: Arc::clone(set.get_column_names()),
            pending: set.into_iter(),
            current: None,
            err: None,
            closed: false,
            mapper,
            ctx,
        }
    }

    /// A cursor that yields no rows and reports `err`.
    #[must_use]
    pub fn from_error(err: SqlDbError, mapper: Arc<dyn FieldMapper>, ctx: Context) -> Self {
        let mut rows = Self::new(ResultSet::default(), mapper, ctx);
        rows.err = Some(err);
        rows
    }

    /// Advance to the next row. Returns `false` at the end, after an error,
    /// or once closed.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.closed || self.err.is_some() {
            self.current = None;
            return false;
        }
        if let Some(err) = self.ctx.err() {
            self.err = Some(err);
            self.current = None;
            return false;
        }
        self.current = self.pending.next();
        if self.current.is_none() {
            self.closed = true;
        }
        self.current.is_some()
    }

    #[must_use]
    pub fn err(&self) -> Option<&SqlDbError> {
        self.err.as_ref()
    }

    pub fn take_err(&mut self) -> Option<SqlDbError> {
        self.err.take()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The row `next` moved to.
    ///
    /// # Errors
    /// `CallerError` when `next` has not returned `true` for this row.
    pub fn current(&self) -> Result<&CustomDbRow> {
        self.current.as_ref().ok_or_else(|| {
            SqlDbError::CallerError("scan called without a successful next()".to_string())
        })
    }

    /// Scan the current row into one destination per column.
    ///
    /// # Errors
    /// `CallerError` if the destination count differs from the column count,
    /// `ConversionError` from the destinations.
    pub fn scan(&self, destinations: &mut [&mut dyn ScanValue]) -> Result<()> {
        let row = self.current()?;
        if destinations.len() != row.values.len() {
            return Err(SqlDbError::CallerError(format!(
                "scan expects {} destinations, got {}",
                row.values.len(),
                destinations.len()
            )));
        }
        for (idx, (dest, value)) in destinations.iter_mut().zip(&row.values).enumerate() {
            dest.scan_value(value).map_err(|e| match e {
                SqlDbError::ConversionError(msg) => SqlDbError::ConversionError(format!(
                    "column {:?} (index {idx}): {msg}",
                    self.columns.get(idx).map_or("", String::as_str)
                )),
                other => other,
            })?;
        }
        Ok(())
    }

    /// The current row's raw values.
    ///
    /// # Errors
    /// `CallerError` without a current row.
    pub fn scan_values(&self) -> Result<Vec<RowValues>> {
        Ok(self.current()?.values.clone())
    }

    /// Scan the current row into `record` by column name.
    ///
    /// # Errors
    /// `ShapeError` when columns and mapped fields differ.
    pub fn scan_struct<T: Record>(&self, record: &mut T) -> Result<()> {
        let row = self.current()?;
        let mapping = struct_mapping::<T>(self.mapper.as_ref())?;
        mapping.scan_row(record, &self.columns, &row.values)
    }

    /// Scan every remaining row into a new record, then close.
    ///
    /// # Errors
    /// The stored query error, or the first scan error.
    pub fn scan_struct_slice<T: Record + Default>(mut self) -> Result<Vec<T>> {
        let result = self.collect_remaining(|rows| {
            let mut record = T::default();
            rows.scan_struct(&mut record)?;
            Ok(record)
        });
        self.finish(result)
    }

    /// Scan the single column of every remaining row, then close.
    ///
    /// # Errors
    /// `CallerError` unless the result has exactly one column.
    pub fn scan_slice<T: ScanValue + Default>(mut self) -> Result<Vec<T>> {
        if self.err.is_none() && self.columns.len() != 1 {
            let err = SqlDbError::CallerError(format!(
                "scan_slice needs exactly one column, result has {}",
                self.columns.len()
            ));
            return self.finish(Err(err));
        }
        let result = self.collect_remaining(|rows| {
            let mut value = T::default();
            rows.scan(&mut [&mut value])?;
            Ok(value)
        });
        self.finish(result)
    }

    /// Every remaining row rendered as strings, optionally headed by the
    /// column names. NULL renders as an empty string. Closes the cursor.
    ///
    /// # Errors
    /// The stored query error or cancellation.
    pub fn scan_all_rows_as_strings(mut self, include_header: bool) -> Result<Vec<Vec<String>>> {
        let header = include_header.then(|| self.columns.to_vec());
        let result = self
            .collect_remaining(|rows| Ok(rows.current()?.values.iter().map(display_value).collect()))
            .map(|body: Vec<Vec<String>>| header.into_iter().chain(body).collect());
        self.finish(result)
    }

    /// Release the cursor. Closing twice is a no-op.
    ///
    /// # Errors
    /// Always succeeds for materialized results.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.current = None;
            self.pending = Vec::new().into_iter();
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn collect_remaining<T>(&mut self, mut each: impl FnMut(&Self) -> Result<T>) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.pending.len());
        while self.next() {
            out.push(each(&*self)?);
        }
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.close()?;
        result
    }
}

fn display_value(value: &RowValues) -> String {
    match value {
        RowValues::Null => String::new(),
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => f.to_string(),
        RowValues::Text(s) => s.clone(),
        RowValues::Bool(b) => b.to_string(),
        RowValues::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        RowValues::TimestampTz(ts) => ts.to_rfc3339(),
        RowValues::JSON(v) => v.to_string(),
        RowValues::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        RowValues::Array(items) => array_to_json(items).to_string(),
    }
}
