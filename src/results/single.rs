use crate::error::{Result, SqlDbError};
use crate::mapping::Record;
use crate::types::RowValues;
use crate::values::ScanValue;

use super::rows::Rows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Before,
    OnRow,
    Done,
}

/// The first row of a query.
///
/// `Row` follows the cursor protocol of [`Rows`] for exactly one row:
/// `next` returns `true` once when a row exists, then `false`. `scan`
/// moves onto the row itself when `next` was not called, so the
/// consuming helpers can be used directly.
///
/// A row for a failed query carries the failure: `next` returns `false`
/// and `err` reports it, and the first scan returns it. An empty result
/// scans as [`SqlDbError::NoRows`].
#[derive(Debug)]
pub struct Row {
    rows: Rows,
    position: Position,
}

impl Row {
    #[must_use]
    pub fn new(rows: Rows) -> Self {
        Self {
            rows,
            position: Position::Before,
        }
    }

    /// Move onto the row; `true` once when there is one.
    pub fn next(&mut self) -> bool {
        if self.position == Position::Before && self.rows.next() {
            self.position = Position::OnRow;
            return true;
        }
        self.position = Position::Done;
        false
    }

    #[must_use]
    pub fn err(&self) -> Option<&SqlDbError> {
        self.rows.err()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.rows.columns()
    }

    /// Idempotent; later scans report `NoRows` or the stored error.
    ///
    /// # Errors
    /// As [`Rows::close`].
    pub fn close(&mut self) -> Result<()> {
        self.position = Position::Done;
        self.rows.close()
    }

    fn on_row(&mut self) -> Result<()> {
        let position = self.position;
        match position {
            Position::OnRow => Ok(()),
            Position::Before if self.next() => Ok(()),
            _ => {
                let err = self.rows.take_err().unwrap_or(SqlDbError::NoRows);
                self.close()?;
                Err(err)
            }
        }
    }

    fn done<T>(mut self, result: Result<T>) -> Result<T> {
        self.close()?;
        result
    }

    /// Scan the row positionally, moving onto it first if needed.
    ///
    /// # Errors
    /// The stored query error, `NoRows`, or a scan error.
    pub fn scan(&mut self, destinations: &mut [&mut dyn ScanValue]) -> Result<()> {
        self.on_row()?;
        self.rows.scan(destinations)
    }

    /// Scan a single-column row into a fresh `T`.
    ///
    /// # Errors
    /// As [`Row::scan`].
    pub fn scan_value<T: ScanValue + Default>(mut self) -> Result<T> {
        let mut value = T::default();
        let result = self.scan(&mut [&mut value]);
        self.done(result)?;
        Ok(value)
    }

    /// # Errors
    /// The stored query error or `NoRows`.
    pub fn scan_values(mut self) -> Result<Vec<RowValues>> {
        self.on_row()?;
        let result = self.rows.scan_values();
        self.done(result)
    }

    /// # Errors
    /// The stored query error, `NoRows`, or a shape mismatch.
    pub fn scan_struct<T: Record>(mut self, record: &mut T) -> Result<()> {
        self.on_row()?;
        let result = self.rows.scan_struct(record);
        self.done(result)
    }

    /// Scan into `slot`, allocating a default record first when it is empty.
    ///
    /// # Errors
    /// As [`Row::scan_struct`]; `slot` is left untouched on `NoRows`.
    pub fn scan_struct_or_insert<T: Record + Default>(mut self, slot: &mut Option<T>) -> Result<()> {
        self.on_row()?;
        let record = slot.get_or_insert_with(T::default);
        let result = self.rows.scan_struct(record);
        self.done(result)
    }

    /// # Errors
    /// As [`Row::scan_struct`].
    pub fn into_struct<T: Record + Default>(self) -> Result<T> {
        let mut record = T::default();
        self.scan_struct(&mut record)?;
        Ok(record)
    }
}
