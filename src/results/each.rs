use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

use crate::context::Context;
use crate::error::{Result, SqlDbError, panic_message};
use crate::mapping::{Record, struct_mapping};
use crate::types::RowValues;
use crate::values::ScanValue;

use super::rows::Rows;

/// A tuple of column destinations, scanned fresh for each row.
pub trait ScanRow: Sized {
    const ARITY: usize;

    /// # Errors
    /// `ConversionError` when a value does not fit its slot.
    fn scan_row(values: &[RowValues]) -> Result<Self>;
}

fn slot<T: ScanValue + Default>(values: &[RowValues], idx: usize) -> Result<T> {
    let value = values.get(idx).ok_or_else(|| {
        SqlDbError::CallerError(format!("row has no column at index {idx}"))
    })?;
    let mut out = T::default();
    out.scan_value(value)?;
    Ok(out)
}

macro_rules! impl_scan_row {
    ($arity:expr; $($t:ident $idx:tt),+) => {
        impl<$($t: ScanValue + Default),+> ScanRow for ($($t,)+) {
            const ARITY: usize = $arity;

            fn scan_row(values: &[RowValues]) -> Result<Self> {
                Ok(($(slot::<$t>(values, $idx)?,)+))
            }
        }
    };
}

impl_scan_row!(1; A 0);
impl_scan_row!(2; A 0, B 1);
impl_scan_row!(3; A 0, B 1, C 2);
impl_scan_row!(4; A 0, B 1, C 2, D 3);
impl_scan_row!(5; A 0, B 1, C 2, D 3, E 4);
impl_scan_row!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_scan_row!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_scan_row!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

impl Rows {
    /// Call `f` with each row's columns as a typed tuple.
    ///
    /// The tuple arity must match the column count. Cancellation is checked
    /// before every row; a panic in `f` stops iteration with
    /// [`SqlDbError::CallbackPanic`]. The cursor is closed on return.
    ///
    /// ```rust
    /// # use sqldb::prelude::*;
    /// # fn demo(rows: Rows) -> Result<(), SqlDbError> {
    /// let mut total = 0;
    /// rows.for_each_row_values(|(id, name): (i64, String)| {
    ///     total += id;
    ///     println!("{name}");
    ///     Ok(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// `CallerError` on arity mismatch, the stored query error, cancellation,
    /// scan errors, or the first error `f` returns.
    pub fn for_each_row_values<A, F>(self, mut f: F) -> Result<()>
    where
        A: ScanRow,
        F: FnMut(A) -> Result<()>,
    {
        self.for_each_row_values_ctx(|_, args| f(args))
    }

    /// [`Rows::for_each_row_values`] with the cursor's context passed first.
    ///
    /// # Errors
    /// As [`Rows::for_each_row_values`].
    pub fn for_each_row_values_ctx<A, F>(mut self, mut f: F) -> Result<()>
    where
        A: ScanRow,
        F: FnMut(&Context, A) -> Result<()>,
    {
        if self.err().is_none() && self.columns().len() != A::ARITY {
            let err = SqlDbError::CallerError(format!(
                "callback takes {} columns, result has {}",
                A::ARITY,
                self.columns().len()
            ));
            self.close()?;
            return Err(err);
        }
        self.drive(|rows| {
            let args = A::scan_row(&rows.current()?.values)?;
            let ctx = rows.ctx.clone();
            guarded(|| f(&ctx, args))
        })
    }

    /// Call `f` with each row scanned into a fresh record.
    ///
    /// # Errors
    /// `ShapeError` when the columns do not match `T`; otherwise as
    /// [`Rows::for_each_row_values`].
    pub fn for_each_struct<T, F>(self, mut f: F) -> Result<()>
    where
        T: Record + Default,
        F: FnMut(T) -> Result<()>,
    {
        self.for_each_struct_ctx(|_, record| f(record))
    }

    /// [`Rows::for_each_struct`] with the cursor's context passed first.
    ///
    /// # Errors
    /// As [`Rows::for_each_struct`].
    pub fn for_each_struct_ctx<T, F>(mut self, mut f: F) -> Result<()>
    where
        T: Record + Default,
        F: FnMut(&Context, T) -> Result<()>,
    {
        if self.err().is_none() {
            let plan = struct_mapping::<T>(self.mapper.as_ref())
                .and_then(|mapping| mapping.scan_plan(self.columns()).map(|_| ()));
            if let Err(err) = plan {
                self.close()?;
                return Err(err);
            }
        }
        self.drive(|rows| {
            let mut record = T::default();
            rows.scan_struct(&mut record)?;
            let ctx = rows.ctx.clone();
            guarded(|| f(&ctx, record))
        })
    }

    fn drive(mut self, mut per_row: impl FnMut(&Rows) -> Result<()>) -> Result<()> {
        let result = loop {
            if let Err(err) = self.ctx.check() {
                break Err(err);
            }
            if !self.next() {
                break self.take_err().map_or(Ok(()), Err);
            }
            if let Err(err) = per_row(&self) {
                break Err(err);
            }
        };
        self.close()?;
        result
    }
}

fn guarded(f: impl FnOnce() -> Result<()>) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "row callback panicked");
            Err(SqlDbError::CallbackPanic(message))
        }
    }
}
