use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SqlDbError};
use crate::types::RowValues;
use crate::values::ScanValue;

/// One materialized row, with column names shared across its result set.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<RowValues>,
    column_index: Arc<HashMap<String, usize>>,
}

pub(crate) fn index_columns(column_names: &[String]) -> Arc<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        // First occurrence wins for duplicated names.
        index.entry(name.clone()).or_insert(i);
    }
    Arc::new(index)
}

impl CustomDbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let column_index = index_columns(&column_names);
        Self {
            column_names,
            values,
            column_index,
        }
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        column_index: Arc<HashMap<String, usize>>,
        values: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index,
        }
    }

    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Value of the named column, or `None` if there is no such column.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    /// Scan the named column into a fresh `T`.
    ///
    /// # Errors
    /// `ShapeError` for an unknown column, `ConversionError` if the value does not fit `T`.
    pub fn get_as<T: ScanValue + Default>(&self, column_name: &str) -> Result<T> {
        let value = self.get(column_name).ok_or_else(|| {
            SqlDbError::ShapeError(format!("no column named {column_name:?}"))
        })?;
        let mut out = T::default();
        out.scan_value(value)?;
        Ok(out)
    }
}
