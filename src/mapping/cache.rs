use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use crate::error::{Result, SqlDbError};
use crate::types::RowValues;

use super::field::{FieldMut, FieldRef, Record, RecordFields, StructField};
use super::filter::{ColumnFilter, ignored_by};
use super::mapper::{FieldFlags, FieldMapper};

/// Embedding deeper than this is treated as a self-embedding record.
pub const MAX_EMBED_DEPTH: usize = 32;

/// One column of a struct mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub flags: FieldFlags,
    /// Field indices from the outer record down through embedded records.
    pub field_path: Vec<usize>,
}

/// The ordered columns of a record type under one field mapper.
#[derive(Debug)]
pub struct StructMapping {
    pub record_type: &'static str,
    /// Set when a column carries `primarykey=<table>`.
    pub table_name: Option<String>,
    pub columns: Vec<ColumnInfo>,
    by_name: HashMap<String, usize>,
}

impl StructMapping {
    /// Walk `fields` depth-first in declaration order.
    ///
    /// # Errors
    /// Returns `ConfigError` for duplicate column names, conflicting table
    /// annotations, embedded fields tagged with a column name, or embedding
    /// deeper than [`MAX_EMBED_DEPTH`].
    pub fn build(
        record_type: &'static str,
        fields: &[StructField],
        mapper: &dyn FieldMapper,
    ) -> Result<Self> {
        let mut walk = Walk {
            record_type,
            mapper,
            columns: Vec::new(),
            table_name: None,
        };
        walk.fields(fields, &[], 0)?;

        let mut by_name = HashMap::with_capacity(walk.columns.len());
        for (idx, column) in walk.columns.iter().enumerate() {
            if by_name.insert(column.name.clone(), idx).is_some() {
                return Err(SqlDbError::ConfigError(format!(
                    "{record_type}: column {:?} is mapped by more than one field",
                    column.name
                )));
            }
        }

        Ok(StructMapping {
            record_type,
            table_name: walk.table_name,
            columns: walk.columns,
            by_name,
        })
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.by_name.get(name).map(|&idx| &self.columns[idx])
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().filter(|c| c.flags.primary_key).collect()
    }

    /// Line result columns up with record fields.
    ///
    /// Every result column must name a mapped field, no field may be targeted
    /// twice, and every mapped field must receive a column.
    ///
    /// # Errors
    /// Returns `ShapeError` describing the first mismatch found.
    pub fn scan_plan(&self, result_columns: &[String]) -> Result<Vec<&ColumnInfo>> {
        let mut assigned: Vec<Option<usize>> = vec![None; self.columns.len()];
        let mut plan = Vec::with_capacity(result_columns.len());
        for (col_idx, name) in result_columns.iter().enumerate() {
            let Some(&field_idx) = self.by_name.get(name) else {
                return Err(SqlDbError::ShapeError(format!(
                    "{}: result column {name:?} at index {col_idx} has no mapped field",
                    self.record_type
                )));
            };
            if let Some(previous) = assigned[field_idx] {
                return Err(SqlDbError::ShapeError(format!(
                    "{}: result columns {previous} and {col_idx} both map to {name:?}",
                    self.record_type
                )));
            }
            assigned[field_idx] = Some(col_idx);
            plan.push(&self.columns[field_idx]);
        }

        let unfilled: Vec<String> = assigned
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_none())
            .map(|(idx, _)| format!("{:?} (field {idx})", self.columns[idx].name))
            .collect();
        if !unfilled.is_empty() {
            return Err(SqlDbError::ShapeError(format!(
                "{}: no result column for {}",
                self.record_type,
                unfilled.join(", ")
            )));
        }
        Ok(plan)
    }

    /// Scan one row into `record` following [`StructMapping::scan_plan`].
    ///
    /// # Errors
    /// Returns `ShapeError` for mismatched columns or `ConversionError` from the field.
    pub fn scan_row(
        &self,
        record: &mut dyn RecordFields,
        result_columns: &[String],
        values: &[RowValues],
    ) -> Result<()> {
        if result_columns.len() != values.len() {
            return Err(SqlDbError::ShapeError(format!(
                "{}: {} columns but {} values",
                self.record_type,
                result_columns.len(),
                values.len()
            )));
        }
        let plan = self.scan_plan(result_columns)?;
        for (column, value) in plan.into_iter().zip(values) {
            field_scanner(&mut *record, &column.field_path)?
                .scan_value(value)
                .map_err(|e| match e {
                    SqlDbError::ConversionError(msg) => SqlDbError::ConversionError(format!(
                        "{}.{}: {msg}",
                        self.record_type, column.name
                    )),
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Collect the columns of `record` that survive `filters`.
    ///
    /// # Errors
    /// Returns `ConversionError` when a field cannot be converted.
    pub fn gather(
        &self,
        record: &dyn RecordFields,
        filters: &[&dyn ColumnFilter],
    ) -> Result<GatheredColumns> {
        let mut gathered = GatheredColumns::default();
        for column in &self.columns {
            let value = field_value(record, &column.field_path)?.to_row_value()?;
            if ignored_by(filters, column, &value) {
                continue;
            }
            if column.flags.primary_key {
                gathered.primary_key_indices.push(gathered.columns.len());
            }
            gathered.columns.push(column.clone());
            gathered.values.push(value);
        }
        Ok(gathered)
    }
}

/// Parallel arrays of surviving columns and their values.
#[derive(Debug, Default, Clone)]
pub struct GatheredColumns {
    pub columns: Vec<ColumnInfo>,
    pub primary_key_indices: Vec<usize>,
    pub values: Vec<RowValues>,
}

impl GatheredColumns {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

struct Walk<'m> {
    record_type: &'static str,
    mapper: &'m dyn FieldMapper,
    columns: Vec<ColumnInfo>,
    table_name: Option<String>,
}

impl Walk<'_> {
    fn fields(&mut self, fields: &[StructField], prefix: &[usize], depth: usize) -> Result<()> {
        if depth > MAX_EMBED_DEPTH {
            return Err(SqlDbError::ConfigError(format!(
                "{}: embedded records nested deeper than {MAX_EMBED_DEPTH}; does the record embed itself?",
                self.record_type
            )));
        }
        for (idx, field) in fields.iter().enumerate() {
            let mapping = self.mapper.map_field(field);
            if !mapping.used {
                continue;
            }
            let mut path = prefix.to_vec();
            path.push(idx);

            if let Some(embedded) = &field.embedded {
                if let Some(column) = &mapping.column {
                    return Err(SqlDbError::ConfigError(format!(
                        "{}: embedded field {} of type {} cannot map to the single column {column:?}",
                        self.record_type,
                        field.name,
                        (embedded.type_name)()
                    )));
                }
                self.fields((embedded.fields)(), &path, depth + 1)?;
                continue;
            }

            let Some(name) = mapping.column else {
                continue;
            };
            if let Some(table) = mapping.table {
                match &self.table_name {
                    Some(existing) if *existing != table => {
                        return Err(SqlDbError::ConfigError(format!(
                            "{}: conflicting table annotations {existing:?} and {table:?}",
                            self.record_type
                        )));
                    }
                    _ => self.table_name = Some(table),
                }
            }
            self.columns.push(ColumnInfo {
                name,
                flags: mapping.flags,
                field_path: path,
            });
        }
        Ok(())
    }
}

fn inaccessible(path: &[usize]) -> SqlDbError {
    SqlDbError::ConfigError(format!("field at path {path:?} is not accessible"))
}

/// Resolve a field for reading.
///
/// # Errors
/// Returns `ConfigError` when the path does not lead to an accessible value field.
pub fn field_value<'a>(
    record: &'a dyn RecordFields,
    path: &[usize],
) -> Result<&'a dyn crate::values::ToRowValue> {
    match path {
        [] => Err(inaccessible(path)),
        [last] => match record.field_ref(*last) {
            Some(FieldRef::Value(value)) => Ok(value),
            _ => Err(inaccessible(path)),
        },
        [first, rest @ ..] => match record.field_ref(*first) {
            Some(FieldRef::Embedded(inner)) => field_value(inner, rest),
            _ => Err(inaccessible(path)),
        },
    }
}

/// Resolve a field for scanning.
///
/// # Errors
/// Returns `ConfigError` when the path does not lead to an accessible value field.
pub fn field_scanner<'a>(
    record: &'a mut dyn RecordFields,
    path: &[usize],
) -> Result<&'a mut dyn crate::values::ScanValue> {
    match path {
        [] => Err(inaccessible(path)),
        [last] => match record.field_mut(*last) {
            Some(FieldMut::Value(value)) => Ok(value),
            _ => Err(inaccessible(path)),
        },
        [first, rest @ ..] => match record.field_mut(*first) {
            Some(FieldMut::Embedded(inner)) => field_scanner(inner, rest),
            _ => Err(inaccessible(path)),
        },
    }
}

type MappingCache = LazyLock<Mutex<HashMap<(TypeId, String), Arc<StructMapping>>>>;

static MAPPINGS: MappingCache = LazyLock::new(|| Mutex::new(HashMap::new()));

/// The memoized mapping of `T` under `mapper`.
///
/// Mappings are computed on first use and never evicted.
///
/// # Errors
/// Propagates [`StructMapping::build`] errors; failures are not cached.
pub fn struct_mapping<T: Record>(mapper: &dyn FieldMapper) -> Result<Arc<StructMapping>> {
    let key = (TypeId::of::<T>(), mapper.cache_key());
    {
        let cache = match MAPPINGS.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mapping) = cache.get(&key) {
            return Ok(Arc::clone(mapping));
        }
    }

    let mapping = Arc::new(StructMapping::build(
        std::any::type_name::<T>(),
        T::struct_fields(),
        mapper,
    )?);

    let mut cache = match MAPPINGS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    Ok(Arc::clone(cache.entry(key).or_insert(mapping)))
}
