use std::sync::Arc;

use crate::error::{Result, SqlDbError};
use crate::mapping::{ColumnFilter, GatheredColumns, Record, StructMapping, struct_mapping};
use crate::query::QueryAndParams;

use super::{StatementBuilder, no_values};

impl StatementBuilder<'_> {
    /// The cached mapping of `T` under this builder's field mapper.
    ///
    /// # Errors
    /// `ConfigError` if `T` does not map cleanly.
    pub fn mapping<T: Record>(&self) -> Result<Arc<StructMapping>> {
        struct_mapping::<T>(self.mapper)
    }

    fn gather<T: Record>(
        &self,
        record: &T,
        filters: &[&dyn ColumnFilter],
        verb: &str,
    ) -> Result<(Arc<StructMapping>, GatheredColumns)> {
        let mapping = self.mapping::<T>()?;
        let gathered = mapping.gather(record, filters)?;
        if gathered.is_empty() {
            return Err(no_values(verb));
        }
        Ok((mapping, gathered))
    }

    /// Insert the columns of `record` that survive `filters`, in declaration
    /// order with embedded records flattened in place.
    ///
    /// # Errors
    /// `CallerError` when every column is filtered, `ConfigError` for a bad
    /// mapping or identifier, `ConversionError` for unconvertible fields.
    pub fn insert_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        filters: &[&dyn ColumnFilter],
    ) -> Result<QueryAndParams> {
        let (_, gathered) = self.gather(record, filters, "insert")?;
        let (sql, _) = self.insert_head(table, gathered.names())?;
        Ok(QueryAndParams::new(sql, gathered.values))
    }

    /// One insert statement per record.
    ///
    /// # Errors
    /// As [`StatementBuilder::insert_struct`], for the first failing record.
    pub fn insert_structs<T: Record>(
        &self,
        table: &str,
        records: &[T],
        filters: &[&dyn ColumnFilter],
    ) -> Result<Vec<QueryAndParams>> {
        records
            .iter()
            .map(|record| self.insert_struct(table, record, filters))
            .collect()
    }

    /// [`StatementBuilder::insert_unique`] for a record.
    ///
    /// # Errors
    /// As [`StatementBuilder::insert_struct`].
    pub fn insert_unique_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        on_conflict: &str,
        filters: &[&dyn ColumnFilter],
    ) -> Result<QueryAndParams> {
        let mut qp = self.insert_struct(table, record, filters)?;
        qp.query
            .push_str(&format!(" ON CONFLICT ({on_conflict}) DO NOTHING RETURNING TRUE"));
        Ok(qp)
    }

    /// [`StatementBuilder::insert_returning`] for a record.
    ///
    /// # Errors
    /// As [`StatementBuilder::insert_struct`].
    pub fn insert_returning_struct<T: Record>(
        &self,
        table: &str,
        record: &T,
        returning: &str,
        filters: &[&dyn ColumnFilter],
    ) -> Result<QueryAndParams> {
        let mut qp = self.insert_struct(table, record, filters)?;
        qp.query.push_str(" RETURNING ");
        qp.query.push_str(returning);
        Ok(qp)
    }

    /// Insert `record` into the table named by its primary key tag, updating
    /// every column that is neither primary key nor read-only on conflict.
    ///
    /// # Errors
    /// `ConfigError` when the mapping has no table or no primary key survives
    /// the filters; otherwise as [`StatementBuilder::insert_struct`].
    pub fn upsert_struct<T: Record>(
        &self,
        record: &T,
        filters: &[&dyn ColumnFilter],
    ) -> Result<QueryAndParams> {
        let (mapping, gathered) = self.gather(record, filters, "upsert")?;
        let table = record_table(&mapping)?;
        require_primary_key(&mapping, &gathered)?;

        let (sql, _) = self.insert_head(table, gathered.names())?;
        let conflict: Vec<&str> = gathered
            .primary_key_indices
            .iter()
            .map(|&idx| gathered.columns[idx].name.as_str())
            .collect();
        let updates: Vec<(usize, &str)> = gathered
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.flags.primary_key && !c.flags.read_only)
            .map(|(idx, c)| (idx, c.name.as_str()))
            .collect();

        let mut qp = QueryAndParams::new(sql, gathered.values);
        self.append_on_conflict(&mut qp, conflict, &updates)?;
        Ok(qp)
    }

    /// `UPDATE <table> SET ... WHERE "pk1"=<ph> AND ...` for `record`.
    ///
    /// Primary key and read-only columns are never set. Only referenced values
    /// are bound, numbered in declaration order.
    ///
    /// # Errors
    /// `ConfigError` when the mapping has no table or no primary key survives
    /// the filters; `CallerError` when nothing is left to set.
    pub fn update_struct<T: Record>(
        &self,
        record: &T,
        filters: &[&dyn ColumnFilter],
    ) -> Result<QueryAndParams> {
        let (mapping, gathered) = self.gather(record, filters, "update")?;
        let table = self.formatter.format_table_name(record_table(&mapping)?)?;
        require_primary_key(&mapping, &gathered)?;

        let settable = |idx: usize| {
            let flags = gathered.columns[idx].flags;
            !flags.primary_key && !flags.read_only
        };
        let set_idx: Vec<usize> = (0..gathered.columns.len()).filter(|&i| settable(i)).collect();
        let pk_idx = gathered.primary_key_indices.clone();
        if set_idx.is_empty() {
            return Err(no_values("update"));
        }

        // Bind order: declaration order for numbered placeholders, text order
        // for positional ones.
        let bind_order: Vec<usize> = if self.formatter.placeholder_style().is_positional() {
            set_idx.iter().chain(pk_idx.iter()).copied().collect()
        } else {
            let mut all: Vec<usize> = set_idx.iter().chain(pk_idx.iter()).copied().collect();
            all.sort_unstable();
            all
        };
        let placeholder_of = |idx: usize| {
            let pos = bind_order.iter().position(|&i| i == idx).unwrap_or_default();
            self.formatter.placeholder(pos)
        };

        let mut sets = Vec::with_capacity(set_idx.len());
        for &idx in &set_idx {
            sets.push(format!(
                "{}={}",
                self.quoted(&gathered.columns[idx].name)?,
                placeholder_of(idx)
            ));
        }
        let mut wheres = Vec::with_capacity(pk_idx.len());
        for &idx in &pk_idx {
            wheres.push(format!(
                "{}={}",
                self.quoted(&gathered.columns[idx].name)?,
                placeholder_of(idx)
            ));
        }

        let sql = format!(
            "UPDATE {table} SET {} WHERE {}",
            sets.join(","),
            wheres.join(" AND ")
        );
        let params = bind_order
            .iter()
            .map(|&idx| gathered.values[idx].clone())
            .collect();
        Ok(QueryAndParams::new(sql, params))
    }
}

fn record_table(mapping: &StructMapping) -> Result<&str> {
    mapping.table_name.as_deref().ok_or_else(|| {
        SqlDbError::ConfigError(format!(
            "{}: no table name, tag a primary key field with pk=<table>",
            mapping.record_type
        ))
    })
}

fn require_primary_key(mapping: &StructMapping, gathered: &GatheredColumns) -> Result<()> {
    if gathered.primary_key_indices.is_empty() {
        return Err(SqlDbError::ConfigError(format!(
            "{} has no primary key column",
            mapping.record_type
        )));
    }
    Ok(())
}
