use std::collections::HashSet;

use crate::types::RowValues;

use super::cache::ColumnInfo;

/// Excludes columns from a generated statement.
///
/// Filters compose as a list; a column is dropped if any filter ignores it.
/// Any `Fn(&ColumnInfo, &RowValues) -> bool` is a filter.
pub trait ColumnFilter: Send + Sync {
    fn ignore_column(&self, column: &ColumnInfo, value: &RowValues) -> bool;
}

impl<F> ColumnFilter for F
where
    F: Fn(&ColumnInfo, &RowValues) -> bool + Send + Sync,
{
    fn ignore_column(&self, column: &ColumnInfo, value: &RowValues) -> bool {
        self(column, value)
    }
}

pub(crate) fn ignored_by(filters: &[&dyn ColumnFilter], column: &ColumnInfo, value: &RowValues) -> bool {
    filters.iter().any(|f| f.ignore_column(column, value))
}

/// Ignore the named columns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreColumns(HashSet<String>);

impl IgnoreColumns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl ColumnFilter for IgnoreColumns {
    fn ignore_column(&self, column: &ColumnInfo, _value: &RowValues) -> bool {
        self.0.contains(&column.name)
    }
}

/// Ignore every column except the named ones.
#[derive(Debug, Clone, Default)]
pub struct OnlyColumns(HashSet<String>);

impl OnlyColumns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl ColumnFilter for OnlyColumns {
    fn ignore_column(&self, column: &ColumnInfo, _value: &RowValues) -> bool {
        !self.0.contains(&column.name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnorePrimaryKey;

impl ColumnFilter for IgnorePrimaryKey {
    fn ignore_column(&self, column: &ColumnInfo, _value: &RowValues) -> bool {
        column.flags.primary_key
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreReadOnly;

impl ColumnFilter for IgnoreReadOnly {
    fn ignore_column(&self, column: &ColumnInfo, _value: &RowValues) -> bool {
        column.flags.read_only
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreHasDefault;

impl ColumnFilter for IgnoreHasDefault {
    fn ignore_column(&self, column: &ColumnInfo, _value: &RowValues) -> bool {
        column.flags.has_default
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreNull;

impl ColumnFilter for IgnoreNull {
    fn ignore_column(&self, _column: &ColumnInfo, value: &RowValues) -> bool {
        value.is_null()
    }
}

/// Ignore NULL and zero values (see [`RowValues::is_zero`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreNullOrZero;

impl ColumnFilter for IgnoreNullOrZero {
    fn ignore_column(&self, _column: &ColumnInfo, value: &RowValues) -> bool {
        value.is_zero()
    }
}

/// Ignore NULL or zero values of columns flagged `default`, letting the
/// database fill them in.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreNullOrZeroDefault;

impl ColumnFilter for IgnoreNullOrZeroDefault {
    fn ignore_column(&self, column: &ColumnInfo, value: &RowValues) -> bool {
        column.flags.has_default && value.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldFlags;

    fn column(name: &str, flags: FieldFlags) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            flags,
            field_path: vec![0],
        }
    }

    #[test]
    fn catalog_filters() {
        let pk = column(
            "id",
            FieldFlags {
                primary_key: true,
                ..FieldFlags::default()
            },
        );
        let defaulted = column(
            "created_at",
            FieldFlags {
                has_default: true,
                read_only: true,
                ..FieldFlags::default()
            },
        );
        let plain = column("name", FieldFlags::default());

        assert!(IgnorePrimaryKey.ignore_column(&pk, &RowValues::Int(1)));
        assert!(!IgnorePrimaryKey.ignore_column(&plain, &RowValues::Int(1)));
        assert!(IgnoreReadOnly.ignore_column(&defaulted, &RowValues::Null));
        assert!(IgnoreHasDefault.ignore_column(&defaulted, &RowValues::Int(3)));
        assert!(IgnoreNull.ignore_column(&plain, &RowValues::Null));
        assert!(IgnoreNullOrZero.ignore_column(&plain, &RowValues::Text(String::new())));
        assert!(IgnoreNullOrZeroDefault.ignore_column(&defaulted, &RowValues::Null));
        assert!(!IgnoreNullOrZeroDefault.ignore_column(&plain, &RowValues::Null));

        let only = OnlyColumns::new(["name"]);
        assert!(only.ignore_column(&pk, &RowValues::Int(1)));
        assert!(!only.ignore_column(&plain, &RowValues::Null));
        assert!(IgnoreColumns::new(["name"]).ignore_column(&plain, &RowValues::Null));
    }

    #[test]
    fn closures_compose_with_catalog() {
        let long_text = |_: &ColumnInfo, v: &RowValues| v.as_text().is_some_and(|s| s.len() > 3);
        let filters: [&dyn ColumnFilter; 2] = [&IgnoreNull, &long_text];
        let plain = column("name", FieldFlags::default());
        assert!(ignored_by(&filters, &plain, &RowValues::Null));
        assert!(ignored_by(&filters, &plain, &RowValues::Text("long".into())));
        assert!(!ignored_by(&filters, &plain, &RowValues::Text("ok".into())));
    }
}
