use crate::values::{ScanValue, ToRowValue};

/// Static description of one declared struct field, emitted by `#[derive(Record)]`.
#[derive(Debug, Clone, Copy)]
pub struct StructField {
    /// Rust field name.
    pub name: &'static str,
    /// `(key, value)` tag pairs; `#[db = "..."]` lands under the `db` key.
    pub tags: &'static [(&'static str, &'static str)],
    /// Whether the field is `pub`.
    pub exported: bool,
    /// Present for `#[db(flatten)]` fields.
    pub embedded: Option<EmbeddedRecord>,
}

impl StructField {
    /// The tag stored under `key`, if any.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&'static str> {
        self.tags.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

/// Reflection hooks for an anonymously embedded record.
#[derive(Clone, Copy)]
pub struct EmbeddedRecord {
    pub type_name: fn() -> &'static str,
    pub fields: fn() -> &'static [StructField],
}

impl std::fmt::Debug for EmbeddedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedRecord")
            .field("type_name", &(self.type_name)())
            .finish_non_exhaustive()
    }
}

/// Shared borrow of a field, by declaration index.
pub enum FieldRef<'a> {
    Value(&'a dyn ToRowValue),
    Embedded(&'a dyn RecordFields),
}

/// Mutable borrow of a field, by declaration index.
pub enum FieldMut<'a> {
    Value(&'a mut dyn ScanValue),
    Embedded(&'a mut dyn RecordFields),
}

/// Index-based access to the fields of a record.
///
/// Indices follow declaration order, the same order as [`Record::struct_fields`].
/// Private fields and fields tagged `db = "-"` return `None`.
pub trait RecordFields {
    fn field_ref(&self, index: usize) -> Option<FieldRef<'_>>;
    fn field_mut(&mut self, index: usize) -> Option<FieldMut<'_>>;
}

/// A struct that can be mapped to and from table rows.
///
/// Implement with `#[derive(Record)]`:
/// ```rust
/// use sqldb::Record;
///
/// #[derive(Record, Default)]
/// pub struct User {
///     #[db = "id,pk=public.users"]
///     pub id: i64,
///     #[db = "name"]
///     pub name: String,
///     #[db = "created_at,readonly,default"]
///     pub created_at: Option<chrono::NaiveDateTime>,
/// }
/// ```
pub trait Record: RecordFields + Send + Sync + 'static {
    fn struct_fields() -> &'static [StructField];
}

impl<T: RecordFields + ?Sized> RecordFields for Box<T> {
    fn field_ref(&self, index: usize) -> Option<FieldRef<'_>> {
        (**self).field_ref(index)
    }

    fn field_mut(&mut self, index: usize) -> Option<FieldMut<'_>> {
        (**self).field_mut(index)
    }
}

impl<T: Record> Record for Box<T> {
    fn struct_fields() -> &'static [StructField] {
        T::struct_fields()
    }
}
