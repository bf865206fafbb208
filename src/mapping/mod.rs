//! Record ↔ row mapping: the field mapper, the memoized struct mappings, and
//! the column filters used when composing statements.

mod cache;
mod field;
mod filter;
mod mapper;

pub use cache::{
    ColumnInfo, GatheredColumns, MAX_EMBED_DEPTH, StructMapping, field_scanner, field_value,
    struct_mapping,
};
pub use field::{EmbeddedRecord, FieldMut, FieldRef, Record, RecordFields, StructField};
pub use filter::{
    ColumnFilter, IgnoreColumns, IgnoreHasDefault, IgnoreNull, IgnoreNullOrZero,
    IgnoreNullOrZeroDefault, IgnorePrimaryKey, IgnoreReadOnly, OnlyColumns,
};
pub use mapper::{
    FieldFlags, FieldMapper, FieldMapping, TaggedFieldMapper, UntaggedNamePolicy, snake_case,
};
