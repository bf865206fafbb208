//! Materialized results and the cursor API over them.

mod each;
mod result_set;
mod row;
mod rows;
mod single;

pub use each::ScanRow;
pub use result_set::ResultSet;
pub use row::CustomDbRow;
pub use rows::Rows;
pub use single::Row;
