//! Types provide the definition of record semantic types and values, and
//! their conversion to and from arrow.

mod in_memory;
pub use in_memory::*;

mod field_value;
pub use field_value::*;

mod arrow;
pub use arrow::INDEX_LEVEL_META_KEY;
