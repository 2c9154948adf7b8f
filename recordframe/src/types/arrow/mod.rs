//! Conversion between record tables and arrow.

mod from_arrow;
mod to_arrow;
pub use to_arrow::INDEX_LEVEL_META_KEY;
