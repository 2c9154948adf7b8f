//! recordframe binds typed record declarations to columnar tables.
//!
//! A [`RecordTable`] validates a [`ColumnarTable`] against the schema derived
//! from a [`Record`] type and hands out [`RecordView`]s: live handles whose
//! reads and writes go straight to the table's cells.

// Make sure all our public APIs have docs.
#![deny(missing_docs)]

mod error;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;

pub mod config;
pub use config::{BindConfig, EnumStorage, SetIndex};
pub mod types;
pub use types::{FieldSpec, FieldValue, RecordSchema, SemanticType, StorageType, Value};

mod column;
pub use column::{Column, ColumnValues, Scalar};
mod codec;
pub use codec::Codec;
mod table;
pub use table::{ColumnarTable, IndexKey, RowLocator, Slot};
mod validator;
pub use validator::{expected_storage_type, Validator, Violation};
mod index;
pub use index::{IndexBinder, IndexPlacement};
mod schema;
pub use schema::{derive_schema, register, Record, RecordDeclaration};
mod binding;
pub use binding::{AccessorTable, BackingAdapter, FieldAccessor};
mod frame;
pub use frame::{RecordTable, RecordView, RecordViews};
