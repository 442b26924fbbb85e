//! rowdb is an embedded single-file key/value table engine. Each table is
//! a persistent collection of fixed-width rows addressed by a declared
//! primary key column; a [`Set`] facade presents the same engine as a
//! persistent set of values.
//!
//! Rows are accessed through per-key transactions: the body receives the
//! row's current snapshot and a control handle, and whatever state the
//! snapshot is in when the body returns is what gets persisted.
//! Transactions on one key are serialized in submission order; file I/O is
//! serialized globally; bounded caches keep lookups and writes off the
//! disk for hot keys.

pub mod cache;
pub mod config;
pub mod error;
pub mod field;
pub mod flock;
pub mod schema;
pub mod set;
pub mod table;

pub use config::{ColumnSpec, SetConfig, TableConfig};
pub use error::{Error, Result};
pub use field::{FieldType, Value};
pub use set::Set;
pub use table::{Entry, Row, RowCtl, Table};
