//! Schema Module - declared table allow-list and its live verification

pub mod declaration;
pub mod registry;

pub use declaration::{declared_tables, ColumnSpec, TableSpec};
pub use registry::SchemaRegistry;
