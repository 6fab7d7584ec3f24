//! Database Module - pooled Postgres execution

pub mod executor;

pub use executor::{Db, Row};
