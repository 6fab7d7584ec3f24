//! SQL Guard - lexical safety filter for candidate statements
//!
//! Accepts or rejects one candidate SQL string. An accepted statement is
//! proven, on the literal-masked text, to be a single read-only SELECT/WITH
//! confined to allow-listed tables and columns, and comes back with a
//! top-level LIMIT clamp applied.
//!
//! This is defense in depth in front of a database role that should itself
//! be read-only. It is a scanner, not a parser: it tolerates false positives
//! (rejecting valid SQL it cannot prove safe) and is built to have no false
//! negatives for the enumerated hazards on the masked text.

pub mod analyze;
pub mod limit;
pub mod mask;

mod lexer;

use thiserror::Error;

pub const DEFAULT_MAX_LIMIT: u64 = 500;

/// Why a candidate statement was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("empty statement")]
    EmptyStatement,

    #[error("multiple statements are not allowed")]
    MultiStatement,

    #[error("statement is not read-only: {0}")]
    NotReadOnly(String),

    #[error("SQL comments are not allowed")]
    CommentNotAllowed,

    #[error("system schema access is not allowed: {0}")]
    SystemSchema(String),

    #[error("table not allowed: {0}")]
    TableNotAllowed(String),

    #[error("column not allowed: {0}")]
    ColumnNotAllowed(String),
}

/// A statement that passed every guard rule. Exists only between guard
/// acceptance and executor completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedSql(String);

impl GuardedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for GuardedSql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub use analyze::Guard;
