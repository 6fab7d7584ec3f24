//! # warequery
//!
//! A natural-language query service over a declared Postgres warehouse
//! schema. A question comes in over HTTP, an LLM drafts one read-only
//! Postgres statement against the declared tables, a lexical guard proves
//! the statement safe, a pooled executor runs it under a statement timeout,
//! and a second LLM call summarizes the rows.
//!
//! ## Pipeline
//!
//! ```text
//! question -> normalize -> fast path? -> plan -> rewrite -> guard
//!          -> execute -> (retry once | empty fallback) -> summarize -> polish
//! ```
//!
//! The guard is the trust boundary: model output is never executed without
//! passing it. See [`guard`] for the rules it enforces.

// Internal modules
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod llm;
pub mod pipeline;
pub mod rewrite;
pub mod schema;
pub mod web;

// Public API - Main types users need
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use guard::{Guard, GuardError, GuardedSql};
pub use pipeline::{App, QueryOutcome};
pub use schema::SchemaRegistry;
