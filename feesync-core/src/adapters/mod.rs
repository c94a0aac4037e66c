//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for fee, patron and sync run storage
//! - Alma response documents (JSON) for FeeSource
//! - Demo fee source for testing

pub mod demo;
pub mod duckdb;
pub mod json_source;
