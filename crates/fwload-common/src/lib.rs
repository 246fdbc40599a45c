//! fwload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared data model, error types and logging for the fwload workspace.
//!
//! # Overview
//!
//! - **Types**: column specs, schemas, typed values and decoded rows
//! - **Error Handling**: schema and row decoding errors
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use fwload_common::types::Schema;
//!
//! let schema = Schema::parse("people", "column,size,kind\nname,10,TEXT\n").unwrap();
//! assert_eq!(schema.line_width(), 10);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DecodeError, SpecError};
pub use types::{ColumnKind, ColumnSpec, Row, Schema, Value};
