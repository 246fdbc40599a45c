//! Error types for schema parsing and row decoding

use thiserror::Error;

/// A spec source could not be turned into a schema.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Failed to read spec for model '{model}': {source}")]
    Read {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Spec for model '{model}' line {line}: expected 3 fields, found {found}")]
    FieldCount {
        model: String,
        line: usize,
        found: usize,
    },

    #[error("Spec for model '{model}' line {line}: invalid column size '{value}'")]
    InvalidSize {
        model: String,
        line: usize,
        value: String,
    },
}

/// A data line could not be turned into a row.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(
        "Line {line}: column '{column}' needs {required} code points, only {available} remain"
    )]
    Length {
        line: usize,
        column: String,
        required: usize,
        available: usize,
    },

    #[error("Line {line}: column '{column}' cannot convert '{raw}' to {kind}")]
    Conversion {
        line: usize,
        column: String,
        kind: String,
        raw: String,
    },

    #[error("Line {line}: read error: {source}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    /// Line number (1-based) the error was raised on
    pub fn line(&self) -> usize {
        match self {
            DecodeError::Length { line, .. }
            | DecodeError::Conversion { line, .. }
            | DecodeError::Io { line, .. } => *line,
        }
    }
}
