//! Fixed-width row decoding
//!
//! Widths are counted in code points, not bytes: a ten-wide column holds ten
//! characters whether they are ASCII or katakana.

use futures::stream::{self, Stream};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use fwload_common::{ColumnKind, ColumnSpec, DecodeError, Row, Schema, Value};

/// Decode one data line against `schema`.
///
/// `line_no` is only used for error reporting. Code points beyond the last
/// column are ignored.
pub fn decode_line(line: &str, line_no: usize, schema: &Schema) -> Result<Row, DecodeError> {
    let mut row = Row::with_capacity(schema.columns().len());
    let mut rest = line;

    for column in schema.columns() {
        let (raw, tail) = split_code_points(rest, column.size).ok_or_else(|| {
            DecodeError::Length {
                line: line_no,
                column: column.name.clone(),
                required: column.size,
                available: rest.chars().count(),
            }
        })?;

        row.insert(column.name.clone(), convert(raw, column, line_no)?);
        rest = tail;
    }

    Ok(row)
}

/// Split off the first `n` code points, or `None` if there are fewer
fn split_code_points(s: &str, n: usize) -> Option<(&str, &str)> {
    match s.char_indices().nth(n) {
        Some((offset, _)) => Some(s.split_at(offset)),
        None if s.chars().count() == n => Some((s, "")),
        None => None,
    }
}

fn convert(raw: &str, column: &ColumnSpec, line_no: usize) -> Result<Value, DecodeError> {
    let trimmed = raw.trim();
    let conversion_error = || DecodeError::Conversion {
        line: line_no,
        column: column.name.clone(),
        kind: column.kind.to_string(),
        raw: raw.to_string(),
    };

    match column.kind {
        ColumnKind::Integer => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| conversion_error()),
        ColumnKind::Boolean => parse_bool(trimmed)
            .map(Value::Boolean)
            .ok_or_else(conversion_error),
        ColumnKind::Text | ColumnKind::Unrecognized(_) => Ok(Value::Text(trimmed.to_string())),
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Forward-only reader that yields one decoded row per input line
pub struct RowScanner<R> {
    lines: Lines<R>,
    schema: Arc<Schema>,
    line_no: usize,
}

impl RowScanner<BufReader<File>> {
    /// Open a data file for scanning; the handle closes when the scanner drops
    pub async fn open(path: &Path, schema: Arc<Schema>) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file), schema))
    }
}

impl<R: AsyncBufRead + Unpin> RowScanner<R> {
    pub fn new(reader: R, schema: Arc<Schema>) -> Self {
        Self {
            lines: reader.lines(),
            schema,
            line_no: 0,
        }
    }

    /// Next decoded row; `None` on clean end of input
    pub async fn next_row(&mut self) -> Option<Result<Row, DecodeError>> {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                self.line_no += 1;
                Some(decode_line(&line, self.line_no, &self.schema))
            },
            Ok(None) => None,
            Err(source) => Some(Err(DecodeError::Io {
                line: self.line_no + 1,
                source,
            })),
        }
    }

    /// Number of lines consumed so far
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Row, DecodeError>> {
        stream::unfold(self, |mut scanner| async move {
            scanner.next_row().await.map(|item| (item, scanner))
        })
    }
}
