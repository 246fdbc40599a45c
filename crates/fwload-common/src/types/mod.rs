//! Data model shared by the schema resolver, the decoder and the stores

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

// ============================================================================
// Column Types
// ============================================================================

/// Declared data kind of a fixed-width column.
///
/// Tokens other than `INTEGER`, `BOOLEAN` and `TEXT` are kept verbatim as
/// [`ColumnKind::Unrecognized`]. They decode like text and are stored as
/// unbounded text, so an odd spec never stops a load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Boolean,
    Text,
    Unrecognized(String),
}

impl ColumnKind {
    /// Map a spec token onto a kind; matching is exact
    pub fn from_token(token: &str) -> Self {
        match token {
            "INTEGER" => ColumnKind::Integer,
            "BOOLEAN" => ColumnKind::Boolean,
            "TEXT" => ColumnKind::Text,
            other => ColumnKind::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Text => "TEXT",
            ColumnKind::Unrecognized(token) => token,
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a fixed-width layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, used verbatim as the store column
    pub name: String,
    /// Width in code points (always > 0)
    pub size: usize,
    /// Declared data kind
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, size: usize, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            size,
            kind,
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Ordered column layout for one model.
///
/// Column order is both the left-to-right layout of a data line and the
/// column order used when creating the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    model: String,
    columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(model: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            model: model.into(),
            columns,
        }
    }

    /// Parse a tabular spec: a header line followed by `name,size,kind` rows.
    ///
    /// Blank lines are skipped. A row with the wrong field count or a size that
    /// is not a positive integer rejects the whole spec.
    pub fn parse(model: &str, content: &str) -> Result<Self, SpecError> {
        let mut columns = Vec::new();

        for (index, raw) in content.split('\n').enumerate().skip(1) {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split(',').collect();
            if tokens.len() != 3 {
                return Err(SpecError::FieldCount {
                    model: model.to_string(),
                    line: index + 1,
                    found: tokens.len(),
                });
            }

            let size = match tokens[1].trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(SpecError::InvalidSize {
                        model: model.to_string(),
                        line: index + 1,
                        value: tokens[1].to_string(),
                    })
                },
            };

            columns.push(ColumnSpec::new(
                tokens[0].trim(),
                size,
                ColumnKind::from_token(tokens[2].trim()),
            ));
        }

        Ok(Self::new(model, columns))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Minimum number of code points a data line must carry
    pub fn line_width(&self) -> usize {
        self.columns.iter().map(|c| c.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ============================================================================
// Values and Rows
// ============================================================================

/// A decoded, typed field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One decoded line: column name to value.
///
/// Fields are kept in schema order so inserts bind deterministically, but
/// equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set a field, replacing any previous value under the same name
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when both rows carry exactly the same column names
    pub fn same_columns(&self, other: &Row) -> bool {
        self.len() == other.len() && self.columns().all(|c| other.get(c).is_some())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.same_columns(other) && self.iter().all(|(c, v)| other.get(c) == Some(v))
    }
}

impl Eq for Row {}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::default();
        for (column, value) in iter {
            row.insert(column, value.into());
        }
        row
    }
}
