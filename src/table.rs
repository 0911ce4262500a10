use crate::error::{AllocatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell in a long-form table.
///
/// `Null` stands for a missing value; it converts to `NaN` in numeric
/// contexts so that missing data flows through products and sums the way
/// the aggregation policies expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the cell. `Null` maps to `NaN`; text is never
    /// coerced and yields `None`.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Null => Some(f64::NAN),
            Value::Number(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A long-form table with caller-named columns.
///
/// This is the exchange format at every boundary of the crate: definitions
/// and amounts come in as `Table`s, results go out as `Table`s. The column
/// names are data, not schema, because every role (join key, coefficient,
/// amount, dimensions) is configured by name at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(AllocatorError::RowLength {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    pub fn get(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    /// Numeric cell value, or a typed error naming the offending column and
    /// row when the cell holds text.
    pub fn number(&self, row: usize, col: usize) -> Result<f64> {
        self.rows[row][col]
            .to_f64()
            .ok_or_else(|| AllocatorError::NonNumeric {
                column: self.columns[col].clone(),
                row,
            })
    }

    /// Canonical text of a cell, used as join and grouping key.
    pub fn key(&self, row: usize, col: usize) -> String {
        self.rows[row][col].to_string()
    }

    /// Project onto the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = self
                .column_index(name)
                .ok_or_else(|| AllocatorError::MissingColumn {
                    column: name.to_string(),
                    table: "data",
                })?;
            indices.push(idx);
        }
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["period".into(), "acct".into(), "amt".into()],
            vec![
                vec!["p1".into(), "cash".into(), 10.0.into()],
                vec!["p2".into(), "cash".into(), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_push_row_arity() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        let err = table.push_row(vec![1.0.into()]).unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::RowLength {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_column_lookup() {
        let table = sample();
        assert!(table.has_column("acct"));
        assert_eq!(table.column_index("amt"), Some(2));
        assert_eq!(table.column_index("missing"), None);
    }

    #[test]
    fn test_number_conversion() {
        let table = sample();
        assert_eq!(table.number(0, 2).unwrap(), 10.0);
        assert!(table.number(1, 2).unwrap().is_nan());

        let err = table.number(0, 1).unwrap_err();
        assert!(matches!(err, AllocatorError::NonNumeric { .. }));
    }

    #[test]
    fn test_select() {
        let table = sample();
        let projected = table.select(&["amt", "period"]).unwrap();
        assert_eq!(projected.columns(), &["amt", "period"]);
        assert_eq!(projected.get(0, 1), &Value::Text("p1".into()));

        let err = table.select(&["nope"]).unwrap_err();
        assert!(matches!(err, AllocatorError::MissingColumn { .. }));
    }

    #[test]
    fn test_json_round_trip() {
        let table = sample();
        let json = table.to_json().unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
