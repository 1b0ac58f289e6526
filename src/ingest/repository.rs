/// Read-only table query interface.
///
/// The extractor only ever asks one kind of question: "give me these
/// columns of this table, where each filter column takes one of these
/// values". Keeping that behind a trait lets the pipeline run against the
/// production database or against in-memory tables in tests.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("query on {table} failed: {message}")]
    Query { table: String, message: String },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unsupported column type {type_name} for {column}")]
    UnsupportedType { column: String, type_name: String },
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single value returned by a repository.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Cell {
    /// Identifier-like rendering: integers and text, trimmed.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Int(i) => Some(i.to_string()),
            Cell::Text(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Timestamp(t) => Some(*t),
            Cell::Text(s) => crate::config::parse_timestamp(s),
            _ => None,
        }
    }

    fn matches(&self, value: &FilterValue) -> bool {
        match (self, value) {
            (Cell::Int(a), FilterValue::Int(b)) => a == b,
            (Cell::Float(a), FilterValue::Int(b)) => *a == *b as f64,
            (Cell::Text(a), FilterValue::Text(b)) => a.trim() == b,
            (Cell::Text(a), FilterValue::Int(b)) => a.trim() == b.to_string(),
            (Cell::Int(a), FilterValue::Text(b)) => a.to_string() == *b,
            _ => false,
        }
    }
}

/// One admissible value of a filter column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Text(String),
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(v as i64)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

/// `SELECT columns FROM table WHERE f1 IN (...) AND f2 IN (...)`.
///
/// A filter with an empty value set matches nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<(String, Vec<FilterValue>)>,
}

impl TableQuery {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            filters: Vec::new(),
        }
    }

    pub fn where_in<V: Into<FilterValue>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters
            .push((column.to_string(), values.into_iter().map(Into::into).collect()));
        self
    }
}

/// Tabular query result, rows in the order the store returned them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn column_index(&self, table: &str, column: &str) -> Result<usize, RepositoryError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| RepositoryError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}

pub trait Repository {
    fn read_table(&mut self, query: &TableQuery) -> Result<Table, RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// Serves tables held in memory, applying the same filter semantics as the
/// database implementation.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: HashMap<String, Table>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: &str, table: Table) {
        self.tables.insert(name.to_string(), table);
    }
}

impl Repository for MemoryRepository {
    fn read_table(&mut self, query: &TableQuery) -> Result<Table, RepositoryError> {
        let table = self
            .tables
            .get(&query.table)
            .ok_or_else(|| RepositoryError::UnknownTable(query.table.clone()))?;

        let selected = query
            .columns
            .iter()
            .map(|c| table.column_index(&query.table, c))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = query
            .filters
            .iter()
            .map(|(c, values)| Ok((table.column_index(&query.table, c)?, values)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let rows = table
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(idx, values)| values.iter().any(|v| row[*idx].matches(v)))
            })
            .map(|row| selected.iter().map(|i| row[*i].clone()).collect())
            .collect();

        Ok(Table {
            columns: query.columns.clone(),
            rows,
        })
    }
}
