pub mod duckdb;
pub mod mysql;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    MySql,
    DuckDb,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::MySql => write!(f, "mysql"),
            Backend::DuckDb => write!(f, "duckdb"),
        }
    }
}

/// Everything needed to open one connection.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub backend: Backend,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    /// Schema name for MySQL, database file path for DuckDB.
    pub database: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Text(v) => write!(f, "{}", v),
            ScalarValue::Date(v) => write!(f, "{}", v),
            ScalarValue::DateTime(v) => write!(f, "{}", v),
        }
    }
}

/// Column name to value, in result-set column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, ScalarValue)>,
}

impl Row {
    pub fn push(&mut self, column: impl Into<String>, value: ScalarValue) {
        self.fields.push((column.into(), value));
    }

    #[cfg(test)]
    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Rows returned by a successfully executed statement. Zero rows is still a success.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

const ER_ACCESS_DENIED_ERROR: &str = "1045";
const ER_BAD_DB_ERROR: &str = "1049";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub struct DatabaseError {
    /// Driver error code, when the driver reports one.
    pub code: Option<String>,
    pub message: String,
}

impl DatabaseError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self.code.as_deref() {
            Some(ER_BAD_DB_ERROR) => Some("Database does not exist"),
            Some(ER_ACCESS_DENIED_ERROR) => Some("Username or password is incorrect"),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "Database error {}: {}", code, self.message),
            None => write!(f, "Database error: {}", self.message),
        }
    }
}

/// Opens a fresh connection, selects the database, runs `statement` and closes
/// the connection again before returning.
pub async fn execute_query(
    statement: &str,
    settings: &ConnectionSettings,
) -> Result<ResultSet, DatabaseError> {
    match settings.backend {
        Backend::MySql => mysql::execute(statement, settings).await,
        Backend::DuckDb => duckdb::execute(statement, settings).await,
    }
}
