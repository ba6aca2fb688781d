use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use duckdb::Connection;
use tracing::{debug, error, info, warn};

use super::{ConnectionSettings, DatabaseError, ResultSet, Row, ScalarValue};

pub async fn execute(
    statement: &str,
    settings: &ConnectionSettings,
) -> Result<ResultSet, DatabaseError> {
    let db_path = settings.database.clone();
    let sql = statement.to_string();

    // DuckDB is synchronous, keep it off the async workers
    tokio::task::spawn_blocking(move || execute_blocking(&sql, &db_path))
        .await
        .map_err(|join_err| {
            error!("Task join error: {}", join_err);
            DatabaseError::new(None, format!("Database task execution failed: {}", join_err))
        })?
}

fn execute_blocking(statement: &str, db_path: &str) -> Result<ResultSet, DatabaseError> {
    debug!("Opening DuckDB database at {}", db_path);
    let conn = Connection::open(db_path).map_err(database_error)?;

    let result = current_catalog(&conn).and_then(|catalog| run(&conn, statement, &catalog));

    if let Err((_, e)) = conn.close() {
        warn!("Failed to close DuckDB connection cleanly: {}", e);
    }

    result
}

fn run(conn: &Connection, statement: &str, catalog: &str) -> Result<ResultSet, DatabaseError> {
    conn.execute_batch(&format!("USE \"{}\";", catalog.replace('"', "\"\"")))
        .map_err(database_error)?;

    let mut stmt = conn.prepare(statement).map_err(database_error)?;
    let arrow_batch = stmt.query_arrow([]).map_err(database_error)?;

    let schema = arrow_batch.get_schema();
    let columns = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();

    let record_batches = arrow_batch.collect::<Vec<_>>();

    let mut rows = Vec::new();
    for batch in &record_batches {
        append_rows(batch, &columns, &mut rows);
    }

    info!("DuckDB statement returned {} rows", rows.len());
    Ok(ResultSet { columns, rows })
}

/// Catalog DuckDB attached the opened file under.
fn current_catalog(conn: &Connection) -> Result<String, DatabaseError> {
    conn.query_row("SELECT current_database()", [], |row| row.get::<_, String>(0))
        .map_err(database_error)
}

fn database_error(err: duckdb::Error) -> DatabaseError {
    let converted = DatabaseError::new(None, err.to_string());
    error!("{}", converted);
    converted
}

fn append_rows(batch: &RecordBatch, columns: &[String], rows: &mut Vec<Row>) {
    for row_idx in 0..batch.num_rows() {
        let mut row = Row::default();
        for (col_idx, name) in columns.iter().enumerate() {
            row.push(name.clone(), cell_value(batch.column(col_idx).as_ref(), row_idx));
        }
        rows.push(row);
    }
}

fn cell_value(array: &dyn Array, idx: usize) -> ScalarValue {
    if array.is_null(idx) {
        return ScalarValue::Null;
    }

    match array.data_type() {
        DataType::Null => ScalarValue::Null,
        DataType::Boolean => ScalarValue::Bool(array.as_boolean().value(idx)),
        DataType::Int8 => ScalarValue::Int(array.as_primitive::<Int8Type>().value(idx).into()),
        DataType::Int16 => ScalarValue::Int(array.as_primitive::<Int16Type>().value(idx).into()),
        DataType::Int32 => ScalarValue::Int(array.as_primitive::<Int32Type>().value(idx).into()),
        DataType::Int64 => ScalarValue::Int(array.as_primitive::<Int64Type>().value(idx)),
        DataType::UInt8 => ScalarValue::Int(array.as_primitive::<UInt8Type>().value(idx).into()),
        DataType::UInt16 => ScalarValue::Int(array.as_primitive::<UInt16Type>().value(idx).into()),
        DataType::UInt32 => ScalarValue::Int(array.as_primitive::<UInt32Type>().value(idx).into()),
        DataType::UInt64 => {
            let value = array.as_primitive::<UInt64Type>().value(idx);
            i64::try_from(value)
                .map(ScalarValue::Int)
                .unwrap_or(ScalarValue::Float(value as f64))
        }
        DataType::Float32 => {
            ScalarValue::Float(array.as_primitive::<Float32Type>().value(idx).into())
        }
        DataType::Float64 => ScalarValue::Float(array.as_primitive::<Float64Type>().value(idx)),
        DataType::Decimal128(_, scale) => {
            let raw = array
                .as_primitive::<arrow::datatypes::Decimal128Type>()
                .value(idx);
            ScalarValue::Float(raw as f64 / 10f64.powi(i32::from(*scale)))
        }
        DataType::Utf8 => ScalarValue::from(array.as_string::<i32>().value(idx)),
        DataType::LargeUtf8 => ScalarValue::from(array.as_string::<i64>().value(idx)),
        DataType::Date32 => array
            .as_primitive::<Date32Type>()
            .value_as_date(idx)
            .map_or(ScalarValue::Null, ScalarValue::Date),
        DataType::Date64 => array
            .as_primitive::<Date64Type>()
            .value_as_date(idx)
            .map_or(ScalarValue::Null, ScalarValue::Date),
        DataType::Timestamp(unit, _) => {
            let value = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value_as_datetime(idx),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value_as_datetime(idx),
                TimeUnit::Microsecond => array
                    .as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(idx),
                TimeUnit::Nanosecond => array
                    .as_primitive::<TimestampNanosecondType>()
                    .value_as_datetime(idx),
            };
            value.map_or(ScalarValue::Null, ScalarValue::DateTime)
        }
        _ => match array_value_to_string(array, idx) {
            Ok(text) => ScalarValue::Text(text),
            Err(e) => {
                warn!("Could not render {} value: {}", array.data_type(), e);
                ScalarValue::Null
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Backend, execute_query};
    use serde_json::json;
    use std::path::Path;

    fn settings_for(path: &Path) -> ConnectionSettings {
        ConnectionSettings {
            backend: Backend::DuckDb,
            host: String::new(),
            port: None,
            user: String::new(),
            password: String::new(),
            database: path.to_string_lossy().to_string(),
        }
    }

    fn seeded_database(dir: &tempfile::TempDir, setup: &str) -> ConnectionSettings {
        let path = dir.path().join("sakila.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(setup).unwrap();
        drop(conn);
        settings_for(&path)
    }

    #[tokio::test]
    async fn single_row_round_trips_as_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let settings = seeded_database(
            &dir,
            "CREATE TABLE film(title VARCHAR); INSERT INTO film VALUES ('Alpha');",
        );

        let result = execute_query("SELECT title FROM film;", &settings)
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["title".to_string()]);
        assert_eq!(serde_json::to_value(&result.rows).unwrap(), json!([{"title": "Alpha"}]));
    }

    #[tokio::test]
    async fn zero_rows_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let settings = seeded_database(&dir, "CREATE TABLE film(title VARCHAR);");

        let result = execute_query("SELECT title FROM film;", &settings)
            .await
            .unwrap();

        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["title".to_string()]);
    }

    #[tokio::test]
    async fn syntax_error_is_a_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = seeded_database(&dir, "CREATE TABLE film(title VARCHAR);");

        let err = execute_query("SELEC title FORM film;", &settings)
            .await
            .unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn unopenable_path_is_a_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(&dir.path().join("missing").join("sakila.duckdb"));

        assert!(execute_query("SELECT 1;", &settings).await.is_err());
    }

    #[tokio::test]
    async fn typed_columns_convert_to_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let settings = seeded_database(
            &dir,
            "CREATE TABLE payment(
                 payment_id INTEGER,
                 amount DECIMAL(5,2),
                 ratio DOUBLE,
                 paid BOOLEAN,
                 payment_date TIMESTAMP,
                 due DATE,
                 note VARCHAR
             );
             INSERT INTO payment VALUES
                 (1, 2.99, 0.5, true, TIMESTAMP '2005-05-25 11:30:37', DATE '2005-05-26', NULL);",
        );

        let result = execute_query("SELECT * FROM payment;", &settings)
            .await
            .unwrap();
        let row = &result.rows[0];

        assert_eq!(row.get("payment_id"), Some(&ScalarValue::Int(1)));
        assert_eq!(row.get("amount"), Some(&ScalarValue::Float(2.99)));
        assert_eq!(row.get("ratio"), Some(&ScalarValue::Float(0.5)));
        assert_eq!(row.get("paid"), Some(&ScalarValue::Bool(true)));
        assert_eq!(
            serde_json::to_value(row.get("payment_date").unwrap()).unwrap(),
            json!("2005-05-25T11:30:37")
        );
        assert_eq!(
            serde_json::to_value(row.get("due").unwrap()).unwrap(),
            json!("2005-05-26")
        );
        assert_eq!(row.get("note"), Some(&ScalarValue::Null));
    }

    #[tokio::test]
    async fn repeated_execution_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let settings = seeded_database(
            &dir,
            "CREATE TABLE film(title VARCHAR); INSERT INTO film VALUES ('Alpha'), ('Beta');",
        );

        let first = execute_query("SELECT title FROM film ORDER BY title;", &settings)
            .await
            .unwrap();
        let second = execute_query("SELECT title FROM film ORDER BY title;", &settings)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn dotted_file_name_still_selects_its_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sakila.v2.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE film(title VARCHAR); INSERT INTO film VALUES ('Alpha');")
            .unwrap();
        drop(conn);

        let result = execute_query("SELECT title FROM film;", &settings_for(&path))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
    }

    #[test]
    fn in_memory_catalog_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_catalog(&conn).unwrap(), "memory");
    }
}
