use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, Connection, Executor, Row as _, TypeInfo};
use tracing::{debug, error, info, warn};

use super::{ConnectionSettings, DatabaseError, ResultSet, Row, ScalarValue};

pub async fn execute(
    statement: &str,
    settings: &ConnectionSettings,
) -> Result<ResultSet, DatabaseError> {
    let mut options = MySqlConnectOptions::new()
        .host(&settings.host)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database);
    if let Some(port) = settings.port {
        options = options.port(port);
    }

    debug!("Connecting to MySQL at {} as {}", settings.host, settings.user);
    let mut conn = MySqlConnection::connect_with(&options)
        .await
        .map_err(database_error)?;

    let result = run(&mut conn, statement, &settings.database).await;

    // Close on every path, the statement outcome is returned regardless.
    if let Err(e) = conn.close().await {
        warn!("Failed to close MySQL connection cleanly: {}", e);
    }

    result
}

async fn run(
    conn: &mut MySqlConnection,
    statement: &str,
    database: &str,
) -> Result<ResultSet, DatabaseError> {
    // Raw SQL goes over the text protocol; USE cannot be prepared.
    let use_database = format!("USE `{}`;", database.replace('`', "``"));
    conn.execute(sqlx::raw_sql(&use_database))
        .await
        .map_err(database_error)?;

    let rows = conn
        .fetch_all(sqlx::raw_sql(statement))
        .await
        .map_err(database_error)?;

    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let rows = rows.iter().map(convert_row).collect::<Vec<_>>();
    info!("MySQL statement returned {} rows", rows.len());

    Ok(ResultSet { columns, rows })
}

fn database_error(err: sqlx::Error) -> DatabaseError {
    let converted = match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|mysql_err| mysql_err.number().to_string())
                .or_else(|| db_err.code().map(|code| code.into_owned()));
            DatabaseError::new(code, db_err.message())
        }
        other => DatabaseError::new(None, other.to_string()),
    };

    error!("{}", converted);
    converted
}

fn convert_row(row: &MySqlRow) -> Row {
    let mut converted = Row::default();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = convert_cell(row, idx, column.type_info().name());
        converted.push(column.name(), value);
    }
    converted
}

fn convert_cell(row: &MySqlRow, idx: usize, type_name: &str) -> ScalarValue {
    let base_type = type_name.trim_end_matches(" UNSIGNED");

    match base_type {
        "DATETIME" | "TIMESTAMP" => {
            if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
                return value.map_or(ScalarValue::Null, ScalarValue::DateTime);
            }
        }
        "DATE" => {
            if let Ok(value) = row.try_get::<Option<NaiveDate>, _>(idx) {
                return value.map_or(ScalarValue::Null, ScalarValue::Date);
            }
        }
        _ => {}
    }

    // Text protocol: every value arrives as its textual form.
    let text = match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(Some(text)) => text,
        Ok(None) => return ScalarValue::Null,
        Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(None) => return ScalarValue::Null,
            Err(e) => {
                warn!("Could not decode column {} ({}): {}", idx, type_name, e);
                return ScalarValue::Null;
            }
        },
    };

    parse_text_value(base_type, text)
}

fn parse_text_value(base_type: &str, text: String) -> ScalarValue {
    match base_type {
        "BOOLEAN" => match text.as_str() {
            "0" => ScalarValue::Bool(false),
            "1" => ScalarValue::Bool(true),
            _ => ScalarValue::Text(text),
        },
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            match text.parse::<i64>() {
                Ok(value) => ScalarValue::Int(value),
                // BIGINT UNSIGNED beyond i64
                Err(_) => text
                    .parse::<f64>()
                    .map(ScalarValue::Float)
                    .unwrap_or(ScalarValue::Text(text)),
            }
        }
        "FLOAT" | "DOUBLE" | "DECIMAL" => text
            .parse::<f64>()
            .map(ScalarValue::Float)
            .unwrap_or(ScalarValue::Text(text)),
        _ => ScalarValue::Text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Backend;

    #[test]
    fn integers_parse_from_text() {
        assert_eq!(parse_text_value("INT", "42".to_string()), ScalarValue::Int(42));
        assert_eq!(parse_text_value("YEAR", "2006".to_string()), ScalarValue::Int(2006));
        assert_eq!(
            parse_text_value("BIGINT", "18446744073709551615".to_string()),
            ScalarValue::Float(18446744073709551615.0)
        );
    }

    #[test]
    fn decimals_become_floats() {
        assert_eq!(
            parse_text_value("DECIMAL", "4.99".to_string()),
            ScalarValue::Float(4.99)
        );
    }

    #[test]
    fn booleans_parse_from_tinyint_text() {
        assert_eq!(parse_text_value("BOOLEAN", "1".to_string()), ScalarValue::Bool(true));
        assert_eq!(parse_text_value("BOOLEAN", "0".to_string()), ScalarValue::Bool(false));
    }

    #[test]
    fn other_types_stay_text() {
        assert_eq!(
            parse_text_value("ENUM", "PG-13".to_string()),
            ScalarValue::from("PG-13")
        );
        assert_eq!(
            parse_text_value("TIME", "01:02:03".to_string()),
            ScalarValue::from("01:02:03")
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_database_error() {
        let settings = ConnectionSettings {
            backend: Backend::MySql,
            host: "127.0.0.1".to_string(),
            // Nothing listens on port 1
            port: Some(1),
            user: "nobody".to_string(),
            password: "wrong".to_string(),
            database: "sakila".to_string(),
        };

        let err = execute("SELECT title FROM film;", &settings)
            .await
            .unwrap_err();
        assert!(!err.message.is_empty());
        assert_eq!(err.hint(), None);
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn execution_future_is_send() {
        let settings = ConnectionSettings {
            backend: Backend::MySql,
            host: "127.0.0.1".to_string(),
            port: Some(1),
            user: "nobody".to_string(),
            password: "wrong".to_string(),
            database: "sakila".to_string(),
        };
        assert_send(execute("SELECT 1;", &settings));
    }
}
