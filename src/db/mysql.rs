use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::Duration;

use super::{BackendConfig, CellValue, RelationalBackend, RowSet, StructuredError};

/// MySQL backend over a lazily connecting sqlx pool.
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Build the pool without touching the network; connections are made on
    /// first query.
    pub fn connect_lazy(config: &BackendConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(15))
            .connect_lazy(&config.mysql_url())
            .with_context(|| format!("Invalid MySQL URL for {}", config.display_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RelationalBackend for MySqlBackend {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn query(&self, sql: &str) -> Result<RowSet, StructuredError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(parse_rows(&rows))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StructuredError {
    match &err {
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number());
            StructuredError::from_mysql(number, db.message())
        }
        _ => StructuredError::from_mysql(None, err.to_string()),
    }
}

fn parse_rows(rows: &[MySqlRow]) -> RowSet {
    let Some(first_row) = rows.first() else {
        return RowSet::default();
    };

    let columns = first_row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| extract_value(row, i)).collect())
        .collect();

    RowSet { columns, rows }
}

fn extract_value(row: &MySqlRow, idx: usize) -> CellValue {
    let is_null = row
        .try_get_raw(idx)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return CellValue::Null;
    }

    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(idx).ok().map(CellValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).ok().map(CellValue::Int64)
        }
        t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(idx).ok().map(|v| {
            i64::try_from(v)
                .map(CellValue::Int64)
                .unwrap_or_else(|_| CellValue::Decimal(Decimal::from(v)))
        }),
        "FLOAT" => row.try_get::<f32, _>(idx).ok().map(CellValue::Float32),
        "DOUBLE" => row.try_get::<f64, _>(idx).ok().map(CellValue::Float64),
        "DECIMAL" => row.try_get::<Decimal, _>(idx).ok().map(CellValue::Decimal),
        "DATE" => row.try_get::<NaiveDate, _>(idx).ok().map(CellValue::Date),
        "TIME" => row.try_get::<NaiveTime, _>(idx).ok().map(CellValue::Time),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .map(CellValue::DateTime),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .map(CellValue::TimestampTz),
        "JSON" => row
            .try_get::<serde_json::Value, _>(idx)
            .ok()
            .map(CellValue::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Vec<u8>, _>(idx).ok().map(CellValue::Bytes)
        }
        _ => row.try_get::<String, _>(idx).ok().map(CellValue::Text),
    };

    // Unrecognized or mismatched types fall back to the raw bytes as text.
    decoded.unwrap_or_else(|| {
        row.try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|bytes| CellValue::Unknown(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(CellValue::Null)
    })
}
