use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::{types::Type, Client, Row};

use super::{
    create_client, BackendConfig, CellValue, ErrorCategory, RelationalBackend, RowSet,
    StructuredError,
};

/// PostgreSQL backend holding one lazily connected client.
///
/// The client is (re)created on first use and whenever the previous
/// connection has closed.
pub struct PostgresBackend {
    config: BackendConfig,
    client: Mutex<Option<Client>>,
}

impl PostgresBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn display_string(&self) -> String {
        self.config.display_string()
    }
}

#[async_trait]
impl RelationalBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn query(&self, sql: &str) -> Result<RowSet, StructuredError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().map_or(true, |c| c.is_closed()) {
            let client = create_client(&self.config).await.map_err(|e| {
                StructuredError::from_string(format!("{:#}", e))
                    .with_category(ErrorCategory::Connection)
            })?;
            tracing::info!(backend = %self.display_string(), "connected");
            *guard = Some(client);
        }
        let client = guard
            .as_ref()
            .ok_or_else(|| StructuredError::from_string("PostgreSQL client unavailable"))?;

        let rows = client
            .query(sql, &[])
            .await
            .map_err(|e| StructuredError::from_pg_error(&e, sql))?;
        Ok(parse_rows(&rows))
    }
}

fn parse_rows(rows: &[Row]) -> RowSet {
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
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| extract_value(row, i, col.type_()))
                .collect()
        })
        .collect();

    RowSet { columns, rows }
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int16)
            .unwrap_or(CellValue::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int32)
            .unwrap_or(CellValue::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int64)
            .unwrap_or(CellValue::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float32)
            .unwrap_or(CellValue::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float64)
            .unwrap_or(CellValue::Null),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Decimal)
            .unwrap_or(CellValue::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bytes)
            .unwrap_or(CellValue::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Time)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Json)
            .unwrap_or(CellValue::Null),
        // TEXT, VARCHAR, NAME, BPCHAR and anything else readable as a string
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
    }
}
