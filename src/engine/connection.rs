//! Per-request database connections.
//!
//! One connection is opened per request and closed on every exit path;
//! nothing is pooled, so credentials never outlive the request that
//! resolved them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as Json;
use sqlx::database::HasArguments;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::types::Uuid;
use sqlx::{Column, Connection, Database, Encode, Row as _, Type, TypeInfo};

use crate::ast::Value;
use crate::engine::batch::RowSource;
use crate::engine::{ConnectionDescriptor, Connector, Row};
use crate::error::{EtlError, EtlResult};
use crate::transpiler::{Dialect, SourceColumn};

/// Deadlines for the suspension points that talk to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub metadata: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            metadata: Duration::from_secs(15),
        }
    }
}

/// Opens [`DbConnection`]s through sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector {
    timeouts: Timeouts,
}

impl SqlxConnector {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    type Source = DbConnection;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> EtlResult<DbConnection> {
        DbConnection::connect(descriptor, self.timeouts).await
    }
}

enum Driver {
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

/// A single, unpooled connection to the target engine.
pub struct DbConnection {
    dialect: Dialect,
    driver: Driver,
    schema: Option<String>,
    metadata_timeout: Duration,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("dialect", &self.dialect)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl DbConnection {
    /// Connect, racing the handshake against `timeouts.connect`.
    pub async fn connect(descriptor: &ConnectionDescriptor, timeouts: Timeouts) -> EtlResult<Self> {
        let dialect = descriptor.dialect;
        let handshake = async {
            if dialect.uses_postgres_protocol() {
                let options = PgConnectOptions::new()
                    .host(&descriptor.host)
                    .port(descriptor.port)
                    .username(&descriptor.user)
                    .password(descriptor.password.expose())
                    .database(&descriptor.database);
                PgConnection::connect_with(&options).await.map(Driver::Postgres)
            } else {
                let options = MySqlConnectOptions::new()
                    .host(&descriptor.host)
                    .port(descriptor.port)
                    .username(&descriptor.user)
                    .password(descriptor.password.expose())
                    .database(&descriptor.database);
                MySqlConnection::connect_with(&options).await.map(Driver::MySql)
            }
        };

        let driver = tokio::time::timeout(timeouts.connect, handshake)
            .await
            .map_err(|_| EtlError::Timeout(format!("connecting to {}", descriptor.host)))?
            .map_err(|e| {
                tracing::warn!(host = %descriptor.host, %dialect, error = %e, "connection failed");
                EtlError::Connection(e.to_string())
            })?;

        tracing::debug!(host = %descriptor.host, %dialect, "connected");
        Ok(Self {
            dialect,
            driver,
            schema: descriptor.schema.clone(),
            metadata_timeout: timeouts.metadata,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Columns of `table` in ordinal order, typed from `data_type`.
    ///
    /// `table` may be schema-qualified; otherwise the descriptor's schema
    /// (or the engine's current one) is used.
    pub async fn discover_columns(&mut self, table: &str) -> EtlResult<Vec<SourceColumn>> {
        let (schema, name) = match table.rsplit_once('.') {
            Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
            None => (self.schema.clone(), table.to_string()),
        };
        let params = [
            schema.map(Value::Text).unwrap_or(Value::Null),
            Value::Text(name),
        ];

        let sql = match self.driver {
            Driver::Postgres(_) => {
                "SELECT CAST(column_name AS TEXT) AS column_name, CAST(data_type AS TEXT) AS data_type \
                 FROM information_schema.columns \
                 WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2 \
                 ORDER BY ordinal_position"
            }
            Driver::MySql(_) => {
                "SELECT CAST(column_name AS CHAR) AS column_name, CAST(data_type AS CHAR) AS data_type \
                 FROM information_schema.columns \
                 WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ? \
                 ORDER BY ordinal_position"
            }
        };

        let rows = tokio::time::timeout(self.metadata_timeout, self.fetch_rows(sql, &params))
            .await
            .map_err(|_| EtlError::Timeout(format!("metadata discovery for '{}'", table)))??;

        let columns: Vec<SourceColumn> = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name").and_then(Json::as_str)?;
                Some(match row.get("data_type").and_then(Json::as_str) {
                    Some(data_type) => SourceColumn::new(name, data_type),
                    None => SourceColumn::untyped(name),
                })
            })
            .collect();
        if columns.is_empty() {
            return Err(EtlError::NotFound(format!("table '{}'", table)));
        }
        Ok(columns)
    }

    /// Run a query and decode every row.
    pub async fn fetch_rows(&mut self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        match &mut self.driver {
            Driver::Postgres(conn) => {
                let rows = bind_params::<sqlx::Postgres>(sqlx::query(sql), params).fetch_all(&mut *conn).await?;
                rows.iter().map(pg_row_to_map).collect()
            }
            Driver::MySql(conn) => {
                let rows = bind_params::<sqlx::MySql>(sqlx::query(sql), params).fetch_all(&mut *conn).await?;
                rows.iter().map(mysql_row_to_map).collect()
            }
        }
    }

    /// Run a `SELECT COUNT(*) AS total` query.
    pub async fn fetch_count(&mut self, sql: &str, params: &[Value]) -> EtlResult<i64> {
        let total = match &mut self.driver {
            Driver::Postgres(conn) => bind_params::<sqlx::Postgres>(sqlx::query(sql), params)
                .fetch_one(&mut *conn)
                .await?
                .try_get::<i64, _>("total")?,
            Driver::MySql(conn) => bind_params::<sqlx::MySql>(sqlx::query(sql), params)
                .fetch_one(&mut *conn)
                .await?
                .try_get::<i64, _>("total")?,
        };
        Ok(total)
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> EtlResult<()> {
        match self.driver {
            Driver::Postgres(conn) => conn.close().await?,
            Driver::MySql(conn) => conn.close().await?,
        }
        Ok(())
    }
}

#[async_trait]
impl RowSource for DbConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&mut self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        self.fetch_rows(sql, params).await
    }

    async fn count(&mut self, sql: &str, params: &[Value]) -> EtlResult<i64> {
        self.fetch_count(sql, params).await
    }

    async fn columns(&mut self, table: &str) -> EtlResult<Vec<SourceColumn>> {
        self.discover_columns(table).await
    }

    async fn close(self) -> EtlResult<()> {
        DbConnection::close(self).await
    }
}

/// Bind parameters in placeholder order.
fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as HasArguments<'q>>::Arguments>,
    params: &'q [Value],
) -> Query<'q, DB, <DB as HasArguments<'q>>::Arguments>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    Option<&'q str>: Encode<'q, DB> + Type<DB>,
    NaiveDate: Encode<'q, DB> + Type<DB>,
    NaiveDateTime: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<&str>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Date(v) => query.bind(*v),
            Value::DateTime(v) => query.bind(*v),
        };
    }
    query
}

fn decoded<T>(result: Result<Option<T>, sqlx::Error>, to_json: impl FnOnce(T) -> Json) -> Result<Json, sqlx::Error> {
    Ok(result?.map(to_json).unwrap_or(Json::Null))
}

fn decode_failed(column: &str, type_name: &str, error: impl std::fmt::Display) -> EtlError {
    EtlError::Execution(format!(
        "cannot decode column '{}' of type {}: {}; add a string conversion for it",
        column, type_name, error
    ))
}

fn float(value: f64) -> Json {
    serde_json::Number::from_f64(value)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn text(value: impl ToString) -> Json {
    Json::String(value.to_string())
}

fn array<T>(values: Vec<T>, item: impl Fn(T) -> Json) -> Json {
    Json::Array(values.into_iter().map(item).collect())
}

/// Postgres output style: `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(interval: PgInterval) -> String {
    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    for (n, unit) in [(years, "year"), (months, "mon"), (interval.days, "day")] {
        if n != 0 {
            parts.push(format!("{} {}{}", n, unit, if n.abs() == 1 { "" } else { "s" }));
        }
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut clock = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            clock.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Decode a Postgres row by column type.
fn pg_row_to_map(row: &PgRow) -> EtlResult<Row> {
    let mut map = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = match type_name {
            "BOOL" => decoded(row.try_get::<Option<bool>, _>(i), Json::Bool),
            "INT2" => decoded(row.try_get::<Option<i16>, _>(i), |v| Json::from(v)),
            "INT4" => decoded(row.try_get::<Option<i32>, _>(i), |v| Json::from(v)),
            "INT8" => decoded(row.try_get::<Option<i64>, _>(i), |v| Json::from(v)),
            "FLOAT4" => decoded(row.try_get::<Option<f32>, _>(i), |v| float(v as f64)),
            "FLOAT8" => decoded(row.try_get::<Option<f64>, _>(i), float),
            // Kept as text so no precision is lost
            "NUMERIC" => decoded(row.try_get::<Option<rust_decimal::Decimal>, _>(i), text),
            "MONEY" => decoded(row.try_get::<Option<PgMoney>, _>(i), |v| text(v.to_decimal(2))),
            "DATE" => decoded(row.try_get::<Option<NaiveDate>, _>(i), text),
            "TIME" => decoded(row.try_get::<Option<NaiveTime>, _>(i), text),
            "TIMESTAMP" => decoded(row.try_get::<Option<NaiveDateTime>, _>(i), text),
            "TIMESTAMPTZ" => decoded(row.try_get::<Option<DateTime<Utc>>, _>(i), |v| {
                Json::String(v.to_rfc3339())
            }),
            "INTERVAL" => decoded(row.try_get::<Option<PgInterval>, _>(i), |v| Json::String(interval_text(v))),
            "UUID" => decoded(row.try_get::<Option<Uuid>, _>(i), text),
            "JSON" | "JSONB" => decoded(row.try_get::<Option<Json>, _>(i), |v| v),
            "BYTEA" => decoded(row.try_get::<Option<Vec<u8>>, _>(i), |bytes| {
                Json::String(String::from_utf8_lossy(&bytes).into_owned())
            }),
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
                decoded(row.try_get::<Option<Vec<String>>, _>(i), |v| array(v, Json::String))
            }
            "INT2[]" => decoded(row.try_get::<Option<Vec<i16>>, _>(i), |v| array(v, Json::from)),
            "INT4[]" => decoded(row.try_get::<Option<Vec<i32>>, _>(i), |v| array(v, Json::from)),
            "INT8[]" => decoded(row.try_get::<Option<Vec<i64>>, _>(i), |v| array(v, Json::from)),
            "FLOAT4[]" => decoded(row.try_get::<Option<Vec<f32>>, _>(i), |v| array(v, |f| float(f as f64))),
            "FLOAT8[]" => decoded(row.try_get::<Option<Vec<f64>>, _>(i), |v| array(v, float)),
            "NUMERIC[]" => decoded(row.try_get::<Option<Vec<rust_decimal::Decimal>>, _>(i), |v| array(v, text)),
            "BOOL[]" => decoded(row.try_get::<Option<Vec<bool>>, _>(i), |v| array(v, Json::Bool)),
            "UUID[]" => decoded(row.try_get::<Option<Vec<Uuid>>, _>(i), |v| array(v, text)),
            "DATE[]" => decoded(row.try_get::<Option<Vec<NaiveDate>>, _>(i), |v| array(v, text)),
            "TIMESTAMP[]" => decoded(row.try_get::<Option<Vec<NaiveDateTime>>, _>(i), |v| array(v, text)),
            _ => decoded(row.try_get::<Option<String>, _>(i), Json::String),
        }
        .map_err(|e| decode_failed(column.name(), type_name, e))?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

/// Decode a MySQL row by column type.
fn mysql_row_to_map(row: &MySqlRow) -> EtlResult<Row> {
    let mut map = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "BOOLEAN" => decoded(row.try_get::<Option<bool>, _>(i), Json::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                decoded(row.try_get::<Option<i64>, _>(i), |v| Json::from(v))
            }
            t if t.ends_with("UNSIGNED") => decoded(row.try_get::<Option<u64>, _>(i), |v| Json::from(v)),
            "FLOAT" => decoded(row.try_get::<Option<f32>, _>(i), |v| float(v as f64)),
            "DOUBLE" => decoded(row.try_get::<Option<f64>, _>(i), float),
            "DECIMAL" => decoded(row.try_get::<Option<rust_decimal::Decimal>, _>(i), text),
            "DATE" => decoded(row.try_get::<Option<NaiveDate>, _>(i), text),
            "TIME" => decoded(row.try_get::<Option<NaiveTime>, _>(i), text),
            "DATETIME" => decoded(row.try_get::<Option<NaiveDateTime>, _>(i), text),
            "TIMESTAMP" => decoded(row.try_get::<Option<DateTime<Utc>>, _>(i), |v| {
                Json::String(v.to_rfc3339())
            }),
            "JSON" => decoded(row.try_get::<Option<Json>, _>(i), |v| v),
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => decoded(
                row.try_get::<Option<Vec<u8>>, _>(i),
                |bytes| Json::String(String::from_utf8_lossy(&bytes).into_owned()),
            ),
            _ => decoded(row.try_get::<Option<String>, _>(i), Json::String).or_else(|_| {
                // Some servers report text columns as binary
                decoded(row.try_get::<Option<Vec<u8>>, _>(i), |bytes| {
                    Json::String(String::from_utf8_lossy(&bytes).into_owned())
                })
            }),
        }
        .map_err(|e| decode_failed(column.name(), &type_name, e))?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, TargetType};
    use crate::pipeline::steps::cast_value;
    use crate::transpiler::casts::cast_expr;
    use crate::transpiler::render::render_standalone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Postgres URL for the tests that run against a live server.
    const ENV_TEST_PG_URL: &str = "QAIL_ETL_TEST_PG_URL";

    async fn live_postgres() -> Option<PgConnection> {
        let url = std::env::var(ENV_TEST_PG_URL).ok()?;
        Some(PgConnection::connect(&url).await.unwrap())
    }

    async fn fetch(conn: &mut PgConnection, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        let rows = bind_params::<sqlx::Postgres>(sqlx::query(sql), params)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(pg_row_to_map).collect()
    }

    fn as_number(value: &Json) -> Option<f64> {
        match value {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    #[test]
    fn test_interval_text() {
        let interval = PgInterval {
            months: 14,
            days: 3,
            microseconds: (4 * 3600 + 5 * 60 + 6) * 1_000_000 + 500_000,
        };
        assert_eq!(interval_text(interval), "1 year 2 mons 3 days 04:05:06.5");
        let day = PgInterval {
            months: 0,
            days: 1,
            microseconds: 0,
        };
        assert_eq!(interval_text(day), "1 day");
        let zero = PgInterval {
            months: 0,
            days: 0,
            microseconds: 0,
        };
        assert_eq!(interval_text(zero), "00:00:00");
    }

    #[tokio::test]
    async fn test_sql_sanitizer_agrees_with_pipeline() {
        let Some(mut conn) = live_postgres().await else {
            return;
        };
        let generator = Dialect::Postgres.generator();
        let vectors = ["27.201.643", "1.234.567,89", "1,234,567.89", "1,5", "", "abc", " $ 1 200 ", "-3,75 €"];
        for raw in vectors {
            for target in [TargetType::Decimal, TargetType::Number, TargetType::Integer] {
                let expr = cast_expr(Expr::Param(Value::Text(raw.to_string())), target).alias("v");
                let (select, params) = render_standalone(&expr, generator.as_ref());
                let rows = fetch(&mut conn, &format!("SELECT {}", select), &params).await.unwrap();
                let from_pipeline = cast_value(&json!(raw), target).unwrap();
                assert_eq!(
                    as_number(&rows[0]["v"]),
                    as_number(&from_pipeline),
                    "{:?} as {}",
                    raw,
                    target
                );
            }
        }
    }

    #[tokio::test]
    async fn test_postgres_types_decode_to_values() {
        let Some(mut conn) = live_postgres().await else {
            return;
        };
        let sql = "SELECT 1 AS id, \
                   CAST('5f0c7a4e-3b1d-4c8e-9a2f-0d6b7e8c9f10' AS UUID) AS uid, \
                   ARRAY['a', 'b'] AS tags, \
                   INTERVAL '1 day 02:00:00' AS dur, \
                   TRUE AS flag, \
                   CAST(12.5 AS MONEY) AS price";
        let rows = fetch(&mut conn, sql, &[]).await.unwrap();
        assert_eq!(
            Json::Object(rows[0].clone()),
            json!({
                "id": 1,
                "uid": "5f0c7a4e-3b1d-4c8e-9a2f-0d6b7e8c9f10",
                "tags": ["a", "b"],
                "dur": "1 day 02:00:00",
                "flag": true,
                "price": "12.50"
            })
        );
    }

    #[tokio::test]
    async fn test_undecodable_column_is_an_error() {
        let Some(mut conn) = live_postgres().await else {
            return;
        };
        let err = fetch(&mut conn, "SELECT CAST('10.0.0.1' AS INET) AS addr", &[]).await.unwrap_err();
        match err {
            EtlError::Execution(message) => assert!(message.contains("'addr'")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
