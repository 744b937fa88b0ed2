use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};

use crate::query::safety::validate_reader_sql;

use super::{QueryResult, SecretResolver, SourceError, SourceKind, SourceSpec};

/// Pooled, read-only SQL connection to a relational source. Every statement
/// runs inside a `READ ONLY` transaction with a per-statement timeout.
pub struct SqlConnection {
    pool: PgPool,
    statement_timeout: Duration,
    source_name: String,
}

impl SqlConnection {
    pub async fn connect(
        spec: &SourceSpec,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, SourceError> {
        if spec.kind != SourceKind::Postgresql {
            return Err(SourceError::UnsupportedOperation {
                source_name: spec.name.clone(),
                operation: "sql".into(),
            });
        }
        let url = Self::connection_url(spec, resolver)?;
        let pool = PgPoolOptions::new()
            .max_connections(spec.pool.max_connections)
            .acquire_timeout(spec.pool.acquire_timeout())
            .idle_timeout(Duration::from_secs(spec.pool.idle_lifetime_secs))
            .connect_lazy(&url)
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?;
        Ok(Self {
            pool,
            statement_timeout: spec.timeout,
            source_name: spec.name.clone(),
        })
    }

    fn connection_url(
        spec: &SourceSpec,
        resolver: &dyn SecretResolver,
    ) -> Result<String, SourceError> {
        if let Some(uri) = &spec.uri {
            return Ok(uri.clone());
        }
        let host = spec
            .host
            .as_deref()
            .ok_or_else(|| SourceError::MalformedSpec(spec.name.clone(), "missing host".into()))?;
        let port = spec.port.unwrap_or(5432);
        let user = spec.username.as_deref().unwrap_or("postgres");
        let database = spec.database.as_deref().unwrap_or("postgres");
        let password = resolver.resolve(&spec.credential)?;
        Ok(match password {
            Some(secret) => format!(
                "postgres://{user}:{}@{host}:{port}/{database}",
                secret.expose_secret()
            ),
            None => format!("postgres://{user}@{host}:{port}/{database}"),
        })
    }

    /// Executes a parameterized read statement. Write statements are
    /// rejected before touching the wire.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, SourceError> {
        if !validate_reader_sql(sql).is_empty() {
            return Err(SourceError::WriteRejected);
        }

        let mut tx = self.pool.begin().await.map_err(|err| {
            if matches!(err, sqlx::Error::PoolTimedOut) {
                SourceError::AcquireTimeout(self.source_name.clone())
            } else {
                SourceError::ConnectionError(err.to_string())
            }
        })?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|err| SourceError::ConnectionError(err.to_string()))?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_json_value(query, param)?;
        }
        let rows = query
            .fetch_all(&mut *tx)
            .await
            .map_err(|err| SourceError::Upstream(err.to_string()))?;
        tx.commit()
            .await
            .map_err(|err| SourceError::ConnectionError(err.to_string()))?;

        Ok(rows_to_result(&rows))
    }
}

/// Binds one JSON parameter without string interpolation. Homogeneous
/// arrays bind as native Postgres arrays (the `= ANY($n)` form); anything
/// else binds as jsonb.
fn bind_json_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Result<Query<'q, Postgres, PgArguments>, SourceError> {
    Ok(match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                query.bind(int)
            } else {
                query.bind(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(text) => query.bind(text.as_str()),
        Value::Array(items) => {
            if items.iter().all(|item| item.is_string()) {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect();
                query.bind(strings)
            } else if items.iter().all(|item| item.is_i64()) {
                let ints: Vec<i64> = items.iter().filter_map(Value::as_i64).collect();
                query.bind(ints)
            } else if items.iter().all(|item| item.is_number()) {
                let floats: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                query.bind(floats)
            } else {
                query.bind(value)
            }
        }
        Value::Object(_) => query.bind(value),
    })
}

fn rows_to_result(rows: &[PgRow]) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect()
        })
        .unwrap_or_default();
    let data = rows
        .iter()
        .map(|row| {
            (0..row.columns().len())
                .map(|index| pg_value_to_json(row, index))
                .collect()
        })
        .collect();
    QueryResult {
        columns,
        rows: data,
    }
}

/// Decodes one column to JSON by Postgres type name. Unknown types fall
/// back to their text rendering, then to null.
fn pg_value_to_json(row: &PgRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_uppercase();
    match type_name.as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map(|value| value.map(Value::Bool).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|value| value.map(|v| Value::from(v as i64)).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|value| value.map(|v| Value::from(v as i64)).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map(|value| value.map(Value::from).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|value| value.map(|v| Value::from(v as f64)).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map(|value| value.map(Value::from).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)
            .map(|value| value.unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(|value| {
                value
                    .map(|v| Value::String(v.to_string()))
                    .unwrap_or(Value::Null)
            })
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map(|value| {
                value
                    .map(|v| Value::String(v.to_rfc3339()))
                    .unwrap_or(Value::Null)
            })
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .map(|value| value.map(Value::String).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
    }
}
