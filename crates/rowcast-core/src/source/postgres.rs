//! PostgreSQL row source.
//!
//! Statements are prepared with every parameter typed `TEXT`; queries cast
//! where they need another type (`WHERE day = $1::date`). Rows are pulled
//! from `query_raw`, whose stream is fed by a bounded channel from the
//! connection task, so only the rows currently in flight are held in memory.
//!
//! Only a column that cannot be decoded is a per-row fault. An error raised
//! by the server while rows stream (a failing expression, `statement_timeout`)
//! ends the query and is reported as a query execution failure.

use super::{Query, RowSource, RowStream};
use crate::config::SourceConfig;
use crate::row::{Row, Value};
use crate::{Error, Result, SourceError};
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

/// Row source backed by a single PostgreSQL connection.
pub struct PostgresSource {
    client: Arc<Client>,
    query_timeout: Duration,
}

impl PostgresSource {
    /// Connect and spawn the connection driver task.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .parse()
            .map_err(|e| Error::Config(format!("invalid connection string: {}", e)))?;

        let target = describe_target(&pg_config);

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            Error::Source(SourceError::ConnectionFailed {
                target: target.clone(),
                message: e.to_string(),
            })
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        info!(target = %target, "Connected to PostgreSQL");

        Ok(Self {
            client: Arc::new(client),
            query_timeout: config.query_timeout(),
        })
    }

    async fn start_query(&self, query: &Query) -> Result<tokio_postgres::RowStream> {
        let param_types = vec![Type::TEXT; query.params.len()];
        let statement = self
            .client
            .prepare_typed(&query.text, &param_types)
            .await
            .map_err(query_error)?;

        debug!(
            columns = statement.columns().len(),
            params = query.params.len(),
            "Statement prepared"
        );

        self.client
            .query_raw(&statement, query.params.iter())
            .await
            .map_err(query_error)
    }
}

#[async_trait]
impl RowSource for PostgresSource {
    async fn open(&self, query: &Query) -> Result<Box<dyn RowStream>> {
        let stream = tokio::time::timeout(self.query_timeout, self.start_query(query))
            .await
            .map_err(|_| {
                SourceError::QueryExecution(format!(
                    "query not accepted within {}s",
                    self.query_timeout.as_secs()
                ))
            })??;

        Ok(Box::new(PostgresRowStream {
            inner: Box::pin(stream),
            _client: Arc::clone(&self.client),
            exhausted: false,
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// Fused stream over a `query_raw` result.
struct PostgresRowStream {
    inner: Pin<Box<tokio_postgres::RowStream>>,
    // Dropping the last client handle closes the connection mid-stream.
    _client: Arc<Client>,
    exhausted: bool,
}

#[async_trait]
impl RowStream for PostgresRowStream {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.inner.next().await {
            Some(Ok(row)) => decode_row(&row).map(Some),
            // A server error aborts the portal; no further rows will arrive.
            Some(Err(e)) => {
                self.exhausted = true;
                if e.is_closed() {
                    return Err(SourceError::StreamClosed.into());
                }
                Err(query_error(e))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

fn query_error(e: tokio_postgres::Error) -> Error {
    let message = match e.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => e.to_string(),
    };
    Error::Source(SourceError::QueryExecution(message))
}

fn describe_target(config: &tokio_postgres::Config) -> String {
    let host = config
        .get_hosts()
        .first()
        .map(|h| match h {
            tokio_postgres::config::Host::Tcp(name) => name.clone(),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(path) => path.display().to_string(),
        })
        .unwrap_or_else(|| "localhost".to_string());
    let port = config.get_ports().first().copied().unwrap_or(5432);
    format!("{}:{}", host, port)
}

/// Convert a PostgreSQL row into a [`Row`], preserving column order.
fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(|message| {
            Error::Source(SourceError::RowRead(format!(
                "column {} ({}): {}",
                column.name(),
                column.type_().name(),
                message
            )))
        })?;
        out.insert(column.name(), value);
    }
    Ok(out)
}

fn get<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> std::result::Result<Option<T>, String> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
}

fn get_array<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    convert: impl Fn(T) -> Value,
) -> std::result::Result<Value, String>
where
    T: FromSql<'a>,
{
    Ok(match get::<Vec<Option<T>>>(row, idx)? {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map(&convert).unwrap_or(Value::Null))
                .collect(),
        ),
        None => Value::Null,
    })
}

fn decode_column(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<Value, String> {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.into(),
        Type::INT2 => get::<i16>(row, idx)?.map(i64::from).into(),
        Type::INT4 => get::<i32>(row, idx)?.into(),
        Type::INT8 => get::<i64>(row, idx)?.into(),
        Type::OID => get::<u32>(row, idx)?.map(i64::from).into(),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(f64::from).into(),
        Type::FLOAT8 => get::<f64>(row, idx)?.into(),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.into()
        }
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|t| t.to_rfc3339())
            .into(),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            .into(),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?
            .map(|d| d.to_string())
            .into(),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map(|t| t.to_string())
            .into(),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|u| u.to_string()).into(),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?
            .map(|b| base64::engine::general_purpose::STANDARD.encode(b))
            .into(),
        Type::BOOL_ARRAY => get_array::<bool>(row, idx, Value::Bool)?,
        Type::INT2_ARRAY => get_array::<i16>(row, idx, |v| Value::Int(i64::from(v)))?,
        Type::INT4_ARRAY => get_array::<i32>(row, idx, |v| Value::Int(i64::from(v)))?,
        Type::INT8_ARRAY => get_array::<i64>(row, idx, Value::Int)?,
        Type::FLOAT4_ARRAY => get_array::<f32>(row, idx, |v| Value::Float(f64::from(v)))?,
        Type::FLOAT8_ARRAY => get_array::<f64>(row, idx, Value::Float)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            get_array::<String>(row, idx, Value::String)?
        }
        Type::UUID_ARRAY => get_array::<uuid::Uuid>(row, idx, |u| Value::String(u.to_string()))?,
        Type::JSON_ARRAY | Type::JSONB_ARRAY => {
            get_array::<serde_json::Value>(row, idx, Value::from)?
        }
        _ => {
            return Err(
                "unsupported column type; cast it in the query (e.g. ::text or ::float8)"
                    .to_string(),
            )
        }
    };
    Ok(value)
}
