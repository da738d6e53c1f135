use super::{RemoteSession, RemoteSource};
use crate::models::{FieldValue, Record};
use crate::{Error, Result};
use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Longest text value fetched per column.
const MAX_TEXT_LEN: usize = 4096;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| Error::Connection(format!("odbc environment: {e}")))?;
    // A concurrent initialiser may win; either environment is fine.
    let _ = ENVIRONMENT.set(env);
    ENVIRONMENT
        .get()
        .ok_or_else(|| Error::BackendMessage("odbc environment unavailable".to_string()))
}

/// The ERP warehouse reached through an ODBC driver.
///
/// All driver calls block, so each one runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct OdbcSource {
    dsn: String,
    login_timeout: Duration,
    batch_size: usize,
}

impl OdbcSource {
    pub fn new(dsn: impl Into<String>, login_timeout: Duration, batch_size: usize) -> Self {
        Self {
            dsn: dsn.into(),
            login_timeout,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl RemoteSource for OdbcSource {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let dsn = self.dsn.clone();
        let login_timeout_sec = u32::try_from(self.login_timeout.as_secs()).unwrap_or(u32::MAX);
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection<'static>> {
            let env = environment()?;
            let options = ConnectionOptions {
                login_timeout_sec: Some(login_timeout_sec),
                ..ConnectionOptions::default()
            };
            env.connect_with_connection_string(&dsn, options)
                .map_err(|e| Error::Connection(e.to_string()))
        })
        .await
        .map_err(|e| Error::backend("odbc connect task", e))??;

        Ok(Box::new(OdbcSession {
            conn: Arc::new(Mutex::new(conn)),
            batch_size: self.batch_size,
        }))
    }
}

struct OdbcSession {
    conn: Arc<Mutex<Connection<'static>>>,
    batch_size: usize,
}

fn query_err(e: odbc_api::Error) -> Error {
    Error::Query(e.to_string())
}

fn poisoned<T>(_: T) -> Error {
    Error::BackendMessage("odbc connection poisoned".to_string())
}

#[async_trait]
impl RemoteSession for OdbcSession {
    async fn execute(&self, statement: &str) -> Result<()> {
        let conn = self.conn.clone();
        let statement = statement.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock().map_err(poisoned)?;
            conn.execute(&statement, ()).map_err(query_err)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::backend("odbc execute task", e))?
    }

    async fn query(&self, sql: &str) -> Result<Vec<Record>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || -> Result<Vec<Record>> {
            let conn = conn.lock().map_err(poisoned)?;
            let Some(mut cursor) = conn.execute(&sql, ()).map_err(query_err)? else {
                return Ok(Vec::new());
            };

            let names = cursor
                .column_names()
                .map_err(query_err)?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(query_err)?;

            let buffers =
                TextRowSet::for_cursor(batch_size, &mut cursor, Some(MAX_TEXT_LEN)).map_err(query_err)?;
            let mut block_cursor = cursor.bind_buffer(buffers).map_err(query_err)?;

            let mut out = Vec::new();
            while let Some(batch) = block_cursor.fetch().map_err(query_err)? {
                for row in 0..batch.num_rows() {
                    let mut record = Record::new();
                    for (col, name) in names.iter().enumerate() {
                        // CHAR columns come back blank padded.
                        let value = batch
                            .at(col, row)
                            .map(|bytes| {
                                FieldValue::Text(String::from_utf8_lossy(bytes).trim_end().to_string())
                            })
                            .unwrap_or(FieldValue::Null);
                        record.insert(name.trim().to_string(), value);
                    }
                    out.push(record);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::backend("odbc query task", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_dsn_is_a_connection_failure() {
        let source = OdbcSource::new(
            "DSN=wms_sync_no_such_dsn;UID=nobody;PWD=nothing",
            Duration::from_secs(1),
            16,
        );
        let err = source.connect().await.err().unwrap();
        assert!(err.is_connection(), "unexpected error: {err}");
    }
}
