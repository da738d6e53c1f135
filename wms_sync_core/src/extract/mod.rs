//! Read-only extraction from the upstream ERP.
//!
//! [`RemoteSource`] is the seam: [`OdbcSource`] talks to the real warehouse,
//! [`MemorySource`] serves canned rows for tests and dry runs.

pub mod memory;
pub mod odbc;

use crate::models::Record;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use memory::MemorySource;
pub use odbc::OdbcSource;

/// An open connection to the upstream source.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a statement that returns no rows.
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Run a query and collect every row.
    async fn query(&self, sql: &str) -> Result<Vec<Record>>;
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One connection attempt. Failure maps to [`Error::Connection`].
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// Longest prefix of a failed query kept in the log.
const LOGGED_QUERY_CHARS: usize = 500;

/// Runs cache queries against a [`RemoteSource`].
#[derive(Clone)]
pub struct RemoteExtractor {
    source: Arc<dyn RemoteSource>,
    schema: String,
}

impl RemoteExtractor {
    pub fn new(source: Arc<dyn RemoteSource>, schema: impl Into<String>) -> Self {
        Self {
            source,
            schema: schema.into(),
        }
    }

    /// Connect, select the schema, run `sql`.
    ///
    /// Only a connection failure is returned as an error. A failed or
    /// rejected query is logged and yields no rows, so callers cannot tell
    /// an empty window from a transient failure by the result alone.
    #[tracing::instrument(level = "debug", skip(self, sql))]
    pub async fn extract(&self, sql: &str) -> Result<Vec<Record>> {
        let session = self.source.connect().await.map_err(|e| match e {
            Error::Connection(_) => e,
            other => Error::Connection(other.to_string()),
        })?;

        let preamble = format!("SET CURRENT SCHEMA {}", self.schema);
        if let Err(e) = session.execute(&preamble).await {
            tracing::error!(error = %e, query = %preamble, "schema selection failed");
            return Ok(Vec::new());
        }

        match session.query(sql).await {
            Ok(rows) => Ok(rows.into_iter().map(trim_column_names).collect()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    query = %truncate_chars(sql, LOGGED_QUERY_CHARS),
                    "remote query failed"
                );
                Ok(Vec::new())
            }
        }
    }
}

fn trim_column_names(record: Record) -> Record {
    record
        .into_iter()
        .map(|(k, v)| {
            let trimmed = k.trim();
            if trimmed.len() == k.len() {
                (k, v)
            } else {
                (trimmed.to_string(), v)
            }
        })
        .collect()
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Read the cache extraction query from disk. Every `{window_days}` in the
/// text is replaced with the span of the cache window, so the remote filter
/// and the local delete agree on where the window starts.
#[tracing::instrument(level = "debug")]
pub async fn load_query(path: &Path, window_days: i64) -> Result<String> {
    let sql = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("query file {}", path.display()))
        } else {
            Error::backend(format!("read query file {}", path.display()), e)
        }
    })?;
    let sql = sql.trim().trim_end_matches(';').trim().to_string();
    if sql.is_empty() {
        return Err(Error::InvalidInput(format!(
            "query file {} is empty",
            path.display()
        )));
    }
    Ok(sql.replace(WINDOW_DAYS_PLACEHOLDER, &window_days.to_string()))
}

const WINDOW_DAYS_PLACEHOLDER: &str = "{window_days}";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    fn rows() -> Vec<Record> {
        let mut rec = Record::new();
        rec.insert(" IDPRODUTO ".into(), FieldValue::from("A"));
        rec.insert("QTDPRODUTO".into(), FieldValue::from("1000"));
        vec![rec]
    }

    #[tokio::test]
    async fn selects_schema_then_trims_column_names() {
        let source = Arc::new(MemorySource::new(rows()));
        let extractor = RemoteExtractor::new(source.clone(), "DBA");
        let out = extractor.extract("SELECT * FROM ORCAMENTOS").await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["IDPRODUTO"], FieldValue::from("A"));
        assert_eq!(
            source.executed(),
            vec![
                "SET CURRENT SCHEMA DBA".to_string(),
                "SELECT * FROM ORCAMENTOS".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn query_failure_yields_empty_rows() {
        let source = Arc::new(MemorySource::new(rows()).fail_queries());
        let extractor = RemoteExtractor::new(source, "DBA");
        let out = extractor.extract("SELECT broken").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        let source = Arc::new(MemorySource::new(rows()).refuse_connections());
        let extractor = RemoteExtractor::new(source, "DBA");
        let err = extractor.extract("SELECT 1").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("seção", 3), "seç");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn loads_and_cleans_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.sql");
        tokio::fs::write(&path, "SELECT 1 FROM SYSIBM.SYSDUMMY1;\n")
            .await
            .unwrap();
        assert_eq!(
            load_query(&path, 32).await.unwrap(),
            "SELECT 1 FROM SYSIBM.SYSDUMMY1"
        );
        assert!(matches!(
            load_query(&dir.path().join("missing.sql"), 32).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn window_span_is_substituted_into_the_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.sql");
        tokio::fs::write(
            &path,
            "SELECT * FROM DBA.ORCAMENTO O\nWHERE O.DTMOVIMENTO >= (CURRENT DATE - {window_days} DAYS)\n",
        )
        .await
        .unwrap();
        let sql = load_query(&path, 45).await.unwrap();
        assert!(sql.ends_with("(CURRENT DATE - 45 DAYS)"), "{sql}");
        assert!(!sql.contains("{window_days}"));
    }
}
