use std::error::Error as StdError;

/// Common error type for `wms_sync_core`.
///
/// Store and driver failures keep their source chain via `Error::backend`.
/// Per-row and per-query failures are normally tallied by the caller instead
/// of being surfaced through this type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote source could not be reached. Aborts the current cycle only.
    #[error("remote connection failed: {0}")]
    Connection(String),

    /// A remote query was rejected or failed while fetching.
    #[error("query failed: {0}")]
    Query(String),

    /// A single field or row could not be converted to its target type.
    #[error("coercion failed: {0}")]
    Coercion(String),

    /// A staged batch could not be committed to the local store.
    #[error("bulk write failed for {stage}")]
    BulkWrite {
        stage: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "wms_sync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn bulk_write(
        stage: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::BulkWrite {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
