use super::{DataContract, Dataset, EntityMapping, FieldRule, Mapping, MappingSet};
use crate::store::LocalStore;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

/// The highest active version of a published mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDocument {
    pub version: i64,
    pub rules: Vec<FieldRule>,
}

impl MappingDocument {
    /// Parse a stored document. Some writers store the rule array as a JSON
    /// string inside the JSON column, so one level of string nesting is
    /// unwrapped.
    pub fn parse(version: i64, raw: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::backend("mapping document json", e))?;
        if let serde_json::Value::String(inner) = &value {
            value = serde_json::from_str(inner)
                .map_err(|e| Error::backend("mapping document json", e))?;
        }
        let rules: Vec<FieldRule> = serde_json::from_value(value)
            .map_err(|e| Error::backend("mapping document rules", e))?;
        Ok(Self { version, rules })
    }
}

/// Somewhere mapping documents are published.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Highest-versioned active document for `dataset`, if any.
    async fn load_active(&self, dataset: Dataset) -> Result<Option<MappingDocument>>;
}

/// Always answers "no mapping"; every entity uses the built-in rules.
pub struct NoMappingStore;

#[async_trait]
impl MappingStore for NoMappingStore {
    async fn load_active(&self, _dataset: Dataset) -> Result<Option<MappingDocument>> {
        Ok(None)
    }
}

/// Mapping documents kept in the editor's Postgres database.
///
/// The pool connects lazily so an unreachable database only degrades the
/// cycle to built-in mappings.
pub struct PostgresMappingStore {
    pool: PgPool,
}

impl PostgresMappingStore {
    #[tracing::instrument(level = "debug", skip(url))]
    pub fn connect_lazy(url: &str, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_lazy(url)
            .map_err(|e| Error::backend("connect mapping postgres", e))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MappingStore for PostgresMappingStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn load_active(&self, dataset: Dataset) -> Result<Option<MappingDocument>> {
        let row = sqlx::query(
            "SELECT version::bigint AS version, mapping_json::text AS mapping_json \
             FROM db2_mappings WHERE dataset = $1 AND is_active = true \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(dataset.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("load mapping postgres", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row
            .try_get("version")
            .map_err(|e| Error::backend("load mapping postgres", e))?;
        let raw: String = row
            .try_get("mapping_json")
            .map_err(|e| Error::backend("load mapping postgres", e))?;
        MappingDocument::parse(version, &raw).map(Some)
    }
}

/// Mapping documents stored in the local store's `db2_mappings` table.
pub struct LocalMappingStore {
    pool: SqlitePool,
}

impl LocalMappingStore {
    pub fn new(store: &LocalStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }
}

#[async_trait]
impl MappingStore for LocalMappingStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn load_active(&self, dataset: Dataset) -> Result<Option<MappingDocument>> {
        let row = sqlx::query(
            "SELECT version, mapping_json FROM db2_mappings \
             WHERE dataset = ? AND is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(dataset.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("load mapping sqlite", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row
            .try_get("version")
            .map_err(|e| Error::backend("load mapping sqlite", e))?;
        let raw: String = row
            .try_get("mapping_json")
            .map_err(|e| Error::backend("load mapping sqlite", e))?;
        MappingDocument::parse(version, &raw).map(Some)
    }
}

/// Picks external or built-in rules per entity.
///
/// Resolution never fails: an unreachable store, a timeout, a malformed
/// document or an empty rule list all yield the built-in mapping.
#[derive(Clone)]
pub struct MappingResolver {
    store: Arc<dyn MappingStore>,
    timeout: Duration,
}

impl MappingResolver {
    pub fn new(store: Arc<dyn MappingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn builtin_only() -> Self {
        Self::new(Arc::new(NoMappingStore), Duration::from_secs(1))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, dataset: Dataset) -> EntityMapping {
        let loaded = tokio::time::timeout(self.timeout, self.store.load_active(dataset)).await;
        let doc = match loaded {
            Ok(Ok(Some(doc))) if !doc.rules.is_empty() => doc,
            Ok(Ok(_)) => return EntityMapping::builtin(dataset),
            Ok(Err(e)) => {
                tracing::warn!(%dataset, error = %e, "mapping store unavailable; using builtin mapping");
                return EntityMapping::builtin(dataset);
            }
            Err(_) => {
                tracing::warn!(%dataset, timeout_ms = self.timeout.as_millis() as u64, "mapping store timed out; using builtin mapping");
                return EntityMapping::builtin(dataset);
            }
        };

        let mapping = Mapping::from_rules(dataset, &doc.rules);
        let contract = DataContract::for_dataset(dataset);
        let missing = contract.missing_required(&mapping);
        if !missing.is_empty() {
            tracing::warn!(
                %dataset,
                version = doc.version,
                missing = %missing.join(","),
                "external mapping lacks required fields"
            );
        }
        let unknown = contract.unknown_fields(&mapping);
        if !unknown.is_empty() {
            tracing::debug!(%dataset, version = doc.version, unknown = %unknown.join(","), "mapped fields the app does not read");
        }
        for (field, cast, expected) in contract.cast_conflicts(&mapping) {
            tracing::warn!(
                %dataset,
                version = doc.version,
                field,
                cast = cast.as_str(),
                expected = ?expected,
                "mapping cast contradicts the field type"
            );
        }
        EntityMapping::External {
            version: doc.version,
            mapping,
        }
    }

    /// Resolve every entity the transform emits, each independently.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve_all(&self) -> MappingSet {
        MappingSet {
            orders: self.resolve(Dataset::Orders).await,
            products: self.resolve(Dataset::Products).await,
            order_items: self.resolve(Dataset::OrderItems).await,
        }
    }
}
