//! Builds the sync components from a [`SyncConfig`].

use std::sync::Arc;
use wms_sync_core::mapping::{
    LocalMappingStore, MappingStore, NoMappingStore, PostgresMappingStore,
};
use wms_sync_core::{
    LocalStore, MappingResolver, MappingSource, OdbcSource, RemoteExtractor, Result, SyncConfig,
    SyncCycle, TransformEngine, WindowedCacheWriter,
};

/// Open the local store and bring its schema up to date.
#[tracing::instrument(level = "debug", skip(cfg), fields(path = %cfg.store.path.display()))]
pub async fn open_store(cfg: &SyncConfig) -> Result<LocalStore> {
    let store = LocalStore::open(&cfg.store).await?;
    store.bootstrap().await?;
    Ok(store)
}

pub fn build_resolver(cfg: &SyncConfig, store: &LocalStore) -> Result<MappingResolver> {
    let backend: Arc<dyn MappingStore> = match &cfg.mapping.source {
        MappingSource::Postgres { url } => {
            tracing::info!("mapping store: postgres");
            Arc::new(PostgresMappingStore::connect_lazy(
                url,
                cfg.mapping.timeout,
            )?)
        }
        MappingSource::Local => {
            tracing::info!("mapping store: local");
            Arc::new(LocalMappingStore::new(store))
        }
        MappingSource::Disabled => Arc::new(NoMappingStore),
    };
    Ok(MappingResolver::new(backend, cfg.mapping.timeout))
}

/// Wire the remote source, cache writer, mapping resolver and transform
/// engine into one cycle over `store`.
pub fn build_cycle(cfg: &SyncConfig, store: &LocalStore) -> Result<SyncCycle> {
    let source = OdbcSource::new(
        cfg.require_dsn()?,
        cfg.remote.login_timeout,
        cfg.remote.batch_size,
    );
    Ok(SyncCycle::new(
        RemoteExtractor::new(Arc::new(source), cfg.remote.schema.clone()),
        WindowedCacheWriter::new(store.clone(), cfg.window.clone()),
        build_resolver(cfg, store)?,
        TransformEngine::new(store.clone()),
        cfg.remote.query_path.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wms_sync_core::Error;

    fn config(dir: &tempfile::TempDir) -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.store.path = dir.path().join("database.db");
        cfg
    }

    #[tokio::test]
    async fn open_store_bootstraps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&config(&dir)).await.unwrap();
        assert_eq!(store.count("cache_orcamentos").await.unwrap(), 0);
        assert_eq!(store.count("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cycle_requires_a_dsn() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let store = open_store(&cfg).await.unwrap();
        let err = build_cycle(&cfg, &store).err().unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cycle_builds_with_local_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.remote.dsn = Some("DSN=WMS_SYNC_NOWHERE".to_string());
        cfg.mapping.source = MappingSource::Local;
        let store = open_store(&cfg).await.unwrap();
        assert!(build_cycle(&cfg, &store).is_ok());

        let mappings = build_resolver(&cfg, &store).unwrap().resolve_all().await;
        assert!(!mappings.any_external());
    }
}
