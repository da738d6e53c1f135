use crate::cache::{CacheReport, WindowedCacheWriter};
use crate::extract::{RemoteExtractor, load_query};
use crate::mapping::{MappingResolver, MappingSet};
use crate::outcome::{Stage, StageOutcome, StageReport};
use crate::transform::{FLUSH_ORDER, TransformEngine, TransformReport};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Result of one full cycle. A cycle never returns an error; every failure
/// is recorded against the stage it happened in.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub stages: Vec<StageReport>,
    pub cache: Option<CacheReport>,
    pub transform: Option<TransformReport>,
    /// Set when the remote source could not be reached.
    pub connection_failure: Option<String>,
}

impl CycleSummary {
    pub fn aborted_on_connection(&self) -> bool {
        self.connection_failure.is_some()
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.outcome)
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|s| s.outcome.is_failed())
            .map(|s| s.stage)
            .collect()
    }
}

/// Extract, replicate the cache window, resolve mappings, transform.
pub struct SyncCycle {
    extractor: RemoteExtractor,
    writer: WindowedCacheWriter,
    resolver: MappingResolver,
    engine: TransformEngine,
    query_path: PathBuf,
}

impl SyncCycle {
    pub fn new(
        extractor: RemoteExtractor,
        writer: WindowedCacheWriter,
        resolver: MappingResolver,
        engine: TransformEngine,
        query_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            writer,
            resolver,
            engine,
            query_path: query_path.into(),
        }
    }

    #[tracing::instrument(level = "info", name = "sync.cycle", skip(self))]
    pub async fn run(&self) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary {
            started_at: Local::now(),
            elapsed: Duration::ZERO,
            stages: Vec::new(),
            cache: None,
            transform: None,
            connection_failure: None,
        };

        self.refresh_cache(&mut summary).await;
        if summary.aborted_on_connection() {
            let reason = "remote unreachable".to_string();
            for stage in std::iter::once(Stage::Aggregate).chain(FLUSH_ORDER) {
                push(
                    &mut summary,
                    stage,
                    StageOutcome::Skipped {
                        reason: reason.clone(),
                    },
                );
            }
        } else {
            let mappings = self.resolver.resolve_all().await;
            log_mappings(&mappings);
            self.transform(&mappings, &mut summary).await;
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            elapsed_ms = summary.elapsed.as_millis() as u64,
            failed = summary.failed_stages().len(),
            "cycle finished"
        );
        summary
    }

    async fn refresh_cache(&self, summary: &mut CycleSummary) {
        let sql = match load_query(&self.query_path, self.writer.span_days()).await {
            Ok(sql) => sql,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.query_path.display(), "cache query unavailable");
                push(summary, Stage::Extract, StageOutcome::Failed { error: e.to_string() });
                push(
                    summary,
                    Stage::CacheWindow,
                    StageOutcome::Skipped {
                        reason: "no query".to_string(),
                    },
                );
                return;
            }
        };

        let records = match self.extractor.extract(&sql).await {
            Ok(records) => records,
            Err(e) => {
                summary.connection_failure = Some(e.to_string());
                push(summary, Stage::Extract, StageOutcome::Failed { error: e.to_string() });
                push(
                    summary,
                    Stage::CacheWindow,
                    StageOutcome::Skipped {
                        reason: "remote unreachable".to_string(),
                    },
                );
                return;
            }
        };
        push(
            summary,
            Stage::Extract,
            StageOutcome::Succeeded {
                rows: records.len() as u64,
            },
        );

        let today = Local::now().date_naive();
        match self.writer.replicate(&records, today).await {
            Ok(report) => {
                if report.errors > 0 || report.refused_empty {
                    tracing::warn!("{}", report.summary());
                } else {
                    tracing::info!("{}", report.summary());
                }
                let outcome = if report.refused_empty {
                    StageOutcome::Skipped {
                        reason: "empty extraction; window kept".to_string(),
                    }
                } else {
                    StageOutcome::from_counts(report.inserted, report.errors)
                };
                summary.cache = Some(report);
                push_logged(summary, Stage::CacheWindow, outcome);
            }
            Err(e) => {
                push(summary, Stage::CacheWindow, StageOutcome::Failed { error: e.to_string() });
            }
        }
    }

    async fn transform(&self, mappings: &MappingSet, summary: &mut CycleSummary) {
        match self.engine.run(mappings).await {
            Ok(report) => {
                tracing::info!("{}", report.summary());
                push_logged(
                    summary,
                    Stage::Aggregate,
                    StageOutcome::from_counts(
                        report.orders as u64,
                        report.skipped_rows + report.coercion_errors,
                    ),
                );
                for stage in &report.stages {
                    stage.log();
                    summary.stages.push(stage.clone());
                }
                summary.transform = Some(report);
            }
            Err(e) => {
                push(summary, Stage::Aggregate, StageOutcome::Failed { error: e.to_string() });
                for stage in FLUSH_ORDER {
                    push(
                        summary,
                        stage,
                        StageOutcome::Skipped {
                            reason: "cache unreadable".to_string(),
                        },
                    );
                }
            }
        }
    }
}

fn push(summary: &mut CycleSummary, stage: Stage, outcome: StageOutcome) {
    let report = StageReport::new(stage, outcome);
    report.log();
    summary.stages.push(report);
}

/// Record a stage whose detailed summary line was already logged.
fn push_logged(summary: &mut CycleSummary, stage: Stage, outcome: StageOutcome) {
    summary.stages.push(StageReport::new(stage, outcome));
}

fn log_mappings(set: &MappingSet) {
    if set.any_external() {
        tracing::info!(
            "mappings | orders={} | products={} | order_items={}",
            set.orders.describe(),
            set.products.describe(),
            set.order_items.describe()
        );
    } else {
        tracing::debug!("mappings | builtin");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::extract::MemorySource;
    use crate::models::{FieldValue, Record};
    use crate::store::LocalStore;
    use crate::store::test_support::temp_store;
    use std::sync::Arc;

    fn line(order: &str, product: &str, seq: i64) -> Record {
        let today = Local::now().format("%Y-%m-%d 07:00:00").to_string();
        let mut rec: Record = [
            ("IDEMPRESA", "1"),
            ("IDORCAMENTO", order),
            ("IDPRODUTO", product),
            ("IDSUBPRODUTO", "0"),
            ("QTDPRODUTO", "1000"),
            ("IDLOCALRETIRADA", "1"),
            ("IDSECAO", "5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::from(v)))
        .collect();
        rec.insert("NUMSEQUENCIA".into(), FieldValue::Integer(seq));
        rec.insert("DTMOVIMENTO".into(), FieldValue::from(today));
        rec
    }

    fn build_cycle(store: &LocalStore, source: MemorySource, query_path: PathBuf) -> SyncCycle {
        SyncCycle::new(
            RemoteExtractor::new(Arc::new(source), "DBA"),
            WindowedCacheWriter::new(
                store.clone(),
                WindowConfig {
                    days: 31,
                    margin_days: 1,
                    purge_on_empty: false,
                },
            ),
            MappingResolver::builtin_only(),
            TransformEngine::new(store.clone()),
            query_path,
        )
    }

    async fn cycle_with(
        source: MemorySource,
        with_query: bool,
    ) -> (tempfile::TempDir, LocalStore, SyncCycle) {
        let (dir, store) = temp_store().await;
        let query_path = dir.path().join("orcamentos.sql");
        if with_query {
            tokio::fs::write(&query_path, "SELECT * FROM ORCAMENTOS")
                .await
                .unwrap();
        }
        let cycle = build_cycle(&store, source, query_path);
        (dir, store, cycle)
    }

    #[tokio::test]
    async fn full_cycle_populates_entities() {
        let source = MemorySource::new(vec![line("500", "A", 1), line("500", "B", 2)]);
        let (_dir, store, cycle) = cycle_with(source, true).await;

        let summary = cycle.run().await;
        assert!(summary.failed_stages().is_empty(), "{:?}", summary.stages);
        assert_eq!(
            summary.outcome(Stage::Extract),
            Some(&StageOutcome::Succeeded { rows: 2 })
        );
        assert_eq!(summary.cache.as_ref().unwrap().inserted, 2);
        assert_eq!(store.count("orders").await.unwrap(), 1);
        assert_eq!(store.count("products").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn connection_failure_aborts_the_cycle() {
        let source = MemorySource::new(vec![line("500", "A", 1)]).refuse_connections();
        let (_dir, store, cycle) = cycle_with(source, true).await;

        let summary = cycle.run().await;
        assert!(summary.aborted_on_connection());
        assert!(summary.outcome(Stage::WorkUnits).unwrap().is_skipped());
        assert_eq!(store.count("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_query_still_transforms_existing_cache() {
        let source = MemorySource::new(vec![line("500", "A", 1)]);
        let (_dir, _store, cycle) = cycle_with(source, false).await;

        let summary = cycle.run().await;
        assert!(summary.outcome(Stage::Extract).unwrap().is_failed());
        assert!(summary.outcome(Stage::CacheWindow).unwrap().is_skipped());
        assert!(!summary.aborted_on_connection());
        assert!(summary.transform.is_some());
    }

    #[tokio::test]
    async fn failing_query_keeps_the_window() {
        let source = MemorySource::new(vec![line("500", "A", 1)]);
        let (dir, store, cycle) = cycle_with(source.clone(), true).await;
        cycle.run().await;
        assert_eq!(store.count("cache_orcamentos").await.unwrap(), 1);

        let broken = build_cycle(
            &store,
            source.fail_queries(),
            dir.path().join("orcamentos.sql"),
        );
        let summary = broken.run().await;
        assert!(summary.cache.as_ref().unwrap().refused_empty);
        assert!(summary.outcome(Stage::CacheWindow).unwrap().is_skipped());
        assert_eq!(store.count("cache_orcamentos").await.unwrap(), 1);
    }
}
