use chrono::{Duration as Days, Local};
use sqlx::Row;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wms_sync_core::mapping::LocalMappingStore;
use wms_sync_core::{
    FieldValue, LocalStore, LocalStoreConfig, MappingResolver, MemorySource, Record,
    RemoteExtractor, Stage, StageOutcome, SyncCycle, TransformEngine, WindowConfig,
    WindowedCacheWriter,
};

async fn open_store(dir: &Path) -> LocalStore {
    let store = LocalStore::open(&LocalStoreConfig {
        path: dir.join("database.db"),
        busy_timeout: Duration::from_secs(5),
        max_connections: 2,
    })
    .await
    .unwrap();
    store.bootstrap().await.unwrap();
    store
}

async fn cycle(
    dir: &Path,
    store: &LocalStore,
    source: MemorySource,
    resolver: MappingResolver,
) -> SyncCycle {
    let query_path = dir.join("orcamentos.sql");
    tokio::fs::write(&query_path, "SELECT * FROM ORCAMENTOS")
        .await
        .unwrap();
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
        resolver,
        TransformEngine::new(store.clone()),
        query_path,
    )
}

/// One remote budget line for tenant 1, `days_ago` days before today.
fn line(order: i64, product: &str, qty: f64, section: i64, pickup: i64, days_ago: i64) -> Record {
    let moved = (Local::now() - Days::days(days_ago))
        .format("%Y-%m-%d 09:30:00")
        .to_string();
    let mut rec = Record::new();
    rec.insert("IDEMPRESA".into(), FieldValue::Integer(1));
    rec.insert("IDORCAMENTO".into(), FieldValue::Integer(order));
    rec.insert("IDPRODUTO".into(), FieldValue::from(product));
    rec.insert("IDSUBPRODUTO".into(), FieldValue::from("0"));
    rec.insert("NUMSEQUENCIA".into(), FieldValue::Integer(1));
    rec.insert("QTDPRODUTO".into(), FieldValue::Real(qty));
    rec.insert("VALTOTLIQUIDO".into(), FieldValue::Real(1500.0));
    rec.insert("DESCRRESPRODUTO".into(), FieldValue::from(format!("Produto {product}")));
    rec.insert("IDLOCALRETIRADA".into(), FieldValue::Integer(pickup));
    rec.insert("IDSECAO".into(), FieldValue::Integer(section));
    rec.insert("DESCLIENTE".into(), FieldValue::from("Obra Central"));
    rec.insert("DTMOVIMENTO".into(), FieldValue::from(moved));
    rec
}

async fn quantities(store: &LocalStore) -> Vec<f64> {
    sqlx::query(
        "SELECT oi.quantity FROM order_items oi JOIN products p ON p.id = oi.product_id ORDER BY p.erp_code",
    )
    .fetch_all(store.pool())
    .await
    .unwrap()
    .iter()
    .map(|r| r.get::<f64, _>("quantity"))
    .collect()
}

#[tokio::test]
async fn budget_lines_become_orders_items_and_work_units() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let source = MemorySource::new(vec![
        line(500, "A", 1000.0, 5, 1, 0),
        line(500, "B", 2000.0, 6, 2, 0),
    ]);
    let cycle = cycle(dir.path(), &store, source, MappingResolver::builtin_only()).await;

    let summary = cycle.run().await;
    assert!(summary.failed_stages().is_empty(), "{:?}", summary.stages);

    let order = sqlx::query("SELECT id, erp_order_id, customer_name, pickup_points FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(order.get::<String, _>("erp_order_id"), "1-500");
    assert_eq!(order.get::<String, _>("customer_name"), "Obra Central");
    assert_eq!(order.get::<String, _>("pickup_points"), "[1,2]");

    assert_eq!(store.count("products").await.unwrap(), 2);
    assert_eq!(quantities(&store).await, vec![1.0, 2.0]);

    let order_id: String = order.get("id");
    let units = sqlx::query(
        "SELECT section, pickup_point FROM work_units WHERE order_id = ? ORDER BY pickup_point",
    )
    .bind(&order_id)
    .fetch_all(store.pool())
    .await
    .unwrap();
    let pairs: Vec<(Option<String>, i64)> = units
        .iter()
        .map(|r| (r.get("section"), r.get("pickup_point")))
        .collect();
    assert_eq!(
        pairs,
        vec![(Some("5".to_string()), 1), (Some("6".to_string()), 2)]
    );

    let names: Vec<String> = sqlx::query("SELECT name FROM pickup_points ORDER BY id")
        .fetch_all(store.pool())
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("name"))
        .collect();
    assert_eq!(names, vec!["Ponto 1", "Ponto 2"]);
}

#[tokio::test]
async fn rerunning_the_same_feed_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let source = MemorySource::new(vec![
        line(500, "A", 1000.0, 5, 1, 0),
        line(501, "A", 3000.0, 5, 1, 2),
    ]);
    let cycle = cycle(dir.path(), &store, source, MappingResolver::builtin_only()).await;

    cycle.run().await;
    let second = cycle.run().await;

    let transform = second.transform.unwrap();
    assert_eq!(transform.new_products, 0);
    assert_eq!(transform.new_order_items, 0);
    assert_eq!(transform.new_work_units, 0);
    assert_eq!(transform.upserted_orders, 2);
    assert_eq!(store.count("orders").await.unwrap(), 2);
    assert_eq!(store.count("products").await.unwrap(), 1);
    assert_eq!(store.count("cache_orcamentos").await.unwrap(), 2);
}

#[tokio::test]
async fn lines_older_than_the_window_survive_a_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;

    // Cached by a cycle two months ago, while it was still inside the window.
    let then = (Local::now() - Days::days(60)).date_naive();
    let old = line(400, "OLD", 1000.0, 5, 1, 60);
    let seeding = WindowedCacheWriter::new(
        store.clone(),
        WindowConfig {
            days: 31,
            margin_days: 1,
            purge_on_empty: false,
        },
    );
    seeding.replicate(std::slice::from_ref(&old), then).await.unwrap();

    let source = MemorySource::new(vec![
        old.clone(),
        line(500, "A", 1000.0, 5, 1, 3),
        line(501, "B", 1000.0, 5, 1, 1),
    ]);
    let cycle = cycle(dir.path(), &store, source.clone(), MappingResolver::builtin_only()).await;
    let cache = cycle.run().await.cache.unwrap();
    assert_eq!(cache.outside_window, 1);
    assert_eq!(cache.errors, 0);
    assert_eq!(store.count("cache_orcamentos").await.unwrap(), 3);

    // Order 501 vanished from the feed. The old line is still returned but
    // sits before the cutoff, so the cached copy is left alone.
    source.set_rows(vec![old, line(500, "A", 1000.0, 5, 1, 3)]);
    let cache = cycle.run().await.cache.unwrap();
    assert_eq!(cache.removed, 2);
    assert_eq!(cache.inserted, 1);
    assert_eq!(cache.outside_window, 1);
    assert_eq!(cache.errors, 0);

    let orders: Vec<i64> = sqlx::query("SELECT IDORCAMENTO FROM cache_orcamentos ORDER BY IDORCAMENTO")
        .fetch_all(store.pool())
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("IDORCAMENTO"))
        .collect();
    assert_eq!(orders, vec![400, 500]);
}

#[tokio::test]
async fn unreachable_remote_leaves_the_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let source = MemorySource::new(vec![line(500, "A", 1000.0, 5, 1, 0)]);
    let up = cycle(dir.path(), &store, source, MappingResolver::builtin_only()).await;
    up.run().await;

    let down = cycle_for_refused(dir.path(), &store).await;
    let summary = down.run().await;
    assert!(summary.aborted_on_connection());
    assert!(summary.outcome(Stage::Orders).is_some_and(StageOutcome::is_skipped));
    assert_eq!(store.count("cache_orcamentos").await.unwrap(), 1);
    assert_eq!(store.count("orders").await.unwrap(), 1);
}

async fn cycle_for_refused(dir: &Path, store: &LocalStore) -> SyncCycle {
    cycle(
        dir,
        store,
        MemorySource::default().refuse_connections(),
        MappingResolver::builtin_only(),
    )
    .await
}

#[tokio::test]
async fn published_item_mapping_replaces_the_legacy_scale() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let rules = serde_json::json!([
        {"appField": "erp_product_code", "dbExpression": "idproduto"},
        {"appField": "quantity", "dbExpression": "QTDPRODUTO", "cast": "number"},
        {"appField": "pickup_point", "dbExpression": "IDLOCALRETIRADA", "cast": "number"},
        {"appField": "section", "dbExpression": "IDSECAO", "cast": "string"},
    ]);
    sqlx::query(
        "INSERT INTO db2_mappings (id, dataset, version, is_active, mapping_json) VALUES ('m1', 'order_items', 2, 1, ?)",
    )
    .bind(rules.to_string())
    .execute(store.pool())
    .await
    .unwrap();

    let resolver = MappingResolver::new(
        Arc::new(LocalMappingStore::new(&store)),
        Duration::from_secs(2),
    );
    let source = MemorySource::new(vec![line(500, "A", 4.0, 5, 1, 0)]);
    let cycle = cycle(dir.path(), &store, source, resolver).await;
    let summary = cycle.run().await;
    assert!(summary.failed_stages().is_empty(), "{:?}", summary.stages);

    // Items follow the published rules; orders and products stay on the
    // builtin mapping.
    assert_eq!(quantities(&store).await, vec![4.0]);
    let total: f64 = sqlx::query_scalar("SELECT total_value FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(total, 15.0);
}
