//! Local SQLite store shared with the downstream application.
//!
//! One WAL-mode file. Concurrent writers (the periodic cycle and the served
//! application) are serialised by SQLite's own busy wait; every bulk write
//! runs in its own transaction.

use crate::config::LocalStoreConfig;
use crate::models::{FieldValue, Record};
use crate::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, Sqlite, SqlitePool};
use std::str::FromStr;

#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if needed) the store file. Does not touch the schema;
    /// call [`LocalStore::bootstrap`] for that.
    #[tracing::instrument(level = "debug", skip(cfg), fields(path = %cfg.path.display()))]
    pub async fn open(cfg: &LocalStoreConfig) -> Result<Self> {
        if let Some(parent) = cfg.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("local_store", e))?;
        }

        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", cfg.path.display()))
                .map_err(|e| Error::backend("local_store", e))?
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(cfg.busy_timeout)
                .foreign_keys(false)
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("local_store", e))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema setup: tables, indexes, additive columns.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn bootstrap(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("local_store_bootstrap", e))?;

        for table in OBSOLETE_TABLES {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| Error::backend("local_store_bootstrap", e))?;
        }

        for (table, column, decl) in ADDITIVE_COLUMNS {
            if self.column_exists(table, column).await? {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                .execute(&self.pool)
                .await
                .map_err(|e| Error::backend("local_store_migration", e))?;
            tracing::info!(table, column, "added missing column");
        }

        // Older databases may already hold duplicate lines; the transform
        // still skips known pairs, so a failed index is not fatal.
        for (name, ddl) in UNIQUE_INDEXES {
            if let Err(e) = sqlx::query(ddl).execute(&self.pool).await {
                tracing::warn!(index = name, error = %e, "unique index not created");
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::backend("local_store_table_info", e))?;
        Ok(rows.iter().any(|r| {
            r.try_get::<String, _>("name")
                .map(|name| name.eq_ignore_ascii_case(column))
                .unwrap_or(false)
        }))
    }

    /// Run a read query and decode every row into a loosely-typed record.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch_records(&self, sql: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::backend("local_store_query", e))?;
        rows.iter().map(row_to_record).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn count(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::backend("local_store_count", e))?;
        row.try_get::<i64, _>("n")
            .map_err(|e| Error::backend("local_store_count", e))
    }
}

/// Decode a row column by column: integer, then real, then text, then blob.
pub(crate) fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut out = Record::new();
    for col in row.columns() {
        let name = col.name();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(name) {
            v.map(FieldValue::Integer).unwrap_or(FieldValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(name) {
            v.map(FieldValue::Real).unwrap_or(FieldValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(name) {
            v.map(FieldValue::Text).unwrap_or(FieldValue::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(name) {
            v.map(|b| FieldValue::Text(String::from_utf8_lossy(&b).into_owned()))
                .unwrap_or(FieldValue::Null)
        } else {
            return Err(Error::BackendMessage(format!(
                "unsupported sqlite column type for '{name}'"
            )));
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Bind a loosely-typed value with its natural SQLite storage class.
pub(crate) fn bind_field<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &FieldValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Bool(b) => query.bind(*b),
        FieldValue::Integer(i) => query.bind(*i),
        FieldValue::Real(f) => query.bind(*f),
        FieldValue::Text(s) => query.bind(s.clone()),
    }
}

const OBSOLETE_TABLES: [&str; 2] = ["cache_vendas_pendentes", "cache_tubos_conexoes"];

/// Columns introduced after the first deployments; added in place when an
/// older store file lacks them.
const ADDITIVE_COLUMNS: [(&str, &str, &str); 5] = [
    ("cache_orcamentos", "CODBARRAS", "TEXT"),
    ("cache_orcamentos", "CODBARRAS_CAIXA", "TEXT"),
    ("products", "box_barcode", "TEXT"),
    ("orders", "financial_status", "TEXT DEFAULT 'pendente'"),
    ("users", "settings", "TEXT DEFAULT '{}'"),
];

/// One order line per product, one work unit per (order, section, pickup
/// point). `section` is nullable on work units, so the index goes through
/// `COALESCE` to make NULL sections collide.
const UNIQUE_INDEXES: [(&str, &str); 2] = [
    (
        "idx_order_items_order_product",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_order_items_order_product ON order_items(order_id, product_id)",
    ),
    (
        "idx_work_units_order_section_pickup",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_work_units_order_section_pickup ON work_units(order_id, COALESCE(section, ''), pickup_point)",
    ),
];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_orcamentos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    CHAVE TEXT UNIQUE NOT NULL,
    IDEMPRESA INTEGER,
    IDORCAMENTO INTEGER,
    IDPRODUTO TEXT,
    IDSUBPRODUTO TEXT,
    NUMSEQUENCIA INTEGER,
    QTDPRODUTO REAL,
    UNIDADE TEXT,
    FABRICANTE TEXT,
    VALUNITBRUTO REAL,
    VALTOTLIQUIDO REAL,
    DESCRRESPRODUTO TEXT,
    IDVENDEDOR TEXT,
    IDLOCALRETIRADA INTEGER,
    IDSECAO INTEGER,
    DESCRSECAO TEXT,
    TIPOENTREGA TEXT,
    NOMEVENDEDOR TEXT,
    TIPOENTREGA_DESCR TEXT,
    LOCALRETESTOQUE TEXT,
    FLAGCANCELADO TEXT,
    IDCLIFOR TEXT,
    DESCLIENTE TEXT,
    DTMOVIMENTO TEXT,
    IDRECEBIMENTO TEXT,
    DESCRRECEBIMENTO TEXT,
    FLAGPRENOTAPAGA TEXT,
    CODBARRAS TEXT,
    CODBARRAS_CAIXA TEXT,
    sync_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_cache_orcamentos_dtmovimento ON cache_orcamentos(DTMOVIMENTO);
CREATE INDEX IF NOT EXISTS idx_cache_orcamentos_vendedor ON cache_orcamentos(IDVENDEDOR);
CREATE INDEX IF NOT EXISTS idx_cache_orcamentos_chave ON cache_orcamentos(CHAVE);

CREATE TABLE IF NOT EXISTS pickup_points (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS sections (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'separacao',
    sections TEXT,
    settings TEXT DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS routes (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    erp_code TEXT NOT NULL UNIQUE,
    barcode TEXT,
    box_barcode TEXT,
    name TEXT NOT NULL,
    section TEXT NOT NULL,
    pickup_point INTEGER NOT NULL,
    unit TEXT NOT NULL DEFAULT 'UN',
    manufacturer TEXT,
    price REAL NOT NULL DEFAULT 0,
    stock_qty REAL NOT NULL DEFAULT 0,
    erp_updated_at TEXT
);

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    erp_order_id TEXT NOT NULL UNIQUE,
    customer_name TEXT NOT NULL,
    customer_code TEXT,
    total_value REAL NOT NULL DEFAULT 0,
    observation TEXT,
    status TEXT NOT NULL DEFAULT 'pendente',
    financial_status TEXT NOT NULL DEFAULT 'pendente',
    priority INTEGER NOT NULL DEFAULT 0,
    is_launched INTEGER NOT NULL DEFAULT 0,
    route_id TEXT,
    separation_code TEXT UNIQUE,
    pickup_points TEXT,
    erp_updated_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS order_items (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    quantity REAL NOT NULL,
    separated_qty REAL NOT NULL DEFAULT 0,
    checked_qty REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pendente',
    pickup_point INTEGER NOT NULL,
    section TEXT NOT NULL,
    qty_picked REAL DEFAULT 0,
    qty_checked REAL DEFAULT 0,
    exception_type TEXT
);

CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

CREATE TABLE IF NOT EXISTS work_units (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pendente',
    type TEXT NOT NULL,
    pickup_point INTEGER NOT NULL,
    section TEXT,
    assigned_user_id TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_at TEXT,
    locked_by TEXT,
    locked_at TEXT,
    lock_expires_at TEXT,
    cart_qr_code TEXT,
    pallet_qr_code TEXT,
    started_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_work_units_order ON work_units(order_id);

CREATE TABLE IF NOT EXISTS db2_mappings (
    id TEXT PRIMARY KEY,
    dataset TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 0,
    mapping_json TEXT NOT NULL,
    description TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;


#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.bootstrap().await.unwrap();
        assert_eq!(store.count("cache_orcamentos").await.unwrap(), 0);
        assert!(store.column_exists("orders", "financial_status").await.unwrap());
    }

    #[tokio::test]
    async fn bootstrap_adds_missing_columns_to_old_tables() {
        let (_dir, store) = temp_store().await;
        sqlx::query("DROP TABLE products")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE products (id TEXT PRIMARY KEY, erp_code TEXT NOT NULL UNIQUE, barcode TEXT, name TEXT NOT NULL, section TEXT NOT NULL, pickup_point INTEGER NOT NULL, unit TEXT NOT NULL DEFAULT 'UN', manufacturer TEXT, price REAL NOT NULL DEFAULT 0, stock_qty REAL NOT NULL DEFAULT 0, erp_updated_at TEXT)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        assert!(!store.column_exists("products", "box_barcode").await.unwrap());

        store.bootstrap().await.unwrap();
        assert!(store.column_exists("products", "box_barcode").await.unwrap());
    }

    #[tokio::test]
    async fn fetch_records_decodes_mixed_types() {
        let (_dir, store) = temp_store().await;
        sqlx::query("INSERT INTO sections (id, name) VALUES (7, 'Tubos')")
            .execute(store.pool())
            .await
            .unwrap();
        let rows = store
            .fetch_records("SELECT id, name, NULL AS nothing, 1.5 AS ratio FROM sections")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], FieldValue::Integer(7));
        assert_eq!(rows[0]["name"], FieldValue::from("Tubos"));
        assert_eq!(rows[0]["nothing"], FieldValue::Null);
        assert_eq!(rows[0]["ratio"], FieldValue::Real(1.5));
    }

    #[tokio::test]
    async fn order_lines_and_work_units_are_unique() {
        let (_dir, store) = temp_store().await;
        let line = "INSERT INTO order_items (id, order_id, product_id, quantity, pickup_point, section) VALUES (?, 'o1', 'p1', 1, 1, '5')";
        sqlx::query(line).bind("i1").execute(store.pool()).await.unwrap();
        assert!(sqlx::query(line).bind("i2").execute(store.pool()).await.is_err());

        let unit = "INSERT INTO work_units (id, order_id, type, pickup_point, section) VALUES (?, 'o1', 'separacao', 1, NULL)";
        sqlx::query(unit).bind("w1").execute(store.pool()).await.unwrap();
        assert!(sqlx::query(unit).bind("w2").execute(store.pool()).await.is_err());
        sqlx::query(
            "INSERT INTO work_units (id, order_id, type, pickup_point, section) VALUES ('w3', 'o1', 'separacao', 1, '5')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        assert_eq!(store.count("work_units").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn existing_duplicates_do_not_block_bootstrap() {
        let (_dir, store) = temp_store().await;
        sqlx::query("DROP INDEX idx_order_items_order_product")
            .execute(store.pool())
            .await
            .unwrap();
        for id in ["i1", "i2"] {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, pickup_point, section) VALUES (?, 'o1', 'p1', 1, 1, '5')",
            )
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();
        }
        store.bootstrap().await.unwrap();
        assert_eq!(store.count("order_items").await.unwrap(), 2);
    }
}
