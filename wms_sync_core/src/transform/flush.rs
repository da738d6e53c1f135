//! Bulk writes of staged batches, in dependency order.

use super::plan::StagedBatches;
use crate::outcome::{Stage, StageOutcome, StageReport};
use crate::store::LocalStore;
use crate::{Error, Result};
use sqlx::{Sqlite, Transaction};

/// Reference tables first, work units last. Later stages assume the
/// earlier ones committed.
pub const FLUSH_ORDER: [Stage; 5] = [
    Stage::ReferenceTables,
    Stage::Products,
    Stage::Orders,
    Stage::OrderItems,
    Stage::WorkUnits,
];

/// Write every batch, one transaction per stage. After the first failed
/// stage the remaining ones are skipped.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn flush(store: &LocalStore, staged: &StagedBatches) -> Vec<StageReport> {
    let mut reports = Vec::with_capacity(FLUSH_ORDER.len());
    let mut failed_at: Option<Stage> = None;

    for stage in FLUSH_ORDER {
        if let Some(prev) = failed_at {
            reports.push(StageReport::new(
                stage,
                StageOutcome::Skipped {
                    reason: format!("{prev} failed"),
                },
            ));
            continue;
        }
        let outcome = match write_stage(store, stage, staged).await {
            Ok(rows) => StageOutcome::Succeeded { rows },
            Err(e) => {
                failed_at = Some(stage);
                StageOutcome::Failed {
                    error: error_chain(&e),
                }
            }
        };
        reports.push(StageReport::new(stage, outcome));
    }
    reports
}

fn error_chain(e: &Error) -> String {
    let mut out = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

async fn write_stage(store: &LocalStore, stage: Stage, staged: &StagedBatches) -> Result<u64> {
    let empty = match stage {
        Stage::ReferenceTables => staged.pickup_points.is_empty() && staged.sections.is_empty(),
        Stage::Products => staged.products.is_empty(),
        Stage::Orders => staged.orders.is_empty(),
        Stage::OrderItems => staged.order_items.is_empty(),
        Stage::WorkUnits => staged.work_units.is_empty(),
        _ => true,
    };
    if empty {
        return Ok(0);
    }

    let label = stage.as_str();
    let mut tx = store
        .pool()
        .begin()
        .await
        .map_err(|e| Error::bulk_write(label, e))?;
    let rows = match stage {
        Stage::ReferenceTables => write_reference_tables(&mut tx, staged).await,
        Stage::Products => write_products(&mut tx, staged).await,
        Stage::Orders => write_orders(&mut tx, staged).await,
        Stage::OrderItems => write_order_items(&mut tx, staged).await,
        Stage::WorkUnits => write_work_units(&mut tx, staged).await,
        _ => Ok(0),
    }
    .map_err(|e| Error::bulk_write(label, e))?;
    tx.commit().await.map_err(|e| Error::bulk_write(label, e))?;
    Ok(rows)
}

async fn write_reference_tables(
    tx: &mut Transaction<'_, Sqlite>,
    staged: &StagedBatches,
) -> std::result::Result<u64, sqlx::Error> {
    let mut rows = 0;
    for (id, name) in &staged.pickup_points {
        rows += sqlx::query(
            "INSERT INTO pickup_points (id, name, active) VALUES (?, ?, 1) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(id)
        .bind(name)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    for (id, name) in &staged.sections {
        rows += sqlx::query(
            "INSERT INTO sections (id, name) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(id)
        .bind(name)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(rows)
}

async fn write_products(
    tx: &mut Transaction<'_, Sqlite>,
    staged: &StagedBatches,
) -> std::result::Result<u64, sqlx::Error> {
    let mut rows = 0;
    for p in &staged.products {
        rows += sqlx::query(
            "INSERT INTO products (id, erp_code, barcode, box_barcode, name, section, pickup_point, unit, manufacturer, price) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(erp_code) DO NOTHING",
        )
        .bind(&p.id)
        .bind(&p.erp_code)
        .bind(&p.barcode)
        .bind(&p.box_barcode)
        .bind(&p.name)
        .bind(&p.section)
        .bind(p.pickup_point)
        .bind(&p.unit)
        .bind(&p.manufacturer)
        .bind(p.price)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(rows)
}

async fn write_orders(
    tx: &mut Transaction<'_, Sqlite>,
    staged: &StagedBatches,
) -> std::result::Result<u64, sqlx::Error> {
    let mut rows = 0;
    for o in &staged.orders {
        rows += sqlx::query(
            "INSERT INTO orders (id, erp_order_id, customer_name, customer_code, total_value, financial_status, pickup_points, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pendente', COALESCE(?, CURRENT_TIMESTAMP)) \
             ON CONFLICT(erp_order_id) DO UPDATE SET \
                 financial_status = excluded.financial_status, \
                 total_value = excluded.total_value, \
                 customer_name = excluded.customer_name, \
                 pickup_points = excluded.pickup_points, \
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&o.id)
        .bind(&o.erp_order_id)
        .bind(&o.customer_name)
        .bind(&o.customer_code)
        .bind(o.total_value)
        .bind(&o.financial_status)
        .bind(&o.pickup_points)
        .bind(&o.created_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(rows)
}

async fn write_order_items(
    tx: &mut Transaction<'_, Sqlite>,
    staged: &StagedBatches,
) -> std::result::Result<u64, sqlx::Error> {
    let mut rows = 0;
    for i in &staged.order_items {
        rows += sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, quantity, separated_qty, status, pickup_point, section) \
             VALUES (?, ?, ?, ?, 0, 'pendente', ?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&i.id)
        .bind(&i.order_id)
        .bind(&i.product_id)
        .bind(i.quantity)
        .bind(i.pickup_point)
        .bind(&i.section)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(rows)
}

async fn write_work_units(
    tx: &mut Transaction<'_, Sqlite>,
    staged: &StagedBatches,
) -> std::result::Result<u64, sqlx::Error> {
    let mut rows = 0;
    for w in &staged.work_units {
        rows += sqlx::query(
            "INSERT INTO work_units (id, order_id, status, type, pickup_point, section) \
             VALUES (?, ?, 'pendente', 'separacao', ?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&w.id)
        .bind(&w.order_id)
        .bind(w.pickup_point)
        .bind(&w.section)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(rows)
}
