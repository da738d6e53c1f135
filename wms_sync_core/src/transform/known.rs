use crate::Result;
use crate::models::{FieldValue, Record};
use crate::store::LocalStore;
use std::collections::{HashMap, HashSet};

/// Identity of a work unit: one per (order, section, pickup point).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkUnitKey {
    pub order_id: String,
    pub section: Option<String>,
    pub pickup_point: i64,
}

/// Entities already persisted, extended in place as new ones are staged so
/// each logical entity is staged at most once per cycle.
///
/// Rebuilt from full scans every cycle.
#[derive(Debug, Clone, Default)]
pub struct KnownEntities {
    /// External order id to surrogate id.
    pub orders: HashMap<String, String>,
    /// External product code to surrogate id.
    pub products: HashMap<String, String>,
    /// (order id, product id) pairs.
    pub order_items: HashSet<(String, String)>,
    pub work_units: HashSet<WorkUnitKey>,
}

impl KnownEntities {
    #[tracing::instrument(level = "debug", skip(store))]
    pub async fn load(store: &LocalStore) -> Result<Self> {
        let mut known = Self::default();

        for row in store
            .fetch_records("SELECT erp_order_id, id FROM orders")
            .await?
        {
            if let (Some(erp), Some(id)) = (text(&row, "erp_order_id"), text(&row, "id")) {
                known.orders.insert(erp, id);
            }
        }

        for row in store
            .fetch_records("SELECT erp_code, id FROM products")
            .await?
        {
            if let (Some(code), Some(id)) = (text(&row, "erp_code"), text(&row, "id")) {
                known.products.insert(code, id);
            }
        }

        for row in store
            .fetch_records("SELECT order_id, product_id FROM order_items")
            .await?
        {
            if let (Some(order), Some(product)) = (text(&row, "order_id"), text(&row, "product_id"))
            {
                known.order_items.insert((order, product));
            }
        }

        for row in store
            .fetch_records("SELECT order_id, section, pickup_point FROM work_units")
            .await?
        {
            if let Some(order_id) = text(&row, "order_id") {
                known.work_units.insert(WorkUnitKey {
                    order_id,
                    section: text(&row, "section"),
                    pickup_point: row
                        .get("pickup_point")
                        .and_then(FieldValue::as_i64)
                        .unwrap_or(0),
                });
            }
        }

        tracing::debug!(
            orders = known.orders.len(),
            products = known.products.len(),
            order_items = known.order_items.len(),
            work_units = known.work_units.len(),
            "loaded known entities"
        );
        Ok(known)
    }
}

fn text(row: &Record, column: &str) -> Option<String> {
    row.get(column)
        .and_then(|v| v.as_text().map(|t| t.into_owned()))
}
