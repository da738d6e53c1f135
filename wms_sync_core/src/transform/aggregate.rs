//! First pass: fold flat cache rows into one aggregate per order.

use crate::mapping::EntityMapping;
use crate::models::{OrderKey, Record, lookup};
use std::collections::BTreeMap;

pub const UNKNOWN_CUSTOMER: &str = "Cliente Desconhecido";

/// Transient grouping of the cache rows belonging to one order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAggregate {
    pub key: OrderKey,
    pub customer_name: String,
    pub customer_code: String,
    /// Sum of the mapped per-line totals.
    pub total: f64,
    pub created_at: Option<String>,
    /// Mapped financial status, when the mapping provides one.
    pub financial_status: Option<String>,
    /// Raw paid/unpaid letter from the first line.
    pub paid_flag: Option<String>,
    /// Lines in cache order.
    pub items: Vec<Record>,
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub orders: BTreeMap<OrderKey, OrderAggregate>,
    pub rows: usize,
    /// Rows without an order id.
    pub skipped_rows: usize,
    pub coercion_errors: usize,
}

/// Group rows by (tenant, external order id). No persisted state is read.
pub fn aggregate(rows: Vec<Record>, orders: &EntityMapping) -> Aggregation {
    let mut out = Aggregation {
        rows: rows.len(),
        ..Aggregation::default()
    };

    for row in rows {
        let mapped = orders.apply(&row);
        out.coercion_errors += mapped.errors.len();

        let Some(order_id) = mapped.text("erp_order_id") else {
            out.skipped_rows += 1;
            continue;
        };
        let tenant = lookup(&row, "IDEMPRESA")
            .and_then(|v| v.as_text().map(|t| t.into_owned()))
            .unwrap_or_default();
        let key = OrderKey::new(tenant, order_id);

        let line_total = mapped
            .get("total_value")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let agg = out
            .orders
            .entry(key.clone())
            .or_insert_with(|| OrderAggregate {
                key,
                customer_name: mapped
                    .text("customer_name")
                    .unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string()),
                customer_code: mapped.text("customer_code").unwrap_or_default(),
                total: 0.0,
                created_at: mapped.text("created_at"),
                financial_status: mapped.text("financial_status"),
                paid_flag: lookup(&row, "FLAGPRENOTAPAGA")
                    .and_then(|v| v.as_text().map(|t| t.into_owned())),
                items: Vec::new(),
            });
        agg.total += line_total;
        agg.items.push(row);
    }
    out
}
