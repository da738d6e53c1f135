//! Second pass: turn order aggregates into staged rows, deduplicated against
//! what is already persisted and against what this cycle already staged.

use super::aggregate::Aggregation;
use super::known::{KnownEntities, WorkUnitKey};
use crate::mapping::MappingSet;
use crate::models::{FieldValue, Record, lookup};
use std::collections::{BTreeMap, BTreeSet};

pub const STATUS_INVOICED: &str = "faturado";
pub const STATUS_PENDING: &str = "pendente";
pub const DEFAULT_UNIT: &str = "UN";

#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpsert {
    pub id: String,
    pub erp_order_id: String,
    pub customer_name: String,
    pub customer_code: String,
    pub total_value: f64,
    pub financial_status: String,
    /// JSON array of the distinct pickup points touched by the order.
    pub pickup_points: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub id: String,
    pub erp_code: String,
    pub barcode: Option<String>,
    pub box_barcode: Option<String>,
    pub name: String,
    pub section: String,
    pub pickup_point: i64,
    pub unit: String,
    pub manufacturer: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub pickup_point: i64,
    pub section: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkUnit {
    pub id: String,
    pub order_id: String,
    pub section: Option<String>,
    pub pickup_point: i64,
}

/// Everything one cycle will write, grouped by target table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedBatches {
    /// Reference names; the last one observed wins.
    pub pickup_points: BTreeMap<i64, String>,
    pub sections: BTreeMap<i64, String>,
    pub products: Vec<NewProduct>,
    pub orders: Vec<OrderUpsert>,
    pub order_items: Vec<NewOrderItem>,
    pub work_units: Vec<NewWorkUnit>,
    /// Lines with no resolvable product code.
    pub skipped_items: usize,
    pub coercion_errors: usize,
}

impl StagedBatches {
    pub fn new_rows(&self) -> usize {
        self.products.len() + self.order_items.len() + self.work_units.len()
    }
}

fn status_for(financial_status: Option<&str>, paid_flag: Option<&str>) -> String {
    match (financial_status, paid_flag) {
        (Some(status), _) => status.to_string(),
        (None, Some(flag)) if flag.eq_ignore_ascii_case("T") => STATUS_INVOICED.to_string(),
        _ => STATUS_PENDING.to_string(),
    }
}

fn raw_text(row: &Record, column: &str) -> Option<String> {
    lookup(row, column).and_then(|v| v.as_text().map(|t| t.into_owned()))
}

/// Stage rows for every aggregate. `known` is extended as entities are
/// staged; `new_id` mints surrogate ids.
pub fn plan(
    aggregation: Aggregation,
    mappings: &MappingSet,
    known: &mut KnownEntities,
    mut new_id: impl FnMut() -> String,
) -> StagedBatches {
    let mut staged = StagedBatches {
        coercion_errors: aggregation.coercion_errors,
        ..StagedBatches::default()
    };

    for (key, order) in aggregation.orders {
        let erp_order_id = key.to_string();
        let order_id = known
            .orders
            .entry(erp_order_id.clone())
            .or_insert_with(&mut new_id)
            .clone();

        let mut configs: BTreeSet<(Option<String>, i64)> = BTreeSet::new();
        let mut touched_pickups: BTreeSet<i64> = BTreeSet::new();

        for item in &order.items {
            let product = mappings.products.apply(item);
            let line = mappings.order_items.apply(item);
            staged.coercion_errors += product.errors.len() + line.errors.len();

            let Some(code) = product
                .text("erp_code")
                .or_else(|| line.text("erp_product_code"))
            else {
                staged.skipped_items += 1;
                continue;
            };

            let product_id = match known.products.get(&code) {
                Some(id) => id.clone(),
                None => {
                    let id = new_id();
                    staged.products.push(NewProduct {
                        id: id.clone(),
                        erp_code: code.clone(),
                        barcode: product.text("barcode"),
                        box_barcode: product.text("box_barcode"),
                        name: product.text("name").unwrap_or_else(|| code.clone()),
                        section: product.text("section").unwrap_or_default(),
                        pickup_point: product
                            .get("pickup_point")
                            .and_then(FieldValue::as_i64)
                            .unwrap_or(0),
                        unit: product
                            .text("unit")
                            .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
                        manufacturer: product.text("manufacturer").unwrap_or_default(),
                        price: product
                            .get("price")
                            .and_then(FieldValue::as_f64)
                            .unwrap_or(0.0),
                    });
                    known.products.insert(code.clone(), id.clone());
                    id
                }
            };

            let quantity = line
                .get("quantity")
                .and_then(FieldValue::as_f64)
                .unwrap_or(0.0);
            let pickup = line.get("pickup_point").and_then(FieldValue::as_i64);
            let section = line.text("section");

            if let Some(p) = pickup.filter(|p| *p > 0) {
                let name = raw_text(item, "LOCALRETESTOQUE").unwrap_or_else(|| format!("Ponto {p}"));
                staged.pickup_points.insert(p, name);
                touched_pickups.insert(p);
            }
            if let Some(sec_id) = section
                .as_deref()
                .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
                .and_then(|s| s.parse::<i64>().ok())
            {
                let name = raw_text(item, "DESCRSECAO").unwrap_or_else(|| format!("Seção {sec_id}"));
                staged.sections.insert(sec_id, name);
            }

            let pair = (order_id.clone(), product_id.clone());
            if !known.order_items.contains(&pair) {
                staged.order_items.push(NewOrderItem {
                    id: new_id(),
                    order_id: order_id.clone(),
                    product_id,
                    quantity,
                    pickup_point: pickup.unwrap_or(0),
                    section: section.clone().unwrap_or_default(),
                });
                known.order_items.insert(pair);
            }

            configs.insert((section, pickup.unwrap_or(0)));
        }

        for (section, pickup_point) in configs {
            let wu = WorkUnitKey {
                order_id: order_id.clone(),
                section,
                pickup_point,
            };
            if known.work_units.contains(&wu) {
                continue;
            }
            staged.work_units.push(NewWorkUnit {
                id: new_id(),
                order_id: wu.order_id.clone(),
                section: wu.section.clone(),
                pickup_point: wu.pickup_point,
            });
            known.work_units.insert(wu);
        }

        let pickup_points: Vec<i64> = touched_pickups.into_iter().collect();
        staged.orders.push(OrderUpsert {
            id: order_id,
            erp_order_id,
            customer_name: order.customer_name,
            customer_code: order.customer_code,
            total_value: order.total,
            financial_status: status_for(
                order.financial_status.as_deref(),
                order.paid_flag.as_deref(),
            ),
            pickup_points: serde_json::Value::from(pickup_points).to_string(),
            created_at: order.created_at,
        });
    }

    staged
}
