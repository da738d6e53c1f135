//! Cache to application entities.
//!
//! Pass 1 ([`aggregate`]) groups cache lines into orders. Pass 2 ([`plan`])
//! stages orders, products, order items, work units and reference names,
//! deduplicated against [`KnownEntities`]. [`flush`] then writes the staged
//! batches.

pub mod aggregate;
pub mod flush;
pub mod known;
pub mod plan;

use crate::Result;
use crate::mapping::MappingSet;
use crate::outcome::StageReport;
use crate::store::LocalStore;

pub use aggregate::{Aggregation, OrderAggregate, aggregate};
pub use flush::{FLUSH_ORDER, flush};
pub use known::{KnownEntities, WorkUnitKey};
pub use plan::{
    NewOrderItem, NewProduct, NewWorkUnit, OrderUpsert, STATUS_INVOICED, STATUS_PENDING,
    StagedBatches, plan,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub cache_rows: usize,
    pub orders: usize,
    pub upserted_orders: usize,
    pub new_products: usize,
    pub new_order_items: usize,
    pub new_work_units: usize,
    pub skipped_rows: usize,
    pub coercion_errors: usize,
    pub stages: Vec<StageReport>,
}

impl TransformReport {
    pub fn summary(&self) -> String {
        format!(
            "transform | orders={} | upserted={} | new_products={} | new_items={} | new_work_units={} | skipped={} | coercion_errors={}",
            self.orders,
            self.upserted_orders,
            self.new_products,
            self.new_order_items,
            self.new_work_units,
            self.skipped_rows,
            self.coercion_errors
        )
    }

    pub fn failed(&self) -> bool {
        self.stages.iter().any(|s| s.outcome.is_failed())
    }
}

pub struct TransformEngine {
    store: LocalStore,
}

impl TransformEngine {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Read the cache and stage everything without writing.
    #[tracing::instrument(level = "debug", skip(self, mappings))]
    pub async fn stage(&self, mappings: &MappingSet) -> Result<(usize, usize, StagedBatches)> {
        let rows = self
            .store
            .fetch_records("SELECT * FROM cache_orcamentos ORDER BY id")
            .await?;
        let cache_rows = rows.len();
        if rows.is_empty() {
            return Ok((0, 0, StagedBatches::default()));
        }

        let aggregation = aggregate(rows, &mappings.orders);
        let skipped = aggregation.skipped_rows;
        let mut known = KnownEntities::load(&self.store).await?;
        let staged = plan(aggregation, mappings, &mut known, || {
            uuid::Uuid::new_v4().to_string()
        });
        Ok((cache_rows, skipped, staged))
    }

    /// Stage and write one transform pass.
    ///
    /// Store read failures are returned; write failures are reported per
    /// stage in the result.
    #[tracing::instrument(level = "debug", skip(self, mappings))]
    pub async fn run(&self, mappings: &MappingSet) -> Result<TransformReport> {
        let (cache_rows, skipped_rows, staged) = self.stage(mappings).await?;
        let stages = if cache_rows == 0 {
            Vec::new()
        } else {
            flush(&self.store, &staged).await
        };

        Ok(TransformReport {
            cache_rows,
            orders: staged.orders.len(),
            upserted_orders: staged.orders.len(),
            new_products: staged.products.len(),
            new_order_items: staged.order_items.len(),
            new_work_units: staged.work_units.len(),
            skipped_rows: skipped_rows + staged.skipped_items,
            coercion_errors: staged.coercion_errors,
            stages,
        })
    }
}
