//! Trailing-window replication of remote lines into `cache_orcamentos`.

pub mod row;

use crate::config::WindowConfig;
use crate::models::{CacheKey, Record};
use crate::store::{LocalStore, bind_field};
use crate::{Error, Result};
use chrono::{NaiveDate, TimeDelta};
use std::collections::HashSet;

pub use row::{CACHE_COLUMNS, CacheRow, ColumnKind};

/// Counts for one window replication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheReport {
    /// First date (inclusive) of the replaced window, `YYYY-MM-DD`.
    pub cutoff: String,
    pub fetched: usize,
    pub removed: u64,
    pub inserted: u64,
    /// Rows skipped: coercion failures, duplicate keys and rejected inserts.
    pub errors: usize,
    pub duplicates: usize,
    /// Extracted rows dated before the cutoff; left to the cached copy.
    pub outside_window: usize,
    /// The window was left in place because nothing usable was extracted.
    pub refused_empty: bool,
}

impl CacheReport {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "cache window | fetched={} | removed={} (>= {}) | inserted={} | errors={}",
            self.fetched, self.removed, self.cutoff, self.inserted, self.errors
        );
        if self.outside_window > 0 {
            line.push_str(&format!(" | outside_window={}", self.outside_window));
        }
        if self.refused_empty {
            line.push_str(" | window kept (empty extraction)");
        }
        line
    }
}

/// Replaces the trailing window of the cache with a fresh extraction.
#[derive(Clone)]
pub struct WindowedCacheWriter {
    store: LocalStore,
    window: WindowConfig,
}

impl WindowedCacheWriter {
    pub fn new(store: LocalStore, window: WindowConfig) -> Self {
        Self { store, window }
    }

    pub fn span_days(&self) -> i64 {
        self.window.span_days()
    }

    /// First day of the window ending `today`.
    pub fn cutoff(&self, today: NaiveDate) -> String {
        (today - TimeDelta::days(self.window.span_days()))
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Delete every cached row dated on or after the cutoff and insert the
    /// extracted rows dated on or after it, in one transaction. Older
    /// extracted rows are counted and dropped; rows before the cutoff are
    /// never touched.
    ///
    /// When nothing usable was extracted the delete is refused, unless the
    /// window is configured to purge on empty.
    #[tracing::instrument(level = "debug", skip(self, records), fields(records = records.len()))]
    pub async fn replicate(&self, records: &[Record], today: NaiveDate) -> Result<CacheReport> {
        let mut report = CacheReport {
            cutoff: self.cutoff(today),
            fetched: records.len(),
            ..CacheReport::default()
        };

        let mut seen: HashSet<CacheKey> = HashSet::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match CacheRow::from_record(record) {
                Ok(row) if row.movement_date() < report.cutoff.as_str() => {
                    tracing::debug!(key = %row.key, date = row.movement_date(), "row outside the window");
                    report.outside_window += 1;
                }
                Ok(row) => {
                    if seen.insert(row.key.clone()) {
                        rows.push(row);
                    } else {
                        tracing::debug!(key = %row.key, "duplicate cache key in extraction");
                        report.duplicates += 1;
                        report.errors += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping uncoercible remote row");
                    report.errors += 1;
                }
            }
        }

        if rows.is_empty() && !self.window.purge_on_empty {
            tracing::warn!(
                cutoff = %report.cutoff,
                fetched = report.fetched,
                "no usable rows extracted; keeping the cached window until the next successful cycle"
            );
            report.refused_empty = true;
            return Ok(report);
        }

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| Error::bulk_write("cache window", e))?;

        report.removed = sqlx::query("DELETE FROM cache_orcamentos WHERE DTMOVIMENTO >= ?")
            .bind(report.cutoff.clone())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::bulk_write("cache window", e))?
            .rows_affected();

        let insert = row::insert_sql();
        for row in &rows {
            let mut query = sqlx::query(&insert).bind(row.key.to_string());
            for value in &row.values {
                query = bind_field(query, value);
            }
            match query.execute(&mut *tx).await {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    tracing::debug!(key = %row.key, error = %e, "cache insert rejected");
                    report.errors += 1;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::bulk_write("cache window", e))?;
        Ok(report)
    }
}
