//! WMS sync core: windowed replication of the ERP order feed into a local
//! SQLite cache, and the transform that turns cached rows into orders,
//! products, order items and work units.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod mapping;
pub mod models;
pub mod o11y;
pub mod outcome;
pub mod store;
pub mod sync;
pub mod transform;

pub use cache::{CacheReport, WindowedCacheWriter};
pub use config::{
    LocalStoreConfig, MappingConfig, MappingSource, RemoteConfig, ScheduleConfig, ServeConfig,
    SyncConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use extract::{MemorySource, OdbcSource, RemoteExtractor, RemoteSession, RemoteSource};
pub use mapping::{Dataset, EntityMapping, FieldRule, Mapping, MappingResolver, MappingSet};
pub use models::{CacheKey, FieldValue, OrderKey, Record};
pub use o11y::{LogConfig, LogFormat};
pub use outcome::{Stage, StageOutcome, StageReport};
pub use store::LocalStore;
pub use sync::{CycleSummary, RunOutcome, SchedulerState, SyncCycle, SyncMode, SyncScheduler};
pub use transform::{TransformEngine, TransformReport};
