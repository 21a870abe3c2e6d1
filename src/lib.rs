//! Historian: Policy-Filtered State Sample Archiving
//!
//! A pipeline that turns a stream of host state updates into typed history
//! tables: each sample runs through a per-point skip chain (spacing,
//! dead-band, range, change detection), lands in a dynamically resolved
//! per-identifier table, and is written in batches with retry on store
//! failure.
//!
//! # Features
//!
//! - **Per-Point Policies**: block time, dead-band, min/max clamps, change-only logging
//! - **Dynamic Tables**: one typed table per identifier, resolved and registered on first write
//! - **Batched Writes**: single-flight flushing with requeue on failure
//! - **Relog Timers**: re-emit the last stored value after idle intervals
//! - **History Reads**: bounded, ordered reconstruction with on-change reduction
//!
//! # Example
//!
//! ```no_run
//! use historian::pipeline::{Historian, HistorianConfig};
//! use historian::data::Sample;
//! use historian::history::HistoryQuery;
//! use historian::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let historian = Historian::start(store, HistorianConfig::default()).await?;
//!
//! historian
//!     .store_state("room.temp", Sample::new(serde_json::json!(21.5)), true)
//!     .await?;
//!
//! let entries = historian
//!     .get_history("room.temp", &HistoryQuery::default())
//!     .await?;
//! println!("{} entries", entries.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod buffer;
pub mod data;
pub mod history;
pub mod pipeline;
pub mod policy;
pub mod relog;
pub mod store;
pub mod tables;

// Re-export commonly used types
pub use data::{Sample, Value, ValueType};
pub use history::{HistoryEntry, HistoryQuery};
pub use pipeline::{Historian, HistorianConfig, HistorianError};
pub use policy::PointPolicy;
pub use store::{MemoryStore, Store, StoreError};
