//! The historian pipeline: policy-filtered ingest, batched writes, history
//! reads and the control operations tying them together.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::buffer::{FlushError, FlushWorker, WriteBuffer};
use crate::data::{
    normalize, renormalize, ConversionError, InsertRow, Sample, StoredSample, Value, ValueType,
};
use crate::history::{reconstruct, HistoryEntry, HistoryQuery, SortOrder};
use crate::policy::{evaluate, PointPolicy, PointRepository, TrackedPoint, Verdict};
use crate::relog::RelogScheduler;
use crate::store::{quote_ident, Store, StoreError};
use crate::tables::{ResolveError, TableResolver};

/// Pipeline-wide configuration.
#[derive(Debug, Clone)]
pub struct HistorianConfig {
    /// Prefix for generated table names and the registry table.
    pub table_prefix: String,
    /// Queue length that triggers a size-based flush.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Policy applied to ephemeral points.
    pub default_policy: PointPolicy,
    /// Capacity of the relog signaling channel.
    pub relog_capacity: usize,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            table_prefix: "history".to_string(),
            batch_size: 200,
            flush_interval: Duration::from_secs(10),
            default_policy: PointPolicy::default(),
            relog_capacity: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistorianError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Flush(#[from] FlushError),
}

/// The sample historian.
///
/// Owns the tracked-point repository, table resolver, write buffer and
/// relog scheduler; created at startup, injected where needed, torn down
/// with [`Historian::shutdown`].
pub struct Historian<S: Store> {
    store: Arc<S>,
    config: HistorianConfig,
    points: PointRepository,
    tables: TableResolver<S>,
    buffer: Arc<WriteBuffer<S>>,
    relog: RelogScheduler,
    flush_worker: Arc<FlushWorker<S>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<S: Store> Historian<S> {
    /// Initialize the pipeline: create/load the registry and start the
    /// background workers. A startup failure here leaves the pipeline
    /// inactive; the caller decides whether that is fatal.
    pub async fn start(store: Arc<S>, config: HistorianConfig) -> Result<Arc<Self>, HistorianError> {
        let tables = TableResolver::new(Arc::clone(&store), &config.table_prefix);
        let loaded = tables.init().await?;
        tracing::info!(points = loaded, "Table registry loaded");

        let buffer = Arc::new(WriteBuffer::new(Arc::clone(&store), config.batch_size));
        let flush_worker = Arc::new(FlushWorker::new(
            Arc::clone(&buffer),
            config.flush_interval,
        ));
        let (relog, relog_rx) = RelogScheduler::new(config.relog_capacity);

        let historian = Arc::new(Self {
            store,
            config,
            points: PointRepository::new(),
            tables,
            buffer,
            relog,
            flush_worker,
            tasks: Mutex::new(Vec::new()),
        });

        let flush_handle = Arc::clone(&historian.flush_worker).start();
        let relog_handle = Self::spawn_relog_consumer(Arc::clone(&historian), relog_rx);
        historian.tasks.lock().extend([flush_handle, relog_handle]);

        Ok(historian)
    }

    /// Stop all timers, force a final best-effort flush and return.
    pub async fn shutdown(&self) {
        self.flush_worker.stop();
        for point in self.points.all() {
            point.cancel_relog();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Err(e) = self.buffer.flush(true).await {
            tracing::warn!(error = %e, "Final flush failed during shutdown");
        }
        tracing::info!("Historian stopped");
    }

    fn spawn_relog_consumer(
        historian: Arc<Self>,
        mut rx: mpsc::Receiver<String>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                historian.process_relog(&id).await;
            }
        })
    }

    // ------------------------------------------------------------------
    // Host surface
    // ------------------------------------------------------------------

    /// Handle one state update from the host. Returns true when the sample
    /// was persisted (enqueued), false when the policy skipped it or the
    /// value could not be converted.
    pub async fn handle_sample(&self, id: &str, sample: Sample) -> Result<bool, HistorianError> {
        let point = self
            .points
            .get_or_ephemeral(id, &self.config.default_policy);
        self.process(&point, sample, false).await
    }

    /// Apply a configuration add/change/removal for one identifier.
    pub fn handle_config_change(&self, id: &str, policy: Option<PointPolicy>) {
        match policy {
            Some(p) => {
                self.points.configure(id, p);
                tracing::debug!(point_id = %id, "Point configured");
            }
            None => {
                if self.points.remove(id) {
                    tracing::debug!(point_id = %id, "Point removed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Core processing
    // ------------------------------------------------------------------

    async fn process(
        &self,
        point: &Arc<TrackedPoint>,
        sample: Sample,
        is_relog: bool,
    ) -> Result<bool, HistorianError> {
        let policy = point.policy();
        let ts = sample.ts.unwrap_or_else(now_ms);

        // The state lock is held across the awaited table resolution so
        // samples for one identifier never evaluate stale state against
        // each other.
        let mut state = point.lock().await;

        let converted = match normalize(&sample.value, policy.storage_type, policy.round_digits) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(point_id = %point.id(), error = %e, "Dropping unconvertible sample");
                return Ok(false);
            }
        };

        let info = self
            .tables
            .resolve(point.id(), table_type(policy, converted.vtype))
            .await?;

        // The registered type is authoritative; a disagreeing sample is
        // re-converted, never the table altered.
        let converted = if converted.vtype != ValueType::Null && converted.vtype != info.vtype {
            match renormalize(&converted, info.vtype) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        point_id = %point.id(),
                        registered = %info.vtype,
                        error = %e,
                        "Dropping sample incompatible with registered type"
                    );
                    return Ok(false);
                }
            }
        } else {
            converted
        };

        let verdict = evaluate(policy, &state, &converted, ts, is_relog);
        state.last_raw = Some(sample.clone());

        match verdict {
            Verdict::Skip(reason) => {
                tracing::debug!(point_id = %point.id(), %reason, "Sample skipped");
                if policy.track_skipped {
                    state.last_skipped = Some(sample);
                }
                Ok(false)
            }
            Verdict::Accept { changed } => {
                let row = InsertRow::new(&info.table, ts, &converted);
                state.last_stored = Some(StoredSample::from_converted(
                    &converted,
                    ts,
                    sample.ack,
                    sample.quality,
                ));
                drop(state);

                let batch_full = self.buffer.enqueue(row);
                tracing::trace!(point_id = %point.id(), ts, changed, "Row enqueued");

                point.cancel_relog();
                if policy.relog_interval_ms > 0 {
                    point.arm_relog(self.relog.arm(
                        point.id(),
                        Duration::from_millis(policy.relog_interval_ms as u64),
                    ));
                }

                if batch_full {
                    let buffer = Arc::clone(&self.buffer);
                    tokio::spawn(async move {
                        if let Err(e) = buffer.flush(false).await {
                            tracing::warn!(error = %e, "Size-triggered flush failed");
                        }
                    });
                }
                Ok(true)
            }
        }
    }

    /// Synthesize the last stored value with a fresh timestamp and feed it
    /// back through the pipeline with the relog flag set.
    async fn process_relog(&self, id: &str) {
        let Some(point) = self.points.get(id) else {
            return;
        };
        let stored = point.lock().await.last_stored.clone();
        let Some(stored) = stored else {
            return;
        };
        let sample = Sample {
            value: stored.value.to_json(),
            ts: Some(now_ms()),
            last_change: None,
            ack: stored.ack,
            quality: stored.quality,
            source: Some("relog".to_string()),
        };
        if let Err(e) = self.process(&point, sample, true).await {
            tracing::warn!(point_id = %id, error = %e, "Relog failed");
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// storeState: run a sample through the pipeline, optionally forcing a
    /// flush afterwards.
    pub async fn store_state(
        &self,
        id: &str,
        sample: Sample,
        flush: bool,
    ) -> Result<bool, HistorianError> {
        let stored = self.handle_sample(id, sample).await?;
        if flush {
            self.buffer.flush(true).await?;
        }
        Ok(stored)
    }

    /// update: replace whatever is stored at an explicit timestamp,
    /// implemented as delete-then-insert. Bypasses the skip chain: an
    /// explicit edit is not a sampled observation.
    pub async fn update(&self, id: &str, sample: Sample) -> Result<(), HistorianError> {
        let ts = sample.ts.ok_or_else(|| {
            HistorianError::Validation("update requires an explicit timestamp".to_string())
        })?;
        let point = self
            .points
            .get_or_ephemeral(id, &self.config.default_policy);
        let policy = point.policy();

        // Same per-identifier lock as the sampled path: a first-use
        // resolution racing another operation must not register twice.
        let _state = point.lock().await;

        let converted = normalize(&sample.value, policy.storage_type, policy.round_digits)?;
        let info = self
            .tables
            .resolve(id, table_type(policy, converted.vtype))
            .await?;
        let converted = if converted.vtype != ValueType::Null && converted.vtype != info.vtype {
            renormalize(&converted, info.vtype)?
        } else {
            converted
        };

        // Settle any queued row for this instant before rewriting it.
        self.buffer.flush(true).await?;
        self.store
            .execute(&format!(
                "DELETE FROM {} WHERE ts = {}",
                quote_ident(&info.table),
                ts
            ))
            .await?;
        let row = InsertRow::new(&info.table, ts, &converted);
        self.store.insert(&info.table, &[row.to_store_row()]).await?;
        Ok(())
    }

    /// delete: remove rows at the given timestamps. Unknown identifiers
    /// succeed with nothing to do.
    pub async fn delete(&self, id: &str, timestamps: &[i64]) -> Result<(), HistorianError> {
        if timestamps.is_empty() {
            return Ok(());
        }
        let Some(info) = self.tables.lookup(id).await? else {
            return Ok(());
        };
        self.buffer.flush(true).await?;
        let list = timestamps
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.store
            .execute(&format!(
                "DELETE FROM {} WHERE ts IN ({})",
                quote_ident(&info.table),
                list
            ))
            .await?;
        Ok(())
    }

    /// deleteRange: remove rows inside inclusive bounds.
    pub async fn delete_range(&self, id: &str, start: i64, end: i64) -> Result<(), HistorianError> {
        if start > end {
            return Err(HistorianError::Validation(
                "range start is after its end".to_string(),
            ));
        }
        let Some(info) = self.tables.lookup(id).await? else {
            return Ok(());
        };
        self.buffer.flush(true).await?;
        self.store
            .execute(&format!(
                "DELETE FROM {} WHERE ts >= {} AND ts <= {}",
                quote_ident(&info.table),
                start,
                end
            ))
            .await?;
        Ok(())
    }

    /// deleteAll: clear an identifier's table without dropping it.
    pub async fn delete_all(&self, id: &str) -> Result<(), HistorianError> {
        let Some(info) = self.tables.lookup(id).await? else {
            return Ok(());
        };
        self.buffer.flush(true).await?;
        self.store
            .execute(&format!("DELETE FROM {}", quote_ident(&info.table)))
            .await?;
        Ok(())
    }

    /// getHistory: reconstruct stored samples for one identifier. An
    /// identifier with no table yields an empty result.
    pub async fn get_history(
        &self,
        id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>, HistorianError> {
        let Some(info) = self.tables.lookup(id).await? else {
            return Ok(Vec::new());
        };
        self.buffer.flush(true).await?;

        let mut sql = format!("SELECT ts, val FROM {}", quote_ident(&info.table));
        let mut params: Vec<Value> = Vec::new();
        let mut clauses: Vec<&str> = Vec::new();
        if let Some(start) = query.start {
            clauses.push("ts >= ?");
            params.push(Value::Timestamp(start));
        }
        if let Some(end) = query.end {
            clauses.push("ts <= ?");
            params.push(Value::Timestamp(end));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(match query.order {
            SortOrder::Asc => " ORDER BY ts ASC",
            SortOrder::Desc => " ORDER BY ts DESC",
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = self.store.query(&sql, &params).await?;
        Ok(reconstruct(&rows, info.vtype, query, id))
    }

    /// enableHistory: install a persisted policy for an identifier.
    pub fn enable_history(&self, id: &str, policy: PointPolicy) {
        self.points.configure(id, policy);
    }

    /// disableHistory: drop the identifier's policy and cancel its timers.
    pub fn disable_history(&self, id: &str) -> bool {
        self.points.remove(id)
    }

    /// getEnabledDPs: effective policy per tracked (non-ephemeral) point.
    pub fn enabled_points(&self) -> HashMap<String, PointPolicy> {
        self.points.tracked().into_iter().collect()
    }

    /// flushBuffer: force an immediate flush.
    pub async fn flush_buffer(&self) -> Result<usize, HistorianError> {
        Ok(self.buffer.flush(true).await?)
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_healthy(&self) -> bool {
        self.buffer.is_healthy()
    }
}

/// Table type for first registration: the declared type wins, a null value
/// with `auto` detection registers a text column.
fn table_type(policy: &PointPolicy, detected: ValueType) -> ValueType {
    policy.storage_type.fixed_type().unwrap_or(match detected {
        ValueType::Null => ValueType::String,
        other => other,
    })
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StorageType;
    use crate::history::Aggregate;
    use crate::store::MemoryStore;

    async fn historian() -> (Arc<Historian<MemoryStore>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let h = Historian::start(Arc::clone(&store), HistorianConfig::default())
            .await
            .unwrap();
        (h, store)
    }

    fn sample(v: serde_json::Value, ts: i64) -> Sample {
        Sample::new(v).at(ts)
    }

    #[tokio::test]
    async fn test_store_and_read_back() {
        let (h, _) = historian().await;

        assert!(h
            .store_state("room.temp", sample(serde_json::json!(21.5), 1000), true)
            .await
            .unwrap());
        assert!(h
            .store_state("room.temp", sample(serde_json::json!(22.0), 2000), true)
            .await
            .unwrap());

        let entries = h
            .get_history("room.temp", &HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, Value::Number(21.5));
        assert_eq!(entries[1].ts, 2000);
    }

    #[tokio::test]
    async fn test_changes_only_dedup() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                changes_only: true,
                ..Default::default()
            },
        );

        assert!(h.handle_sample("p1", sample(serde_json::json!(1.0), 1000)).await.unwrap());
        assert!(!h.handle_sample("p1", sample(serde_json::json!(1.0), 2000)).await.unwrap());
        assert!(h.handle_sample("p1", sample(serde_json::json!(2.0), 3000)).await.unwrap());

        h.flush_buffer().await.unwrap();
        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_registered_type_is_authoritative() {
        let (h, _) = historian().await;

        // first sample registers a number table
        h.store_state("p1", sample(serde_json::json!(1.0), 1000), true)
            .await
            .unwrap();
        // a string sample that parses numerically is re-converted
        h.store_state("p1", sample(serde_json::json!("2.5"), 2000), true)
            .await
            .unwrap();
        // an inconvertible sample is dropped, not written
        let stored = h
            .store_state("p1", sample(serde_json::json!("not a number"), 3000), true)
            .await
            .unwrap();
        assert!(!stored);

        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].value, Value::Number(2.5));
    }

    #[tokio::test]
    async fn test_get_history_unknown_id_is_empty() {
        let (h, _) = historian().await;
        let entries = h.get_history("ghost", &HistoryQuery::default()).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_delete_paths_ignore_unknown_id() {
        let (h, _) = historian().await;
        h.delete("ghost", &[1, 2]).await.unwrap();
        h.delete_range("ghost", 0, 10).await.unwrap();
        h.delete_all("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_rewrites_timestamp() {
        let (h, _) = historian().await;
        h.store_state("p1", sample(serde_json::json!(1.0), 1000), true)
            .await
            .unwrap();

        h.update("p1", sample(serde_json::json!(9.0), 1000)).await.unwrap();

        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, Value::Number(9.0));
    }

    #[tokio::test]
    async fn test_update_requires_timestamp() {
        let (h, _) = historian().await;
        let err = h
            .update("p1", Sample::new(serde_json::json!(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, HistorianError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_range_and_all() {
        let (h, _) = historian().await;
        for i in 0..5 {
            h.store_state("p1", sample(serde_json::json!(i as f64), i * 1000), false)
                .await
                .unwrap();
        }
        h.flush_buffer().await.unwrap();

        h.delete_range("p1", 1000, 3000).await.unwrap();
        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);

        h.delete_all("p1").await.unwrap();
        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_enabled_points_excludes_ephemeral() {
        let (h, _) = historian().await;
        h.enable_history("tracked", PointPolicy::default());
        h.store_state("adhoc", sample(serde_json::json!(1), 1000), false)
            .await
            .unwrap();

        let enabled = h.enabled_points();
        assert!(enabled.contains_key("tracked"));
        assert!(!enabled.contains_key("adhoc"));
    }

    #[tokio::test]
    async fn test_disable_cancels_tracking() {
        let (h, _) = historian().await;
        h.enable_history("p1", PointPolicy::default());
        assert!(h.disable_history("p1"));
        assert!(!h.disable_history("p1"));
        assert!(h.enabled_points().is_empty());
    }

    #[tokio::test]
    async fn test_history_query_bounds_order_limit() {
        let (h, _) = historian().await;
        for i in 0..10 {
            h.store_state("p1", sample(serde_json::json!(i as f64), i * 100), false)
                .await
                .unwrap();
        }

        let q = HistoryQuery {
            start: Some(200),
            end: Some(800),
            order: SortOrder::Desc,
            limit: Some(3),
            ..Default::default()
        };
        let entries = h.get_history("p1", &q).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].ts, 800);
        assert_eq!(entries[2].ts, 600);
    }

    #[tokio::test]
    async fn test_on_change_aggregate_through_pipeline() {
        let (h, _) = historian().await;
        // no changes_only policy: every sample lands
        for (i, v) in [1.0, 1.0, 2.0, 2.0, 2.0, 1.0].iter().enumerate() {
            h.store_state("p1", sample(serde_json::json!(v), i as i64 * 1000), false)
                .await
                .unwrap();
        }

        let q = HistoryQuery {
            aggregate: Aggregate::OnChange,
            ..Default::default()
        };
        let entries = h.get_history("p1", &q).await.unwrap();
        let values: Vec<f64> = entries.iter().filter_map(|e| e.value.as_f64()).collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relog_re_emits_last_value() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                changes_only: true,
                relog_interval_ms: 60_000,
                ..Default::default()
            },
        );

        h.store_state("p1", Sample::new(serde_json::json!(5.0)), true)
            .await
            .unwrap();
        let before = h
            .get_history("p1", &HistoryQuery::default())
            .await
            .unwrap()
            .len();
        assert_eq!(before, 1);

        // let the relog timer fire and the synthetic sample be processed
        tokio::time::sleep(Duration::from_secs(61)).await;
        h.flush_buffer().await.unwrap();

        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].value, Value::Number(5.0));

        h.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_change_recreates_point() {
        let (h, _) = historian().await;
        h.handle_config_change(
            "p1",
            Some(PointPolicy {
                changes_only: true,
                ..Default::default()
            }),
        );
        h.store_state("p1", sample(serde_json::json!(1.0), 1000), true)
            .await
            .unwrap();

        // removal drops tracking entirely
        h.handle_config_change("p1", None);
        assert!(h.enabled_points().is_empty());
    }

    #[tokio::test]
    async fn test_declared_string_type_stringifies() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                storage_type: StorageType::String,
                ..Default::default()
            },
        );
        h.store_state("p1", sample(serde_json::json!(42), 1000), true)
            .await
            .unwrap();

        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries[0].value, Value::String("42".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_first_use_registers_one_table() {
        let (h, store) = historian().await;

        // update and a live sample race on a fresh identifier; exactly one
        // table and one registry entry may result
        let u = h.update("race.point", sample(serde_json::json!(1.0), 1000));
        let s = h.handle_sample("race.point", sample(serde_json::json!(2.0), 2000));
        let (ru, rs) = tokio::join!(u, s);
        ru.unwrap();
        assert!(rs.unwrap());
        h.flush_buffer().await.unwrap();

        let rows = store
            .query(
                "SELECT table_name FROM \"history_registry\" WHERE point_id = ?",
                &[Value::String("race.point".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let entries = h
            .get_history("race.point", &HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_sample_recorded_for_diagnostics() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                changes_only: true,
                ..Default::default()
            },
        );

        h.handle_sample("p1", sample(serde_json::json!(1.0), 1000)).await.unwrap();
        h.handle_sample("p1", sample(serde_json::json!(1.0), 2000)).await.unwrap();

        let point = h.points.get("p1").unwrap();
        let state = point.lock().await;
        assert_eq!(state.last_skipped.as_ref().and_then(|s| s.ts), Some(2000));
        // the raw record always follows the newest sample, skipped or not
        assert_eq!(state.last_raw.as_ref().and_then(|s| s.ts), Some(2000));
        assert_eq!(state.last_stored.as_ref().map(|s| s.ts), Some(1000));
    }

    #[tokio::test]
    async fn test_skip_tracking_can_be_disabled() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                changes_only: true,
                track_skipped: false,
                ..Default::default()
            },
        );

        h.handle_sample("p1", sample(serde_json::json!(1.0), 1000)).await.unwrap();
        h.handle_sample("p1", sample(serde_json::json!(1.0), 2000)).await.unwrap();

        let point = h.points.get("p1").unwrap();
        let state = point.lock().await;
        assert!(state.last_skipped.is_none());
        assert_eq!(state.last_raw.as_ref().and_then(|s| s.ts), Some(2000));
    }

    #[tokio::test]
    async fn test_same_point_samples_serialize() {
        let (h, _) = historian().await;
        h.enable_history(
            "p1",
            PointPolicy {
                changes_only: true,
                ..Default::default()
            },
        );

        // concurrent identical samples: exactly one row survives dedup
        let a = h.handle_sample("p1", sample(serde_json::json!(7.0), 1000));
        let b = h.handle_sample("p1", sample(serde_json::json!(7.0), 2000));
        let (ra, rb) = tokio::join!(a, b);
        assert!(ra.unwrap() ^ rb.unwrap());

        h.flush_buffer().await.unwrap();
        let entries = h.get_history("p1", &HistoryQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
