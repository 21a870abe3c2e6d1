//! Table and schema resolution.
//!
//! Each tracked identifier maps to one backing table with two columns
//! (timestamp, nullable typed value). The durable registry table is the
//! source of truth for the mapping; the in-memory cache is a projection of
//! it, rebuilt at startup and updated synchronously on table creation.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::data::{Value, ValueType};
use crate::store::{quote_ident, Store, StoreError, StoreRow};

/// Maximum length of a generated table name.
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// Filler prepended when a sanitized identifier starts with a digit.
const DIGIT_FILLER: char = 't';

/// Registered backing table for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub table: String,
    pub vtype: ValueType,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Strip everything but alphanumerics and underscores, collapse repeated
/// underscores, and trim them from both ends.
pub fn sanitize_identifier(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_underscore = false;
    for c in id.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_underscore = false;
        } else if c == '_' && !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Deterministic base table name for an identifier (before collision
/// suffixing).
pub fn base_table_name(prefix: &str, id: &str) -> String {
    let mut sanitized = sanitize_identifier(id);
    if sanitized.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        sanitized.insert(0, DIGIT_FILLER);
    }
    let mut name = format!("{}_{}", prefix, sanitized);
    name.truncate(MAX_TABLE_NAME_LEN);
    name
}

/// Maps identifiers to backing tables, creating table and registry entry on
/// first use.
pub struct TableResolver<S> {
    store: Arc<S>,
    prefix: String,
    registry_table: String,
    cache: RwLock<HashMap<String, TableInfo>>,
    taken_names: RwLock<HashSet<String>>,
}

impl<S: Store> TableResolver<S> {
    pub fn new(store: Arc<S>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            registry_table: format!("{}_registry", prefix),
            cache: RwLock::new(HashMap::new()),
            taken_names: RwLock::new(HashSet::new()),
        }
    }

    /// Create the registry table if needed and rebuild the cache from it.
    pub async fn init(&self) -> Result<usize, ResolveError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (point_id TEXT NOT NULL, table_name TEXT NOT NULL, value_type TEXT NOT NULL, updated_at BIGINT NOT NULL)",
            quote_ident(&self.registry_table)
        );
        self.store.execute(&ddl).await?;

        let sql = format!(
            "SELECT point_id, table_name, value_type, updated_at FROM {} ORDER BY updated_at ASC",
            quote_ident(&self.registry_table)
        );
        let rows = self.store.query(&sql, &[]).await?;

        let mut cache = self.cache.write();
        let mut names = self.taken_names.write();
        cache.clear();
        names.clear();
        for row in &rows {
            match parse_registry_row(row) {
                // ORDER BY updated_at gives last-write-wins on re-insert.
                Some((id, info)) => {
                    names.insert(info.table.clone());
                    cache.insert(id, info);
                }
                None => {
                    tracing::warn!(row = ?row, "Skipping malformed registry row");
                }
            }
        }
        Ok(cache.len())
    }

    /// Cached mapping for an identifier, falling back to a registry lookup
    /// on miss. `None` means no table has ever been registered.
    pub async fn lookup(&self, id: &str) -> Result<Option<TableInfo>, ResolveError> {
        if let Some(info) = self.cache.read().get(id) {
            return Ok(Some(info.clone()));
        }
        let found = self.registry_lookup(id).await?;
        if let Some(info) = &found {
            self.taken_names.write().insert(info.table.clone());
            self.cache.write().insert(id.to_string(), info.clone());
        }
        Ok(found)
    }

    /// Resolve the backing table for a write, creating the table and the
    /// registry entry on first use.
    ///
    /// The registered type is authoritative: when a cached entry disagrees
    /// with `vtype`, the entry is returned unchanged and the caller
    /// re-converts the value.
    pub async fn resolve(&self, id: &str, vtype: ValueType) -> Result<TableInfo, ResolveError> {
        if let Some(info) = self.lookup(id).await? {
            return Ok(info);
        }

        let name = self.claim_name(id);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (ts BIGINT NOT NULL, val {})",
            quote_ident(&name),
            vtype.column_type()
        );
        self.store.execute(&ddl).await?;

        let now = chrono::Utc::now().timestamp_millis();
        let entry: StoreRow = vec![
            Value::String(id.to_string()),
            Value::String(name.clone()),
            Value::String(vtype.as_str().to_string()),
            Value::Timestamp(now),
        ];
        self.store.insert(&self.registry_table, &[entry]).await?;

        let info = TableInfo { table: name, vtype };
        self.cache.write().insert(id.to_string(), info.clone());
        tracing::info!(point_id = %id, table = %info.table, vtype = %info.vtype, "Registered new point table");
        Ok(info)
    }

    /// Reserve a collision-free table name for an identifier.
    fn claim_name(&self, id: &str) -> String {
        let base = base_table_name(&self.prefix, id);
        let mut names = self.taken_names.write();
        if names.insert(base.clone()) {
            return base;
        }
        let mut n = 2usize;
        loop {
            let suffix = format!("_{}", n);
            let keep = MAX_TABLE_NAME_LEN.saturating_sub(suffix.len());
            let mut candidate = base.clone();
            candidate.truncate(keep);
            candidate.push_str(&suffix);
            if names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    async fn registry_lookup(&self, id: &str) -> Result<Option<TableInfo>, ResolveError> {
        let sql = format!(
            "SELECT point_id, table_name, value_type, updated_at FROM {} WHERE point_id = ? ORDER BY updated_at ASC",
            quote_ident(&self.registry_table)
        );
        let rows = self
            .store
            .query(&sql, &[Value::String(id.to_string())])
            .await?;
        Ok(rows
            .iter()
            .filter_map(parse_registry_row)
            .map(|(_, info)| info)
            .last())
    }
}

fn parse_registry_row(row: &StoreRow) -> Option<(String, TableInfo)> {
    let id = row.first()?.as_str()?.to_string();
    let table = row.get(1)?.as_str()?.to_string();
    let vtype = ValueType::parse(row.get(2)?.as_str()?)?;
    Some((id, TableInfo { table, vtype }))
}
