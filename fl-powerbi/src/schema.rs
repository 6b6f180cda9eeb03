//! Live column discovery with a process-wide, time-bounded cache.

use crate::clock::Clock;
use crate::envelope::bare_column_name;
use crate::executor::QueryExecutor;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

pub const DEFAULT_TABLES: [&str; 4] = ["flights", "airlines", "origin_airport", "destination_airport"];
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
/// Lifetime of a map in which every probe failed.
pub const FAILED_REBUILD_RETRY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumns {
    pub table: String,
    pub columns: Vec<String>,
}

/// Table name to ordered column names. Every configured table is present,
/// with an empty column list when its probe failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchemaMap {
    tables: Vec<TableColumns>,
}

impl SchemaMap {
    pub fn new(tables: Vec<TableColumns>) -> Self {
        Self { tables }
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map(|t| t.columns.as_slice())
    }

    pub fn tables(&self) -> &[TableColumns] {
        &self.tables
    }

    /// Text block handed to the agent: one `Table:`/`Columns:` pair per table.
    pub fn render(&self) -> String {
        let mut out = String::from("Power BI Dataset Schema:\n\n");
        for t in &self.tables {
            let cols: Vec<String> = t.columns.iter().map(|c| format!("[{c}]")).collect();
            out.push_str(&format!("Table: '{}'\nColumns: {}\n\n", t.table, cols.join(", ")));
        }
        out
    }
}

struct CachedSchema {
    built_at: Instant,
    ttl: Duration,
    map: Arc<SchemaMap>,
}

pub struct SchemaDiscovery {
    executor: QueryExecutor,
    tables: Vec<String>,
    refresh_interval: Duration,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedSchema>>,
    refresh: Mutex<()>,
}

impl SchemaDiscovery {
    pub fn new(
        executor: QueryExecutor,
        tables: Vec<String>,
        refresh_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            tables,
            refresh_interval,
            clock,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Returns the cached map, rebuilding it when absent or older than the refresh
    /// interval. Never fails; readers see either the old or the new map whole.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn get_schema(&self) -> Arc<SchemaMap> {
        if let Some(map) = self.fresh().await {
            return map;
        }
        let _guard = self.refresh.lock().await;
        if let Some(map) = self.fresh().await {
            return map;
        }

        let started = Instant::now();
        let (map, failed) = self.discover().await;
        let map = Arc::new(map);
        let ttl = if !self.tables.is_empty() && failed == self.tables.len() {
            tracing::warn!(
                retry_secs = FAILED_REBUILD_RETRY.as_secs(),
                "every schema probe failed; keeping the map briefly"
            );
            FAILED_REBUILD_RETRY.min(self.refresh_interval)
        } else {
            self.refresh_interval
        };
        tracing::info!(
            tables = map.tables().len(),
            empty_tables = map.tables().iter().filter(|t| t.columns.is_empty()).count(),
            failed_probes = failed,
            latency_ms = started.elapsed().as_millis() as u64,
            "schema map rebuilt"
        );
        *self.cached.write().await = Some(CachedSchema {
            built_at: self.clock.now(),
            ttl,
            map: map.clone(),
        });
        map
    }

    /// Drops the cached map so the next call probes again.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::info!("schema cache invalidated");
    }

    /// Age of the cached map, if one exists.
    pub async fn age(&self) -> Option<Duration> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .map(|c| self.clock.now().saturating_duration_since(c.built_at))
    }

    async fn fresh(&self) -> Option<Arc<SchemaMap>> {
        let cached = self.cached.read().await;
        let entry = cached.as_ref()?;
        let age = self.clock.now().saturating_duration_since(entry.built_at);
        (age <= entry.ttl).then(|| entry.map.clone())
    }

    /// The map plus how many probes failed outright.
    async fn discover(&self) -> (SchemaMap, usize) {
        let probes = self.tables.iter().map(|table| self.probe(table));
        let results = join_all(probes).await;
        let failed = results.iter().filter(|(_, ok)| !ok).count();
        let tables = results.into_iter().map(|(columns, _)| columns).collect();
        (SchemaMap::new(tables), failed)
    }

    async fn probe(&self, table: &str) -> (TableColumns, bool) {
        let query = format!("EVALUATE TOPN(1, '{table}')");
        let (columns, ok) = match self.executor.execute_query(&query).await {
            Ok(response) => (
                response
                    .first_row()
                    .map(|row| row.keys().map(|k| bare_column_name(k).to_string()).collect())
                    .unwrap_or_default(),
                true,
            ),
            Err(e) => {
                tracing::warn!(table, error = %e, "schema probe failed; storing empty column list");
                (Vec::new(), false)
            }
        };
        let columns = TableColumns {
            table: table.to_string(),
            columns,
        };
        (columns, ok)
    }
}
