//! Plans and the plan cache.
//!
//! A [`Plan`] is the compiled form of one statement, keyed by its raw text.
//! Cached plans are shared between executions; only the transaction id is
//! rebound on each cache hit. Plans that failed to build are never cached.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::analyzer::{Analysis, ExtendedTableMetadata, MutationKind};
use crate::ast::{CommentDirectives, directives};
use crate::error::{CloudqlError, CloudqlResult};
use crate::monitor::AsyncMonitorPrimitive;
use crate::output::ExecutorOutput;
use crate::primitive::{
    ExecContext, HttpRestPrimitive, JoinPrimitive, Primitive, ResponseHandling,
};

/// Provider API version the operation monitor understands.
const MONITORED_VERSION: &str = "v1";

/// Execution counters of a plan; advisory only.
#[derive(Debug, Default)]
pub struct PlanStats {
    pub exec_count: AtomicU64,
    /// Total execution time in microseconds.
    pub exec_time_us: AtomicU64,
    pub rows: AtomicU64,
    pub errors: AtomicU64,
}

impl PlanStats {
    fn record(&self, elapsed: Duration, output: &ExecutorOutput) {
        self.exec_count.fetch_add(1, Ordering::Relaxed);
        self.exec_time_us.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        self.rows
            .fetch_add(output.row_count() as u64, Ordering::Relaxed);
        if output.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn exec_time(&self) -> Duration {
        Duration::from_micros(self.exec_time_us.load(Ordering::Relaxed))
    }
}

/// A compiled statement.
pub struct Plan {
    /// Statement kind, e.g. `SELECT`.
    pub statement_type: String,
    pub original_text: String,
    pub instructions: Primitive,
    txn_id: AtomicU64,
    pub stats: PlanStats,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("statement_type", &self.statement_type)
            .field("original_text", &self.original_text)
            .field("instructions", &self.instructions.describe())
            .field("txn_id", &self.txn_id())
            .finish()
    }
}

impl Plan {
    pub fn new(
        statement_type: impl Into<String>,
        original_text: impl Into<String>,
        instructions: Primitive,
        txn_id: u64,
    ) -> Self {
        Self {
            statement_type: statement_type.into(),
            original_text: original_text.into(),
            instructions,
            txn_id: AtomicU64::new(txn_id),
            stats: PlanStats::default(),
        }
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id.load(Ordering::SeqCst)
    }

    /// Bind a fresh transaction id before reuse.
    pub fn rebind(&self, txn_id: u64) {
        self.txn_id.store(txn_id, Ordering::SeqCst);
    }

    /// Run the instructions and record statistics.
    pub async fn execute(&self, ctx: &mut ExecContext) -> ExecutorOutput {
        let start = Instant::now();
        let output = self.instructions.execute(ctx, self.txn_id()).await;
        self.stats.record(start.elapsed(), &output);
        output
    }
}

/// Monotonic per-session transaction ids.
#[derive(Debug, Default)]
pub struct TxnCounter(AtomicU64);

impl TxnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; the first is 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded LRU of plans keyed by raw query text.
pub struct PlanCache {
    entries: Mutex<LruCache<String, Arc<Plan>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    /// Cache holding up to `capacity` plans; zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<Plan>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get(&self, query: &str) -> Option<Arc<Plan>> {
        let found = self.entries().get(query).cloned();
        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Plan cache hit for '{}'", query);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Plan cache miss for '{}'", query);
            }
        }
        found
    }

    pub fn insert(&self, query: impl Into<String>, plan: Arc<Plan>) {
        self.entries().put(query.into(), plan);
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        tracing::debug!("Cleared {} cached plans", count);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn rest_primitive(table: ExtendedTableMetadata, handling: ResponseHandling) -> HttpRestPrimitive {
    HttpRestPrimitive {
        provider: table.heirarchy.provider,
        method: table.heirarchy.method,
        armoury: table.armoury,
        select_items_key: table.select_items_key,
        handling,
    }
}

fn mutation_primitive(
    kind: MutationKind,
    table: ExtendedTableMetadata,
    hints: &CommentDirectives,
) -> CloudqlResult<Primitive> {
    let show_results = hints.is_set(directives::SHOWRESULTS);
    let awaited = hints.is_set(directives::AWAIT);
    let returns_operation = table.heirarchy.returns_operation();
    let version = table.heirarchy.provider.version().to_string();
    let ids = table.heirarchy.identifiers.clone();
    let precursor = rest_primitive(table, ResponseHandling::Mutation { show_results });

    if !awaited {
        return Ok(Primitive::HttpRest(precursor));
    }
    if !version.eq_ignore_ascii_case(MONITORED_VERSION) {
        return Err(CloudqlError::Plan(format!(
            "monitor primitive unavailable for service = '{}', resource = '{}', method = '{}'",
            ids.service_name, ids.resource_name, precursor.method.name
        )));
    }
    if !returns_operation {
        tracing::debug!(
            "{:?} of {} does not return an operation; AWAIT has no effect",
            kind,
            precursor.method.id
        );
        return Ok(Primitive::HttpRest(precursor));
    }
    Ok(Primitive::AsyncMonitor(AsyncMonitorPrimitive::new(
        precursor,
        hints.is_set(directives::NOSTATUS),
        show_results,
    )))
}

/// Compile an analysis into its primitive.
pub fn build_primitive(analysis: Analysis) -> CloudqlResult<Primitive> {
    match analysis {
        Analysis::Select { table, shape } => Ok(Primitive::HttpRest(rest_primitive(
            table,
            ResponseHandling::Select(shape),
        ))),
        Analysis::Mutation {
            kind,
            table,
            directives: hints,
        } => mutation_primitive(kind, table, &hints),
        Analysis::Join(tables) => Ok(Primitive::Join(JoinPrimitive { tables })),
        Analysis::MetaData(p) => Ok(Primitive::MetaData(p)),
        Analysis::Local(p) => Ok(Primitive::Local(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::LocalPrimitive;
    use crate::transport::ScriptedTransport;

    fn plan(text: &str, txn: u64) -> Arc<Plan> {
        Arc::new(Plan::new(
            "SLEEP",
            text,
            Primitive::Local(LocalPrimitive::Sleep(1)),
            txn,
        ))
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = PlanCache::new(10);
        assert!(cache.get("sleep 1").is_none());

        cache.insert("sleep 1", plan("sleep 1", 1));
        let hit = cache.get("sleep 1").unwrap();
        assert_eq!(hit.original_text, "sleep 1");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let cache = PlanCache::new(2);
        cache.insert("a", plan("a", 1));
        cache.insert("b", plan("b", 2));
        cache.get("a");
        cache.insert("c", plan("c", 3));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_txn_counter_and_rebind() {
        let counter = TxnCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);

        let p = plan("sleep 1", 1);
        p.rebind(counter.next());
        assert_eq!(p.txn_id(), 3);
    }

    #[tokio::test]
    async fn test_execute_records_stats() {
        let mut ctx = ExecContext::new(Arc::new(ScriptedTransport::new()), "google");
        let p = plan("sleep 1", 4);
        let out = p.execute(&mut ctx).await;
        assert_eq!(out.txn_id, 4);
        assert_eq!(p.stats.exec_count.load(Ordering::Relaxed), 1);
        assert_eq!(p.stats.errors.load(Ordering::Relaxed), 0);

        let join = Plan::new("SELECT", "q", Primitive::Join(JoinPrimitive { tables: vec![] }), 5);
        join.execute(&mut ctx).await;
        assert_eq!(join.stats.errors.load(Ordering::Relaxed), 1);
    }
}
