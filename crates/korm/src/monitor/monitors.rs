use super::types::{QueryContext, QueryMonitor, QueryResult, QueryType};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Counts statements per connection.
///
/// Tests use it to check that cached result sets are not fetched twice.
#[derive(Debug, Default)]
pub struct StatsMonitor {
    stats: Mutex<QueryStats>,
}

/// Snapshot of a [`StatsMonitor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub slow_queries: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    /// SQL of the statement that took `max_duration`.
    pub slowest_query: Option<String>,
    by_type: [u64; QueryType::ALL.len()],
}

impl QueryStats {
    /// Statements of one kind.
    pub fn count(&self, query_type: QueryType) -> u64 {
        self.by_type[query_type.index()]
    }

    /// Non-zero per-kind counts, in [`QueryType::ALL`] order.
    pub fn by_type(&self) -> Vec<(QueryType, u64)> {
        QueryType::ALL
            .iter()
            .map(|t| (*t, self.count(*t)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueryStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> QueryStats {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = QueryStats::default();
    }
}

impl QueryMonitor for StatsMonitor {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        let mut stats = self.lock();
        stats.total_queries += 1;
        stats.by_type[ctx.query_type.index()] += 1;
        if result.is_error() {
            stats.failed_queries += 1;
        }
        stats.total_duration = stats.total_duration.saturating_add(duration);
        if duration > stats.max_duration || stats.slowest_query.is_none() {
            stats.max_duration = duration;
            stats.slowest_query = Some(ctx.sql.clone());
        }
    }

    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {
        self.lock().slow_queries += 1;
    }
}

impl<M: QueryMonitor + ?Sized> QueryMonitor for Arc<M> {
    fn on_query_start(&self, ctx: &QueryContext) {
        (**self).on_query_start(ctx);
    }

    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        (**self).on_query_complete(ctx, duration, result);
    }

    fn on_slow_query(&self, ctx: &QueryContext, duration: Duration) {
        (**self).on_slow_query(ctx, duration);
    }
}

/// The monitors attached to one connection, notified in attach order.
#[derive(Default)]
pub struct CompositeMonitor {
    monitors: Vec<Arc<dyn QueryMonitor>>,
}

impl CompositeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, monitor: Arc<dyn QueryMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl QueryMonitor for CompositeMonitor {
    fn on_query_start(&self, ctx: &QueryContext) {
        self.monitors.iter().for_each(|m| m.on_query_start(ctx));
    }

    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        self.monitors
            .iter()
            .for_each(|m| m.on_query_complete(ctx, duration, result));
    }

    fn on_slow_query(&self, ctx: &QueryContext, duration: Duration) {
        self.monitors.iter().for_each(|m| m.on_slow_query(ctx, duration));
    }
}
