use crate::models::{FieldUsage, QueryKind, QueryObservation, TableSizeInfo};
use snafu::{ResultExt, Snafu};
use sqlx::{query_scalar, Pool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Debug, Snafu)]
pub enum StatsError {
    #[snafu(display("Failed to execute query: {}", query))]
    QueryFailed { query: String, source: sqlx::Error },
}

type Result<T, E = StatsError> = std::result::Result<T, E>;

/// Default number of buffered observations that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Wall-time since the last flush that triggers one regardless of size.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Hard cap; reaching it forces a flush on the calling task.
pub const MAX_BUFFER: usize = 10_000;

struct BufferInner {
    observations: Vec<QueryObservation>,
    last_flush: Instant,
}

/// Batched, thread-safe ingestion of per-query observations.
///
/// `log` holds the mutex only for the append and the swap-out; the batched
/// insert runs outside the lock. Stats are advisory, so flush failures are
/// logged and the batch is discarded.
pub struct StatsBuffer {
    inner: Mutex<BufferInner>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Default for StatsBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }
}

impl StatsBuffer {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                observations: Vec::new(),
                last_flush: Instant::now(),
            }),
            batch_size,
            flush_interval,
        }
    }

    /// Append one observation. Returns the batch to insert when a flush
    /// tripped (size, time, or the hard cap); the caller performs the insert
    /// outside the lock.
    pub fn log(&self, observation: QueryObservation) -> Option<Vec<QueryObservation>> {
        let mut inner = self.inner.lock().expect("stats buffer lock poisoned");

        if inner.observations.len() >= MAX_BUFFER {
            warn!(cap = MAX_BUFFER, "stats buffer at maximum size, forcing flush");
            inner.last_flush = Instant::now();
            let batch = std::mem::take(&mut inner.observations);
            inner.observations.push(observation);
            return Some(batch);
        }

        inner.observations.push(observation);
        let should_flush = inner.observations.len() >= self.batch_size
            || inner.last_flush.elapsed() >= self.flush_interval;
        if should_flush {
            inner.last_flush = Instant::now();
            return Some(std::mem::take(&mut inner.observations));
        }
        None
    }

    /// Swap out whatever is buffered, e.g. on shutdown.
    pub fn drain(&self) -> Vec<QueryObservation> {
        let mut inner = self.inner.lock().expect("stats buffer lock poisoned");
        inner.last_flush = Instant::now();
        std::mem::take(&mut inner.observations)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("stats buffer lock poisoned")
            .observations
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record an observation, flushing the batch if the buffer asks for it.
pub async fn record(buffer: &StatsBuffer, pool: &Pool<Postgres>, observation: QueryObservation) {
    if let Some(batch) = buffer.log(observation) {
        flush_batch(pool, &batch).await;
    }
}

/// One batched insert into `query_stats`. Best-effort: failures are logged
/// and the batch is dropped.
pub async fn flush_batch(pool: &Pool<Postgres>, batch: &[QueryObservation]) {
    if batch.is_empty() {
        return;
    }

    let mut builder = QueryBuilder::new(
        "INSERT INTO query_stats (tenant_id, table_name, field_name, query_type, duration_ms) ",
    );
    builder.push_values(batch.iter(), |mut row, obs| {
        row.push_bind(obs.tenant_id)
            .push_bind(&obs.table)
            .push_bind(&obs.field)
            .push_bind(obs.kind.as_str())
            .push_bind(obs.duration_ms);
    });

    match builder.build().execute(pool).await {
        Ok(result) => debug!(rows = result.rows_affected(), "flushed query stats"),
        Err(err) => error!("failed to flush query stats: {err}"),
    }
}

/// One aggregated row of `query_stats`, grouped by tenant/table/field/kind.
#[derive(Debug, Clone)]
pub struct QueryStatSummary {
    pub tenant_id: Option<i64>,
    pub table: String,
    pub field: Option<String>,
    pub kind: Option<QueryKind>,
    pub query_count: i64,
    pub avg_duration_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Windowed aggregation over `[now - window, now)`, grouped by tenant, table,
/// field and query kind, ordered by descending count.
pub async fn query_stats(
    pool: &Pool<Postgres>,
    window_hours: u32,
    table: Option<&str>,
    field: Option<&str>,
) -> Result<Vec<QueryStatSummary>> {
    let mut sql = String::from(
        r#"
        SELECT
            tenant_id::bigint AS tenant_id,
            table_name,
            field_name,
            query_type,
            COUNT(*) AS query_count,
            AVG(duration_ms)::float8 AS avg_duration_ms,
            (PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY duration_ms))::float8 AS p95_ms,
            (PERCENTILE_CONT(0.99) WITHIN GROUP (ORDER BY duration_ms))::float8 AS p99_ms
        FROM query_stats
        WHERE created_at >= NOW() - make_interval(hours => $1)
          AND created_at < NOW()
        "#,
    );
    if table.is_some() {
        sql.push_str(" AND table_name = $2");
    }
    if field.is_some() {
        sql.push_str(if table.is_some() {
            " AND field_name = $3"
        } else {
            " AND field_name = $2"
        });
    }
    sql.push_str(
        r#"
        GROUP BY tenant_id, table_name, field_name, query_type
        ORDER BY query_count DESC
        "#,
    );

    let mut query = sqlx::query(&sql).bind(window_hours as i32);
    if let Some(table) = table {
        query = query.bind(table);
    }
    if let Some(field) = field {
        query = query.bind(field);
    }

    let rows = query.fetch_all(pool).await.context(QueryFailedSnafu {
        query: sql.clone(),
    })?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let kind: String = row.get("query_type");
        summaries.push(QueryStatSummary {
            tenant_id: row.try_get("tenant_id").ok(),
            table: row.get("table_name"),
            field: row.try_get("field_name").ok(),
            kind: QueryKind::parse(&kind),
            query_count: row.get("query_count"),
            avg_duration_ms: row.try_get("avg_duration_ms").unwrap_or(0.0),
            p95_ms: row.try_get("p95_ms").unwrap_or(0.0),
            p99_ms: row.try_get("p99_ms").unwrap_or(0.0),
        });
    }
    Ok(summaries)
}

/// Per-field usage over the window, ordered by descending `total_queries`.
/// The ordering defines candidate priority for the whole decision pass.
pub async fn field_usage(pool: &Pool<Postgres>, window_hours: u32) -> Result<Vec<FieldUsage>> {
    const QUERY: &str = r#"
        SELECT
            table_name,
            field_name,
            COUNT(*) AS total_queries,
            COUNT(DISTINCT tenant_id) AS distinct_tenants,
            AVG(duration_ms)::float8 AS avg_duration_ms,
            (PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY duration_ms))::float8 AS p95_ms,
            (PERCENTILE_CONT(0.99) WITHIN GROUP (ORDER BY duration_ms))::float8 AS p99_ms,
            COUNT(*) FILTER (WHERE query_type = 'READ') AS read_count,
            COUNT(*) FILTER (WHERE query_type = 'WRITE') AS write_count,
            COUNT(*) FILTER (WHERE query_type = 'SELECT') AS select_count,
            COUNT(*) FILTER (WHERE query_type = 'INSERT') AS insert_count,
            COUNT(*) FILTER (WHERE query_type = 'UPDATE') AS update_count,
            COUNT(*) FILTER (WHERE query_type = 'DELETE') AS delete_count
        FROM query_stats
        WHERE created_at >= NOW() - make_interval(hours => $1)
          AND created_at < NOW()
          AND field_name IS NOT NULL
        GROUP BY table_name, field_name
        ORDER BY total_queries DESC
    "#;

    let rows = sqlx::query(QUERY)
        .bind(window_hours as i32)
        .fetch_all(pool)
        .await
        .context(QueryFailedSnafu { query: QUERY })?;

    let mut usages = Vec::with_capacity(rows.len());
    for row in rows {
        let mut by_kind = BTreeMap::new();
        for (kind, column) in [
            (QueryKind::Read, "read_count"),
            (QueryKind::Write, "write_count"),
            (QueryKind::Select, "select_count"),
            (QueryKind::Insert, "insert_count"),
            (QueryKind::Update, "update_count"),
            (QueryKind::Delete, "delete_count"),
        ] {
            let count: i64 = row.get(column);
            if count > 0 {
                by_kind.insert(kind, count);
            }
        }
        usages.push(FieldUsage {
            table: row.get("table_name"),
            field: row.get("field_name"),
            total_queries: row.get("total_queries"),
            distinct_tenants: row.get("distinct_tenants"),
            avg_duration_ms: row.try_get("avg_duration_ms").unwrap_or(0.0),
            p95_ms: row.try_get("p95_ms").unwrap_or(0.0),
            p99_ms: row.try_get("p99_ms").unwrap_or(0.0),
            by_kind,
        });
    }
    Ok(usages)
}

pub async fn table_row_count(pool: &Pool<Postgres>, table: &str) -> Result<i64> {
    // Identifier is validated upstream; quoting keeps it literal here.
    let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
    query_scalar::<_, i64>(&sql)
        .fetch_one(pool)
        .await
        .context(QueryFailedSnafu { query: sql.clone() })
}

async fn table_bytes(pool: &Pool<Postgres>, table: &str) -> i64 {
    let result = query_scalar::<_, i64>("SELECT pg_relation_size(quote_ident($1)::regclass)")
        .bind(table)
        .fetch_one(pool)
        .await;
    match result {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(table, "error getting table size: {err}");
            0
        }
    }
}

async fn index_bytes(pool: &Pool<Postgres>, table: &str) -> i64 {
    const QUERY: &str = r#"
        SELECT COALESCE(SUM(pg_relation_size(quote_ident(indexname)::regclass)), 0)::bigint
        FROM pg_indexes
        WHERE schemaname = 'public' AND tablename = $1
    "#;
    match query_scalar::<_, i64>(QUERY).bind(table).fetch_one(pool).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(table, "error getting index size: {err}");
            0
        }
    }
}

/// Row count plus on-disk footprint, re-fetched per decision pass.
pub async fn table_size_info(pool: &Pool<Postgres>, table: &str) -> TableSizeInfo {
    let row_count = match table_row_count(pool, table).await {
        Ok(count) => count,
        Err(err) => {
            warn!(table, "error getting row count: {err}");
            0
        }
    };
    let table_bytes = table_bytes(pool, table).await;
    let index_bytes = index_bytes(pool, table).await;
    TableSizeInfo::new(row_count, table_bytes, index_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(table: &str) -> QueryObservation {
        QueryObservation {
            tenant_id: Some(1),
            table: table.to_string(),
            field: Some("status".to_string()),
            kind: QueryKind::Select,
            duration_ms: 1.5,
        }
    }

    #[test]
    fn flush_triggers_at_batch_size() {
        let buffer = StatsBuffer::new(3, Duration::from_secs(3600));
        assert!(buffer.log(observation("orders")).is_none());
        assert!(buffer.log(observation("orders")).is_none());
        let batch = buffer.log(observation("orders")).expect("size flush");
        assert_eq!(batch.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn flush_triggers_on_elapsed_interval() {
        let buffer = StatsBuffer::new(1000, Duration::ZERO);
        // Interval already elapsed, so the first append flushes immediately.
        let batch = buffer.log(observation("orders")).expect("time flush");
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn hard_cap_forces_flush_and_keeps_new_observation() {
        let buffer = StatsBuffer::new(usize::MAX, Duration::from_secs(3600));
        for _ in 0..MAX_BUFFER {
            let _ = buffer.log(observation("orders"));
        }
        assert_eq!(buffer.len(), MAX_BUFFER);
        let batch = buffer.log(observation("orders")).expect("cap flush");
        assert_eq!(batch.len(), MAX_BUFFER);
        // The triggering observation survives in the fresh buffer.
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn drain_empties_buffer() {
        let buffer = StatsBuffer::new(1000, Duration::from_secs(3600));
        let _ = buffer.log(observation("a"));
        let _ = buffer.log(observation("b"));
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }
}
