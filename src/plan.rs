use crate::models::{PlanComparison, PlanSummary, QueryTiming};
use serde_json::Value;
use sqlx::{Pool, Postgres, Row};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Improvement (%) above which a before/after comparison is significant.
const SIGNIFICANT_IMPROVEMENT_PCT: f64 = 20.0;

/// Cheap plan analysis: `EXPLAIN` without execution.
pub async fn explain_fast(pool: &Pool<Postgres>, query: &str) -> Option<PlanSummary> {
    run_explain(pool, &format!("EXPLAIN (FORMAT JSON) {query}")).await
}

/// Full plan analysis: executes the query, returns actual timings.
pub async fn explain_analyze(pool: &Pool<Postgres>, query: &str) -> Option<PlanSummary> {
    run_explain(pool, &format!("EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) {query}")).await
}

async fn run_explain(pool: &Pool<Postgres>, explain_sql: &str) -> Option<PlanSummary> {
    let row = match sqlx::query(explain_sql).fetch_one(pool).await {
        Ok(row) => row,
        Err(err) => {
            debug!("EXPLAIN failed: {err}");
            return None;
        }
    };
    let value: Value = row.try_get(0).ok()?;
    parse_plan(&value)
}

/// Walk the JSON document returned by `EXPLAIN (FORMAT JSON)` into a
/// normalized summary. Returns None on any unexpected shape.
pub fn parse_plan(value: &Value) -> Option<PlanSummary> {
    let root = value.as_array()?.first()?;
    let plan = root.get("Plan")?;

    Some(PlanSummary {
        total_cost: plan.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0),
        actual_time_ms: root
            .get("Execution Time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        node_type: plan
            .get("Node Type")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        has_seq_scan: has_seq_scan(plan),
        has_index_scan: has_index_scan(plan),
        planning_time_ms: root
            .get("Planning Time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    })
}

fn has_seq_scan(node: &Value) -> bool {
    if node.get("Node Type").and_then(Value::as_str) == Some("Seq Scan") {
        return true;
    }
    children(node).iter().any(|child| has_seq_scan(child))
}

fn has_index_scan(node: &Value) -> bool {
    if let Some(node_type) = node.get("Node Type").and_then(Value::as_str) {
        if node_type.contains("Index") || node_type == "Bitmap Heap Scan" {
            return true;
        }
    }
    children(node).iter().any(|child| has_index_scan(child))
}

fn children(node: &Value) -> Vec<&Value> {
    node.get("Plans")
        .and_then(Value::as_array)
        .map(|plans| plans.iter().collect())
        .unwrap_or_default()
}

/// Execute a query `runs` times after one warm-up and summarize wall-clock
/// timings. Returns None when even the warm-up fails.
pub async fn measure(pool: &Pool<Postgres>, query: &str, runs: u32) -> Option<QueryTiming> {
    if let Err(err) = sqlx::query(query).fetch_all(pool).await {
        debug!("measurement warm-up failed: {err}");
        return None;
    }

    let mut times = Vec::with_capacity(runs as usize);
    for _ in 0..runs.max(1) {
        let start = Instant::now();
        if let Err(err) = sqlx::query(query).fetch_all(pool).await {
            debug!("measurement run failed: {err}");
            return None;
        }
        times.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    Some(summarize_timings(&times))
}

/// Median/avg/min/max/p95 over a set of millisecond timings.
pub fn summarize_timings(times: &[f64]) -> QueryTiming {
    if times.is_empty() {
        return QueryTiming::default();
    }
    let mut sorted = times.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p95_idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
    QueryTiming {
        median_ms: sorted[sorted.len() / 2],
        avg_ms: times.iter().sum::<f64>() / times.len() as f64,
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        p95_ms: sorted[p95_idx],
    }
}

/// Compare plans captured before and after an index landed.
pub fn compare_before_after(before: &PlanSummary, after: &PlanSummary) -> PlanComparison {
    let cost_reduction_pct = if before.total_cost > 0.0 {
        (before.total_cost - after.total_cost) / before.total_cost * 100.0
    } else {
        0.0
    };
    let time_reduction_pct = if before.actual_time_ms > 0.0 {
        (before.actual_time_ms - after.actual_time_ms) / before.actual_time_ms * 100.0
    } else {
        0.0
    };

    PlanComparison {
        cost_reduction_pct,
        time_reduction_pct,
        seq_scan_eliminated: before.has_seq_scan && !after.has_seq_scan,
        index_scan_introduced: !before.has_index_scan && after.has_index_scan,
        significant: cost_reduction_pct.max(time_reduction_pct) > SIGNIFICANT_IMPROVEMENT_PCT,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainUsageStats {
    pub total_decisions: u64,
    pub explain_used: u64,
    pub explain_successful: u64,
    pub fallback_to_estimate: u64,
    pub coverage_pct: f64,
    pub success_rate_pct: f64,
}

/// Observability counters on how often decisions used real plans versus the
/// row-count fallback. Increment-only; atomics, no lock.
#[derive(Debug, Default)]
pub struct ExplainUsage {
    total_decisions: AtomicU64,
    explain_used: AtomicU64,
    explain_successful: AtomicU64,
    fallback_to_estimate: AtomicU64,
}

impl ExplainUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, used: bool, successful: bool) {
        self.total_decisions.fetch_add(1, Ordering::Relaxed);
        if used {
            self.explain_used.fetch_add(1, Ordering::Relaxed);
            if successful {
                self.explain_successful.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.fallback_to_estimate.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> ExplainUsageStats {
        let total = self.total_decisions.load(Ordering::Relaxed);
        let used = self.explain_used.load(Ordering::Relaxed);
        let successful = self.explain_successful.load(Ordering::Relaxed);
        let fallback = self.fallback_to_estimate.load(Ordering::Relaxed);

        ExplainUsageStats {
            total_decisions: total,
            explain_used: used,
            explain_successful: successful,
            fallback_to_estimate: fallback,
            coverage_pct: if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            success_rate_pct: if used > 0 {
                successful as f64 / used as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Warn once enough decisions accumulated and coverage sits below the
    /// configured minimum.
    pub fn log_coverage_warning(&self, min_coverage_pct: f64) {
        let stats = self.stats();
        if stats.total_decisions >= 10 && stats.coverage_pct < min_coverage_pct {
            warn!(
                coverage = format!("{:.1}%", stats.coverage_pct),
                required = format!("{min_coverage_pct:.1}%"),
                "EXPLAIN coverage below minimum threshold"
            );
        }
    }
}
