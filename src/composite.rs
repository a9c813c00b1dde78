use crate::advisors::cortex::{self, ColumnPair};
use crate::audit::AuditLog;
use crate::config::{CompositeCfg, CortexCfg};
use crate::plan;
use crate::probes::{self, TenantCache};
use itertools::Itertools;
use serde_json::json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

/// A verified composite-index opportunity on one table.
#[derive(Debug, Clone)]
pub struct CompositeCandidate {
    pub table: String,
    pub first_field: String,
    pub second_field: String,
    pub co_usage_count: i64,
    pub current_cost: f64,
    pub correlation: f64,
    pub priority: f64,
    pub has_tenant: bool,
    pub index_name: String,
    pub index_sql: String,
}

pub fn composite_name(table: &str, first: &str, second: &str, has_tenant: bool) -> String {
    let mut name = format!("idx_{table}_{first}_{second}");
    if has_tenant {
        name.push_str("_tenant");
    }
    name
}

pub fn composite_sql(table: &str, first: &str, second: &str, has_tenant: bool) -> String {
    let name = composite_name(table, first, second, has_tenant);
    let columns = if has_tenant {
        format!("tenant_id, \"{first}\", \"{second}\"")
    } else {
        format!("\"{first}\", \"{second}\"")
    };
    format!(
        "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"{name}\" ON \"{table}\" USING btree ({columns})"
    )
}

/// AND-of-equalities probe over one sampled row; the planner's answer tells
/// us whether a composite index would change the plan.
pub fn probe_query(
    table: &str,
    first: &str,
    second: &str,
    first_value: &str,
    second_value: &str,
    tenant_id: Option<i64>,
) -> String {
    let mut conditions = Vec::new();
    if let Some(tenant) = tenant_id {
        conditions.push(format!("tenant_id = {tenant}"));
    }
    conditions.push(format!(
        "\"{first}\" = {}",
        probes::quote_literal(first_value)
    ));
    conditions.push(format!(
        "\"{second}\" = {}",
        probes::quote_literal(second_value)
    ));
    format!(
        "SELECT * FROM \"{table}\" WHERE {} LIMIT 1",
        conditions.join(" AND ")
    )
}

async fn top_fields(
    pool: &Pool<Postgres>,
    cfg: &CompositeCfg,
    table: &str,
) -> Vec<(String, i64)> {
    const QUERY: &str = r#"
        SELECT field_name, COUNT(*) AS query_count
        FROM query_stats
        WHERE table_name = $1
          AND field_name IS NOT NULL
          AND created_at >= NOW() - make_interval(hours => $2)
        GROUP BY field_name
        HAVING COUNT(*) >= $3
        ORDER BY query_count DESC
        LIMIT $4
    "#;
    match sqlx::query(QUERY)
        .bind(table)
        .bind(cfg.time_window_hours as i32)
        .bind(cfg.min_query_count)
        .bind(cfg.max_fields as i64)
        .fetch_all(pool)
        .await
    {
        Ok(rows) => rows
            .iter()
            .map(|row| (row.get("field_name"), row.get("query_count")))
            .collect(),
        Err(err) => {
            debug!(table, "could not fetch top fields: {err}");
            Vec::new()
        }
    }
}

async fn sample_pair_values(
    pool: &Pool<Postgres>,
    table: &str,
    first: &str,
    second: &str,
    has_tenant: bool,
) -> Option<(String, String, Option<i64>)> {
    let tenant_column = if has_tenant { "tenant_id::bigint AS tenant_id, " } else { "" };
    let sql = format!(
        "SELECT {tenant_column}\"{first}\"::text AS v1, \"{second}\"::text AS v2 \
         FROM \"{table}\" WHERE \"{first}\" IS NOT NULL AND \"{second}\" IS NOT NULL LIMIT 1"
    );
    let row = sqlx::query(&sql).fetch_optional(pool).await.ok().flatten()?;
    let v1: String = row.try_get("v1").ok()?;
    let v2: String = row.try_get("v2").ok()?;
    let tenant: Option<i64> = if has_tenant {
        row.try_get("tenant_id").ok()
    } else {
        None
    };
    Some((v1, v2, tenant))
}

/// Pair co-usage scan with EXPLAIN verification, enhanced by Cortex
/// correlation signals. Returns candidates in priority order.
pub async fn detect_opportunities(
    pool: &Pool<Postgres>,
    cfg: &CompositeCfg,
    cortex_cfg: &CortexCfg,
    tenant_cache: &TenantCache,
    audit: &AuditLog,
    table: &str,
) -> Vec<CompositeCandidate> {
    if !cfg.enabled {
        return Vec::new();
    }

    let fields = top_fields(pool, cfg, table).await;
    if fields.len() < 2 {
        return Vec::new();
    }
    let has_tenant = tenant_cache.has_tenant_field(pool, table).await;

    let mut candidates = Vec::new();
    for (first, second) in fields.iter().tuple_combinations() {
        let (first_field, first_count) = first;
        let (second_field, second_count) = second;

        let Some((v1, v2, tenant)) =
            sample_pair_values(pool, table, first_field, second_field, has_tenant).await
        else {
            continue;
        };
        let query = probe_query(table, first_field, second_field, &v1, &v2, tenant);
        let Some(plan) = plan::explain_fast(pool, &query).await else {
            continue;
        };
        if !plan.has_seq_scan || plan.total_cost <= cfg.high_cost_threshold {
            continue;
        }

        let corr_first = probes::column_correlation(pool, table, first_field)
            .await
            .unwrap_or(0.0);
        let corr_second = probes::column_correlation(pool, table, second_field)
            .await
            .unwrap_or(0.0);
        let correlation = (corr_first.abs() + corr_second.abs()) / 2.0;
        let co_usage = first_count.min(second_count);

        let pair = ColumnPair {
            first: first_field.clone(),
            second: second_field.clone(),
            co_usage_count: *co_usage,
            correlation,
        };
        let cortex_verdict = cortex::evaluate_pair(cortex_cfg, &pair, cfg.min_query_count);
        audit
            .track_algorithm_usage(
                table,
                None,
                cortex_verdict.algorithm.as_str(),
                &json!({
                    "pair": [first_field, second_field],
                    "correlation": correlation,
                    "score": cortex_verdict.score,
                }),
                cortex_verdict.should_use,
            )
            .await;

        // Query volume sets the base priority, correlation boosts it.
        let priority = *co_usage as f64 + cortex_verdict.score * 1000.0;

        candidates.push(CompositeCandidate {
            table: table.to_string(),
            first_field: first_field.clone(),
            second_field: second_field.clone(),
            co_usage_count: *co_usage,
            current_cost: plan.total_cost,
            correlation,
            priority,
            has_tenant,
            index_name: composite_name(table, first_field, second_field, has_tenant),
            index_sql: composite_sql(table, first_field, second_field, has_tenant),
        });
    }

    cortex::prioritize(candidates, |candidate| candidate.priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_query_inlines_sampled_literals() {
        let query = probe_query("orders", "status", "region", "open", "eu-west", Some(7));
        assert_eq!(
            query,
            "SELECT * FROM \"orders\" WHERE tenant_id = 7 AND \"status\" = 'open' \
             AND \"region\" = 'eu-west' LIMIT 1"
        );
    }

    #[test]
    fn probe_query_escapes_quotes_in_values() {
        let query = probe_query("users", "name", "city", "O'Neil", "it's", None);
        assert!(query.contains("'O''Neil'"));
        assert!(query.contains("'it''s'"));
    }

    #[test]
    fn composite_sql_orders_tenant_first() {
        let sql = composite_sql("orders", "status", "region", true);
        assert!(sql.contains("(tenant_id, \"status\", \"region\")"));
        assert!(sql.starts_with("CREATE INDEX CONCURRENTLY IF NOT EXISTS"));
        assert!(sql.contains("\"idx_orders_status_region_tenant\""));
    }

    #[test]
    fn composite_name_without_tenant() {
        assert_eq!(
            composite_name("orders", "status", "region", false),
            "idx_orders_status_region"
        );
    }
}
