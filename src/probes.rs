use crate::models::{DistributionKind, FieldDistribution, StringStats};
use sqlx::{query_scalar, Pool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Relative error (%) above which planner statistics are reported stale.
const STALE_STATS_ERROR_PCT: f64 = 50.0;
/// Relative error (%) above which the catalog-derived selectivity replaces
/// the scanned estimate.
const REPLACE_ESTIMATE_ERROR_PCT: f64 = 20.0;

/// Selectivity = distinct values / total rows. Returns 0.0 on failure or an
/// empty table; probe errors never abort a decision pass.
///
/// When `validate_with_cert` is set, the estimate is cross-checked against
/// `pg_stats.n_distinct`; a large disagreement logs a stale-statistics
/// warning and the catalog-derived value wins.
pub async fn field_selectivity(
    pool: &Pool<Postgres>,
    table: &str,
    field: &str,
    validate_with_cert: bool,
) -> f64 {
    let sql = format!(
        "SELECT COUNT(DISTINCT \"{field}\") AS distinct_count, COUNT(*) AS total_rows FROM \"{table}\""
    );
    let row = match sqlx::query(&sql).fetch_one(pool).await {
        Ok(row) => row,
        Err(err) => {
            debug!(table, field, "could not calculate selectivity: {err}");
            return 0.0;
        }
    };

    let distinct: i64 = row.try_get("distinct_count").unwrap_or(0);
    let total: i64 = row.try_get("total_rows").unwrap_or(0);
    if total <= 0 {
        return 0.0;
    }
    let estimated = distinct as f64 / total as f64;

    if validate_with_cert {
        if let Some(actual) = catalog_selectivity(pool, table, field, total).await {
            let error_pct = if actual > 0.0 {
                ((estimated - actual).abs() / actual) * 100.0
            } else {
                0.0
            };
            if error_pct > STALE_STATS_ERROR_PCT {
                warn!(
                    table,
                    field,
                    error_pct = format!("{error_pct:.1}"),
                    "stale planner statistics detected"
                );
            }
            if error_pct > REPLACE_ESTIMATE_ERROR_PCT {
                debug!(
                    table,
                    field, estimated, actual, "using catalog selectivity over scanned estimate"
                );
                return actual;
            }
        }
    }

    estimated
}

/// Selectivity as the planner sees it, from `pg_stats.n_distinct`
/// (negative values encode a fraction of rows).
async fn catalog_selectivity(
    pool: &Pool<Postgres>,
    table: &str,
    field: &str,
    total_rows: i64,
) -> Option<f64> {
    const QUERY: &str = r#"
        SELECT n_distinct::float8
        FROM pg_stats
        WHERE schemaname = 'public' AND tablename = $1 AND attname = $2
    "#;
    let n_distinct = query_scalar::<_, f64>(QUERY)
        .bind(table)
        .bind(field)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()?;

    if n_distinct < 0.0 {
        Some(-n_distinct)
    } else if total_rows > 0 {
        Some(n_distinct / total_rows as f64)
    } else {
        None
    }
}

/// Fraction of NULL values for a field; 0.0 on failure.
pub async fn null_ratio(pool: &Pool<Postgres>, table: &str, field: &str) -> f64 {
    let sql = format!(
        "SELECT COUNT(*) AS total, COUNT(\"{field}\") AS non_null FROM \"{table}\""
    );
    match sqlx::query(&sql).fetch_one(pool).await {
        Ok(row) => {
            let total: i64 = row.try_get("total").unwrap_or(0);
            let non_null: i64 = row.try_get("non_null").unwrap_or(0);
            if total > 0 {
                (total - non_null) as f64 / total as f64
            } else {
                0.0
            }
        }
        Err(err) => {
            debug!(table, field, "could not calculate null ratio: {err}");
            0.0
        }
    }
}

/// Cardinality ratio, average and maximum length for a string field, in a
/// single scan.
pub async fn string_stats(pool: &Pool<Postgres>, table: &str, field: &str) -> StringStats {
    let sql = format!(
        r#"
        SELECT
            (COUNT(DISTINCT "{field}")::float8 / NULLIF(COUNT("{field}"), 0)) AS cardinality_ratio,
            AVG(LENGTH("{field}"))::float8 AS avg_len,
            MAX(LENGTH("{field}")) AS max_len
        FROM "{table}"
        "#
    );
    match sqlx::query(&sql).fetch_one(pool).await {
        Ok(row) => StringStats {
            cardinality_ratio: row.try_get("cardinality_ratio").unwrap_or(0.0),
            avg_len: row.try_get("avg_len").unwrap_or(0.0),
            max_len: row.try_get::<i32, _>("max_len").map(i64::from).unwrap_or(0),
        },
        Err(err) => {
            debug!(table, field, "could not gather string stats: {err}");
            StringStats::default()
        }
    }
}

/// Distribution classification for learned-index suitability: sample the
/// first 1000 ordered non-null values and classify by distinct ratio
/// (>= 0.8 sequential, >= 0.5 semi-ordered).
pub async fn field_distribution(
    pool: &Pool<Postgres>,
    table: &str,
    field: &str,
) -> FieldDistribution {
    let counts_sql = format!(
        r#"
        SELECT
            COUNT(DISTINCT "{field}") AS distinct_count,
            COUNT(*) FILTER (WHERE "{field}" IS NULL) AS null_count,
            COUNT(*) AS total_count
        FROM "{table}"
        "#
    );
    let row = match sqlx::query(&counts_sql).fetch_one(pool).await {
        Ok(row) => row,
        Err(err) => {
            debug!(table, field, "could not read field distribution: {err}");
            return FieldDistribution::default();
        }
    };
    let distinct_count: i64 = row.try_get("distinct_count").unwrap_or(0);
    let null_count: i64 = row.try_get("null_count").unwrap_or(0);
    let total_count: i64 = row.try_get("total_count").unwrap_or(0);

    let mut distribution = FieldDistribution {
        distinct_count,
        null_count,
        distribution: DistributionKind::Unknown,
        is_ordered: false,
    };
    if total_count <= 100 {
        return distribution;
    }

    let sample_sql = format!(
        r#"
        SELECT COUNT(DISTINCT value) AS sample_distinct, COUNT(*) AS sample_count
        FROM (
            SELECT "{field}" AS value
            FROM "{table}"
            WHERE "{field}" IS NOT NULL
            ORDER BY "{field}"
            LIMIT 1000
        ) sample
        "#
    );
    if let Ok(sample) = sqlx::query(&sample_sql).fetch_one(pool).await {
        let sample_distinct: i64 = sample.try_get("sample_distinct").unwrap_or(0);
        let sample_count: i64 = sample.try_get("sample_count").unwrap_or(0);
        if sample_count > 10 {
            let ratio = sample_distinct as f64 / sample_count as f64;
            if ratio >= 0.8 {
                distribution.distribution = DistributionKind::Sequential;
                distribution.is_ordered = true;
            } else if ratio >= 0.5 {
                distribution.distribution = DistributionKind::SemiOrdered;
            } else {
                distribution.distribution = DistributionKind::Random;
            }
        }
    }

    distribution
}

/// Resolve the column's data type; prefers `udt_name` over `data_type`.
pub async fn field_type(pool: &Pool<Postgres>, table: &str, field: &str) -> Option<String> {
    const QUERY: &str = r#"
        SELECT data_type::text AS data_type, udt_name::text AS udt_name
        FROM information_schema.columns
        WHERE table_name = $1 AND column_name = $2
    "#;
    let row = sqlx::query(QUERY)
        .bind(table)
        .bind(field)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()?;
    let udt: Option<String> = row.try_get("udt_name").ok();
    let data_type: Option<String> = row.try_get("data_type").ok();
    udt.or(data_type)
}

/// Physical ordering correlation for a column, from planner statistics.
pub async fn column_correlation(pool: &Pool<Postgres>, table: &str, field: &str) -> Option<f64> {
    const QUERY: &str = r#"
        SELECT correlation::float8
        FROM pg_stats
        WHERE schemaname = 'public' AND tablename = $1 AND attname = $2
    "#;
    query_scalar::<_, f64>(QUERY)
        .bind(table)
        .bind(field)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
}

/// Per-process cache of which tables expose a tenant column.
#[derive(Default)]
pub struct TenantCache {
    cache: Mutex<HashMap<String, bool>>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_tenant_field(&self, pool: &Pool<Postgres>, table: &str) -> bool {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("tenant cache lock poisoned")
            .get(table)
        {
            return *cached;
        }

        let result = self.lookup(pool, table).await;
        self.cache
            .lock()
            .expect("tenant cache lock poisoned")
            .insert(table.to_string(), result);
        result
    }

    async fn lookup(&self, pool: &Pool<Postgres>, table: &str) -> bool {
        const CATALOG_QUERY: &str = r#"
            SELECT 1
            FROM genome_catalog
            WHERE table_name = $1
              AND (field_name = 'tenant_id' OR field_name LIKE 'tenant_%')
            LIMIT 1
        "#;
        if let Ok(found) = query_scalar::<_, i32>(CATALOG_QUERY)
            .bind(table)
            .fetch_optional(pool)
            .await
        {
            if found.is_some() {
                return true;
            }
        }

        const COLUMNS_QUERY: &str = r#"
            SELECT 1
            FROM information_schema.columns
            WHERE table_name = $1
              AND (column_name = 'tenant_id' OR column_name LIKE 'tenant_%')
            LIMIT 1
        "#;
        matches!(
            query_scalar::<_, i32>(COLUMNS_QUERY)
                .bind(table)
                .fetch_optional(pool)
                .await,
            Ok(Some(_))
        )
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .expect("tenant cache lock poisoned")
            .clear();
    }
}

/// Escape a text value for inline use in a probe query. Values come from the
/// target table itself; identifiers are validated separately.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build a representative sample query for EXPLAIN probes, using a real value
/// from the table so the planner sees realistic parameters.
pub async fn sample_query_for_field(
    pool: &Pool<Postgres>,
    tenant_cache: &TenantCache,
    table: &str,
    field: &str,
    tenant_id: Option<i64>,
) -> Option<String> {
    let has_tenant = tenant_cache.has_tenant_field(pool, table).await;

    let (sample_value, sample_tenant) = if has_tenant {
        let sql = match tenant_id {
            Some(id) => format!(
                "SELECT \"{field}\"::text AS value FROM \"{table}\" \
                 WHERE tenant_id = {id} AND \"{field}\" IS NOT NULL LIMIT 1"
            ),
            None => format!(
                "SELECT tenant_id::bigint AS tenant_id, \"{field}\"::text AS value FROM \"{table}\" \
                 WHERE \"{field}\" IS NOT NULL LIMIT 1"
            ),
        };
        match sqlx::query(&sql).fetch_optional(pool).await {
            Ok(Some(row)) => {
                let value: Option<String> = row.try_get("value").ok();
                let tenant = tenant_id.or_else(|| row.try_get("tenant_id").ok());
                (value, tenant)
            }
            Ok(None) => (None, tenant_id),
            Err(err) => {
                debug!(table, field, "could not fetch sample value: {err}");
                (None, tenant_id)
            }
        }
    } else {
        let sql = format!(
            "SELECT \"{field}\"::text AS value FROM \"{table}\" \
             WHERE \"{field}\" IS NOT NULL LIMIT 1"
        );
        match sqlx::query(&sql).fetch_optional(pool).await {
            Ok(Some(row)) => (row.try_get("value").ok(), None),
            Ok(None) => (None, None),
            Err(err) => {
                debug!(table, field, "could not fetch sample value: {err}");
                (None, None)
            }
        }
    };

    let filter = match &sample_value {
        Some(value) => format!("\"{field}\" = {}", quote_literal(value)),
        None => format!("\"{field}\" IS NOT NULL"),
    };
    let query = match (has_tenant, sample_tenant) {
        (true, Some(tenant)) => {
            format!("SELECT * FROM \"{table}\" WHERE tenant_id = {tenant} AND {filter} LIMIT 1")
        }
        (true, None) => format!(
            "SELECT * FROM \"{table}\" WHERE tenant_id IS NOT NULL AND {filter} LIMIT 1"
        ),
        (false, _) => format!("SELECT * FROM \"{table}\" WHERE {filter} LIMIT 1"),
    };
    Some(query)
}

/// True when any index on the table already covers the field, by name match
/// or by `indexdef` substring.
pub async fn index_exists_for_field(
    pool: &Pool<Postgres>,
    table: &str,
    candidate_names: &[String],
    field: &str,
) -> bool {
    const QUERY: &str = r#"
        SELECT COUNT(*)
        FROM pg_indexes
        WHERE tablename = $1
          AND (indexname = ANY($2) OR indexdef LIKE $3)
    "#;
    let pattern = format!("%{field}%");
    match query_scalar::<_, i64>(QUERY)
        .bind(table)
        .bind(candidate_names)
        .bind(&pattern)
        .fetch_one(pool)
        .await
    {
        Ok(count) => count > 0,
        Err(err) => {
            debug!(table, field, "could not check existing indexes: {err}");
            false
        }
    }
}

/// Number of indexes currently on the table.
pub async fn index_count(pool: &Pool<Postgres>, table: &str) -> i64 {
    const QUERY: &str = r#"
        SELECT COUNT(*) FROM pg_indexes WHERE schemaname = 'public' AND tablename = $1
    "#;
    query_scalar::<_, i64>(QUERY)
        .bind(table)
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("O'Neil"), "'O''Neil'");
        assert_eq!(quote_literal(""), "''");
    }
}
