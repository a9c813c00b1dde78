use crate::config::ForeignKeyCfg;
use crate::models::{FieldUsage, QueryKind};
use snafu::{ResultExt, Snafu};
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Snafu)]
pub enum FkError {
    #[snafu(display("Failed to read foreign keys: {}", source))]
    ReadConstraints { source: sqlx::Error },

    #[snafu(display("Failed to read index catalog: {}", source))]
    ReadIndexes { source: sqlx::Error },
}

type Result<T, E = FkError> = std::result::Result<T, E>;

/// A foreign-key column with no index backing the referencing side.
#[derive(Debug, Clone)]
pub struct ForeignKeyGap {
    pub table: String,
    pub column: String,
    pub constraint: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Column lists of every index, keyed by table, in index-column order.
pub type IndexCatalog = HashMap<String, Vec<Vec<String>>>;

/// An FK column counts as covered when some index leads with it, or puts it
/// directly behind a leading tenant column.
pub fn is_covered(catalog: &IndexCatalog, table: &str, column: &str) -> bool {
    let Some(indexes) = catalog.get(table) else {
        return false;
    };
    indexes.iter().any(|columns| {
        match columns.as_slice() {
            [first, ..] if first.eq_ignore_ascii_case(column) => true,
            [first, second, ..] => {
                first.eq_ignore_ascii_case("tenant_id") && second.eq_ignore_ascii_case(column)
            }
            _ => false,
        }
    })
}

async fn fetch_index_catalog(pool: &Pool<Postgres>) -> Result<IndexCatalog> {
    const QUERY: &str = r#"
        SELECT
            c.relname AS table_name,
            array_agg(a.attname ORDER BY arr.ord) AS columns
        FROM pg_index i
        JOIN pg_class c ON c.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS arr(attnum, ord)
            ON arr.attnum > 0
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = arr.attnum
        WHERE n.nspname = 'public'
        GROUP BY c.relname, i.indexrelid
    "#;

    let rows = sqlx::query(QUERY)
        .fetch_all(pool)
        .await
        .context(ReadIndexesSnafu)?;

    let mut catalog: IndexCatalog = HashMap::new();
    for row in rows {
        let table: String = row.get("table_name");
        let columns: Vec<String> = row.get("columns");
        catalog.entry(table).or_default().push(columns);
    }
    Ok(catalog)
}

/// Scan the schema for foreign keys whose referencing column has no backing
/// index.
pub async fn find_unindexed_foreign_keys(pool: &Pool<Postgres>) -> Result<Vec<ForeignKeyGap>> {
    const QUERY: &str = r#"
        SELECT DISTINCT
            tc.table_name::text AS table_name,
            kcu.column_name::text AS column_name,
            tc.constraint_name::text AS constraint_name,
            ccu.table_name::text AS referenced_table,
            ccu.column_name::text AS referenced_column
        FROM information_schema.table_constraints AS tc
        JOIN information_schema.key_column_usage AS kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage AS ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND tc.table_schema = 'public'
        ORDER BY tc.table_name, kcu.column_name
    "#;

    let rows = sqlx::query(QUERY)
        .fetch_all(pool)
        .await
        .context(ReadConstraintsSnafu)?;
    let catalog = fetch_index_catalog(pool).await?;

    let mut gaps = Vec::new();
    for row in rows {
        let table: String = row.get("table_name");
        let column: String = row.get("column_name");
        if is_covered(&catalog, &table, &column) {
            continue;
        }
        gaps.push(ForeignKeyGap {
            table,
            column,
            constraint: row.get("constraint_name"),
            referenced_table: row.get("referenced_table"),
            referenced_column: row.get("referenced_column"),
        });
    }

    if !gaps.is_empty() {
        info!(count = gaps.len(), "found foreign keys without indexes");
    }
    Ok(gaps)
}

/// Turn a gap into a synthetic usage record so the decision pass treats the
/// FK as if it carried moderate query volume.
pub fn synthetic_usage(gap: &ForeignKeyGap, cfg: &ForeignKeyCfg) -> FieldUsage {
    let mut usage = FieldUsage {
        table: gap.table.clone(),
        field: gap.column.clone(),
        total_queries: cfg.synthetic_query_weight,
        distinct_tenants: 0,
        avg_duration_ms: cfg.synthetic_avg_duration_ms,
        p95_ms: cfg.synthetic_avg_duration_ms * 2.0,
        p99_ms: cfg.synthetic_avg_duration_ms * 4.0,
        ..Default::default()
    };
    usage
        .by_kind
        .insert(QueryKind::Select, cfg.synthetic_query_weight);
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(table: &str, indexes: &[&[&str]]) -> IndexCatalog {
        let mut catalog = IndexCatalog::new();
        catalog.insert(
            table.to_string(),
            indexes
                .iter()
                .map(|cols| cols.iter().map(|c| c.to_string()).collect())
                .collect(),
        );
        catalog
    }

    #[test]
    fn leading_column_counts_as_covered() {
        let catalog = catalog_with("posts", &[&["author_id", "created_at"]]);
        assert!(is_covered(&catalog, "posts", "author_id"));
    }

    #[test]
    fn tenant_prefixed_column_counts_as_covered() {
        let catalog = catalog_with("posts", &[&["tenant_id", "author_id"]]);
        assert!(is_covered(&catalog, "posts", "author_id"));
    }

    #[test]
    fn trailing_column_is_not_covered() {
        let catalog = catalog_with("posts", &[&["created_at", "author_id"]]);
        assert!(!is_covered(&catalog, "posts", "author_id"));
    }

    #[test]
    fn unknown_table_is_not_covered() {
        let catalog = IndexCatalog::new();
        assert!(!is_covered(&catalog, "posts", "author_id"));
    }

    #[test]
    fn synthetic_usage_carries_configured_weight() {
        let gap = ForeignKeyGap {
            table: "posts".into(),
            column: "author_id".into(),
            constraint: "posts_author_id_fkey".into(),
            referenced_table: "users".into(),
            referenced_column: "id".into(),
        };
        let usage = synthetic_usage(&gap, &ForeignKeyCfg::default());
        assert_eq!(usage.total_queries, 1000);
        assert_eq!(usage.read_queries(), 1000);
        assert!((usage.avg_duration_ms - 50.0).abs() < 1e-9);
    }
}
