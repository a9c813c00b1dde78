use crate::config::AutoIndexerCfg;
use crate::models::{AccessMethod, IndexSpec, IndexStrategy, PatternShape, PlanSummary, SizeClass};
use snafu::{ResultExt, Snafu};
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Snafu)]
pub enum IndexSqlError {
    #[snafu(display("Failed to parse index SQL: {}", source))]
    Parse {
        source: sqlparser::parser::ParserError,
    },

    #[snafu(display("Not a CREATE INDEX statement"))]
    NotCreateIndex,
}

type Result<T, E = IndexSqlError> = std::result::Result<T, E>;

/// Estimated post-index cost divisors when the current plan seq-scans.
const BTREE_COST_DIVISOR: f64 = 20.0;
const HASH_COST_DIVISOR: f64 = 50.0;
const GIN_COST_DIVISOR: f64 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct MethodScore {
    pub method: AccessMethod,
    pub estimated_cost: f64,
    pub confidence: f64,
}

/// Whether an access method can index the given column type at all.
pub fn method_suits_type(method: AccessMethod, field_type: &str) -> bool {
    let lowered = field_type.to_lowercase();
    let is_container = lowered.contains("array")
        || lowered.starts_with('_')
        || lowered.contains("json")
        || lowered.contains("tsvector");
    match method {
        AccessMethod::Hash => !is_container,
        AccessMethod::Gin => is_container || lowered.contains("text"),
        AccessMethod::Btree => true,
        AccessMethod::Gist => {
            lowered.contains("point") || lowered.contains("geometry") || lowered.contains("range")
        }
    }
}

/// Score one candidate method against the sample plan.
pub fn score_method(method: AccessMethod, plan: &PlanSummary) -> Option<MethodScore> {
    let (divisor, seq_confidence, idle_confidence) = match method {
        AccessMethod::Btree => (BTREE_COST_DIVISOR, 0.8, 0.5),
        AccessMethod::Hash => (HASH_COST_DIVISOR, 0.7, 0.3),
        AccessMethod::Gin => (GIN_COST_DIVISOR, 0.9, 0.5),
        AccessMethod::Gist => return None,
    };
    let (estimated_cost, confidence) = if plan.has_seq_scan {
        (plan.total_cost / divisor, seq_confidence)
    } else {
        (plan.total_cost, idle_confidence)
    };
    Some(MethodScore {
        method,
        estimated_cost,
        confidence,
    })
}

/// Pick an access method. EXPLAIN-driven scoring when a plan is available and
/// enabled; otherwise type/pattern heuristics.
pub fn select_access_method(
    cfg: &AutoIndexerCfg,
    field_type: &str,
    shape: &PatternShape,
    plan: Option<&PlanSummary>,
) -> (AccessMethod, f64, &'static str) {
    if cfg.use_explain_for_index_type {
        if let Some(plan) = plan {
            let mut best: Option<MethodScore> = None;
            for method in [AccessMethod::Btree, AccessMethod::Hash, AccessMethod::Gin] {
                if !method_suits_type(method, field_type) {
                    continue;
                }
                if let Some(score) = score_method(method, plan) {
                    let better = match &best {
                        Some(current) => score.estimated_cost < current.estimated_cost,
                        None => true,
                    };
                    if better {
                        best = Some(score);
                    }
                }
            }
            if let Some(best) = best {
                return (best.method, best.confidence, "explain_analysis");
            }
        }
    }

    select_by_heuristics(field_type, shape)
}

/// Heuristic fallback when no plan is available.
pub fn select_by_heuristics(
    field_type: &str,
    shape: &PatternShape,
) -> (AccessMethod, f64, &'static str) {
    let lowered = field_type.to_lowercase();
    if lowered.contains("array") || lowered.starts_with('_') || lowered.contains("jsonb") {
        return (AccessMethod::Gin, 0.9, "field_type_heuristic");
    }
    if shape.has_exact && !shape.has_like && !shape.has_range {
        let simple_scalar = ["int4", "int8", "integer", "bigint", "numeric", "text", "varchar"]
            .iter()
            .any(|t| lowered.contains(t));
        if simple_scalar {
            return (AccessMethod::Hash, 0.6, "equality_only_heuristic");
        }
    }
    (AccessMethod::Btree, 0.7, "default_heuristic")
}

/// Pick the index shape from pattern and size signals. LIKE traffic gets a
/// lower() expression index, NULL-heavy columns a partial one; both only on
/// tables small enough that a narrow index is the win.
pub fn choose_strategy(
    shape: &PatternShape,
    size_class: SizeClass,
    has_tenant: bool,
) -> IndexStrategy {
    let small_or_medium = matches!(size_class, SizeClass::Small | SizeClass::Medium);
    if shape.has_like && small_or_medium {
        IndexStrategy::Expression
    } else if shape.null_ratio > 0.5 && small_or_medium {
        IndexStrategy::Partial
    } else if has_tenant {
        IndexStrategy::MultiColumn
    } else {
        IndexStrategy::Standard
    }
}

/// Name scheme: `idx_<table>_<field>[_<type>][_partial|_lower][_tenant][_fk]`.
pub fn index_name(
    table: &str,
    field: &str,
    method: AccessMethod,
    strategy: IndexStrategy,
    has_tenant: bool,
    is_foreign_key: bool,
) -> String {
    let mut name = format!("idx_{table}_{field}");
    if method != AccessMethod::Btree {
        name.push('_');
        name.push_str(method.as_str());
    }
    match strategy {
        IndexStrategy::Partial => name.push_str("_partial"),
        IndexStrategy::Expression => name.push_str("_lower"),
        _ => {}
    }
    if has_tenant {
        name.push_str("_tenant");
    }
    if is_foreign_key {
        name.push_str("_fk");
    }
    name
}

/// Build the full index candidate: name plus concurrent DDL.
pub fn build_spec(
    table: &str,
    field: &str,
    method: AccessMethod,
    strategy: IndexStrategy,
    has_tenant: bool,
    is_foreign_key: bool,
) -> IndexSpec {
    let name = index_name(table, field, method, strategy, has_tenant, is_foreign_key);

    let column_list = |column: String| -> String {
        if has_tenant {
            format!("tenant_id, {column}")
        } else {
            column
        }
    };

    let sql = match strategy {
        IndexStrategy::Expression => format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"{name}\" ON \"{table}\" ({})",
            column_list(format!("LOWER(\"{field}\")"))
        ),
        IndexStrategy::Partial => format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"{name}\" ON \"{table}\" USING {} ({}) WHERE \"{field}\" IS NOT NULL",
            method.as_str(),
            column_list(format!("\"{field}\""))
        ),
        IndexStrategy::Standard | IndexStrategy::MultiColumn => format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"{name}\" ON \"{table}\" USING {} ({})",
            method.as_str(),
            column_list(format!("\"{field}\""))
        ),
    };

    IndexSpec {
        table: table.to_string(),
        field: field.to_string(),
        method,
        strategy,
        has_tenant,
        is_foreign_key,
        name,
        sql,
    }
}

/// Parsed shape of a CREATE INDEX statement, for sanity checks and
/// round-trip tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedIndex {
    pub name: Option<String>,
    pub table: String,
    pub method: Option<String>,
    pub columns: Vec<String>,
    pub predicate: Option<String>,
    pub concurrent: bool,
}

/// Re-parse generated DDL. The applier runs this before issuing any create;
/// a statement that does not parse never reaches the database.
pub fn parse_index_sql(sql: &str) -> Result<ParsedIndex> {
    let dialect = PostgreSqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql).context(ParseSnafu)?;
    let statement = statements.pop().ok_or(IndexSqlError::NotCreateIndex)?;

    match statement {
        Statement::CreateIndex {
            name,
            table_name,
            using,
            columns,
            concurrently,
            predicate,
            ..
        } => Ok(ParsedIndex {
            name: name.map(|n| strip_quotes(&n.to_string())),
            table: strip_quotes(&table_name.to_string()),
            method: using.map(|u| u.to_string().to_lowercase()),
            columns: columns
                .iter()
                .map(|c| strip_quotes(&c.expr.to_string()))
                .collect(),
            predicate: predicate.map(|p| strip_quotes(&p.to_string())),
            concurrent: concurrently,
        }),
        _ => Err(IndexSqlError::NotCreateIndex),
    }
}

fn strip_quotes(value: &str) -> String {
    value.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn shape(exact: bool, like: bool, range: bool, null_ratio: f64) -> PatternShape {
        PatternShape {
            has_exact: exact,
            has_like: like,
            has_range: range,
            null_ratio,
            field_type: "text".into(),
            ..Default::default()
        }
    }

    #[test]
    fn array_types_always_pick_gin() {
        let cfg = AutoIndexerCfg::default();
        // Even with no plan, array/jsonb columns select GIN.
        let (method, confidence, reason) =
            select_access_method(&cfg, "_int4", &shape(true, false, false, 0.0), None);
        assert_eq!(method, AccessMethod::Gin);
        assert!((confidence - 0.9).abs() < 1e-9);
        assert_eq!(reason, "field_type_heuristic");

        let (method, _, _) =
            select_access_method(&cfg, "jsonb", &shape(false, false, true, 0.0), None);
        assert_eq!(method, AccessMethod::Gin);
    }

    #[test]
    fn pure_equality_on_scalar_picks_hash_without_plan() {
        let cfg = AutoIndexerCfg::default();
        let (method, confidence, reason) =
            select_access_method(&cfg, "int8", &shape(true, false, false, 0.0), None);
        assert_eq!(method, AccessMethod::Hash);
        assert!((confidence - 0.6).abs() < 1e-9);
        assert_eq!(reason, "equality_only_heuristic");
    }

    #[test]
    fn mixed_patterns_default_to_btree() {
        let cfg = AutoIndexerCfg::default();
        let (method, _, reason) =
            select_access_method(&cfg, "int8", &shape(true, false, true, 0.0), None);
        assert_eq!(method, AccessMethod::Btree);
        assert_eq!(reason, "default_heuristic");
    }

    #[test]
    fn explain_scoring_picks_lowest_estimated_cost() {
        let cfg = AutoIndexerCfg::default();
        let plan = PlanSummary {
            total_cost: 1000.0,
            has_seq_scan: true,
            ..Default::default()
        };
        // int8 is hash-eligible and hash has the largest divisor.
        let (method, _, reason) =
            select_access_method(&cfg, "int8", &shape(true, false, false, 0.0), Some(&plan));
        assert_eq!(method, AccessMethod::Hash);
        assert_eq!(reason, "explain_analysis");
    }

    #[test]
    fn hash_is_never_offered_for_containers() {
        assert!(!method_suits_type(AccessMethod::Hash, "jsonb"));
        assert!(!method_suits_type(AccessMethod::Hash, "_text"));
        assert!(!method_suits_type(AccessMethod::Hash, "tsvector"));
        assert!(method_suits_type(AccessMethod::Hash, "int8"));
    }

    #[rstest]
    #[case(SizeClass::Small, true)]
    #[case(SizeClass::Medium, true)]
    #[case(SizeClass::Large, false)]
    fn null_heavy_small_tables_get_partial(#[case] class: SizeClass, #[case] partial: bool) {
        let strategy = choose_strategy(&shape(true, false, false, 0.8), class, false);
        if partial {
            assert_eq!(strategy, IndexStrategy::Partial);
        } else {
            assert_eq!(strategy, IndexStrategy::Standard);
        }
    }

    #[test]
    fn like_traffic_gets_expression_before_partial() {
        let strategy = choose_strategy(&shape(true, true, false, 0.8), SizeClass::Small, false);
        assert_eq!(strategy, IndexStrategy::Expression);
    }

    #[test]
    fn tenant_tables_get_multi_column() {
        let strategy = choose_strategy(&shape(true, false, false, 0.0), SizeClass::Large, true);
        assert_eq!(strategy, IndexStrategy::MultiColumn);
    }

    #[rstest]
    #[case(AccessMethod::Btree, IndexStrategy::Standard, false, false, "idx_orders_status")]
    #[case(AccessMethod::Hash, IndexStrategy::Standard, false, false, "idx_orders_status_hash")]
    #[case(AccessMethod::Btree, IndexStrategy::Partial, true, false, "idx_orders_status_partial_tenant")]
    #[case(AccessMethod::Btree, IndexStrategy::Expression, false, false, "idx_orders_status_lower")]
    #[case(AccessMethod::Btree, IndexStrategy::MultiColumn, true, true, "idx_orders_status_tenant_fk")]
    fn name_scheme_is_exact(
        #[case] method: AccessMethod,
        #[case] strategy: IndexStrategy,
        #[case] tenant: bool,
        #[case] fk: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(
            index_name("orders", "status", method, strategy, tenant, fk),
            expected
        );
    }

    #[test]
    fn generated_sql_parses_and_round_trips() {
        let spec = build_spec(
            "orders",
            "status",
            AccessMethod::Btree,
            IndexStrategy::MultiColumn,
            true,
            false,
        );
        let parsed = parse_index_sql(&spec.sql).unwrap();
        assert_eq!(parsed.name.as_deref(), Some(spec.name.as_str()));
        assert_eq!(parsed.table, "orders");
        assert_eq!(parsed.method.as_deref(), Some("btree"));
        assert_eq!(parsed.columns, vec!["tenant_id", "status"]);
        assert!(parsed.predicate.is_none());
        assert!(parsed.concurrent);
    }

    #[test]
    fn partial_sql_round_trips_predicate() {
        let spec = build_spec(
            "profiles",
            "deleted_at",
            AccessMethod::Btree,
            IndexStrategy::Partial,
            false,
            false,
        );
        let parsed = parse_index_sql(&spec.sql).unwrap();
        assert_eq!(parsed.columns, vec!["deleted_at"]);
        assert_eq!(parsed.predicate.as_deref(), Some("deleted_at IS NOT NULL"));
    }

    #[test]
    fn expression_sql_round_trips_lowered_column() {
        let spec = build_spec(
            "users",
            "email",
            AccessMethod::Btree,
            IndexStrategy::Expression,
            true,
            false,
        );
        let parsed = parse_index_sql(&spec.sql).unwrap();
        assert_eq!(parsed.columns, vec!["tenant_id", "LOWER(email)"]);
    }

    #[test]
    fn non_index_sql_is_rejected() {
        assert!(parse_index_sql("SELECT 1").is_err());
        assert!(parse_index_sql("CREATE INDEX oops ON").is_err());
    }
}
