use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of traced query, as recorded in `query_stats.query_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryKind {
    Read,
    Write,
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Read => "READ",
            QueryKind::Write => "WRITE",
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
        }
    }

    /// READ and SELECT count toward the read side of the workload mix.
    pub fn is_read(&self) -> bool {
        matches!(self, QueryKind::Read | QueryKind::Select)
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            QueryKind::Write | QueryKind::Insert | QueryKind::Update | QueryKind::Delete
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "READ" => Some(QueryKind::Read),
            "WRITE" => Some(QueryKind::Write),
            "SELECT" => Some(QueryKind::Select),
            "INSERT" => Some(QueryKind::Insert),
            "UPDATE" => Some(QueryKind::Update),
            "DELETE" => Some(QueryKind::Delete),
            _ => None,
        }
    }
}

/// A single traced query, buffered until the next stats flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryObservation {
    pub tenant_id: Option<i64>,
    pub table: String,
    pub field: Option<String>,
    pub kind: QueryKind,
    pub duration_ms: f64,
}

/// Aggregated usage of a (table, field) pair over a rolling window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldUsage {
    pub table: String,
    pub field: String,
    pub total_queries: i64,
    pub distinct_tenants: i64,
    pub avg_duration_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub by_kind: BTreeMap<QueryKind, i64>,
}

impl FieldUsage {
    pub fn read_queries(&self) -> i64 {
        self.by_kind
            .iter()
            .filter(|(kind, _)| kind.is_read())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn write_queries(&self) -> i64 {
        self.by_kind
            .iter()
            .filter(|(kind, _)| kind.is_write())
            .map(|(_, count)| count)
            .sum()
    }
}

/// On-disk footprint of a table, re-fetched per decision pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TableSizeInfo {
    pub row_count: i64,
    pub table_bytes: i64,
    pub index_bytes: i64,
    pub total_bytes: i64,
    pub index_overhead_pct: f64,
}

impl TableSizeInfo {
    pub fn new(row_count: i64, table_bytes: i64, index_bytes: i64) -> Self {
        let overhead = if table_bytes > 0 {
            index_bytes as f64 / table_bytes as f64 * 100.0
        } else {
            0.0
        };
        Self {
            row_count,
            table_bytes,
            index_bytes,
            total_bytes: table_bytes + index_bytes,
            index_overhead_pct: overhead,
        }
    }

    pub fn size_class(&self, small_max_rows: i64, medium_max_rows: i64) -> SizeClass {
        if self.row_count < small_max_rows {
            SizeClass::Small
        } else if self.row_count < medium_max_rows {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }
}

/// Row-count bucket driving the per-class decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

/// Shape of the query traffic against a candidate field, populated once per
/// candidate and read by every advisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternShape {
    pub has_exact: bool,
    pub has_range: bool,
    pub has_like: bool,
    pub has_prefix: bool,
    pub has_temporal: bool,
    pub is_multi_dim: bool,
    pub field_type: String,
    pub null_ratio: f64,
}

/// Result of sustained-vs-spike analysis over daily or hourly periods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SustainedPattern {
    pub is_sustained: bool,
    pub is_spike: bool,
    pub periods_analyzed: usize,
    pub periods_above_threshold: usize,
    pub avg_per_period: f64,
    pub min_per_period: i64,
    pub max_per_period: i64,
    pub spike_ratio: f64,
    pub reason: String,
}

/// Normalized record of one EXPLAIN invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_cost: f64,
    pub actual_time_ms: f64,
    pub node_type: String,
    pub has_seq_scan: bool,
    pub has_index_scan: bool,
    pub planning_time_ms: f64,
}

impl PlanSummary {
    /// A plan wants an index when it seq-scans at non-trivial cost.
    pub fn needs_index(&self) -> bool {
        self.has_seq_scan && self.total_cost > 100.0
    }
}

/// Before/after EXPLAIN comparison for a sample query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanComparison {
    pub cost_reduction_pct: f64,
    pub time_reduction_pct: f64,
    pub seq_scan_eliminated: bool,
    pub index_scan_introduced: bool,
    pub significant: bool,
}

impl PlanComparison {
    pub fn effective(&self, min_improvement_pct: f64) -> bool {
        self.cost_reduction_pct.max(self.time_reduction_pct) >= min_improvement_pct
    }
}

/// Wall-clock timings from repeated sample-query runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueryTiming {
    pub median_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// Physical index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMethod {
    Btree,
    Hash,
    Gin,
    Gist,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::Btree => "btree",
            AccessMethod::Hash => "hash",
            AccessMethod::Gin => "gin",
            AccessMethod::Gist => "gist",
        }
    }
}

/// Index shape; drives the build-cost multiplier and the name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    Standard,
    MultiColumn,
    Partial,
    Expression,
}

impl IndexStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStrategy::Standard => "standard",
            IndexStrategy::MultiColumn => "multi_column",
            IndexStrategy::Partial => "partial",
            IndexStrategy::Expression => "expression",
        }
    }
}

/// Fully-resolved index candidate ready for DDL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub table: String,
    pub field: String,
    pub method: AccessMethod,
    pub strategy: IndexStrategy,
    pub has_tenant: bool,
    pub is_foreign_key: bool,
    pub name: String,
    pub sql: String,
}

/// Final verdict for one (table, field) candidate in a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub create: bool,
    pub confidence: f64,
    pub reason: String,
}

impl Decision {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            create: false,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// Read/write mix classification for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    ReadHeavy,
    WriteHeavy,
    #[default]
    Balanced,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::ReadHeavy => "read_heavy",
            WorkloadKind::WriteHeavy => "write_heavy",
            WorkloadKind::Balanced => "balanced",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkloadProfile {
    pub read_queries: i64,
    pub write_queries: i64,
    pub total_queries: i64,
    pub read_ratio: f64,
    pub write_ratio: f64,
    pub kind: WorkloadKind,
}

/// Named scoring advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisor {
    Pgm,
    Alex,
    RadixStringSpline,
    Cortex,
    IDistance,
    BxTree,
    FractalTree,
}

impl Advisor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Advisor::Pgm => "pgm_index",
            Advisor::Alex => "alex",
            Advisor::RadixStringSpline => "radix_string_spline",
            Advisor::Cortex => "cortex",
            Advisor::IDistance => "idistance",
            Advisor::BxTree => "bx_tree",
            Advisor::FractalTree => "fractal_tree",
        }
    }
}

/// Output of one advisor; advisors never mutate state, they only reshape
/// scoring and suggest index strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorVerdict {
    pub algorithm: Advisor,
    pub should_use: bool,
    pub confidence: f64,
    pub score: f64,
    pub reason: String,
    pub recommendation: String,
    pub method: Option<AccessMethod>,
    pub strategy_notes: Vec<String>,
}

impl AdvisorVerdict {
    pub fn not_applicable(algorithm: Advisor, reason: impl Into<String>) -> Self {
        Self {
            algorithm,
            should_use: false,
            confidence: 0.0,
            score: 0.0,
            reason: reason.into(),
            recommendation: "not_applicable".to_string(),
            method: None,
            strategy_notes: Vec::new(),
        }
    }
}

/// Field value distribution, sampled for learned-index suitability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Sequential,
    SemiOrdered,
    Random,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDistribution {
    pub distinct_count: i64,
    pub null_count: i64,
    pub distribution: DistributionKind,
    pub is_ordered: bool,
}

/// Extra characteristics gathered for string fields in one pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StringStats {
    pub cardinality_ratio: f64,
    pub avg_len: f64,
    pub max_len: i64,
}

/// Severity carried on audit events and monitoring alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_info_totals_and_overhead() {
        let info = TableSizeInfo::new(10_000, 1_000_000, 250_000);
        assert_eq!(info.total_bytes, info.table_bytes + info.index_bytes);
        assert!((info.index_overhead_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn size_class_partitions_on_thresholds() {
        assert_eq!(
            TableSizeInfo::new(999, 0, 0).size_class(1000, 10_000),
            SizeClass::Small
        );
        assert_eq!(
            TableSizeInfo::new(1000, 0, 0).size_class(1000, 10_000),
            SizeClass::Medium
        );
        assert_eq!(
            TableSizeInfo::new(10_000, 0, 0).size_class(1000, 10_000),
            SizeClass::Large
        );
    }

    #[test]
    fn field_usage_splits_read_write_kinds() {
        let mut usage = FieldUsage::default();
        usage.by_kind.insert(QueryKind::Select, 70);
        usage.by_kind.insert(QueryKind::Read, 10);
        usage.by_kind.insert(QueryKind::Update, 20);
        assert_eq!(usage.read_queries(), 80);
        assert_eq!(usage.write_queries(), 20);
    }

    #[test]
    fn needs_index_requires_seq_scan_and_cost() {
        let plan = PlanSummary {
            total_cost: 150.0,
            has_seq_scan: true,
            ..Default::default()
        };
        assert!(plan.needs_index());

        let cheap = PlanSummary {
            total_cost: 50.0,
            has_seq_scan: true,
            ..Default::default()
        };
        assert!(!cheap.needs_index());
    }
}
