use crate::config::AutoIndexerCfg;
use crate::cost::{apply_workload_adjustment, cost_benefit_verdict};
use crate::models::{Decision, FieldUsage, TableSizeInfo, WorkloadProfile};

/// Everything the fuser needs, gathered once per candidate by the applier.
/// The fuser itself is pure; stages run in a fixed, canonical order.
#[derive(Debug, Clone)]
pub struct CandidateFeatures<'a> {
    pub table: &'a str,
    pub field: &'a str,
    pub usage: &'a FieldUsage,
    pub size: &'a TableSizeInfo,
    pub workload: &'a WorkloadProfile,
    pub selectivity: Option<f64>,
    pub build_cost: f64,
    pub query_cost_without_index: f64,
    pub pattern_ok: bool,
    pub pattern_reason: &'a str,
    pub is_foreign_key: bool,
    pub current_index_count: i64,
    pub max_indexes_per_table: i64,
    pub projected_index_size_mb: f64,
    pub storage_used_mb: f64,
    pub storage_budget_mb: f64,
}

/// Utility prediction from historical features; the refinement model the
/// heuristic verdict is blended against.
#[derive(Debug, Clone, Copy)]
pub struct UtilityPrediction {
    pub utility: f64,
    pub confidence: f64,
}

/// Predict how useful the index will be, in [0, 1]. Monotone in query
/// volume so that more traffic never weakens a verdict.
pub fn predict_index_utility(features: &CandidateFeatures) -> UtilityPrediction {
    let queries = features.usage.total_queries as f64;
    let ratio = if features.build_cost > 0.0 {
        queries * features.query_cost_without_index / features.build_cost
    } else {
        0.0
    };

    let mut utility = (ratio / (ratio + 1.0)) * 0.5;
    utility += features.workload.read_ratio * 0.2;
    if let Some(selectivity) = features.selectivity {
        utility += selectivity.clamp(0.0, 1.0) * 0.2;
    }
    if features.size.row_count >= 10_000 {
        utility += 0.1;
    } else if features.size.row_count >= 1000 {
        utility += 0.05;
    }

    let mut confidence = 0.3 + 0.4 * (queries / 1000.0).min(1.0);
    if features.selectivity.is_some() {
        confidence += 0.15;
    }
    if features.size.row_count > 0 {
        confidence += 0.15;
    }

    UtilityPrediction {
        utility: utility.min(1.0),
        confidence: confidence.min(1.0),
    }
}

/// Gradient-boosted-style pattern score over usage features: a sum of step
/// functions capped at 1.0. Monotone non-decreasing in every input.
pub fn pattern_score(features: &CandidateFeatures) -> f64 {
    let usage = features.usage;
    let mut score: f64 = 0.0;

    if usage.total_queries >= 100 {
        score += 0.2;
    }
    if usage.total_queries >= 1000 {
        score += 0.1;
    }
    if usage.avg_duration_ms >= 50.0 {
        score += 0.2;
    }
    if usage.avg_duration_ms >= 200.0 {
        score += 0.1;
    }
    if features.size.row_count >= 10_000 {
        score += 0.15;
    }
    if features.selectivity.unwrap_or(0.0) >= 0.1 {
        score += 0.15;
    }
    if features.workload.read_ratio >= 0.7 {
        score += 0.1;
    }

    score.min(1.0)
}

/// The decision fuser. Canonical stage order:
/// cost-benefit base -> pattern gate -> workload adjust -> utility
/// refinement -> hard constraints -> pattern-score blend -> FK boost.
pub fn fuse(cfg: &AutoIndexerCfg, features: &CandidateFeatures) -> Decision {
    // Stage 1: cost-benefit with size-class and selectivity rules.
    let mut verdict = cost_benefit_verdict(
        cfg,
        features.build_cost,
        features.usage.total_queries as f64,
        features.query_cost_without_index,
        features.size,
        features.selectivity,
    );
    if verdict.hard_veto {
        return Decision::skip(verdict.reason);
    }

    // Stage 2: sustained-pattern gate.
    if !features.pattern_ok {
        return Decision::skip(features.pattern_reason);
    }

    // Stage 3: workload-aware threshold shift.
    apply_workload_adjustment(&mut verdict, features.workload);

    let mut create = verdict.create;
    let mut confidence = verdict.confidence;
    let mut reason = verdict.reason;

    // Stage 4: utility refinement. A conflicting prediction wins only when
    // its confidence dominates, blending 80/20 toward the model.
    let prediction = predict_index_utility(features);
    let predicted_create = prediction.utility > 0.5;
    if predicted_create != create && prediction.confidence > confidence {
        create = predicted_create;
        confidence = prediction.confidence * 0.8 + confidence * 0.2;
        reason = format!("predictive_utility_{reason}");
    }

    // Stage 5: hard constraints are a terminal no.
    if features.current_index_count >= features.max_indexes_per_table {
        return Decision::skip(format!(
            "max_indexes_per_table_reached_{}_{}",
            features.current_index_count, features.max_indexes_per_table
        ));
    }
    if features.storage_used_mb + features.projected_index_size_mb > features.storage_budget_mb {
        return Decision::skip("storage_budget_exceeded");
    }

    // Stage 6: pattern-score blend (20% weight) with strong-score overrides.
    let score = pattern_score(features);
    confidence = confidence * 0.8 + score * 0.2;
    if score > 0.8 && !create {
        create = true;
        reason = format!("xgboost_override_{reason}");
    } else if score < 0.2 && create {
        create = false;
        reason = format!("xgboost_override_{reason}");
    }

    // Stage 7: foreign-key boost.
    if features.is_foreign_key && create {
        confidence = (confidence * 1.2).min(1.0);
        reason = format!("foreign_key_index_{reason}");
    }

    Decision {
        create,
        confidence: confidence.clamp(0.0, 1.0),
        reason,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::models::{QueryKind, WorkloadKind};

    pub struct FeatureOwner {
        pub usage: FieldUsage,
        pub size: TableSizeInfo,
        pub workload: WorkloadProfile,
        pub selectivity: Option<f64>,
        pub build_cost: f64,
        pub query_cost_without_index: f64,
        pub pattern_ok: bool,
        pub pattern_reason: String,
        pub is_foreign_key: bool,
        pub current_index_count: i64,
        pub max_indexes_per_table: i64,
        pub projected_index_size_mb: f64,
        pub storage_used_mb: f64,
        pub storage_budget_mb: f64,
    }

    impl FeatureOwner {
        /// Scenario-one shape: read-heavy large table, high selectivity.
        pub fn read_heavy_large() -> Self {
            let mut usage = FieldUsage {
                table: "orders".into(),
                field: "customer_id".into(),
                total_queries: 100_000,
                distinct_tenants: 4,
                avg_duration_ms: 80.0,
                p95_ms: 250.0,
                p99_ms: 400.0,
                ..Default::default()
            };
            usage.by_kind.insert(QueryKind::Select, 100_000);
            Self {
                usage,
                size: TableSizeInfo::new(1_000_000, 800_000_000, 40_000_000),
                workload: WorkloadProfile {
                    read_queries: 100_000,
                    write_queries: 0,
                    total_queries: 100_000,
                    read_ratio: 1.0,
                    write_ratio: 0.0,
                    kind: WorkloadKind::ReadHeavy,
                },
                selectivity: Some(0.6),
                build_cost: 1000.0,
                query_cost_without_index: 10.0,
                pattern_ok: true,
                pattern_reason: "sustained_pattern".into(),
                is_foreign_key: false,
                current_index_count: 2,
                max_indexes_per_table: 10,
                projected_index_size_mb: 80.0,
                storage_used_mb: 100.0,
                storage_budget_mb: 10_240.0,
            }
        }

        pub fn features(&self) -> CandidateFeatures<'_> {
            CandidateFeatures {
                table: "orders",
                field: "customer_id",
                usage: &self.usage,
                size: &self.size,
                workload: &self.workload,
                selectivity: self.selectivity,
                build_cost: self.build_cost,
                query_cost_without_index: self.query_cost_without_index,
                pattern_ok: self.pattern_ok,
                pattern_reason: &self.pattern_reason,
                is_foreign_key: self.is_foreign_key,
                current_index_count: self.current_index_count,
                max_indexes_per_table: self.max_indexes_per_table,
                projected_index_size_mb: self.projected_index_size_mb,
                storage_used_mb: self.storage_used_mb,
                storage_budget_mb: self.storage_budget_mb,
            }
        }
    }
}
