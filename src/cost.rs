use crate::config::AutoIndexerCfg;
use crate::models::{IndexStrategy, PlanSummary, SizeClass, TableSizeInfo, WorkloadKind, WorkloadProfile};

/// Outcome of the cost-benefit stage. `hard_veto` marks gate failures that
/// later stages must never overturn; threshold misses stay soft so the
/// workload stage may re-weigh them.
#[derive(Debug, Clone)]
pub struct CostVerdict {
    pub create: bool,
    pub confidence: f64,
    pub reason: String,
    pub benefit_ratio: f64,
    pub hard_veto: bool,
}

impl CostVerdict {
    fn veto(reason: impl Into<String>, ratio: f64) -> Self {
        Self {
            create: false,
            confidence: 0.0,
            reason: reason.into(),
            benefit_ratio: ratio,
            hard_veto: true,
        }
    }
}

pub fn strategy_multiplier(cfg: &AutoIndexerCfg, strategy: IndexStrategy) -> f64 {
    let costs = &cfg.index_type_costs;
    match strategy {
        IndexStrategy::Partial => costs.partial,
        IndexStrategy::Expression => costs.expression,
        IndexStrategy::Standard => costs.standard,
        IndexStrategy::MultiColumn => costs.multi_column,
    }
}

/// Estimated cost of building the index. Row-count base, blended toward the
/// sample plan when one is available (build runs ~3x a full read of the
/// table, 70/30 weighting toward the plan).
pub fn estimate_build_cost(
    cfg: &AutoIndexerCfg,
    row_count: i64,
    strategy: IndexStrategy,
    plan: Option<&PlanSummary>,
) -> f64 {
    let multiplier = strategy_multiplier(cfg, strategy);
    let base = row_count as f64 / (1000.0 / cfg.build_cost_per_1000_rows) * multiplier;

    match plan {
        Some(plan) if plan.total_cost > 0.0 => {
            let from_plan = plan.total_cost * 3.0 * multiplier;
            from_plan * 0.7 + base * 0.3
        }
        _ => base,
    }
}

/// Estimated extra cost per query while the index is missing. Uses the
/// sample plan when it shows a sequential scan above the plan-cost floor,
/// then folds in measured execution time when present.
pub fn estimate_query_cost(
    cfg: &AutoIndexerCfg,
    row_count: i64,
    plan: Option<&PlanSummary>,
    selectivity: Option<f64>,
) -> f64 {
    let divisor = if cfg.query_cost_per_10000_rows > 0.0 {
        10_000.0 / cfg.query_cost_per_10000_rows
    } else {
        10_000.0
    };
    let mut cost = (row_count as f64 / divisor).max(cfg.min_query_cost);

    if let Some(plan) = plan {
        if plan.has_seq_scan && plan.total_cost > cfg.min_plan_cost_for_index {
            // Plan costs are in planner units; ~0.01/row for a seq scan.
            let normalized = plan.total_cost / 100.0;
            cost = normalized * 0.8 + cost * 0.2;
            if plan.actual_time_ms > 0.0 {
                let time_based = plan.actual_time_ms / 10.0;
                cost = cost * 0.6 + time_based * 0.4;
            }
        }
    }

    if let Some(selectivity) = selectivity {
        if selectivity < cfg.min_selectivity_for_index {
            cost *= 0.5;
        } else if selectivity > cfg.high_selectivity_threshold {
            cost *= 1.2;
        }
    }

    cost
}

/// Cost-benefit verdict with size-class rules and the selectivity gate.
/// This is stage one of the decision pipeline; workload and learned scoring
/// refine it afterwards.
pub fn cost_benefit_verdict(
    cfg: &AutoIndexerCfg,
    build_cost: f64,
    queries_over_horizon: f64,
    query_cost_without_index: f64,
    size: &TableSizeInfo,
    selectivity: Option<f64>,
) -> CostVerdict {
    if queries_over_horizon <= 0.0 {
        return CostVerdict::veto("no_queries", 0.0);
    }

    let total_query_cost = queries_over_horizon * query_cost_without_index;
    let ratio = if build_cost > 0.0 {
        total_query_cost / build_cost
    } else {
        0.0
    };
    let mut create = ratio > 1.0;
    let mut confidence = (ratio / 2.0).min(1.0);
    let mut reason = if create {
        "cost_benefit_favorable".to_string()
    } else {
        "cost_benefit_insufficient".to_string()
    };

    match size.size_class(cfg.small_table_row_count, cfg.medium_table_row_count) {
        SizeClass::Small => {
            let queries_per_hour = queries_over_horizon / 24.0;
            if queries_per_hour < cfg.small_table_min_queries_per_hour {
                return CostVerdict::veto("small_table_low_query_volume", ratio);
            }
            if size.index_overhead_pct > cfg.small_table_max_index_overhead_pct {
                return CostVerdict::veto("small_table_high_overhead", ratio);
            }
            if ratio <= 2.0 {
                return CostVerdict {
                    create: false,
                    confidence,
                    reason: "small_table_insufficient_benefit".to_string(),
                    benefit_ratio: ratio,
                    hard_veto: false,
                };
            }
        }
        SizeClass::Medium => {
            if size.index_overhead_pct > cfg.medium_table_max_index_overhead_pct {
                return CostVerdict::veto("medium_table_high_overhead", ratio);
            }
            if ratio <= 1.5 {
                return CostVerdict {
                    create: false,
                    confidence,
                    reason: "medium_table_insufficient_benefit".to_string(),
                    benefit_ratio: ratio,
                    hard_veto: false,
                };
            }
        }
        SizeClass::Large => {
            let adjusted_build = build_cost * cfg.large_table_cost_reduction_factor;
            let adjusted_ratio = if adjusted_build > 0.0 {
                total_query_cost / adjusted_build
            } else {
                0.0
            };
            if adjusted_ratio > 1.0 {
                create = true;
                confidence = (adjusted_ratio / 1.5).min(1.0);
                reason = "large_table_benefit".to_string();
            } else {
                create = false;
                reason = "cost_benefit_insufficient".to_string();
            }
        }
    }

    if let Some(selectivity) = selectivity {
        if selectivity < cfg.min_selectivity_for_index {
            return CostVerdict::veto(format!("low_selectivity_{selectivity:.3}"), ratio);
        }
        if selectivity > cfg.high_selectivity_threshold && create {
            confidence = (confidence * 1.2).min(1.0);
            reason = "high_selectivity_benefit".to_string();
        }
    }

    CostVerdict {
        create,
        confidence,
        reason,
        benefit_ratio: ratio,
        hard_veto: false,
    }
}

/// Stage-three workload adjustment. Read-heavy traffic lowers the bar and
/// boosts confidence; write-heavy raises it and may retract a soft create.
/// Hard vetoes are untouched by design of the caller.
pub fn apply_workload_adjustment(verdict: &mut CostVerdict, workload: &WorkloadProfile) {
    let ratio = verdict.benefit_ratio;
    match workload.kind {
        WorkloadKind::ReadHeavy => {
            verdict.confidence = (verdict.confidence * 1.2).min(1.0);
            if ratio > 0.5 {
                verdict.create = true;
                verdict.reason = "read_heavy_workload_aggressive".to_string();
            }
        }
        WorkloadKind::WriteHeavy => {
            verdict.confidence = (verdict.confidence * 0.8).max(0.0);
            // Raised threshold: a write-heavy table only earns an index when
            // the benefit ratio clears 1.3.
            if ratio <= 1.3 {
                verdict.create = false;
                verdict.reason = "write_heavy_workload_conservative".to_string();
            }
        }
        WorkloadKind::Balanced => {}
    }
}
