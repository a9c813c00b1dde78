use super::AdvisorInputs;
use crate::config::PgmCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict, DistributionKind};

/// Piecewise-geometric-model scoring: rewards large, read-heavy tables with
/// ordered value distributions, where a compact B-tree pays off most.
pub fn evaluate(cfg: &PgmCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    let rows = inputs.size.row_count;
    let workload = inputs.workload;
    let read_write_ratio = if workload.write_queries > 0 {
        workload.read_queries as f64 / workload.write_queries as f64
    } else {
        f64::INFINITY
    };

    let mut score: f64 = 0.0;

    // Larger tables benefit more from space savings.
    if rows >= cfg.min_rows {
        score += if rows >= 1_000_000 {
            0.3
        } else if rows >= 100_000 {
            0.25
        } else {
            0.2
        };
    }

    let is_read_heavy = read_write_ratio >= 10.0;
    if is_read_heavy {
        score += 0.3;
    } else if read_write_ratio >= 5.0 {
        score += 0.2;
    }

    if inputs.shape.has_range {
        score += 0.2;
    } else if inputs.shape.has_exact && !inputs.shape.has_like {
        score += 0.15;
    } else {
        score += 0.1;
    }

    if inputs.distribution.is_ordered {
        score += 0.2;
    } else if inputs.distribution.distribution == DistributionKind::SemiOrdered {
        score += 0.15;
    } else {
        score += 0.05;
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    let reason = if should_use {
        "suitable_for_pgm"
    } else if rows < cfg.min_rows {
        "table_too_small"
    } else if !is_read_heavy {
        "not_read_heavy"
    } else {
        "low_suitability_score"
    };

    let mut strategy_notes = Vec::new();
    if should_use {
        let savings_pct = if rows >= 1_000_000 && is_read_heavy {
            75
        } else if rows >= 100_000 {
            65
        } else {
            50
        };
        strategy_notes.push(format!(
            "compact ordered B-tree, estimated {savings_pct}% space savings vs default layout"
        ));
    }

    AdvisorVerdict {
        algorithm: Advisor::Pgm,
        should_use,
        confidence: score,
        score,
        reason: reason.to_string(),
        recommendation: if should_use {
            "btree_space_efficient".to_string()
        } else {
            "standard_indexing".to_string()
        },
        method: Some(AccessMethod::Btree),
        strategy_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::InputsOwner;
    use super::*;
    use crate::models::WorkloadKind;

    #[test]
    fn fires_for_large_ordered_read_heavy_table() {
        let owner = InputsOwner::new("created_at", "int8");
        let verdict = evaluate(&PgmCfg::default(), &owner.inputs());
        assert!(verdict.should_use);
        assert_eq!(verdict.method, Some(AccessMethod::Btree));
        assert_eq!(verdict.reason, "suitable_for_pgm");
        assert!(!verdict.strategy_notes.is_empty());
    }

    #[test]
    fn small_table_scores_below_threshold() {
        let mut owner = InputsOwner::new("id", "int8");
        owner.size = crate::models::TableSizeInfo::new(500, 100_000, 0);
        owner.workload.kind = WorkloadKind::Balanced;
        owner.workload.read_queries = 100;
        owner.workload.write_queries = 100;
        owner.distribution.is_ordered = false;
        owner.distribution.distribution = crate::models::DistributionKind::Random;
        let verdict = evaluate(&PgmCfg::default(), &owner.inputs());
        assert!(!verdict.should_use);
        assert_eq!(verdict.reason, "table_too_small");
    }

    #[test]
    fn score_never_exceeds_one() {
        let owner = InputsOwner::new("seq", "int8");
        let verdict = evaluate(&PgmCfg::default(), &owner.inputs());
        assert!(verdict.score <= 1.0);
        assert!(verdict.confidence <= 1.0);
    }
}
