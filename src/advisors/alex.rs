use super::AdvisorInputs;
use crate::config::AlexCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict, WorkloadKind};

/// Adaptive-learned-index scoring: write-heavy or shifting workloads where
/// index maintenance cost dominates, biasing toward shapes that keep write
/// amplification down.
pub fn evaluate(cfg: &AlexCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    let workload = inputs.workload;
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if workload.write_ratio >= cfg.write_heavy_threshold {
        score += 0.4;
        reasons.push(format!(
            "write_heavy_workload ({:.0}% writes)",
            workload.write_ratio * 100.0
        ));
    }
    if workload.write_queries >= cfg.min_queries {
        score += 0.3;
        reasons.push(format!(
            "high_write_frequency ({} write queries)",
            workload.write_queries
        ));
    }
    if workload.kind == WorkloadKind::Balanced {
        score += 0.2;
        reasons.push("balanced_workload_adapts_well".to_string());
    }
    if inputs.size.row_count >= cfg.min_table_rows {
        score += 0.1;
        reasons.push(format!("table_size_suitable ({} rows)", inputs.size.row_count));
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    // Hash has the lowest write overhead, but only pays for pure equality.
    let pure_equality =
        inputs.shape.has_exact && !inputs.shape.has_range && !inputs.shape.has_like;
    let method = if should_use && workload.write_ratio >= 0.4 && pure_equality {
        AccessMethod::Hash
    } else {
        AccessMethod::Btree
    };

    let mut strategy_notes = Vec::new();
    if should_use {
        strategy_notes.push("prefer partial indexes for filtered queries".to_string());
        strategy_notes.push("consider covering indexes to cut maintenance".to_string());
        if method == AccessMethod::Hash {
            strategy_notes
                .push("hash picked for equality-only traffic; lowest write overhead".to_string());
        }
    }

    AdvisorVerdict {
        algorithm: Advisor::Alex,
        should_use,
        confidence: score,
        score,
        reason: if reasons.is_empty() {
            "standard_workload".to_string()
        } else {
            reasons.join("; ")
        },
        recommendation: if should_use {
            "adaptive_write_optimized".to_string()
        } else {
            "standard_indexing".to_string()
        },
        method: Some(method),
        strategy_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::InputsOwner;
    use super::*;

    fn write_heavy_owner() -> InputsOwner {
        let mut owner = InputsOwner::new("status", "text");
        owner.workload.read_queries = 200;
        owner.workload.write_queries = 800;
        owner.workload.total_queries = 1000;
        owner.workload.read_ratio = 0.2;
        owner.workload.write_ratio = 0.8;
        owner.workload.kind = WorkloadKind::WriteHeavy;
        owner
    }

    #[test]
    fn fires_for_write_heavy_workload() {
        let owner = write_heavy_owner();
        let verdict = evaluate(&AlexCfg::default(), &owner.inputs());
        assert!(verdict.should_use);
        assert!(verdict.reason.contains("write_heavy_workload"));
    }

    #[test]
    fn picks_hash_for_pure_equality_write_heavy() {
        let owner = write_heavy_owner();
        let verdict = evaluate(&AlexCfg::default(), &owner.inputs());
        assert_eq!(verdict.method, Some(AccessMethod::Hash));
    }

    #[test]
    fn keeps_btree_when_range_queries_present() {
        let mut owner = write_heavy_owner();
        owner.shape.has_range = true;
        let verdict = evaluate(&AlexCfg::default(), &owner.inputs());
        assert_eq!(verdict.method, Some(AccessMethod::Btree));
    }

    #[test]
    fn read_heavy_workload_scores_low() {
        let mut owner = InputsOwner::new("status", "text");
        owner.workload.write_queries = 50;
        let verdict = evaluate(&AlexCfg::default(), &owner.inputs());
        // Read-heavy with few writes: only the table-size factor contributes.
        assert!(!verdict.should_use);
    }
}
