use super::AdvisorInputs;
use crate::config::FractalTreeCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict};

/// Fractal-tree scoring: write-dominant traffic on large tables, where fewer
/// and narrower indexes win. The output bias is shrink, not grow.
pub fn evaluate(cfg: &FractalTreeCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    let workload = inputs.workload;

    if workload.total_queries < cfg.min_queries {
        return AdvisorVerdict::not_applicable(Advisor::FractalTree, "insufficient_queries");
    }
    if inputs.size.row_count < cfg.min_table_rows {
        return AdvisorVerdict::not_applicable(Advisor::FractalTree, "table_too_small");
    }

    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if workload.write_ratio >= cfg.write_heavy_threshold {
        let write_score = ((workload.write_ratio - cfg.write_heavy_threshold) * 1.5).min(0.5);
        score += write_score;
        reasons.push(format!(
            "write_heavy_workload ({:.0}% writes)",
            workload.write_ratio * 100.0
        ));
    }
    if workload.write_queries >= 1000 {
        score += 0.2;
        reasons.push(format!("high_write_frequency ({} writes)", workload.write_queries));
    } else if workload.write_queries >= 500 {
        score += 0.1;
        reasons.push(format!(
            "moderate_write_frequency ({} writes)",
            workload.write_queries
        ));
    }
    if inputs.size.row_count >= 100_000 {
        score += 0.2;
        reasons.push(format!("large_table ({} rows)", inputs.size.row_count));
    } else if inputs.size.row_count >= 50_000 {
        score += 0.1;
        reasons.push(format!("medium_table ({} rows)", inputs.size.row_count));
    }
    if workload.write_ratio > 0.6 && workload.read_queries < workload.write_queries {
        score += 0.1;
        reasons.push("write_dominant_pattern".to_string());
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    let mut strategy_notes = Vec::new();
    if should_use {
        strategy_notes.push("keep the index count low on this table".to_string());
        strategy_notes.push("prefer partial or covering shapes over new full indexes".to_string());
    }

    AdvisorVerdict {
        algorithm: Advisor::FractalTree,
        should_use,
        confidence: score,
        score,
        reason: if reasons.is_empty() {
            "standard_workload".to_string()
        } else {
            reasons.join("; ")
        },
        recommendation: if should_use {
            "write_optimized_minimal_indexing".to_string()
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

    fn write_dominant_owner() -> InputsOwner {
        let mut owner = InputsOwner::new("status", "text");
        owner.workload.read_queries = 300;
        owner.workload.write_queries = 1700;
        owner.workload.total_queries = 2000;
        owner.workload.read_ratio = 0.15;
        owner.workload.write_ratio = 0.85;
        owner.workload.kind = WorkloadKind::WriteHeavy;
        owner
    }

    #[test]
    fn fires_for_write_dominant_large_table() {
        let owner = write_dominant_owner();
        let verdict = evaluate(&FractalTreeCfg::default(), &owner.inputs());
        assert!(verdict.should_use);
        assert!(verdict.reason.contains("write_dominant_pattern"));
        assert!(verdict
            .strategy_notes
            .iter()
            .any(|n| n.contains("index count")));
    }

    #[test]
    fn read_heavy_table_scores_low() {
        let owner = InputsOwner::new("status", "text");
        let verdict = evaluate(&FractalTreeCfg::default(), &owner.inputs());
        assert!(!verdict.should_use);
    }

    #[test]
    fn insufficient_volume_is_not_applicable() {
        let mut owner = write_dominant_owner();
        owner.workload.total_queries = 10;
        let verdict = evaluate(&FractalTreeCfg::default(), &owner.inputs());
        assert_eq!(verdict.reason, "insufficient_queries");
    }
}
