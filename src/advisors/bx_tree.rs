use super::AdvisorInputs;
use crate::config::BxTreeCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict};

fn is_temporal_type(field_type: &str) -> bool {
    let lowered = field_type.to_lowercase();
    ["timestamp", "date", "time", "interval"]
        .iter()
        .any(|t| lowered.contains(t))
}

/// Bx-tree scoring: temporal columns and time-range traffic on large tables,
/// mapped onto a B-tree over the time column, partial by recency when the
/// pattern is range-shaped.
pub fn evaluate(cfg: &BxTreeCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    let temporal_type = is_temporal_type(&inputs.shape.field_type);
    let temporal_pattern = inputs.shape.has_temporal;

    if !temporal_type && !temporal_pattern {
        return AdvisorVerdict::not_applicable(Advisor::BxTree, "no_temporal_patterns");
    }
    if inputs.size.row_count < cfg.min_table_rows {
        return AdvisorVerdict::not_applicable(Advisor::BxTree, "table_too_small");
    }

    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if temporal_pattern {
        score += 0.4;
        reasons.push("temporal_query_patterns".to_string());
    }
    if temporal_type {
        score += 0.3;
        reasons.push(format!("temporal_field_type ({})", inputs.shape.field_type));
    }
    if inputs.shape.has_range && (temporal_pattern || temporal_type) {
        score += 0.2;
        reasons.push("time_range_queries".to_string());
    }
    if inputs.size.row_count >= 100_000 {
        score += 0.1;
        reasons.push(format!("large_table ({} rows)", inputs.size.row_count));
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    let mut strategy_notes = Vec::new();
    if should_use && inputs.shape.has_range {
        strategy_notes.push(format!(
            "partial index on recent {} ranges keeps the hot window small",
            inputs.field()
        ));
    }

    AdvisorVerdict {
        algorithm: Advisor::BxTree,
        should_use,
        confidence: score,
        score,
        reason: if reasons.is_empty() {
            "standard_workload".to_string()
        } else {
            reasons.join("; ")
        },
        recommendation: if should_use {
            "temporal_btree".to_string()
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

    #[test]
    fn fires_on_temporal_column_with_range_traffic() {
        let mut owner = InputsOwner::new("created_at", "timestamptz");
        owner.shape.has_temporal = true;
        owner.shape.has_range = true;
        let verdict = evaluate(&BxTreeCfg::default(), &owner.inputs());
        assert!(verdict.should_use);
        assert!(verdict.reason.contains("temporal_field_type"));
        assert!(verdict.strategy_notes.iter().any(|n| n.contains("partial")));
    }

    #[test]
    fn non_temporal_field_is_not_applicable() {
        let owner = InputsOwner::new("status", "text");
        let verdict = evaluate(&BxTreeCfg::default(), &owner.inputs());
        assert!(!verdict.should_use);
        assert_eq!(verdict.reason, "no_temporal_patterns");
    }

    #[test]
    fn small_table_is_not_applicable() {
        let mut owner = InputsOwner::new("created_at", "timestamptz");
        owner.size = crate::models::TableSizeInfo::new(100, 10_000, 0);
        let verdict = evaluate(&BxTreeCfg::default(), &owner.inputs());
        assert_eq!(verdict.reason, "table_too_small");
    }
}
