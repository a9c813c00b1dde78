use super::AdvisorInputs;
use crate::config::RssCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict};

fn is_string_type(field_type: &str) -> bool {
    let lowered = field_type.to_lowercase();
    lowered.contains("text") || lowered.contains("varchar") || lowered.contains("char")
}

/// Radix-string-spline scoring: long, high-cardinality string fields under
/// equality or prefix search, where a shallow string-aware structure beats a
/// plain B-tree on memory.
pub fn evaluate(cfg: &RssCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    if !is_string_type(&inputs.shape.field_type) {
        return AdvisorVerdict::not_applicable(Advisor::RadixStringSpline, "not_a_string_field");
    }

    let stats = inputs.string_stats.copied().unwrap_or_default();
    let mut score: f64 = 0.2; // string field type, required and granted
    let mut reasons = vec!["string_field_type".to_string()];

    if stats.cardinality_ratio >= cfg.min_cardinality_ratio {
        score += 0.3;
        reasons.push(format!(
            "high_cardinality ({:.0}% distinct)",
            stats.cardinality_ratio * 100.0
        ));
    }
    if stats.avg_len >= cfg.min_avg_string_length {
        score += 0.2;
        reasons.push(format!("long_strings (avg {:.0} chars)", stats.avg_len));
    }
    if inputs.shape.has_exact || inputs.shape.has_prefix {
        score += 0.2;
        reasons.push("equality_or_prefix_searches".to_string());
    }
    if inputs.size.row_count >= cfg.min_table_rows {
        score += 0.1;
        reasons.push(format!("large_table ({} rows)", inputs.size.row_count));
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    let pure_equality =
        inputs.shape.has_exact && !inputs.shape.has_like && !inputs.shape.has_range;
    let method = if should_use && pure_equality {
        AccessMethod::Hash
    } else {
        AccessMethod::Btree
    };

    let mut strategy_notes = Vec::new();
    if should_use {
        if inputs.shape.has_prefix {
            strategy_notes.push(format!(
                "expression index on left({}, 8) covers prefix lookups at a fraction of the size",
                inputs.field()
            ));
        }
        if inputs.shape.has_like {
            strategy_notes.push(format!(
                "expression index on lower({}) for case-insensitive matching",
                inputs.field()
            ));
        }
    }

    AdvisorVerdict {
        algorithm: Advisor::RadixStringSpline,
        should_use,
        confidence: score,
        score,
        reason: reasons.join("; "),
        recommendation: if should_use {
            "string_optimized_index".to_string()
        } else {
            "standard_string_indexing".to_string()
        },
        method: Some(method),
        strategy_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::InputsOwner;
    use super::*;
    use crate::models::StringStats;

    fn string_owner() -> InputsOwner {
        let mut owner = InputsOwner::new("email", "varchar");
        owner.string_stats = Some(StringStats {
            cardinality_ratio: 0.95,
            avg_len: 28.0,
            max_len: 120,
        });
        owner
    }

    #[test]
    fn fires_for_long_high_cardinality_strings() {
        let owner = string_owner();
        let verdict = evaluate(&RssCfg::default(), &owner.inputs());
        assert!(verdict.should_use);
        assert!(verdict.reason.contains("high_cardinality"));
    }

    #[test]
    fn pure_equality_prefers_hash() {
        let owner = string_owner();
        let verdict = evaluate(&RssCfg::default(), &owner.inputs());
        assert_eq!(verdict.method, Some(AccessMethod::Hash));
    }

    #[test]
    fn prefix_pattern_adds_expression_note() {
        let mut owner = string_owner();
        owner.shape.has_prefix = true;
        owner.shape.has_like = true;
        let verdict = evaluate(&RssCfg::default(), &owner.inputs());
        assert_eq!(verdict.method, Some(AccessMethod::Btree));
        assert!(verdict
            .strategy_notes
            .iter()
            .any(|note| note.contains("left(")));
    }

    #[test]
    fn non_string_fields_are_not_applicable() {
        let owner = InputsOwner::new("amount", "numeric");
        let verdict = evaluate(&RssCfg::default(), &owner.inputs());
        assert!(!verdict.should_use);
        assert_eq!(verdict.reason, "not_a_string_field");
    }
}
