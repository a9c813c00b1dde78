use super::AdvisorInputs;
use crate::config::IDistanceCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict};

/// iDistance scoring: multi-field range or nearest-neighbour traffic, mapped
/// onto PostgreSQL as GiST (geometric), GIN (arrays), or a composite B-tree
/// that mimics the one-dimensional key mapping.
pub fn evaluate(cfg: &IDistanceCfg, inputs: &AdvisorInputs) -> AdvisorVerdict {
    let dimensions = inputs.fields.len();
    let mut score: f64 = 0.0;

    score += match dimensions {
        0 | 1 => 0.0,
        2 => 0.2,
        _ => 0.3,
    };
    if inputs.shape.is_multi_dim {
        score += 0.3;
    }
    score += if inputs.shape.has_range { 0.2 } else { 0.1 };
    if inputs.size.row_count >= cfg.min_table_rows {
        score += if inputs.size.row_count >= 100_000 { 0.2 } else { 0.1 };
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability && dimensions >= 2;

    if !should_use {
        let reason = if dimensions < 2 {
            "single_dimensional_pattern"
        } else {
            "low_suitability_score"
        };
        let mut verdict = AdvisorVerdict::not_applicable(Advisor::IDistance, reason);
        verdict.score = score;
        verdict.confidence = score;
        return verdict;
    }

    let has_geometric = inputs.field_types.iter().any(|t| {
        let lowered = t.to_lowercase();
        lowered.contains("point") || lowered.contains("geometry")
    });
    let has_array = inputs
        .field_types
        .iter()
        .any(|t| t.to_lowercase().contains("array") || t.starts_with('_'));

    let (method, reason) = if has_geometric {
        (AccessMethod::Gist, "idistance_strategy_geometric")
    } else if has_array {
        (AccessMethod::Gin, "idistance_strategy_array")
    } else {
        (AccessMethod::Btree, "idistance_strategy_composite")
    };

    AdvisorVerdict {
        algorithm: Advisor::IDistance,
        should_use: true,
        confidence: score,
        score,
        reason: reason.to_string(),
        recommendation: "multi_dimensional_index".to_string(),
        method: Some(method),
        strategy_notes: vec![format!(
            "composite over {} dimensions approximates a one-dimensional key mapping",
            dimensions
        )],
    }
}
