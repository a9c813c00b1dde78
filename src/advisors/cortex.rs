use crate::config::CortexCfg;
use crate::models::{AccessMethod, Advisor, AdvisorVerdict};

/// A column pair observed together, with the physical-order correlation of
/// its members (from planner statistics).
#[derive(Debug, Clone)]
pub struct ColumnPair {
    pub first: String,
    pub second: String,
    pub co_usage_count: i64,
    pub correlation: f64,
}

/// Cortex scoring: exploit inter-column correlation to decide which pairs
/// deserve a composite index, and in which priority.
pub fn evaluate_pair(cfg: &CortexCfg, pair: &ColumnPair, min_co_usage: i64) -> AdvisorVerdict {
    let correlation = pair.correlation.abs();
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if correlation >= cfg.min_correlation {
        score += 0.4;
        reasons.push(format!("correlated_columns ({correlation:.2})"));
    }
    if correlation >= 0.9 {
        score += 0.3;
        reasons.push("strong_physical_correlation".to_string());
    }
    if pair.co_usage_count >= min_co_usage {
        score += 0.3;
        reasons.push(format!("co_used_in_queries ({} times)", pair.co_usage_count));
    }

    let score = score.min(1.0);
    let should_use = score >= cfg.min_suitability;

    AdvisorVerdict {
        algorithm: Advisor::Cortex,
        should_use,
        confidence: score,
        score,
        reason: if reasons.is_empty() {
            "uncorrelated_pair".to_string()
        } else {
            reasons.join("; ")
        },
        recommendation: if should_use {
            "composite_correlated_pair".to_string()
        } else {
            "no_composite_benefit".to_string()
        },
        method: Some(AccessMethod::Btree),
        strategy_notes: if should_use {
            vec![format!(
                "lead the composite with {} (higher correlation side)",
                pair.first
            )]
        } else {
            Vec::new()
        },
    }
}

/// Reorder composite candidates so correlation-backed pairs come first;
/// within the same bucket the original (query-count) order is kept.
pub fn prioritize<T, F>(mut candidates: Vec<T>, score_of: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    candidates.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(correlation: f64, co_usage: i64) -> ColumnPair {
        ColumnPair {
            first: "tenant_id".into(),
            second: "created_at".into(),
            co_usage_count: co_usage,
            correlation,
        }
    }

    #[test]
    fn correlated_and_co_used_pair_fires() {
        let verdict = evaluate_pair(&CortexCfg::default(), &pair(0.95, 50), 10);
        assert!(verdict.should_use);
        assert!(verdict.reason.contains("strong_physical_correlation"));
    }

    #[test]
    fn uncorrelated_rarely_used_pair_does_not_fire() {
        let verdict = evaluate_pair(&CortexCfg::default(), &pair(0.1, 2), 10);
        assert!(!verdict.should_use);
        assert_eq!(verdict.reason, "uncorrelated_pair");
    }

    #[test]
    fn negative_correlation_counts_by_magnitude() {
        let verdict = evaluate_pair(&CortexCfg::default(), &pair(-0.92, 50), 10);
        assert!(verdict.should_use);
    }

    #[test]
    fn prioritize_sorts_descending_and_is_stable() {
        let items = vec![("a", 0.2), ("b", 0.9), ("c", 0.2)];
        let sorted = prioritize(items, |item| item.1);
        assert_eq!(sorted[0].0, "b");
        assert_eq!(sorted[1].0, "a");
        assert_eq!(sorted[2].0, "c");
    }
}
