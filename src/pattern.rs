use crate::advisors::{self, AdvisorInputs};
use crate::audit::AuditLog;
use crate::config::{Features, PatternDetectionCfg};
use crate::hooks::MonitoringSink;
use crate::models::{AdvisorVerdict, Severity, SustainedPattern};
use serde_json::Value;
use sqlx::{query_scalar, Pool, Postgres};
use tracing::debug;

/// Hourly mode gates (short windows): fewer periods, lower floor.
const HOURLY_MIN_PERIODS: usize = 2;
const HOURLY_MIN_PER_PERIOD: i64 = 10;
const HOURLY_MIN_TOTAL_QUERIES: i64 = 20;

/// Classify per-period query counts into sustained / spike / insufficient.
/// A spike is one period more than `spike_threshold` times the average; a
/// spike never counts as sustained.
pub fn classify_periods(
    counts: &[i64],
    min_periods: usize,
    min_per_period: i64,
    spike_threshold: f64,
) -> SustainedPattern {
    if counts.len() < min_periods {
        return SustainedPattern {
            is_sustained: false,
            is_spike: false,
            periods_analyzed: counts.len(),
            reason: format!("insufficient_data ({} periods)", counts.len()),
            ..Default::default()
        };
    }

    let total: i64 = counts.iter().sum();
    let avg = total as f64 / counts.len() as f64;
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);

    let is_spike = avg > 0.0 && (max as f64) > avg * spike_threshold;
    let spike_ratio = if avg > 0.0 { max as f64 / avg } else { 0.0 };
    let periods_above = counts
        .iter()
        .filter(|count| **count >= min_per_period)
        .count();
    let is_sustained =
        periods_above >= min_periods && !is_spike && avg >= min_per_period as f64;

    let reason = if is_sustained {
        "sustained_pattern".to_string()
    } else if is_spike {
        "spike_detected".to_string()
    } else {
        format!("only_{periods_above}_periods_above_threshold")
    };

    SustainedPattern {
        is_sustained,
        is_spike,
        periods_analyzed: counts.len(),
        periods_above_threshold: periods_above,
        avg_per_period: avg,
        min_per_period: min,
        max_per_period: max,
        spike_ratio,
        reason,
    }
}

async fn period_counts(
    pool: &Pool<Postgres>,
    table: &str,
    field: &str,
    hourly: bool,
    span: i64,
) -> Vec<i64> {
    let sql = if hourly {
        r#"
        SELECT COUNT(*)
        FROM query_stats
        WHERE table_name = $1
          AND field_name = $2
          AND created_at >= NOW() - make_interval(hours => $3)
        GROUP BY DATE_TRUNC('hour', created_at)
        ORDER BY DATE_TRUNC('hour', created_at) DESC
        "#
    } else {
        r#"
        SELECT COUNT(*)
        FROM query_stats
        WHERE table_name = $1
          AND field_name = $2
          AND created_at >= NOW() - make_interval(days => $3)
        GROUP BY DATE_TRUNC('day', created_at)
        ORDER BY DATE_TRUNC('day', created_at) DESC
        "#
    };

    match query_scalar::<_, i64>(sql)
        .bind(table)
        .bind(field)
        .bind(span as i32)
        .fetch_all(pool)
        .await
    {
        Ok(counts) => counts,
        Err(err) => {
            debug!(table, field, "could not fetch period counts: {err}");
            Vec::new()
        }
    }
}

/// Sustained-vs-spike analysis. Windows of at most 24 hours use hourly
/// periods with relaxed gates; anything longer analyzes daily counts.
pub async fn detect_sustained(
    pool: &Pool<Postgres>,
    cfg: &PatternDetectionCfg,
    table: &str,
    field: &str,
    days: u32,
    window_hours: Option<u32>,
) -> SustainedPattern {
    match window_hours {
        Some(hours) if hours <= 24 => {
            let counts = period_counts(pool, table, field, true, hours as i64).await;
            classify_periods(
                &counts,
                HOURLY_MIN_PERIODS,
                HOURLY_MIN_PER_PERIOD,
                cfg.spike_threshold,
            )
        }
        _ => {
            let counts = period_counts(pool, table, field, false, days as i64).await;
            classify_periods(
                &counts,
                cfg.min_days_sustained,
                cfg.min_queries_per_day,
                cfg.spike_threshold,
            )
        }
    }
}

/// The pattern gate: refuse index creation on thin data, non-sustained
/// traffic, or a detected spike (which also raises a monitoring alert).
pub async fn should_create_from_pattern(
    pool: &Pool<Postgres>,
    cfg: &PatternDetectionCfg,
    monitoring: &dyn MonitoringSink,
    table: &str,
    field: &str,
    total_queries: i64,
    window_hours: Option<u32>,
) -> (bool, String) {
    let short_window = matches!(window_hours, Some(hours) if hours <= 24);

    let min_total = if short_window {
        HOURLY_MIN_TOTAL_QUERIES
    } else {
        cfg.min_queries_per_day * cfg.min_days_sustained as i64
    };
    if total_queries < min_total {
        return (
            false,
            format!("insufficient_queries ({total_queries} of {min_total})"),
        );
    }

    let pattern = detect_sustained(
        pool,
        cfg,
        table,
        field,
        cfg.spike_detection_window,
        window_hours,
    )
    .await;

    if !pattern.is_sustained {
        if pattern.is_spike {
            monitoring.alert(
                Severity::Info,
                &format!(
                    "Spike detected for {table}.{field} (ratio: {:.1}x), skipping index",
                    pattern.spike_ratio
                ),
            );
        }
        debug!(table, field, reason = %pattern.reason, "pattern gate veto");
        return (false, pattern.reason);
    }

    (true, "sustained_pattern_detected".to_string())
}

/// Multi-dimensional pattern check, delegated to the iDistance advisor; the
/// verdict is recorded in the algorithm-usage log.
pub async fn detect_multi_dimensional(
    features: &Features,
    audit: &AuditLog,
    inputs: &AdvisorInputs<'_>,
) -> AdvisorVerdict {
    let verdict = advisors::idistance::evaluate(&features.idistance, inputs);
    let recommendation = serde_json::to_value(&verdict).unwrap_or(Value::Null);
    audit
        .track_algorithm_usage(
            inputs.table,
            None,
            verdict.algorithm.as_str(),
            &recommendation,
            verdict.should_use,
        )
        .await;
    verdict
}

/// Temporal pattern check, delegated to the Bx-tree advisor; the verdict is
/// recorded in the algorithm-usage log.
pub async fn detect_temporal(
    features: &Features,
    audit: &AuditLog,
    inputs: &AdvisorInputs<'_>,
) -> AdvisorVerdict {
    let verdict = advisors::bx_tree::evaluate(&features.bx_tree, inputs);
    let recommendation = serde_json::to_value(&verdict).unwrap_or(Value::Null);
    audit
        .track_algorithm_usage(
            inputs.table,
            Some(inputs.field()),
            verdict.algorithm.as_str(),
            &recommendation,
            verdict.should_use,
        )
        .await;
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SPIKE_K: f64 = 3.0;

    #[test]
    fn steady_traffic_is_sustained() {
        let counts = vec![60, 55, 70, 65, 80, 75, 60];
        let pattern = classify_periods(&counts, 3, 50, SPIKE_K);
        assert!(pattern.is_sustained);
        assert!(!pattern.is_spike);
        assert_eq!(pattern.reason, "sustained_pattern");
        assert_eq!(pattern.periods_above_threshold, 7);
    }

    #[test]
    fn spike_day_is_never_sustained() {
        // Six quiet days, then one explosion: scenario-three shape.
        let counts = vec![400, 5, 5, 5, 5, 5, 5];
        let pattern = classify_periods(&counts, 3, 50, SPIKE_K);
        assert!(pattern.is_spike);
        assert!(!pattern.is_sustained);
        assert_eq!(pattern.reason, "spike_detected");
        assert!(pattern.spike_ratio > SPIKE_K);
    }

    #[test]
    fn spike_invariant_max_over_avg() {
        let counts = vec![100, 10, 10];
        let avg = 120.0 / 3.0;
        let pattern = classify_periods(&counts, 2, 5, SPIKE_K);
        assert_eq!(pattern.is_spike, 100.0 > avg * SPIKE_K);
        assert!(pattern.is_spike);
    }

    #[test]
    fn too_few_periods_is_insufficient_data() {
        let pattern = classify_periods(&[80, 90], 3, 50, SPIKE_K);
        assert!(!pattern.is_sustained);
        assert!(pattern.reason.starts_with("insufficient_data"));
    }

    #[rstest]
    #[case(vec![60, 60, 40, 30, 20, 10, 5], "only_2_periods_above_threshold")]
    fn below_floor_periods_are_counted(#[case] counts: Vec<i64>, #[case] expected: &str) {
        let pattern = classify_periods(&counts, 3, 50, SPIKE_K);
        assert!(!pattern.is_sustained);
        assert_eq!(pattern.reason, expected);
    }

    #[test]
    fn empty_counts_do_not_panic() {
        let pattern = classify_periods(&[], 3, 50, SPIKE_K);
        assert!(!pattern.is_sustained);
        assert_eq!(pattern.periods_analyzed, 0);
    }
}
