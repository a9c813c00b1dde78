use crate::config::WorkloadAnalysisCfg;
use crate::models::{WorkloadKind, WorkloadProfile};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

/// Classify a read/write mix into a workload kind using the configured
/// thresholds (read-heavy >= 0.7 reads, write-heavy >= 0.3 writes). `total`
/// counts every traced query, including kinds outside either bucket.
pub fn classify(
    read_queries: i64,
    write_queries: i64,
    total_queries: i64,
    cfg: &WorkloadAnalysisCfg,
) -> WorkloadProfile {
    if total_queries <= 0 {
        return WorkloadProfile::default();
    }

    let read_ratio = read_queries as f64 / total_queries as f64;
    let write_ratio = write_queries as f64 / total_queries as f64;
    let kind = if read_ratio >= cfg.read_heavy_threshold {
        WorkloadKind::ReadHeavy
    } else if write_ratio >= cfg.write_heavy_threshold {
        WorkloadKind::WriteHeavy
    } else {
        WorkloadKind::Balanced
    };

    WorkloadProfile {
        read_queries,
        write_queries,
        total_queries,
        read_ratio,
        write_ratio,
        kind,
    }
}

/// Read/write mix for one table over the analysis window. Probe errors
/// degrade to a balanced, empty profile.
pub async fn profile_for_table(
    pool: &Pool<Postgres>,
    cfg: &WorkloadAnalysisCfg,
    table: &str,
) -> WorkloadProfile {
    if !cfg.enabled {
        return WorkloadProfile::default();
    }

    const QUERY: &str = r#"
        SELECT
            COUNT(*) FILTER (WHERE query_type IN ('SELECT', 'READ')) AS read_queries,
            COUNT(*) FILTER (WHERE query_type IN ('INSERT', 'UPDATE', 'DELETE', 'WRITE')) AS write_queries,
            COUNT(*) AS total_queries
        FROM query_stats
        WHERE table_name = $1
          AND created_at >= NOW() - make_interval(hours => $2)
          AND created_at < NOW()
    "#;

    match sqlx::query(QUERY)
        .bind(table)
        .bind(cfg.time_window_hours as i32)
        .fetch_one(pool)
        .await
    {
        Ok(row) => {
            let read: i64 = row.try_get("read_queries").unwrap_or(0);
            let write: i64 = row.try_get("write_queries").unwrap_or(0);
            let total: i64 = row.try_get("total_queries").unwrap_or(0);
            classify(read, write, total, cfg)
        }
        Err(err) => {
            debug!(table, "workload analysis failed: {err}");
            WorkloadProfile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(90, 10, 100, WorkloadKind::ReadHeavy)]
    #[case(70, 30, 100, WorkloadKind::ReadHeavy)]
    #[case(10, 90, 100, WorkloadKind::WriteHeavy)]
    #[case(65, 35, 100, WorkloadKind::WriteHeavy)]
    #[case(65, 25, 100, WorkloadKind::Balanced)]
    fn classification_follows_thresholds(
        #[case] reads: i64,
        #[case] writes: i64,
        #[case] total: i64,
        #[case] expected: WorkloadKind,
    ) {
        let cfg = WorkloadAnalysisCfg::default();
        assert_eq!(classify(reads, writes, total, &cfg).kind, expected);
    }

    #[test]
    fn empty_mix_is_balanced_with_zero_ratios() {
        let profile = classify(0, 0, 0, &WorkloadAnalysisCfg::default());
        assert_eq!(profile.kind, WorkloadKind::Balanced);
        assert_eq!(profile.total_queries, 0);
        assert!((profile.read_ratio - 0.0).abs() < 1e-9);
    }

    #[test]
    fn ratios_reflect_bucket_share_of_total() {
        let profile = classify(75, 25, 100, &WorkloadAnalysisCfg::default());
        assert!((profile.read_ratio - 0.75).abs() < 1e-9);
        assert!((profile.write_ratio - 0.25).abs() < 1e-9);
    }
}
