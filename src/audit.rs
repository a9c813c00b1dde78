use crate::models::Severity;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use tracing::{error, info, warn};

pub const ACTION_CREATE_INDEX: &str = "CREATE_INDEX";
pub const ACTION_ROLLBACK_INDEX: &str = "ROLLBACK_INDEX";
pub const ACTION_SKIP_INDEX: &str = "SKIP_INDEX";

/// Append-only audit trail. Every decision, rollback and gate veto lands in
/// `mutation_log`; the core never reads it back. Writes are best-effort.
pub struct AuditLog {
    pool: Pool<Postgres>,
}

impl AuditLog {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn emit(
        &self,
        action: &str,
        table: &str,
        field: Option<&str>,
        details: Value,
        severity: Severity,
    ) {
        match severity {
            Severity::Info => info!(action, table, field, "audit event"),
            Severity::Warning => warn!(action, table, field, "audit event"),
            Severity::Critical => error!(action, table, field, "audit event"),
        }

        const QUERY: &str = r#"
            INSERT INTO mutation_log (action, table_name, field_name, details, severity)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        if let Err(err) = sqlx::query(QUERY)
            .bind(action)
            .bind(table)
            .bind(field)
            .bind(&details)
            .bind(severity.as_str())
            .execute(&self.pool)
            .await
        {
            error!(action, table, "failed to write audit event: {err}");
        }
    }

    /// Record which advisor produced what, and whether the decision used it.
    pub async fn track_algorithm_usage(
        &self,
        table: &str,
        field: Option<&str>,
        algorithm: &str,
        recommendation: &Value,
        used_in_decision: bool,
    ) {
        const QUERY: &str = r#"
            INSERT INTO algorithm_usage
                (table_name, field_name, algorithm_name, recommendation_json, used_in_decision)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        if let Err(err) = sqlx::query(QUERY)
            .bind(table)
            .bind(field)
            .bind(algorithm)
            .bind(recommendation)
            .bind(used_in_decision)
            .execute(&self.pool)
            .await
        {
            warn!(table, algorithm, "could not track algorithm usage: {err}");
        }
    }
}
