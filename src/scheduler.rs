use crate::advisors::{self, AdvisorInputs};
use crate::audit::{self, AuditLog};
use crate::composite;
use crate::config::Mode;
use crate::core::Core;
use crate::cost;
use crate::decision::{self, CandidateFeatures};
use crate::fk;
use crate::hooks::{ApprovalRequest, Hooks, IndexDdl};
use crate::index_type;
use crate::models::{
    FieldUsage, IndexSpec, PatternShape, PlanComparison, PlanSummary, Severity, SizeClass,
    TableSizeInfo,
};
use crate::pattern;
use crate::plan;
use crate::probes;
use crate::stats;
use crate::workload;
use serde::Serialize;
use serde_json::json;
use sqlx::{Pool, Postgres};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    pub window_hours: u32,
    pub min_query_threshold: i64,
    pub mode: Option<Mode>,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            window_hours: 24,
            min_query_threshold: 100,
            mode: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub pass: PassOptions,
    pub max_per_batch: usize,
    pub max_batches: usize,
    pub inter_create_pause: Duration,
    pub inter_batch_pause: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedIndex {
    pub table: String,
    pub field: String,
    pub index_name: String,
    pub strategy: String,
    pub method: String,
    pub queries: i64,
    pub confidence: f64,
    pub reason: String,
    pub improvement_pct: Option<f64>,
    pub advisory: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    pub table: String,
    pub field: String,
    pub queries: i64,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PassSummary {
    pub created: Vec<AppliedIndex>,
    pub skipped: Vec<SkippedCandidate>,
}

enum Outcome {
    Applied(AppliedIndex),
    Skipped(String),
}

struct Candidate {
    usage: FieldUsage,
    is_foreign_key: bool,
}

/// Merge windowed usage with synthetic FK candidates; FK gaps that already
/// have real traffic just get flagged. Result is ordered by descending query
/// count, which fixes candidate priority for the whole pass.
fn merge_candidates(usages: Vec<FieldUsage>, fk_usages: Vec<FieldUsage>) -> Vec<Candidate> {
    let known: HashSet<(String, String)> = usages
        .iter()
        .map(|u| (u.table.clone(), u.field.clone()))
        .collect();
    let fk_keys: HashSet<(String, String)> = fk_usages
        .iter()
        .map(|u| (u.table.clone(), u.field.clone()))
        .collect();

    let mut candidates: Vec<Candidate> = usages
        .into_iter()
        .map(|usage| {
            let is_fk = fk_keys.contains(&(usage.table.clone(), usage.field.clone()));
            Candidate {
                usage,
                is_foreign_key: is_fk,
            }
        })
        .collect();
    for usage in fk_usages {
        if !known.contains(&(usage.table.clone(), usage.field.clone())) {
            candidates.push(Candidate {
                usage,
                is_foreign_key: true,
            });
        }
    }

    candidates.sort_by(|a, b| b.usage.total_queries.cmp(&a.usage.total_queries));
    candidates
}

/// Index names the existence check probes for, mirroring the generator's
/// naming scheme.
fn candidate_index_names(table: &str, field: &str, has_tenant: bool) -> Vec<String> {
    if has_tenant {
        vec![
            format!("idx_{table}_{field}_tenant"),
            format!("idx_{table}_{field}_partial_tenant"),
            format!("idx_{table}_{field}_lower_tenant"),
        ]
    } else {
        vec![
            format!("idx_{table}_{field}"),
            format!("idx_{table}_{field}_partial"),
            format!("idx_{table}_{field}_lower"),
        ]
    }
}

/// Projected index footprint: the larger of 10% of the table bytes and
/// 3e-5 MB per row.
pub fn projected_index_size_mb(size: &TableSizeInfo) -> f64 {
    let from_bytes = size.table_bytes as f64 * 0.1 / (1024.0 * 1024.0);
    let from_rows = size.row_count as f64 * 0.00003;
    from_bytes.max(from_rows)
}

/// The rollback predicate: union of measured regression, EXPLAIN-visible
/// cost increase, and an ineffective index that also measured worse.
pub fn should_rollback(
    improvement_pct: Option<f64>,
    comparison: Option<&PlanComparison>,
    effective: bool,
) -> Option<&'static str> {
    if let Some(improvement) = improvement_pct {
        if improvement < -10.0 {
            return Some("significant performance degradation");
        }
    }
    if let Some(comparison) = comparison {
        if comparison.cost_reduction_pct < -5.0 {
            return Some("EXPLAIN shows cost increase");
        }
    }
    if !effective {
        if let Some(improvement) = improvement_pct {
            if improvement < 0.0 {
                return Some("no performance improvement");
            }
        }
    }
    None
}

fn infer_shape(field_type: &str, null_ratio: f64) -> PatternShape {
    let lowered = field_type.to_lowercase();
    let is_text =
        lowered.contains("text") || lowered.contains("varchar") || lowered.contains("char");
    let is_temporal = ["timestamp", "date", "interval"]
        .iter()
        .any(|t| lowered.contains(t))
        || lowered == "time" || lowered == "timetz";
    let is_numeric = ["int", "numeric", "float", "double", "serial"]
        .iter()
        .any(|t| lowered.contains(t));

    PatternShape {
        has_exact: true,
        has_range: is_numeric || is_temporal,
        has_like: is_text,
        has_prefix: false,
        has_temporal: is_temporal,
        is_multi_dim: false,
        field_type: field_type.to_string(),
        null_ratio,
    }
}

/// Drives decision passes and batched schedules. One applier per driver
/// task; all registries live in [`Core`].
pub struct Applier<'a, D: IndexDdl> {
    pool: &'a Pool<Postgres>,
    core: &'a Core,
    hooks: &'a Hooks,
    audit: &'a AuditLog,
    ddl: &'a D,
}

impl<'a, D: IndexDdl> Applier<'a, D> {
    pub fn new(
        pool: &'a Pool<Postgres>,
        core: &'a Core,
        hooks: &'a Hooks,
        audit: &'a AuditLog,
        ddl: &'a D,
    ) -> Self {
        Self {
            pool,
            core,
            hooks,
            audit,
            ddl,
        }
    }

    fn mode(&self, opts: &PassOptions) -> Mode {
        opts.mode
            .unwrap_or(self.core.settings.features.auto_indexer.mode)
    }

    /// One full decision pass over the stats window.
    pub async fn run_pass(&self, opts: PassOptions) -> PassSummary {
        let mut summary = PassSummary::default();

        info!(window_hours = opts.window_hours, "analyzing query stats");
        let usages = match stats::field_usage(self.pool, opts.window_hours).await {
            Ok(usages) => usages,
            Err(err) => {
                warn!("could not read field usage: {err}");
                return summary;
            }
        };
        info!(patterns = usages.len(), "found field patterns to analyze");

        let fk_cfg = &self.core.settings.features.foreign_key_suggestions;
        let fk_usages = if fk_cfg.enabled {
            match fk::find_unindexed_foreign_keys(self.pool).await {
                Ok(gaps) => gaps.iter().map(|gap| fk::synthetic_usage(gap, fk_cfg)).collect(),
                Err(err) => {
                    debug!("could not scan foreign keys: {err}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let candidates = merge_candidates(usages, fk_usages);
        let mut tables_seen: Vec<String> = Vec::new();
        for candidate in &candidates {
            if !tables_seen.contains(&candidate.usage.table) {
                tables_seen.push(candidate.usage.table.clone());
            }
        }

        for candidate in candidates {
            let outcome = self.process_candidate(&candidate, &opts).await;
            match outcome {
                Outcome::Applied(applied) => summary.created.push(applied),
                Outcome::Skipped(reason) => {
                    self.emit_skip(&candidate.usage.table, &candidate.usage.field, &reason)
                        .await;
                    summary.skipped.push(SkippedCandidate {
                        table: candidate.usage.table.clone(),
                        field: candidate.usage.field.clone(),
                        queries: candidate.usage.total_queries,
                        reason,
                    });
                }
            }
        }

        for table in tables_seen {
            self.scan_composites(&table).await;
        }

        let auto_cfg = &self.core.settings.features.auto_indexer;
        if auto_cfg.explain_usage_tracking_enabled {
            let usage = self.core.explain_usage.stats();
            if usage.total_decisions > 0 {
                info!(
                    coverage = format!("{:.1}%", usage.coverage_pct),
                    used = usage.explain_used,
                    total = usage.total_decisions,
                    "EXPLAIN usage summary"
                );
                self.core
                    .explain_usage
                    .log_coverage_warning(auto_cfg.min_explain_coverage_pct);
            }
        }

        summary
    }

    /// Batched schedule: preferred-hours awareness, per-hour cap, pacing
    /// pauses, cancellation between candidates, never mid-create.
    pub async fn run_batch(&self, opts: BatchOptions, stop: &AtomicBool) -> PassSummary {
        let safeguards = &self.core.settings.features.safeguards;
        let mut summary = PassSummary::default();

        if !self.hooks.maintenance.is_open() {
            info!("running batch outside preferred hours");
        }

        let usages = match stats::field_usage(self.pool, opts.pass.window_hours).await {
            Ok(usages) => usages,
            Err(err) => {
                warn!("could not read field usage: {err}");
                return summary;
            }
        };
        let candidates: Vec<Candidate> = merge_candidates(usages, Vec::new())
            .into_iter()
            .filter(|c| c.usage.total_queries >= opts.pass.min_query_threshold)
            .collect();

        let mut created_this_hour = 0u32;
        let mut batches_run = 0usize;

        for batch in candidates.chunks(opts.max_per_batch.max(1)) {
            if batches_run >= opts.max_batches {
                break;
            }
            if stop.load(Ordering::Relaxed) {
                info!("batch schedule cancelled between batches");
                break;
            }

            for candidate in batch {
                if stop.load(Ordering::Relaxed) {
                    info!("batch schedule cancelled between candidates");
                    return summary;
                }
                if created_this_hour >= safeguards.max_indexes_per_hour {
                    summary.skipped.push(SkippedCandidate {
                        table: candidate.usage.table.clone(),
                        field: candidate.usage.field.clone(),
                        queries: candidate.usage.total_queries,
                        reason: format!(
                            "rate_limit_exceeded (hourly cap {} reached)",
                            safeguards.max_indexes_per_hour
                        ),
                    });
                    continue;
                }

                match self.process_candidate(candidate, &opts.pass).await {
                    Outcome::Applied(applied) => {
                        if !applied.advisory {
                            created_this_hour += 1;
                            tokio::time::sleep(opts.inter_create_pause).await;
                        }
                        summary.created.push(applied);
                    }
                    Outcome::Skipped(reason) => {
                        self.emit_skip(&candidate.usage.table, &candidate.usage.field, &reason)
                            .await;
                        summary.skipped.push(SkippedCandidate {
                            table: candidate.usage.table.clone(),
                            field: candidate.usage.field.clone(),
                            queries: candidate.usage.total_queries,
                            reason,
                        });
                    }
                }
            }

            batches_run += 1;
            if batches_run < opts.max_batches {
                tokio::time::sleep(opts.inter_batch_pause).await;
            }
        }

        summary
    }

    async fn process_candidate(&self, candidate: &Candidate, opts: &PassOptions) -> Outcome {
        let auto_cfg = &self.core.settings.features.auto_indexer;
        let safeguards = &self.core.settings.features.safeguards;
        let usage = &candidate.usage;
        let total_queries = usage.total_queries;

        // Identifier validation comes first; nothing unvalidated reaches SQL.
        let table = match self.core.validator.validate_table(&usage.table) {
            Ok(table) => table.to_string(),
            Err(err) => {
                debug!("skipping candidate: {err}");
                return Outcome::Skipped("validation_failed".to_string());
            }
        };
        let field = match self
            .core
            .validator
            .validate_field(&usage.field, Some(&table))
        {
            Ok(field) => field.to_string(),
            Err(err) => {
                debug!("skipping candidate: {err}");
                return Outcome::Skipped("validation_failed".to_string());
            }
        };

        let has_tenant = self.core.tenant_cache.has_tenant_field(self.pool, &table).await;
        let names = candidate_index_names(&table, &field, has_tenant);
        if probes::index_exists_for_field(self.pool, &table, &names, &field).await {
            return Outcome::Skipped("already_exists".to_string());
        }

        let size = stats::table_size_info(self.pool, &table).await;
        let size_class = size.size_class(
            auto_cfg.small_table_row_count,
            auto_cfg.medium_table_row_count,
        );

        // Write guard: projected write amplification against the class cap.
        let index_count = probes::index_count(self.pool, &table).await;
        let write_overhead = self
            .hooks
            .write_monitor
            .estimated_write_overhead(&table, index_count + 1);
        let overhead_cap = match size_class {
            SizeClass::Small => safeguards.max_write_overhead_small,
            SizeClass::Medium => safeguards.max_write_overhead_medium,
            SizeClass::Large => safeguards.max_write_overhead_large,
        };
        if write_overhead > overhead_cap {
            return Outcome::Skipped(format!(
                "write_performance_limit_exceeded (estimated {:.0}%, max {:.0}%)",
                write_overhead * 100.0,
                overhead_cap * 100.0
            ));
        }

        // Pattern gate, with a spike alert on the monitoring sink.
        let (pattern_ok, pattern_reason) = pattern::should_create_from_pattern(
            self.pool,
            &self.core.settings.features.pattern_detection,
            self.hooks.monitoring.as_ref(),
            &table,
            &field,
            total_queries,
            Some(opts.window_hours),
        )
        .await;
        if !pattern_ok {
            return Outcome::Skipped(pattern_reason);
        }

        // Rate limiter, keyed per table.
        let rate = self.hooks.rate_limiter.check(&table);
        if !rate.allowed {
            return Outcome::Skipped(format!(
                "rate_limit_exceeded (retry after {:.1}s)",
                rate.retry_after_secs
            ));
        }

        // Maintenance window: skip when the wait would exceed the budget.
        if !self.hooks.maintenance.is_open() {
            let wait = self.hooks.maintenance.seconds_until_open();
            if wait > auto_cfg.max_wait_for_maintenance_window {
                return Outcome::Skipped(format!(
                    "outside_maintenance_window (wait {:.1}h)",
                    wait as f64 / 3600.0
                ));
            }
            info!(table, field, wait, "proceeding outside maintenance window");
        }

        // Size-class query-volume threshold and overhead ceiling.
        let (class_threshold, class_overhead_cap) = match size_class {
            SizeClass::Small => (
                auto_cfg.small_table_min_queries_per_hour as i64,
                auto_cfg.small_table_max_index_overhead_pct,
            ),
            SizeClass::Medium => (
                opts.min_query_threshold,
                auto_cfg.medium_table_max_index_overhead_pct,
            ),
            SizeClass::Large => (opts.min_query_threshold / 2, 80.0),
        };
        if total_queries < class_threshold {
            return Outcome::Skipped(format!(
                "below_size_based_threshold (required: {class_threshold}, size_category: {})",
                size_class.as_str()
            ));
        }
        if size.index_overhead_pct >= class_overhead_cap {
            return Outcome::Skipped(format!(
                "index_overhead_limit_exceeded (current: {:.1}%, max: {:.1}%)",
                size.index_overhead_pct, class_overhead_cap
            ));
        }

        // Feature probes: selectivity, shape, distribution, workload.
        let selectivity =
            probes::field_selectivity(self.pool, &table, &field, true).await;
        let field_type = probes::field_type(self.pool, &table, &field)
            .await
            .unwrap_or_else(|| "text".to_string());
        let null_ratio = probes::null_ratio(self.pool, &table, &field).await;
        let mut shape = infer_shape(&field_type, null_ratio);
        let distribution = probes::field_distribution(self.pool, &table, &field).await;
        let string_stats = if shape.has_like {
            Some(probes::string_stats(self.pool, &table, &field).await)
        } else {
            None
        };
        let workload_profile = workload::profile_for_table(
            self.pool,
            &self.core.settings.features.workload_analysis,
            &table,
        )
        .await;

        let fields = vec![field.clone()];
        let field_types = vec![field_type.clone()];

        // Temporal confirmation feeds back into the shape before scoring.
        let temporal = {
            let inputs = AdvisorInputs {
                table: &table,
                fields: &fields,
                shape: &shape,
                size: &size,
                workload: &workload_profile,
                distribution: &distribution,
                string_stats: string_stats.as_ref(),
                field_types: &field_types,
            };
            pattern::detect_temporal(&self.core.settings.features, self.audit, &inputs).await
        };
        if temporal.should_use {
            shape.has_temporal = true;
        }

        let inputs = AdvisorInputs {
            table: &table,
            fields: &fields,
            shape: &shape,
            size: &size,
            workload: &workload_profile,
            distribution: &distribution,
            string_stats: string_stats.as_ref(),
            field_types: &field_types,
        };
        let verdicts = advisors::evaluate_all(&self.core.settings.features, &inputs);
        for verdict in &verdicts {
            let recommendation = serde_json::to_value(verdict).unwrap_or(serde_json::Value::Null);
            self.audit
                .track_algorithm_usage(
                    &table,
                    Some(&field),
                    verdict.algorithm.as_str(),
                    &recommendation,
                    verdict.should_use,
                )
                .await;
        }

        // Preliminary index shape, then costs against the sample plan. A
        // representative tenant makes the probe match real traffic.
        let tenant_hint = stats::query_stats(self.pool, opts.window_hours, Some(&table), Some(&field))
            .await
            .ok()
            .and_then(|rows| rows.first().and_then(|row| row.tenant_id));
        let sample_query = probes::sample_query_for_field(
            self.pool,
            &self.core.tenant_cache,
            &table,
            &field,
            tenant_hint,
        )
        .await;
        let before_plan = match (&sample_query, auto_cfg.use_real_query_plans) {
            (Some(query), true) => {
                let fast = plan::explain_fast(self.pool, query).await;
                match fast {
                    Some(plan) if plan.total_cost > 0.0 => Some(plan),
                    _ => plan::explain_analyze(self.pool, query).await,
                }
            }
            _ => None,
        };
        if auto_cfg.explain_usage_tracking_enabled {
            let used = before_plan.is_some();
            let successful = before_plan
                .as_ref()
                .map(|p| p.total_cost > 0.0)
                .unwrap_or(false);
            // Build-cost and query-cost estimation both consult the plan.
            self.core.explain_usage.record(used, successful);
            self.core.explain_usage.record(used, successful);
        }

        let (method, _type_confidence, type_reason) = index_type::select_access_method(
            auto_cfg,
            &field_type,
            &shape,
            before_plan.as_ref(),
        );
        let strategy = index_type::choose_strategy(&shape, size_class, has_tenant);
        let spec = index_type::build_spec(
            &table,
            &field,
            method,
            strategy,
            has_tenant,
            candidate.is_foreign_key,
        );
        if let Err(err) = index_type::parse_index_sql(&spec.sql) {
            warn!(index = %spec.name, "generated DDL failed to parse: {err}");
            return Outcome::Skipped("validation_failed".to_string());
        }

        let build_cost =
            cost::estimate_build_cost(auto_cfg, size.row_count, strategy, before_plan.as_ref());
        let query_cost = cost::estimate_query_cost(
            auto_cfg,
            size.row_count,
            before_plan.as_ref(),
            Some(selectivity),
        );

        let features = CandidateFeatures {
            table: &table,
            field: &field,
            usage,
            size: &size,
            workload: &workload_profile,
            selectivity: Some(selectivity),
            build_cost,
            query_cost_without_index: query_cost,
            pattern_ok,
            pattern_reason: &pattern_reason,
            is_foreign_key: candidate.is_foreign_key,
            current_index_count: index_count,
            max_indexes_per_table: safeguards.max_indexes_per_table,
            projected_index_size_mb: projected_index_size_mb(&size),
            storage_used_mb: self.hooks.storage.used_mb(),
            storage_budget_mb: self.hooks.storage.budget_mb(),
        };
        let decision = decision::fuse(auto_cfg, &features);

        if !decision.create {
            return Outcome::Skipped(decision.reason);
        }

        // The rolling duration threshold adapts to what this deployment
        // considers slow; downstream dashboards read it from the audit trail.
        let adaptive_slow_ms =
            self.core
                .thresholds
                .update("candidate_avg_duration_ms", usage.avg_duration_ms, 0.95);

        let details = json!({
            "index_name": spec.name,
            "index_type": strategy.as_str(),
            "access_method": method.as_str(),
            "type_selection": type_reason,
            "index_sql": spec.sql,
            "build_cost_estimate": build_cost,
            "queries_analyzed": total_queries,
            "query_cost_without_index": query_cost,
            "row_count": size.row_count,
            "field_selectivity": selectivity,
            "confidence": decision.confidence,
            "reason": decision.reason,
            "workload": workload_profile.kind.as_str(),
            "write_overhead_estimate": write_overhead,
            "adaptive_slow_query_ms": adaptive_slow_ms,
            "advisors": verdicts
                .iter()
                .filter(|v| v.should_use)
                .map(|v| v.algorithm.as_str())
                .collect::<Vec<_>>(),
        });

        if self.mode(opts).is_advisory() {
            let mut details = details;
            details["mode"] = json!("advisory");
            info!(
                index = %spec.name,
                confidence = format!("{:.2}", decision.confidence),
                "[ADVISORY] candidate index"
            );
            self.audit
                .emit(
                    audit::ACTION_CREATE_INDEX,
                    &table,
                    Some(&field),
                    details,
                    Severity::Info,
                )
                .await;
            return Outcome::Applied(AppliedIndex {
                table,
                field,
                index_name: spec.name,
                strategy: strategy.as_str().to_string(),
                method: method.as_str().to_string(),
                queries: total_queries,
                confidence: decision.confidence,
                reason: decision.reason,
                improvement_pct: None,
                advisory: true,
            });
        }

        self.apply_candidate(
            candidate,
            opts,
            spec,
            decision.confidence,
            decision.reason,
            details,
            before_plan,
            sample_query,
            &size,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_candidate(
        &self,
        candidate: &Candidate,
        _opts: &PassOptions,
        spec: IndexSpec,
        confidence: f64,
        reason: String,
        mut details: serde_json::Value,
        before_plan: Option<PlanSummary>,
        sample_query: Option<String>,
        size: &TableSizeInfo,
    ) -> Outcome {
        let auto_cfg = &self.core.settings.features.auto_indexer;
        let safeguards = &self.core.settings.features.safeguards;
        let table = spec.table.clone();
        let field = spec.field.clone();

        // Storage budget.
        let projected_mb = projected_index_size_mb(size);
        let budget = self.hooks.storage.check(None, projected_mb);
        if !budget.allowed {
            warn!(index = %spec.name, reason = %budget.reason, "storage budget veto");
            return Outcome::Skipped("storage_budget_exceeded".to_string());
        }
        if budget.warning {
            warn!(index = %spec.name, "storage budget warning: {}", budget.reason);
        }

        // Approval workflow.
        let approval = self.hooks.approvals.request(&ApprovalRequest {
            index_name: spec.name.clone(),
            table: table.clone(),
            field: field.clone(),
            sql: spec.sql.clone(),
            reason: reason.clone(),
            confidence,
            tenant_id: None,
        });
        if !approval.approved {
            info!(
                index = %spec.name,
                request = %approval.request_id,
                "index requires approval"
            );
            return Outcome::Skipped("awaiting_approval".to_string());
        }

        // Circuit breaker, keyed by table.
        let breaker_key = format!("index_creation_{table}");
        if !self.core.breakers.can_proceed(&breaker_key) {
            warn!(
                breaker = %breaker_key,
                state = self.core.breakers.state(&breaker_key).as_str(),
                "circuit breaker open, skipping creation"
            );
            return Outcome::Skipped("circuit_breaker_open".to_string());
        }

        // Optional canary registration.
        let canary_cfg = &self.core.settings.features.canary_deployment;
        if canary_cfg.enabled {
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            self.core.canaries.create(
                &format!("{}_{epoch}", spec.name),
                &spec.name,
                &table,
                canary_cfg.canary_pct,
                canary_cfg.success_threshold,
                canary_cfg.min_samples,
            );
        }

        // Before measurement for the rollback comparison.
        let before_perf = match &sample_query {
            Some(query) => plan::measure(self.pool, query, auto_cfg.sample_query_runs).await,
            None => None,
        };

        info!(
            index = %spec.name,
            confidence = format!("{confidence:.2}"),
            "creating index"
        );
        let created = self
            .ddl
            .create_index(
                &table,
                &field,
                &spec.sql,
                safeguards.create_timeout_secs,
                true,
            )
            .await;

        match created {
            Ok(true) => {}
            Ok(false) => {
                self.core.breakers.record_failure(&breaker_key);
                return Outcome::Skipped("cpu_throttled".to_string());
            }
            Err(err) => {
                self.core.breakers.record_failure(&breaker_key);
                self.hooks.monitoring.alert(
                    Severity::Warning,
                    &format!("Failed to create index {}: {err}", spec.name),
                );
                let reason = format!("creation_failed: {err}");
                return Outcome::Skipped(reason);
            }
        }
        self.core.breakers.record_success(&breaker_key);
        self.hooks.storage.record_usage(projected_mb);

        // After measurement: plans and wall-clock, then the rollback rule.
        let after_plan = match &sample_query {
            Some(query) => plan::explain_fast(self.pool, query).await,
            None => None,
        };
        let comparison = match (&before_plan, &after_plan) {
            (Some(before), Some(after)) => Some(plan::compare_before_after(before, after)),
            _ => None,
        };
        let after_perf = match &sample_query {
            Some(query) => plan::measure(self.pool, query, auto_cfg.sample_query_runs).await,
            None => None,
        };
        let improvement_pct = match (&before_perf, &after_perf) {
            (Some(before), Some(after)) if before.median_ms > 0.0 => {
                Some((before.median_ms - after.median_ms) / before.median_ms * 100.0)
            }
            _ => None,
        };
        let effective = comparison
            .as_ref()
            .map(|c| c.effective(auto_cfg.min_improvement_pct))
            .unwrap_or_else(|| {
                improvement_pct
                    .map(|imp| imp >= auto_cfg.min_improvement_pct)
                    .unwrap_or(true)
            });

        if let Some(imp) = improvement_pct {
            if imp < auto_cfg.min_improvement_pct {
                warn!(
                    index = %spec.name,
                    improvement = format!("{imp:.1}%"),
                    threshold = format!("{:.1}%", auto_cfg.min_improvement_pct),
                    "index improvement below threshold"
                );
            }
        }

        if let Some(rollback_reason) = should_rollback(improvement_pct, comparison.as_ref(), effective)
        {
            warn!(index = %spec.name, reason = rollback_reason, "index will be rolled back");
            if self.core.settings.features.auto_rollback.enabled {
                match self.ddl.drop_index(&spec.name).await {
                    Ok(()) => {
                        self.core.breakers.record_failure(&breaker_key);
                        self.audit
                            .emit(
                                audit::ACTION_ROLLBACK_INDEX,
                                &table,
                                Some(&field),
                                json!({
                                    "index_name": spec.name,
                                    "reason": rollback_reason,
                                    "improvement_pct": improvement_pct,
                                    "cost_reduction_pct": comparison
                                        .as_ref()
                                        .map(|c| c.cost_reduction_pct),
                                }),
                                Severity::Warning,
                            )
                            .await;
                        return Outcome::Skipped(format!("rolled_back: {rollback_reason}"));
                    }
                    Err(err) => {
                        warn!(index = %spec.name, "failed to roll back index: {err}");
                    }
                }
            }
        }

        details["mode"] = json!("apply");
        details["before_perf_ms"] = json!(before_perf.map(|p| p.median_ms));
        details["after_perf_ms"] = json!(after_perf.map(|p| p.median_ms));
        details["improvement_pct"] = json!(improvement_pct);
        self.audit
            .emit(
                audit::ACTION_CREATE_INDEX,
                &table,
                Some(&field),
                details,
                Severity::Info,
            )
            .await;

        Outcome::Applied(AppliedIndex {
            table,
            field,
            index_name: spec.name,
            strategy: spec.strategy.as_str().to_string(),
            method: spec.method.as_str().to_string(),
            queries: candidate.usage.total_queries,
            confidence,
            reason,
            improvement_pct,
            advisory: false,
        })
    }

    /// Composite opportunities per table are reported, never auto-created.
    async fn scan_composites(&self, table: &str) {
        let features = &self.core.settings.features;
        let candidates = composite::detect_opportunities(
            self.pool,
            &features.composite_index_detection,
            &features.cortex,
            &self.core.tenant_cache,
            self.audit,
            table,
        )
        .await;

        for candidate in candidates {
            // Multi-dimensional confirmation records the advisor verdict too.
            let pair = vec![candidate.first_field.clone(), candidate.second_field.clone()];
            let shape = PatternShape {
                has_exact: true,
                is_multi_dim: true,
                ..Default::default()
            };
            let size = stats::table_size_info(self.pool, table).await;
            let workload_profile = workload::profile_for_table(
                self.pool,
                &features.workload_analysis,
                table,
            )
            .await;
            let distribution = Default::default();
            let field_types = vec![String::new(), String::new()];
            let inputs = AdvisorInputs {
                table,
                fields: &pair,
                shape: &shape,
                size: &size,
                workload: &workload_profile,
                distribution: &distribution,
                string_stats: None,
                field_types: &field_types,
            };
            let verdict =
                pattern::detect_multi_dimensional(features, self.audit, &inputs).await;

            self.audit
                .emit(
                    audit::ACTION_CREATE_INDEX,
                    table,
                    None,
                    json!({
                        "index_name": candidate.index_name,
                        "index_type": "multi_column",
                        "index_sql": candidate.index_sql,
                        "fields": pair,
                        "current_cost": candidate.current_cost,
                        "correlation": candidate.correlation,
                        "co_usage_count": candidate.co_usage_count,
                        "multi_dimensional": verdict.should_use,
                        "mode": "advisory",
                    }),
                    Severity::Info,
                )
                .await;
        }
    }

    async fn emit_skip(&self, table: &str, field: &str, reason: &str) {
        self.audit
            .emit(
                audit::ACTION_SKIP_INDEX,
                table,
                Some(field),
                json!({ "reason": reason }),
                Severity::Info,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryKind;

    fn usage(table: &str, field: &str, queries: i64) -> FieldUsage {
        let mut usage = FieldUsage {
            table: table.into(),
            field: field.into(),
            total_queries: queries,
            ..Default::default()
        };
        usage.by_kind.insert(QueryKind::Select, queries);
        usage
    }

    #[test]
    fn merge_orders_by_descending_queries() {
        let merged = merge_candidates(
            vec![usage("a", "x", 10), usage("b", "y", 500), usage("c", "z", 50)],
            Vec::new(),
        );
        let order: Vec<i64> = merged.iter().map(|c| c.usage.total_queries).collect();
        assert_eq!(order, vec![500, 50, 10]);
    }

    #[test]
    fn merge_flags_existing_usage_as_foreign_key() {
        let merged = merge_candidates(
            vec![usage("posts", "author_id", 40)],
            vec![usage("posts", "author_id", 1000)],
        );
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_foreign_key);
        // Real traffic wins over the synthetic weight.
        assert_eq!(merged[0].usage.total_queries, 40);
    }

    #[test]
    fn merge_appends_synthetic_fk_candidates() {
        let merged = merge_candidates(
            vec![usage("orders", "status", 40)],
            vec![usage("posts", "author_id", 1000)],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].usage.table, "posts");
        assert!(merged[0].is_foreign_key);
        assert!(!merged[1].is_foreign_key);
    }

    #[test]
    fn candidate_names_cover_tenant_variants() {
        assert_eq!(
            candidate_index_names("orders", "status", false),
            vec![
                "idx_orders_status",
                "idx_orders_status_partial",
                "idx_orders_status_lower",
            ]
        );
        assert_eq!(
            candidate_index_names("orders", "status", true)[0],
            "idx_orders_status_tenant"
        );
    }

    #[test]
    fn projected_size_takes_max_of_both_estimates() {
        // 100 MB table -> 10 MB from bytes; 1M rows -> 30 MB from rows.
        let size = TableSizeInfo::new(1_000_000, 100 * 1024 * 1024, 0);
        assert!((projected_index_size_mb(&size) - 30.0).abs() < 1e-9);
        // Small row count, big rows: byte estimate dominates.
        let wide = TableSizeInfo::new(1000, 200 * 1024 * 1024, 0);
        assert!((projected_index_size_mb(&wide) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rollback_fires_on_measured_regression() {
        // Before median 80ms, after 120ms: improvement -50%.
        let reason = should_rollback(Some(-50.0), None, false);
        assert_eq!(reason, Some("significant performance degradation"));
    }

    #[test]
    fn rollback_fires_on_explain_cost_increase() {
        let comparison = PlanComparison {
            cost_reduction_pct: -8.0,
            ..Default::default()
        };
        let reason = should_rollback(Some(-3.0), Some(&comparison), false);
        assert_eq!(reason, Some("EXPLAIN shows cost increase"));
    }

    #[test]
    fn rollback_fires_when_ineffective_and_worse() {
        let comparison = PlanComparison {
            cost_reduction_pct: 1.0,
            ..Default::default()
        };
        let reason = should_rollback(Some(-2.0), Some(&comparison), false);
        assert_eq!(reason, Some("no performance improvement"));
    }

    #[test]
    fn no_rollback_for_effective_improvement() {
        let comparison = PlanComparison {
            cost_reduction_pct: 60.0,
            time_reduction_pct: 40.0,
            significant: true,
            ..Default::default()
        };
        assert_eq!(should_rollback(Some(35.0), Some(&comparison), true), None);
    }

    #[test]
    fn ineffective_but_not_worse_is_kept() {
        // Below threshold yet non-negative: warn and keep.
        assert_eq!(should_rollback(Some(5.0), None, false), None);
    }

    #[test]
    fn shape_inference_follows_field_type() {
        let text = infer_shape("varchar", 0.1);
        assert!(text.has_like && !text.has_range);

        let numeric = infer_shape("int8", 0.0);
        assert!(numeric.has_range && !numeric.has_like);

        let temporal = infer_shape("timestamptz", 0.0);
        assert!(temporal.has_temporal && temporal.has_range);
    }
}
