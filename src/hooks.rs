use crate::config::SafeguardCfg;
use crate::models::Severity;
use snafu::{ResultExt, Snafu};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

#[derive(Debug, Snafu)]
pub enum DdlError {
    #[snafu(display("Failed to acquire connection: {}", source))]
    Acquire { source: sqlx::Error },

    #[snafu(display("Index DDL failed: {}", source))]
    Execute { source: sqlx::Error },

    #[snafu(display("Index DDL timed out after {}s", timeout_secs))]
    Timeout { timeout_secs: u64 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ThrottleDecision {
    pub throttle: bool,
    pub reason: String,
    pub wait_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub warning: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub index_name: String,
    pub table: String,
    pub field: String,
    pub sql: String,
    pub reason: String,
    pub confidence: f64,
    pub tenant_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub request_id: String,
}

/// Per-table creation rate limiting.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;
}

/// Host CPU pressure gate; the DDL executor respects the same flag.
pub trait CpuThrottle: Send + Sync {
    fn should_throttle(&self) -> ThrottleDecision;
}

/// Maintenance-window gate for disruptive operations.
pub trait MaintenanceWindow: Send + Sync {
    fn is_open(&self) -> bool;
    fn seconds_until_open(&self) -> u64;
}

/// Storage budget for projected index growth.
pub trait StorageBudget: Send + Sync {
    fn check(&self, tenant_id: Option<i64>, estimated_mb: f64) -> BudgetDecision;
    fn record_usage(&self, mb: f64);
    fn used_mb(&self) -> f64;
    fn budget_mb(&self) -> f64;
}

/// Approval workflow; apply mode consults it before any DDL.
pub trait ApprovalService: Send + Sync {
    fn request(&self, request: &ApprovalRequest) -> ApprovalOutcome;
}

/// Write-amplification estimate for a table with the given index count.
pub trait WritePerfMonitor: Send + Sync {
    fn estimated_write_overhead(&self, table: &str, index_count: i64) -> f64;
}

/// Alerting sink; the core only pushes, never queries.
pub trait MonitoringSink: Send + Sync {
    fn alert(&self, severity: Severity, message: &str);
}

/// Lock-managed index DDL. `create_index` returns Ok(false) when the CPU
/// throttle refused the operation.
#[allow(async_fn_in_trait)]
pub trait IndexDdl {
    async fn create_index(
        &self,
        table: &str,
        field: &str,
        sql: &str,
        timeout_secs: u64,
        respect_cpu_throttle: bool,
    ) -> Result<bool, DdlError>;

    async fn drop_index(&self, index_name: &str) -> Result<(), DdlError>;
}

/// Fixed-window per-key rate limiter.
pub struct FixedWindowRateLimiter {
    per_window: u32,
    window: Duration,
    counts: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowRateLimiter {
    pub fn new(per_window: u32, window: Duration) -> Self {
        Self {
            per_window,
            window,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check(&self, key: &str) -> RateDecision {
        let mut counts = self.counts.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let entry = counts.entry(key.to_string()).or_insert((now, 0));

        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.per_window {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(entry.0))
                .as_secs_f64();
            return RateDecision {
                allowed: false,
                retry_after_secs: retry_after,
            };
        }
        entry.1 += 1;
        RateDecision {
            allowed: true,
            retry_after_secs: 0.0,
        }
    }
}

/// Loadavg-based throttle: refuse index builds when the 1-minute load per
/// core exceeds the threshold. Unreadable loadavg means no throttling.
pub struct LoadAvgThrottle {
    threshold_per_core: f64,
}

impl LoadAvgThrottle {
    pub fn new(threshold_per_core: f64) -> Self {
        Self { threshold_per_core }
    }

    fn load_per_core(&self) -> Option<f64> {
        let content = std::fs::read_to_string("/proc/loadavg").ok()?;
        let load1: f64 = content.split_whitespace().next()?.parse().ok()?;
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        Some(load1 / cores)
    }
}

impl CpuThrottle for LoadAvgThrottle {
    fn should_throttle(&self) -> ThrottleDecision {
        match self.load_per_core() {
            Some(load) if load > self.threshold_per_core => ThrottleDecision {
                throttle: true,
                reason: format!(
                    "load {load:.2} per core above threshold {:.2}",
                    self.threshold_per_core
                ),
                wait_secs: 30.0,
            },
            _ => ThrottleDecision::default(),
        }
    }
}

/// Wall-clock maintenance window over UTC hours `[start, end)`.
pub struct ClockMaintenanceWindow {
    start_hour: u32,
    end_hour: u32,
}

impl ClockMaintenanceWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour: start_hour % 24,
            end_hour: end_hour % 24,
        }
    }

    fn seconds_of_day() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() % 86_400)
            .unwrap_or(0)
    }

    fn open_at(&self, seconds_of_day: u64) -> bool {
        let hour = (seconds_of_day / 3600) as u32;
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Window wraps midnight.
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    fn wait_from(&self, seconds_of_day: u64) -> u64 {
        if self.open_at(seconds_of_day) {
            return 0;
        }
        let start = self.start_hour as u64 * 3600;
        if seconds_of_day < start {
            start - seconds_of_day
        } else {
            86_400 - seconds_of_day + start
        }
    }
}

impl MaintenanceWindow for ClockMaintenanceWindow {
    fn is_open(&self) -> bool {
        self.open_at(Self::seconds_of_day())
    }

    fn seconds_until_open(&self) -> u64 {
        self.wait_from(Self::seconds_of_day())
    }
}

/// A window that is always open; advisory runs and tests use it.
pub struct AlwaysOpenWindow;

impl MaintenanceWindow for AlwaysOpenWindow {
    fn is_open(&self) -> bool {
        true
    }

    fn seconds_until_open(&self) -> u64 {
        0
    }
}

/// Global storage budget with an internal usage counter.
pub struct FixedStorageBudget {
    budget_mb: f64,
    used_mb: Mutex<f64>,
}

impl FixedStorageBudget {
    pub fn new(budget_mb: f64) -> Self {
        Self {
            budget_mb,
            used_mb: Mutex::new(0.0),
        }
    }
}

impl StorageBudget for FixedStorageBudget {
    fn check(&self, _tenant_id: Option<i64>, estimated_mb: f64) -> BudgetDecision {
        let used = *self.used_mb.lock().expect("storage budget lock poisoned");
        let projected = used + estimated_mb;
        if projected > self.budget_mb {
            BudgetDecision {
                allowed: false,
                warning: false,
                reason: format!(
                    "projected {projected:.0} MB exceeds budget {:.0} MB",
                    self.budget_mb
                ),
            }
        } else if projected > self.budget_mb * 0.8 {
            BudgetDecision {
                allowed: true,
                warning: true,
                reason: "approaching storage budget".to_string(),
            }
        } else {
            BudgetDecision {
                allowed: true,
                warning: false,
                reason: String::new(),
            }
        }
    }

    fn record_usage(&self, mb: f64) {
        *self.used_mb.lock().expect("storage budget lock poisoned") += mb;
    }

    fn used_mb(&self) -> f64 {
        *self.used_mb.lock().expect("storage budget lock poisoned")
    }

    fn budget_mb(&self) -> f64 {
        self.budget_mb
    }
}

/// Approval service that approves everything immediately. Deployments with a
/// human-in-the-loop plug in their own implementation.
pub struct AutoApprove;

impl ApprovalService for AutoApprove {
    fn request(&self, request: &ApprovalRequest) -> ApprovalOutcome {
        debug!(index = %request.index_name, "auto-approving index request");
        ApprovalOutcome {
            approved: true,
            request_id: format!("auto_{}", request.index_name),
        }
    }
}

/// Write-overhead estimate: each additional index adds roughly 5% write
/// amplification.
pub struct IndexCountWriteMonitor;

impl WritePerfMonitor for IndexCountWriteMonitor {
    fn estimated_write_overhead(&self, _table: &str, index_count: i64) -> f64 {
        (index_count.max(0) as f64 * 0.05).min(1.0)
    }
}

/// Monitoring sink backed by the log pipeline.
pub struct TracingMonitoringSink;

impl MonitoringSink for TracingMonitoringSink {
    fn alert(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "monitoring", "{message}"),
            Severity::Warning => warn!(target: "monitoring", "{message}"),
            Severity::Critical => error!(target: "monitoring", "{message}"),
        }
    }
}

/// Lock-managed DDL executor: bounded statement timeout, CPU-throttle
/// respect, concurrent create/drop variants only.
pub struct LockManagedDdl {
    pool: Pool<Postgres>,
    throttle: Arc<dyn CpuThrottle>,
}

impl LockManagedDdl {
    pub fn new(pool: Pool<Postgres>, throttle: Arc<dyn CpuThrottle>) -> Self {
        Self { pool, throttle }
    }
}

impl IndexDdl for LockManagedDdl {
    async fn create_index(
        &self,
        table: &str,
        field: &str,
        sql: &str,
        timeout_secs: u64,
        respect_cpu_throttle: bool,
    ) -> Result<bool, DdlError> {
        if respect_cpu_throttle {
            let decision = self.throttle.should_throttle();
            if decision.throttle {
                warn!(table, field, reason = %decision.reason, "index creation throttled");
                return Ok(false);
            }
        }

        let mut conn = self.pool.acquire().await.context(AcquireSnafu)?;
        sqlx::query(&format!("SET statement_timeout = {}", timeout_secs * 1000))
            .execute(&mut *conn)
            .await
            .context(ExecuteSnafu)?;

        // Concurrent builds must run outside a transaction; plain execute on
        // a dedicated connection satisfies that.
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs + 5),
            sqlx::query(sql).execute(&mut *conn),
        )
        .await;

        let _ = sqlx::query("SET statement_timeout = DEFAULT")
            .execute(&mut *conn)
            .await;

        match outcome {
            Err(_) => Err(DdlError::Timeout { timeout_secs }),
            Ok(Err(source)) => Err(DdlError::Execute { source }),
            Ok(Ok(_)) => {
                info!(table, field, "index created");
                Ok(true)
            }
        }
    }

    async fn drop_index(&self, index_name: &str) -> Result<(), DdlError> {
        let sql = format!("DROP INDEX CONCURRENTLY IF EXISTS \"{index_name}\"");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .context(ExecuteSnafu)?;
        Ok(())
    }
}

/// Host gate bundle wired from configuration.
pub struct Hooks {
    pub rate_limiter: Box<dyn RateLimiter>,
    pub cpu: Arc<dyn CpuThrottle>,
    pub maintenance: Box<dyn MaintenanceWindow>,
    pub storage: Box<dyn StorageBudget>,
    pub approvals: Box<dyn ApprovalService>,
    pub write_monitor: Box<dyn WritePerfMonitor>,
    pub monitoring: Box<dyn MonitoringSink>,
}

impl Hooks {
    pub fn host_defaults(cfg: &SafeguardCfg) -> Self {
        Self {
            rate_limiter: Box::new(FixedWindowRateLimiter::new(
                cfg.rate_limit_per_table_per_hour,
                Duration::from_secs(3600),
            )),
            cpu: Arc::new(LoadAvgThrottle::new(cfg.cpu_load_threshold)),
            maintenance: Box::new(ClockMaintenanceWindow::new(
                cfg.preferred_hours_start,
                cfg.preferred_hours_end,
            )),
            storage: Box::new(FixedStorageBudget::new(cfg.storage_budget_mb)),
            approvals: Box::new(AutoApprove),
            write_monitor: Box::new(IndexCountWriteMonitor),
            monitoring: Box::new(TracingMonitoringSink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_after_budget_and_reports_retry() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_secs(3600));
        assert!(limiter.check("orders").allowed);
        assert!(limiter.check("orders").allowed);
        let blocked = limiter.check("orders");
        assert!(!blocked.allowed);
        assert!(blocked.retry_after_secs > 0.0);
        // Other keys have their own bucket.
        assert!(limiter.check("users").allowed);
    }

    #[test]
    fn rate_limiter_resets_after_window() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::ZERO);
        assert!(limiter.check("orders").allowed);
        // Zero-length window: the next check starts a fresh bucket.
        assert!(limiter.check("orders").allowed);
    }

    #[test]
    fn maintenance_window_hour_math() {
        let window = ClockMaintenanceWindow::new(2, 6);
        assert!(window.open_at(2 * 3600));
        assert!(window.open_at(5 * 3600 + 3599));
        assert!(!window.open_at(6 * 3600));
        assert!(!window.open_at(1 * 3600));
        // One hour before opening.
        assert_eq!(window.wait_from(3600), 3600);
        // After close, wait wraps to next day.
        assert_eq!(window.wait_from(7 * 3600), (24 - 7 + 2) * 3600);
        assert_eq!(window.wait_from(3 * 3600), 0);
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let window = ClockMaintenanceWindow::new(22, 2);
        assert!(window.open_at(23 * 3600));
        assert!(window.open_at(3600));
        assert!(!window.open_at(12 * 3600));
    }

    #[test]
    fn storage_budget_rejects_and_warns() {
        let budget = FixedStorageBudget::new(100.0);
        budget.record_usage(70.0);
        let ok = budget.check(None, 5.0);
        assert!(ok.allowed && !ok.warning);
        let warn = budget.check(None, 20.0);
        assert!(warn.allowed && warn.warning);
        let rejected = budget.check(None, 50.0);
        assert!(!rejected.allowed);
    }

    #[test]
    fn write_monitor_scales_with_index_count() {
        let monitor = IndexCountWriteMonitor;
        assert!((monitor.estimated_write_overhead("orders", 0) - 0.0).abs() < 1e-9);
        assert!((monitor.estimated_write_overhead("orders", 4) - 0.2).abs() < 1e-9);
        assert!((monitor.estimated_write_overhead("orders", 100) - 1.0).abs() < 1e-9);
    }
}
