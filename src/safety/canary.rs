use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryStatus {
    Active,
    Promoted,
    RolledBack,
}

impl CanaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanaryStatus::Active => "active",
            CanaryStatus::Promoted => "promoted",
            CanaryStatus::RolledBack => "rolled_back",
        }
    }
}

/// Partial-traffic trial of a freshly-applied index. Once enough canary
/// samples arrive, the success rate decides promotion or rollback; terminal
/// states are sticky.
#[derive(Debug)]
pub struct CanaryDeployment {
    pub id: String,
    pub index_name: String,
    pub table: String,
    pub canary_pct: f64,
    pub success_threshold: f64,
    pub min_samples: u64,
    pub canary_queries: u64,
    pub canary_successes: u64,
    pub canary_failures: u64,
    pub control_queries: u64,
    pub control_successes: u64,
    pub control_failures: u64,
    status: CanaryStatus,
}

impl CanaryDeployment {
    pub fn new(
        id: impl Into<String>,
        index_name: impl Into<String>,
        table: impl Into<String>,
        canary_pct: f64,
        success_threshold: f64,
        min_samples: u64,
    ) -> Self {
        Self {
            id: id.into(),
            index_name: index_name.into(),
            table: table.into(),
            canary_pct,
            success_threshold,
            min_samples,
            canary_queries: 0,
            canary_successes: 0,
            canary_failures: 0,
            control_queries: 0,
            control_successes: 0,
            control_failures: 0,
            status: CanaryStatus::Active,
        }
    }

    /// Probabilistic routing: true sends this query through the canary arm.
    pub fn should_use_canary(&self) -> bool {
        rand::thread_rng().gen_range(0.0..100.0) < self.canary_pct
    }

    pub fn record_canary_result(&mut self, success: bool) {
        self.canary_queries += 1;
        if success {
            self.canary_successes += 1;
        } else {
            self.canary_failures += 1;
        }
        self.evaluate();
    }

    pub fn record_control_result(&mut self, success: bool) {
        self.control_queries += 1;
        if success {
            self.control_successes += 1;
        } else {
            self.control_failures += 1;
        }
    }

    pub fn status(&self) -> CanaryStatus {
        self.status
    }

    pub fn canary_success_rate(&self) -> f64 {
        if self.canary_queries == 0 {
            0.0
        } else {
            self.canary_successes as f64 / self.canary_queries as f64
        }
    }

    fn evaluate(&mut self) {
        if self.status != CanaryStatus::Active {
            return;
        }
        if self.canary_queries < self.min_samples {
            return;
        }

        let rate = self.canary_success_rate();
        if rate >= self.success_threshold {
            self.status = CanaryStatus::Promoted;
            info!(
                deployment = %self.id,
                status = self.status.as_str(),
                rate = format!("{:.1}%", rate * 100.0),
                "canary promoted"
            );
        } else if rate < self.success_threshold * 0.8 {
            self.status = CanaryStatus::RolledBack;
            warn!(
                deployment = %self.id,
                status = self.status.as_str(),
                rate = format!("{:.1}%", rate * 100.0),
                "canary rolled back"
            );
        }
    }
}

/// Process-wide canary map; internals are mutated only under the map mutex.
pub struct CanaryRegistry {
    deployments: Mutex<HashMap<String, CanaryDeployment>>,
}

impl Default for CanaryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CanaryRegistry {
    pub fn new() -> Self {
        Self {
            deployments: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(
        &self,
        id: &str,
        index_name: &str,
        table: &str,
        canary_pct: f64,
        success_threshold: f64,
        min_samples: u64,
    ) {
        let deployment = CanaryDeployment::new(
            id,
            index_name,
            table,
            canary_pct,
            success_threshold,
            min_samples,
        );
        info!(deployment = id, index = index_name, pct = canary_pct, "created canary deployment");
        self.deployments
            .lock()
            .expect("canary registry lock poisoned")
            .insert(id.to_string(), deployment);
    }

    pub fn record_canary_result(&self, id: &str, success: bool) {
        if let Some(deployment) = self
            .deployments
            .lock()
            .expect("canary registry lock poisoned")
            .get_mut(id)
        {
            deployment.record_canary_result(success);
        }
    }

    pub fn record_control_result(&self, id: &str, success: bool) {
        if let Some(deployment) = self
            .deployments
            .lock()
            .expect("canary registry lock poisoned")
            .get_mut(id)
        {
            deployment.record_control_result(success);
        }
    }

    pub fn status(&self, id: &str) -> Option<CanaryStatus> {
        self.deployments
            .lock()
            .expect("canary registry lock poisoned")
            .get(id)
            .map(|d| d.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(min_samples: u64) -> CanaryDeployment {
        CanaryDeployment::new(
            "dep-1",
            "idx_orders_status",
            "orders",
            10.0,
            0.95,
            min_samples,
        )
    }

    #[test]
    fn stays_active_below_min_samples() {
        let mut canary = deployment(100);
        for _ in 0..99 {
            canary.record_canary_result(true);
        }
        assert_eq!(canary.status(), CanaryStatus::Active);
    }

    #[test]
    fn promotes_at_threshold() {
        let mut canary = deployment(100);
        for _ in 0..100 {
            canary.record_canary_result(true);
        }
        assert_eq!(canary.status(), CanaryStatus::Promoted);
    }

    #[test]
    fn rolls_back_below_eighty_pct_of_threshold() {
        let mut canary = deployment(100);
        // 70% success rate < 0.95 * 0.8 = 0.76
        for i in 0..100 {
            canary.record_canary_result(i % 10 < 7);
        }
        assert_eq!(canary.status(), CanaryStatus::RolledBack);
    }

    #[test]
    fn middle_band_stays_active() {
        let mut canary = deployment(100);
        // 90% success: below promote (95%), above rollback (76%).
        for i in 0..100 {
            canary.record_canary_result(i % 10 != 0);
        }
        assert_eq!(canary.status(), CanaryStatus::Active);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut canary = deployment(10);
        for _ in 0..10 {
            canary.record_canary_result(false);
        }
        assert_eq!(canary.status(), CanaryStatus::RolledBack);
        // A later run of successes cannot resurrect it.
        for _ in 0..1000 {
            canary.record_canary_result(true);
        }
        assert_eq!(canary.status(), CanaryStatus::RolledBack);
    }

    #[test]
    fn control_arm_never_drives_status() {
        let mut canary = deployment(10);
        for _ in 0..1000 {
            canary.record_control_result(false);
        }
        assert_eq!(canary.status(), CanaryStatus::Active);
    }

    #[test]
    fn registry_tracks_by_deployment_id() {
        let registry = CanaryRegistry::new();
        registry.create("dep-1", "idx_orders_status", "orders", 10.0, 0.95, 2);
        registry.record_canary_result("dep-1", true);
        registry.record_canary_result("dep-1", true);
        assert_eq!(registry.status("dep-1"), Some(CanaryStatus::Promoted));
        assert_eq!(registry.status("missing"), None);
    }
}
