use crate::config::Settings;
use crate::plan::ExplainUsage;
use crate::probes::TenantCache;
use crate::safety::{AdaptiveThresholds, BreakerRegistry, CanaryRegistry};
use crate::stats::StatsBuffer;
use crate::validate::Validator;
use std::time::Duration;

/// Process-wide state, constructed once at startup. Callers receive handles;
/// nothing here is re-created mid-run.
pub struct Core {
    pub settings: Settings,
    pub validator: Validator,
    pub buffer: StatsBuffer,
    pub tenant_cache: TenantCache,
    pub breakers: BreakerRegistry,
    pub canaries: CanaryRegistry,
    pub thresholds: AdaptiveThresholds,
    pub explain_usage: ExplainUsage,
}

impl Core {
    pub fn new(settings: Settings) -> Self {
        let safeguards = &settings.features.safeguards;
        let breakers = BreakerRegistry::new(
            safeguards.breaker_failure_threshold,
            safeguards.breaker_success_threshold,
            Duration::from_secs(safeguards.breaker_timeout_secs),
        );
        Self {
            validator: Validator::new(),
            buffer: StatsBuffer::default(),
            tenant_cache: TenantCache::new(),
            breakers,
            canaries: CanaryRegistry::new(),
            thresholds: AdaptiveThresholds::new(),
            explain_usage: ExplainUsage::new(),
            settings,
        }
    }
}
