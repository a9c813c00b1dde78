pub mod breaker;
pub mod canary;
pub mod thresholds;

pub use breaker::{BreakerRegistry, BreakerState};
pub use canary::{CanaryRegistry, CanaryStatus};
pub use thresholds::AdaptiveThresholds;
