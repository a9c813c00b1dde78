use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

/// Ring capacity per named threshold.
const HISTORY_CAPACITY: usize = 1000;
/// Below this many samples the caller's current value is returned as-is.
const MIN_SAMPLES: usize = 10;

struct ThresholdEntry {
    samples: VecDeque<f64>,
    value: f64,
}

/// Percentile-based rolling thresholds, keyed by name. One mutex guards the
/// whole store; updates and lookups are both cheap.
#[derive(Default)]
pub struct AdaptiveThresholds {
    entries: Mutex<HashMap<String, ThresholdEntry>>,
}

impl AdaptiveThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current metric value and return the adapted threshold:
    /// the configured percentile of the recent history once enough samples
    /// exist, the current value otherwise.
    pub fn update(&self, name: &str, current_value: f64, percentile: f64) -> f64 {
        let mut entries = self.entries.lock().expect("threshold store lock poisoned");
        let entry = entries.entry(name.to_string()).or_insert_with(|| ThresholdEntry {
            samples: VecDeque::with_capacity(HISTORY_CAPACITY),
            value: current_value,
        });

        if entry.samples.len() == HISTORY_CAPACITY {
            entry.samples.pop_front();
        }
        entry.samples.push_back(current_value);

        if entry.samples.len() < MIN_SAMPLES {
            entry.value = current_value;
            return current_value;
        }

        let mut sorted: Vec<f64> = entry.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        entry.value = sorted[index];
        debug!(
            threshold = name,
            value = entry.value,
            samples = entry.samples.len(),
            "updated adaptive threshold"
        );
        entry.value
    }

    pub fn get(&self, name: &str, default: f64) -> f64 {
        self.entries
            .lock()
            .expect("threshold store lock poisoned")
            .get(name)
            .map(|entry| entry.value)
            .unwrap_or(default)
    }
}
