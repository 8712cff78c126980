use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    consecutive_errors: u32,
    last_error_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

impl Default for HealthEntry {
    fn default() -> Self {
        Self {
            consecutive_errors: 0,
            last_error_time: None,
            last_success_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    pub consecutive_errors: u32,
    pub last_error_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
}

/// Per-provider error-count / last-error / last-success bookkeeping
/// (spec.md §3, §4.2).
///
/// Grounded in the teacher's `CredentialPool` map-of-states pattern, but
/// simplified: the teacher runs a background task that wakes on a
/// `BinaryHeap` of expiries to clear stale entries proactively. Health here
/// is read on nearly every request and written only on attempt completion,
/// so a lazy sweep performed inside `is_healthy`/`record_result` is cheaper
/// and has no task lifecycle to manage.
pub struct HealthTracker {
    entries: Mutex<HashMap<String, HealthEntry>>,
    unhealthy_threshold: u32,
    failure_cooldown: Duration,
    unhealthy_reset_timeout: Duration,
    reset_on_success: bool,
}

impl HealthTracker {
    pub fn new(
        unhealthy_threshold: u32,
        failure_cooldown: Duration,
        unhealthy_reset_timeout: Duration,
        reset_on_success: bool,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unhealthy_threshold,
            failure_cooldown,
            unhealthy_reset_timeout,
            reset_on_success,
        }
    }

    pub fn record_result(&self, provider_name: &str, outcome: Outcome) {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("health tracker mutex poisoned");
        let entry = guard.entry(provider_name.to_string()).or_default();
        sweep_one(entry, now, self.unhealthy_reset_timeout);
        match outcome {
            Outcome::Success => {
                entry.last_success_time = Some(now);
                if self.reset_on_success {
                    entry.consecutive_errors = 0;
                }
            }
            Outcome::Error => {
                entry.consecutive_errors += 1;
                entry.last_error_time = Some(now);
            }
        }
    }

    pub fn is_healthy(&self, provider_name: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("health tracker mutex poisoned");
        let entry = guard.entry(provider_name.to_string()).or_default();
        sweep_one(entry, now, self.unhealthy_reset_timeout);
        if entry.consecutive_errors < self.unhealthy_threshold {
            return true;
        }
        match entry.last_error_time {
            Some(last_error) => now.duration_since(last_error) > self.failure_cooldown,
            None => true,
        }
    }

    pub fn status(&self, provider_name: &str) -> HealthStatus {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("health tracker mutex poisoned");
        let entry = guard.entry(provider_name.to_string()).or_default();
        sweep_one(entry, now, self.unhealthy_reset_timeout);
        HealthStatus {
            consecutive_errors: entry.consecutive_errors,
            last_error_time: entry.last_error_time,
            last_success_time: entry.last_success_time,
        }
    }
}

/// Clears `consecutive_errors` once the provider has been idle (error-free)
/// longer than `unhealthy_reset_timeout` (spec.md §4.2).
fn sweep_one(entry: &mut HealthEntry, now: Instant, unhealthy_reset_timeout: Duration) {
    if let Some(last_error) = entry.last_error_time {
        if now.duration_since(last_error) > unhealthy_reset_timeout {
            entry.consecutive_errors = 0;
            entry.last_error_time = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_until_threshold_reached() {
        let tracker = HealthTracker::new(3, Duration::from_secs(30), Duration::from_secs(300), true);
        tracker.record_result("p1", Outcome::Error);
        tracker.record_result("p1", Outcome::Error);
        assert!(tracker.is_healthy("p1"));
        tracker.record_result("p1", Outcome::Error);
        assert!(!tracker.is_healthy("p1"));
    }

    #[test]
    fn success_resets_counter_when_configured() {
        let tracker = HealthTracker::new(2, Duration::from_secs(30), Duration::from_secs(300), true);
        tracker.record_result("p1", Outcome::Error);
        tracker.record_result("p1", Outcome::Error);
        assert!(!tracker.is_healthy("p1"));
        tracker.record_result("p1", Outcome::Success);
        assert!(tracker.is_healthy("p1"));
        assert_eq!(tracker.status("p1").consecutive_errors, 0);
    }

    #[test]
    fn unknown_provider_is_healthy_by_default() {
        let tracker = HealthTracker::new(3, Duration::from_secs(30), Duration::from_secs(300), true);
        assert!(tracker.is_healthy("never-seen"));
    }

    #[test]
    fn cooldown_elapsed_restores_health_without_a_success() {
        let tracker = HealthTracker::new(1, Duration::from_millis(10), Duration::from_secs(300), true);
        tracker.record_result("p1", Outcome::Error);
        assert!(!tracker.is_healthy("p1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.is_healthy("p1"));
    }
}
