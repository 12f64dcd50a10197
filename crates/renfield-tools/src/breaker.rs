use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, instrument};

use renfield_core::config::{
    DEFAULT_BREAKER_COOL_OFF_SECS, DEFAULT_BREAKER_FAILURE_THRESHOLD,
    DEFAULT_BREAKER_FAILURE_WINDOW_SECS,
};

/// Per-provider failure-isolation state machine (§4.3).
///
/// `closed`: calls flow, failures counted in a rolling window. Crossing the
/// threshold opens the breaker for a cool-off interval. The first call after
/// cool-off is `half-open`: success closes the breaker, failure re-opens it
/// with an exponential backoff cap (§8: no other transitions occur).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerEntry {
    state: BreakerState,
    /// Rolling window of failure timestamps (§4.3: 5 failures in 30s by default).
    failures: VecDeque<Instant>,
    /// When `Open`, the instant the cool-off ends and a half-open probe is allowed.
    reopen_at: Option<Instant>,
    /// Consecutive open-cycle count, used to grow the cool-off exponentially
    /// (capped) when a half-open probe fails again.
    consecutive_opens: u32,
    /// Set while a half-open probe call is in flight, so concurrent callers
    /// don't all get treated as the probe.
    probe_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            reopen_at: None,
            consecutive_opens: 0,
            probe_in_flight: false,
        }
    }

    fn prune(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        while self.failures.front().is_some_and(|t| *t < cutoff) {
            self.failures.pop_front();
        }
    }
}

/// Tracks circuit-breaker state for every tool provider (§4.3, §5 "Provider
/// call slot"). One `BreakerRegistry` is shared across all dispatch calls.
pub struct BreakerRegistry {
    entries: DashMap<String, BreakerEntry>,
    failure_threshold: u32,
    failure_window: Duration,
    cool_off: Duration,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            failure_window: Duration::from_secs(DEFAULT_BREAKER_FAILURE_WINDOW_SECS),
            cool_off: Duration::from_secs(DEFAULT_BREAKER_COOL_OFF_SECS),
        }
    }

    #[cfg(test)]
    pub fn with_params(failure_threshold: u32, failure_window: Duration, cool_off: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold,
            failure_window,
            cool_off,
        }
    }

    /// Decide whether a call may proceed. Returns `true` when the call should
    /// run (and, if this is a half-open probe, marks the probe in flight so
    /// concurrent callers are still short-circuited). A short-circuited call
    /// never touches the failure window — it does not count as a failure
    /// (§8 scenario 5: short-circuit does not count as a failure).
    #[instrument(skip(self))]
    pub fn allow(&self, provider_name: &str) -> bool {
        let mut entry = self.entries.entry(provider_name.to_string()).or_insert_with(BreakerEntry::new);
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if entry.reopen_at.is_some_and(|t| Instant::now() >= t) && !entry.probe_in_flight {
                    entry.state = BreakerState::HalfOpen;
                    entry.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call. Closes the breaker unconditionally — a
    /// success in `half-open` returns to `closed` and resets the failure
    /// history; a success in `closed` just clears old failures.
    #[instrument(skip(self))]
    pub fn record_success(&self, provider_name: &str) {
        let mut entry = self.entries.entry(provider_name.to_string()).or_insert_with(BreakerEntry::new);
        let was_half_open = entry.state == BreakerState::HalfOpen;
        entry.state = BreakerState::Closed;
        entry.failures.clear();
        entry.reopen_at = None;
        entry.probe_in_flight = false;
        if was_half_open {
            entry.consecutive_opens = 0;
            info!(provider = provider_name, "circuit breaker closed after successful probe");
        }
    }

    /// Record a failed call, possibly tripping the breaker open.
    #[instrument(skip(self))]
    pub fn record_failure(&self, provider_name: &str) {
        let mut entry = self.entries.entry(provider_name.to_string()).or_insert_with(BreakerEntry::new);
        entry.probe_in_flight = false;

        if entry.state == BreakerState::HalfOpen {
            self.trip_open(&mut entry, provider_name);
            return;
        }

        entry.prune(self.failure_window);
        entry.failures.push_back(Instant::now());
        if entry.failures.len() as u32 >= self.failure_threshold {
            self.trip_open(&mut entry, provider_name);
        }
    }

    fn trip_open(&self, entry: &mut BreakerEntry, provider_name: &str) {
        entry.state = BreakerState::Open;
        entry.consecutive_opens += 1;
        // Exponential backoff capped at 8x the base cool-off (§4.3).
        let multiplier = 1u32 << entry.consecutive_opens.saturating_sub(1).min(3);
        entry.reopen_at = Some(Instant::now() + self.cool_off * multiplier);
        entry.failures.clear();
        info!(
            provider = provider_name,
            consecutive_opens = entry.consecutive_opens,
            "circuit breaker opened"
        );
    }

    /// Count of failures currently inside the rolling window, used by the
    /// Resolver's tie-break rule ("prefer the provider with the lower
    /// recent failure rate", §4.4). Zero for a provider never seen.
    pub fn recent_failure_count(&self, provider_name: &str) -> usize {
        match self.entries.get_mut(provider_name) {
            Some(mut entry) => {
                entry.prune(self.failure_window);
                entry.failures.len()
            }
            None => 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self, provider_name: &str) -> BreakerState {
        self.entries
            .get(provider_name)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BreakerRegistry {
        BreakerRegistry::with_params(3, Duration::from_secs(30), Duration::from_millis(20))
    }

    #[test]
    fn closed_allows_calls_until_threshold() {
        let b = registry();
        assert!(b.allow("weather"));
        b.record_failure("weather");
        assert_eq!(b.state("weather"), BreakerState::Closed);
        b.record_failure("weather");
        assert_eq!(b.state("weather"), BreakerState::Closed);
        b.record_failure("weather");
        assert_eq!(b.state("weather"), BreakerState::Open);
    }

    #[test]
    fn open_short_circuits_until_cool_off() {
        let b = registry();
        for _ in 0..3 {
            b.record_failure("weather");
        }
        assert!(!b.allow("weather"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.allow("weather"));
        assert_eq!(b.state("weather"), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes() {
        let b = registry();
        for _ in 0..3 {
            b.record_failure("weather");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.allow("weather"));
        b.record_success("weather");
        assert_eq!(b.state("weather"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = registry();
        for _ in 0..3 {
            b.record_failure("weather");
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.allow("weather"));
        b.record_failure("weather");
        assert_eq!(b.state("weather"), BreakerState::Open);
    }

    #[test]
    fn success_in_closed_state_clears_failure_history() {
        let b = registry();
        b.record_failure("weather");
        b.record_failure("weather");
        b.record_success("weather");
        b.record_failure("weather");
        assert_eq!(b.state("weather"), BreakerState::Closed);
    }
}
