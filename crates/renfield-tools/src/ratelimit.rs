use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::instrument;

use renfield_core::config::{DEFAULT_RATE_LIMIT_PER_MINUTE, DEFAULT_RATE_LIMIT_SLACK_MS};

struct LimiterEntry {
    /// Timestamps of calls admitted within the last minute.
    window: VecDeque<Instant>,
}

impl LimiterEntry {
    fn new() -> Self {
        Self { window: VecDeque::new() }
    }

    fn prune(&mut self) {
        let cutoff = Instant::now() - Duration::from_secs(60);
        while self.window.front().is_some_and(|t| *t < cutoff) {
            self.window.pop_front();
        }
    }
}

/// Per-provider sliding-window rate limiter (§4.3).
///
/// Requests over budget block up to `slack` to smooth bursts; beyond that
/// they fail fast with `RateLimited`. Budget is configured per provider
/// (requests/minute); unconfigured providers use the default.
pub struct RateLimiterRegistry {
    entries: DashMap<String, LimiterEntry>,
    budgets: DashMap<String, u32>,
    slack: Duration,
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            budgets: DashMap::new(),
            slack: Duration::from_millis(DEFAULT_RATE_LIMIT_SLACK_MS),
        }
    }

    pub fn set_budget(&self, provider_name: &str, requests_per_minute: u32) {
        self.budgets.insert(provider_name.to_string(), requests_per_minute);
    }

    fn budget_for(&self, provider_name: &str) -> u32 {
        self.budgets
            .get(provider_name)
            .map(|b| *b)
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE)
    }

    /// Wait up to `slack` for room in the current minute's budget, then
    /// admit the call or report that it must fail fast.
    ///
    /// Returns `true` when the call may proceed (and records the admission),
    /// `false` when the caller should surface `RateLimited`.
    #[instrument(skip(self))]
    pub async fn acquire(&self, provider_name: &str) -> bool {
        let budget = self.budget_for(provider_name) as usize;
        let deadline = Instant::now() + self.slack;

        loop {
            {
                let mut entry = self.entries.entry(provider_name.to_string()).or_insert_with(LimiterEntry::new);
                entry.prune();
                if entry.window.len() < budget {
                    entry.window.push_back(Instant::now());
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_calls_within_budget() {
        let r = RateLimiterRegistry::new();
        r.set_budget("weather", 2);
        assert!(r.acquire("weather").await);
        assert!(r.acquire("weather").await);
    }

    #[tokio::test]
    async fn rejects_after_slack_when_over_budget() {
        let r = RateLimiterRegistry::new();
        r.set_budget("weather", 1);
        assert!(r.acquire("weather").await);
        // Second call exceeds budget; with the default 200ms slack this test
        // would be slow, so use an explicit short slack via a fresh registry.
        let r2 = RateLimiterRegistry {
            entries: DashMap::new(),
            budgets: DashMap::new(),
            slack: Duration::from_millis(15),
        };
        r2.set_budget("weather", 1);
        assert!(r2.acquire("weather").await);
        assert!(!r2.acquire("weather").await);
    }

    #[tokio::test]
    async fn independent_providers_have_independent_budgets() {
        let r = RateLimiterRegistry {
            entries: DashMap::new(),
            budgets: DashMap::new(),
            slack: Duration::from_millis(15),
        };
        r.set_budget("weather", 1);
        r.set_budget("email", 1);
        assert!(r.acquire("weather").await);
        assert!(r.acquire("email").await);
    }
}
