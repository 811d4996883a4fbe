use crate::config::QuotaConfig;
use dashmap::DashMap;
use serde::Serialize;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct QuotaEntry {
    count: i64,
    reset_at: Instant,
}

/// Outcome of one quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Requests left in the window; `-1` when the quota is disabled
    pub remaining: i64,
    pub reset_in_secs: u64,
}

/// Per-client sliding-window request quota
#[derive(Debug)]
pub struct QuotaGate {
    free_limit: i64,
    window: Duration,
    entries: DashMap<IpAddr, QuotaEntry>,
}

impl QuotaGate {
    #[must_use]
    pub fn new(free_limit: i64, window: Duration) -> Self {
        Self {
            free_limit,
            window,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.free_limit, Duration::from_secs(config.window_secs))
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.free_limit <= 0
    }

    pub fn check_and_increment(&self, ip: IpAddr) -> QuotaDecision {
        self.check_and_increment_at(ip, Instant::now())
    }

    /// Count one request for `ip`; denied requests are not counted
    pub fn check_and_increment_at(&self, ip: IpAddr, now: Instant) -> QuotaDecision {
        if self.is_disabled() {
            return QuotaDecision {
                allowed: true,
                remaining: -1,
                reset_in_secs: 0,
            };
        }

        // The entry guard holds the shard lock across reset and increment
        let mut entry = self.entries.entry(ip).or_insert_with(|| QuotaEntry {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        let reset_in_secs = entry.reset_at.saturating_duration_since(now).as_secs_f64().ceil() as u64;

        if entry.count >= self.free_limit {
            debug!("Quota exhausted for {}", ip);
            return QuotaDecision {
                allowed: false,
                remaining: 0,
                reset_in_secs,
            };
        }

        entry.count += 1;
        QuotaDecision {
            allowed: true,
            remaining: self.free_limit - entry.count,
            reset_in_secs,
        }
    }

    /// Drop entries whose window has ended; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.reset_at);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.entries.len()
    }
}
