use crate::config::BudgetConfig;
use crate::error::{BudgetLimit, Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-source result cap restored by [`CallBudget::clear`]
pub const DEFAULT_PER_SOURCE_MAX: u32 = 3;

#[derive(Debug)]
struct BudgetState {
    calls_made: u32,
    max_calls: u32,
    started_at: Instant,
    window: Duration,
    per_source_max: u32,
}

/// Caps the tool invocations and wall-clock time of one research run.
///
/// Shared by every fetcher of the run; all state changes happen under the lock.
#[derive(Debug)]
pub struct CallBudget {
    state: Mutex<BudgetState>,
}

impl CallBudget {
    #[must_use]
    pub fn new(max_calls: u32, window: Duration, per_source_max: u32) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                calls_made: 0,
                max_calls,
                started_at: Instant::now(),
                window,
                per_source_max,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(
            config.max_calls,
            Duration::from_secs(config.window_secs),
            config.per_source_max,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the counter and clock with new limits; called at the start of every run
    pub fn configure(&self, max_calls: u32, window: Duration, per_source_max: u32) {
        let mut state = self.lock();
        *state = BudgetState {
            calls_made: 0,
            max_calls,
            started_at: Instant::now(),
            window,
            per_source_max,
        };
        debug!(
            "Budget configured: {} calls within {:?}, {} per source",
            max_calls, window, per_source_max
        );
    }

    /// Spend one call, failing when the window has elapsed or the calls are used up
    pub fn check_and_increment(&self) -> Result<()> {
        self.check_and_increment_at(Instant::now())
    }

    pub fn check_and_increment_at(&self, now: Instant) -> Result<()> {
        let mut state = self.lock();
        if now.saturating_duration_since(state.started_at) > state.window {
            return Err(Error::BudgetExceeded(BudgetLimit::Time));
        }
        if state.calls_made >= state.max_calls {
            return Err(Error::BudgetExceeded(BudgetLimit::Calls));
        }
        state.calls_made += 1;
        Ok(())
    }

    /// Zero the counter and restore the default per-source cap, keeping the call limit
    pub fn clear(&self) {
        let mut state = self.lock();
        state.calls_made = 0;
        state.started_at = Instant::now();
        state.per_source_max = DEFAULT_PER_SOURCE_MAX;
    }

    /// `requested` bounded by the per-source cap (at least one)
    #[must_use]
    pub fn cap(&self, requested: u32) -> u32 {
        requested.min(self.lock().per_source_max).max(1)
    }

    #[must_use]
    pub fn calls_made(&self) -> u32 {
        self.lock().calls_made
    }

    #[must_use]
    pub fn per_source_max(&self) -> u32 {
        self.lock().per_source_max
    }
}

impl Default for CallBudget {
    fn default() -> Self {
        Self::from_config(&BudgetConfig::default())
    }
}
