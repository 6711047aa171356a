use crate::config::ProcessSpec;
use crate::process::types::ManagedProcess;
use chrono::{DateTime, Duration, Utc};

/// Sliding-window circuit breaker guarding automatic restarts.
///
/// Pure bookkeeping over a restart history; performs no I/O.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreaker {
    /// Restarts tolerated inside the window
    pub max_attempts: usize,
    /// Length of the sliding window
    pub window: Duration,
}

impl CircuitBreaker {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }

    pub fn from_spec(spec: &ProcessSpec) -> Self {
        Self::new(spec.max_restart_attempts, spec.restart_window())
    }

    /// Start of the window; None when it reaches past the earliest timestamp
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.window)
    }

    /// Drop every timestamp that is not strictly newer than `now - window`
    pub fn prune(&self, history: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) {
        if let Some(cutoff) = self.cutoff(now) {
            history.retain(|&time| time > cutoff);
        }
    }

    /// Count restarts inside the window without mutating the history
    pub fn count_recent(&self, history: &[DateTime<Utc>], now: DateTime<Utc>) -> usize {
        match self.cutoff(now) {
            Some(cutoff) => history.iter().filter(|&&time| time > cutoff).count(),
            None => history.len(),
        }
    }

    /// Prune, then report whether the window is already full
    pub fn should_trip(&self, history: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        self.prune(history, now);
        history.len() >= self.max_attempts
    }

    /// Append a restart and prune so the history cannot grow without bound
    pub fn record_restart(&self, history: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) {
        history.push(now);
        self.prune(history, now);
    }
}

/// Evaluate the breaker for a record about to be restarted automatically
pub fn should_trip(record: &mut ManagedProcess, now: DateTime<Utc>) -> bool {
    let breaker = CircuitBreaker::from_spec(&record.spec);
    breaker.should_trip(&mut record.recent_restarts, now)
}

/// Open the breaker: automatic restarts stay off until a manual start
pub fn trip(record: &mut ManagedProcess) {
    record.circuit_breaker_tripped = true;
    record.spec.auto_restart = false;
}

/// Close the breaker and forget the restart history (manual start only)
pub fn reset(record: &mut ManagedProcess) {
    record.circuit_breaker_tripped = false;
    record.recent_restarts.clear();
}

/// Restart bookkeeping after a successful launch.
///
/// The first launch of a record's life is not a restart: it neither bumps the
/// counter nor enters the window.
pub fn record_start(record: &mut ManagedProcess, now: DateTime<Utc>) {
    if !record.is_first_start {
        record.restart_count += 1;
        let breaker = CircuitBreaker::from_spec(&record.spec);
        breaker.record_restart(&mut record.recent_restarts, now);
    }

    record.is_first_start = false;
}
