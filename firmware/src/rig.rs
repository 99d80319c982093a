#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Board-level configuration and session bookkeeping for the training rig.
//!
//! Experiment parameters arrive over the host link at runtime; only transport
//! and stage setup live here.

use satellites_core::trial::{TrialError, TrialOutcome};

/// Host link baud rate (USART1).
pub const HOST_BAUD: u32 = 115_200;
/// Zaber stage baud rate (USART5).
pub const STAGE_BAUD: u32 = 115_200;
/// Per-direction buffer size for each buffered UART.
pub const UART_BUFFER_SIZE: usize = 256;
/// Host link polling period while the session is stopped.
pub const IDLE_POLL_MS: u64 = 10;

/// Stage top speed written once at boot, device units.
pub const STAGE_MAX_SPEED: i32 = 153_600;
pub const STAGE_ACCELERATION: i32 = 500;
/// Random offset applied to every stage target, micrometres.
pub const STAGE_JITTER_UM: u16 = 0;

/// Running tally of trial outcomes since the last `START`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionStats {
    pub trials: u32,
    pub hits: u32,
    pub misses: u32,
    pub errors: u32,
    latency_total_ms: u64,
}

impl SessionStats {
    pub const fn new() -> Self {
        Self {
            trials: 0,
            hits: 0,
            misses: 0,
            errors: 0,
            latency_total_ms: 0,
        }
    }

    pub fn record(&mut self, outcome: &TrialOutcome) {
        self.trials = self.trials.wrapping_add(1);
        if outcome.hit {
            self.hits = self.hits.wrapping_add(1);
            self.latency_total_ms += u64::from(outcome.latency_ms);
        } else {
            self.misses = self.misses.wrapping_add(1);
        }
    }

    pub fn record_error(&mut self) {
        self.errors = self.errors.wrapping_add(1);
    }

    /// Mean cue-to-lick latency over hits.
    pub fn mean_latency_ms(&self) -> Option<u64> {
        if self.hits == 0 {
            None
        } else {
            Some(self.latency_total_ms / u64::from(self.hits))
        }
    }

    /// Hit rate in whole percent.
    pub fn hit_percent(&self) -> u32 {
        if self.trials == 0 {
            return 0;
        }
        let percent = u64::from(self.hits) * 100 / u64::from(self.trials);
        u32::try_from(percent).unwrap_or(100)
    }
}

pub fn log_outcome(outcome: &TrialOutcome, stats: &SessionStats) {
    emit_outcome(outcome, stats);
}

#[cfg(target_os = "none")]
fn emit_outcome(outcome: &TrialOutcome, stats: &SessionStats) {
    defmt::info!(
        "rig: trial {} {} iti={}ms latency={}ms hit_rate={}%",
        stats.trials,
        if outcome.hit { "hit" } else { "miss" },
        outcome.iti_ms,
        outcome.latency_ms,
        stats.hit_percent()
    );
}

#[cfg(not(target_os = "none"))]
fn emit_outcome(outcome: &TrialOutcome, stats: &SessionStats) {
    println!(
        "rig: trial {} {} iti={}ms latency={}ms hit_rate={}%",
        stats.trials,
        if outcome.hit { "hit" } else { "miss" },
        outcome.iti_ms,
        outcome.latency_ms,
        stats.hit_percent()
    );
}

#[cfg(target_os = "none")]
pub fn log_session_summary(stats: &SessionStats) {
    defmt::info!(
        "rig: session stopped trials={} hits={} misses={} errors={} mean_latency={}ms",
        stats.trials,
        stats.hits,
        stats.misses,
        stats.errors,
        stats.mean_latency_ms().unwrap_or(0)
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_session_summary(stats: &SessionStats) {
    println!(
        "rig: session stopped trials={} hits={} misses={} errors={} mean_latency={}ms",
        stats.trials,
        stats.hits,
        stats.misses,
        stats.errors,
        stats.mean_latency_ms().unwrap_or(0)
    );
}

#[cfg(target_os = "none")]
pub fn log_trial_error<E>(error: &TrialError<E>)
where
    E: defmt::Format,
{
    defmt::warn!("rig: trial aborted: {}", error);
}

#[cfg(not(target_os = "none"))]
pub fn log_trial_error<E>(error: &TrialError<E>)
where
    E: core::fmt::Debug,
{
    println!("rig: trial aborted: {error}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(hit: bool, latency_ms: u32) -> TrialOutcome {
        TrialOutcome {
            iti_ms: 2_000,
            quiet_extended: false,
            hit,
            latency_ms,
        }
    }

    #[test]
    fn empty_session_has_no_rates() {
        let stats = SessionStats::new();
        assert_eq!(stats.hit_percent(), 0);
        assert_eq!(stats.mean_latency_ms(), None);
    }

    #[test]
    fn latency_averages_only_hits() {
        let mut stats = SessionStats::new();
        stats.record(&outcome(true, 200));
        stats.record(&outcome(false, 1_500));
        stats.record(&outcome(true, 400));
        stats.record_error();

        assert_eq!(stats.trials, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.mean_latency_ms(), Some(300));
        assert_eq!(stats.hit_percent(), 66);
    }
}
