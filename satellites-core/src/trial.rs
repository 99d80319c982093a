//! Reference lick-training trial shared by the firmware and the emulator.
//!
//! Host commands reach [`TrialCommandHandler`] one field at a time and update
//! [`TrialSettings`] in place. [`run_trial`] then drives one trial through the
//! cooperative waits, so settings sent mid-trial take effect on the next one.
//!
//! | Command                       | Effect                                  |
//! |-------------------------------|-----------------------------------------|
//! | `ITI,fixed,mean,lower,upper`  | inter-trial interval, milliseconds      |
//! | `RWD,ms`                      | valve open time on a hit                |
//! | `RSP,ms`                      | response window after the cue           |
//! | `QUIET,ms`                    | lick-free period required before a cue  |
//! | `POS,x,y`                     | spout target in micrometres             |
//! | `START` / `STOP`              | toggles the session                     |

use core::fmt;
use core::time::Duration;

use crate::interval::{Interval, IntervalConfig, IntervalError};
use crate::link::{HostLink, LinkError};
use crate::port::{MonotonicClock, RandomSource, StreamPort, duration_to_ms, elapsed_ms};
use crate::protocol::{Command, CommandHandler};

/// Lick detector consulted while waiting.
pub trait LickSensor {
    fn is_licking(&mut self) -> bool;
}

/// Water valve opened for the reward duration.
pub trait RewardValve {
    fn open(&mut self);
    fn close(&mut self);
}

/// Experiment parameters adjustable from the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrialSettings {
    pub interval: IntervalConfig,
    pub reward: Duration,
    pub response_window: Duration,
    pub quiet_window: Duration,
    pub running: bool,
    /// Pending spout position, cleared once applied.
    pub spout_target_um: Option<(i32, i32)>,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            interval: IntervalConfig::default(),
            reward: Duration::from_millis(100),
            response_window: Duration::from_millis(1_500),
            quiet_window: Duration::from_millis(1_000),
            running: false,
            spout_target_um: None,
        }
    }
}

/// Maps streamed command fields onto [`TrialSettings`].
#[derive(Clone, Debug, Default)]
pub struct TrialCommandHandler {
    settings: TrialSettings,
    pending_x_um: i32,
    unknown: u32,
}

impl TrialCommandHandler {
    #[must_use]
    pub fn new(settings: TrialSettings) -> Self {
        Self {
            settings,
            pending_x_um: 0,
            unknown: 0,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &TrialSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut TrialSettings {
        &mut self.settings
    }

    /// Number of command lines whose name was not recognized.
    #[must_use]
    pub const fn unknown_commands(&self) -> u32 {
        self.unknown
    }

    /// Returns the pending spout target and clears it.
    pub fn take_spout_target(&mut self) -> Option<(i32, i32)> {
        self.settings.spout_target_um.take()
    }
}

impl CommandHandler for TrialCommandHandler {
    fn handle(&mut self, command: &Command<'_>) {
        let settings = &mut self.settings;
        let value = command.value;
        match command.field_index {
            0 if command.is("START") => settings.running = true,
            0 if command.is("STOP") => settings.running = false,
            0 if !KNOWN_COMMANDS.iter().any(|known| command.is(known)) => {
                self.unknown = self.unknown.saturating_add(1);
            }
            1 if command.is("ITI") => settings.interval.fixed = millis(value),
            2 if command.is("ITI") => settings.interval.mean_random = millis(value),
            3 if command.is("ITI") => settings.interval.lower_limit = millis(value),
            4 if command.is("ITI") => settings.interval.upper_limit = millis(value),
            1 if command.is("RWD") => settings.reward = millis(value),
            1 if command.is("RSP") => settings.response_window = millis(value),
            1 if command.is("QUIET") => settings.quiet_window = millis(value),
            1 if command.is("POS") => self.pending_x_um = value,
            2 if command.is("POS") => settings.spout_target_um = Some((self.pending_x_um, value)),
            _ => {}
        }
    }
}

const KNOWN_COMMANDS: [&str; 7] = ["ITI", "RWD", "RSP", "QUIET", "POS", "START", "STOP"];

fn millis(value: i32) -> Duration {
    Duration::from_millis(u64::try_from(value).unwrap_or(0))
}

/// Summary of a single trial.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrialOutcome {
    /// Total inter-trial interval that preceded the cue.
    pub iti_ms: u32,
    /// Whether licking extended the pre-cue quiet period.
    pub quiet_extended: bool,
    /// Whether the animal licked inside the response window.
    pub hit: bool,
    /// Cue-to-lick latency for hits, time spent waiting for misses.
    pub latency_ms: u32,
}

/// Failures that abort a trial.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrialError<E> {
    Link(LinkError<E>),
    Interval(IntervalError),
    /// The link has no [`TrialCommandHandler`] attached.
    HandlerDetached,
}

impl<E> From<LinkError<E>> for TrialError<E> {
    fn from(error: LinkError<E>) -> Self {
        Self::Link(error)
    }
}

impl<E> From<IntervalError> for TrialError<E> {
    fn from(error: IntervalError) -> Self {
        Self::Interval(error)
    }
}

impl<E> fmt::Display for TrialError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialError::Link(error) => error.fmt(f),
            TrialError::Interval(error) => write!(f, "interval error: {error}"),
            TrialError::HandlerDetached => f.write_str("trial handler detached from host link"),
        }
    }
}

/// Runs one trial from the inter-trial interval through the reward.
///
/// Emits `iti`, `cue`, then either `lick` + `water` or `miss` telemetry.
pub fn run_trial<P, C, R, S, V>(
    link: &mut HostLink<P, C, TrialCommandHandler>,
    rng: &mut R,
    sensor: &mut S,
    valve: &mut V,
) -> Result<TrialOutcome, TrialError<P::Error>>
where
    P: StreamPort,
    C: MonotonicClock,
    R: RandomSource + ?Sized,
    S: LickSensor + ?Sized,
    V: RewardValve + ?Sized,
{
    let settings = *link
        .handler()
        .ok_or(TrialError::HandlerDetached)?
        .settings();

    let iti = Interval::new(settings.interval).next_total(rng)?;
    let iti_ms = duration_to_ms(iti);
    link.send_value("iti", iti_ms)?;
    link.delay_for(iti);

    let quiet_extended = link.delay_continue(|| sensor.is_licking(), settings.quiet_window);

    link.send_event("cue")?;
    let cue_at = link.now_ms();
    let hit = link.delay_until_timeout(|| sensor.is_licking(), settings.response_window);
    let latency_ms = elapsed_ms(link.now_ms(), cue_at);

    if hit {
        link.send_value("lick", latency_ms)?;
        valve.open();
        link.delay_for(settings.reward);
        valve.close();
        link.send_value("water", duration_to_ms(settings.reward))?;
    } else {
        link.send_event("miss")?;
    }

    Ok(TrialOutcome {
        iti_ms,
        quiet_extended,
        hit,
        latency_ms,
    })
}

/// One iteration of a session loop.
///
/// Runs a trial while the session is started and returns `Ok(None)` when it
/// is stopped. Whenever no trial completes, the host link is drained before
/// returning so that `STOP` and corrected settings are still parsed.
pub fn poll_session<P, C, R, S, V>(
    link: &mut HostLink<P, C, TrialCommandHandler>,
    rng: &mut R,
    sensor: &mut S,
    valve: &mut V,
) -> Result<Option<TrialOutcome>, TrialError<P::Error>>
where
    P: StreamPort,
    C: MonotonicClock,
    R: RandomSource + ?Sized,
    S: LickSensor + ?Sized,
    V: RewardValve + ?Sized,
{
    let running = link
        .handler()
        .ok_or(TrialError::HandlerDetached)?
        .settings()
        .running;

    if !running {
        link.service_all();
        return Ok(None);
    }

    match run_trial(link, rng, sensor, valve) {
        Ok(outcome) => Ok(Some(outcome)),
        Err(error) => {
            link.service_all();
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandParser;

    fn feed(parser: &mut CommandParser<TrialCommandHandler>, bytes: &[u8]) {
        for byte in bytes {
            parser.ingest(*byte);
        }
    }

    fn settings(parser: &CommandParser<TrialCommandHandler>) -> TrialSettings {
        *parser.handler().expect("handler attached").settings()
    }

    #[test]
    fn iti_fields_update_interval_config() {
        let mut parser = CommandParser::with_handler(TrialCommandHandler::default());
        feed(&mut parser, b"ITI,500,1000,100,4000\n");

        let interval = settings(&parser).interval;
        assert_eq!(interval.fixed, Duration::from_millis(500));
        assert_eq!(interval.mean_random, Duration::from_millis(1_000));
        assert_eq!(interval.lower_limit, Duration::from_millis(100));
        assert_eq!(interval.upper_limit, Duration::from_millis(4_000));
    }

    #[test]
    fn partial_iti_leaves_remaining_fields_untouched() {
        let mut parser = CommandParser::with_handler(TrialCommandHandler::default());
        feed(&mut parser, b"iti,750\n");

        let interval = settings(&parser).interval;
        assert_eq!(interval.fixed, Duration::from_millis(750));
        assert_eq!(interval, IntervalConfig {
            fixed: Duration::from_millis(750),
            ..IntervalConfig::default()
        });
    }

    #[test]
    fn scalar_commands_and_session_toggles() {
        let mut parser = CommandParser::with_handler(TrialCommandHandler::default());
        feed(&mut parser, b"RWD,60\nRSP,2000\nQUIET,-5\nSTART\n");

        let current = settings(&parser);
        assert_eq!(current.reward, Duration::from_millis(60));
        assert_eq!(current.response_window, Duration::from_millis(2_000));
        assert_eq!(current.quiet_window, Duration::ZERO);
        assert!(current.running);

        feed(&mut parser, b"STOP\n");
        assert!(!settings(&parser).running);
    }

    #[test]
    fn spout_target_is_latched_until_taken() {
        let mut parser = CommandParser::with_handler(TrialCommandHandler::default());
        feed(&mut parser, b"POS,1200,-300\n");

        let handler = parser.handler_mut().expect("handler attached");
        assert_eq!(handler.take_spout_target(), Some((1_200, -300)));
        assert_eq!(handler.take_spout_target(), None);
    }

    #[test]
    fn unknown_commands_are_counted_once_per_line() {
        let mut parser = CommandParser::with_handler(TrialCommandHandler::default());
        feed(&mut parser, b"FOO,1,2\nBAR\nRWD,5\n");

        let handler = parser.handler().expect("handler attached");
        assert_eq!(handler.unknown_commands(), 2);
        assert_eq!(handler.settings().reward, Duration::from_millis(5));
    }
}
