//! Randomized inter-trial intervals.
//!
//! Trial timing is decorrelated with a truncated exponential draw so animals
//! cannot anticipate the next cue. Samples are rejected and redrawn until they
//! land inside the configured window; degenerate windows are refused up front
//! and a draw budget bounds the search.

use core::fmt;
use core::time::Duration;

use crate::port::RandomSource;

/// Resolution of the discrete uniform draw feeding the exponential transform.
pub const UNIFORM_RESOLUTION: u32 = 1_000_000;

/// Upper bound on rejection-sampling draws before giving up.
pub const MAX_DRAWS: u32 = 10_000;

/// Timing parameters for one class of interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IntervalConfig {
    /// Deterministic portion added to every random draw.
    pub fixed: Duration,
    /// Mean of the untruncated exponential distribution.
    pub mean_random: Duration,
    /// Smallest accepted random draw.
    pub lower_limit: Duration,
    /// Largest accepted random draw.
    pub upper_limit: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            fixed: Duration::from_millis(2_000),
            mean_random: Duration::from_millis(2_000),
            lower_limit: Duration::ZERO,
            upper_limit: Duration::from_millis(6_000),
        }
    }
}

impl IntervalConfig {
    /// Checks that the random window can actually be sampled.
    pub fn validate(&self) -> Result<(), IntervalError> {
        if self.mean_random.as_millis() == 0 {
            return Err(IntervalError::NonPositiveMean);
        }

        if self.upper_limit <= self.lower_limit {
            return Err(IntervalError::EmptyWindow {
                lower_ms: millis_u64(self.lower_limit),
                upper_ms: millis_u64(self.upper_limit),
            });
        }

        Ok(())
    }
}

/// Failures raised by the interval sampler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntervalError {
    /// The exponential mean rounds to zero milliseconds.
    NonPositiveMean,
    /// `upper_limit` does not exceed `lower_limit`.
    EmptyWindow { lower_ms: u64, upper_ms: u64 },
    /// No draw landed in the window within the draw budget.
    Exhausted { draws: u32 },
}

impl fmt::Display for IntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalError::NonPositiveMean => f.write_str("mean random duration must be positive"),
            IntervalError::EmptyWindow { lower_ms, upper_ms } => {
                write!(f, "empty sampling window [{lower_ms}, {upper_ms}] ms")
            }
            IntervalError::Exhausted { draws } => {
                write!(f, "no sample landed in the window after {draws} draws")
            }
        }
    }
}

/// Draws one random duration from the truncated exponential distribution.
pub fn sample_random<R>(config: &IntervalConfig, rng: &mut R) -> Result<Duration, IntervalError>
where
    R: RandomSource + ?Sized,
{
    config.validate()?;

    let lower = millis_u64(config.lower_limit);
    let upper = millis_u64(config.upper_limit);

    for _ in 0..MAX_DRAWS {
        let candidate = exponential_ms(config.mean_random, rng);
        if (lower..=upper).contains(&candidate) {
            return Ok(Duration::from_millis(candidate));
        }
    }

    Err(IntervalError::Exhausted { draws: MAX_DRAWS })
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn exponential_ms<R>(mean: Duration, rng: &mut R) -> u64
where
    R: RandomSource + ?Sized,
{
    let u = f64::from(rng.uniform(UNIFORM_RESOLUTION)) / f64::from(UNIFORM_RESOLUTION);
    let mean_ms = millis_u64(mean) as f64;
    // Truncate to whole milliseconds before the window check.
    (-mean_ms * libm::log(1.0 - u)) as u64
}

fn millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Interval generator remembering its most recent random draw.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Interval {
    config: IntervalConfig,
    last_random: Duration,
}

impl Interval {
    #[must_use]
    pub const fn new(config: IntervalConfig) -> Self {
        Self {
            config,
            last_random: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &IntervalConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut IntervalConfig {
        &mut self.config
    }

    /// Random portion of the last successful draw.
    #[must_use]
    pub const fn last_random(&self) -> Duration {
        self.last_random
    }

    /// Draws and records a new random portion.
    pub fn next_random<R>(&mut self, rng: &mut R) -> Result<Duration, IntervalError>
    where
        R: RandomSource + ?Sized,
    {
        let random = sample_random(&self.config, rng)?;
        self.last_random = random;
        Ok(random)
    }

    /// Draws a new random portion and returns it added to the fixed portion.
    pub fn next_total<R>(&mut self, rng: &mut R) -> Result<Duration, IntervalError>
    where
        R: RandomSource + ?Sized,
    {
        Ok(self.config.fixed + self.next_random(rng)?)
    }
}

/// Picks an index using integer percentage weights.
///
/// A draw in `[0, 100)` selects the first index whose running total exceeds
/// it. The final index absorbs whatever probability mass the weights leave
/// unassigned, so weights that sum below 100 still always pick something.
pub fn choose_weighted<R>(weights_percent: &[u8], rng: &mut R) -> Option<usize>
where
    R: RandomSource + ?Sized,
{
    let last = weights_percent.len().checked_sub(1)?;
    let draw = rng.uniform(100);
    let mut cumulative = 0u32;

    for (index, weight) in weights_percent.iter().enumerate() {
        cumulative += u32::from(*weight);
        if index == last {
            cumulative = 100;
        }
        if draw < cumulative {
            return Some(index);
        }
    }

    Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a fixed sequence of raw uniform draws, then repeats the last.
    struct Scripted<'a> {
        draws: &'a [u32],
        cursor: usize,
    }

    impl<'a> Scripted<'a> {
        fn new(draws: &'a [u32]) -> Self {
            Self { draws, cursor: 0 }
        }
    }

    impl RandomSource for Scripted<'_> {
        fn uniform(&mut self, upper_exclusive: u32) -> u32 {
            let index = self.cursor.min(self.draws.len() - 1);
            self.cursor += 1;
            self.draws[index] % upper_exclusive.max(1)
        }
    }

    fn config_ms(fixed: u64, mean: u64, lower: u64, upper: u64) -> IntervalConfig {
        IntervalConfig {
            fixed: Duration::from_millis(fixed),
            mean_random: Duration::from_millis(mean),
            lower_limit: Duration::from_millis(lower),
            upper_limit: Duration::from_millis(upper),
        }
    }

    #[test]
    fn zero_draw_yields_zero_duration() {
        let mut rng = Scripted::new(&[0]);
        let config = config_ms(0, 1_000, 0, 5_000);

        assert_eq!(sample_random(&config, &mut rng), Ok(Duration::ZERO));
    }

    #[test]
    fn median_draw_matches_exponential_quantile() {
        // u = 0.5 gives mean * ln 2.
        let mut rng = Scripted::new(&[500_000]);
        let config = config_ms(0, 1_000, 0, 5_000);

        assert_eq!(sample_random(&config, &mut rng), Ok(Duration::from_millis(693)));
    }

    #[test]
    fn out_of_window_draws_are_redrawn() {
        // 0.99 -> 4605 ms (above), 0.0 -> 0 ms (below), 0.5 -> 693 ms.
        let mut rng = Scripted::new(&[990_000, 0, 500_000]);
        let config = config_ms(0, 1_000, 100, 3_000);

        assert_eq!(sample_random(&config, &mut rng), Ok(Duration::from_millis(693)));
        assert_eq!(rng.cursor, 3);
    }

    #[test]
    fn degenerate_configs_are_rejected() {
        let mut rng = Scripted::new(&[0]);

        assert_eq!(
            sample_random(&config_ms(0, 0, 0, 100), &mut rng),
            Err(IntervalError::NonPositiveMean)
        );
        assert_eq!(
            sample_random(&config_ms(0, 100, 500, 500), &mut rng),
            Err(IntervalError::EmptyWindow {
                lower_ms: 500,
                upper_ms: 500
            })
        );
    }

    #[test]
    fn unreachable_windows_exhaust_the_budget() {
        let mut rng = Scripted::new(&[0]);
        let config = config_ms(0, 1, 1_000, 2_000);

        assert_eq!(
            sample_random(&config, &mut rng),
            Err(IntervalError::Exhausted { draws: MAX_DRAWS })
        );
    }

    #[test]
    fn interval_adds_fixed_portion_and_remembers_draw() {
        let mut rng = Scripted::new(&[500_000]);
        let mut interval = Interval::new(config_ms(2_000, 1_000, 0, 5_000));

        assert_eq!(interval.next_total(&mut rng), Ok(Duration::from_millis(2_693)));
        assert_eq!(interval.last_random(), Duration::from_millis(693));
    }

    #[test]
    fn weighted_choice_walks_cumulative_percentages() {
        let weights = [20, 30, 50];
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[0])), Some(0));
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[19])), Some(0));
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[20])), Some(1));
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[49])), Some(1));
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[50])), Some(2));
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[99])), Some(2));
    }

    #[test]
    fn last_choice_absorbs_unassigned_mass() {
        let weights = [10, 10];
        assert_eq!(choose_weighted(&weights, &mut Scripted::new(&[95])), Some(1));
        assert_eq!(choose_weighted(&[], &mut Scripted::new(&[0])), None);
    }
}
