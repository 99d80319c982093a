//! Collaborator seams consumed by the protocol engine.
//!
//! Firmware and host targets implement these traits over their own transports,
//! timers and entropy sources. The engine itself never touches hardware.

use core::time::Duration;

use rand_core::RngCore;

/// Byte-oriented duplex channel feeding the command parser.
pub trait StreamPort {
    /// Error produced when an outbound line cannot be written.
    type Error;

    /// Returns `true` when at least one inbound byte is buffered.
    fn bytes_available(&mut self) -> bool;

    /// Reads one buffered byte, or `None` if nothing is pending.
    fn read_byte(&mut self) -> Option<u8>;

    /// Writes `line` followed by a newline terminator.
    fn write_line(&mut self, line: &str) -> Result<(), Self::Error>;
}

impl<P> StreamPort for &mut P
where
    P: StreamPort + ?Sized,
{
    type Error = P::Error;

    fn bytes_available(&mut self) -> bool {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_line(&mut self, line: &str) -> Result<(), Self::Error> {
        (**self).write_line(line)
    }
}

/// Free-running millisecond counter. Wraps at `u32::MAX`.
pub trait MonotonicClock {
    fn now_ms(&mut self) -> u32;
}

impl<C> MonotonicClock for &mut C
where
    C: MonotonicClock + ?Sized,
{
    fn now_ms(&mut self) -> u32 {
        (**self).now_ms()
    }
}

/// Discrete uniform entropy source.
pub trait RandomSource {
    /// Returns a value in `[0, upper_exclusive)`. Returns 0 when the range is empty.
    fn uniform(&mut self, upper_exclusive: u32) -> u32;
}

impl<R> RandomSource for &mut R
where
    R: RandomSource + ?Sized,
{
    fn uniform(&mut self, upper_exclusive: u32) -> u32 {
        (**self).uniform(upper_exclusive)
    }
}

/// Adapts any [`rand_core::RngCore`] generator into a [`RandomSource`].
#[derive(Clone, Debug)]
pub struct RngSource<R>(pub R);

impl<R> RngSource<R> {
    pub const fn new(rng: R) -> Self {
        Self(rng)
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R> RandomSource for RngSource<R>
where
    R: RngCore,
{
    fn uniform(&mut self, upper_exclusive: u32) -> u32 {
        if upper_exclusive == 0 {
            return 0;
        }

        // Modulo bias over a 64-bit draw stays below 2^-32.
        let wide = self.0.next_u64() % u64::from(upper_exclusive);
        u32::try_from(wide).unwrap_or(0)
    }
}

/// Milliseconds elapsed between two readings of a wrapping clock.
#[must_use]
pub const fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Converts a duration into whole milliseconds, saturating at `u32::MAX`.
#[must_use]
pub fn duration_to_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRng(u64);

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            u32::try_from(self.next_u64() & u64::from(u32::MAX)).unwrap_or(0)
        }

        fn next_u64(&mut self) -> u64 {
            let value = self.0;
            self.0 += 1;
            value
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            rand_core::impls::fill_bytes_via_next(self, dest);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn rng_source_stays_inside_range() {
        let mut source = RngSource::new(CountingRng(0));
        for expected in [0, 1, 2, 0, 1, 2] {
            assert_eq!(source.uniform(3), expected);
        }
        assert_eq!(source.uniform(0), 0);
    }

    #[test]
    fn elapsed_survives_clock_rollover() {
        assert_eq!(elapsed_ms(5, u32::MAX - 4), 10);
        assert_eq!(elapsed_ms(1_000, 250), 750);
    }

    #[test]
    fn long_durations_saturate() {
        assert_eq!(duration_to_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_to_ms(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
