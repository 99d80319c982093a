//! Host link: the command parser bound to a serial port and a clock.
//!
//! Rig firmware runs a single thread of control with no scheduler, so "waiting"
//! means busy polling. Every wait primitive here services the parser at least
//! once per loop iteration, which keeps the host link responsive while an
//! experiment sits in a delay or waits on a sensor.

use core::fmt;
use core::time::Duration;

use crate::port::{MonotonicClock, StreamPort, duration_to_ms, elapsed_ms};
use crate::protocol::telemetry::{self, TelemetryError};
use crate::protocol::{CommandHandler, CommandParser};

/// Failures raised while sending telemetry over the host link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError<E> {
    /// The transport rejected the line.
    Port(E),
    /// The line could not be rendered.
    Telemetry(TelemetryError),
}

impl<E> From<TelemetryError> for LinkError<E> {
    fn from(error: TelemetryError) -> Self {
        Self::Telemetry(error)
    }
}

impl<E> fmt::Display for LinkError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Port(error) => write!(f, "host port error: {error:?}"),
            LinkError::Telemetry(error) => write!(f, "telemetry error: {error}"),
        }
    }
}

/// Couples a [`CommandParser`] with the transport and clock it polls.
pub struct HostLink<P, C, H> {
    port: P,
    clock: C,
    parser: CommandParser<H>,
}

impl<P, C, H> HostLink<P, C, H>
where
    P: StreamPort,
    C: MonotonicClock,
    H: CommandHandler,
{
    /// Creates a link with `handler` attached to a default-delimited parser.
    pub const fn new(port: P, clock: C, handler: H) -> Self {
        Self::with_parser(port, clock, CommandParser::with_handler(handler))
    }

    pub const fn with_parser(port: P, clock: C, parser: CommandParser<H>) -> Self {
        Self {
            port,
            clock,
            parser,
        }
    }

    pub fn parser(&self) -> &CommandParser<H> {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut CommandParser<H> {
        &mut self.parser
    }

    /// Shortcut for the attached handler, if any.
    pub fn handler(&self) -> Option<&H> {
        self.parser.handler()
    }

    pub fn handler_mut(&mut self) -> Option<&mut H> {
        self.parser.handler_mut()
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Swaps the transport, keeping any half-parsed line intact.
    pub fn replace_port(&mut self, port: P) -> P {
        core::mem::replace(&mut self.port, port)
    }

    pub fn into_parts(self) -> (P, C, CommandParser<H>) {
        (self.port, self.clock, self.parser)
    }

    pub fn now_ms(&mut self) -> u32 {
        self.clock.now_ms()
    }

    /// Consumes at most one inbound byte.
    pub fn service(&mut self) -> bool {
        self.parser.consume_one(&mut self.port)
    }

    /// Drains every buffered inbound byte.
    pub fn service_all(&mut self) -> usize {
        self.parser.consume_available(&mut self.port)
    }

    /// Busy-waits for `duration` while servicing the parser.
    pub fn delay_for(&mut self, duration: Duration) {
        let span = duration_to_ms(duration);
        let start = self.clock.now_ms();
        while elapsed_ms(self.clock.now_ms(), start) < span {
            self.service();
        }
    }

    /// Services the parser until `predicate` returns `true`.
    ///
    /// There is no way out other than the predicate; use
    /// [`delay_until_timeout`](Self::delay_until_timeout) when the condition
    /// might never hold.
    pub fn delay_until<F>(&mut self, mut predicate: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            self.service();
            if predicate() {
                return true;
            }
        }
    }

    /// Services the parser until `predicate` holds or `timeout` elapses.
    ///
    /// Returns `true` if the predicate was observed, `false` on timeout.
    pub fn delay_until_timeout<F>(&mut self, mut predicate: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let span = duration_to_ms(timeout);
        let start = self.clock.now_ms();
        while elapsed_ms(self.clock.now_ms(), start) < span {
            self.service();
            if predicate() {
                return true;
            }
        }
        false
    }

    /// Waits for a quiet period of `unit` during which `predicate` stays false.
    ///
    /// Each time the predicate fires the window restarts. Returns whether it
    /// fired at least once.
    pub fn delay_continue<F>(&mut self, mut predicate: F, unit: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let span = duration_to_ms(unit);
        let mut window_start = self.clock.now_ms();
        let mut triggered = false;

        while elapsed_ms(self.clock.now_ms(), window_start) < span {
            self.service();
            if predicate() {
                window_start = self.clock.now_ms();
                triggered = true;
            }
        }

        triggered
    }

    /// Writes `tag,timestamp[,value...]` using the parser delimiter.
    pub fn send_data<V>(
        &mut self,
        tag: &str,
        timestamp_ms: u32,
        values: &[V],
    ) -> Result<(), LinkError<P::Error>>
    where
        V: fmt::Display,
    {
        let delimiter = char::from(self.parser.delimiter());
        let line = telemetry::format_record(tag, timestamp_ms, values, delimiter)?;
        self.port.write_line(&line).map_err(LinkError::Port)
    }

    /// Writes a header-only record stamped with the current time.
    pub fn send_event(&mut self, tag: &str) -> Result<(), LinkError<P::Error>> {
        let now = self.clock.now_ms();
        self.send_data::<u32>(tag, now, &[])
    }

    /// Writes a single-value record stamped with the current time.
    pub fn send_value<V>(&mut self, tag: &str, value: V) -> Result<(), LinkError<P::Error>>
    where
        V: fmt::Display,
    {
        let now = self.clock.now_ms();
        self.send_data(tag, now, &[value])
    }
}
