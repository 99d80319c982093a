//! Client for a two-axis motorized stage speaking the Zaber ASCII protocol.
//!
//! Positions are given in micrometres relative to a per-axis reference and are
//! converted to device microsteps before being sent. Every command is a single
//! `/01 <axis> ...` line written to a dedicated [`StreamPort`].

use core::fmt::{self, Write as _};

use heapless::String;

use crate::port::{RandomSource, StreamPort};

/// Travel limit for each axis in micrometres.
pub const MAX_POSITION_UM: [i32; 2] = [100_000, 50_000];

/// Linear distance covered by one microstep.
pub const MICRONS_PER_MICROSTEP: f64 = 0.1905;

const MAX_COMMAND_LEN: usize = 64;

type CommandLine = String<MAX_COMMAND_LEN>;

/// Physical stage axis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Device axis number used on the wire.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Axis::X => 1,
            Axis::Y => 2,
        }
    }

    const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

/// Target of an axis-addressable command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AxisSelect {
    All,
    Only(Axis),
}

impl AxisSelect {
    const fn number(self) -> u8 {
        match self {
            AxisSelect::All => 0,
            AxisSelect::Only(axis) => axis.number(),
        }
    }
}

/// Failures raised while talking to the stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StageError<E> {
    Port(E),
    LineOverflow,
}

impl<E> fmt::Display for StageError<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Port(error) => write!(f, "stage port error: {error:?}"),
            StageError::LineOverflow => {
                write!(f, "stage command exceeds {MAX_COMMAND_LEN} bytes")
            }
        }
    }
}

/// Stage command formatter applying per-axis offsets and jitter.
pub struct StageClient<P, R> {
    port: P,
    rng: R,
    reference_um: [i32; 2],
    reversed: [bool; 2],
    jitter_um: u16,
    streaming: bool,
}

impl<P, R> StageClient<P, R>
where
    P: StreamPort,
    R: RandomSource,
{
    pub const fn new(port: P, rng: R) -> Self {
        Self {
            port,
            rng,
            reference_um: [0; 2],
            reversed: [false; 2],
            jitter_um: 0,
            streaming: false,
        }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_parts(self) -> (P, R) {
        (self.port, self.rng)
    }

    pub fn set_reference(&mut self, axis: Axis, reference_um: i32) {
        self.reference_um[axis.index()] = reference_um;
    }

    #[must_use]
    pub const fn reference(&self, axis: Axis) -> i32 {
        self.reference_um[axis.index()]
    }

    /// Mirrors positions on `axis` around its travel limit.
    pub fn set_reversed(&mut self, axis: Axis, reversed: bool) {
        self.reversed[axis.index()] = reversed;
    }

    /// Adds a uniform offset in `[-range, range]` µm to every converted position.
    pub fn set_jitter(&mut self, range_um: u16) {
        self.jitter_um = range_um;
    }

    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_max_speed(&mut self, speed: i32) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 0 set maxspeed {speed}"))?;
        self.stream_disable()
    }

    pub fn set_acceleration(&mut self, acceleration: i32) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 0 set accel {acceleration}"))?;
        self.stream_disable()
    }

    pub fn home(&mut self, target: AxisSelect) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 {} home", target.number()))?;
        self.streaming = false;
        Ok(())
    }

    pub fn move_absolute(
        &mut self,
        axis: Axis,
        position_um: i32,
    ) -> Result<(), StageError<P::Error>> {
        let steps = self.convert(axis, position_um);
        self.send(format_args!("/01 {} move abs {steps}", axis.number()))?;
        self.streaming = false;
        Ok(())
    }

    pub fn move_max(&mut self, target: AxisSelect) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 {} move max", target.number()))?;
        self.streaming = false;
        Ok(())
    }

    /// Puts stream 1 into live mode over both axes. No-op when already live.
    pub fn stream_live(&mut self) -> Result<(), StageError<P::Error>> {
        if !self.streaming {
            self.send(format_args!("/01 0 stream 1 setup live 1 2"))?;
            self.streaming = true;
        }
        Ok(())
    }

    pub fn stream_disable(&mut self) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 0 stream 1 setup disable"))?;
        self.streaming = false;
        Ok(())
    }

    pub fn stream_cork(&mut self) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 0 stream 1 fifo cork"))
    }

    pub fn stream_uncork(&mut self) -> Result<(), StageError<P::Error>> {
        self.send(format_args!("/01 0 stream 1 fifo uncork"))
    }

    pub fn stream_line(&mut self, x_um: i32, y_um: i32) -> Result<(), StageError<P::Error>> {
        let x = self.convert(Axis::X, x_um);
        let y = self.convert(Axis::Y, y_um);
        self.stream_live()?;
        self.send(format_args!("/01 0 stream 1 line abs {x} {y}"))
    }

    /// Clockwise arc around `center` ending at `end`.
    pub fn stream_arc(
        &mut self,
        center_um: (i32, i32),
        end_um: (i32, i32),
    ) -> Result<(), StageError<P::Error>> {
        let cx = self.convert(Axis::X, center_um.0);
        let cy = self.convert(Axis::Y, center_um.1);
        let ex = self.convert(Axis::X, end_um.0);
        let ey = self.convert(Axis::Y, end_um.1);
        self.stream_live()?;
        self.send(format_args!("/01 0 stream 1 arc abs cw {cx} {cy} {ex} {ey}"))
    }

    /// Full clockwise circle around `center`.
    pub fn stream_circle(&mut self, center_um: (i32, i32)) -> Result<(), StageError<P::Error>> {
        let cx = self.convert(Axis::X, center_um.0);
        let cy = self.convert(Axis::Y, center_um.1);
        self.stream_live()?;
        self.send(format_args!("/01 0 stream 1 circle abs cw {cx} {cy}"))
    }

    /// Forwards every pending reply byte to `sink`, returning how many were read.
    pub fn drain_replies<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(u8),
    {
        let mut drained = 0;
        while self.port.bytes_available() {
            let Some(byte) = self.port.read_byte() else {
                break;
            };
            sink(byte);
            drained += 1;
        }
        drained
    }

    #[allow(clippy::cast_possible_truncation)]
    fn convert(&mut self, axis: Axis, position_um: i32) -> i32 {
        let index = axis.index();
        let max = MAX_POSITION_UM[index];

        let mut position = position_um
            .saturating_add(self.reference_um[index])
            .saturating_add(self.jitter());
        if self.reversed[index] {
            position = max.saturating_sub(position);
        }
        let position = position.clamp(0, max);

        (f64::from(position) / MICRONS_PER_MICROSTEP) as i32
    }

    fn jitter(&mut self) -> i32 {
        if self.jitter_um == 0 {
            return 0;
        }
        let range = i32::from(self.jitter_um);
        let span = u32::from(self.jitter_um) * 2 + 1;
        i32::try_from(self.rng.uniform(span)).unwrap_or(0) - range
    }

    fn send(&mut self, command: fmt::Arguments<'_>) -> Result<(), StageError<P::Error>> {
        let mut line = CommandLine::new();
        line.write_fmt(command).map_err(|_| StageError::LineOverflow)?;
        self.port.write_line(&line).map_err(StageError::Port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::{Deque, Vec};

    #[derive(Default)]
    struct Wire {
        sent: Vec<CommandLine, 8>,
        replies: Deque<u8, 16>,
    }

    impl StreamPort for Wire {
        type Error = ();

        fn bytes_available(&mut self) -> bool {
            !self.replies.is_empty()
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.replies.pop_front()
        }

        fn write_line(&mut self, line: &str) -> Result<(), ()> {
            let mut owned = CommandLine::new();
            owned.push_str(line).map_err(|_| ())?;
            self.sent.push(owned).map_err(|_| ())
        }
    }

    struct Constant(u32);

    impl RandomSource for Constant {
        fn uniform(&mut self, upper_exclusive: u32) -> u32 {
            self.0.min(upper_exclusive.saturating_sub(1))
        }
    }

    fn client() -> StageClient<Wire, Constant> {
        StageClient::new(Wire::default(), Constant(0))
    }

    fn sent_lines(stage: &StageClient<Wire, Constant>) -> Vec<&str, 8> {
        stage.port.sent.iter().map(CommandLine::as_str).collect()
    }

    #[test]
    fn moves_convert_micrometres_to_microsteps() {
        let mut stage = client();
        stage.set_reference(Axis::X, 1_000);
        stage.move_absolute(Axis::X, 905).expect("sent");
        stage.move_absolute(Axis::Y, 80_000).expect("sent");

        // (905 + 1000) / 0.1905 = 10000; Y clamps to 50000 / 0.1905 = 262467.
        assert_eq!(
            sent_lines(&stage).as_slice(),
            &["/01 1 move abs 10000", "/01 2 move abs 262467"]
        );
    }

    #[test]
    fn reversed_axis_mirrors_around_travel_limit() {
        let mut stage = client();
        stage.set_reversed(Axis::Y, true);
        stage.move_absolute(Axis::Y, 50_000 - 1_905).expect("sent");

        assert_eq!(sent_lines(&stage).as_slice(), &["/01 2 move abs 10000"]);
    }

    #[test]
    fn jitter_offsets_within_range() {
        let mut stage = StageClient::new(Wire::default(), Constant(0));
        stage.set_jitter(10);
        // A zero draw maps to the bottom of [-10, 10].
        stage.move_absolute(Axis::X, 1_915).expect("sent");

        assert_eq!(sent_lines(&stage).as_slice(), &["/01 1 move abs 10000"]);
    }

    #[test]
    fn streaming_sets_up_live_mode_once() {
        let mut stage = client();
        stage.stream_line(0, 0).expect("sent");
        stage.stream_circle((1_905, 1_905)).expect("sent");
        assert!(stage.is_streaming());
        stage.home(AxisSelect::All).expect("sent");
        assert!(!stage.is_streaming());

        assert_eq!(
            sent_lines(&stage).as_slice(),
            &[
                "/01 0 stream 1 setup live 1 2",
                "/01 0 stream 1 line abs 0 0",
                "/01 0 stream 1 circle abs cw 10000 10000",
                "/01 0 home",
            ]
        );
    }

    #[test]
    fn corked_arcs_share_one_live_setup() {
        let mut stage = client();
        stage.stream_cork().expect("sent");
        stage.stream_arc((1_905, 1_905), (0, 0)).expect("sent");
        stage.stream_arc((0, 0), (1_905, 1_905)).expect("sent");
        stage.stream_uncork().expect("sent");
        assert!(stage.is_streaming());

        assert_eq!(
            sent_lines(&stage).as_slice(),
            &[
                "/01 0 stream 1 fifo cork",
                "/01 0 stream 1 setup live 1 2",
                "/01 0 stream 1 arc abs cw 10000 10000 0 0",
                "/01 0 stream 1 arc abs cw 0 0 10000 10000",
                "/01 0 stream 1 fifo uncork",
            ]
        );
    }

    #[test]
    fn reference_offsets_shift_one_axis() {
        let mut stage = client();
        stage.set_reference(Axis::X, 1_000);

        assert_eq!(stage.reference(Axis::X), 1_000);
        assert_eq!(stage.reference(Axis::Y), 0);

        stage.move_absolute(Axis::X, 905).expect("sent");
        stage.move_absolute(Axis::Y, 1_905).expect("sent");
        assert_eq!(
            sent_lines(&stage).as_slice(),
            &["/01 1 move abs 10000", "/01 2 move abs 10000"]
        );
    }

    #[test]
    fn settings_disable_streaming() {
        let mut stage = client();
        stage.set_max_speed(1_500).expect("sent");
        stage.set_acceleration(20).expect("sent");
        stage.move_max(AxisSelect::Only(Axis::Y)).expect("sent");

        assert_eq!(
            sent_lines(&stage).as_slice(),
            &[
                "/01 0 set maxspeed 1500",
                "/01 0 stream 1 setup disable",
                "/01 0 set accel 20",
                "/01 0 stream 1 setup disable",
                "/01 2 move max",
            ]
        );
    }

    #[test]
    fn replies_are_forwarded_to_sink() {
        let mut stage = client();
        for byte in b"@01 0 OK\r\n" {
            stage.port_mut().replies.push_back(*byte).expect("capacity");
        }

        let mut echoed: Vec<u8, 16> = Vec::new();
        let drained = stage.drain_replies(|byte| {
            let _ = echoed.push(byte);
        });

        assert_eq!(drained, 10);
        assert_eq!(echoed.as_slice(), b"@01 0 OK\r\n");
    }
}
