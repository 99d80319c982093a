//! Embassy-backed implementations of the rig collaborator traits.

use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::usart::{self, BufferedUart};
use embassy_time::Instant;
use embedded_io::{Read, ReadReady, Write};
use satellites_core::port::{MonotonicClock, StreamPort};
use satellites_core::trial::{LickSensor, RewardValve};

/// Line-oriented view of a buffered UART.
pub struct UartPort<'d> {
    uart: BufferedUart<'d>,
}

impl<'d> UartPort<'d> {
    pub fn new(uart: BufferedUart<'d>) -> Self {
        Self { uart }
    }
}

impl StreamPort for UartPort<'_> {
    type Error = usart::Error;

    fn bytes_available(&mut self) -> bool {
        self.uart.read_ready().unwrap_or(false)
    }

    fn read_byte(&mut self) -> Option<u8> {
        // A blocking read on an empty ring would stall the rig loop.
        if !self.bytes_available() {
            return None;
        }

        let mut byte = [0u8; 1];
        match self.uart.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(error) => {
                defmt::warn!("uart: read error {}", error);
                None
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), Self::Error> {
        self.uart.write_all(line.as_bytes())?;
        self.uart.write_all(b"\n")
    }
}

/// Millisecond view of the embassy time driver, wrapping at `u32::MAX`.
pub struct EmbassyClock;

impl MonotonicClock for EmbassyClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&mut self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

/// Lick contact input, active high.
pub struct GpioLick<'d> {
    input: Input<'d>,
}

impl<'d> GpioLick<'d> {
    pub fn new(input: Input<'d>) -> Self {
        Self { input }
    }
}

impl LickSensor for GpioLick<'_> {
    fn is_licking(&mut self) -> bool {
        self.input.is_high()
    }
}

/// Solenoid valve driver output.
pub struct GpioValve<'d> {
    output: Output<'d>,
}

impl<'d> GpioValve<'d> {
    pub fn new(output: Output<'d>) -> Self {
        Self { output }
    }
}

impl RewardValve for GpioValve<'_> {
    fn open(&mut self) {
        self.output.set_high();
    }

    fn close(&mut self) {
        self.output.set_low();
    }
}
