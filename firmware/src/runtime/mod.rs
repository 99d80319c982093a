use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::usart::{
    BufferedInterruptHandler, BufferedUart, Config as UartConfig, DataBits, Parity, StopBits,
};
use embassy_time::Instant;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use satellites_core::link::HostLink;
use satellites_core::port::RngSource;
use satellites_core::stage::StageClient;
use satellites_core::trial::{TrialCommandHandler, TrialSettings};
use static_cell::StaticCell;

use crate::hw::{EmbassyClock, GpioLick, GpioValve, UartPort};
use crate::rig::{HOST_BAUD, STAGE_BAUD, UART_BUFFER_SIZE};

mod rig_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

hal::bind_interrupts!(struct UartIrqs {
    USART1 => BufferedInterruptHandler<hal::peripherals::USART1>;
    USART3_4_5_6_LPUART1 => BufferedInterruptHandler<hal::peripherals::USART5>;
});

type UartBuffer = [u8; UART_BUFFER_SIZE];

static HOST_TX_BUFFER: StaticCell<UartBuffer> = StaticCell::new();
static HOST_RX_BUFFER: StaticCell<UartBuffer> = StaticCell::new();
static STAGE_TX_BUFFER: StaticCell<UartBuffer> = StaticCell::new();
static STAGE_RX_BUFFER: StaticCell<UartBuffer> = StaticCell::new();

fn uart_config(baudrate: u32) -> UartConfig {
    let mut config = UartConfig::default();
    config.baudrate = baudrate;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;
    config
}

/// Mixes the 96-bit device UID with the boot time.
fn entropy_seed() -> u64 {
    let seed = hal::uid::uid()
        .iter()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
        });
    seed ^ Instant::now().as_ticks()
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        USART1,
        PA9,
        PA10,
        USART5,
        PB0,
        PB1,
        PA0,
        PA1,
        ..
    } = hal::init(config);

    let host_uart = BufferedUart::new(
        USART1,
        PA10,
        PA9,
        HOST_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        HOST_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config(HOST_BAUD),
    )
    .expect("failed to initialize host UART");

    let stage_uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        STAGE_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        STAGE_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config(STAGE_BAUD),
    )
    .expect("failed to initialize stage UART");

    let seed = entropy_seed();
    defmt::info!("rig: boot seed={=u64:x}", seed);

    let link = HostLink::new(
        UartPort::new(host_uart),
        EmbassyClock,
        TrialCommandHandler::new(TrialSettings::default()),
    );
    let stage = StageClient::new(
        UartPort::new(stage_uart),
        RngSource::new(SmallRng::seed_from_u64(seed.rotate_left(32))),
    );

    let rig = rig_task::Rig {
        link,
        stage,
        rng: RngSource::new(SmallRng::seed_from_u64(seed)),
        sensor: GpioLick::new(Input::new(PA0, Pull::Down)),
        valve: GpioValve::new(Output::new(PA1, Level::Low, Speed::Low)),
    };

    spawner
        .spawn(rig_task::run(rig))
        .expect("failed to spawn rig task");

    core::future::pending::<()>().await;
}
