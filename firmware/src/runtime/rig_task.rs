use embassy_time::Timer;
use rand::rngs::SmallRng;
use satellites_core::link::HostLink;
use satellites_core::port::RngSource;
use satellites_core::stage::{AxisSelect, StageClient, StageError};
use satellites_core::trial::{TrialCommandHandler, poll_session};

use crate::hw::{EmbassyClock, GpioLick, GpioValve, UartPort};
use crate::rig::{
    self, IDLE_POLL_MS, STAGE_ACCELERATION, STAGE_JITTER_UM, STAGE_MAX_SPEED, SessionStats,
};

pub type RigLink = HostLink<UartPort<'static>, EmbassyClock, TrialCommandHandler>;
pub type RigStage = StageClient<UartPort<'static>, RngSource<SmallRng>>;

/// Everything the trial loop owns.
pub struct Rig {
    pub link: RigLink,
    pub stage: RigStage,
    pub rng: RngSource<SmallRng>,
    pub sensor: GpioLick<'static>,
    pub valve: GpioValve<'static>,
}

#[embassy_executor::task]
pub async fn run(mut rig: Rig) -> ! {
    if let Err(error) = configure_stage(&mut rig.stage) {
        defmt::warn!("rig: stage setup failed: {}", error);
    }

    let mut stats = SessionStats::new();
    let mut was_running = false;

    loop {
        apply_spout_target(&mut rig);
        rig.stage.drain_replies(|_| {});

        let running = rig
            .link
            .handler()
            .is_some_and(|handler| handler.settings().running);

        if running && !was_running {
            defmt::info!("rig: session started");
            stats = SessionStats::new();
        } else if !running && was_running {
            rig::log_session_summary(&stats);
        }
        was_running = running;

        match poll_session(
            &mut rig.link,
            &mut rig.rng,
            &mut rig.sensor,
            &mut rig.valve,
        ) {
            Ok(Some(outcome)) => {
                stats.record(&outcome);
                rig::log_outcome(&outcome, &stats);
            }
            Ok(None) => Timer::after_millis(IDLE_POLL_MS).await,
            Err(error) => {
                stats.record_error();
                rig::log_trial_error(&error);
                Timer::after_millis(IDLE_POLL_MS).await;
            }
        }
    }
}

fn configure_stage(stage: &mut RigStage) -> Result<(), StageError<embassy_stm32::usart::Error>> {
    stage.set_jitter(STAGE_JITTER_UM);
    stage.set_max_speed(STAGE_MAX_SPEED)?;
    stage.set_acceleration(STAGE_ACCELERATION)?;
    stage.home(AxisSelect::All)
}

fn apply_spout_target(rig: &mut Rig) {
    let Some((x_um, y_um)) = rig
        .link
        .handler_mut()
        .and_then(TrialCommandHandler::take_spout_target)
    else {
        return;
    };

    match rig.stage.stream_line(x_um, y_um) {
        Ok(()) => defmt::info!("rig: spout -> ({}, {}) um", x_um, y_um),
        Err(error) => defmt::warn!("rig: stage move failed: {}", error),
    }
}
