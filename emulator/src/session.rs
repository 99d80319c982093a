use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use satellites_core::link::{HostLink, LinkError};
use satellites_core::port::{RngSource, StreamPort};
use satellites_core::stage::{StageClient, StageError};
use satellites_core::trial::{
    TrialCommandHandler, TrialError, TrialOutcome, TrialSettings, poll_session,
};

use crate::Options;
use crate::console::{
    ConsolePort, ConsoleState, ConsoleValve, HostClock, KeyLickSensor, SharedTranscript,
};
use crate::transcript::{TranscriptLogger, TranscriptRole};

const IDLE_POLL: Duration = Duration::from_millis(10);

type EmulatedLink = HostLink<ConsolePort, HostClock, TrialCommandHandler>;

/// Stage link that records every command instead of moving hardware.
pub struct StagePort {
    transcript: SharedTranscript,
}

impl StreamPort for StagePort {
    type Error = io::Error;

    fn bytes_available(&mut self) -> bool {
        false
    }

    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn write_line(&mut self, line: &str) -> Result<(), Self::Error> {
        self.transcript
            .borrow_mut()
            .append_line(TranscriptRole::Stage, line)
    }
}

pub struct Session {
    link: EmulatedLink,
    stage: StageClient<StagePort, RngSource<SmallRng>>,
    rng: RngSource<SmallRng>,
    sensor: KeyLickSensor,
    valve: ConsoleValve,
    state: Rc<ConsoleState>,
    transcript: SharedTranscript,
    trials: u32,
    hits: u32,
}

impl Session {
    pub fn new(options: &Options) -> io::Result<Self> {
        let transcript = Rc::new(RefCell::new(TranscriptLogger::create(
            &options.transcript,
            options.seed,
        )?));
        let state = Rc::new(ConsoleState::default());

        let port = ConsolePort::new(
            Rc::clone(&state),
            Rc::clone(&transcript),
            char::from(options.delimiter),
        );
        let mut link = HostLink::new(
            port,
            HostClock::new(),
            TrialCommandHandler::new(TrialSettings::default()),
        );
        link.parser_mut().set_delimiter(options.delimiter);

        let stage = StageClient::new(
            StagePort {
                transcript: Rc::clone(&transcript),
            },
            RngSource::new(SmallRng::seed_from_u64(options.seed.rotate_left(32))),
        );

        Ok(Self {
            link,
            stage,
            rng: RngSource::new(SmallRng::seed_from_u64(options.seed)),
            sensor: KeyLickSensor::new(Rc::clone(&state)),
            valve: ConsoleValve::new(Rc::clone(&transcript)),
            state,
            transcript,
            trials: 0,
            hits: 0,
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        while !self.state.quit_requested() {
            self.step()?;
        }

        let summary = format!("session closed: {} trials, {} hits", self.trials, self.hits);
        self.note(&summary)
    }

    fn step(&mut self) -> io::Result<()> {
        self.apply_spout_target()?;

        let outcome = poll_session(
            &mut self.link,
            &mut self.rng,
            &mut self.sensor,
            &mut self.valve,
        );
        match outcome {
            Ok(Some(outcome)) => self.record(&outcome),
            Ok(None) => {
                thread::sleep(IDLE_POLL);
                Ok(())
            }
            Err(TrialError::Link(LinkError::Port(error))) => Err(error),
            Err(error) => {
                self.note(&format!("trial aborted: {error}"))?;
                thread::sleep(IDLE_POLL);
                Ok(())
            }
        }
    }

    fn record(&mut self, outcome: &TrialOutcome) -> io::Result<()> {
        self.trials += 1;
        if outcome.hit {
            self.hits += 1;
        }

        let verdict = if outcome.hit { "hit" } else { "miss" };
        self.note(&format!(
            "trial {} {verdict}: iti={}ms latency={}ms{}",
            self.trials,
            outcome.iti_ms,
            outcome.latency_ms,
            if outcome.quiet_extended {
                " (quiet period extended)"
            } else {
                ""
            }
        ))
    }

    fn apply_spout_target(&mut self) -> io::Result<()> {
        let Some((x_um, y_um)) = self
            .link
            .handler_mut()
            .and_then(TrialCommandHandler::take_spout_target)
        else {
            return Ok(());
        };

        match self.stage.stream_line(x_um, y_um) {
            Ok(()) => self.note(&format!("spout -> ({x_um}, {y_um}) um")),
            Err(StageError::Port(error)) => Err(error),
            Err(error) => self.note(&format!("stage command rejected: {error}")),
        }
    }

    fn note(&mut self, message: &str) -> io::Result<()> {
        print!("  [{message}]\r\n");
        self.transcript
            .borrow_mut()
            .append_line(TranscriptRole::Note, message)
    }
}
