//! Terminal stand-ins for the rig's host UART, clock, lick sensor and valve.
//!
//! Keys typed in raw mode become inbound serial bytes. `Tab` simulates a
//! short lick contact; `Esc` or `Ctrl-C` ends the session.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use satellites_core::port::{MonotonicClock, StreamPort};
use satellites_core::trial::{LickSensor, RewardValve};

use crate::transcript::{TranscriptLogger, TranscriptRole};

/// How long one `Tab` press keeps the lick sensor active.
pub const LICK_PULSE: Duration = Duration::from_millis(150);

pub type SharedTranscript = Rc<RefCell<TranscriptLogger>>;

/// Flags shared between the console port and the simulated peripherals.
#[derive(Debug, Default)]
pub struct ConsoleState {
    quit: Cell<bool>,
    lick_until: Cell<Option<Instant>>,
}

impl ConsoleState {
    pub fn quit_requested(&self) -> bool {
        self.quit.get()
    }

    fn request_quit(&self) {
        self.quit.set(true);
    }

    fn pulse_lick(&self, now: Instant) {
        self.lick_until.set(Some(now + LICK_PULSE));
    }

    fn licking_at(&self, now: Instant) -> bool {
        self.lick_until.get().is_some_and(|until| now < until)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyAction {
    Byte(u8),
    Lick,
    Quit,
    Ignore,
}

pub fn translate_key(key: KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }

    match key.code {
        KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Tab => KeyAction::Lick,
        KeyCode::Enter => KeyAction::Byte(b'\n'),
        KeyCode::Char(c) => u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .map_or(KeyAction::Ignore, KeyAction::Byte),
        _ => KeyAction::Ignore,
    }
}

/// Host serial link backed by the terminal.
pub struct ConsolePort {
    state: Rc<ConsoleState>,
    transcript: SharedTranscript,
    delimiter: char,
    inbound: VecDeque<u8>,
    typed_line: String,
}

impl ConsolePort {
    pub fn new(state: Rc<ConsoleState>, transcript: SharedTranscript, delimiter: char) -> Self {
        Self {
            state,
            transcript,
            delimiter,
            inbound: VecDeque::new(),
            typed_line: String::new(),
        }
    }

    fn poll_terminal(&mut self) -> io::Result<()> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                self.apply(translate_key(key))?;
            }
        }
        Ok(())
    }

    fn apply(&mut self, action: KeyAction) -> io::Result<()> {
        match action {
            KeyAction::Byte(b'\n') => {
                self.inbound.push_back(b'\n');
                echo("\r\n")?;
                let line = std::mem::take(&mut self.typed_line);
                self.transcript
                    .borrow_mut()
                    .append_line(TranscriptRole::Host, &line)?;
            }
            KeyAction::Byte(byte) => {
                self.inbound.push_back(byte);
                let typed = char::from(byte);
                self.typed_line.push(typed);
                echo(typed.encode_utf8(&mut [0; 4]))?;
            }
            KeyAction::Lick => {
                self.state.pulse_lick(Instant::now());
                self.transcript
                    .borrow_mut()
                    .append_line(TranscriptRole::Note, "lick contact")?;
            }
            KeyAction::Quit => self.state.request_quit(),
            KeyAction::Ignore => {}
        }
        Ok(())
    }
}

impl StreamPort for ConsolePort {
    type Error = io::Error;

    fn bytes_available(&mut self) -> bool {
        if let Err(error) = self.poll_terminal() {
            eprint!("terminal poll failed: {error}\r\n");
            self.state.request_quit();
        }
        !self.inbound.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn write_line(&mut self, line: &str) -> Result<(), Self::Error> {
        echo(&format!("{line}\r\n"))?;
        self.transcript
            .borrow_mut()
            .log_telemetry(line, self.delimiter)
    }
}

fn echo(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

/// Milliseconds since the emulator started, wrapping like the firmware clock.
pub struct HostClock {
    started_at: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for HostClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&mut self) -> u32 {
        self.started_at.elapsed().as_millis() as u32
    }
}

pub struct KeyLickSensor {
    state: Rc<ConsoleState>,
}

impl KeyLickSensor {
    pub fn new(state: Rc<ConsoleState>) -> Self {
        Self { state }
    }
}

impl LickSensor for KeyLickSensor {
    fn is_licking(&mut self) -> bool {
        self.state.licking_at(Instant::now())
    }
}

/// Valve that only reports its transitions.
pub struct ConsoleValve {
    transcript: SharedTranscript,
}

impl ConsoleValve {
    pub fn new(transcript: SharedTranscript) -> Self {
        Self { transcript }
    }

    fn note(&self, message: &str) {
        let logged = echo(&format!("  [{message}]\r\n")).and_then(|()| {
            self.transcript
                .borrow_mut()
                .append_line(TranscriptRole::Note, message)
        });
        if let Err(error) = logged {
            eprint!("valve log failed: {error}\r\n");
        }
    }
}

impl RewardValve for ConsoleValve {
    fn open(&mut self) {
        self.note("valve open");
    }

    fn close(&mut self) {
        self.note("valve closed");
    }
}
