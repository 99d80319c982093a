//! Streaming command parser for the host link.
//!
//! The parser never buffers a whole line. Each byte advances a small state
//! machine, and the registered [`CommandHandler`] is invoked every time a field
//! completes: once per delimiter and once more at the terminating control byte.
//! A line such as `GO,3,5\n` therefore produces three dispatches,
//! `(GO, 0, 0)`, `(GO, 1, 3)` and `(GO, 2, 5)`, and handlers use
//! [`Command::field_index`] to decide which argument they are looking at.

pub mod telemetry;

use heapless::String;

use crate::port::StreamPort;

/// Maximum number of bytes retained for a command name.
pub const MAX_TAG_LEN: usize = 32;

/// Field separator used when none is configured.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Snapshot handed to the handler at each dispatch point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Command<'a> {
    /// Command name accumulated before the first delimiter.
    pub name: &'a str,
    /// Position of the field that just completed; 0 is the name itself.
    pub field_index: u32,
    /// Signed value of the completed field.
    pub value: i32,
}

impl Command<'_> {
    /// Case-insensitive comparison against a command name.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Receives dispatch events from a [`CommandParser`].
pub trait CommandHandler {
    fn handle(&mut self, command: &Command<'_>);
}

impl<F> CommandHandler for F
where
    F: FnMut(&Command<'_>),
{
    fn handle(&mut self, command: &Command<'_>) {
        self(command);
    }
}

/// Incremental parse state. Reset whenever a control byte arrives.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParserState {
    tag: String<MAX_TAG_LEN>,
    field_index: u32,
    accumulator: i32,
    negative: bool,
}

impl ParserState {
    /// Creates an empty state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tag: String::new(),
            field_index: 0,
            accumulator: 0,
            negative: false,
        }
    }

    /// Command name accumulated for the current line.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.tag.as_str()
    }

    /// Number of delimiters seen on the current line.
    #[must_use]
    pub const fn field_index(&self) -> u32 {
        self.field_index
    }

    /// Signed value of the field being assembled.
    #[must_use]
    pub const fn value(&self) -> i32 {
        if self.negative {
            self.accumulator.wrapping_neg()
        } else {
            self.accumulator
        }
    }

    fn push_digit(&mut self, byte: u8) {
        self.accumulator = self
            .accumulator
            .wrapping_mul(10)
            .wrapping_add(i32::from(byte - b'0'));
    }

    fn push_tag(&mut self, byte: u8) {
        // Overlong and non-ASCII names are truncated rather than rejected.
        if byte.is_ascii() {
            let _ = self.tag.push(char::from(byte));
        }
    }

    fn clear_field(&mut self) {
        self.accumulator = 0;
        self.negative = false;
    }

    fn end_line(&mut self) {
        self.tag.clear();
        self.field_index = 0;
    }
}

/// Byte-at-a-time command parser with a single optional handler.
#[derive(Debug)]
pub struct CommandParser<H> {
    state: ParserState,
    delimiter: u8,
    handler: Option<H>,
}

impl<H> Default for CommandParser<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> CommandParser<H> {
    /// Creates a parser using [`DEFAULT_DELIMITER`] with no handler attached.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ParserState::new(),
            delimiter: DEFAULT_DELIMITER,
            handler: None,
        }
    }

    /// Creates a parser with `handler` already attached.
    #[must_use]
    pub const fn with_handler(handler: H) -> Self {
        Self {
            state: ParserState::new(),
            delimiter: DEFAULT_DELIMITER,
            handler: Some(handler),
        }
    }

    pub fn set_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    #[must_use]
    pub const fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Attaches `handler`, returning the one it replaces.
    pub fn attach_handler(&mut self, handler: H) -> Option<H> {
        self.handler.replace(handler)
    }

    /// Detaches and returns the current handler. Bytes keep updating state.
    pub fn detach_handler(&mut self) -> Option<H> {
        self.handler.take()
    }

    #[must_use]
    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> Option<&mut H> {
        self.handler.as_mut()
    }

    #[must_use]
    pub const fn state(&self) -> &ParserState {
        &self.state
    }

    #[must_use]
    pub const fn current_field_index(&self) -> u32 {
        self.state.field_index
    }

    #[must_use]
    pub const fn current_value(&self) -> i32 {
        self.state.value()
    }

    #[must_use]
    pub fn current_command_name(&self) -> &str {
        self.state.tag()
    }
}

impl<H> CommandParser<H>
where
    H: CommandHandler,
{
    /// Advances the state machine by one byte.
    pub fn ingest(&mut self, byte: u8) {
        let is_delimiter = byte == self.delimiter;
        let is_control = byte.is_ascii_control();
        let in_arguments = self.state.field_index > 0;

        if in_arguments && byte.is_ascii_digit() {
            self.state.push_digit(byte);
        } else if in_arguments && byte == b'-' {
            self.state.negative = !self.state.negative;
        } else if is_delimiter || is_control {
            self.dispatch();
            self.state.clear_field();
        } else if !in_arguments {
            self.state.push_tag(byte);
        }

        if is_delimiter {
            self.state.field_index = self.state.field_index.saturating_add(1);
        }

        if is_control {
            self.state.end_line();
        }
    }

    /// Consumes a single byte from `port` if one is buffered.
    pub fn consume_one<P>(&mut self, port: &mut P) -> bool
    where
        P: StreamPort + ?Sized,
    {
        if !port.bytes_available() {
            return false;
        }

        match port.read_byte() {
            Some(byte) => {
                self.ingest(byte);
                true
            }
            None => false,
        }
    }

    /// Drains every buffered byte from `port`, returning how many were consumed.
    pub fn consume_available<P>(&mut self, port: &mut P) -> usize
    where
        P: StreamPort + ?Sized,
    {
        let mut consumed = 0;
        while self.consume_one(port) {
            consumed += 1;
        }
        consumed
    }

    fn dispatch(&mut self) {
        let Some(handler) = self.handler.as_mut() else {
            return;
        };

        if self.state.tag.is_empty() {
            return;
        }

        handler.handle(&Command {
            name: self.state.tag.as_str(),
            field_index: self.state.field_index,
            value: self.state.value(),
        });
    }
}
