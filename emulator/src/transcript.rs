use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use satellites_core::protocol::telemetry::decode_record;

/// Timestamped log of everything crossing the emulated rig's ports.
pub struct TranscriptLogger {
    writer: BufWriter<File>,
    started_at: Instant,
}

impl TranscriptLogger {
    pub fn create(path: &Path, seed: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
            started_at: Instant::now(),
        };

        logger.write_header(seed)?;
        Ok(logger)
    }

    fn write_header(&mut self, seed: u64) -> io::Result<()> {
        writeln!(self.writer, "# Rig emulator transcript (seed {seed})")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    pub fn append_line(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        self.append_at(elapsed, role, line)
    }

    fn append_at(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }

    /// Logs an outbound telemetry line together with its decoded form.
    pub fn log_telemetry(&mut self, line: &str, delimiter: char) -> io::Result<()> {
        let message = format!("{line:<24} {}", describe_telemetry(line, delimiter));
        self.append_line(TranscriptRole::Rig, &message)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptRole {
    Host,
    Rig,
    Stage,
    Note,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Rig => "RIG <",
            TranscriptRole::Stage => "STG <",
            TranscriptRole::Note => "  --",
        }
    }
}

pub fn describe_telemetry(line: &str, delimiter: char) -> String {
    match decode_record(line, delimiter) {
        Ok(record) if record.fields.is_empty() => {
            format!("[{} @{}ms]", record.tag, record.timestamp_ms)
        }
        Ok(record) => format!(
            "[{} @{}ms values={}]",
            record.tag,
            record.timestamp_ms,
            record.fields.join(" ")
        ),
        Err(error) => format!("[undecoded: {error}]"),
    }
}
