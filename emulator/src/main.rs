mod console;
mod session;
mod transcript;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use crossterm::terminal;
use satellites_core::protocol::DEFAULT_DELIMITER;
use session::Session;

const DEFAULT_TRANSCRIPT: &str = "transcripts/rig-session.log";
const USAGE: &str =
    "Usage: rig-emulator [--delimiter <char>] [--transcript <path>] [--seed <n>]";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub delimiter: u8,
    pub transcript: PathBuf,
    pub seed: u64,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1), rand::random).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    println!(
        "Rig emulator ready (delimiter `{}`, seed {}).",
        char::from(options.delimiter),
        options.seed
    );
    println!("Type commands such as `ITI,2000,2000,0,6000` or `START`, then Enter.");
    println!("Tab simulates a lick; Esc or Ctrl-C quits.");

    let mut session = Session::new(&options)?;
    let _raw = RawMode::enable()?;
    session.run()
}

/// Keeps the terminal in raw mode for as long as it lives.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn parse_options<I, F>(args: I, random_seed: F) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
    F: FnOnce() -> u64,
{
    let mut delimiter = DEFAULT_DELIMITER;
    let mut transcript = PathBuf::from(DEFAULT_TRANSCRIPT);
    let mut seed = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--delimiter" => delimiter = parse_delimiter(&value()?)?,
            "--transcript" => transcript = PathBuf::from(value()?),
            "--seed" => {
                let raw = value()?;
                seed = Some(
                    raw.parse()
                        .map_err(|_| format!("Invalid seed `{raw}`"))?,
                );
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    Ok(Options {
        delimiter,
        transcript,
        seed: seed.unwrap_or_else(random_seed),
    })
}

fn parse_delimiter(raw: &str) -> Result<u8, String> {
    let mut chars = raw.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(format!("Delimiter must be a single character, got `{raw}`"));
    };

    match u8::try_from(c) {
        Ok(byte) if byte.is_ascii_graphic() && !byte.is_ascii_digit() && byte != b'-' => Ok(byte),
        _ => Err(format!("Unusable delimiter `{raw}`")),
    }
}
