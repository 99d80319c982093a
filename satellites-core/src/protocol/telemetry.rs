//! Outbound telemetry lines and their host-side decoder.
//!
//! Data lines share the inbound delimiter: `tag,timestamp[,value...]`. The
//! encoder renders into a bounded buffer so firmware never allocates; the
//! decoder is a small `winnow` grammar used by host tooling to read the lines
//! back.

use core::fmt::{self, Write as _};
use core::str::FromStr;

use heapless::{String, Vec};
use winnow::ModalResult;
use winnow::ascii::dec_uint;
use winnow::combinator::{opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_till;

/// Maximum rendered length of a telemetry line, excluding the newline.
pub const MAX_LINE_LEN: usize = 128;

/// Maximum number of value fields a decoded record can carry.
pub const MAX_FIELDS: usize = 16;

/// Rendered telemetry line.
pub type TelemetryLine = String<MAX_LINE_LEN>;

/// Errors raised while encoding or decoding telemetry lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryError {
    /// Rendered line did not fit in [`MAX_LINE_LEN`] bytes.
    LineOverflow,
    /// Decoded line carried more than [`MAX_FIELDS`] values.
    TooManyFields,
    /// Decoded line did not match `tag,timestamp[,value...]`.
    Malformed,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::LineOverflow => {
                write!(f, "telemetry line exceeds {MAX_LINE_LEN} bytes")
            }
            TelemetryError::TooManyFields => {
                write!(f, "telemetry line carries more than {MAX_FIELDS} values")
            }
            TelemetryError::Malformed => f.write_str("malformed telemetry line"),
        }
    }
}

/// Renders `tag<d>timestamp[<d>value...]` into a bounded line.
pub fn format_record<V>(
    tag: &str,
    timestamp_ms: u32,
    values: &[V],
    delimiter: char,
) -> Result<TelemetryLine, TelemetryError>
where
    V: fmt::Display,
{
    let mut line = TelemetryLine::new();
    write!(line, "{tag}{delimiter}{timestamp_ms}").map_err(|_| TelemetryError::LineOverflow)?;
    for value in values {
        write!(line, "{delimiter}{value}").map_err(|_| TelemetryError::LineOverflow)?;
    }
    Ok(line)
}

/// Telemetry line decoded on the host side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord<'a> {
    pub tag: &'a str,
    pub timestamp_ms: u32,
    pub fields: Vec<&'a str, MAX_FIELDS>,
}

impl TelemetryRecord<'_> {
    /// Parses value field `index` as `T`.
    pub fn field<T>(&self, index: usize) -> Option<T>
    where
        T: FromStr,
    {
        self.fields.get(index).and_then(|raw| raw.parse().ok())
    }
}

/// Decodes a single telemetry line. Trailing `\r`/`\n` are ignored.
pub fn decode_record(line: &str, delimiter: char) -> Result<TelemetryRecord<'_>, TelemetryError> {
    let mut overflow = false;
    let mut input = line.trim_end_matches(['\r', '\n']);

    let parsed = record(&mut input, delimiter, &mut overflow);
    if overflow {
        return Err(TelemetryError::TooManyFields);
    }

    let record = parsed.map_err(|_| TelemetryError::Malformed)?;
    if !input.is_empty() {
        return Err(TelemetryError::Malformed);
    }
    Ok(record)
}

fn record<'i>(
    input: &mut &'i str,
    delimiter: char,
    overflow: &mut bool,
) -> ModalResult<TelemetryRecord<'i>> {
    let tag = take_till(1.., |c: char| c == delimiter || c.is_ascii_control()).parse_next(input)?;
    let timestamp_ms: u32 = preceded(delimiter, dec_uint).parse_next(input)?;

    let mut fields = Vec::new();
    while let Some(field) = opt(preceded(
        delimiter,
        take_till(0.., |c: char| c == delimiter || c.is_ascii_control()),
    ))
    .parse_next(input)?
    {
        if fields.push(field).is_err() {
            *overflow = true;
            return Err(ErrMode::Cut(ContextError::new()));
        }
    }

    Ok(TelemetryRecord {
        tag,
        timestamp_ms,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_header_only_records() {
        let line = format_record::<u32>("cue", 1_250, &[], ',').expect("fits");
        assert_eq!(line.as_str(), "cue,1250");
    }

    #[test]
    fn formats_value_lists_with_the_configured_delimiter() {
        let line = format_record("lick", 42, &[-3, 7, 11], ';').expect("fits");
        assert_eq!(line.as_str(), "lick;42;-3;7;11");
    }

    #[test]
    fn oversized_records_are_rejected() {
        let values = [u32::MAX; 32];
        assert_eq!(
            format_record("bulk", 0, &values, ','),
            Err(TelemetryError::LineOverflow)
        );
    }

    #[test]
    fn decodes_rendered_records() {
        let record = decode_record("water,9000,100,2.5\r\n", ',').expect("valid record");

        assert_eq!(record.tag, "water");
        assert_eq!(record.timestamp_ms, 9_000);
        assert_eq!(record.fields.as_slice(), &["100", "2.5"]);
        assert_eq!(record.field::<u32>(0), Some(100));
        assert_eq!(record.field::<f32>(1), Some(2.5));
        assert_eq!(record.field::<u32>(2), None);
    }

    #[test]
    fn rejects_lines_without_a_timestamp() {
        assert_eq!(decode_record("cue", ','), Err(TelemetryError::Malformed));
        assert_eq!(decode_record("cue,soon", ','), Err(TelemetryError::Malformed));
        assert_eq!(decode_record(",15", ','), Err(TelemetryError::Malformed));
    }

    #[test]
    fn rejects_records_with_too_many_fields() {
        let mut line: String<96> = String::new();
        line.push_str("bulk,1").expect("fits");
        for _ in 0..=MAX_FIELDS {
            line.push_str(",0").expect("fits");
        }

        assert_eq!(decode_record(&line, ','), Err(TelemetryError::TooManyFields));
    }
}
