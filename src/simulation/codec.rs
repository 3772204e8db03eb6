//! Text payload codec for broadcast packets.
//!
//! A payload is an ordered list of `f64` values. Each value is rendered as
//! decimal text, values are joined with [`SEPARATOR`] and the last one is
//! followed by [`TERMINATOR`] instead:
//!
//! ```text
//! [1.5, 2.0, 3.25]  ->  b"1.5,2,3.25\0"
//! ```
//!
//! Decoding reads up to the first terminator and splits on the separator set.
//! In the default permissive mode a segment that does not parse becomes `0.0`;
//! strict mode reports a [`DecodeError`] instead.

use thiserror::Error;

/// Byte placed between two rendered values.
pub const SEPARATOR: u8 = b',';
/// Byte placed after the last rendered value.
pub const TERMINATOR: u8 = b'\0';
/// Additional separator accepted on decode only.
const LOOSE_SEPARATOR: u8 = b' ';

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Packet contains no payload values")]
    Empty,

    #[error("Segment {index} is not a number: {text:?}")]
    InvalidSegment { index: usize, text: String },
}

/// Payload encoder/decoder. Holds configuration only, no per-packet state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadCodec {
    /// Digits after the decimal point. `None` uses the shortest text that
    /// parses back to the identical `f64`.
    pub precision: Option<usize>,
    /// Fail on malformed segments instead of substituting zero.
    pub strict: bool,
}

impl PayloadCodec {
    pub fn new(precision: Option<usize>, strict: bool) -> Self {
        Self { precision, strict }
    }

    /// Encode `values` into a separator-delimited, terminator-ended buffer.
    ///
    /// Non-finite values render as `NaN`, `inf` and `-inf`, which `decode`
    /// parses back. An empty slice encodes to an empty buffer.
    pub fn encode(&self, values: &[f64]) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(values.len() * 8);
        for (i, value) in values.iter().enumerate() {
            let text = match self.precision {
                Some(precision) => format!("{value:.precision$}"),
                None => format!("{value}"),
            };
            buffer.extend_from_slice(text.as_bytes());
            buffer.push(if i + 1 == values.len() { TERMINATOR } else { SEPARATOR });
        }
        buffer
    }

    /// Decode a buffer produced by [`encode`](Self::encode).
    ///
    /// Bytes after the first terminator are ignored. A permissive decode never
    /// fails and always returns at least one value.
    pub fn decode(&self, buffer: &[u8]) -> Result<Vec<f64>, DecodeError> {
        let body = match buffer.iter().position(|&b| b == TERMINATOR) {
            Some(end) => &buffer[..end],
            None => buffer,
        };

        if body.is_empty() {
            if self.strict {
                return Err(DecodeError::Empty);
            }
            log::warn!("Decoded an empty payload, substituting 0");
            return Ok(vec![0.0]);
        }

        let mut values = Vec::new();
        for (index, segment) in body.split(|&b| b == SEPARATOR || b == LOOSE_SEPARATOR).enumerate() {
            match parse_segment(segment) {
                Some(value) => values.push(value),
                None if self.strict => {
                    return Err(DecodeError::InvalidSegment {
                        index,
                        text: String::from_utf8_lossy(segment).into_owned(),
                    });
                }
                None => {
                    log::warn!("Payload segment {} ({:?}) is not a number, substituting 0", index, String::from_utf8_lossy(segment));
                    values.push(0.0);
                }
            }
        }
        Ok(values)
    }
}

fn parse_segment(segment: &[u8]) -> Option<f64> {
    std::str::from_utf8(segment).ok()?.parse::<f64>().ok()
}
