//! Notification Decoder
//!
//! Classifies characteristic updates: heart-rate measurements are decoded
//! into a number and delivered immediately, everything else is treated as an
//! opaque payload that is both displayed and handed to the aggregation
//! buffer.

use crate::domain::models::CharacteristicUpdate;
use std::fmt::Write;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of decoding one characteristic update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Numeric reading, bypasses aggregation
    Reading(u32),
    /// Opaque payload; `display` is the text rendering, a newline, then the hex dump
    Payload { display: String, bytes: Vec<u8> },
    /// Nothing to report
    Empty,
}

pub struct NotificationDecoder {
    heart_rate_uuid: Uuid,
}

impl NotificationDecoder {
    pub fn new(heart_rate_uuid: Uuid) -> Self {
        Self { heart_rate_uuid }
    }

    pub fn decode(&self, update: &CharacteristicUpdate) -> Decoded {
        if update.uuid == self.heart_rate_uuid {
            return match parse_heart_rate(&update.value) {
                Some(bpm) => {
                    debug!("Received heart rate: {}", bpm);
                    Decoded::Reading(bpm)
                }
                None => {
                    warn!(
                        "Heart rate measurement too short ({} bytes)",
                        update.value.len()
                    );
                    Decoded::Empty
                }
            };
        }

        if update.value.is_empty() {
            return Decoded::Empty;
        }

        let text = String::from_utf8_lossy(&update.value);
        Decoded::Payload {
            display: format!("{}\n{}", text, to_hex(&update.value)),
            bytes: update.value.clone(),
        }
    }
}

/// Decode a heart-rate measurement
///
/// ```text
/// [0]     : Flags, bit 0 selects the value format (0 = UINT8, 1 = UINT16)
/// [1..]   : Heart rate value (little-endian)
/// ```
///
/// A UINT16 value truncated to a single byte is read from the byte present.
pub fn parse_heart_rate(bytes: &[u8]) -> Option<u32> {
    let (&flags, rest) = bytes.split_first()?;
    if rest.is_empty() {
        return None;
    }

    let width = if flags & 0x01 != 0 {
        debug!("Heart rate format UINT16.");
        2
    } else {
        debug!("Heart rate format UINT8.");
        1
    };

    let value = rest
        .iter()
        .take(width)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
    Some(value)
}

/// Render bytes as uppercase two-digit hex, each byte followed by a space
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        let _ = write!(out, "{:02X} ", b);
    }
    out
}

/// Hex dump of a flushed batch: one line per payload
pub fn hex_dump(batch: &[Vec<u8>]) -> String {
    let mut out = String::new();
    for payload in batch {
        out.push_str(&to_hex(payload));
        out.push('\n');
    }
    out
}
