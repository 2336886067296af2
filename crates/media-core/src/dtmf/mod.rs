//! In-band DTMF detection

mod detector;

pub use detector::DtmfDetector;

/// A completed DTMF key press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfEvent {
    /// Key: `0`-`9`, `*`, `#`, `A`-`D`
    pub digit: char,
    /// RFC 4733 event code
    pub event: u8,
    /// How long the tone was present
    pub duration_ms: u32,
    /// Processor timestamp at which the tone was first seen
    pub start_ts: u64,
}

/// RFC 4733 event code of a key
pub fn event_code(digit: char) -> Option<u8> {
    match digit {
        '0'..='9' => Some(digit as u8 - b'0'),
        '*' => Some(10),
        '#' => Some(11),
        'A'..='D' => Some(digit as u8 - b'A' + 12),
        _ => None,
    }
}
