//! RFC 3551 static audio payload types

/// Static payload type assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPayload {
    pub payload_type: u8,
    pub encoding_name: &'static str,
    pub clock_rate: u32,
    pub channels: u32,
}

const fn entry(payload_type: u8, encoding_name: &'static str, clock_rate: u32, channels: u32) -> StaticPayload {
    StaticPayload {
        payload_type,
        encoding_name,
        clock_rate,
        channels,
    }
}

const STATIC_AUDIO: &[StaticPayload] = &[
    entry(0, "PCMU", 8000, 1),
    entry(3, "GSM", 8000, 1),
    entry(4, "G723", 8000, 1),
    entry(5, "DVI4", 8000, 1),
    entry(6, "DVI4", 16000, 1),
    entry(7, "LPC", 8000, 1),
    entry(8, "PCMA", 8000, 1),
    // G.722 advertises 8000 although it samples at 16 kHz (RFC 3551 4.5.2)
    entry(9, "G722", 8000, 1),
    entry(10, "L16", 44100, 2),
    entry(11, "L16", 44100, 1),
    entry(12, "QCELP", 8000, 1),
    entry(13, "CN", 8000, 1),
    entry(14, "MPA", 90000, 1),
    entry(15, "G728", 8000, 1),
    entry(16, "DVI4", 11025, 1),
    entry(17, "DVI4", 22050, 1),
    entry(18, "G729", 8000, 1),
];

/// Look up a static audio payload type
pub fn static_payload(payload_type: u8) -> Option<&'static StaticPayload> {
    STATIC_AUDIO.iter().find(|p| p.payload_type == payload_type)
}
