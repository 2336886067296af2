//! G.711 codec implementation
//!
//! G.711 is an ITU-T standard for audio companding, primarily used in telephony.
//! It has two main variants:
//! - μ-law (PCMU, used in North America and Japan)
//! - A-law (PCMA, used in Europe and the rest of the world)
//!
//! Both variants encode 16-bit PCM samples into 8-bit values at 8 kHz.

use once_cell::sync::Lazy;

use super::AudioCodec;
use crate::error::Result;

/// G.711 codec variant (μ-law or A-law)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// μ-law (PCMU, payload type 0)
    PCMU,
    /// A-law (PCMA, payload type 8)
    PCMA,
}

/// G.711 codec implementation
#[derive(Debug, Clone)]
pub struct G711Codec {
    /// The specific variant (μ-law or A-law)
    variant: G711Variant,
}

impl G711Codec {
    /// Create a new G.711 codec with the specified variant
    pub fn new(variant: G711Variant) -> Self {
        Self { variant }
    }

    /// Get the G.711 variant
    pub fn variant(&self) -> G711Variant {
        self.variant
    }
}

impl AudioCodec for G711Codec {
    fn name(&self) -> &'static str {
        match self.variant {
            G711Variant::PCMU => "PCMU",
            G711Variant::PCMA => "PCMA",
        }
    }

    fn clock_rate(&self) -> u32 {
        8000
    }

    fn encode(&self, pcm: &[i16], out: &mut Vec<u8>) -> Result<usize> {
        out.reserve(pcm.len());
        match self.variant {
            G711Variant::PCMU => out.extend(pcm.iter().map(|s| encode_ulaw(*s))),
            G711Variant::PCMA => out.extend(pcm.iter().map(|s| encode_alaw(*s))),
        }
        Ok(pcm.len())
    }

    fn decode(&self, payload: &[u8], out: &mut Vec<i16>) -> Result<usize> {
        let table: &[i16; 256] = match self.variant {
            G711Variant::PCMU => &ULAW_DECODE_TABLE,
            G711Variant::PCMA => &ALAW_DECODE_TABLE,
        };
        out.extend(payload.iter().map(|b| table[*b as usize]));
        Ok(payload.len())
    }

    fn payload_len(&self, samples: usize) -> usize {
        samples
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

static ULAW_DECODE_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = decode_ulaw(i as u8);
    }
    table
});

static ALAW_DECODE_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = decode_alaw(i as u8);
    }
    table
});

/// Segment of a biased magnitude: position of its highest set bit above bit 7
fn segment(magnitude: i32) -> i32 {
    let mut seg = 0;
    let mut value = magnitude >> 8;
    while value > 0 && seg < 7 {
        seg += 1;
        value >>= 1;
    }
    seg
}

fn encode_ulaw(sample: i16) -> u8 {
    let sample = i32::from(sample);
    let sign = if sample < 0 { 0x80 } else { 0 };
    let magnitude = sample.abs().min(ULAW_CLIP) + ULAW_BIAS;

    let exponent = segment(magnitude);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

fn decode_ulaw(encoded: u8) -> i16 {
    let value = !encoded;
    let sign = value & 0x80;
    let exponent = i32::from((value >> 4) & 0x07);
    let mantissa = i32::from(value & 0x0F);

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn encode_alaw(sample: i16) -> u8 {
    let sample = i32::from(sample);
    // A-law sets the sign bit for positive values
    let (sign, magnitude) = if sample >= 0 {
        (0x80, sample >> 3)
    } else {
        (0x00, (-sample - 1) >> 3)
    };
    let magnitude = magnitude.min(0x0FFF);

    let encoded = if magnitude < 32 {
        (magnitude >> 1) as u8
    } else {
        let mut exponent = 1;
        let mut value = magnitude >> 5;
        while value > 1 {
            exponent += 1;
            value >>= 1;
        }
        let mantissa = (magnitude >> exponent) & 0x0F;
        ((exponent << 4) | mantissa) as u8
    };

    (encoded | sign) ^ 0x55
}

fn decode_alaw(encoded: u8) -> i16 {
    let value = encoded ^ 0x55;
    let sign = value & 0x80;
    let exponent = i32::from((value >> 4) & 0x07);
    let mantissa = i32::from(value & 0x0F);

    let magnitude = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    if sign != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}
