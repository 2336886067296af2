//! Linear 16-bit PCM (L16, network byte order)

use super::AudioCodec;
use crate::error::{Error, Result};

/// L16 mono codec at a configurable clock rate
#[derive(Debug, Clone)]
pub struct Linear16Codec {
    clock_rate: u32,
}

impl Linear16Codec {
    pub fn new(clock_rate: u32) -> Self {
        Self { clock_rate }
    }
}

impl AudioCodec for Linear16Codec {
    fn name(&self) -> &'static str {
        "L16"
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn encode(&self, pcm: &[i16], out: &mut Vec<u8>) -> Result<usize> {
        out.reserve(pcm.len() * 2);
        for sample in pcm {
            out.extend_from_slice(&sample.to_be_bytes());
        }
        Ok(pcm.len())
    }

    fn decode(&self, payload: &[u8], out: &mut Vec<i16>) -> Result<usize> {
        if payload.len() % 2 != 0 {
            return Err(Error::codec("L16", format!("odd payload length {}", payload.len())));
        }
        out.extend(
            payload
                .chunks_exact(2)
                .map(|pair| i16::from_be_bytes([pair[0], pair[1]])),
        );
        Ok(payload.len() / 2)
    }

    fn payload_len(&self, samples: usize) -> usize {
        samples * 2
    }
}
