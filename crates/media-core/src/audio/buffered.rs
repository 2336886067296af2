use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::AudioSource;
use crate::buffer::{RingBuffer, RingWrite};
use crate::error::Result;

/// Ring-buffer backed source fed through a [`BufferedAudioWriter`]
#[derive(Debug)]
pub struct BufferedAudio {
    ring: Arc<Mutex<RingBuffer>>,
}

/// Producer half of a [`BufferedAudio`]; cheap to clone
#[derive(Debug, Clone)]
pub struct BufferedAudioWriter {
    ring: Arc<Mutex<RingBuffer>>,
}

impl BufferedAudio {
    /// Create a source holding at most `capacity` bytes plus its writer
    pub fn new(capacity: usize) -> (Self, BufferedAudioWriter) {
        let ring = Arc::new(Mutex::new(RingBuffer::new(capacity)));
        (
            Self { ring: ring.clone() },
            BufferedAudioWriter { ring },
        )
    }

    /// Bytes waiting to be played
    pub fn buffered(&self) -> usize {
        self.ring.lock().len()
    }
}

impl AudioSource for BufferedAudio {
    fn get(&mut self, _ts: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.ring.lock().read(buf))
    }

    fn close(&mut self) {
        self.ring.lock().clear();
    }
}

impl BufferedAudioWriter {
    /// Queue PCM for playout. Overflow drops the oldest queued audio.
    pub fn write(&self, pcm: &[u8]) -> Result<RingWrite> {
        let outcome = self.ring.lock().write(pcm)?;
        if let RingWrite::Overflowed { dropped, .. } = outcome {
            warn!("Alternate audio buffer overflow, dropped {} bytes", dropped);
        }
        Ok(outcome)
    }
}
