use bytes::Bytes;
use tracing::debug;

use super::AudioSource;
use crate::error::Result;

/// PCM held in memory and played once or in a loop
///
/// The data is shared, so many calls can play the same prompt without
/// copying it.
#[derive(Debug, Clone)]
pub struct CachedAudio {
    data: Bytes,
    position: usize,
    looping: bool,
}

impl CachedAudio {
    pub fn new(data: Bytes, looping: bool) -> Self {
        Self {
            data,
            position: 0,
            looping,
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Restart from the beginning
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Played to the end and not looping
    pub fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.data.len()
    }
}

impl AudioSource for CachedAudio {
    fn get(&mut self, _ts: u64, buf: &mut [u8]) -> Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < buf.len() {
            if self.position >= self.data.len() {
                if !self.looping {
                    break;
                }
                debug!("Rewinding cached audio");
                self.position = 0;
            }
            let n = (self.data.len() - self.position).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.data[self.position..self.position + n]);
            self.position += n;
            filled += n;
        }
        Ok(filled)
    }

    fn close(&mut self) {
        self.position = self.data.len();
        self.looping = false;
    }
}
