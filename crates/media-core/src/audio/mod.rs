//! Alternate audio sources
//!
//! A leg of a B2B call normally hears the audio of the other leg. An
//! alternate source (hold music, a prompt, a buffer fed by some other
//! component) can replace it per leg; see
//! [`B2BMediaSession::set_alternate_input`](crate::b2b::B2BMediaSession::set_alternate_input).
//!
//! Sources deliver 16-bit little-endian mono PCM.

mod buffered;
mod cached;

pub use buffered::{BufferedAudio, BufferedAudioWriter};
pub use cached::CachedAudio;

use crate::error::Result;

/// Pull-based PCM source driven by the media processor
pub trait AudioSource: Send {
    /// Fill `buf` with audio for timestamp `ts`, returning the number of
    /// bytes produced. 0 means nothing is available right now.
    fn get(&mut self, ts: u64, buf: &mut [u8]) -> Result<usize>;

    /// Release resources; called once before the source is dropped
    fn close(&mut self) {}
}
