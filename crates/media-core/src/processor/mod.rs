//! Media processor
//!
//! A fixed pool of worker threads drives every attached [`MediaSession`]
//! on a common tick. Sessions sharing a callgroup always run on the same
//! worker, so their audio hooks never execute concurrently with each other.
//!
//! Attach and detach requests are queued to the owning worker and applied
//! at its next tick boundary; detaching blocks the caller until the worker
//! has let go of the session.

mod callgroups;
mod scheduler;
mod worker;

pub use scheduler::MediaScheduler;

use crate::error::Result;
use crate::types::MediaSessionId;

/// Size of the per-worker scratch buffer handed to the audio hooks
pub const AUDIO_BUFFER_SIZE: usize = 4096;

/// A session that can be driven by the [`MediaScheduler`]
///
/// The audio hooks are only ever called from the worker owning the
/// session's callgroup.
pub trait MediaSession: Send + Sync {
    fn session_id(&self) -> &MediaSessionId;

    /// Pull received media at processor timestamp `ts`
    fn read_streams(&self, ts: u64, buffer: &mut [u8]) -> Result<()>;

    /// Push due frames at processor timestamp `ts`
    fn write_streams(&self, ts: u64, buffer: &mut [u8]) -> Result<()>;

    /// Deliver DTMF detected during the last tick
    fn process_dtmf_events(&self);

    /// Release all media resources
    fn clear_audio(&self);

    fn clear_rtp_timeout(&self);

    /// Called on the worker once the session is attached
    fn on_media_processing_started(&self);

    /// Called on the worker once the session is detached for good
    fn on_media_processing_terminated(&self);

    /// Called when the session is detached but expected to come back
    fn on_media_processing_suspended(&self) {}

    /// Called before termination when a hook failed or panicked
    fn on_media_processing_failed(&self, _reason: &str) {}
}

/// How a session leaves its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachKind {
    /// Terminate processing
    Remove,
    /// Stop ticking the session without terminating it
    SoftRemove,
    /// Release media then terminate processing
    Clear,
}
