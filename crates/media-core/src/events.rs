//! Events delivered from the media engine to the signaling layer

use crate::dtmf::DtmfEvent;
use crate::types::Leg;

/// Media event posted to a signaling leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// In-band DTMF detected in audio received from this leg
    Dtmf(DtmfEvent),

    /// Media processing of the session ended normally
    ProcessingTerminated,

    /// Media processing failed and the session was detached from the processor
    ProcessingFailed {
        /// Error that caused the detach
        reason: String,
    },
}

/// The signaling session owning one leg of a B2B call
pub trait SignalingLeg: Send + Sync {
    /// Leg this session drives
    fn leg_id(&self) -> Leg;

    /// Whether in-band DTMF should be detected on this leg
    fn dtmf_detection_enabled(&self) -> bool;

    /// Deliver an event; must not block
    fn post_media_event(&self, event: MediaEvent);
}
