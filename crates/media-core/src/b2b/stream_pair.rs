//! Per media line state of a B2B call
//!
//! An [`AudioStreamPair`] holds the RTP streams of leg A and leg B for one
//! audio media line together with what each leg needs for transcoding: the
//! `initialized` flag, an optional alternate audio source and an optional
//! DTMF detector.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::audio::AudioSource;
use crate::dtmf::{DtmfDetector, DtmfEvent};
use crate::error::Result;
use crate::events::SignalingLeg;
use crate::rtp::{RtpAudioStream, RtpReceiver};
use crate::sdp::{Sdp, SdpMedia};
use crate::types::{Leg, PayloadMask, PlayoutType};

/// Media state of one leg within a pair
struct LegMedia {
    stream: Arc<dyn RtpAudioStream>,
    initialized: bool,
    alternate: Option<Box<dyn AudioSource>>,
    dtmf: Option<DtmfDetector>,
}

impl LegMedia {
    fn new(stream: Arc<dyn RtpAudioStream>) -> Self {
        Self {
            stream,
            initialized: false,
            alternate: None,
            dtmf: None,
        }
    }

    fn close_alternate(&mut self) {
        if let Some(mut source) = self.alternate.take() {
            source.close();
        }
    }
}

/// Detaches a stream from the receiver and reattaches it on drop
struct ProcessingPause<'a> {
    receiver: &'a dyn RtpReceiver,
    stream: &'a Arc<dyn RtpAudioStream>,
    reattach: bool,
}

impl<'a> ProcessingPause<'a> {
    fn new(receiver: &'a dyn RtpReceiver, stream: &'a Arc<dyn RtpAudioStream>) -> Self {
        let reattach = stream.has_local_socket() && receiver.remove_stream(stream.local_port());
        Self {
            receiver,
            stream,
            reattach,
        }
    }
}

impl Drop for ProcessingPause<'_> {
    fn drop(&mut self) {
        if self.reattach {
            if let Err(e) = self.receiver.add_stream(self.stream.clone()) {
                warn!(
                    "Failed to reattach stream on port {} to the receiver: {}",
                    self.stream.local_port(),
                    e
                );
            }
        }
    }
}

/// Streams of leg A and leg B for one audio media line
pub struct AudioStreamPair {
    a: LegMedia,
    b: LegMedia,
    receiver: Arc<dyn RtpReceiver>,
    playout_type: PlayoutType,
}

impl AudioStreamPair {
    /// Pair two freshly allocated streams and start receiving on both
    pub fn new(
        a: Arc<dyn RtpAudioStream>,
        b: Arc<dyn RtpAudioStream>,
        receiver: Arc<dyn RtpReceiver>,
        playout_type: PlayoutType,
    ) -> Result<Self> {
        for stream in [&a, &b] {
            if stream.has_local_socket() {
                receiver.add_stream(stream.clone())?;
            }
        }
        Ok(Self {
            a: LegMedia::new(a),
            b: LegMedia::new(b),
            receiver,
            playout_type,
        })
    }

    fn leg(&self, leg: Leg) -> &LegMedia {
        match leg {
            Leg::A => &self.a,
            Leg::B => &self.b,
        }
    }

    fn leg_mut(&mut self, leg: Leg) -> &mut LegMedia {
        match leg {
            Leg::A => &mut self.a,
            Leg::B => &mut self.b,
        }
    }

    /// Stream of `leg`
    pub fn stream(&self, leg: Leg) -> &Arc<dyn RtpAudioStream> {
        &self.leg(leg).stream
    }

    pub fn local_port(&self, leg: Leg) -> u16 {
        self.leg(leg).stream.local_port()
    }

    pub fn is_initialized(&self, leg: Leg) -> bool {
        self.leg(leg).initialized
    }

    /// Relay filter installed on the stream of `leg`
    pub fn relay_mask(&self, leg: Leg) -> Option<PayloadMask> {
        self.leg(leg).stream.relay_mask()
    }

    pub fn has_dtmf_detector(&self, leg: Leg) -> bool {
        self.leg(leg).dtmf.is_some()
    }

    /// Install the payload types of `media` (the remote description of
    /// `leg`) as relay filter on the other leg's stream, targeting the
    /// stream of `leg`. No payloads disables relay on that stream.
    ///
    /// The reconfigured stream is detached from the receiver meanwhile.
    pub fn set_relay(&mut self, leg: Leg, media: &SdpMedia) {
        let peer = &self.leg(leg).stream;
        let stream = &self.leg(leg.opposite()).stream;
        let _pause = ProcessingPause::new(self.receiver.as_ref(), stream);

        if media.payloads.is_empty() {
            stream.disable_rtp_relay();
            debug!("Relay disabled on leg {} stream, nothing offered", leg.opposite());
            return;
        }

        let mask: PayloadMask = media.payload_types().collect();
        if let Err(e) = stream.enable_rtp_relay(mask, Arc::downgrade(peer)) {
            warn!(
                "Enabling relay {} on leg {} stream failed, relay disabled: {}",
                mask,
                leg.opposite(),
                e
            );
            stream.disable_rtp_relay();
        }
    }

    /// Bind the stream of `leg` to the negotiated SDPs and mark it initialized
    pub fn init_leg(
        &mut self,
        leg: Leg,
        signaling: &dyn SignalingLeg,
        local_sdp: &Sdp,
        remote_sdp: &Sdp,
        media_index: usize,
    ) -> Result<()> {
        let playout_type = self.playout_type;
        let receiver = self.receiver.clone();
        let media = self.leg_mut(leg);

        media.stream.set_playout_type(playout_type);
        media.stream.init(local_sdp, remote_sdp, media_index)?;
        if media.stream.has_local_socket() && !receiver.is_registered(media.stream.local_port()) {
            receiver.add_stream(media.stream.clone())?;
        }

        media.initialized = true;
        media.dtmf = signaling
            .dtmf_detection_enabled()
            .then(|| DtmfDetector::new(media.stream.sample_rate()));

        debug!(
            "Leg {} stream on port {} initialized for media line {}",
            leg,
            media.stream.local_port(),
            media_index
        );
        Ok(())
    }

    /// Clear `initialized` and drop the DTMF detector of `leg`.
    /// Returns whether there was anything to reset.
    pub fn reset_leg(&mut self, leg: Leg) -> bool {
        let media = self.leg_mut(leg);
        let was_set = media.initialized || media.dtmf.is_some();
        media.initialized = false;
        media.dtmf = None;
        was_set
    }

    /// Move one frame into the stream of `leg` if it is due.
    ///
    /// The frame comes from the alternate source of `leg` if one is set,
    /// otherwise from the other leg's stream when its read interval is open.
    /// Audio read from the other leg goes through that leg's DTMF detector.
    /// Returns the bytes written, 0 when nothing was due or available.
    pub fn write_leg(&mut self, leg: Leg, ts: u64, scratch: &mut [u8]) -> Result<usize> {
        let (dst, src) = match leg {
            Leg::A => (&mut self.a, &mut self.b),
            Leg::B => (&mut self.b, &mut self.a),
        };
        if !dst.initialized || !(src.initialized || dst.alternate.is_some()) {
            return Ok(0);
        }

        let frame_size = dst.stream.frame_size().min(scratch.len());
        if frame_size == 0 || !dst.stream.send_interval_reached(ts, frame_size) {
            return Ok(0);
        }
        let frame = &mut scratch[..frame_size];

        let got = if let Some(source) = dst.alternate.as_mut() {
            source.get(ts, frame)?
        } else if src.stream.check_interval(ts, frame_size) {
            let got = src.stream.get(ts, frame)?;
            if got > 0 {
                if let Some(detector) = src.dtmf.as_mut() {
                    detector.process(ts, &frame[..got]);
                }
            }
            got
        } else {
            0
        };

        if got == 0 {
            trace!("Nothing to write to leg {} at {}", leg, ts);
            return Ok(0);
        }
        dst.stream.put(ts, &frame[..got])
    }

    /// Replace the alternate source of `leg`; the previous one is closed
    pub fn set_alternate_input(&mut self, leg: Leg, source: Option<Box<dyn AudioSource>>) {
        let media = self.leg_mut(leg);
        media.close_alternate();
        media.alternate = source;
    }

    pub fn has_alternate_input(&self, leg: Leg) -> bool {
        self.leg(leg).alternate.is_some()
    }

    /// Completed DTMF key presses detected in audio from `leg`
    pub fn drain_dtmf(&mut self, leg: Leg) -> Vec<DtmfEvent> {
        self.leg_mut(leg)
            .dtmf
            .as_mut()
            .map(|detector| detector.drain_events())
            .unwrap_or_default()
    }

    pub fn clear_rtp_timeout(&self) {
        self.a.stream.clear_rtp_timeout();
        self.b.stream.clear_rtp_timeout();
    }

    /// Detach both streams from the receiver, stop relaying, close
    /// alternate sources and drop detectors
    pub fn clear(&mut self) {
        for leg in Leg::both() {
            let receiver = self.receiver.clone();
            let media = self.leg_mut(leg);
            if media.stream.has_local_socket() {
                receiver.remove_stream(media.stream.local_port());
            }
            media.stream.disable_rtp_relay();
            media.close_alternate();
            media.dtmf = None;
            media.initialized = false;
        }
    }
}

impl std::fmt::Debug for AudioStreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamPair")
            .field("a_port", &self.a.stream.local_port())
            .field("a_initialized", &self.a.initialized)
            .field("b_port", &self.b.stream.local_port())
            .field("b_initialized", &self.b.initialized)
            .finish()
    }
}
