//! B2B media session
//!
//! Owns the [`AudioStreamPair`]s of one bridged call and the four SDPs
//! (local and remote, per leg) they are configured from. The session is
//! attached to the [`MediaScheduler`] once all four SDPs are known and stays
//! there until [`B2BMediaSession::stop`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::stream_pair::AudioStreamPair;
use crate::audio::{AudioSource, BufferedAudio, BufferedAudioWriter};
use crate::config::B2bMediaConfig;
use crate::error::{Error, Result};
use crate::events::{MediaEvent, SignalingLeg};
use crate::processor::{MediaScheduler, MediaSession};
use crate::rtp::{RtpReceiver, RtpStreamFactory};
use crate::sdp::Sdp;
use crate::types::{new_callgroup, Callgroup, Leg, MediaSessionId, PayloadMask};

/// Server-wide collaborators shared by all B2B sessions
#[derive(Clone)]
pub struct B2BMediaContext {
    pub scheduler: Arc<MediaScheduler>,
    pub factory: Arc<dyn RtpStreamFactory>,
    pub receiver: Arc<dyn RtpReceiver>,
    pub config: B2bMediaConfig,
}

#[derive(Default)]
struct SessionState {
    a_local: Sdp,
    a_remote: Sdp,
    b_local: Sdp,
    b_remote: Sdp,
    pairs: Vec<AudioStreamPair>,
    /// Handed to the scheduler, cleared only by `stop`
    registered: bool,
    stopped: bool,
}

impl SessionState {
    fn local(&self, leg: Leg) -> &Sdp {
        match leg {
            Leg::A => &self.a_local,
            Leg::B => &self.b_local,
        }
    }

    fn remote(&self, leg: Leg) -> &Sdp {
        match leg {
            Leg::A => &self.a_remote,
            Leg::B => &self.b_remote,
        }
    }

    fn local_mut(&mut self, leg: Leg) -> &mut Sdp {
        match leg {
            Leg::A => &mut self.a_local,
            Leg::B => &mut self.b_local,
        }
    }

    fn remote_mut(&mut self, leg: Leg) -> &mut Sdp {
        match leg {
            Leg::A => &mut self.a_remote,
            Leg::B => &mut self.b_remote,
        }
    }

    fn clear_pairs(&mut self) {
        for pair in self.pairs.iter_mut() {
            pair.clear();
        }
        self.pairs.clear();
    }

    fn all_sdps_known(&self) -> bool {
        !(self.a_local.is_empty() || self.a_remote.is_empty() || self.b_local.is_empty() || self.b_remote.is_empty())
    }
}

/// Media of one B2B call: relay, transcoding and DTMF detection
/// between leg A and leg B
pub struct B2BMediaSession {
    id: MediaSessionId,
    callgroup: Callgroup,
    a: Arc<dyn SignalingLeg>,
    b: Arc<dyn SignalingLeg>,
    context: B2BMediaContext,
    state: Mutex<SessionState>,
    references: AtomicUsize,
    /// The scheduler holds a reference
    scheduler_ref: AtomicBool,
    processing: AtomicBool,
    finalized: AtomicBool,
    this: Weak<B2BMediaSession>,
}

impl B2BMediaSession {
    /// New session in a fresh callgroup
    pub fn new(context: &B2BMediaContext, a: Arc<dyn SignalingLeg>, b: Arc<dyn SignalingLeg>) -> Arc<Self> {
        Self::with_callgroup(context, a, b, new_callgroup())
    }

    /// New session processed together with the other members of `callgroup`
    pub fn with_callgroup(
        context: &B2BMediaContext,
        a: Arc<dyn SignalingLeg>,
        b: Arc<dyn SignalingLeg>,
        callgroup: impl Into<Callgroup>,
    ) -> Arc<Self> {
        let id = MediaSessionId::generate();
        let callgroup = callgroup.into();
        debug!("B2B media session {} created in callgroup {}", id, callgroup);
        Arc::new_cyclic(|this| Self {
            id,
            callgroup,
            a,
            b,
            context: context.clone(),
            state: Mutex::new(SessionState::default()),
            references: AtomicUsize::new(0),
            scheduler_ref: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &MediaSessionId {
        &self.id
    }

    pub fn callgroup(&self) -> &str {
        &self.callgroup
    }

    fn signaling(&self, leg: Leg) -> &dyn SignalingLeg {
        match leg {
            Leg::A => self.a.as_ref(),
            Leg::B => self.b.as_ref(),
        }
    }

    /// Store the remote SDP of `leg` and reconfigure relay and transcoding
    ///
    /// Every audio line gets a stream pair (allocated on first sight). The
    /// line's payload types become the relay filter on the other leg's
    /// stream, and the stream of `leg` is re-initialized when the local SDP
    /// of `leg` is already known.
    ///
    /// If streams cannot be allocated for a line, the lines that already
    /// have a pair stay configured, registration is still re-evaluated and
    /// the allocation error is returned.
    pub fn update_remote_sdp(&self, leg: Leg, sdp: &Sdp) -> Result<()> {
        let remote = sdp.clone().normalized();
        let mut state = self.state.lock();
        if state.stopped {
            debug!("Session {} stopped, ignoring remote SDP of leg {}", self.id, leg);
            return Ok(());
        }
        *state.remote_mut(leg) = remote.clone();
        let local = state.local(leg).clone();

        let mut allocation = Ok(());
        for (pair_index, (media_index, media)) in remote.audio_media().enumerate() {
            if pair_index == state.pairs.len() {
                match self.create_pair() {
                    Ok(pair) => state.pairs.push(pair),
                    Err(e) => {
                        warn!(
                            "Session {}: no streams for media line {} of leg {}, {} pairs left in use: {}",
                            self.id,
                            media_index,
                            leg,
                            state.pairs.len(),
                            e
                        );
                        allocation = Err(e);
                        break;
                    }
                }
            }
            let pair = &mut state.pairs[pair_index];
            pair.set_relay(leg, media);
            pair.reset_leg(leg);
            if !local.is_empty() {
                self.init_pair_leg(pair, leg, &local, &remote, media_index);
            }
        }

        let orphaned = self.update_processing_state(&mut state);
        drop(state);
        if orphaned {
            self.finalize();
        }
        allocation
    }

    /// Store the local SDP of `leg` and, when its remote SDP is known,
    /// re-initialize the matching streams
    pub fn update_local_sdp(&self, leg: Leg, sdp: &Sdp) -> Result<()> {
        let local = sdp.clone().normalized();
        let mut state = self.state.lock();
        if state.stopped {
            debug!("Session {} stopped, ignoring local SDP of leg {}", self.id, leg);
            return Ok(());
        }
        *state.local_mut(leg) = local.clone();
        let remote = state.remote(leg).clone();

        if !remote.is_empty() {
            let lines: Vec<usize> = local.audio_media().map(|(index, _)| index).collect();
            for (pair, media_index) in state.pairs.iter_mut().zip(lines) {
                pair.reset_leg(leg);
                self.init_pair_leg(pair, leg, &local, &remote, media_index);
            }
        }

        let orphaned = self.update_processing_state(&mut state);
        drop(state);
        if orphaned {
            self.finalize();
        }
        Ok(())
    }

    fn create_pair(&self) -> Result<AudioStreamPair> {
        let a = self.context.factory.create_stream(Leg::A)?;
        let b = self.context.factory.create_stream(Leg::B)?;
        AudioStreamPair::new(a, b, self.context.receiver.clone(), self.context.config.playout_type)
    }

    /// A failed init leaves the leg uninitialized; relay keeps working
    fn init_pair_leg(&self, pair: &mut AudioStreamPair, leg: Leg, local: &Sdp, remote: &Sdp, media_index: usize) {
        if let Err(e) = pair.init_leg(leg, self.signaling(leg), local, remote, media_index) {
            warn!(
                "Session {}: leg {} media line {} not transcodable: {}",
                self.id, leg, media_index, e
            );
        }
    }

    /// Attach to the scheduler once all four SDPs are known.
    /// Returns true if a failed attach dropped the last reference.
    fn update_processing_state(&self, state: &mut SessionState) -> bool {
        if state.registered || state.stopped || !state.all_sdps_known() {
            return false;
        }
        let Some(this) = self.this.upgrade() else {
            return false;
        };

        self.add_reference();
        self.scheduler_ref.store(true, Ordering::Release);
        state.registered = true;
        match self.context.scheduler.add_session(this, &self.callgroup) {
            Ok(()) => {
                info!("Session {} handed to the media processor", self.id);
                false
            }
            Err(e) => {
                warn!("Session {} could not be scheduled: {}", self.id, e);
                state.registered = false;
                self.scheduler_ref.store(false, Ordering::Release);
                self.release_reference()
            }
        }
    }

    /// Rewrite `sdp` (about to be sent to `leg`) so its media goes through
    /// this session's streams of `leg`
    ///
    /// The session connection is replaced if present. Every active audio
    /// line gets `relay_address` (if it carries its own connection) and the
    /// local port of the corresponding pair's stream. Inactive lines keep
    /// port 0 but still consume a pair. More audio lines than pairs is an
    /// error; the lines that had a pair are rewritten nonetheless.
    pub fn replace_connection_address(&self, sdp: &mut Sdp, leg: Leg, relay_address: &str) -> Result<()> {
        let state = self.state.lock();

        if let Some(connection) = sdp.connection.as_mut() {
            connection.address = relay_address.to_string();
        }

        let mut pairs = state.pairs.iter();
        let mut audio_lines = 0;
        for media in sdp.media.iter_mut().filter(|m| m.is_audio()) {
            audio_lines += 1;
            let Some(pair) = pairs.next() else {
                continue;
            };
            if media.is_active() {
                if let Some(connection) = media.connection.as_mut() {
                    connection.address = relay_address.to_string();
                }
                media.port = pair.local_port(leg);
            }
        }

        if audio_lines > state.pairs.len() {
            warn!(
                "Session {}: SDP for leg {} has {} audio lines but only {} stream pairs",
                self.id,
                leg,
                audio_lines,
                state.pairs.len()
            );
            return Err(Error::SdpStructureMismatch {
                media_lines: audio_lines,
                streams: state.pairs.len(),
            });
        }
        Ok(())
    }

    /// Play `source` towards `leg` instead of the audio of the other leg.
    /// `None` restores the bridged audio.
    pub fn set_alternate_input(&self, leg: Leg, pair_index: usize, source: Option<Box<dyn AudioSource>>) -> Result<()> {
        let mut state = self.state.lock();
        let pair = state
            .pairs
            .get_mut(pair_index)
            .ok_or(Error::MediaLineNotFound { index: pair_index })?;
        pair.set_alternate_input(leg, source);
        Ok(())
    }

    /// Install a buffered alternate input towards `leg` and return its
    /// producer side
    pub fn attach_buffered_input(&self, leg: Leg, pair_index: usize) -> Result<BufferedAudioWriter> {
        let (audio, writer) = BufferedAudio::new(self.context.config.alternate_buffer_size);
        self.set_alternate_input(leg, pair_index, Some(Box::new(audio)))?;
        Ok(writer)
    }

    /// Leave the media processor and release all media
    pub fn stop(&self) {
        let was_registered = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.clear_pairs();
            std::mem::replace(&mut state.registered, false)
        };
        if !was_registered {
            return;
        }

        match self.context.scheduler.remove_session(&self.id) {
            Ok(()) => debug!("Session {} removed from the media processor", self.id),
            Err(e) => {
                debug!("Session {} not attached to the media processor: {}", self.id, e);
                // Suspended or already detached: drop the scheduler's reference here
                self.on_media_processing_terminated();
            }
        }
    }

    pub fn add_reference(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; returns true when it was the last one
    pub fn release_reference(&self) -> bool {
        let previous = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        matches!(previous, Ok(1))
    }

    pub fn reference_count(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    /// Tear down after the last reference is gone; runs once
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear_audio();
        info!("Session {} finalized", self.id);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Whether the session has been handed to the scheduler and not stopped
    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    /// Whether a worker is currently ticking the session
    pub fn is_processing_media(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn pair_count(&self) -> usize {
        self.state.lock().pairs.len()
    }

    /// Relay filter of the `leg` stream in pair `pair_index`
    pub fn relay_mask(&self, leg: Leg, pair_index: usize) -> Option<PayloadMask> {
        self.state.lock().pairs.get(pair_index).and_then(|p| p.relay_mask(leg))
    }

    pub fn is_initialized(&self, leg: Leg, pair_index: usize) -> bool {
        self.state
            .lock()
            .pairs
            .get(pair_index)
            .map(|p| p.is_initialized(leg))
            .unwrap_or(false)
    }

    pub fn local_port(&self, leg: Leg, pair_index: usize) -> Option<u16> {
        self.state.lock().pairs.get(pair_index).map(|p| p.local_port(leg))
    }

    fn post_to_both(&self, event: MediaEvent) {
        self.a.post_media_event(event.clone());
        self.b.post_media_event(event);
    }
}

impl MediaSession for B2BMediaSession {
    fn session_id(&self) -> &MediaSessionId {
        &self.id
    }

    /// Received media is pushed by the receiver tasks
    fn read_streams(&self, _ts: u64, _buffer: &mut [u8]) -> Result<()> {
        Ok(())
    }

    fn write_streams(&self, ts: u64, buffer: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        for pair in state.pairs.iter_mut() {
            for leg in Leg::both() {
                pair.write_leg(leg, ts, buffer)?;
            }
        }
        Ok(())
    }

    fn process_dtmf_events(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            for pair in state.pairs.iter_mut() {
                for leg in Leg::both() {
                    events.extend(pair.drain_dtmf(leg).into_iter().map(|event| (leg, event)));
                }
            }
        }

        for (leg, event) in events {
            debug!("Session {}: DTMF '{}' from leg {}", self.id, event.digit, leg);
            self.signaling(leg).post_media_event(MediaEvent::Dtmf(event));
        }
    }

    fn clear_audio(&self) {
        self.state.lock().clear_pairs();
    }

    fn clear_rtp_timeout(&self) {
        for pair in self.state.lock().pairs.iter() {
            pair.clear_rtp_timeout();
        }
    }

    fn on_media_processing_started(&self) {
        self.processing.store(true, Ordering::Release);
        debug!("Session {} media processing started", self.id);
    }

    fn on_media_processing_terminated(&self) {
        self.processing.store(false, Ordering::Release);
        self.clear_audio();
        if !self.scheduler_ref.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("Session {} media processing terminated", self.id);
        self.post_to_both(MediaEvent::ProcessingTerminated);
        if self.release_reference() {
            self.finalize();
        }
    }

    fn on_media_processing_suspended(&self) {
        self.processing.store(false, Ordering::Release);
        debug!("Session {} media processing suspended", self.id);
    }

    fn on_media_processing_failed(&self, reason: &str) {
        self.post_to_both(MediaEvent::ProcessingFailed {
            reason: reason.to_string(),
        });
    }
}

impl std::fmt::Debug for B2BMediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2BMediaSession")
            .field("id", &self.id)
            .field("callgroup", &self.callgroup)
            .field("references", &self.reference_count())
            .field("processing", &self.is_processing_media())
            .finish()
    }
}
