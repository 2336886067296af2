//! Test doubles for the stream, receiver and signaling seams
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use b2bmedia_media_core::config::{B2bMediaConfig, MediaProcessorConfig};
use b2bmedia_media_core::rtp::RtpPacket;
use b2bmedia_media_core::sdp::{Sdp, SdpMedia, SdpPayload};
use b2bmedia_media_core::{
    B2BMediaContext, Error, Leg, MediaEvent, MediaScheduler, PayloadMask, PlayoutType, Result,
    RtpAudioStream, RtpReceiver, RtpStreamFactory, SignalingLeg,
};

pub const FRAME_SIZE: usize = 320;

/// Stream that serves queued PCM and records what is written to it
pub struct MockStream {
    pub leg: Leg,
    pub port: u16,
    pub initialized: AtomicBool,
    pub init_calls: AtomicUsize,
    pub fail_put: AtomicBool,
    pub source: Mutex<VecDeque<u8>>,
    pub puts: Mutex<Vec<Vec<u8>>>,
    pub relay: Mutex<Option<(PayloadMask, Weak<dyn RtpAudioStream>)>>,
    pub relayed: Mutex<Vec<RtpPacket>>,
    pub playout_type: Mutex<Option<PlayoutType>>,
    pub timeout_clears: AtomicUsize,
}

impl MockStream {
    pub fn new(leg: Leg, port: u16) -> Self {
        Self {
            leg,
            port,
            initialized: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            fail_put: AtomicBool::new(false),
            source: Mutex::new(VecDeque::new()),
            puts: Mutex::new(Vec::new()),
            relay: Mutex::new(None),
            relayed: Mutex::new(Vec::new()),
            playout_type: Mutex::new(None),
            timeout_clears: AtomicUsize::new(0),
        }
    }

    /// Queue PCM to be returned by `get`
    pub fn feed(&self, pcm: &[u8]) {
        self.source.lock().extend(pcm.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.puts.lock().concat()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

impl RtpAudioStream for MockStream {
    fn local_port(&self) -> u16 {
        self.port
    }

    fn has_local_socket(&self) -> bool {
        false
    }

    fn local_socket(&self) -> Option<Arc<UdpSocket>> {
        None
    }

    fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    fn sample_rate(&self) -> u32 {
        8000
    }

    fn send_interval_reached(&self, _ts: u64, _frame_size: usize) -> bool {
        true
    }

    fn check_interval(&self, _ts: u64, _frame_size: usize) -> bool {
        true
    }

    fn get(&self, _ts: u64, buf: &mut [u8]) -> Result<usize> {
        let mut source = self.source.lock();
        let n = buf.len().min(source.len());
        for (slot, byte) in buf.iter_mut().zip(source.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn put(&self, _ts: u64, buf: &[u8]) -> Result<usize> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Error::stream("send failed"));
        }
        self.puts.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn enable_rtp_relay(&self, mask: PayloadMask, peer: Weak<dyn RtpAudioStream>) -> Result<()> {
        *self.relay.lock() = Some((mask, peer));
        Ok(())
    }

    fn disable_rtp_relay(&self) {
        *self.relay.lock() = None;
    }

    fn relay_mask(&self) -> Option<PayloadMask> {
        self.relay.lock().as_ref().map(|(mask, _)| *mask)
    }

    fn relay_packet(&self, packet: &RtpPacket) -> Result<()> {
        self.relayed.lock().push(packet.clone());
        Ok(())
    }

    fn init(&self, local_sdp: &Sdp, remote_sdp: &Sdp, media_index: usize) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let local = local_sdp
            .media
            .get(media_index)
            .ok_or(Error::MediaLineNotFound { index: media_index })?;
        let remote = remote_sdp
            .media
            .get(media_index)
            .ok_or(Error::MediaLineNotFound { index: media_index })?;
        if !remote.payload_types().any(|pt| local.payload(pt).is_some()) {
            return Err(Error::NoCompatiblePayload { media_index });
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_playout_type(&self, playout_type: PlayoutType) {
        *self.playout_type.lock() = Some(playout_type);
    }

    fn on_packet_received(&self, data: &[u8], _from: SocketAddr) {
        let Ok(packet) = RtpPacket::parse(data) else {
            return;
        };
        let target = self.relay.lock().as_ref().and_then(|(mask, peer)| {
            mask.contains(packet.header.payload_type)
                .then(|| peer.upgrade())
                .flatten()
        });
        if let Some(peer) = target {
            let _ = peer.relay_packet(&packet);
        }
    }

    fn clear_rtp_timeout(&self) {
        self.timeout_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`MockStream`]s and keeping them for inspection
pub struct MockFactory {
    next_port: AtomicU16,
    limit: Option<usize>,
    pub streams: Mutex<Vec<Arc<MockStream>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            next_port: AtomicU16::new(30000),
            limit: None,
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Factory running out of ports after `limit` streams
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    pub fn created(&self) -> usize {
        self.streams.lock().len()
    }

    /// Stream of `leg` in pair `pair_index`
    pub fn stream(&self, leg: Leg, pair_index: usize) -> Arc<MockStream> {
        let offset = match leg {
            Leg::A => 0,
            Leg::B => 1,
        };
        self.streams.lock()[pair_index * 2 + offset].clone()
    }
}

impl RtpStreamFactory for MockFactory {
    fn create_stream(&self, leg: Leg) -> Result<Arc<dyn RtpAudioStream>> {
        let mut streams = self.streams.lock();
        if let Some(limit) = self.limit {
            if streams.len() >= limit {
                return Err(Error::PortsExhausted {
                    min: 30000,
                    max: 30000 + 2 * limit as u16,
                });
            }
        }
        let port = self.next_port.fetch_add(2, Ordering::SeqCst);
        let stream = Arc::new(MockStream::new(leg, port));
        streams.push(stream.clone());
        Ok(stream)
    }
}

/// Receiver that only tracks registrations
#[derive(Default)]
pub struct NullReceiver {
    pub ports: Mutex<Vec<u16>>,
}

impl RtpReceiver for NullReceiver {
    fn add_stream(&self, stream: Arc<dyn RtpAudioStream>) -> Result<()> {
        let port = stream.local_port();
        let mut ports = self.ports.lock();
        if !ports.contains(&port) {
            ports.push(port);
        }
        Ok(())
    }

    fn remove_stream(&self, port: u16) -> bool {
        let mut ports = self.ports.lock();
        let before = ports.len();
        ports.retain(|p| *p != port);
        ports.len() != before
    }

    fn is_registered(&self, port: u16) -> bool {
        self.ports.lock().contains(&port)
    }
}

/// Signaling leg recording the events it receives
pub struct RecordingLeg {
    pub leg: Leg,
    pub dtmf: bool,
    pub events: Mutex<Vec<MediaEvent>>,
}

impl RecordingLeg {
    pub fn new(leg: Leg, dtmf: bool) -> Arc<Self> {
        Arc::new(Self {
            leg,
            dtmf,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<MediaEvent> {
        self.events.lock().clone()
    }
}

impl SignalingLeg for RecordingLeg {
    fn leg_id(&self) -> Leg {
        self.leg
    }

    fn dtmf_detection_enabled(&self) -> bool {
        self.dtmf
    }

    fn post_media_event(&self, event: MediaEvent) {
        self.events.lock().push(event);
    }
}

pub fn processor_config(threads: usize) -> MediaProcessorConfig {
    MediaProcessorConfig {
        threads,
        tick_interval_ms: 10,
        system_clock_rate: 32000,
    }
}

pub struct Harness {
    pub context: B2BMediaContext,
    pub factory: Arc<MockFactory>,
    pub receiver: Arc<NullReceiver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_factory(MockFactory::new())
    }

    pub fn with_factory(factory: MockFactory) -> Self {
        let factory = Arc::new(factory);
        let receiver = Arc::new(NullReceiver::default());
        let context = B2BMediaContext {
            scheduler: MediaScheduler::new(&processor_config(1)).unwrap(),
            factory: factory.clone(),
            receiver: receiver.clone(),
            config: B2bMediaConfig::default(),
        };
        Self {
            context,
            factory,
            receiver,
        }
    }
}

/// SDP with one audio line per entry of `lines`
pub fn audio_sdp(address: &str, lines: &[(u16, &[u8])]) -> Sdp {
    let media = lines
        .iter()
        .map(|(port, pts)| SdpMedia::audio(*port, pts.iter().map(|pt| SdpPayload::new(*pt)).collect()))
        .collect();
    Sdp::with_media(address, media)
}

/// 16-bit little-endian PCM of a dual tone
pub fn dual_tone(low: f32, high: f32, rate: u32, ms: u32) -> Vec<u8> {
    let samples = rate * ms / 1000;
    let mut pcm = Vec::with_capacity(samples as usize * 2);
    for i in 0..samples {
        let t = i as f32 / rate as f32;
        let value = 8000.0 * (2.0 * std::f32::consts::PI * low * t).sin()
            + 8000.0 * (2.0 * std::f32::consts::PI * high * t).sin();
        pcm.extend_from_slice(&(value as i16).to_le_bytes());
    }
    pcm
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
