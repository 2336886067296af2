//! UDP backed RTP audio stream

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::packet::{RtpHeader, RtpPacket};
use super::playout::{PlayoutBuffer, PlayoutStats};
use super::RtpAudioStream;
use crate::codec::{AudioCodec, CodecRegistry};
use crate::config::{JitterConfig, RelayConfig};
use crate::error::{Error, Result};
use crate::sdp::{Sdp, SdpMedia};
use crate::types::{Leg, PayloadMask, PlayoutType};

/// Settings shared by all streams created by one factory
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Clock rate of processor timestamps
    pub system_clock_rate: u32,
    pub default_ptime_ms: u32,
    pub jitter: JitterConfig,
    pub relay: RelayConfig,
    /// Inactivity limit, `None` disables the check
    pub rtp_timeout: Option<Duration>,
}

/// Paces reads or sends to one frame per packetization interval
#[derive(Debug, Default)]
struct IntervalGate {
    last: Option<u64>,
}

impl IntervalGate {
    fn due(&mut self, ts: u64, interval: u64) -> bool {
        match self.last {
            Some(last) if ts.wrapping_sub(last) < interval => false,
            _ => {
                self.last = Some(ts);
                true
            }
        }
    }
}

/// Negotiated send payload
#[derive(Debug, Clone)]
struct SendPayload {
    payload_type: u8,
    codec: Arc<dyn AudioCodec>,
}

#[derive(Debug)]
struct StreamState {
    initialized: bool,
    remote_addr: Option<SocketAddr>,
    send: Option<SendPayload>,
    receive: HashMap<u8, Arc<dyn AudioCodec>>,
    sample_rate: u32,
    frame_samples: usize,
    playout_type: PlayoutType,
    playout: PlayoutBuffer,
    send_gate: IntervalGate,
    read_gate: IntervalGate,
    sequence: u16,
    rtp_timestamp: u32,
    last_received: Instant,
    pcm: Vec<i16>,
    encoded: Vec<u8>,
}

#[derive(Default)]
struct RelayState {
    mask: Option<PayloadMask>,
    peer: Option<Weak<dyn RtpAudioStream>>,
}

/// RTP audio stream on a UDP socket
pub struct RtpAudio {
    leg: Leg,
    socket: Arc<UdpSocket>,
    local_port: u16,
    settings: StreamSettings,
    codecs: Arc<CodecRegistry>,
    ssrc: u32,
    relay_sequence: AtomicU16,
    state: Mutex<StreamState>,
    relay: Mutex<RelayState>,
}

impl RtpAudio {
    /// Wrap a bound socket; the socket is switched to non-blocking mode
    pub fn new(
        leg: Leg,
        socket: UdpSocket,
        settings: StreamSettings,
        codecs: Arc<CodecRegistry>,
    ) -> Result<Self> {
        socket.set_nonblocking(true)?;
        let local_port = socket.local_addr()?.port();
        let sample_rate = 8000;
        let frame_samples = frame_samples(sample_rate, settings.default_ptime_ms);
        let playout = PlayoutBuffer::new(PlayoutType::Adaptive, sample_rate, &settings.jitter);

        debug!("Created RTP stream for leg {} on port {}", leg, local_port);

        Ok(Self {
            leg,
            socket: Arc::new(socket),
            local_port,
            ssrc: rand::random(),
            relay_sequence: AtomicU16::new(rand::random()),
            state: Mutex::new(StreamState {
                initialized: false,
                remote_addr: None,
                send: None,
                receive: HashMap::new(),
                sample_rate,
                frame_samples,
                playout_type: PlayoutType::Adaptive,
                playout,
                send_gate: IntervalGate::default(),
                read_gate: IntervalGate::default(),
                sequence: rand::random(),
                rtp_timestamp: rand::random(),
                last_received: Instant::now(),
                pcm: Vec::new(),
                encoded: Vec::new(),
            }),
            relay: Mutex::new(RelayState::default()),
            settings,
            codecs,
        })
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Address packets are sent to, once initialized
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.lock().remote_addr
    }

    /// Negotiated send payload type
    pub fn send_payload_type(&self) -> Option<u8> {
        self.state.lock().send.as_ref().map(|s| s.payload_type)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn playout_stats(&self) -> PlayoutStats {
        self.state.lock().playout.stats()
    }

    /// No RTP received within the configured timeout
    pub fn is_timed_out(&self) -> bool {
        match self.settings.rtp_timeout {
            Some(limit) => self.state.lock().last_received.elapsed() > limit,
            None => false,
        }
    }

    fn interval_ticks(&self, sample_rate: u32, frame_size: usize) -> u64 {
        let samples = (frame_size / 2) as u64;
        samples * u64::from(self.settings.system_clock_rate) / u64::from(sample_rate.max(1))
    }

    fn send_datagram(&self, data: &[u8], to: SocketAddr) -> Result<()> {
        match self.socket.send_to(data, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                trace!("Socket busy on port {}, dropping packet", self.local_port);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode_into_playout(&self, packet: &RtpPacket) {
        let mut state = self.state.lock();
        state.last_received = Instant::now();

        let codec = match state.receive.get(&packet.header.payload_type) {
            Some(codec) => codec.clone(),
            None => {
                trace!(
                    "Leg {}: no decoder for payload type {}",
                    self.leg,
                    packet.header.payload_type
                );
                return;
            }
        };

        let mut pcm = Vec::with_capacity(packet.payload.len() * 2);
        match codec.decode(&packet.payload, &mut pcm) {
            Ok(_) => state.playout.put(packet.header.timestamp, Instant::now(), pcm),
            Err(e) => debug!("Leg {}: dropping undecodable packet: {}", self.leg, e),
        }
    }
}

fn frame_samples(sample_rate: u32, ptime_ms: u32) -> usize {
    (u64::from(sample_rate) * u64::from(ptime_ms) / 1000) as usize
}

/// First remote payload that is also offered locally and can be encoded
fn negotiate_send_payload(
    codecs: &CodecRegistry,
    local: &SdpMedia,
    remote: &SdpMedia,
) -> Option<SendPayload> {
    remote.payloads.iter().find_map(|payload| {
        let offered_locally = local.payloads.iter().any(|l| {
            l.payload_type == payload.payload_type
                || (!l.encoding_name.is_empty()
                    && l.encoding_name.eq_ignore_ascii_case(&payload.encoding_name)
                    && l.clock_rate == payload.clock_rate)
        });
        if !offered_locally {
            return None;
        }
        codecs.resolve(payload).map(|codec| SendPayload {
            payload_type: payload.payload_type,
            codec,
        })
    })
}

fn remote_address(remote_sdp: &Sdp, media_index: usize, media: &SdpMedia) -> Option<SocketAddr> {
    if !media.is_active() {
        return None;
    }
    let conn = remote_sdp.connection_for(media_index)?;
    let ip: IpAddr = conn.address.parse().ok()?;
    Some(SocketAddr::new(ip, media.port))
}

impl RtpAudioStream for RtpAudio {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn has_local_socket(&self) -> bool {
        true
    }

    fn local_socket(&self) -> Option<Arc<UdpSocket>> {
        Some(self.socket.clone())
    }

    fn frame_size(&self) -> usize {
        self.state.lock().frame_samples * 2
    }

    fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    fn send_interval_reached(&self, ts: u64, frame_size: usize) -> bool {
        let mut state = self.state.lock();
        let interval = self.interval_ticks(state.sample_rate, frame_size);
        state.send_gate.due(ts, interval)
    }

    fn check_interval(&self, ts: u64, frame_size: usize) -> bool {
        let mut state = self.state.lock();
        let interval = self.interval_ticks(state.sample_rate, frame_size);
        state.read_gate.due(ts, interval)
    }

    fn get(&self, _ts: u64, buf: &mut [u8]) -> Result<usize> {
        if self.is_timed_out() {
            return Err(Error::stream(format!(
                "RTP timeout on port {} (leg {})",
                self.local_port, self.leg
            )));
        }
        let mut state = self.state.lock();
        if !state.initialized {
            return Ok(0);
        }
        Ok(state.playout.read(buf))
    }

    fn put(&self, _ts: u64, buf: &[u8]) -> Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.initialized {
            return Err(Error::StreamNotInitialized {
                port: self.local_port,
            });
        }
        let (send, remote) = match (&state.send, state.remote_addr) {
            (Some(send), Some(remote)) => (send.clone(), remote),
            _ => return Ok(0),
        };

        state.pcm.clear();
        state.pcm.extend(
            buf.chunks_exact(2)
                .map(|p| i16::from_le_bytes([p[0], p[1]])),
        );
        state.encoded.clear();
        let samples = send.codec.encode(&state.pcm, &mut state.encoded)?;

        let header = RtpHeader::new(send.payload_type, state.sequence, state.rtp_timestamp, self.ssrc);
        state.sequence = state.sequence.wrapping_add(1);
        state.rtp_timestamp = state.rtp_timestamp.wrapping_add(samples as u32);
        let packet = RtpPacket::new(header, Bytes::copy_from_slice(&state.encoded));
        drop(guard);

        self.send_datagram(&packet.serialize(), remote)?;
        Ok(buf.len())
    }

    fn enable_rtp_relay(&self, mask: PayloadMask, peer: Weak<dyn RtpAudioStream>) -> Result<()> {
        if peer.strong_count() == 0 {
            return Err(Error::RelayConfig(format!(
                "relay peer of port {} is gone",
                self.local_port
            )));
        }
        debug!("Leg {} port {}: relaying payloads {}", self.leg, self.local_port, mask);
        let mut relay = self.relay.lock();
        relay.mask = Some(mask);
        relay.peer = Some(peer);
        Ok(())
    }

    fn disable_rtp_relay(&self) {
        let mut relay = self.relay.lock();
        if relay.mask.take().is_some() {
            debug!("Leg {} port {}: relay disabled", self.leg, self.local_port);
        }
        relay.peer = None;
    }

    fn relay_mask(&self) -> Option<PayloadMask> {
        self.relay.lock().mask
    }

    fn relay_packet(&self, packet: &RtpPacket) -> Result<()> {
        let remote = match self.state.lock().remote_addr {
            Some(remote) => remote,
            None => {
                trace!("Leg {}: relayed packet dropped, remote not known yet", self.leg);
                return Ok(());
            }
        };

        let mut packet = packet.clone();
        if !self.settings.relay.transparent_ssrc {
            packet.header.ssrc = self.ssrc;
        }
        if !self.settings.relay.transparent_seqno {
            packet.header.sequence_number = self.relay_sequence.fetch_add(1, Ordering::Relaxed);
        }
        self.send_datagram(&packet.serialize(), remote)
    }

    fn init(&self, local_sdp: &Sdp, remote_sdp: &Sdp, media_index: usize) -> Result<()> {
        let local = local_sdp
            .media
            .get(media_index)
            .ok_or(Error::MediaLineNotFound { index: media_index })?;
        let remote = remote_sdp
            .media
            .get(media_index)
            .ok_or(Error::MediaLineNotFound { index: media_index })?;

        let send = negotiate_send_payload(&self.codecs, local, remote)
            .ok_or(Error::NoCompatiblePayload { media_index })?;

        let mut receive = HashMap::new();
        for payload in local.payloads.iter().chain(remote.payloads.iter()) {
            if let Some(codec) = self.codecs.resolve(payload) {
                receive.entry(payload.payload_type).or_insert(codec);
            }
        }

        let sample_rate = send.codec.clock_rate();
        let ptime = remote
            .ptime
            .or(local.ptime)
            .unwrap_or(self.settings.default_ptime_ms);
        let remote_addr = remote_address(remote_sdp, media_index, remote);

        let mut state = self.state.lock();
        state.sample_rate = sample_rate;
        state.frame_samples = frame_samples(sample_rate, ptime);
        state.playout = PlayoutBuffer::new(state.playout_type, sample_rate, &self.settings.jitter);
        state.remote_addr = remote_addr;
        state.receive = receive;
        state.last_received = Instant::now();
        state.initialized = true;

        info!(
            "Leg {} port {}: sending {}/{} (pt {}) to {:?}, ptime {} ms",
            self.leg,
            self.local_port,
            send.codec.name(),
            sample_rate,
            send.payload_type,
            remote_addr,
            ptime
        );
        state.send = Some(send);
        Ok(())
    }

    fn set_playout_type(&self, playout_type: PlayoutType) {
        let mut state = self.state.lock();
        if state.playout_type != playout_type {
            state.playout_type = playout_type;
            state.playout = PlayoutBuffer::new(playout_type, state.sample_rate, &self.settings.jitter);
        }
    }

    fn on_packet_received(&self, data: &[u8], from: SocketAddr) {
        let packet = match RtpPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Leg {}: ignoring datagram from {}: {}", self.leg, from, e);
                return;
            }
        };

        // copy the relay target out so no lock is held while the peer sends
        let target = {
            let relay = self.relay.lock();
            match (relay.mask, &relay.peer) {
                (Some(mask), Some(peer)) if mask.contains(packet.header.payload_type) => peer.upgrade(),
                _ => None,
            }
        };

        match target {
            Some(peer) => {
                self.state.lock().last_received = Instant::now();
                if let Err(e) = peer.relay_packet(&packet) {
                    warn!("Leg {}: relaying packet failed: {}", self.leg, e);
                }
            }
            None => self.decode_into_playout(&packet),
        }
    }

    fn clear_rtp_timeout(&self) {
        self.state.lock().last_received = Instant::now();
    }
}

impl std::fmt::Debug for RtpAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpAudio")
            .field("leg", &self.leg)
            .field("local_port", &self.local_port)
            .field("ssrc", &self.ssrc)
            .finish()
    }
}
