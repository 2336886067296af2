//! RTP audio streams
//!
//! [`RtpAudioStream`] is the per-leg media endpoint the B2B layer works
//! with. [`RtpAudio`] implements it over a UDP socket; the socket is read by
//! an [`RtpReceiver`] and written to directly (non-blocking) by the media
//! processor and by relaying peers.

pub mod factory;
pub mod packet;
pub mod playout;
pub mod receiver;
pub mod stream;

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::sdp::Sdp;
use crate::types::{PayloadMask, PlayoutType};

pub use factory::{RtpStreamFactory, UdpStreamFactory};
pub use packet::{RtpHeader, RtpPacket};
pub use playout::{PlayoutBuffer, PlayoutStats};
pub use receiver::{RtpReceiver, UdpRtpReceiver};
pub use stream::RtpAudio;

/// Per-leg RTP audio endpoint
///
/// Timestamps are media processor timestamps; frame sizes are bytes of
/// 16-bit PCM at the stream's sample rate. No method blocks on the network.
pub trait RtpAudioStream: Send + Sync {
    /// Local RTP port, 0 if no socket is bound
    fn local_port(&self) -> u16;

    fn has_local_socket(&self) -> bool;

    /// Socket the stream receives on
    fn local_socket(&self) -> Option<Arc<UdpSocket>>;

    /// Bytes of PCM in one packetization interval
    fn frame_size(&self) -> usize;

    /// Sampling rate of the negotiated codec
    fn sample_rate(&self) -> u32;

    /// Whether a frame should be sent at `ts`
    fn send_interval_reached(&self, ts: u64, frame_size: usize) -> bool;

    /// Whether a frame should be read at `ts`
    fn check_interval(&self, ts: u64, frame_size: usize) -> bool;

    /// Pull decoded PCM from the playout buffer
    fn get(&self, ts: u64, buf: &mut [u8]) -> Result<usize>;

    /// Encode and send PCM
    fn put(&self, ts: u64, buf: &[u8]) -> Result<usize>;

    /// Forward received packets whose payload type is in `mask` to `peer`
    fn enable_rtp_relay(&self, mask: PayloadMask, peer: Weak<dyn RtpAudioStream>) -> Result<()>;

    fn disable_rtp_relay(&self);

    /// Relay filter currently installed, `None` when relay is disabled
    fn relay_mask(&self) -> Option<PayloadMask>;

    /// Send a packet relayed from the peer stream
    fn relay_packet(&self, packet: &RtpPacket) -> Result<()>;

    /// Bind the stream to the media line `media_index` of the negotiated SDPs
    fn init(&self, local_sdp: &Sdp, remote_sdp: &Sdp, media_index: usize) -> Result<()>;

    fn set_playout_type(&self, playout_type: PlayoutType);

    /// Handle a datagram read from the local socket
    fn on_packet_received(&self, data: &[u8], from: SocketAddr);

    /// Restart the RTP inactivity timer
    fn clear_rtp_timeout(&self);
}
