//! # Media-Core: B2B Media Relay and Transcoding
//!
//! The media engine of a back-to-back SIP media server. Each bridged call
//! is a [`B2BMediaSession`] holding one [`AudioStreamPair`] per audio line:
//!
//! - **Relay**: RTP whose payload type the far leg offered is forwarded
//!   packet by packet, without decoding
//! - **Transcoding**: anything else is decoded, jitter buffered and
//!   re-encoded towards the other leg by the [`MediaScheduler`]
//! - **DTMF**: in-band key presses are detected on transcoded audio and
//!   posted to the signaling leg they came from
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use b2bmedia_media_core::{
//!     B2BMediaContext, CodecRegistry, MediaScheduler, MediaServerConfig, UdpRtpReceiver,
//!     UdpStreamFactory,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> b2bmedia_media_core::Result<()> {
//! let config = MediaServerConfig::load(None)?;
//! let context = B2BMediaContext {
//!     scheduler: MediaScheduler::new(&config.processor)?,
//!     factory: Arc::new(UdpStreamFactory::new(&config, CodecRegistry::shared())),
//!     receiver: Arc::new(UdpRtpReceiver::current()?),
//!     config: config.b2b.clone(),
//! };
//! // B2BMediaSession::new(&context, leg_a, leg_b) per bridged call
//! # let _ = context;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod b2b;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod dtmf;
pub mod error;
pub mod events;
pub mod processor;
pub mod rtp;
pub mod sdp;
pub mod types;

pub use b2b::{AudioStreamPair, B2BMediaContext, B2BMediaSession, SessionRef};
pub use buffer::RingBuffer;
pub use codec::{AudioCodec, CodecRegistry};
pub use config::MediaServerConfig;
pub use error::{Error, Result};
pub use events::{MediaEvent, SignalingLeg};
pub use processor::{MediaScheduler, MediaSession};
pub use rtp::{RtpAudioStream, RtpReceiver, RtpStreamFactory, UdpRtpReceiver, UdpStreamFactory};
pub use sdp::Sdp;
pub use types::{Leg, MediaSessionId, PayloadMask, PlayoutType};

/// Version information for the media library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
