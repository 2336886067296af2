//! Error handling for media-core
//!
//! One error type covers the whole media path. Callers of the B2B session
//! mostly see [`Error::SdpStructureMismatch`] and stream errors; the media
//! processor sees whatever a session hook returns and detaches that session.

use thiserror::Error;

/// Result type alias for media-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the media engine
#[derive(Error, Debug)]
pub enum Error {
    /// SDP text could not be parsed
    #[error("SDP parse error at line {line}: {reason}")]
    SdpParse { line: usize, reason: String },

    /// The SDP carries more audio media lines than there are relay streams
    #[error("SDP has {media_lines} audio media lines but only {streams} relay streams are allocated")]
    SdpStructureMismatch { media_lines: usize, streams: usize },

    /// A media line index does not exist in the SDP
    #[error("Media line {index} not found in SDP")]
    MediaLineNotFound { index: usize },

    /// Ring buffer write larger than its capacity
    #[error("Write of {size} bytes exceeds ring buffer capacity of {capacity} bytes")]
    BufferTooLarge { size: usize, capacity: usize },

    /// Codec failure
    #[error("Codec error ({codec}): {reason}")]
    Codec { codec: String, reason: String },

    /// None of the offered payloads can be handled by this side
    #[error("No compatible payload in media line {media_index}")]
    NoCompatiblePayload { media_index: usize },

    /// Stream used before `init`
    #[error("RTP stream on port {port} is not initialized")]
    StreamNotInitialized { port: u16 },

    /// Generic RTP stream failure
    #[error("RTP stream error: {0}")]
    Stream(String),

    /// Relay parameters could not be applied
    #[error("Relay reconfiguration failed: {0}")]
    RelayConfig(String),

    /// Malformed RTP packet
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(String),

    /// No free port left in the configured RTP range
    #[error("No free RTP port in range {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },

    /// Media processor has been shut down
    #[error("Media processor is not running")]
    SchedulerStopped,

    /// Session is not known to the media processor
    #[error("Session {0} is not attached to the media processor")]
    UnknownSession(String),

    /// A worker thread could not be spawned
    #[error("Failed to spawn media processor thread: {0}")]
    ThreadSpawn(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the shared infrastructure layer
    #[error(transparent)]
    Infra(#[from] b2bmedia_infra_common::Error),
}

impl Error {
    /// Create a codec error
    pub fn codec(codec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic stream error
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream(reason.into())
    }

    /// Create an SDP parse error
    pub fn sdp_parse(line: usize, reason: impl Into<String>) -> Self {
        Self::SdpParse {
            line,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether the call may continue with degraded media after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SdpStructureMismatch { .. }
                | Self::BufferTooLarge { .. }
                | Self::RelayConfig(_)
                | Self::NoCompatiblePayload { .. }
        )
    }
}
