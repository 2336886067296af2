//! Session description snapshots
//!
//! The media engine only needs the parts of an SDP body that drive relay and
//! transcoding: connection addresses, media lines with their payload lists,
//! `rtpmap`/`fmtp`/`ptime` and the direction attribute. Anything else is kept
//! verbatim as attribute text so that printing an SDP gives back what was
//! parsed.

mod parse;
mod payload;

use std::fmt;

pub use payload::{static_payload, StaticPayload};

/// Media type of an `m=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Application,
    Text,
    Message,
    /// Any other media token, kept as written
    Other(String),
}

impl MediaType {
    /// Parse the media token of an `m=` line
    pub fn from_token(token: &str) -> Self {
        match token {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            "application" => MediaType::Application,
            "text" => MediaType::Text,
            "message" => MediaType::Message,
            other => MediaType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
            MediaType::Application => write!(f, "application"),
            MediaType::Text => write!(f, "text"),
            MediaType::Message => write!(f, "message"),
            MediaType::Other(token) => write!(f, "{}", token),
        }
    }
}

/// Media direction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    fn from_attribute(attr: &str) -> Option<Self> {
        match attr {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDirection::SendRecv => write!(f, "sendrecv"),
            MediaDirection::SendOnly => write!(f, "sendonly"),
            MediaDirection::RecvOnly => write!(f, "recvonly"),
            MediaDirection::Inactive => write!(f, "inactive"),
        }
    }
}

/// `c=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpConnection {
    /// Network type, normally `IN`
    pub net_type: String,
    /// Address type, `IP4` or `IP6`
    pub addr_type: String,
    /// Connection address
    pub address: String,
}

impl SdpConnection {
    /// IPv4 connection to `address`
    pub fn ip4(address: impl Into<String>) -> Self {
        Self {
            net_type: "IN".to_string(),
            addr_type: "IP4".to_string(),
            address: address.into(),
        }
    }
}

impl fmt::Display for SdpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.net_type, self.addr_type, self.address)
    }
}

/// `o=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpOrigin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub connection: SdpConnection,
}

impl Default for SdpOrigin {
    fn default() -> Self {
        Self {
            username: "-".to_string(),
            session_id: "0".to_string(),
            session_version: "0".to_string(),
            connection: SdpConnection::ip4("0.0.0.0"),
        }
    }
}

impl fmt::Display for SdpOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.username, self.session_id, self.session_version, self.connection
        )
    }
}

/// One payload format of a media line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpPayload {
    /// RTP payload type id
    pub payload_type: u8,
    /// Encoding name from `rtpmap`, empty if unknown
    pub encoding_name: String,
    /// Clock rate from `rtpmap`, 0 if unknown
    pub clock_rate: u32,
    /// Encoding parameters (channel count for audio)
    pub encoding_params: Option<u32>,
    /// Format parameters from `fmtp`
    pub fmtp: Option<String>,
}

impl SdpPayload {
    /// Payload with only its type id known
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            encoding_name: String::new(),
            clock_rate: 0,
            encoding_params: None,
            fmtp: None,
        }
    }

    /// Payload with an explicit `rtpmap`
    pub fn with_rtpmap(payload_type: u8, encoding_name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            encoding_name: encoding_name.into(),
            clock_rate,
            ..Self::new(payload_type)
        }
    }

    /// RFC 4733 telephone events
    pub fn is_telephone_event(&self) -> bool {
        self.encoding_name.eq_ignore_ascii_case("telephone-event")
    }
}

/// `m=` line with its media-level lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMedia {
    pub media_type: MediaType,
    /// Port, 0 for a disabled stream
    pub port: u16,
    /// Transport protocol, e.g. `RTP/AVP`
    pub transport: String,
    pub payloads: Vec<SdpPayload>,
    /// Media-level connection, overrides the session-level one
    pub connection: Option<SdpConnection>,
    pub direction: MediaDirection,
    /// Packetization time in milliseconds
    pub ptime: Option<u32>,
    /// Remaining attributes, without the `a=` prefix
    pub attributes: Vec<String>,
}

impl SdpMedia {
    /// Audio line on `port` offering `payloads`
    pub fn audio(port: u16, payloads: Vec<SdpPayload>) -> Self {
        Self {
            media_type: MediaType::Audio,
            port,
            transport: "RTP/AVP".to_string(),
            payloads,
            connection: None,
            direction: MediaDirection::SendRecv,
            ptime: None,
            attributes: Vec::new(),
        }
    }

    /// Whether this is an audio line
    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    /// Whether the stream is enabled (non-zero port)
    pub fn is_active(&self) -> bool {
        self.port != 0
    }

    /// Payload type ids in offer order
    pub fn payload_types(&self) -> impl Iterator<Item = u8> + '_ {
        self.payloads.iter().map(|p| p.payload_type)
    }

    /// Look up a payload by type id
    pub fn payload(&self, payload_type: u8) -> Option<&SdpPayload> {
        self.payloads.iter().find(|p| p.payload_type == payload_type)
    }
}

/// Session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    pub version: u32,
    pub origin: SdpOrigin,
    pub session_name: String,
    /// Session-level connection
    pub connection: Option<SdpConnection>,
    /// `t=` start and stop times
    pub timing: (u64, u64),
    /// Session-level attributes, without the `a=` prefix
    pub attributes: Vec<String>,
    pub media: Vec<SdpMedia>,
}

impl Default for Sdp {
    fn default() -> Self {
        Self {
            version: 0,
            origin: SdpOrigin::default(),
            session_name: "-".to_string(),
            connection: None,
            timing: (0, 0),
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }
}

impl Sdp {
    /// SDP with a session-level connection and the given media lines
    pub fn with_media(address: impl Into<String>, media: Vec<SdpMedia>) -> Self {
        let connection = SdpConnection::ip4(address);
        Self {
            origin: SdpOrigin {
                connection: connection.clone(),
                ..SdpOrigin::default()
            },
            connection: Some(connection),
            media,
            ..Self::default()
        }
    }

    /// Whether the description carries no media line at all
    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    /// Audio media lines with their media line index
    pub fn audio_media(&self) -> impl Iterator<Item = (usize, &SdpMedia)> + '_ {
        self.media.iter().enumerate().filter(|(_, m)| m.is_audio())
    }

    /// Connection address in effect for a media line
    pub fn connection_for(&self, media_index: usize) -> Option<&SdpConnection> {
        self.media
            .get(media_index)
            .and_then(|m| m.connection.as_ref())
            .or(self.connection.as_ref())
    }

    /// Fill in encoding names and clock rates of static payload types and
    /// default missing clock rates to 8000 Hz.
    pub fn normalize(&mut self) {
        for media in &mut self.media {
            for payload in &mut media.payloads {
                if payload.encoding_name.is_empty() {
                    if let Some(info) = static_payload(payload.payload_type) {
                        payload.encoding_name = info.encoding_name.to_string();
                        if payload.clock_rate == 0 {
                            payload.clock_rate = info.clock_rate;
                        }
                        if payload.encoding_params.is_none() && info.channels > 1 {
                            payload.encoding_params = Some(info.channels);
                        }
                    }
                }
                if payload.clock_rate == 0 {
                    payload.clock_rate = 8000;
                }
            }
        }
    }

    /// Normalized copy
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.session_name)?;
        if let Some(conn) = &self.connection {
            write!(f, "c={}\r\n", conn)?;
        }
        write!(f, "t={} {}\r\n", self.timing.0, self.timing.1)?;
        for attr in &self.attributes {
            write!(f, "a={}\r\n", attr)?;
        }
        for media in &self.media {
            write!(f, "{}", media)?;
        }
        Ok(())
    }
}

impl fmt::Display for SdpMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {} {}", self.media_type, self.port, self.transport)?;
        for payload in &self.payloads {
            write!(f, " {}", payload.payload_type)?;
        }
        write!(f, "\r\n")?;
        if let Some(conn) = &self.connection {
            write!(f, "c={}\r\n", conn)?;
        }
        for payload in &self.payloads {
            if !payload.encoding_name.is_empty() {
                write!(
                    f,
                    "a=rtpmap:{} {}/{}",
                    payload.payload_type, payload.encoding_name, payload.clock_rate
                )?;
                if let Some(params) = payload.encoding_params {
                    write!(f, "/{}", params)?;
                }
                write!(f, "\r\n")?;
            }
            if let Some(fmtp) = &payload.fmtp {
                write!(f, "a=fmtp:{} {}\r\n", payload.payload_type, fmtp)?;
            }
        }
        if let Some(ptime) = self.ptime {
            write!(f, "a=ptime:{}\r\n", ptime)?;
        }
        for attr in &self.attributes {
            write!(f, "a={}\r\n", attr)?;
        }
        write!(f, "a={}\r\n", self.direction)
    }
}
