//! Core media types shared across the crate

use std::fmt;

use serde::{Deserialize, Serialize};

/// One side of a bridged call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// Caller side
    A,
    /// Callee side
    B,
}

impl Leg {
    /// The other side of the call
    pub fn opposite(self) -> Self {
        match self {
            Leg::A => Leg::B,
            Leg::B => Leg::A,
        }
    }

    /// Both legs in A, B order
    pub fn both() -> [Leg; 2] {
        [Leg::A, Leg::B]
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::A => write!(f, "A"),
            Leg::B => write!(f, "B"),
        }
    }
}

/// Identifier of a media session known to the media processor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaSessionId(pub String);

impl MediaSessionId {
    /// Create an id from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(format!("media-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Affinity key: sessions sharing a callgroup are processed by the same worker
pub type Callgroup = String;

/// Generate a fresh callgroup token
pub fn new_callgroup() -> Callgroup {
    uuid::Uuid::new_v4().to_string()
}

/// Kind of playout buffering used between network arrival and audio consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayoutType {
    /// Jitter-compensating buffer whose delay follows observed network jitter
    #[default]
    Adaptive,
    /// Fixed-delay FIFO
    Simple,
}

/// Set of RTP payload type ids (0..=127) allowed to be relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PayloadMask(u128);

impl PayloadMask {
    /// Empty mask
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a payload type; ids above 127 are not valid RTP payload types and are ignored
    pub fn set(&mut self, payload_type: u8) {
        if payload_type < 128 {
            self.0 |= 1u128 << payload_type;
        }
    }

    /// Remove a payload type
    pub fn clear(&mut self, payload_type: u8) {
        if payload_type < 128 {
            self.0 &= !(1u128 << payload_type);
        }
    }

    /// Whether the payload type is in the mask
    pub fn contains(&self, payload_type: u8) -> bool {
        payload_type < 128 && (self.0 >> payload_type) & 1 == 1
    }

    /// Whether no payload type is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of payload types in the mask
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Payload types in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..128).filter(move |pt| self.contains(*pt))
    }
}

impl FromIterator<u8> for PayloadMask {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut mask = PayloadMask::new();
        for pt in iter {
            mask.set(pt);
        }
        mask
    }
}

impl fmt::Display for PayloadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.iter().map(|pt| pt.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}
