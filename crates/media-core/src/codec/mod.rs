//! Audio codecs used for transcoding
//!
//! Codecs are resolved from SDP payload descriptors through a
//! [`CodecRegistry`]. Static payload types map directly; dynamic ones are
//! matched by encoding name (case-insensitive) and clock rate.

pub mod g711;
pub mod l16;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::Result;
use crate::sdp::SdpPayload;

pub use g711::{G711Codec, G711Variant};
pub use l16::Linear16Codec;

/// Audio codec working on mono 16-bit PCM
pub trait AudioCodec: Send + Sync + fmt::Debug {
    /// Encoding name as used in `rtpmap`
    fn name(&self) -> &'static str;

    /// Sampling rate in Hz
    fn clock_rate(&self) -> u32;

    /// Encode PCM samples, appending to `out`. Returns samples consumed.
    fn encode(&self, pcm: &[i16], out: &mut Vec<u8>) -> Result<usize>;

    /// Decode a payload, appending samples to `out`. Returns samples produced.
    fn decode(&self, payload: &[u8], out: &mut Vec<i16>) -> Result<usize>;

    /// Encoded size of `samples` PCM samples
    fn payload_len(&self, samples: usize) -> usize;
}

/// Maps SDP payload descriptors to codecs
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    /// Static payload type -> codec
    by_payload_type: HashMap<u8, Arc<dyn AudioCodec>>,
    /// (lowercase encoding name, clock rate) -> codec
    by_name: HashMap<(String, u32), Arc<dyn AudioCodec>>,
}

static DEFAULT_REGISTRY: Lazy<Arc<CodecRegistry>> = Lazy::new(|| Arc::new(CodecRegistry::with_defaults()));

impl CodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            by_payload_type: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry with PCMU, PCMA and L16 at 8 and 16 kHz
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let pcmu: Arc<dyn AudioCodec> = Arc::new(G711Codec::new(G711Variant::PCMU));
        let pcma: Arc<dyn AudioCodec> = Arc::new(G711Codec::new(G711Variant::PCMA));
        registry.register_static(0, pcmu);
        registry.register_static(8, pcma);
        registry.register(Arc::new(Linear16Codec::new(8000)));
        registry.register(Arc::new(Linear16Codec::new(16000)));
        registry
    }

    /// Shared registry with the default codec set
    pub fn shared() -> Arc<CodecRegistry> {
        DEFAULT_REGISTRY.clone()
    }

    /// Register a codec under a static payload type (also by name)
    pub fn register_static(&mut self, payload_type: u8, codec: Arc<dyn AudioCodec>) {
        self.by_payload_type.insert(payload_type, codec.clone());
        self.register(codec);
    }

    /// Register a codec by encoding name and clock rate
    pub fn register(&mut self, codec: Arc<dyn AudioCodec>) {
        debug!("Registering codec {}/{}", codec.name(), codec.clock_rate());
        self.by_name
            .insert((codec.name().to_ascii_lowercase(), codec.clock_rate()), codec);
    }

    /// Codec for a payload descriptor, `None` for unsupported and
    /// non-audio (telephone-event, comfort noise) payloads
    pub fn resolve(&self, payload: &SdpPayload) -> Option<Arc<dyn AudioCodec>> {
        if payload.is_telephone_event() {
            return None;
        }
        if !payload.encoding_name.is_empty() {
            let clock_rate = if payload.clock_rate == 0 { 8000 } else { payload.clock_rate };
            let key = (payload.encoding_name.to_ascii_lowercase(), clock_rate);
            if let Some(codec) = self.by_name.get(&key) {
                return Some(codec.clone());
            }
        }
        if payload.payload_type < 96 {
            return self.by_payload_type.get(&payload.payload_type).cloned();
        }
        None
    }

    /// Whether a payload can be transcoded
    pub fn supports(&self, payload: &SdpPayload) -> bool {
        self.resolve(payload).is_some()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_static_and_dynamic() {
        let registry = CodecRegistry::with_defaults();

        let pcmu = registry.resolve(&SdpPayload::new(0)).unwrap();
        assert_eq!(pcmu.name(), "PCMU");

        let pcma = registry.resolve(&SdpPayload::with_rtpmap(8, "pcma", 8000)).unwrap();
        assert_eq!(pcma.name(), "PCMA");

        let l16 = registry.resolve(&SdpPayload::with_rtpmap(97, "L16", 16000)).unwrap();
        assert_eq!(l16.clock_rate(), 16000);

        assert!(registry.resolve(&SdpPayload::new(9)).is_none());
        assert!(registry.resolve(&SdpPayload::new(120)).is_none());
    }

    #[test]
    fn test_telephone_event_is_not_audio() {
        let registry = CodecRegistry::shared();
        assert!(!registry.supports(&SdpPayload::with_rtpmap(101, "telephone-event", 8000)));
    }
}
