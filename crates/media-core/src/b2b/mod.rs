//! Back-to-back media
//!
//! A [`B2BMediaSession`] bridges the media of two call legs. Per audio line
//! it holds an [`AudioStreamPair`]: RTP with payload types both sides agree
//! on is relayed packet by packet, everything else is decoded from one leg
//! and re-encoded towards the other by the media processor.

mod handle;
mod session;
mod stream_pair;

pub use handle::SessionRef;
pub use session::{B2BMediaContext, B2BMediaSession};
pub use stream_pair::AudioStreamPair;
