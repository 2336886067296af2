//! Byte buffers used on the media path

pub mod ring;

pub use ring::{RingBuffer, RingWrite};
