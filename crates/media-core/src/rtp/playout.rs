//! Playout buffering between network arrival and audio consumption
//!
//! Decoded frames are queued here by the receive path and pulled by the media
//! processor. Two modes exist:
//! - [`PlayoutType::Simple`]: arrival-ordered FIFO that starts playing once a
//!   fixed delay is buffered.
//! - [`PlayoutType::Adaptive`]: timestamp-ordered buffer whose target delay
//!   follows the RFC 3550 interarrival jitter estimate, bounded by the
//!   configured minimum and maximum.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use tracing::trace;

use crate::config::JitterConfig;
use crate::types::PlayoutType;

/// Playout buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayoutStats {
    /// Samples currently queued
    pub buffered_samples: usize,
    /// Current target delay in samples
    pub target_delay_samples: usize,
    /// Interarrival jitter estimate in samples
    pub jitter_samples: f64,
    /// Frames dropped for arriving after their playout time
    pub late_drops: u64,
    /// Frames dropped because the buffer exceeded its maximum delay
    pub overflow_drops: u64,
}

/// Jitter compensating frame queue
#[derive(Debug)]
pub struct PlayoutBuffer {
    mode: PlayoutType,
    sample_rate: u32,
    min_delay: usize,
    max_delay: usize,
    simple_delay: usize,
    /// Key: extended RTP timestamp (adaptive) or arrival counter (simple)
    frames: BTreeMap<u64, Vec<i16>>,
    /// Remainder of a partially played frame
    pending: VecDeque<i16>,
    buffered: usize,
    playing: bool,
    arrivals: u64,
    /// Extended timestamp expected after the last played frame
    next_ts: Option<u64>,
    last_ts: Option<u64>,
    started_at: Instant,
    last_transit: Option<f64>,
    jitter: f64,
    late_drops: u64,
    overflow_drops: u64,
}

impl PlayoutBuffer {
    pub fn new(mode: PlayoutType, sample_rate: u32, bounds: &JitterConfig) -> Self {
        let samples = |ms: u32| (u64::from(ms) * u64::from(sample_rate) / 1000) as usize;
        Self {
            mode,
            sample_rate,
            min_delay: samples(bounds.min_delay_ms),
            max_delay: samples(bounds.max_delay_ms).max(1),
            simple_delay: samples(bounds.simple_delay_ms),
            frames: BTreeMap::new(),
            pending: VecDeque::new(),
            buffered: 0,
            playing: false,
            arrivals: 0,
            next_ts: None,
            last_ts: None,
            started_at: Instant::now(),
            last_transit: None,
            jitter: 0.0,
            late_drops: 0,
            overflow_drops: 0,
        }
    }

    pub fn mode(&self) -> PlayoutType {
        self.mode
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue a decoded frame carrying RTP timestamp `rtp_ts`
    pub fn put(&mut self, rtp_ts: u32, arrival: Instant, pcm: Vec<i16>) {
        if pcm.is_empty() {
            return;
        }
        let ext_ts = self.extend_timestamp(rtp_ts);
        self.update_jitter(ext_ts, arrival);

        let key = match self.mode {
            PlayoutType::Simple => {
                self.arrivals += 1;
                self.arrivals
            }
            PlayoutType::Adaptive => {
                if let Some(next) = self.next_ts {
                    if ext_ts < next {
                        trace!("Dropping late frame (ts {} < {})", ext_ts, next);
                        self.late_drops += 1;
                        return;
                    }
                }
                ext_ts
            }
        };

        self.buffered += pcm.len();
        if let Some(replaced) = self.frames.insert(key, pcm) {
            self.buffered -= replaced.len();
        }

        while self.buffered > self.max_delay {
            match self.frames.pop_first() {
                Some((_, dropped)) => {
                    self.buffered -= dropped.len();
                    self.overflow_drops += 1;
                }
                None => break,
            }
        }
    }

    /// Fill `out` with little-endian PCM, returning bytes written.
    /// Returns 0 while prebuffering or on underrun.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let wanted = out.len() / 2;
        if !self.playing {
            if self.buffered == 0 || self.buffered < self.target_delay() {
                return 0;
            }
            self.playing = true;
        }

        let mut written = 0;
        while written < wanted {
            if self.pending.is_empty() {
                match self.frames.pop_first() {
                    Some((key, frame)) => {
                        if self.mode == PlayoutType::Adaptive {
                            self.next_ts = Some(key + frame.len() as u64);
                        }
                        self.pending.extend(frame);
                    }
                    None => break,
                }
            }
            while written < wanted {
                match self.pending.pop_front() {
                    Some(sample) => {
                        out[written * 2..written * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                        written += 1;
                        self.buffered -= 1;
                    }
                    None => break,
                }
            }
        }

        if written == 0 {
            trace!("Playout underrun");
            self.playing = false;
        }
        written * 2
    }

    /// Drop everything queued and restart prebuffering
    pub fn reset(&mut self) {
        self.frames.clear();
        self.pending.clear();
        self.buffered = 0;
        self.playing = false;
        self.next_ts = None;
        self.last_ts = None;
        self.last_transit = None;
        self.jitter = 0.0;
    }

    /// Delay that must be buffered before playout starts
    pub fn target_delay(&self) -> usize {
        match self.mode {
            PlayoutType::Simple => self.simple_delay.min(self.max_delay),
            PlayoutType::Adaptive => {
                let wanted = (self.jitter * 3.0) as usize;
                wanted.clamp(self.min_delay.min(self.max_delay), self.max_delay)
            }
        }
    }

    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            buffered_samples: self.buffered,
            target_delay_samples: self.target_delay(),
            jitter_samples: self.jitter,
            late_drops: self.late_drops,
            overflow_drops: self.overflow_drops,
        }
    }

    /// Widen a 32-bit RTP timestamp across wrap-arounds
    fn extend_timestamp(&mut self, rtp_ts: u32) -> u64 {
        let ext = match self.last_ts {
            None => u64::from(rtp_ts) + (1u64 << 32),
            Some(last) => {
                let delta = rtp_ts.wrapping_sub(last as u32) as i32;
                (last as i64 + i64::from(delta)).max(0) as u64
            }
        };
        if self.last_ts.map_or(true, |last| ext > last) {
            self.last_ts = Some(ext);
        }
        ext
    }

    /// RFC 3550 section 6.4.1 interarrival jitter, in samples
    fn update_jitter(&mut self, ext_ts: u64, arrival: Instant) {
        let arrival_samples =
            arrival.saturating_duration_since(self.started_at).as_secs_f64() * f64::from(self.sample_rate);
        let transit = arrival_samples - ext_ts as f64;
        if let Some(last) = self.last_transit {
            let d = (transit - last).abs();
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }
}
