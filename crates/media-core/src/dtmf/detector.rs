//! Goertzel based DTMF detector
//!
//! PCM is cut into blocks of 205 samples at 8 kHz (scaled for other rates)
//! and each block is tested against the eight DTMF frequencies. A key is
//! accepted when one row and one column tone clearly dominate, carry most of
//! the block energy and are within the allowed twist. A key press starts
//! after two consecutive matching blocks and ends after two blocks without
//! it; the completed press is queued as a [`DtmfEvent`].

use std::collections::VecDeque;
use std::f32::consts::PI;

use tracing::{debug, trace};

use super::{event_code, DtmfEvent};

const ROW_FREQS: [f32; 4] = [697.0, 770.0, 852.0, 941.0];
const COL_FREQS: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];
const KEYS: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

const BASE_BLOCK_LEN: usize = 205;
/// Minimum mean power per sample (amplitude of roughly 300)
const MIN_MEAN_POWER: f32 = 1.0e5;
/// Share of the block energy the two tones must carry
const MIN_TONE_SHARE: f32 = 0.15;
/// Row tone may exceed the column tone by 8 dB
const NORMAL_TWIST: f32 = 6.31;
/// Column tone may exceed the row tone by 4 dB
const REVERSE_TWIST: f32 = 2.51;
/// Winner must beat every other tone of its group by 6 dB
const DOMINANCE: f32 = 4.0;
/// Matching blocks needed to start a key press
const START_BLOCKS: u32 = 2;
/// Missing blocks needed to end a key press
const END_BLOCKS: u32 = 2;

#[derive(Debug)]
struct ActiveTone {
    digit: char,
    start_ts: u64,
    blocks: u32,
    missing: u32,
}

/// In-band DTMF detector for 16-bit little-endian mono PCM
#[derive(Debug)]
pub struct DtmfDetector {
    sample_rate: u32,
    block_len: usize,
    row_coeffs: [f32; 4],
    col_coeffs: [f32; 4],
    block: Vec<f32>,
    /// Result of the previous block and the timestamp it started at
    last: Option<(char, u64)>,
    active: Option<ActiveTone>,
    events: VecDeque<DtmfEvent>,
}

impl DtmfDetector {
    /// Detector for PCM sampled at `sample_rate` Hz
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(8000);
        let block_len = BASE_BLOCK_LEN * sample_rate as usize / 8000;
        let coeff = |freq: f32| 2.0 * (2.0 * PI * freq / sample_rate as f32).cos();

        Self {
            sample_rate,
            block_len,
            row_coeffs: ROW_FREQS.map(coeff),
            col_coeffs: COL_FREQS.map(coeff),
            block: Vec::with_capacity(block_len),
            last: None,
            active: None,
            events: VecDeque::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feed PCM captured at processor timestamp `ts`
    pub fn process(&mut self, ts: u64, pcm: &[u8]) {
        for pair in pcm.chunks_exact(2) {
            self.block.push(f32::from(i16::from_le_bytes([pair[0], pair[1]])));
            if self.block.len() == self.block_len {
                let detected = self.analyze_block();
                self.block.clear();
                self.on_block(ts, detected);
            }
        }
    }

    /// Whether completed key presses are waiting
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Take all completed key presses
    pub fn drain_events(&mut self) -> Vec<DtmfEvent> {
        self.events.drain(..).collect()
    }

    /// Forget partial input and pending events
    pub fn reset(&mut self) {
        self.block.clear();
        self.last = None;
        self.active = None;
        self.events.clear();
    }

    fn on_block(&mut self, ts: u64, detected: Option<char>) {
        if let Some(active) = self.active.as_mut() {
            if detected == Some(active.digit) {
                active.blocks += 1;
                active.missing = 0;
            } else {
                active.missing += 1;
                if active.missing >= END_BLOCKS {
                    self.finish_active();
                }
            }
        } else if let (Some(digit), Some((last_digit, last_ts))) = (detected, self.last) {
            if digit == last_digit {
                trace!("DTMF '{}' started", digit);
                self.active = Some(ActiveTone {
                    digit,
                    start_ts: last_ts,
                    blocks: START_BLOCKS,
                    missing: 0,
                });
            }
        }

        let previous = self.last;
        self.last = detected.map(|digit| match previous {
            Some((last_digit, last_ts)) if last_digit == digit => (digit, last_ts),
            _ => (digit, ts),
        });
    }

    fn finish_active(&mut self) {
        if let Some(active) = self.active.take() {
            let samples = u64::from(active.blocks) * self.block_len as u64;
            let duration_ms = (samples * 1000 / u64::from(self.sample_rate)) as u32;
            if let Some(event) = event_code(active.digit) {
                debug!("DTMF '{}' detected ({} ms)", active.digit, duration_ms);
                self.events.push_back(DtmfEvent {
                    digit: active.digit,
                    event,
                    duration_ms,
                    start_ts: active.start_ts,
                });
            }
        }
    }

    fn analyze_block(&self) -> Option<char> {
        let energy: f32 = self.block.iter().map(|s| s * s).sum();
        let n = self.block.len() as f32;
        if energy / n < MIN_MEAN_POWER {
            return None;
        }

        let rows = self.row_coeffs.map(|c| goertzel(&self.block, c));
        let cols = self.col_coeffs.map(|c| goertzel(&self.block, c));
        let (row, row_power) = dominant(&rows)?;
        let (col, col_power) = dominant(&cols)?;

        if row_power > col_power * NORMAL_TWIST || col_power > row_power * REVERSE_TWIST {
            return None;
        }
        if (row_power + col_power) < MIN_TONE_SHARE * n * energy {
            return None;
        }

        Some(KEYS[row][col])
    }
}

/// Index and power of the clear winner of a tone group
fn dominant(powers: &[f32; 4]) -> Option<(usize, f32)> {
    let (best, best_power) = powers
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

    let clear = powers
        .iter()
        .enumerate()
        .all(|(i, p)| i == best || p * DOMINANCE < best_power);
    clear.then_some((best, best_power))
}

fn goertzel(samples: &[f32], coeff: f32) -> f32 {
    let (mut s1, mut s2) = (0.0f32, 0.0f32);
    for &x in samples {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    s1 * s1 + s2 * s2 - coeff * s1 * s2
}
