//! Ring buffer behaviour against a queue model

use std::collections::VecDeque;

use proptest::prelude::*;

use b2bmedia_media_core::buffer::{RingBuffer, RingWrite};
use b2bmedia_media_core::Error;

#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    Read(usize),
}

fn op(capacity: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..=capacity).prop_map(Op::Write),
        (0..=capacity * 2).prop_map(Op::Read),
    ]
}

proptest! {
    #[test]
    fn test_ring_buffer_keeps_most_recent_bytes(
        (capacity, ops) in (1usize..64).prop_flat_map(|capacity| {
            (Just(capacity), prop::collection::vec(op(capacity), 0..40))
        })
    ) {
        let mut ring = RingBuffer::new(capacity);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Write(data) => {
                    let outcome = ring.write(&data).unwrap();
                    model.extend(data.iter().copied());
                    let mut dropped = 0;
                    while model.len() > capacity {
                        model.pop_front();
                        dropped += 1;
                    }
                    prop_assert_eq!(outcome.written(), data.len());
                    if dropped > 0 {
                        prop_assert_eq!(outcome, RingWrite::Overflowed { written: data.len(), dropped });
                    } else {
                        prop_assert!(!outcome.is_overflow());
                    }
                }
                Op::Read(max) => {
                    let got = ring.read_vec(max);
                    let expected: Vec<u8> = model.drain(..max.min(model.len())).collect();
                    prop_assert_eq!(got, expected);
                }
            }
            prop_assert_eq!(ring.len(), model.len());
            prop_assert!(ring.len() <= ring.capacity());
        }
    }
}

#[test]
fn test_oversized_write_is_rejected() {
    let mut ring = RingBuffer::new(8);
    ring.write(&[1, 2, 3]).unwrap();

    let err = ring.write(&[0u8; 9]).unwrap_err();
    assert!(matches!(err, Error::BufferTooLarge { size: 9, capacity: 8 }));
    assert_eq!(ring.read_vec(8), vec![1, 2, 3]);
}
