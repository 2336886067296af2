//! B2B media session behaviour against mock streams

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use b2bmedia_media_core::audio::CachedAudio;
use b2bmedia_media_core::rtp::{RtpHeader, RtpPacket};
use b2bmedia_media_core::{
    B2BMediaSession, Error, Leg, MediaEvent, MediaSession, PayloadMask, RtpAudioStream, SessionRef,
};

use common::*;

const WAIT: Duration = Duration::from_secs(2);

fn mask(pts: &[u8]) -> PayloadMask {
    pts.iter().copied().collect()
}

struct Call {
    harness: Harness,
    a: Arc<RecordingLeg>,
    b: Arc<RecordingLeg>,
    session: SessionRef,
}

impl Call {
    fn new(dtmf_on_a: bool) -> Self {
        Self::with_harness(Harness::new(), dtmf_on_a)
    }

    fn with_harness(harness: Harness, dtmf_on_a: bool) -> Self {
        let a = RecordingLeg::new(Leg::A, dtmf_on_a);
        let b = RecordingLeg::new(Leg::B, false);
        let session = SessionRef::new(B2BMediaSession::new(&harness.context, a.clone(), b.clone()));
        Self {
            harness,
            a,
            b,
            session,
        }
    }

    /// Negotiate `a_pts` with leg A and `b_pts` with leg B on one audio line
    fn negotiate(&self, a_pts: &[u8], b_pts: &[u8]) {
        self.session
            .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, a_pts)]))
            .unwrap();
        self.session
            .update_local_sdp(Leg::A, &audio_sdp("192.0.2.1", &[(5000, a_pts)]))
            .unwrap();
        self.session
            .update_remote_sdp(Leg::B, &audio_sdp("10.0.0.2", &[(6000, b_pts)]))
            .unwrap();
        self.session
            .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, b_pts)]))
            .unwrap();
    }
}

#[test]
fn test_relay_configured_from_remote_offer() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0, 8])]))
        .unwrap();
    call.session
        .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, &[0, 8])]))
        .unwrap();

    assert_eq!(call.session.pair_count(), 1);
    assert_eq!(call.harness.factory.created(), 2);
    assert_eq!(call.session.relay_mask(Leg::B, 0), Some(mask(&[0, 8])));
    assert_eq!(call.session.relay_mask(Leg::A, 0), None);

    // packets from B's party in an accepted format go straight to leg A's stream
    let packet = RtpPacket::new(RtpHeader::new(8, 1, 160, 42), Bytes::from(vec![0xD5; 160]));
    let from: SocketAddr = "10.0.0.2:6000".parse().unwrap();
    call.harness
        .factory
        .stream(Leg::B, 0)
        .on_packet_received(&packet.serialize(), from);

    let relayed = call.harness.factory.stream(Leg::A, 0).relayed.lock().clone();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].header.payload_type, 8);
    assert!(!call.session.is_initialized(Leg::A, 0));
    assert!(!call.session.is_initialized(Leg::B, 0));
    assert!(!call.session.is_registered());
}

#[test]
fn test_packets_outside_relay_mask_are_not_relayed() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0])]))
        .unwrap();

    let packet = RtpPacket::new(RtpHeader::new(18, 1, 160, 42), Bytes::from(vec![0u8; 20]));
    let from: SocketAddr = "10.0.0.2:6000".parse().unwrap();
    call.harness
        .factory
        .stream(Leg::B, 0)
        .on_packet_received(&packet.serialize(), from);

    assert!(call.harness.factory.stream(Leg::A, 0).relayed.lock().is_empty());
}

#[test]
fn test_empty_offer_disables_relay() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0, 8])]))
        .unwrap();
    assert!(call.session.relay_mask(Leg::B, 0).is_some());

    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[])]))
        .unwrap();
    assert_eq!(call.session.relay_mask(Leg::B, 0), None);
}

#[test]
fn test_transcoding_moves_audio_between_legs() {
    let call = Call::new(false);
    call.negotiate(&[8], &[0]);

    assert!(call.session.is_initialized(Leg::A, 0));
    assert!(call.session.is_initialized(Leg::B, 0));
    assert_eq!(call.session.relay_mask(Leg::B, 0), Some(mask(&[8])));
    assert_eq!(call.session.relay_mask(Leg::A, 0), Some(mask(&[0])));

    let pcm: Vec<u8> = (0..FRAME_SIZE * 2).map(|i| (i % 251) as u8).collect();
    call.harness.factory.stream(Leg::A, 0).feed(&pcm);

    let to_b = call.harness.factory.stream(Leg::B, 0);
    let mut buffer = vec![0u8; 4096];
    assert!(wait_until(WAIT, || {
        call.session.write_streams(0, &mut buffer).unwrap();
        to_b.written().len() >= pcm.len()
    }));
    assert_eq!(to_b.written(), pcm);
    assert!(to_b.puts.lock().iter().all(|frame| frame.len() <= FRAME_SIZE));
    assert!(call.harness.factory.stream(Leg::A, 0).written().is_empty());
}

#[test]
fn test_incompatible_leg_stays_uninitialized() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0])]))
        .unwrap();
    call.session
        .update_local_sdp(Leg::A, &audio_sdp("192.0.2.1", &[(5000, &[0])]))
        .unwrap();
    call.session
        .update_remote_sdp(Leg::B, &audio_sdp("10.0.0.2", &[(6000, &[0])]))
        .unwrap();
    call.session
        .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, &[8])]))
        .unwrap();

    assert!(call.session.is_initialized(Leg::A, 0));
    assert!(!call.session.is_initialized(Leg::B, 0));
    assert_eq!(call.session.relay_mask(Leg::A, 0), Some(mask(&[0])));

    call.harness.factory.stream(Leg::A, 0).feed(&[1u8; FRAME_SIZE]);
    let mut buffer = vec![0u8; 4096];
    call.session.write_streams(0, &mut buffer).unwrap();
    assert!(call.harness.factory.stream(Leg::B, 0).written().is_empty());
}

#[test]
fn test_replace_connection_address_with_too_many_lines() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0]), (4002, &[0])]))
        .unwrap();
    assert_eq!(call.session.pair_count(), 2);

    let mut sdp = audio_sdp("10.0.0.9", &[(7000, &[0]), (7002, &[0]), (7004, &[0])]);
    let err = call
        .session
        .replace_connection_address(&mut sdp, Leg::A, "192.0.2.1")
        .unwrap_err();

    assert!(matches!(
        err,
        Error::SdpStructureMismatch {
            media_lines: 3,
            streams: 2
        }
    ));
    assert_eq!(sdp.connection.as_ref().unwrap().address, "192.0.2.1");
    assert_eq!(sdp.media[0].port, call.session.local_port(Leg::A, 0).unwrap());
    assert_eq!(sdp.media[1].port, call.session.local_port(Leg::A, 1).unwrap());
    assert_eq!(sdp.media[2].port, 7004);
}

#[test]
fn test_replace_connection_address_keeps_disabled_lines() {
    let call = Call::new(false);
    call.session
        .update_remote_sdp(Leg::B, &audio_sdp("10.0.0.2", &[(6000, &[0]), (6002, &[0])]))
        .unwrap();

    let mut sdp = audio_sdp("10.0.0.9", &[(0, &[0]), (7002, &[0])]);
    call.session
        .replace_connection_address(&mut sdp, Leg::B, "192.0.2.1")
        .unwrap();

    assert_eq!(sdp.media[0].port, 0);
    assert_eq!(sdp.media[1].port, call.session.local_port(Leg::B, 1).unwrap());
}

#[test]
fn test_remote_sdp_update_is_idempotent() {
    let call = Call::new(false);
    call.negotiate(&[8], &[0]);
    let remote = audio_sdp("10.0.0.1", &[(4000, &[8])]);

    call.session.update_remote_sdp(Leg::A, &remote).unwrap();
    let before = (
        call.session.pair_count(),
        call.session.relay_mask(Leg::B, 0),
        call.session.is_initialized(Leg::A, 0),
    );
    call.session.update_remote_sdp(Leg::A, &remote).unwrap();
    let after = (
        call.session.pair_count(),
        call.session.relay_mask(Leg::B, 0),
        call.session.is_initialized(Leg::A, 0),
    );

    assert_eq!(before, after);
    assert_eq!(call.harness.factory.created(), 2);
    assert_eq!(call.harness.context.scheduler.session_count(), 1);
}

#[test]
fn test_registered_once_all_sdps_known() {
    let call = Call::new(false);
    let scheduler = call.harness.context.scheduler.clone();

    call.session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000, &[0])]))
        .unwrap();
    call.session
        .update_local_sdp(Leg::A, &audio_sdp("192.0.2.1", &[(5000, &[0])]))
        .unwrap();
    call.session
        .update_remote_sdp(Leg::B, &audio_sdp("10.0.0.2", &[(6000, &[0])]))
        .unwrap();
    assert!(!call.session.is_registered());
    assert!(!scheduler.contains(call.session.id()));
    assert_eq!(call.session.reference_count(), 1);

    call.session
        .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, &[0])]))
        .unwrap();
    assert!(call.session.is_registered());
    assert!(scheduler.contains(call.session.id()));
    assert_eq!(call.session.reference_count(), 2);
    assert!(wait_until(WAIT, || call.session.is_processing_media()));

    // renegotiation does not register twice
    call.session
        .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, &[0])]))
        .unwrap();
    assert_eq!(scheduler.session_count(), 1);
    assert_eq!(call.session.reference_count(), 2);
}

#[test]
fn test_stop_during_processing_releases_once() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);
    assert!(wait_until(WAIT, || call.session.is_processing_media()));

    // keep the worker busy moving audio while stopping
    call.harness.factory.stream(Leg::A, 0).feed(&vec![7u8; FRAME_SIZE * 50]);
    call.session.stop();

    assert!(!call.session.is_registered());
    assert!(!call.session.is_processing_media());
    assert_eq!(call.session.pair_count(), 0);
    assert!(!call.harness.context.scheduler.contains(call.session.id()));
    assert_eq!(call.session.reference_count(), 1);
    assert!(call.a.events().contains(&MediaEvent::ProcessingTerminated));
    assert!(call.b.events().contains(&MediaEvent::ProcessingTerminated));

    let session = call.session.session().clone();
    drop(call.session);
    assert!(session.is_finalized());
    assert_eq!(session.reference_count(), 0);
    assert!(!session.release_reference());
}

#[test]
fn test_stopped_session_ignores_renegotiation() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);
    call.session.stop();

    call.negotiate(&[0], &[0]);
    assert!(!call.session.is_registered());
    assert_eq!(call.session.pair_count(), 0);
}

#[test]
fn test_stop_racing_renegotiation_leaves_no_pairs() {
    let call = Call::new(false);
    let session = call.session.session().clone();
    let renegotiate = std::thread::spawn(move || {
        for port in 0..200u16 {
            let _ = session.update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", &[(4000 + port, &[0])]));
        }
    });

    call.session.stop();
    renegotiate.join().unwrap();
    assert_eq!(call.session.pair_count(), 0);
    assert!(!call.session.is_registered());
}

#[test]
fn test_stream_allocation_failure_keeps_allocated_lines() {
    let call = Call::with_harness(Harness::with_factory(MockFactory::with_limit(2)), false);
    let two_lines: &[(u16, &[u8])] = &[(4000, &[0]), (4002, &[0])];

    call.session
        .update_local_sdp(Leg::A, &audio_sdp("192.0.2.1", &[(5000, &[0]), (5004, &[0])]))
        .unwrap();
    call.session
        .update_local_sdp(Leg::B, &audio_sdp("192.0.2.1", &[(5002, &[0])]))
        .unwrap();
    call.session
        .update_remote_sdp(Leg::B, &audio_sdp("10.0.0.2", &[(6000, &[0])]))
        .unwrap();

    let err = call
        .session
        .update_remote_sdp(Leg::A, &audio_sdp("10.0.0.1", two_lines))
        .unwrap_err();
    assert!(matches!(err, Error::PortsExhausted { .. }));

    assert_eq!(call.session.pair_count(), 1);
    assert_eq!(call.session.relay_mask(Leg::B, 0), Some(mask(&[0])));
    assert!(call.session.is_initialized(Leg::A, 0));
    assert!(call.session.is_registered());
    assert!(call.harness.context.scheduler.contains(call.session.id()));
    assert_eq!(call.session.reference_count(), 2);

    call.session.stop();
    assert_eq!(call.session.reference_count(), 1);
}

#[test]
fn test_failed_processing_detaches_session() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);
    assert!(wait_until(WAIT, || call.session.is_processing_media()));

    let to_b = call.harness.factory.stream(Leg::B, 0);
    to_b.fail_put.store(true, std::sync::atomic::Ordering::SeqCst);
    call.harness.factory.stream(Leg::A, 0).feed(&[3u8; FRAME_SIZE]);

    assert!(wait_until(WAIT, || call.session.reference_count() == 1));
    assert!(call.a.events().contains(&MediaEvent::ProcessingTerminated));
    let events = call.b.events();
    assert!(matches!(events.first(), Some(MediaEvent::ProcessingFailed { .. })));
    assert!(!call.session.is_processing_media());
    assert_eq!(call.session.pair_count(), 0);
    assert_eq!(call.session.reference_count(), 1);
    assert!(!call.harness.context.scheduler.contains(call.session.id()));

    call.session.stop();
    assert_eq!(call.session.reference_count(), 1);
}

#[test]
fn test_detected_dtmf_goes_to_source_leg() {
    let call = Call::new(true);
    call.negotiate(&[0], &[0]);

    let mut audio = dual_tone(770.0, 1336.0, 8000, 120);
    audio.extend(vec![0u8; 1600]);
    call.harness.factory.stream(Leg::A, 0).feed(&audio);

    assert!(wait_until(WAIT, || call
        .a
        .events()
        .iter()
        .any(|e| matches!(e, MediaEvent::Dtmf(event) if event.digit == '5'))));
    assert!(!call.b.events().iter().any(|e| matches!(e, MediaEvent::Dtmf(_))));
}

#[test]
fn test_alternate_input_replaces_bridged_audio() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);

    let prompt = vec![9u8; FRAME_SIZE];
    call.session
        .set_alternate_input(Leg::B, 0, Some(Box::new(CachedAudio::new(Bytes::from(prompt.clone()), false))))
        .unwrap();
    call.harness.factory.stream(Leg::A, 0).feed(&[1u8; FRAME_SIZE]);

    let to_b = call.harness.factory.stream(Leg::B, 0);
    assert!(wait_until(WAIT, || !to_b.written().is_empty()));
    assert_eq!(&to_b.written()[..FRAME_SIZE], &prompt[..]);

    assert!(matches!(
        call.session.set_alternate_input(Leg::B, 3, None),
        Err(Error::MediaLineNotFound { index: 3 })
    ));
}

#[test]
fn test_buffered_input_feeds_leg() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);

    let writer = call.session.attach_buffered_input(Leg::A, 0).unwrap();
    writer.write(&[5u8; FRAME_SIZE]).unwrap();

    let to_a = call.harness.factory.stream(Leg::A, 0);
    assert!(wait_until(WAIT, || to_a.written().len() >= FRAME_SIZE));
    assert!(to_a.written().iter().all(|b| *b == 5));
}

#[test]
fn test_session_refs_share_the_count() {
    let call = Call::new(false);
    let extra = call.session.clone();
    assert_eq!(call.session.reference_count(), 2);
    drop(extra);
    assert_eq!(call.session.reference_count(), 1);
    assert!(!call.session.is_finalized());
}

#[test]
fn test_clear_rtp_timeout_reaches_every_stream() {
    let call = Call::new(false);
    call.negotiate(&[0], &[0]);
    call.session.clear_rtp_timeout();
    for leg in Leg::both() {
        assert!(call.harness.factory.stream(leg, 0).timeout_clears.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
