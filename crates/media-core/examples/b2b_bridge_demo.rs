//! B2B Bridge Demo
//!
//! Bridges two simulated phones on the loopback interface: phone A speaks
//! PCMA, phone B speaks PCMU. The media engine transcodes A's audio towards B
//! while packets in a format both sides share would be relayed as they are.
//!
//! Run with an optional configuration file:
//! `cargo run --example b2b_bridge_demo -- media.toml`

use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use b2bmedia_infra_common::config::render_config;
use b2bmedia_infra_common::logging::{log_welcome, setup_logging};
use b2bmedia_media_core::codec::{G711Codec, G711Variant};
use b2bmedia_media_core::rtp::{RtpHeader, RtpPacket};
use b2bmedia_media_core::sdp::{Sdp, SdpMedia, SdpPayload};
use b2bmedia_media_core::{
    AudioCodec, B2BMediaContext, B2BMediaSession, CodecRegistry, Leg, MediaEvent, MediaScheduler,
    MediaServerConfig, Result, SessionRef, SignalingLeg, UdpRtpReceiver, UdpStreamFactory,
};
use tracing::info;

struct DemoLeg(Leg);

impl SignalingLeg for DemoLeg {
    fn leg_id(&self) -> Leg {
        self.0
    }

    fn dtmf_detection_enabled(&self) -> bool {
        true
    }

    fn post_media_event(&self, event: MediaEvent) {
        info!("📨 Leg {} got {:?}", self.0, event);
    }
}

fn offer(port: u16, payload_type: u8) -> Sdp {
    Sdp::with_media("127.0.0.1", vec![SdpMedia::audio(port, vec![SdpPayload::new(payload_type)])])
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = MediaServerConfig::load(path.as_deref())?;
    config.rtp.bind_address = [127, 0, 0, 1].into();

    setup_logging(&config.logging)?;
    log_welcome("b2b bridge demo", b2bmedia_media_core::VERSION);
    info!("Effective configuration:\n{}", render_config(&config)?);

    let context = B2BMediaContext {
        scheduler: MediaScheduler::new(&config.processor)?,
        factory: Arc::new(UdpStreamFactory::new(&config, CodecRegistry::shared())),
        receiver: Arc::new(UdpRtpReceiver::current()?),
        config: config.b2b.clone(),
    };

    let phone_a = UdpSocket::bind("127.0.0.1:0")?;
    let phone_b = UdpSocket::bind("127.0.0.1:0")?;
    phone_b.set_read_timeout(Some(Duration::from_millis(500)))?;

    let session = SessionRef::new(B2BMediaSession::new(
        &context,
        Arc::new(DemoLeg(Leg::A)),
        Arc::new(DemoLeg(Leg::B)),
    ));
    for (leg, phone, pt) in [(Leg::A, &phone_a, 8u8), (Leg::B, &phone_b, 0u8)] {
        session.update_remote_sdp(leg, &offer(phone.local_addr()?.port(), pt))?;
        let mut local = offer(1, pt);
        session.replace_connection_address(&mut local, leg, "127.0.0.1")?;
        session.update_local_sdp(leg, &local)?;
    }
    let a_port = session.local_port(Leg::A, 0).unwrap_or_default();
    info!("🔗 Bridge ready, leg A media on port {}", a_port);

    let mut payload = Vec::new();
    G711Codec::new(G711Variant::PCMA).encode(&[2000i16; 160], &mut payload)?;
    for seq in 0..50u16 {
        let packet = RtpPacket::new(
            RtpHeader::new(8, seq, u32::from(seq) * 160, 0xDE40),
            payload.clone().into(),
        );
        phone_a.send_to(&packet.serialize(), ("127.0.0.1", a_port))?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut buf = [0u8; 2048];
    let mut received = 0;
    while let Ok((n, _)) = phone_b.recv_from(&mut buf) {
        if let Ok(packet) = RtpPacket::parse(&buf[..n]) {
            received += 1;
            if received == 1 {
                info!("🎧 Phone B receives payload type {}", packet.header.payload_type);
            }
        }
    }
    info!("📊 Phone B received {} packets", received);

    session.stop();
    context.scheduler.shutdown();
    Ok(())
}
