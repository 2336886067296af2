//! Stream allocation

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use super::stream::{RtpAudio, StreamSettings};
use super::RtpAudioStream;
use crate::codec::CodecRegistry;
use crate::config::{MediaServerConfig, RtpConfig};
use crate::error::{Error, Result};
use crate::types::Leg;

/// Creates the per-leg streams of new stream pairs
pub trait RtpStreamFactory: Send + Sync {
    fn create_stream(&self, leg: Leg) -> Result<Arc<dyn RtpAudioStream>>;
}

/// Allocates [`RtpAudio`] streams on even ports of the configured range
pub struct UdpStreamFactory {
    rtp: RtpConfig,
    settings: StreamSettings,
    codecs: Arc<CodecRegistry>,
    next_port: Mutex<u16>,
}

impl UdpStreamFactory {
    pub fn new(config: &MediaServerConfig, codecs: Arc<CodecRegistry>) -> Self {
        let rtp = config.rtp.clone();
        let settings = StreamSettings {
            system_clock_rate: config.processor.system_clock_rate,
            default_ptime_ms: rtp.default_ptime_ms,
            jitter: rtp.jitter,
            relay: config.b2b.relay,
            rtp_timeout: (rtp.rtp_timeout_secs > 0).then(|| Duration::from_secs(rtp.rtp_timeout_secs)),
        };
        let first = even_at_or_above(rtp.port_min);
        Self {
            next_port: Mutex::new(first),
            rtp,
            settings,
            codecs,
        }
    }

    fn bind(&self, port: u16) -> std::io::Result<UdpSocket> {
        let addr = SocketAddr::new(self.rtp.bind_address, port);
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        Ok(socket.into())
    }

    /// Bind the next free even port, wrapping around the range once
    fn allocate_socket(&self) -> Result<UdpSocket> {
        let min = even_at_or_above(self.rtp.port_min);
        let max = self.rtp.port_max;
        let slots = (max.saturating_sub(min) / 2 + 1) as usize;

        let mut next = self.next_port.lock();
        for _ in 0..slots {
            let port = *next;
            *next = if port >= max.saturating_sub(1) { min } else { port + 2 };
            match self.bind(port) {
                Ok(socket) => return Ok(socket),
                Err(e) => trace!("Port {} unavailable: {}", port, e),
            }
        }
        Err(Error::PortsExhausted {
            min: self.rtp.port_min,
            max,
        })
    }
}

fn even_at_or_above(port: u16) -> u16 {
    if port % 2 == 0 {
        port
    } else {
        port.saturating_add(1)
    }
}

impl RtpStreamFactory for UdpStreamFactory {
    fn create_stream(&self, leg: Leg) -> Result<Arc<dyn RtpAudioStream>> {
        let socket = self.allocate_socket()?;
        let stream = RtpAudio::new(leg, socket, self.settings.clone(), self.codecs.clone())?;
        debug!("Allocated RTP port {} for leg {}", stream.local_port(), leg);
        Ok(Arc::new(stream))
    }
}
