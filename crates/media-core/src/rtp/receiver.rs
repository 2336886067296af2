//! Socket readers feeding received datagrams into streams

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::RtpAudioStream;
use crate::error::{Error, Result};

/// Drives the receive side of RTP streams
pub trait RtpReceiver: Send + Sync {
    /// Start delivering datagrams of the stream's socket to the stream
    fn add_stream(&self, stream: Arc<dyn RtpAudioStream>) -> Result<()>;

    /// Stop delivering for the stream on `port`; returns whether it was registered
    fn remove_stream(&self, port: u16) -> bool;

    fn is_registered(&self, port: u16) -> bool;
}

/// Receiver running one tokio task per stream
pub struct UdpRtpReceiver {
    runtime: Handle,
    tasks: DashMap<u16, JoinHandle<()>>,
}

impl UdpRtpReceiver {
    /// Receiver spawning its tasks on `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: DashMap::new(),
        }
    }

    /// Receiver on the runtime of the calling context
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::stream(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(runtime))
    }

    /// Number of streams being read
    pub fn stream_count(&self) -> usize {
        self.tasks.len()
    }
}

impl RtpReceiver for UdpRtpReceiver {
    fn add_stream(&self, stream: Arc<dyn RtpAudioStream>) -> Result<()> {
        let port = stream.local_port();
        let socket = stream
            .local_socket()
            .ok_or_else(|| Error::stream(format!("stream on port {} has no socket", port)))?
            .try_clone()?;

        let task = self.runtime.spawn(async move {
            let socket = match UdpSocket::from_std(socket) {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("Cannot read RTP on port {}: {}", port, e);
                    return;
                }
            };
            let mut buf = vec![0u8; 2048];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => stream.on_packet_received(&buf[..n], from),
                    Err(e) => {
                        // ICMP port unreachable surfaces as a receive error on some platforms
                        debug!("RTP receive error on port {}: {}", port, e);
                    }
                }
            }
        });

        if let Some(previous) = self.tasks.insert(port, task) {
            previous.abort();
        }
        debug!("RTP receiver: added stream on port {}", port);
        Ok(())
    }

    fn remove_stream(&self, port: u16) -> bool {
        match self.tasks.remove(&port) {
            Some((_, task)) => {
                task.abort();
                debug!("RTP receiver: removed stream on port {}", port);
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, port: u16) -> bool {
        self.tasks.contains_key(&port)
    }
}

impl Drop for UdpRtpReceiver {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}
