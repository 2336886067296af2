//! Media server configuration
//!
//! Every section has defaults so an empty file (or no file at all) yields a
//! working setup. See [`MediaServerConfig::load`].

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use b2bmedia_infra_common::config::load_config;
use b2bmedia_infra_common::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::PlayoutType;

/// Environment variable prefix, e.g. `B2BMEDIA__PROCESSOR__THREADS=8`
pub const ENV_PREFIX: &str = "B2BMEDIA";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    /// Media processor (worker pool) settings
    pub processor: MediaProcessorConfig,
    /// B2B media session settings
    pub b2b: B2bMediaConfig,
    /// RTP socket and playout settings
    pub rtp: RtpConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl MediaServerConfig {
    /// Load from an optional file plus `B2BMEDIA__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_config(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        self.processor.validate()?;
        self.rtp.validate()?;
        if self.b2b.alternate_buffer_size == 0 {
            return Err(Error::config("b2b.alternate_buffer_size must be non-zero"));
        }
        Ok(())
    }
}

/// Media processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaProcessorConfig {
    /// Number of worker threads
    pub threads: usize,
    /// Tick length in milliseconds
    pub tick_interval_ms: u64,
    /// Clock rate of the processor timestamp in Hz
    pub system_clock_rate: u32,
}

impl Default for MediaProcessorConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            tick_interval_ms: 10,
            system_clock_rate: 32000,
        }
    }
}

impl MediaProcessorConfig {
    /// Timestamp increment applied on every tick
    pub fn ts_increment(&self) -> u64 {
        self.tick_interval_ms * u64::from(self.system_clock_rate) / 1000
    }

    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::config("processor.threads must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::config("processor.tick_interval_ms must be non-zero"));
        }
        if self.ts_increment() == 0 {
            return Err(Error::config("processor.system_clock_rate too low for the tick interval"));
        }
        Ok(())
    }
}

/// Per-session relay and transcoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct B2bMediaConfig {
    /// Playout buffering for transcoded streams
    pub playout_type: PlayoutType,
    /// Relay behaviour
    pub relay: RelayConfig,
    /// Capacity in bytes of buffers feeding alternate audio into a leg
    pub alternate_buffer_size: usize,
}

impl Default for B2bMediaConfig {
    fn default() -> Self {
        Self {
            playout_type: PlayoutType::Adaptive,
            relay: RelayConfig::default(),
            alternate_buffer_size: 4096,
        }
    }
}

/// Relay settings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Keep the sender's sequence numbers on relayed packets
    pub transparent_seqno: bool,
    /// Keep the sender's SSRC on relayed packets
    pub transparent_ssrc: bool,
}

/// RTP socket and playout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    /// Address RTP sockets bind to
    pub bind_address: IpAddr,
    /// Lowest local RTP port (even)
    pub port_min: u16,
    /// Highest local RTP port
    pub port_max: u16,
    /// Packetization time used when the SDP carries no `a=ptime`
    pub default_ptime_ms: u32,
    /// Playout buffer bounds
    pub jitter: JitterConfig,
    /// Seconds without RTP before a stream reports a timeout, 0 disables
    pub rtp_timeout_secs: u64,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_min: 10000,
            port_max: 20000,
            default_ptime_ms: 20,
            jitter: JitterConfig::default(),
            rtp_timeout_secs: 0,
        }
    }
}

impl RtpConfig {
    fn validate(&self) -> Result<()> {
        if self.port_min == 0 || self.port_min >= self.port_max {
            return Err(Error::config(format!(
                "invalid RTP port range {}-{}",
                self.port_min, self.port_max
            )));
        }
        if self.default_ptime_ms == 0 {
            return Err(Error::config("rtp.default_ptime_ms must be non-zero"));
        }
        self.jitter.validate()
    }
}

/// Playout buffer bounds in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Lower bound of the adaptive delay
    pub min_delay_ms: u32,
    /// Upper bound of the adaptive delay; older audio is dropped
    pub max_delay_ms: u32,
    /// Fixed delay of the simple playout buffer
    pub simple_delay_ms: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 20,
            max_delay_ms: 200,
            simple_delay_ms: 40,
        }
    }
}

impl JitterConfig {
    fn validate(&self) -> Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(Error::config("rtp.jitter.min_delay_ms exceeds max_delay_ms"));
        }
        Ok(())
    }
}
