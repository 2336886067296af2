//! RTP fixed header (RFC 3550 section 5.1)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

const FIXED_HEADER_LEN: usize = 12;

/// RTP header fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// Extension profile id and data, if present
    pub extension_data: Option<(u16, Bytes)>,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_data: None,
        }
    }

    fn len(&self) -> usize {
        let ext = self
            .extension_data
            .as_ref()
            .map(|(_, data)| 4 + data.len())
            .unwrap_or(0);
        FIXED_HEADER_LEN + self.csrc.len() * 4 + ext
    }
}

/// RTP packet: header plus payload (padding stripped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a datagram
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(Error::InvalidPacket(format!("{} bytes is too short", data.len())));
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("unsupported version {}", version)));
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = FIXED_HEADER_LEN;
        if data.len() < offset + csrc_count * 4 {
            return Err(Error::InvalidPacket("truncated CSRC list".to_string()));
        }
        let csrc = data[offset..offset + csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_count * 4;

        let extension_data = if extension {
            if data.len() < offset + 4 {
                return Err(Error::InvalidPacket("truncated extension header".to_string()));
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;
            if data.len() < offset + words * 4 {
                return Err(Error::InvalidPacket("truncated extension".to_string()));
            }
            let ext = Bytes::copy_from_slice(&data[offset..offset + words * 4]);
            offset += words * 4;
            Some((profile, ext))
        } else {
            None
        };

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::InvalidPacket("invalid padding".to_string()));
            }
            end -= pad;
        }

        Ok(Self {
            header: RtpHeader {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension_data,
            },
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Serialize without padding
    pub fn serialize(&self) -> Bytes {
        let header = &self.header;
        let mut buf = BytesMut::with_capacity(header.len() + self.payload.len());

        let mut first = RTP_VERSION << 6;
        if header.extension_data.is_some() {
            first |= 0x10;
        }
        first |= (header.csrc.len().min(15)) as u8;
        buf.put_u8(first);
        let marker = if header.marker { 0x80 } else { 0 };
        buf.put_u8(marker | (header.payload_type & 0x7F));
        buf.put_u16(header.sequence_number);
        buf.put_u32(header.timestamp);
        buf.put_u32(header.ssrc);
        for csrc in header.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }
        if let Some((profile, data)) = &header.extension_data {
            buf.put_u16(*profile);
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(&data[..data.len() / 4 * 4]);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_packet() {
        let mut data = vec![0x80, 0x88, 0x12, 0x34, 0, 0, 0x01, 0x40, 0xde, 0xad, 0xbe, 0xef];
        data.extend_from_slice(&[1, 2, 3]);

        let packet = RtpPacket::parse(&data).unwrap();
        assert!(packet.header.marker);
        assert_eq!(packet.header.payload_type, 8);
        assert_eq!(packet.header.sequence_number, 0x1234);
        assert_eq!(packet.header.timestamp, 320);
        assert_eq!(packet.header.ssrc, 0xdeadbeef);
        assert_eq!(&packet.payload[..], &[1, 2, 3]);
        assert_eq!(&packet.serialize()[..], &data[..]);
    }

    #[test]
    fn test_padding_csrc_and_extension() {
        let mut data = vec![0xB1, 0x00, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3];
        data.extend_from_slice(&[0, 0, 0, 9]); // csrc
        data.extend_from_slice(&[0xBE, 0xDE, 0, 1, 1, 2, 3, 4]); // extension
        data.extend_from_slice(&[7, 7]); // payload
        data.extend_from_slice(&[0, 2]); // padding

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.header.csrc, vec![9]);
        let (profile, ext) = packet.header.extension_data.clone().unwrap();
        assert_eq!(profile, 0xBEDE);
        assert_eq!(&ext[..], &[1, 2, 3, 4]);
        assert_eq!(&packet.payload[..], &[7, 7]);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(RtpPacket::parse(&[0x80, 0]).is_err());
        assert!(RtpPacket::parse(&[0x40; 12]).is_err());
        // CSRC count larger than the datagram
        assert!(RtpPacket::parse(&[0x8F, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
