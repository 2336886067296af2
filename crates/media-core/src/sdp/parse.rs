//! RFC 4566 text parsing

use std::str::FromStr;

use tracing::trace;

use super::{MediaDirection, MediaType, Sdp, SdpConnection, SdpMedia, SdpOrigin, SdpPayload};
use crate::error::{Error, Result};

impl FromStr for Sdp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut sdp = Sdp::default();

        for (index, raw) in s.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            let (kind, value) = line
                .split_once('=')
                .ok_or_else(|| Error::sdp_parse(line_no, "missing '='"))?;

            match kind {
                "v" => {
                    sdp.version = value
                        .parse()
                        .map_err(|_| Error::sdp_parse(line_no, "invalid version"))?;
                }
                "o" => sdp.origin = parse_origin(line_no, value)?,
                "s" => sdp.session_name = value.to_string(),
                "c" => {
                    let conn = parse_connection(line_no, value)?;
                    match sdp.media.last_mut() {
                        Some(media) => media.connection = Some(conn),
                        None => sdp.connection = Some(conn),
                    }
                }
                "t" => sdp.timing = parse_timing(line_no, value)?,
                "m" => sdp.media.push(parse_media(line_no, value)?),
                "a" => match sdp.media.last_mut() {
                    Some(media) => apply_media_attribute(line_no, media, value)?,
                    None => sdp.attributes.push(value.to_string()),
                },
                _ => trace!("Skipping SDP line {}: {}", line_no, line),
            }
        }

        Ok(sdp)
    }
}

fn parse_connection(line_no: usize, value: &str) -> Result<SdpConnection> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(net_type), Some(addr_type), Some(address)) => Ok(SdpConnection {
            net_type: net_type.to_string(),
            addr_type: addr_type.to_string(),
            // strip TTL / address count suffixes of multicast addresses
            address: address.split('/').next().unwrap_or(address).to_string(),
        }),
        _ => Err(Error::sdp_parse(line_no, "connection needs 3 fields")),
    }
}

fn parse_origin(line_no: usize, value: &str) -> Result<SdpOrigin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(Error::sdp_parse(line_no, "origin needs 6 fields"));
    }
    Ok(SdpOrigin {
        username: parts[0].to_string(),
        session_id: parts[1].to_string(),
        session_version: parts[2].to_string(),
        connection: SdpConnection {
            net_type: parts[3].to_string(),
            addr_type: parts[4].to_string(),
            address: parts[5].to_string(),
        },
    })
}

fn parse_timing(line_no: usize, value: &str) -> Result<(u64, u64)> {
    let mut parts = value.split_whitespace().map(u64::from_str);
    match (parts.next(), parts.next()) {
        (Some(Ok(start)), Some(Ok(stop))) => Ok((start, stop)),
        _ => Err(Error::sdp_parse(line_no, "invalid timing")),
    }
}

fn parse_media(line_no: usize, value: &str) -> Result<SdpMedia> {
    let mut parts = value.split_whitespace();
    let media_type = parts
        .next()
        .map(MediaType::from_token)
        .ok_or_else(|| Error::sdp_parse(line_no, "missing media type"))?;
    let port = parts
        .next()
        // "port/count" form
        .and_then(|p| p.split('/').next())
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| Error::sdp_parse(line_no, "invalid media port"))?;
    let transport = parts
        .next()
        .ok_or_else(|| Error::sdp_parse(line_no, "missing transport"))?
        .to_string();

    let mut payloads = Vec::new();
    for fmt in parts {
        let payload_type = fmt
            .parse::<u8>()
            .ok()
            .filter(|pt| *pt < 128)
            .ok_or_else(|| Error::sdp_parse(line_no, format!("invalid payload type '{}'", fmt)))?;
        payloads.push(SdpPayload::new(payload_type));
    }

    Ok(SdpMedia {
        media_type,
        port,
        transport,
        payloads,
        connection: None,
        direction: MediaDirection::SendRecv,
        ptime: None,
        attributes: Vec::new(),
    })
}

fn apply_media_attribute(line_no: usize, media: &mut SdpMedia, value: &str) -> Result<()> {
    if let Some(direction) = MediaDirection::from_attribute(value) {
        media.direction = direction;
        return Ok(());
    }

    let (name, rest) = value.split_once(':').unwrap_or((value, ""));
    match name {
        "rtpmap" => {
            let (pt, encoding) = split_format(line_no, rest)?;
            let mut fields = encoding.split('/');
            let encoding_name = fields.next().unwrap_or_default().to_string();
            let clock_rate = fields
                .next()
                .map(|r| r.parse::<u32>())
                .transpose()
                .map_err(|_| Error::sdp_parse(line_no, "invalid rtpmap clock rate"))?
                .unwrap_or(0);
            let encoding_params = fields.next().and_then(|p| p.parse::<u32>().ok());

            if let Some(payload) = media.payloads.iter_mut().find(|p| p.payload_type == pt) {
                payload.encoding_name = encoding_name;
                payload.clock_rate = clock_rate;
                payload.encoding_params = encoding_params;
            } else {
                trace!("rtpmap for payload {} not listed in media line", pt);
            }
        }
        "fmtp" => {
            let (pt, params) = split_format(line_no, rest)?;
            if let Some(payload) = media.payloads.iter_mut().find(|p| p.payload_type == pt) {
                payload.fmtp = Some(params.to_string());
            }
        }
        "ptime" => {
            media.ptime = Some(
                rest.trim()
                    .parse()
                    .map_err(|_| Error::sdp_parse(line_no, "invalid ptime"))?,
            );
        }
        _ => media.attributes.push(value.to_string()),
    }
    Ok(())
}

fn split_format(line_no: usize, value: &str) -> Result<(u8, &str)> {
    let (pt, rest) = value
        .split_once(' ')
        .ok_or_else(|| Error::sdp_parse(line_no, "format attribute without value"))?;
    let pt = pt
        .parse::<u8>()
        .map_err(|_| Error::sdp_parse(line_no, "invalid payload type in attribute"))?;
    Ok((pt, rest.trim()))
}
