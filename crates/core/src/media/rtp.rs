use std::time::SystemTime;

use crate::error::{Result, RtpErrorKind, RtspError};

use super::h264::{FuHeader, NalHeader, nal_type};

/// RTP version carried by every packet we accept (RFC 3550 §5.1).
pub const RTP_VERSION: u8 = 2;

/// Length of the fixed RTP header, before CSRCs and extension.
pub const FIXED_HEADER_LEN: usize = 12;

/// One received RTP packet (RFC 3550 §5.1) carrying H.264 (RFC 6184).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            CSRC list (CC entries) / extension (X)             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `header_len` is always `12 + 4 * csrc_count` plus the extension block when
/// `X` is set; [`payload`](Self::payload) starts there and stops before any
/// padding. The first payload octet is decoded as an H.264 NAL header and, for
/// FU-A/FU-B packets, the second as the FU header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub csrcs: Vec<u32>,
    pub marker: bool,
    pub payload_type: u8,
    /// 16-bit, wraps at 65536.
    pub sequence: u16,
    /// Media clock (90 kHz for video).
    pub timestamp: u32,
    pub ssrc: u32,
    pub header_len: usize,
    /// Header of the first payload octet (F, NRI, type).
    pub nal: Option<NalHeader>,
    /// FU header for fragmentation units.
    pub fu: Option<FuHeader>,
    /// Wall-clock time the demultiplexer received the bytes.
    pub received_at: SystemTime,
    data: Vec<u8>,
    payload_end: usize,
}

impl RtpPacket {
    /// Parse one RTP packet.
    ///
    /// Never panics on malformed input: short buffers, a version other than 2
    /// and oversized padding return [`RtspError::Rtp`]. Payload type checks are
    /// left to the caller, which knows the negotiated format.
    pub fn parse(data: &[u8], received_at: SystemTime) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(truncated(data.len(), FIXED_HEADER_LEN));
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(RtspError::Rtp {
                kind: RtpErrorKind::UnsupportedVersion(version),
            });
        }

        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = data[0] & 0x0f;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut header_len = FIXED_HEADER_LEN + 4 * csrc_count as usize;
        if data.len() < header_len {
            return Err(truncated(data.len(), header_len));
        }
        let csrcs = data[FIXED_HEADER_LEN..header_len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if extension {
            // defined-by-profile (16) | length in 32-bit words (16)
            if data.len() < header_len + 4 {
                return Err(truncated(data.len(), header_len + 4));
            }
            let words = u16::from_be_bytes([data[header_len + 2], data[header_len + 3]]);
            header_len += 4 + 4 * words as usize;
            if data.len() < header_len {
                return Err(truncated(data.len(), header_len));
            }
        }

        let mut payload_end = data.len();
        if padding {
            let pad = data[data.len() - 1];
            if pad == 0 || header_len + pad as usize > data.len() {
                return Err(RtspError::Rtp {
                    kind: RtpErrorKind::InvalidPadding(pad),
                });
            }
            payload_end -= pad as usize;
        }

        let payload = &data[header_len..payload_end];
        let nal = payload.first().map(|&b| NalHeader::from_byte(b));
        let fu = match (nal, payload.get(1)) {
            (Some(h), Some(&b)) if h.nal_type == nal_type::FU_A || h.nal_type == nal_type::FU_B => {
                Some(FuHeader::from_byte(b))
            }
            _ => None,
        };

        Ok(Self {
            version,
            padding,
            extension,
            csrc_count,
            csrcs,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            header_len,
            nal,
            fu,
            received_at,
            data: data.to_vec(),
            payload_end,
        })
    }

    /// Payload bytes: after the header, before padding.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_len..self.payload_end]
    }

    /// The packet as received, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

fn truncated(len: usize, needed: usize) -> RtspError {
    RtspError::Rtp {
        kind: RtpErrorKind::Truncated { len, needed },
    }
}
