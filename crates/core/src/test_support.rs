//! Packet builders shared by unit tests.

use std::time::SystemTime;

use crate::media::rtp::RtpPacket;
use crate::transport::demux::interleave;

pub const PT: u8 = 96;
pub const SSRC: u32 = 0xAABBCCDD;

/// Serialize one RTP packet with a fixed 12-byte header.
pub fn rtp_bytes(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + payload.len());
    out.push(0x80);
    out.push(((marker as u8) << 7) | PT);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&ts.to_be_bytes());
    out.extend_from_slice(&SSRC.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn rtp_packet(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> RtpPacket {
    RtpPacket::parse(&rtp_bytes(seq, ts, marker, payload), SystemTime::now())
        .expect("test packet parses")
}

/// Split a NAL unit (header byte first) into FU-A payloads of at most `chunk` data bytes.
pub fn fu_a_payloads(nal: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let indicator = (nal[0] & 0xe0) | 28;
    let body = &nal[1..];
    let pieces: Vec<&[u8]> = body.chunks(chunk).collect();
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let start = if i == 0 { 0x80 } else { 0 };
            let end = if i + 1 == pieces.len() { 0x40 } else { 0 };
            let mut p = vec![indicator, start | end | (nal[0] & 0x1f)];
            p.extend_from_slice(piece);
            p
        })
        .collect()
}

/// Wrap bytes in TCP interleaved framing.
pub fn interleaved(channel: u8, packet: &[u8]) -> Vec<u8> {
    interleave(channel, packet).expect("packet fits one frame")
}
