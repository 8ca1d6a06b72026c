use std::time::SystemTime;

use super::h264::{H264NalUnit, START_CODE, nal_type};
use super::rtp::RtpPacket;

/// Counters kept by [`H264Depacketizer`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepacketizerStats {
    pub nal_units: u64,
    /// Partial FU-A runs thrown away (missing start, gap, interrupted run).
    pub fragments_discarded: u64,
    /// Packets whose payload structure we do not handle (FU-B, reserved types).
    pub unsupported: u64,
}

#[derive(Debug)]
struct FuRun {
    data: Vec<u8>,
    timestamp: u32,
    received_at: SystemTime,
    last_sequence: u16,
}

/// RTP → H.264 depacketizer (RFC 6184).
///
/// Turns each RTP packet into zero or more Annex B NAL units:
///
/// - **Single NAL unit** (types 1–23, §5.6): one unit per packet.
/// - **FU-A** (type 28, §5.8): fragments are accumulated from the start
///   fragment to the end fragment. The NAL header is rebuilt from the FU
///   indicator's F/NRI bits and the FU header's type:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   rebuilt:       [F|NRI|NAL_Type]
///   ```
///
///   A run that loses a packet, or is interrupted by a new start or a single
///   NAL packet, is dropped; reassembly restarts at the next start fragment.
/// - **STAP-A/STAP-B** (24/25, §5.7.1) and **MTAP16/MTAP24** (26/27, §5.7.2):
///   split into independent units by their 16-bit size fields.
///
/// Every unit carries the RTP timestamp (plus the MTAP offset for MTAPs) and
/// the packet's receive time.
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fu: Option<FuRun>,
    stats: DepacketizerStats,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.stats
    }

    /// Whether an FU-A run is waiting for more fragments.
    pub fn in_progress(&self) -> bool {
        self.fu.is_some()
    }

    /// Forget any partial unit (e.g. after a reconnect).
    pub fn reset(&mut self) {
        if self.fu.take().is_some() {
            self.stats.fragments_discarded += 1;
        }
    }

    pub fn push(&mut self, packet: &RtpPacket) -> Vec<H264NalUnit> {
        let mut out = Vec::new();
        let payload = packet.payload();
        let Some(header) = packet.nal else {
            tracing::trace!(seq = packet.sequence, "empty RTP payload");
            return out;
        };

        match header.nal_type {
            nal_type::SLICE..=23 => {
                if self.fu.is_some() {
                    self.discard("single NAL unit interrupted FU-A run");
                }
                out.push(H264NalUnit::from_payload(
                    payload,
                    packet.timestamp,
                    packet.received_at,
                ));
            }
            nal_type::STAP_A => Self::aggregate(&payload[1..], packet, &mut out),
            nal_type::STAP_B => {
                if payload.len() >= 3 {
                    Self::aggregate(&payload[3..], packet, &mut out)
                }
            }
            nal_type::MTAP16 => Self::multi_time(payload, packet, 2, &mut out),
            nal_type::MTAP24 => Self::multi_time(payload, packet, 3, &mut out),
            nal_type::FU_A => {
                if let Some(nal) = self.fragment(packet) {
                    out.push(nal);
                }
            }
            other => {
                self.stats.unsupported += 1;
                tracing::debug!(
                    nal_type = other,
                    seq = packet.sequence,
                    "unsupported H.264 payload structure ignored"
                );
            }
        }

        self.stats.nal_units += out.len() as u64;
        for nal in &out {
            tracing::trace!(
                nal_type = nal.nal_type(),
                len = nal.data().len(),
                ts = nal.timestamp(),
                "NAL unit complete"
            );
        }
        out
    }

    fn fragment(&mut self, packet: &RtpPacket) -> Option<H264NalUnit> {
        let payload = packet.payload();
        let Some(fu) = packet.fu else {
            self.stats.fragments_discarded += 1;
            tracing::debug!(seq = packet.sequence, "FU-A packet without FU header");
            return None;
        };

        if fu.start {
            if self.fu.is_some() {
                self.discard("FU-A start before previous end");
            }
            let mut data = Vec::with_capacity(START_CODE.len() + payload.len());
            data.extend_from_slice(&START_CODE);
            data.push((payload[0] & 0xe0) | fu.nal_type);
            data.extend_from_slice(&payload[2..]);
            self.fu = Some(FuRun {
                data,
                timestamp: packet.timestamp,
                received_at: packet.received_at,
                last_sequence: packet.sequence,
            });
        } else {
            let Some(run) = self.fu.as_mut() else {
                self.stats.fragments_discarded += 1;
                tracing::trace!(seq = packet.sequence, "FU-A fragment without start dropped");
                return None;
            };
            if packet.sequence != run.last_sequence.wrapping_add(1)
                || packet.timestamp != run.timestamp
            {
                let expected = run.last_sequence.wrapping_add(1);
                tracing::debug!(expected, got = packet.sequence, "FU-A run broken");
                self.discard("packet loss inside FU-A run");
                return None;
            }
            run.data.extend_from_slice(&payload[2..]);
            run.last_sequence = packet.sequence;
        }

        if fu.end {
            let run = self.fu.take()?;
            return Some(H264NalUnit::from_annex_b(
                run.data,
                run.timestamp,
                run.received_at,
            ));
        }
        None
    }

    /// Split STAP entries: `size(16) | NAL` repeated.
    fn aggregate(mut units: &[u8], packet: &RtpPacket, out: &mut Vec<H264NalUnit>) {
        while units.len() >= 2 {
            let size = u16::from_be_bytes([units[0], units[1]]) as usize;
            units = &units[2..];
            if size == 0 || size > units.len() {
                tracing::debug!(size, remaining = units.len(), "truncated aggregation unit");
                return;
            }
            out.push(H264NalUnit::from_payload(
                &units[..size],
                packet.timestamp,
                packet.received_at,
            ));
            units = &units[size..];
        }
    }

    /// Split MTAP entries after the 16-bit DONB:
    /// `size(16) | DOND(8) | TS offset(16 or 24) | NAL` repeated.
    fn multi_time(
        payload: &[u8],
        packet: &RtpPacket,
        offset_len: usize,
        out: &mut Vec<H264NalUnit>,
    ) {
        if payload.len() < 3 {
            return;
        }
        let mut units = &payload[3..];
        let prefix = 2 + 1 + offset_len;
        while units.len() >= prefix {
            let size = u16::from_be_bytes([units[0], units[1]]) as usize;
            let ts_offset = units[3..prefix]
                .iter()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);
            units = &units[prefix..];
            if size == 0 || size > units.len() {
                tracing::debug!(size, remaining = units.len(), "truncated MTAP unit");
                return;
            }
            out.push(H264NalUnit::from_payload(
                &units[..size],
                packet.timestamp.wrapping_add(ts_offset),
                packet.received_at,
            ));
            units = &units[size..];
        }
    }

    fn discard(&mut self, reason: &'static str) {
        if self.fu.take().is_some() {
            self.stats.fragments_discarded += 1;
            tracing::debug!(reason, "partial NAL unit discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fu_a_payloads, rtp_packet};

    fn big_nal(len: usize) -> Vec<u8> {
        let mut nal = vec![0x65];
        nal.extend((0..len).map(|i| (i * 7 + 3) as u8));
        nal
    }

    #[test]
    fn single_nal_packet() {
        let mut d = H264Depacketizer::new();
        let out = d.push(&rtp_packet(1, 3000, true, &[0x67, 0x42, 0x00, 0x1e]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data(), &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e]);
        assert_eq!(out[0].timestamp(), 3000);
        assert!(out[0].is_sequence_parameter_set());
    }

    #[test]
    fn fu_a_reassembly_matches_concatenation() {
        for (len, chunk) in [(10, 3), (100, 7), (1500, 1400), (4000, 999)] {
            let nal = big_nal(len);
            let payloads = fu_a_payloads(&nal, chunk);
            let mut d = H264Depacketizer::new();
            let mut out = Vec::new();
            for (i, p) in payloads.iter().enumerate() {
                out.extend(d.push(&rtp_packet(100 + i as u16, 9000, i + 1 == payloads.len(), p)));
            }
            assert_eq!(out.len(), 1, "len {len} chunk {chunk}");

            let mut expected = START_CODE.to_vec();
            expected.push((payloads[0][0] & 0xe0) | (payloads[0][1] & 0x1f));
            for p in &payloads {
                expected.extend_from_slice(&p[2..]);
            }
            assert_eq!(out[0].data(), expected.as_slice());
            assert_eq!(out[0].payload(), nal.as_slice());
            assert!(out[0].is_i_frame());
        }
    }

    #[test]
    fn fu_a_run_crossing_sequence_wrap() {
        let nal = big_nal(30);
        let payloads = fu_a_payloads(&nal, 10);
        let mut d = H264Depacketizer::new();
        let mut out = Vec::new();
        for (i, p) in payloads.iter().enumerate() {
            out.extend(d.push(&rtp_packet(65534u16.wrapping_add(i as u16), 0, false, p)));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload(), nal.as_slice());
    }

    #[test]
    fn fragment_without_start_is_dropped() {
        let payloads = fu_a_payloads(&big_nal(30), 10);
        let mut d = H264Depacketizer::new();
        assert!(d.push(&rtp_packet(2, 0, false, &payloads[1])).is_empty());
        assert!(d.push(&rtp_packet(3, 0, true, &payloads[2])).is_empty());
        assert_eq!(d.stats().fragments_discarded, 2);
    }

    #[test]
    fn lost_end_restarts_at_next_start() {
        let first = fu_a_payloads(&big_nal(30), 10);
        let second_nal = big_nal(20);
        let second = fu_a_payloads(&second_nal, 10);
        let mut d = H264Depacketizer::new();

        d.push(&rtp_packet(1, 0, false, &first[0]));
        d.push(&rtp_packet(2, 0, false, &first[1]));
        // end fragment lost; the next unit starts
        let mut out = d.push(&rtp_packet(4, 3000, false, &second[0]));
        out.extend(d.push(&rtp_packet(5, 3000, true, &second[1])));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload(), second_nal.as_slice());
        assert_eq!(d.stats().fragments_discarded, 1);
    }

    #[test]
    fn gap_inside_run_discards() {
        let payloads = fu_a_payloads(&big_nal(30), 10);
        let mut d = H264Depacketizer::new();
        d.push(&rtp_packet(10, 0, false, &payloads[0]));
        assert!(d.push(&rtp_packet(12, 0, true, &payloads[2])).is_empty());
        assert!(!d.in_progress());
    }

    #[test]
    fn stap_a_split() {
        let mut payload = vec![24];
        for nal in [&[0x67u8, 0x42, 0x00][..], &[0x68, 0xce][..]] {
            payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            payload.extend_from_slice(nal);
        }
        let out = H264Depacketizer::new().push(&rtp_packet(1, 500, false, &payload));
        assert_eq!(out.len(), 2);
        assert!(out[0].is_sequence_parameter_set());
        assert!(out[1].is_picture_parameter_set());
        assert_eq!(out[1].payload(), &[0x68, 0xce]);
    }

    #[test]
    fn stap_a_truncated_entry_stops() {
        let payload = [24, 0x00, 0x02, 0x67, 0x42, 0x00, 0x09, 0x68];
        let out = H264Depacketizer::new().push(&rtp_packet(1, 0, false, &payload));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn mtap16_applies_timestamp_offset() {
        let mut payload = vec![26, 0x00, 0x01]; // DONB
        payload.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x41, 0x9a]);
        payload.extend_from_slice(&[0x00, 0x02, 0x01, 0x0b, 0xb8, 0x41, 0x9b]);
        let out = H264Depacketizer::new().push(&rtp_packet(1, 1000, false, &payload));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp(), 1000);
        assert_eq!(out[1].timestamp(), 4000);
        assert_eq!(out[1].payload(), &[0x41, 0x9b]);
    }

    #[test]
    fn fu_b_reported_unsupported() {
        let mut d = H264Depacketizer::new();
        assert!(d.push(&rtp_packet(1, 0, false, &[29, 0x85, 0, 0, 1])).is_empty());
        assert_eq!(d.stats().unsupported, 1);
    }
}
