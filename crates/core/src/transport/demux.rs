//! Byte-level demultiplexer for one RTSP-over-TCP connection.
//!
//! After PLAY the connection carries two interleaved kinds of traffic
//! (RFC 2326 §10.12):
//!
//! ```text
//! RTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n            ← text response
//! $ <channel:u8> <length:u16 BE> <RTP packet>    ← binary frame
//! ```
//!
//! Every byte is pushed into one rolling buffer and offered to two state
//! machines. The text machine finds CRLF-delimited headers and an optional
//! `Content-Length` body; the binary machine looks for `$` frames and
//! validates the RTP version, payload type and sequence number before it
//! commits to a frame. When either completes, the buffer is cleared and both
//! start over. Anything that fails validation is skipped byte by byte until
//! the next plausible frame or status line, so a corrupted stream recovers
//! without tearing down the connection.
//!
//! The binary machine stays off until the PLAY response has been seen.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::media::TransportEvent;
use crate::media::rtp::{FIXED_HEADER_LEN, RTP_VERSION, RtpPacket};
use crate::protocol::{ResponseInbox, RtspResponse};

/// First byte of an interleaved frame.
pub const MAGIC: u8 = 0x24;
/// `$`, channel and two length bytes.
pub const FRAME_HEADER_LEN: usize = 4;
/// A packet is only accepted if `last < seq < last + SEQUENCE_WINDOW`.
pub const SEQUENCE_WINDOW: u16 = 25;
/// Consecutive out-of-window packets after which the window follows the
/// stream instead.
pub const MAX_IMPLAUSIBLE_RUN: u32 = 8;

const STATUS_PREFIX: &[u8] = b"RTSP/";
const CONTENT_LENGTH: &[u8] = b"content-length:";
/// Idle bytes tolerated before the buffer is compacted.
const COMPACT_THRESHOLD: usize = 1024;
const ANY_PAYLOAD_TYPE: u8 = 0xFF;
const ANY_CHANNEL: u8 = 0xFF;
/// Largest RTP packet accepted inside one interleaved frame unless
/// configured otherwise. A corrupted length above this is rejected at once
/// instead of swallowing the frames that follow.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8192;

/// Wrap an RTP packet in interleaved framing. `None` if it does not fit the
/// 16-bit length field.
pub fn interleave(channel: u8, packet: &[u8]) -> Option<Vec<u8>> {
    let len = u16::try_from(packet.len()).ok()?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + packet.len());
    out.extend_from_slice(&[MAGIC, channel]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(packet);
    Some(out)
}

/// Receives complete RTP packets, in stream order.
pub trait PacketSink: Send {
    fn on_rtp_packet(&mut self, packet: RtpPacket);

    fn on_transport_event(&mut self, _event: TransportEvent) {}
}

/// Switches shared between the control thread and the reading thread.
#[derive(Debug)]
pub struct DemuxControl {
    binary: AtomicBool,
    payload_type: AtomicU8,
    channel: AtomicU8,
    /// CSeq of an outstanding PLAY; 0 when none.
    play_cseq: AtomicU32,
}

impl Default for DemuxControl {
    fn default() -> Self {
        Self {
            binary: AtomicBool::new(false),
            payload_type: AtomicU8::new(ANY_PAYLOAD_TYPE),
            channel: AtomicU8::new(ANY_CHANNEL),
            play_cseq: AtomicU32::new(0),
        }
    }
}

impl DemuxControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_binary(&self) {
        self.binary.store(true, Ordering::Release);
    }

    pub fn binary_enabled(&self) -> bool {
        self.binary.load(Ordering::Acquire)
    }

    /// Only accept RTP with this payload type. `None` accepts any.
    pub fn set_payload_type(&self, payload_type: Option<u8>) {
        self.payload_type
            .store(payload_type.unwrap_or(ANY_PAYLOAD_TYPE), Ordering::Release);
    }

    pub fn payload_type(&self) -> Option<u8> {
        match self.payload_type.load(Ordering::Acquire) {
            ANY_PAYLOAD_TYPE => None,
            pt => Some(pt),
        }
    }

    /// Only accept frames on this interleaved channel. `None` accepts any.
    pub fn set_channel(&self, channel: Option<u8>) {
        self.channel
            .store(channel.unwrap_or(ANY_CHANNEL), Ordering::Release);
    }

    pub fn channel(&self) -> Option<u8> {
        match self.channel.load(Ordering::Acquire) {
            ANY_CHANNEL => None,
            channel => Some(channel),
        }
    }

    /// Turn on binary parsing as soon as a 200 response for `cseq` is read,
    /// so frames sent right behind it in the same segment are not lost.
    pub fn enable_binary_after(&self, cseq: u32) {
        self.play_cseq.store(cseq, Ordering::Release);
    }

    fn observe_response(&self, response: &RtspResponse) {
        let armed = self.play_cseq.load(Ordering::Acquire);
        if armed != 0 && response.is_success() && response.cseq() == Some(armed) {
            self.play_cseq.store(0, Ordering::Release);
            if !self.binary.swap(true, Ordering::AcqRel) {
                tracing::debug!(cseq = armed, "interleaved RTP parsing enabled");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextState {
    WaitHeaderCr1,
    WaitHeaderLf1,
    WaitHeaderCr2,
    WaitHeaderLf2,
    WaitForContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    WaitMagicByte,
    WaitChannel,
    WaitLength,
    WaitFirstHeaderByte,
    WaitSecondHeaderByte,
    WaitSequenceNumber,
    WaitEndOfPacket,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub bytes: u64,
    pub messages: u64,
    pub packets: u64,
    /// Binary candidates abandoned during validation.
    pub resyncs: u64,
    /// Candidates rejected by the sequence window (also counted in `resyncs`).
    pub implausible_sequences: u64,
    pub rejected_content_lengths: u64,
    /// Frames that validated but did not parse as RTP.
    pub malformed_packets: u64,
    pub overflows: u64,
}

pub struct Demultiplexer<P> {
    buf: Vec<u8>,
    capacity: usize,
    max_content_length: usize,
    max_frame_length: usize,
    received_at: SystemTime,

    text: TextState,
    line_start: usize,
    message_start: Option<usize>,
    content_length: usize,
    content_remaining: usize,

    binary: BinaryState,
    frame_start: usize,
    channel: u8,
    length: usize,
    field_bytes: u8,
    sequence: u16,
    last_sequence: Option<u16>,
    implausible_run: u32,

    inbox: ResponseInbox,
    control: Arc<DemuxControl>,
    sink: P,
    stats: DemuxStats,
}

impl<P: PacketSink> Demultiplexer<P> {
    /// `buffer_size` bounds one message or frame; `Content-Length` values
    /// above `buffer_size - content_length_slack` are treated as 0.
    pub fn new(
        buffer_size: usize,
        content_length_slack: usize,
        inbox: ResponseInbox,
        control: Arc<DemuxControl>,
        sink: P,
    ) -> Self {
        Self {
            buf: Vec::with_capacity(buffer_size),
            capacity: buffer_size,
            max_content_length: buffer_size.saturating_sub(content_length_slack),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            received_at: SystemTime::now(),
            text: TextState::WaitHeaderCr1,
            line_start: 0,
            message_start: None,
            content_length: 0,
            content_remaining: 0,
            binary: BinaryState::WaitMagicByte,
            frame_start: 0,
            channel: 0,
            length: 0,
            field_bytes: 0,
            sequence: 0,
            last_sequence: None,
            implausible_run: 0,
            inbox,
            control,
            sink,
            stats: DemuxStats::default(),
        }
    }

    /// Reject interleaved frames longer than `length` bytes.
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn text_state(&self) -> TextState {
        self.text
    }

    pub fn binary_state(&self) -> BinaryState {
        self.binary
    }

    /// Bytes currently held for an incomplete message or frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    pub fn into_sink(self) -> P {
        self.sink
    }

    /// Forget buffered bytes and the sequence history.
    pub fn reset(&mut self) {
        self.clear();
        self.last_sequence = None;
        self.implausible_run = 0;
    }

    /// Process one chunk from the socket. All packets completed within it
    /// share one receive timestamp.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.received_at = SystemTime::now();
        self.stats.bytes += chunk.len() as u64;
        for &b in chunk {
            self.push_byte(b);
        }
    }

    fn push_byte(&mut self, b: u8) {
        if self.buf.len() >= self.capacity {
            self.stats.overflows += 1;
            tracing::warn!(
                capacity = self.capacity,
                text = ?self.text,
                binary = ?self.binary,
                "receive buffer full, discarding"
            );
            self.clear();
        }

        self.buf.push(b);
        let pos = self.buf.len() - 1;

        if self.control.binary_enabled() && self.step_binary(b, pos) {
            return;
        }
        self.step_text(b, pos);

        if self.buf.len() >= COMPACT_THRESHOLD {
            self.compact();
        }
    }

    /// Returns true when a frame completed and the buffer was cleared.
    fn step_binary(&mut self, b: u8, pos: usize) -> bool {
        match self.binary {
            BinaryState::WaitMagicByte => {
                if b == MAGIC {
                    self.frame_start = pos;
                    self.binary = BinaryState::WaitChannel;
                }
            }
            BinaryState::WaitChannel => match self.control.channel() {
                Some(expected) if expected != b => self.resync(b, pos),
                _ => {
                    self.channel = b;
                    self.length = 0;
                    self.field_bytes = 0;
                    self.binary = BinaryState::WaitLength;
                }
            },
            BinaryState::WaitLength => {
                self.length = (self.length << 8) | b as usize;
                self.field_bytes += 1;
                if self.field_bytes == 2 {
                    if self.length < FIXED_HEADER_LEN
                        || self.length > self.max_frame_length
                        || self.frame_start + FRAME_HEADER_LEN + self.length > self.capacity
                    {
                        tracing::trace!(length = self.length, "implausible frame length");
                        self.resync(b, pos);
                    } else {
                        self.binary = BinaryState::WaitFirstHeaderByte;
                    }
                }
            }
            BinaryState::WaitFirstHeaderByte => {
                if b >> 6 == RTP_VERSION {
                    self.binary = BinaryState::WaitSecondHeaderByte;
                } else {
                    self.resync(b, pos);
                }
            }
            BinaryState::WaitSecondHeaderByte => {
                let payload_type = b & 0x7f;
                match self.control.payload_type() {
                    Some(expected) if expected != payload_type => self.resync(b, pos),
                    _ => {
                        self.sequence = 0;
                        self.field_bytes = 0;
                        self.binary = BinaryState::WaitSequenceNumber;
                    }
                }
            }
            BinaryState::WaitSequenceNumber => {
                self.sequence = (self.sequence << 8) | b as u16;
                self.field_bytes += 1;
                if self.field_bytes == 2 {
                    if self.sequence_plausible(self.sequence) {
                        self.binary = BinaryState::WaitEndOfPacket;
                    } else {
                        self.stats.implausible_sequences += 1;
                        self.resync(b, pos);
                    }
                }
            }
            BinaryState::WaitEndOfPacket => {}
        }

        if self.binary == BinaryState::WaitEndOfPacket
            && self.buf.len() - self.frame_start == FRAME_HEADER_LEN + self.length
        {
            self.complete_packet();
            return true;
        }
        false
    }

    /// Abandon the current candidate. The byte that failed may itself start
    /// the next frame.
    fn resync(&mut self, b: u8, pos: usize) {
        self.stats.resyncs += 1;
        self.binary = BinaryState::WaitMagicByte;
        if b == MAGIC {
            self.frame_start = pos;
            self.binary = BinaryState::WaitChannel;
        }
    }

    /// No wrap-around handling: after 65535 the window rejects 0..24 until
    /// the implausible run rebases it.
    fn sequence_plausible(&mut self, seq: u16) -> bool {
        let Some(last) = self.last_sequence else {
            return true;
        };
        if seq > last && (seq as u32) < last as u32 + SEQUENCE_WINDOW as u32 {
            return true;
        }
        self.implausible_run += 1;
        if self.implausible_run > MAX_IMPLAUSIBLE_RUN {
            tracing::debug!(last, seq, "sequence window rebased");
            return true;
        }
        tracing::trace!(last, seq, "implausible sequence number");
        false
    }

    fn complete_packet(&mut self) {
        let start = self.frame_start + FRAME_HEADER_LEN;
        let end = start + self.length;
        match RtpPacket::parse(&self.buf[start..end], self.received_at) {
            Ok(packet) => {
                self.stats.packets += 1;
                self.last_sequence = Some(packet.sequence);
                self.implausible_run = 0;
                tracing::trace!(
                    channel = self.channel,
                    seq = packet.sequence,
                    ts = packet.timestamp,
                    len = self.length,
                    "RTP packet"
                );
                self.sink.on_rtp_packet(packet);
            }
            Err(e) => {
                self.stats.malformed_packets += 1;
                tracing::debug!(error = %e, channel = self.channel, "dropping malformed RTP packet");
            }
        }
        self.clear();
    }

    fn step_text(&mut self, b: u8, pos: usize) {
        match self.text {
            TextState::WaitHeaderCr1 => {
                if b == b'\r' {
                    self.text = TextState::WaitHeaderLf1;
                }
            }
            TextState::WaitHeaderLf1 => match b {
                b'\n' => self.end_of_line(pos),
                b'\r' => {}
                _ => self.text = TextState::WaitHeaderCr1,
            },
            TextState::WaitHeaderCr2 => {
                self.text = if b == b'\r' {
                    TextState::WaitHeaderLf2
                } else {
                    TextState::WaitHeaderCr1
                };
            }
            TextState::WaitHeaderLf2 => {
                if b == b'\n' {
                    self.end_of_headers(pos);
                } else {
                    self.text = TextState::WaitHeaderCr1;
                }
            }
            TextState::WaitForContent => {
                self.content_remaining -= 1;
                if self.content_remaining == 0 {
                    self.complete_message(pos);
                }
            }
        }
    }

    /// `pos` is the LF; the line runs from `line_start` up to the CR.
    fn end_of_line(&mut self, pos: usize) {
        let line_end = pos.saturating_sub(1).max(self.line_start);
        let line = &self.buf[self.line_start..line_end];
        if self.message_start.is_some() {
            self.inspect_header(self.line_start, line_end);
        } else if line.starts_with(STATUS_PREFIX) {
            self.message_start = Some(self.line_start);
            self.content_length = 0;
        } else if !line.is_empty() {
            tracing::trace!(len = line.len(), "skipping line outside a response");
        }
        self.line_start = pos + 1;
        self.text = TextState::WaitHeaderCr2;
        if self.message_start.is_none() {
            self.compact();
        }
    }

    fn inspect_header(&mut self, start: usize, end: usize) {
        let line = &self.buf[start..end];
        if line.len() < CONTENT_LENGTH.len()
            || !line[..CONTENT_LENGTH.len()].eq_ignore_ascii_case(CONTENT_LENGTH)
        {
            return;
        }
        let value = String::from_utf8_lossy(&line[CONTENT_LENGTH.len()..]);
        let parsed = value.trim().parse::<i64>();
        self.content_length = match parsed {
            Ok(n) if n >= 0 && (n as u64) <= self.max_content_length as u64 => n as usize,
            _ => {
                self.stats.rejected_content_lengths += 1;
                tracing::warn!(
                    value = %value.trim(),
                    max = self.max_content_length,
                    "unusable Content-Length, assuming 0"
                );
                0
            }
        };
    }

    fn end_of_headers(&mut self, pos: usize) {
        if self.message_start.is_none() {
            self.line_start = pos + 1;
            self.text = TextState::WaitHeaderCr2;
            self.compact();
            return;
        }
        if self.content_length == 0 {
            self.complete_message(pos);
        } else {
            self.content_remaining = self.content_length;
            self.text = TextState::WaitForContent;
        }
    }

    fn complete_message(&mut self, pos: usize) {
        let Some(start) = self.message_start else {
            return;
        };
        if self.binary == BinaryState::WaitEndOfPacket {
            // Text that happens to sit inside a frame payload.
            self.message_start = None;
            self.line_start = pos + 1;
            self.text = TextState::WaitHeaderCr1;
            return;
        }

        let raw = String::from_utf8_lossy(&self.buf[start..=pos]).into_owned();
        self.stats.messages += 1;
        match RtspResponse::parse(&raw) {
            Ok(response) => {
                tracing::debug!(
                    status = response.status_code,
                    cseq = ?response.cseq(),
                    len = raw.len(),
                    "RTSP response"
                );
                self.control.observe_response(&response);
                self.inbox.push(response);
            }
            Err(e) => tracing::warn!(error = %e, "unparseable RTSP message dropped"),
        }
        self.clear();
    }

    /// Drop bytes that can no longer belong to a message or frame.
    fn compact(&mut self) {
        if self.binary != BinaryState::WaitMagicByte || self.message_start.is_some() {
            return;
        }
        let partial = &self.buf[self.line_start..];
        let n = partial.len().min(STATUS_PREFIX.len());
        let keep_from = if partial[..n] == STATUS_PREFIX[..n] {
            self.line_start
        } else {
            self.buf.len()
        };
        self.buf.drain(..keep_from);
        self.line_start -= keep_from.min(self.line_start);
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.text = TextState::WaitHeaderCr1;
        self.line_start = 0;
        self.message_start = None;
        self.content_length = 0;
        self.content_remaining = 0;
        self.binary = BinaryState::WaitMagicByte;
        self.frame_start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{interleaved, rtp_bytes};
    use rand::RngExt;

    #[test]
    fn interleave_frames_and_rejects_oversized() {
        assert_eq!(interleave(3, &[9, 9]), Some(vec![0x24, 3, 0, 2, 9, 9]));
        assert!(interleave(0, &vec![0; 70_000]).is_none());
    }

    #[derive(Default)]
    struct Collect(Vec<RtpPacket>);

    impl PacketSink for Collect {
        fn on_rtp_packet(&mut self, packet: RtpPacket) {
            self.0.push(packet);
        }
    }

    fn demux(buffer: usize) -> (Demultiplexer<Collect>, ResponseInbox, Arc<DemuxControl>) {
        let inbox = ResponseInbox::new();
        let control = Arc::new(DemuxControl::new());
        let d = Demultiplexer::new(buffer, 1024, inbox.clone(), control.clone(), Collect::default());
        (d, inbox, control)
    }

    fn seqs(d: &Demultiplexer<Collect>) -> Vec<u16> {
        d.sink().0.iter().map(|p| p.sequence).collect()
    }

    /// PLAY response followed by RTP frames in the same stream.
    fn scripted_stream() -> Vec<u8> {
        let mut s = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n".to_vec();
        let sdp = "v=0\r\nm=video 0 RTP/AVP 96\r\n";
        s.extend_from_slice(
            format!(
                "RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: {}\r\n\r\n{}",
                sdp.len(),
                sdp
            )
            .as_bytes(),
        );
        s.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 42\r\n\r\n");
        for seq in 100..110u16 {
            let payload = [0x41, 0x9a, 0x24, 0x00, seq as u8, 0x0d, 0x0a];
            s.extend(interleaved(0, &rtp_bytes(seq, seq as u32 * 3000, true, &payload)));
        }
        s
    }

    fn run_chunked(stream: &[u8], chunks: &mut dyn FnMut() -> usize) -> (Vec<u16>, Vec<u32>) {
        let (mut d, inbox, control) = demux(256 * 1024);
        control.set_payload_type(Some(96));
        control.enable_binary_after(3);
        let mut offset = 0;
        while offset < stream.len() {
            let n = chunks().clamp(1, stream.len() - offset);
            d.feed(&stream[offset..offset + n]);
            offset += n;
        }
        let cseqs = (1..=3).filter_map(|c| inbox.take(c)).filter_map(|r| r.cseq()).collect();
        (seqs(&d), cseqs)
    }

    #[test]
    fn responses_then_frames() {
        let stream = scripted_stream();
        let (packets, cseqs) = run_chunked(&stream, &mut || usize::MAX);
        assert_eq!(cseqs, vec![1, 2, 3]);
        assert_eq!(packets, (100..110).collect::<Vec<_>>());
    }

    #[test]
    fn chunking_does_not_matter() {
        let stream = scripted_stream();
        let expected = run_chunked(&stream, &mut || usize::MAX);
        assert_eq!(run_chunked(&stream, &mut || 1), expected);
        let mut rng = rand::rng();
        for _ in 0..20 {
            let got = run_chunked(&stream, &mut || 1 + (rng.random::<u32>() % 97) as usize);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn response_body_is_delivered() {
        let (mut d, inbox, _) = demux(64 * 1024);
        d.feed(b"RTSP/1.0 200 OK\r\ncontent-LENGTH: 4\r\nCSeq: 7\r\n\r\nabcd");
        let r = inbox.take(7).unwrap();
        assert_eq!(r.body.as_deref(), Some("abcd"));
        assert_eq!(d.buffered(), 0);
        assert_eq!(d.text_state(), TextState::WaitHeaderCr1);
    }

    #[test]
    fn oversized_content_length_treated_as_zero() {
        let (mut d, inbox, _) = demux(4096);
        d.feed(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 999999\r\n\r\n");
        assert!(inbox.take(1).is_some());
        d.feed(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: -5\r\n\r\n");
        assert!(inbox.take(2).is_some());
        assert_eq!(d.stats().rejected_content_lengths, 2);
    }

    #[test]
    fn junk_before_status_line_is_skipped() {
        let (mut d, inbox, _) = demux(4096);
        d.feed(b"garbage\r\n\r\nmore\r\nRTSP/1.0 200 OK\r\nCSeq: 9\r\n\r\n");
        assert_eq!(inbox.take(9).unwrap().status_code, 200);
        assert_eq!(d.stats().messages, 1);
    }

    #[test]
    fn binary_ignored_before_play() {
        let (mut d, _, _) = demux(4096);
        d.feed(&interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0])));
        assert!(d.sink().0.is_empty());
    }

    #[test]
    fn play_response_enables_binary_within_same_chunk() {
        let (mut d, inbox, control) = demux(4096);
        control.enable_binary_after(5);
        let mut chunk = b"RTSP/1.0 200 OK\r\nCSeq: 5\r\nSession: 1\r\n\r\n".to_vec();
        chunk.extend(interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0])));
        d.feed(&chunk);
        assert!(control.binary_enabled());
        assert!(inbox.take(5).is_some());
        assert_eq!(seqs(&d), vec![1]);
    }

    #[test]
    fn failed_play_keeps_binary_off() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary_after(5);
        d.feed(b"RTSP/1.0 454 Session Not Found\r\nCSeq: 5\r\n\r\n");
        assert!(!control.binary_enabled());
    }

    #[test]
    fn corrupted_length_resyncs() {
        let (mut d, _, control) = demux(2048);
        control.enable_binary();
        let mut stream = Vec::new();
        stream.extend(interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0])));
        let mut bad = interleaved(0, &rtp_bytes(2, 0, true, &[0x41, 0]));
        bad[2] = 0xff;
        bad[3] = 0xff;
        stream.extend(bad);
        let mut short = interleaved(0, &rtp_bytes(3, 0, true, &[0x41, 0]));
        short[2] = 0;
        short[3] = 3;
        stream.extend(short);
        for seq in 4..8 {
            stream.extend(interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        d.feed(&stream);
        assert_eq!(seqs(&d), vec![1, 4, 5, 6, 7]);
        assert!(d.stats().resyncs >= 2);
    }

    #[test]
    fn corrupted_length_resyncs_with_default_sizes() {
        let config = crate::ClientConfig::default();
        let inbox = ResponseInbox::new();
        let control = Arc::new(DemuxControl::new());
        let mut d = Demultiplexer::new(
            config.message_buffer_size,
            config.content_length_slack,
            inbox,
            control.clone(),
            Collect::default(),
        )
        .with_max_frame_length(config.max_frame_length);
        control.enable_binary();

        let mut stream = interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0]));
        let mut bad = interleaved(0, &rtp_bytes(2, 0, true, &[0x41, 0]));
        bad[2] = 0xff;
        bad[3] = 0xff;
        stream.extend(bad);
        for seq in 3..20 {
            stream.extend(interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        d.feed(&stream);

        let mut expected = vec![1];
        expected.extend(3..20);
        assert_eq!(seqs(&d), expected);
        assert_eq!(d.binary_state(), BinaryState::WaitMagicByte);
        assert_eq!(d.buffered(), 0);
    }

    #[test]
    fn other_channels_are_skipped() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary();
        control.set_channel(Some(0));
        let mut stream = interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0]));
        stream.extend(interleaved(2, &rtp_bytes(2, 0, true, &[0x41, 0])));
        stream.extend(interleaved(0, &rtp_bytes(3, 0, true, &[0x41, 0])));
        d.feed(&stream);
        assert_eq!(seqs(&d), vec![1, 3]);
        assert_eq!(control.channel(), Some(0));
    }

    #[test]
    fn implausible_packet_inside_fragmented_unit() {
        use crate::media::receiver::{H264Receiver, ParameterSetStore};
        use crate::media::h264::H264NalUnit;
        use crate::test_support::fu_a_payloads;

        let inbox = ResponseInbox::new();
        let control = Arc::new(DemuxControl::new());
        control.enable_binary();
        let units = Arc::new(parking_lot::Mutex::new(Vec::<H264NalUnit>::new()));
        let sink = units.clone();
        let receiver = H264Receiver::new(move |nal: H264NalUnit| sink.lock().push(nal), ParameterSetStore::new());
        let mut d = Demultiplexer::new(4096, 1024, inbox, control, receiver);

        let nal: Vec<u8> = std::iter::once(0x65).chain((0..60u8).map(|i| i ^ 0x5a)).collect();
        let fragments = fu_a_payloads(&nal, 25);
        assert_eq!(fragments.len(), 3);
        d.feed(&interleaved(0, &rtp_bytes(10, 9000, false, &fragments[0])));
        d.feed(&interleaved(0, &rtp_bytes(11, 9000, false, &fragments[1])));
        d.feed(&interleaved(0, &rtp_bytes(500, 9000, false, &[0x41, 0x9a])));
        d.feed(&interleaved(0, &rtp_bytes(12, 9000, true, &fragments[2])));

        assert_eq!(d.stats().implausible_sequences, 1);
        let units = units.lock();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload(), &nal[..]);
        assert_eq!(units[0].data()[..4], [0, 0, 0, 1]);
    }

    #[test]
    fn wrong_version_and_payload_type_rejected() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary();
        control.set_payload_type(Some(96));
        let mut stream = Vec::new();
        let mut v1 = rtp_bytes(1, 0, true, &[0x41, 0]);
        v1[0] = 0x40;
        stream.extend(interleaved(0, &v1));
        let mut pt = rtp_bytes(2, 0, true, &[0x41, 0]);
        pt[1] = 0x80 | 97;
        stream.extend(interleaved(0, &pt));
        stream.extend(interleaved(0, &rtp_bytes(3, 0, true, &[0x41, 0])));
        d.feed(&stream);
        assert_eq!(seqs(&d), vec![3]);
    }

    #[test]
    fn sequence_window() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary();
        for seq in [10u16, 11, 11, 40, 9, 12, 36, 37] {
            d.feed(&interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        // 11 repeated, 40 too far ahead, 9 behind; 36 is 12 + 24
        assert_eq!(seqs(&d), vec![10, 11, 12, 36, 37]);
        assert_eq!(d.stats().implausible_sequences, 3);
    }

    #[test]
    fn sequence_wrap_is_rejected() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary();
        for seq in [65530u16, 3] {
            d.feed(&interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        assert_eq!(seqs(&d), vec![65530]);
    }

    #[test]
    fn window_rebases_after_implausible_run() {
        let (mut d, _, control) = demux(4096);
        control.enable_binary();
        d.feed(&interleaved(0, &rtp_bytes(5000, 0, true, &[0x41, 0])));
        for seq in 1..=(MAX_IMPLAUSIBLE_RUN as u16 + 2) {
            d.feed(&interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        let got = seqs(&d);
        assert_eq!(got[0], 5000);
        assert_eq!(got[1], MAX_IMPLAUSIBLE_RUN as u16 + 1);
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn response_between_frames() {
        let (mut d, inbox, control) = demux(4096);
        control.enable_binary();
        let mut stream = interleaved(0, &rtp_bytes(1, 0, true, &[0x41, 0]));
        stream.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 8\r\n\r\n");
        stream.extend(interleaved(0, &rtp_bytes(2, 0, true, &[0x41, 0])));
        d.feed(&stream);
        assert_eq!(seqs(&d), vec![1, 2]);
        assert!(inbox.take(8).is_some());
    }

    #[test]
    fn text_inside_frame_is_not_a_response() {
        let (mut d, inbox, control) = demux(4096);
        control.enable_binary();
        let mut payload = vec![0x41];
        payload.extend_from_slice(b"\r\nRTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
        d.feed(&interleaved(0, &rtp_bytes(1, 0, true, &payload)));
        assert_eq!(seqs(&d), vec![1]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn overflow_resets() {
        let (mut d, inbox, _) = demux(64);
        d.feed(b"RTSP/1.0 200 OK\r\n");
        d.feed(&[b'x'; 100]);
        assert!(d.stats().overflows >= 1);
        d.feed(b"\r\nRTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n");
        assert!(inbox.take(2).is_some());
    }

    #[test]
    fn idle_garbage_is_compacted() {
        let (mut d, _, control) = demux(1 << 20);
        control.enable_binary();
        d.feed(&vec![0x11; 10_000]);
        assert!(d.buffered() < COMPACT_THRESHOLD);
        assert_eq!(d.stats().overflows, 0);
    }
}
