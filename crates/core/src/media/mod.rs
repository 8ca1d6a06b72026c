//! RTP packet model and H.264 reassembly.
//!
//! Received bytes become [`rtp::RtpPacket`]s in the demultiplexer; the
//! [`depacketizer::H264Depacketizer`] turns those into Annex B
//! [`h264::H264NalUnit`]s, and [`receiver::H264Receiver`] hands them to a
//! [`NalConsumer`] in arrival order.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): identifies the sender.
//! - **Marker bit**: set on the last packet of an access unit (frame).
//!
//! ## H.264 payload structures (RFC 6184)
//!
//! | Type | Structure | Handling |
//! |------|-----------|----------|
//! | 1–23 | Single NAL unit | emitted as is |
//! | 24, 25 | STAP-A, STAP-B | split by 16-bit sizes |
//! | 26, 27 | MTAP16, MTAP24 | split by 16-bit sizes, timestamp offsets applied |
//! | 28 | FU-A | reassembled |
//! | 29 | FU-B | reported, ignored |

pub mod depacketizer;
pub mod h264;
pub mod receiver;
pub mod rtp;

use h264::{H264NalUnit, H264ParameterSets};

/// Connection-level changes reported to a [`NalConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { url: String },
    Disconnected { reason: String },
    /// About to retry after a disconnect or failed handshake.
    Reconnecting { attempt: u32 },
}

/// Receives finalized NAL units in arrival order.
///
/// Called from the stream reading thread; implementations should hand work
/// off quickly (see [`receiver::NalQueue`]).
pub trait NalConsumer: Send {
    fn on_nal_unit(&mut self, nal: H264NalUnit);

    /// The SPS/PPS pair changed (from SDP or in-band).
    fn on_parameter_sets_changed(&mut self, _sets: &H264ParameterSets) {}

    fn on_transport_event(&mut self, _event: &TransportEvent) {}
}

impl<F> NalConsumer for F
where
    F: FnMut(H264NalUnit) + Send,
{
    fn on_nal_unit(&mut self, nal: H264NalUnit) {
        self(nal)
    }
}
