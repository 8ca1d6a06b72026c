//! Network transport for an RTSP-over-TCP camera session.
//!
//! Signaling and media share one TCP connection (RFC 2326 §10.12):
//!
//! - [`tcp`]: connects, then runs a reading thread that pushes every received
//!   chunk into the demultiplexer.
//! - [`demux`]: splits the byte stream into RTSP responses (to the client's
//!   inbox) and `$`-framed RTP packets (to a [`PacketSink`]).
//!
//! The control thread only ever writes to the socket; the reading thread
//! only ever reads.

pub mod demux;
pub mod tcp;

pub use demux::{DemuxControl, DemuxStats, Demultiplexer, PacketSink, interleave};
pub use tcp::ReaderHandle;
