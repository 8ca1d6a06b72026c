//! RTSP protocol messages (RFC 2326), client side.
//!
//! This module handles the text-based RTSP signaling protocol: building
//! requests, parsing responses, matching them up by CSeq and reading the SDP
//! returned by DESCRIBE.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://camera/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Responses arrive on the same TCP connection as interleaved media once
//! PLAY succeeds, so they are cut out of the byte stream by
//! [`crate::transport::demux`] and delivered through a [`ResponseInbox`].
//!
//! ## Methods used
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate interleaved transport |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod inbox;
pub mod request;
pub mod response;
pub mod sdp;

pub use inbox::ResponseInbox;
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use sdp::{SessionDescription, TrackInfo};
