//! Client-side RTSP session state (RFC 2326 §3, §12.37).
//!
//! Tracks what the client has learned from the server and what it must echo
//! back:
//!
//! - The CSeq counter, one per request, starting at 1.
//! - The session id returned by SETUP. Once known it is sticky and sent on
//!   every later request.
//! - The session timeout, which drives keepalives.
//! - Methods advertised by OPTIONS, tracks from DESCRIBE, the negotiated
//!   transport from SETUP.
//!
//! ## Session lifecycle (RFC 2326 §A.2)
//!
//! ```text
//! (connect)     -> Init
//! SETUP         -> Ready
//! PLAY          -> Playing
//! TEARDOWN      -> Closed
//! ```

pub mod transport;

use std::time::Duration;

use crate::protocol::{RtspResponse, TrackInfo};
pub use transport::TransportHeader;

/// Session timeout assumed when the server does not state one (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
    Closed,
}

#[derive(Debug)]
pub struct RtspSession {
    next_cseq: u32,
    session_id: Option<String>,
    timeout_secs: u64,
    state: SessionState,
    capabilities: Vec<String>,
    content_base: Option<String>,
    tracks: Vec<TrackInfo>,
    transport: Option<TransportHeader>,
}

impl Default for RtspSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RtspSession {
    pub fn new() -> Self {
        RtspSession {
            next_cseq: 1,
            session_id: None,
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            state: SessionState::Init,
            capabilities: Vec::new(),
            content_base: None,
            tracks: Vec::new(),
            transport: None,
        }
    }

    /// Allocate the CSeq for the next request.
    pub fn next_cseq(&mut self) -> u32 {
        let cseq = self.next_cseq;
        self.next_cseq = self.next_cseq.wrapping_add(1).max(1);
        cseq
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Pick up the session id and timeout from a response. The first id seen
    /// is kept; a different id later is logged and ignored.
    pub fn observe_response(&mut self, response: &RtspResponse) {
        let Some((id, timeout)) = response.session() else {
            return;
        };
        match &self.session_id {
            None => {
                tracing::debug!(session_id = %id, ?timeout, "session established");
                self.session_id = Some(id);
            }
            Some(current) if *current != id => {
                tracing::warn!(current = %current, received = %id, "server changed session id, ignoring");
            }
            Some(_) => {}
        }
        if let Some(secs) = timeout.filter(|s| *s > 0) {
            self.timeout_secs = secs;
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(old_state = ?self.state, new_state = ?state, "state transition");
        self.state = state;
    }

    pub fn set_capabilities(&mut self, methods: Vec<String>) {
        self.capabilities = methods;
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Whether OPTIONS listed `method`. An empty list means the server did
    /// not say, which counts as supported.
    pub fn supports(&self, method: &str) -> bool {
        self.capabilities.is_empty()
            || self
                .capabilities
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn set_content_base(&mut self, base: Option<String>) {
        self.content_base = base;
    }

    pub fn content_base(&self) -> Option<&str> {
        self.content_base.as_deref()
    }

    pub fn set_tracks(&mut self, tracks: Vec<TrackInfo>) {
        self.tracks = tracks;
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn set_transport(&mut self, transport: TransportHeader) {
        tracing::debug!(transport = %transport.to_header_value(), "transport configured");
        self.transport = Some(transport);
    }

    pub fn transport(&self) -> Option<&TransportHeader> {
        self.transport.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cseq_increments_from_one() {
        let mut s = RtspSession::new();
        assert_eq!(s.next_cseq(), 1);
        assert_eq!(s.next_cseq(), 2);
        assert_eq!(s.next_cseq(), 3);
    }

    #[test]
    fn session_id_is_sticky() {
        let mut s = RtspSession::new();
        s.observe_response(&RtspResponse::ok());
        assert!(s.session_id().is_none());

        s.observe_response(&RtspResponse::ok().add_header("Session", "abc;timeout=30"));
        assert_eq!(s.session_id(), Some("abc"));
        assert_eq!(s.timeout(), Duration::from_secs(30));

        s.observe_response(&RtspResponse::ok().add_header("Session", "other"));
        assert_eq!(s.session_id(), Some("abc"));
    }

    #[test]
    fn capabilities() {
        let mut s = RtspSession::new();
        assert!(s.supports("GET_PARAMETER"));
        s.set_capabilities(vec!["OPTIONS".into(), "PLAY".into()]);
        assert!(s.supports("play"));
        assert!(!s.supports("GET_PARAMETER"));
    }
}
