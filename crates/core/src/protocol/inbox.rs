use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::{Result, RtspError};

use super::RtspResponse;

/// Responses kept before the oldest unclaimed ones are dropped. Keepalive
/// answers are never waited for and would otherwise pile up.
const MAX_PENDING: usize = 32;

/// Hand-off point between the demultiplexer (reading thread) and the client
/// (control thread).
///
/// The reader [`push`](Self::push)es every complete response; the client
/// polls for the one matching its CSeq with [`wait_for`](Self::wait_for).
#[derive(Debug, Clone, Default)]
pub struct ResponseInbox {
    queue: Arc<Mutex<VecDeque<RtspResponse>>>,
}

impl ResponseInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: RtspResponse) {
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_PENDING
            && let Some(old) = queue.pop_front()
        {
            tracing::debug!(cseq = ?old.cseq(), "dropping unclaimed response");
        }
        queue.push_back(response);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Remove and return the response for `cseq`, if it has arrived.
    ///
    /// A response without a CSeq header is taken as the answer to whatever
    /// is being waited for. Responses with a lower CSeq are stale
    /// (fire-and-forget requests) and discarded on the way.
    pub fn take(&self, cseq: u32) -> Option<RtspResponse> {
        let mut queue = self.queue.lock();
        queue.retain(|r| !matches!(r.cseq(), Some(c) if c < cseq));
        let index = queue
            .iter()
            .position(|r| r.cseq().is_none_or(|c| c == cseq))?;
        queue.remove(index)
    }

    /// Poll for the response to `cseq` every `poll_interval` until it arrives.
    ///
    /// Returns `Ok(None)` after `timeout` and [`RtspError::Cancelled`] as soon
    /// as the token fires.
    pub fn wait_for(
        &self,
        cseq: u32,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<RtspResponse>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.take(cseq) {
                return Ok(Some(response));
            }
            if cancel.is_cancelled() {
                return Err(RtspError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(cseq: u32) -> RtspResponse {
        RtspResponse::ok().add_header("CSeq", &cseq.to_string())
    }

    #[test]
    fn matches_cseq_and_drops_stale() {
        let inbox = ResponseInbox::new();
        inbox.push(resp(1));
        inbox.push(resp(3));
        inbox.push(resp(2));
        let got = inbox.take(2).unwrap();
        assert_eq!(got.cseq(), Some(2));
        assert_eq!(inbox.len(), 1);
        assert!(inbox.take(2).is_none());
    }

    #[test]
    fn response_without_cseq_is_accepted() {
        let inbox = ResponseInbox::new();
        inbox.push(RtspResponse::new(500, "Internal Server Error"));
        assert_eq!(inbox.take(7).unwrap().status_code, 500);
    }

    #[test]
    fn wait_times_out() {
        let inbox = ResponseInbox::new();
        let got = inbox
            .wait_for(1, Duration::from_millis(20), Duration::from_millis(1), &CancelToken::new())
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn wait_observes_cancel() {
        let inbox = ResponseInbox::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = inbox
            .wait_for(1, Duration::from_secs(5), Duration::from_millis(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, RtspError::Cancelled));
    }

    #[test]
    fn wait_sees_response_from_other_thread() {
        let inbox = ResponseInbox::new();
        let writer = inbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer.push(resp(4));
        });
        let got = inbox
            .wait_for(4, Duration::from_secs(2), Duration::from_millis(1), &CancelToken::new())
            .unwrap();
        handle.join().unwrap();
        assert_eq!(got.unwrap().cseq(), Some(4));
    }

    #[test]
    fn bounded() {
        let inbox = ResponseInbox::new();
        for i in 0..(MAX_PENDING as u32 + 5) {
            inbox.push(resp(100 + i));
        }
        assert_eq!(inbox.len(), MAX_PENDING);
    }
}
