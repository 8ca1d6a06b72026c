//! RTSP client: handshake, keepalive and the reconnecting receive loop.
//!
//! ```text
//! OPTIONS  → capabilities
//! DESCRIBE → SDP, payload type, sprop-parameter-sets
//! SETUP    → interleaved channels, session id
//! PLAY     → binary demultiplexing on, media flows
//! ```
//!
//! [`RtspClient`] writes requests and waits for responses that the reading
//! thread drops into a [`ResponseInbox`]. [`StreamReceiver`] owns the whole
//! lifecycle: connect, handshake, receive until the connection drops or the
//! token fires, then retry.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Result, RtspError};
use crate::media::h264::{H264NalUnit, H264ParameterSets};
use crate::media::receiver::{H264Receiver, NalQueue, ParameterSetStore};
use crate::media::{NalConsumer, TransportEvent};
use crate::protocol::request::{DESCRIBE, GET_PARAMETER, OPTIONS, PLAY, SETUP, TEARDOWN};
use crate::protocol::{ResponseInbox, RtspRequest, RtspResponse, SessionDescription, TrackInfo};
use crate::session::{RtspSession, SessionState, TransportHeader};
use crate::transport::demux::{DEFAULT_MAX_FRAME_LENGTH, DemuxControl, Demultiplexer, PacketSink};
use crate::transport::tcp::{self, ReaderHandle};

/// How often the receive loop checks for cancellation, a dead reader and
/// keepalive deadlines.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(20);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Connect timeout and per-request response timeout.
    pub response_timeout: Duration,
    /// Sleep between checks of the response inbox.
    pub poll_interval: Duration,
    pub read_chunk_size: usize,
    /// Socket read timeout; bounds how long the reader takes to notice a stop.
    pub read_timeout: Duration,
    /// Largest RTSP message or RTP frame the demultiplexer will hold.
    pub message_buffer_size: usize,
    /// `Content-Length` above `message_buffer_size - content_length_slack`
    /// is treated as 0.
    pub content_length_slack: usize,
    /// Interleaved frames declaring a longer RTP packet are treated as
    /// corrupt.
    pub max_frame_length: usize,
    /// Capacity of the queue built by [`StreamReceiver::nal_queue`].
    pub nal_queue_capacity: usize,
    /// Upper bound between keepalives; also capped at half the session
    /// timeout. `None` disables keepalives.
    pub keepalive_interval: Option<Duration>,
    pub reconnect_delay: Duration,
    /// `None` retries forever; `Some(0)` never retries.
    pub max_reconnects: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rtsp-ingest/{}", env!("CARGO_PKG_VERSION")),
            response_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
            read_chunk_size: 4096,
            read_timeout: Duration::from_millis(100),
            message_buffer_size: 256 * 1024,
            content_length_slack: 1024,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            nal_queue_capacity: 256,
            keepalive_interval: Some(Duration::from_secs(25)),
            reconnect_delay: Duration::from_secs(2),
            max_reconnects: Some(5),
        }
    }
}

/// Request/response half of an RTSP session.
///
/// Generic over the writer so tests can drive it with an in-memory buffer;
/// responses must be pushed into the inbox by someone else (normally the
/// reading thread's demultiplexer).
pub struct RtspClient<W> {
    url: String,
    writer: W,
    session: RtspSession,
    inbox: ResponseInbox,
    control: Arc<DemuxControl>,
    parameter_sets: ParameterSetStore,
    config: ClientConfig,
    cancel: CancelToken,
    aggregate_control: Option<String>,
    video_track: Option<usize>,
    last_request: Instant,
}

impl<W: Write> RtspClient<W> {
    pub fn new(
        url: &str,
        writer: W,
        inbox: ResponseInbox,
        control: Arc<DemuxControl>,
        parameter_sets: ParameterSetStore,
        config: ClientConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            url: url.to_string(),
            writer,
            session: RtspSession::new(),
            inbox,
            control,
            parameter_sets,
            config,
            cancel,
            aggregate_control: None,
            video_track: None,
            last_request: Instant::now(),
        }
    }

    pub fn session(&self) -> &RtspSession {
        &self.session
    }

    pub fn parameter_sets(&self) -> H264ParameterSets {
        self.parameter_sets.get()
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn base_url(&self) -> &str {
        self.session.content_base().unwrap_or(&self.url)
    }

    fn send(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> Result<u32> {
        let cseq = self.session.next_cseq();
        if method == PLAY {
            self.control.enable_binary_after(cseq);
        }

        let mut request = RtspRequest::new(method, uri)
            .add_header("CSeq", &cseq.to_string())
            .add_header("User-Agent", &self.config.user_agent);
        for (name, value) in headers {
            request = request.add_header(name, value);
        }
        if let Some(id) = self.session.session_id() {
            request = request.add_header("Session", id);
        }

        tracing::debug!(method, uri, cseq, "request");
        self.writer.write_all(request.serialize().as_bytes())?;
        self.writer.flush()?;
        self.last_request = Instant::now();
        Ok(cseq)
    }

    fn exchange(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> Result<RtspResponse> {
        let cseq = self.send(method, uri, headers)?;
        let response = self
            .inbox
            .wait_for(
                cseq,
                self.config.response_timeout,
                self.config.poll_interval,
                &self.cancel,
            )?
            .ok_or_else(|| RtspError::NoResponse {
                method: method.to_string(),
                cseq,
            })?;

        tracing::debug!(method, cseq, status = response.status_code, "response");
        self.session.observe_response(&response);
        if !response.is_success() {
            return Err(RtspError::UnexpectedStatus {
                method: method.to_string(),
                code: response.status_code,
                reason: response.status_text.clone(),
            });
        }
        Ok(response)
    }

    /// OPTIONS: record the methods the server advertises.
    pub fn options(&mut self) -> Result<&[String]> {
        let url = self.url.clone();
        let response = self.exchange(OPTIONS, &url, &[])?;
        self.session.set_capabilities(response.public_methods());
        Ok(self.session.capabilities())
    }

    /// DESCRIBE: read the SDP, remember the tracks and pick the H.264 video
    /// track. Its payload type filters the demultiplexer and its
    /// `sprop-parameter-sets` seed the parameter-set store.
    pub fn describe(&mut self) -> Result<&[TrackInfo]> {
        let url = self.url.clone();
        let response = self.exchange(DESCRIBE, &url, &[("Accept", "application/sdp")])?;

        let base = response
            .get_header("Content-Base")
            .or_else(|| response.get_header("Content-Location"))
            .map(str::to_string);
        self.session.set_content_base(base);

        let sdp = SessionDescription::parse(response.body.as_deref().unwrap_or_default());
        self.aggregate_control = sdp.control.clone();
        self.video_track = sdp.h264_track().map(|(index, _)| index);

        if let Some((index, track)) = sdp.h264_track() {
            tracing::info!(
                track = index,
                payload_type = ?track.payload_type,
                packetization_mode = ?track.packetization_mode(),
                "H.264 track found"
            );
            self.control.set_payload_type(track.payload_type);
            if let Some(sprop) = track.sprop_parameter_sets() {
                match H264ParameterSets::parse_sprop_parameter_sets(sprop) {
                    Ok(sets) => self.parameter_sets.replace(sets),
                    Err(e) => tracing::warn!(error = %e, "ignoring sprop-parameter-sets"),
                }
            }
        }

        self.session.set_tracks(sdp.tracks);
        Ok(self.session.tracks())
    }

    /// SETUP the track at `track_index` with interleaved TCP transport.
    pub fn setup(&mut self, track_index: usize) -> Result<TransportHeader> {
        let track = self
            .session
            .tracks()
            .get(track_index)
            .cloned()
            .ok_or(RtspError::NoVideoTrack)?;
        let uri = track.control_url(self.base_url());
        let requested = TransportHeader::interleaved(track_index);

        let response = self.exchange(SETUP, &uri, &[("Transport", &requested.to_header_value())])?;

        let transport = response
            .get_header("Transport")
            .and_then(TransportHeader::parse)
            .unwrap_or(requested);
        if self.session.session_id().is_none() {
            tracing::warn!("SETUP response carried no session id");
        }
        self.control.set_channel(transport.rtp_channel());
        self.session.set_transport(transport.clone());
        self.session.set_state(SessionState::Ready);
        Ok(transport)
    }

    pub fn setup_video(&mut self) -> Result<TransportHeader> {
        let index = self.video_track.ok_or(RtspError::NoVideoTrack)?;
        self.setup(index)
    }

    /// PLAY the aggregate session. Interleaved RTP may follow the response
    /// immediately; the demultiplexer switches to binary parsing when it
    /// reads the 200.
    pub fn play(&mut self) -> Result<()> {
        let uri = match self.aggregate_control.as_deref() {
            Some(control) if control.to_ascii_lowercase().starts_with("rtsp://") => {
                control.to_string()
            }
            _ => self.base_url().to_string(),
        };
        self.exchange(PLAY, &uri, &[("Range", "npt=0.000-")])?;
        self.control.enable_binary();
        self.session.set_state(SessionState::Playing);
        Ok(())
    }

    /// OPTIONS, DESCRIBE, SETUP of the video track, PLAY. A failed OPTIONS is
    /// tolerated; some cameras reject it.
    pub fn handshake(&mut self) -> Result<()> {
        match self.options() {
            Ok(_) => {}
            Err(RtspError::UnexpectedStatus { code, .. }) => {
                tracing::warn!(code, "OPTIONS rejected, continuing");
            }
            Err(e) => return Err(e),
        }
        self.describe()?;
        self.setup_video()?;
        self.play()?;
        tracing::info!(
            session_id = ?self.session.session_id(),
            timeout_secs = self.session.timeout().as_secs(),
            "stream playing"
        );
        Ok(())
    }

    /// Whether a keepalive should be sent now.
    pub fn keep_alive_due(&self) -> bool {
        let Some(interval) = self.config.keepalive_interval else {
            return false;
        };
        let interval = interval.min(self.session.timeout() / 2);
        self.session.state() == SessionState::Playing && self.last_request.elapsed() >= interval
    }

    /// Send GET_PARAMETER (or OPTIONS if the server did not list
    /// GET_PARAMETER). The answer is not waited for.
    pub fn keep_alive(&mut self) -> Result<()> {
        let method = if self.session.supports(GET_PARAMETER) {
            GET_PARAMETER
        } else {
            OPTIONS
        };
        let uri = self.base_url().to_string();
        self.send(method, &uri, &[])?;
        Ok(())
    }

    /// Send TEARDOWN without waiting for the answer.
    pub fn teardown(&mut self) -> Result<()> {
        if self.session.session_id().is_none() || self.session.state() == SessionState::Closed {
            return Ok(());
        }
        let uri = self.base_url().to_string();
        self.send(TEARDOWN, &uri, &[])?;
        self.session.set_state(SessionState::Closed);
        Ok(())
    }
}

enum SessionEnd {
    Cancelled,
    Disconnected,
}

/// Receives an H.264 stream and keeps it running across disconnects.
///
/// ```no_run
/// use rtsp::{ClientConfig, StreamReceiver};
///
/// let receiver = StreamReceiver::new("rtsp://192.168.1.10/stream", ClientConfig::default());
/// let cancel = receiver.cancel_token();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(10));
///     cancel.cancel();
/// });
/// receiver
///     .run(|nal: rtsp::H264NalUnit| println!("NAL type {}", nal.nal_type()))
///     .unwrap();
/// ```
pub struct StreamReceiver {
    url: String,
    config: ClientConfig,
    cancel: CancelToken,
}

impl StreamReceiver {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            url: url.into(),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use an existing token instead of the receiver's own.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A decoder queue of `nal_queue_capacity` units that stops waiting for
    /// space once this receiver is cancelled. Pass the queue to
    /// [`run`](Self::run) and the receiver to a decode stage.
    pub fn nal_queue(&self) -> (NalQueue, crossbeam_channel::Receiver<H264NalUnit>) {
        NalQueue::bounded(self.config.nal_queue_capacity, self.cancel.clone())
    }

    /// Connect, play and deliver NAL units to `consumer` until the token is
    /// cancelled. Returns the consumer on cancellation, or the last error
    /// once `max_reconnects` consecutive attempts have failed.
    pub fn run<C: NalConsumer + 'static>(&self, consumer: C) -> Result<C> {
        let mut consumer = consumer;
        let mut attempt = 0u32;

        loop {
            let (returned, outcome) = self.stream_once(consumer);
            let Some(returned) = returned else {
                return Err(match outcome {
                    Err(e) => e,
                    Ok(_) => RtspError::Io(io::Error::other("stream reader lost")),
                });
            };
            consumer = returned;

            let failure = match outcome {
                Ok(SessionEnd::Cancelled) | Err(RtspError::Cancelled) => return Ok(consumer),
                Ok(SessionEnd::Disconnected) => {
                    attempt = 0;
                    RtspError::Io(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "connection lost",
                    ))
                }
                Err(e) => e,
            };
            if self.cancel.is_cancelled() {
                return Ok(consumer);
            }

            attempt += 1;
            if self.config.max_reconnects.is_some_and(|max| attempt > max) {
                tracing::error!(attempts = attempt - 1, error = %failure, "giving up");
                return Err(failure);
            }
            tracing::warn!(attempt, error = %failure, delay = ?self.config.reconnect_delay, "reconnecting");
            consumer.on_transport_event(&TransportEvent::Reconnecting { attempt });
            if !self.pause(self.config.reconnect_delay) {
                return Ok(consumer);
            }
        }
    }

    /// One connection, start to finish. The consumer comes back unless the
    /// reading thread could not be started or panicked.
    fn stream_once<C: NalConsumer + 'static>(&self, consumer: C) -> (Option<C>, Result<SessionEnd>) {
        let stream = match tcp::connect(&self.url, self.config.response_timeout, self.config.read_timeout)
            .and_then(|s| Ok((s.try_clone()?, s)))
        {
            Ok(pair) => pair,
            Err(e) => return (Some(consumer), Err(e)),
        };
        let (reader, writer) = stream;

        let inbox = ResponseInbox::new();
        let control = Arc::new(DemuxControl::new());
        let parameter_sets = ParameterSetStore::new();
        let stop = CancelToken::new();

        let mut receiver = H264Receiver::new(consumer, parameter_sets.clone());
        receiver.on_transport_event(TransportEvent::Connected {
            url: self.url.clone(),
        });
        let demux = Demultiplexer::new(
            self.config.message_buffer_size,
            self.config.content_length_slack,
            inbox.clone(),
            control.clone(),
            receiver,
        )
        .with_max_frame_length(self.config.max_frame_length);
        let reader = match ReaderHandle::spawn(reader, demux, stop.clone(), self.config.read_chunk_size) {
            Ok(handle) => handle,
            Err(e) => return (None, Err(e)),
        };

        let mut client = RtspClient::new(
            &self.url,
            writer,
            inbox,
            control,
            parameter_sets,
            self.config.clone(),
            self.cancel.clone(),
        );
        let outcome = client.handshake().map(|()| self.supervise(&mut client, &reader));

        if self.cancel.is_cancelled()
            && let Err(e) = client.teardown()
        {
            tracing::debug!(error = %e, "TEARDOWN not sent");
        }
        stop.cancel();
        shutdown(&client.into_writer());

        match reader.join() {
            Ok(demux) => (Some(demux.into_sink().into_consumer()), outcome),
            Err(e) => (None, Err(e)),
        }
    }

    fn supervise(&self, client: &mut RtspClient<TcpStream>, reader: &ReaderHandle<impl PacketSink + 'static>) -> SessionEnd {
        loop {
            if self.cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            if reader.is_finished() {
                return SessionEnd::Disconnected;
            }
            if client.keep_alive_due()
                && let Err(e) = client.keep_alive()
            {
                tracing::warn!(error = %e, "keepalive failed");
                return SessionEnd::Disconnected;
            }
            thread::sleep(SUPERVISE_INTERVAL);
        }
    }

    /// Sleep for `delay` unless cancelled first. Returns false on cancel.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return false;
            }
            thread::sleep(SUPERVISE_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.cancel.is_cancelled()
    }
}

fn shutdown(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        tracing::trace!(error = %e, "socket shutdown");
    }
}
