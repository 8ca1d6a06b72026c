use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, RtspError};
use crate::media::TransportEvent;

use super::demux::{Demultiplexer, PacketSink};

/// Default RTSP port (RFC 2326 §3.2).
pub const DEFAULT_PORT: u16 = 554;

/// Host and port of an `rtsp://[user@]host[:port][/path]` URL.
pub fn parse_rtsp_url(url: &str) -> Result<(String, u16)> {
    let invalid = || RtspError::InvalidUri(url.to_string());

    let scheme_len = "rtsp://".len();
    if !url
        .get(..scheme_len)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("rtsp://"))
    {
        return Err(invalid());
    }
    let rest = &url[scheme_len..];
    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    let (host, port) = if let Some(v6) = host_port.strip_prefix('[') {
        let (host, after) = v6.split_once(']').ok_or_else(invalid)?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        (host, port)
    } else {
        match host_port.rsplit_once(':') {
            Some((host, p)) => (host, p.parse().map_err(|_| invalid())?),
            None => (host_port, DEFAULT_PORT),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Open the TCP connection for `url`.
///
/// Tries each resolved address with `connect_timeout`. The stream gets a
/// read timeout so a reading thread can notice cancellation.
pub fn connect(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<TcpStream> {
    let (host, port) = parse_rtsp_url(url)?;
    let mut last_error = None;

    for addr in (host.as_str(), port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(read_timeout))?;
                stream.set_nodelay(true)?;
                tracing::info!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .map(RtspError::Io)
        .unwrap_or_else(|| RtspError::InvalidUri(url.to_string())))
}

/// Feed everything read from `reader` into the demultiplexer until the peer
/// closes, a read fails, or `stop` fires. Returns the reason for exiting.
///
/// Timeouts are expected (the socket has a read timeout) and only serve to
/// check `stop` regularly.
pub fn read_loop<R: Read, P: PacketSink>(
    reader: &mut R,
    demux: &mut Demultiplexer<P>,
    stop: &CancelToken,
    chunk_size: usize,
) -> &'static str {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        if stop.is_cancelled() {
            return "stopped";
        }
        match reader.read(&mut chunk) {
            Ok(0) => return "connection closed by server",
            Ok(n) => demux.feed(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                if !stop.is_cancelled() {
                    tracing::warn!(error = %e, "read error");
                }
                return "read error";
            }
        }
    }
}

/// A reading thread that owns a [`Demultiplexer`] until it exits.
pub struct ReaderHandle<P> {
    handle: JoinHandle<Demultiplexer<P>>,
}

impl<P: PacketSink + 'static> ReaderHandle<P> {
    /// Run [`read_loop`] on its own thread. When the loop ends the sink is
    /// told [`TransportEvent::Disconnected`].
    pub fn spawn<R: Read + Send + 'static>(
        mut reader: R,
        mut demux: Demultiplexer<P>,
        stop: CancelToken,
        chunk_size: usize,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("rtsp-reader".to_string())
            .spawn(move || {
                let reason = read_loop(&mut reader, &mut demux, &stop, chunk_size);
                let stats = demux.stats();
                tracing::info!(
                    reason,
                    bytes = stats.bytes,
                    packets = stats.packets,
                    messages = stats.messages,
                    resyncs = stats.resyncs,
                    "reader exited"
                );
                demux.sink_mut().on_transport_event(TransportEvent::Disconnected {
                    reason: reason.to_string(),
                });
                demux
            })?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread and take the demultiplexer back.
    pub fn join(self) -> Result<Demultiplexer<P>> {
        self.handle
            .join()
            .map_err(|_| RtspError::Io(std::io::Error::other("reader thread panicked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::protocol::ResponseInbox;
    use crate::test_support::{interleaved, rtp_bytes};
    use crate::transport::demux::DemuxControl;
    use std::io::Cursor;
    use std::sync::Arc;

    #[derive(Default)]
    struct Sink {
        packets: usize,
        events: Vec<TransportEvent>,
    }

    impl PacketSink for Sink {
        fn on_rtp_packet(&mut self, _packet: RtpPacket) {
            self.packets += 1;
        }
        fn on_transport_event(&mut self, event: TransportEvent) {
            self.events.push(event);
        }
    }

    #[test]
    fn url_parsing() {
        assert_eq!(
            parse_rtsp_url("rtsp://192.168.1.10/stream").unwrap(),
            ("192.168.1.10".to_string(), 554)
        );
        assert_eq!(
            parse_rtsp_url("RTSP://admin:pw@cam.local:8554/live?x=1").unwrap(),
            ("cam.local".to_string(), 8554)
        );
        assert_eq!(
            parse_rtsp_url("rtsp://[::1]:9000/a").unwrap(),
            ("::1".to_string(), 9000)
        );
        assert!(parse_rtsp_url("http://cam/stream").is_err());
        assert!(parse_rtsp_url("rtsp:///stream").is_err());
        assert!(parse_rtsp_url("rtsp://cam:notaport/").is_err());
    }

    #[test]
    fn multibyte_scheme_is_rejected() {
        assert!(parse_rtsp_url("rtsp:/é").is_err());
        assert!(parse_rtsp_url("rtsp:/éé/x").is_err());
        assert!(parse_rtsp_url("ünïcode").is_err());
    }

    #[test]
    fn reader_thread_drains_and_reports() {
        let control = Arc::new(DemuxControl::new());
        control.enable_binary();
        let demux = Demultiplexer::new(4096, 1024, ResponseInbox::new(), control, Sink::default());
        let mut bytes = Vec::new();
        for seq in 1..=3 {
            bytes.extend(interleaved(0, &rtp_bytes(seq, 0, true, &[0x41, 0])));
        }
        let reader = ReaderHandle::spawn(Cursor::new(bytes), demux, CancelToken::new(), 7).unwrap();
        let demux = reader.join().unwrap();
        let sink = demux.into_sink();
        assert_eq!(sink.packets, 3);
        assert_eq!(
            sink.events,
            vec![TransportEvent::Disconnected {
                reason: "connection closed by server".into()
            }]
        );
    }
}
