/// Transport parameters from an RTSP `Transport` header (RFC 2326 §12.39).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=1A2B3C4D;mode="PLAY"
/// ```
///
/// With interleaved transport, RTP arrives on the TCP connection framed as
/// `$ <channel> <length>` with the RTP channel first in the pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// `RTP/AVP`, `RTP/AVP/TCP`, ...
    pub protocol: String,
    pub unicast: bool,
    /// Interleaved (RTP, RTCP) channel pair.
    pub interleaved: Option<(u8, u8)>,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub ssrc: Option<u32>,
}

impl TransportHeader {
    /// Interleaved request for the track at `track_index`: channels
    /// `2k` and `2k+1`.
    pub fn interleaved(track_index: usize) -> Self {
        let rtp = (track_index * 2) as u8;
        TransportHeader {
            protocol: "RTP/AVP/TCP".to_string(),
            unicast: true,
            interleaved: Some((rtp, rtp.wrapping_add(1))),
            ..Default::default()
        }
    }

    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Only the first transport spec of a comma-separated list is read.
    /// Returns `None` when there is no protocol field.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th.interleaved, Some((2, 3)));
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_port, Some((8000, 8001)));
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.split(',').next()?;
        let mut parts = spec.split(';').map(str::trim);
        let protocol = parts.next().filter(|p| !p.is_empty())?;

        let mut th = TransportHeader {
            protocol: protocol.to_string(),
            ..Default::default()
        };

        for part in parts {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            match key.to_ascii_lowercase().as_str() {
                "unicast" => th.unicast = true,
                "interleaved" => th.interleaved = parse_pair(value),
                "client_port" => th.client_port = parse_pair(value),
                "server_port" => th.server_port = parse_pair(value),
                "ssrc" => th.ssrc = u32::from_str_radix(value.trim(), 16).ok(),
                _ => {}
            }
        }
        Some(th)
    }

    /// Serialize for a SETUP request.
    pub fn to_header_value(&self) -> String {
        let mut out = self.protocol.clone();
        if self.unicast {
            out.push_str(";unicast");
        }
        if let Some((a, b)) = self.interleaved {
            out.push_str(&format!(";interleaved={a}-{b}"));
        }
        if let Some((a, b)) = self.client_port {
            out.push_str(&format!(";client_port={a}-{b}"));
        }
        out
    }

    pub fn rtp_channel(&self) -> Option<u8> {
        self.interleaved.map(|(rtp, _)| rtp)
    }
}

/// `a-b` or a lone `a` (second value then `a + 1`).
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + std::ops::Add<Output = T> + From<u8>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            Some((a, a + T::from(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_server_reply() {
        let th = TransportHeader::parse(
            "RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=1A2B3C4D;mode=\"PLAY\"",
        )
        .unwrap();
        assert_eq!(th.protocol, "RTP/AVP/TCP");
        assert!(th.unicast);
        assert_eq!(th.interleaved, Some((0, 1)));
        assert_eq!(th.rtp_channel(), Some(0));
        assert_eq!(th.ssrc, Some(0x1A2B3C4D));
    }

    #[test]
    fn single_channel_implies_pair() {
        let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=4").unwrap();
        assert_eq!(th.interleaved, Some((4, 5)));
    }

    #[test]
    fn server_ports() {
        let th =
            TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001;server_port=6970-6971")
                .unwrap();
        assert_eq!(th.client_port, Some((5000, 5001)));
        assert_eq!(th.server_port, Some((6970, 6971)));
        assert!(th.interleaved.is_none());
    }

    #[test]
    fn request_value_for_track() {
        assert_eq!(
            TransportHeader::interleaved(1).to_header_value(),
            "RTP/AVP/TCP;unicast;interleaved=2-3"
        );
    }

    #[test]
    fn empty_header() {
        assert!(TransportHeader::parse("").is_none());
    }
}
