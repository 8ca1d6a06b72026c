//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Reads the body of a DESCRIBE response. Only the lines needed to set up an
//! H.264 stream are interpreted:
//!
//! ```text
//! v=0
//! o=- 1 1 IN IP4 192.168.1.10
//! s=Camera
//! a=control:*                                   ← session control URL
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;profile-level-id=42c01f;sprop-parameter-sets=Z0LAH9oBQBY=,aM48gA==
//! a=framerate:25
//! a=control:track1                              ← track control URL
//! ```
//!
//! Everything else is ignored.

/// One `m=` section of a session description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackInfo {
    /// `video`, `audio`, `application`, ...
    pub media: String,
    pub port: u16,
    /// Transport protocol from the `m=` line, e.g. `RTP/AVP`.
    pub protocol: String,
    /// First payload type listed on the `m=` line.
    pub payload_type: Option<u8>,
    /// Encoding name from `a=rtpmap`, e.g. `H264`.
    pub encoding: Option<String>,
    pub clock_rate: Option<u32>,
    pub frame_rate: Option<f64>,
    /// Raw `a=control` value; may be absolute or relative.
    pub control: Option<String>,
    /// Raw `a=fmtp` parameters (everything after the payload type).
    pub fmtp: Option<String>,
}

impl TrackInfo {
    pub fn is_video(&self) -> bool {
        self.media.eq_ignore_ascii_case("video")
    }

    pub fn is_h264(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("H264"))
    }

    /// Look up one `key=value` parameter of the `a=fmtp` line.
    pub fn fmtp_parameter(&self, key: &str) -> Option<&str> {
        self.fmtp.as_deref()?.split(';').find_map(|p| {
            let (k, v) = p.trim().split_once('=')?;
            k.trim().eq_ignore_ascii_case(key).then_some(v.trim())
        })
    }

    pub fn sprop_parameter_sets(&self) -> Option<&str> {
        self.fmtp_parameter("sprop-parameter-sets")
    }

    pub fn packetization_mode(&self) -> Option<u8> {
        self.fmtp_parameter("packetization-mode")?.parse().ok()
    }

    /// Resolve this track's control attribute against the base URL.
    ///
    /// An absolute `rtsp://` control is returned as is; `*` or a missing
    /// control means the base itself; anything else is appended to the base
    /// with exactly one `/` in between.
    pub fn control_url(&self, base: &str) -> String {
        match self.control.as_deref() {
            None | Some("*") | Some("") => base.to_string(),
            Some(c) if c.to_ascii_lowercase().starts_with("rtsp://") => c.to_string(),
            Some(c) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                c.trim_start_matches('/')
            ),
        }
    }
}

/// A parsed session description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescription {
    pub name: Option<String>,
    /// Session-level `a=control`.
    pub control: Option<String>,
    pub tracks: Vec<TrackInfo>,
}

impl SessionDescription {
    /// Parse an SDP body. Unknown or malformed lines are skipped, so this
    /// never fails; a body without `m=` lines yields no tracks.
    pub fn parse(body: &str) -> Self {
        let mut sdp = SessionDescription::default();

        for line in body.lines().map(str::trim) {
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };
            match kind {
                "s" => sdp.name = Some(value.to_string()),
                "m" => sdp.tracks.push(parse_media_line(value)),
                "a" => {
                    let (name, attr) = value.split_once(':').unwrap_or((value, ""));
                    match sdp.tracks.last_mut() {
                        Some(track) => apply_media_attribute(track, name, attr),
                        None if name == "control" => sdp.control = Some(attr.to_string()),
                        None => {}
                    }
                }
                _ => {}
            }
        }

        tracing::debug!(tracks = sdp.tracks.len(), "session description parsed");
        sdp
    }

    /// The first H.264 video track.
    pub fn h264_track(&self) -> Option<(usize, &TrackInfo)> {
        self.tracks
            .iter()
            .enumerate()
            .find(|(_, t)| t.is_video() && t.is_h264())
    }
}

fn parse_media_line(value: &str) -> TrackInfo {
    let mut fields = value.split_whitespace();
    TrackInfo {
        media: fields.next().unwrap_or_default().to_string(),
        port: fields.next().and_then(|p| p.parse().ok()).unwrap_or(0),
        protocol: fields.next().unwrap_or_default().to_string(),
        payload_type: fields.next().and_then(|p| p.parse().ok()),
        ..TrackInfo::default()
    }
}

fn apply_media_attribute(track: &mut TrackInfo, name: &str, attr: &str) {
    match name {
        "control" => track.control = Some(attr.to_string()),
        "framerate" => track.frame_rate = attr.trim().parse().ok(),
        "rtpmap" => {
            // a=rtpmap:<pt> <encoding>/<clock>[/<params>]
            let Some((pt, encoding)) = attr.split_once(' ') else {
                return;
            };
            if pt.parse::<u8>().ok() != track.payload_type {
                return;
            }
            let mut parts = encoding.trim().split('/');
            track.encoding = parts.next().map(str::to_string);
            track.clock_rate = parts.next().and_then(|c| c.parse().ok());
        }
        "fmtp" => {
            if let Some((pt, params)) = attr.split_once(' ')
                && pt.parse::<u8>().ok() == track.payload_type
            {
                track.fmtp = Some(params.trim().to_string());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 192.168.1.10\r\n\
        s=Camera\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1;profile-level-id=42c01f;sprop-parameter-sets=Z0LAH9oBQBY=,aM48gA==\r\n\
        a=framerate:25\r\n\
        a=control:track1\r\n\
        m=audio 0 RTP/AVP 0\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=control:track2\r\n";

    #[test]
    fn parses_camera_description() {
        let sdp = SessionDescription::parse(CAMERA_SDP);
        assert_eq!(sdp.name.as_deref(), Some("Camera"));
        assert_eq!(sdp.control.as_deref(), Some("*"));
        assert_eq!(sdp.tracks.len(), 2);

        let (index, video) = sdp.h264_track().unwrap();
        assert_eq!(index, 0);
        assert_eq!(video.payload_type, Some(96));
        assert_eq!(video.clock_rate, Some(90000));
        assert_eq!(video.frame_rate, Some(25.0));
        assert_eq!(video.packetization_mode(), Some(1));
        assert_eq!(video.sprop_parameter_sets(), Some("Z0LAH9oBQBY=,aM48gA=="));
        assert_eq!(video.fmtp_parameter("PROFILE-LEVEL-ID"), Some("42c01f"));

        let audio = &sdp.tracks[1];
        assert!(!audio.is_h264());
        assert_eq!(audio.encoding.as_deref(), Some("PCMU"));
    }

    #[test]
    fn control_url_resolution() {
        let mut t = TrackInfo::default();
        assert_eq!(t.control_url("rtsp://cam/live"), "rtsp://cam/live");
        t.control = Some("track1".into());
        assert_eq!(t.control_url("rtsp://cam/live/"), "rtsp://cam/live/track1");
        t.control = Some("/track1".into());
        assert_eq!(t.control_url("rtsp://cam/live"), "rtsp://cam/live/track1");
        t.control = Some("rtsp://other/stream=0".into());
        assert_eq!(t.control_url("rtsp://cam/live"), "rtsp://other/stream=0");
        t.control = Some("*".into());
        assert_eq!(t.control_url("rtsp://cam/live"), "rtsp://cam/live");
    }

    #[test]
    fn no_video_track() {
        let sdp = SessionDescription::parse("v=0\r\nm=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n");
        assert!(sdp.h264_track().is_none());
        assert!(SessionDescription::parse("").tracks.is_empty());
    }
}
