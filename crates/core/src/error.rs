//! Error types for the RTSP ingestion library.

use std::fmt;

/// Errors that can occur in the RTSP ingestion library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io): socket/network failures.
/// - **Protocol**: [`Parse`](Self::Parse), [`UnexpectedStatus`](Self::UnexpectedStatus),
///   [`NoResponse`](Self::NoResponse): malformed messages, failed steps and timeouts.
/// - **Media**: [`Rtp`](Self::Rtp), [`InvalidParameterSets`](Self::InvalidParameterSets),
///   [`Base64`](Self::Base64).
/// - **Pipeline**: [`Pipeline`](Self::Pipeline), [`Codec`](Self::Codec).
///
/// Framing corruption on the wire never reaches the caller as an error: the
/// demultiplexer resynchronizes and counts it instead.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// An RTP packet could not be used (RFC 3550 §5.1).
    #[error("RTP packet unusable: {kind}")]
    Rtp { kind: RtpErrorKind },

    /// The server answered a request with something other than 200 OK.
    #[error("{method} failed: {code} {reason}")]
    UnexpectedStatus {
        method: String,
        code: u16,
        reason: String,
    },

    /// No response with a matching CSeq arrived within the response timeout.
    #[error("no response to {method} (CSeq {cseq})")]
    NoResponse { method: String, cseq: u32 },

    /// The URL is not an `rtsp://host[:port]/path` URL.
    #[error("invalid RTSP URL: {0}")]
    InvalidUri(String),

    /// DESCRIBE returned an SDP without an H.264 video track.
    #[error("no video track in session description")]
    NoVideoTrack,

    /// `sprop-parameter-sets` was malformed or did not hold an SPS/PPS pair.
    #[error("invalid parameter sets: {0}")]
    InvalidParameterSets(String),

    /// Base64 decoding of a parameter set failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The operation observed a fired [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// The frame pipeline could not be built or started.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// The codec collaborator rejected a unit or failed to seek/flush.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Specific reason an RTP packet was marked unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpErrorKind {
    /// Fewer bytes than the fixed header, CSRC list or extension require.
    Truncated { len: usize, needed: usize },
    /// Version field was not 2.
    UnsupportedVersion(u8),
    /// Padding count larger than the payload it pads.
    InvalidPadding(u8),
}

impl fmt::Display for RtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len, needed } => {
                write!(f, "truncated packet ({len} bytes, header needs {needed})")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::InvalidPadding(p) => write!(f, "padding of {p} bytes exceeds payload"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
