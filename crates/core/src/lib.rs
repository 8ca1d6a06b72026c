//! RTSP/RTP-over-TCP ingestion of H.264 video, and a staged frame pipeline.
//!
//! [`StreamReceiver`] connects to a camera, runs the RTSP handshake with
//! interleaved TCP transport and hands reassembled Annex B NAL units to a
//! [`NalConsumer`]. [`Pipeline`] runs decoded frames through a fixed ring of
//! slots shared by several worker stages.

pub mod cancel;
pub mod client;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use cancel::CancelToken;
pub use client::{ClientConfig, RtspClient, StreamReceiver};
pub use error::{Result, RtspError};
pub use media::h264::{H264NalUnit, H264ParameterSets};
pub use media::receiver::{H264Receiver, NalQueue, ParameterSetStore};
pub use media::{NalConsumer, TransportEvent};
pub use pipeline::decode::{Codec, DecodeStage};
pub use pipeline::{Pipeline, PipelineBuilder, ReadySlot, ResetGuard, SlotData, SlotState, Stage};
