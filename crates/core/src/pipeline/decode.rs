use crossbeam_channel::{Receiver, TryRecvError};

use crate::error::Result;
use crate::media::h264::{H264NalUnit, H264ParameterSets};

use super::{SlotData, SlotState, Stage};

/// A video decoder the decode stage drives.
pub trait Codec: Send {
    type Image: Send;

    /// Decode one Annex B NAL unit. With `materialize` false the codec only
    /// updates its state (parameter sets, restart bundles).
    fn decode(&mut self, nal: &H264NalUnit, materialize: bool) -> Result<Option<Self::Image>>;

    fn seek(&mut self, timestamp: i64) -> Result<()>;

    /// Drop all state from the current coded sequence.
    fn flush(&mut self) -> Result<()>;
}

/// First pipeline stage: pulls NAL units from the receiver queue and
/// decodes them into slots.
///
/// When the SPS/PPS pair changes (or after a seek) decoding pauses until
/// the next IDR, and the codec is flushed and given SPS, PPS and that IDR
/// so it restarts cleanly.
pub struct DecodeStage<C> {
    codec: C,
    nals: Receiver<H264NalUnit>,
    parameter_sets: H264ParameterSets,
    pending_sps: Option<H264NalUnit>,
    restart_pending: bool,
}

impl<C: Codec> DecodeStage<C> {
    pub fn new(codec: C, nals: Receiver<H264NalUnit>) -> Self {
        Self {
            codec,
            nals,
            parameter_sets: H264ParameterSets::default(),
            pending_sps: None,
            restart_pending: false,
        }
    }

    /// Start from known parameter sets (e.g. from SDP).
    pub fn with_parameter_sets(mut self, sets: H264ParameterSets) -> Self {
        self.restart_pending = sets.is_complete();
        self.parameter_sets = sets;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns true if the unit was a parameter set and has been consumed.
    fn observe_parameter_set(&mut self, nal: &H264NalUnit) -> bool {
        if nal.is_sequence_parameter_set() {
            self.pending_sps = Some(nal.clone());
            return true;
        }
        if !nal.is_picture_parameter_set() {
            return false;
        }
        if let Some(sps) = self.pending_sps.take()
            && !self.parameter_sets.matches(sps.payload(), nal.payload())
        {
            tracing::debug!("parameter sets changed, restarting at next IDR");
            self.parameter_sets.replace(sps, nal.clone());
            self.restart_pending = true;
        }
        true
    }

    fn restart(&mut self) -> Result<()> {
        self.codec.flush()?;
        if let Some(sps) = self.parameter_sets.sps() {
            self.codec.decode(sps, false)?;
        }
        if let Some(pps) = self.parameter_sets.pps() {
            self.codec.decode(pps, false)?;
        }
        self.restart_pending = false;
        Ok(())
    }
}

impl<C: Codec, T: Send> Stage<Option<C::Image>, T> for DecodeStage<C> {
    fn process(&mut self, slot: &mut SlotData<Option<C::Image>, T>) -> Option<SlotState> {
        loop {
            let nal = match self.nals.try_recv() {
                Ok(nal) => nal,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    slot.source = None;
                    return Some(SlotState::EndOfVideoReached);
                }
            };

            if self.observe_parameter_set(&nal) {
                continue;
            }

            let timestamp = nal.timestamp() as i64;
            if !nal.is_frame() {
                if let Err(e) = self.codec.decode(&nal, false) {
                    tracing::debug!(nal_type = nal.nal_type(), error = %e, "non-VCL unit rejected");
                }
                continue;
            }

            if self.restart_pending {
                if !nal.is_i_frame() {
                    tracing::trace!(nal_type = nal.nal_type(), "waiting for IDR");
                    continue;
                }
                if let Err(e) = self.restart() {
                    tracing::warn!(error = %e, "decoder restart failed");
                    slot.source = None;
                    slot.timestamp = timestamp;
                    return Some(SlotState::DecodeFailed);
                }
            }

            match self.codec.decode(&nal, true) {
                Ok(Some(image)) => {
                    slot.source = Some(image);
                    slot.timestamp = timestamp;
                    return Some(SlotState::Decoded);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(nal_type = nal.nal_type(), timestamp, error = %e, "decode failed");
                    slot.source = None;
                    slot.timestamp = timestamp;
                    return Some(SlotState::DecodeFailed);
                }
            }
        }
    }

    fn seek(&mut self, timestamp: i64) -> Result<()> {
        self.codec.seek(timestamp)?;
        self.pending_sps = None;
        self.restart_pending = self.parameter_sets.is_complete();
        Ok(())
    }
}
