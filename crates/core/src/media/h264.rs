use std::time::SystemTime;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Result, RtspError};

/// Annex B start code prepended to every emitted NAL unit.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit type codes (H.264 Table 7-1) and RTP payload structures (RFC 6184 §5.2).
pub mod nal_type {
    pub const SLICE: u8 = 1;
    pub const SLICE_DPA: u8 = 2;
    pub const SLICE_DPB: u8 = 3;
    pub const SLICE_DPC: u8 = 4;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
    pub const STAP_A: u8 = 24;
    pub const STAP_B: u8 = 25;
    pub const MTAP16: u8 = 26;
    pub const MTAP24: u8 = 27;
    pub const FU_A: u8 = 28;
    pub const FU_B: u8 = 29;
}

/// The one-octet H.264 NAL unit header: `F | NRI | Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden: bool,
    /// nal_ref_idc, 0..=3.
    pub nri: u8,
    pub nal_type: u8,
}

impl NalHeader {
    pub fn from_byte(b: u8) -> Self {
        Self {
            forbidden: b & 0x80 != 0,
            nri: (b >> 5) & 0x03,
            nal_type: b & 0x1f,
        }
    }

    pub fn to_byte(self) -> u8 {
        ((self.forbidden as u8) << 7) | (self.nri << 5) | self.nal_type
    }
}

/// FU header (RFC 6184 §5.8): `S | E | R | Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader {
    pub start: bool,
    pub end: bool,
    /// Type of the fragmented NAL unit.
    pub nal_type: u8,
}

impl FuHeader {
    pub fn from_byte(b: u8) -> Self {
        Self {
            start: b & 0x80 != 0,
            end: b & 0x40 != 0,
            nal_type: b & 0x1f,
        }
    }
}

/// A complete H.264 NAL unit in Annex B form.
///
/// The bytes always begin with [`START_CODE`]. Classification helpers are
/// derived from the type code; the value is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264NalUnit {
    data: Vec<u8>,
    nal_type: u8,
    timestamp: u32,
    received_at: SystemTime,
}

impl H264NalUnit {
    /// Wrap a NAL unit without start code (first byte is the NAL header).
    pub fn from_payload(payload: &[u8], timestamp: u32, received_at: SystemTime) -> Self {
        let mut data = Vec::with_capacity(START_CODE.len() + payload.len());
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(payload);
        Self::from_annex_b(data, timestamp, received_at)
    }

    /// Take ownership of bytes that already start with [`START_CODE`].
    pub(crate) fn from_annex_b(data: Vec<u8>, timestamp: u32, received_at: SystemTime) -> Self {
        let nal_type = data.get(START_CODE.len()).map_or(0, |b| b & 0x1f);
        Self {
            data,
            nal_type,
            timestamp,
            received_at,
        }
    }

    /// Annex B bytes, start code included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// NAL bytes without the start code.
    pub fn payload(&self) -> &[u8] {
        &self.data[START_CODE.len()..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn nal_type(&self) -> u8 {
        self.nal_type
    }

    /// RTP timestamp of the packet(s) that carried this unit.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// VCL slice (types 1–5).
    pub fn is_frame(&self) -> bool {
        (nal_type::SLICE..=nal_type::IDR).contains(&self.nal_type)
    }

    pub fn is_i_frame(&self) -> bool {
        self.nal_type == nal_type::IDR
    }

    pub fn is_sequence_parameter_set(&self) -> bool {
        self.nal_type == nal_type::SPS
    }

    pub fn is_picture_parameter_set(&self) -> bool {
        self.nal_type == nal_type::PPS
    }
}

/// The current SPS/PPS pair of a stream.
///
/// Both halves are always replaced together so that a consumer never pairs an
/// SPS with a PPS from a different configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct H264ParameterSets {
    sps: Option<H264NalUnit>,
    pps: Option<H264NalUnit>,
}

impl H264ParameterSets {
    pub fn new(sps: H264NalUnit, pps: H264NalUnit) -> Self {
        Self {
            sps: Some(sps),
            pps: Some(pps),
        }
    }

    /// Parse an SDP `sprop-parameter-sets` value (RFC 6184 §8.1).
    ///
    /// The value is a comma-separated list of base64 NAL units, normally
    /// `SPS,PPS`. Each is prefixed with the Annex B start code and stored with
    /// a zero timestamp. Extra entries are ignored; the first SPS and first
    /// PPS win.
    pub fn parse_sprop_parameter_sets(value: &str) -> Result<Self> {
        let now = SystemTime::now();
        let mut sps = None;
        let mut pps = None;

        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let raw = BASE64_STANDARD.decode(part)?;
            if raw.is_empty() {
                continue;
            }
            let nal = H264NalUnit::from_payload(&raw, 0, now);
            match nal.nal_type() {
                nal_type::SPS if sps.is_none() => sps = Some(nal),
                nal_type::PPS if pps.is_none() => pps = Some(nal),
                other => {
                    tracing::debug!(nal_type = other, "ignoring extra sprop-parameter-sets entry")
                }
            }
        }

        match (sps, pps) {
            (Some(sps), Some(pps)) => {
                tracing::debug!(
                    sps_len = sps.payload().len(),
                    pps_len = pps.payload().len(),
                    "parameter sets parsed from sprop-parameter-sets"
                );
                Ok(Self::new(sps, pps))
            }
            (None, _) => Err(RtspError::InvalidParameterSets(format!(
                "no SPS in \"{value}\""
            ))),
            (_, None) => Err(RtspError::InvalidParameterSets(format!(
                "no PPS in \"{value}\""
            ))),
        }
    }

    pub fn sps(&self) -> Option<&H264NalUnit> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&H264NalUnit> {
        self.pps.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Replace both parameter sets at once.
    pub fn replace(&mut self, sps: H264NalUnit, pps: H264NalUnit) {
        self.sps = Some(sps);
        self.pps = Some(pps);
    }

    /// Whether the stored pair has exactly these NAL payloads.
    pub fn matches(&self, sps: &[u8], pps: &[u8]) -> bool {
        self.sps.as_ref().is_some_and(|s| s.payload() == sps)
            && self.pps.as_ref().is_some_and(|p| p.payload() == pps)
    }

    /// `profile-level-id` (RFC 6184 §8.1): SPS bytes 1–3 as hex.
    pub fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_ref()?.payload();
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    /// Encode the pair back into a `sprop-parameter-sets` value.
    pub fn to_sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_ref()?;
        let pps = self.pps.as_ref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps.payload()),
            BASE64_STANDARD.encode(pps.payload())
        ))
    }

    /// SPS followed by PPS, both in Annex B form.
    pub fn annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(sps) = &self.sps {
            out.extend_from_slice(sps.data());
        }
        if let Some(pps) = &self.pps {
            out.extend_from_slice(pps.data());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 8] = [0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16];
    const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    #[test]
    fn nal_header_roundtrip() {
        let h = NalHeader::from_byte(0x65);
        assert_eq!(h.nri, 3);
        assert_eq!(h.nal_type, nal_type::IDR);
        assert!(!h.forbidden);
        assert_eq!(h.to_byte(), 0x65);
    }

    #[test]
    fn classification() {
        let now = SystemTime::now();
        let idr = H264NalUnit::from_payload(&[0x65, 0x88], 3000, now);
        assert!(idr.is_frame());
        assert!(idr.is_i_frame());
        assert_eq!(idr.data(), &[0, 0, 0, 1, 0x65, 0x88]);
        assert_eq!(idr.payload(), &[0x65, 0x88]);
        assert_eq!(idr.timestamp(), 3000);

        let p = H264NalUnit::from_payload(&[0x41, 0x9a], 0, now);
        assert!(p.is_frame());
        assert!(!p.is_i_frame());

        let sps = H264NalUnit::from_payload(&SPS, 0, now);
        assert!(sps.is_sequence_parameter_set());
        assert!(!sps.is_frame());

        let pps = H264NalUnit::from_payload(&PPS, 0, now);
        assert!(pps.is_picture_parameter_set());

        let sei = H264NalUnit::from_payload(&[0x06, 0x05], 0, now);
        assert!(!sei.is_frame());
    }

    #[test]
    fn sprop_roundtrip() {
        let now = SystemTime::now();
        let sets = H264ParameterSets::new(
            H264NalUnit::from_payload(&SPS, 0, now),
            H264NalUnit::from_payload(&PPS, 0, now),
        );
        let sprop = sets.to_sprop_parameter_sets().unwrap();
        let parsed = H264ParameterSets::parse_sprop_parameter_sets(&sprop).unwrap();
        assert_eq!(parsed.sps().unwrap().payload(), &SPS);
        assert_eq!(parsed.pps().unwrap().payload(), &PPS);
        assert_eq!(parsed.sps().unwrap().data()[..4], START_CODE);
        assert_eq!(parsed.sps().unwrap().timestamp(), 0);
    }

    #[test]
    fn sprop_known_value() {
        let parsed = H264ParameterSets::parse_sprop_parameter_sets("Z0LAH9oBQBY=,aM48gA==").unwrap();
        assert!(parsed.matches(&SPS, &PPS));
        assert_eq!(parsed.profile_level_id().as_deref(), Some("42c01f"));
    }

    #[test]
    fn sprop_missing_pps() {
        assert!(matches!(
            H264ParameterSets::parse_sprop_parameter_sets("Z0LAH9oBQBY="),
            Err(RtspError::InvalidParameterSets(_))
        ));
    }

    #[test]
    fn sprop_bad_base64() {
        assert!(matches!(
            H264ParameterSets::parse_sprop_parameter_sets("!!!,aM48gA=="),
            Err(RtspError::Base64(_))
        ));
    }

    #[test]
    fn replace_swaps_both() {
        let now = SystemTime::now();
        let mut sets = H264ParameterSets::default();
        assert!(!sets.is_complete());
        sets.replace(
            H264NalUnit::from_payload(&SPS, 0, now),
            H264NalUnit::from_payload(&PPS, 0, now),
        );
        assert!(sets.is_complete());
        let bundle = sets.annex_b();
        assert_eq!(bundle.len(), 4 + SPS.len() + 4 + PPS.len());
    }
}
