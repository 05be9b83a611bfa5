//! Per-sample conversion into MHAS.
//!
//! An output sample is laid out as
//!
//! ```text
//! [SYNC] [MPEGH3DACFG] [AUDIOSCENEINFO] MPEGH3DAFRAME
//! ```
//!
//! where the optional packets depend on the sync policy and on whether the
//! frame carries a configuration.

use anyhow::{Result, bail};
use log::{info, trace};

use crate::process::convert::Converter;
use crate::process::track::Sample;
use crate::structs::packet::{MHAS_SYNC_PACKET, MhasPacketType, parse_packets};
use crate::structs::preroll::{is_independent, is_ipf};
use crate::utils::errors::{FrameError, SampleError};

/// When to put a SYNC packet in front of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPacketPolicy {
    #[default]
    EveryFrame,
    FirstFrame,
    EveryIpf,
    Never,
}

impl SyncPacketPolicy {
    pub fn inserts(self, first_sample: bool, is_ipf: bool) -> bool {
        match self {
            Self::EveryFrame => true,
            Self::FirstFrame => first_sample,
            Self::EveryIpf => is_ipf,
            Self::Never => false,
        }
    }
}

/// Sample group membership requested from the track writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleGroupHint {
    pub grouping_type: [u8; 4],
    /// Number of samples to pre-roll.
    pub roll_distance: i16,
    pub offset: u32,
}

/// `prol` entry for independent frames without an embedded pre-roll.
pub const AUDIO_PRE_ROLL_HINT: SampleGroupHint = SampleGroupHint {
    grouping_type: *b"prol",
    roll_distance: 1,
    offset: 0,
};

/// One converted access unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSample {
    pub data: Vec<u8>,
    pub is_sync_sample: bool,
    pub cts_offset: i64,
    pub duration: u32,
    pub sample_group: Option<SampleGroupHint>,
}

/// Converts input samples of one track in decoding order.
pub trait SampleConverter {
    fn convert_sample(&mut self, sample: &Sample) -> Result<OutputSample>;
}

#[derive(Debug, Default)]
struct SampleLayout<'a> {
    sync: bool,
    config: Option<&'a [u8]>,
    asi: Option<&'a [u8]>,
    rest: Vec<&'a [u8]>,
}

impl SampleLayout<'_> {
    fn assemble(&self) -> Vec<u8> {
        let len = self.rest.iter().map(|p| p.len()).sum::<usize>()
            + self.config.map_or(0, <[u8]>::len)
            + self.asi.map_or(0, <[u8]>::len)
            + MHAS_SYNC_PACKET.len();

        let mut data = Vec::with_capacity(len);
        if self.sync {
            data.extend_from_slice(&MHAS_SYNC_PACKET);
        }
        if let Some(config) = self.config {
            data.extend_from_slice(config);
        }
        if let Some(asi) = self.asi {
            data.extend_from_slice(asi);
        }
        for packet in &self.rest {
            data.extend_from_slice(packet);
        }
        data
    }
}

fn pre_roll_hint(is_ipf: bool, is_independent: bool) -> Option<SampleGroupHint> {
    (!is_ipf && is_independent).then_some(AUDIO_PRE_ROLL_HINT)
}

/// Converts `mha1`/`mha2` access units.
pub struct MhaSampleConverter {
    converter: Converter,
    track_config: Option<Vec<u8>>,
    sync_policy: SyncPacketPolicy,
    first_sample: bool,
}

impl MhaSampleConverter {
    /// Without a track config the first sample has to bring its own, as an IPF.
    pub fn new(
        converter: Converter,
        track_config: Option<Vec<u8>>,
        sync_policy: SyncPacketPolicy,
    ) -> Self {
        Self {
            converter,
            track_config,
            sync_policy,
            first_sample: true,
        }
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }
}

impl SampleConverter for MhaSampleConverter {
    fn convert_sample(&mut self, sample: &Sample) -> Result<OutputSample> {
        // Run every time, the packet label may have moved since the last sample.
        let track = match &self.track_config {
            Some(config) => Some(self.converter.convert_config(config)?),
            None => None,
        };

        let mut frame = self.converter.convert_frame(&sample.data)?;
        let is_sync_sample = frame.config.is_some();

        if self.first_sample && !is_sync_sample {
            if !frame.is_independent {
                bail!(SampleError::FirstSampleNotIndependent);
            }
            let Some(track) = track else {
                bail!(SampleError::FirstSampleWithoutConfig);
            };

            frame.config = Some(track.config);
            frame.asi = track.asi;

            if !frame.is_ipf {
                info!(
                    "First sample is not an IPF, playback may not be possible until the first IPF has been received"
                );
            }
        }

        let sync = self.sync_policy.inserts(self.first_sample, frame.is_ipf);
        if sync {
            trace!("Inserting sync packet ({:?})", self.sync_policy);
        }

        let data = SampleLayout {
            sync,
            config: frame.config.as_deref(),
            asi: frame.asi.as_deref(),
            rest: vec![&frame.frame],
        }
        .assemble();

        self.first_sample = false;

        Ok(OutputSample {
            data,
            is_sync_sample,
            cts_offset: sample.cts_offset,
            duration: sample.duration,
            sample_group: pre_roll_hint(frame.is_ipf, frame.is_independent),
        })
    }
}

/// Cleans `mhm1`/`mhm2` samples that are already packetized.
///
/// Existing SYNC packets are dropped and the sync policy is applied again.
/// All other packets pass through in their original order.
pub struct MhmSampleConverter {
    sync_policy: SyncPacketPolicy,
    first_sample: bool,
}

impl MhmSampleConverter {
    pub fn new(sync_policy: SyncPacketPolicy) -> Self {
        Self {
            sync_policy,
            first_sample: true,
        }
    }
}

impl SampleConverter for MhmSampleConverter {
    fn convert_sample(&mut self, sample: &Sample) -> Result<OutputSample> {
        let packets = parse_packets(&sample.data)?;

        let mut serialized = Vec::with_capacity(packets.len());
        let mut has_config = false;
        let mut frame_start = None;
        let mut dropped = 0usize;

        for packet in &packets {
            match packet.packet_type {
                MhasPacketType::Sync => {
                    dropped += 1;
                    continue;
                }
                MhasPacketType::Mpegh3daConfig => has_config = true,
                MhasPacketType::Mpegh3daFrame if frame_start.is_none() => {
                    let Some(&first) = packet.payload.first() else {
                        bail!(FrameError::EmptyFrame);
                    };
                    frame_start = Some(first);
                }
                _ => {}
            }
            serialized.push(packet.to_bytes()?);
        }

        let Some(first) = frame_start else {
            bail!(SampleError::MissingFramePacket);
        };

        if self.first_sample && !has_config {
            bail!(SampleError::FirstSampleWithoutConfig);
        }

        trace!(
            "MHAS sample with {} packets, dropped {dropped} sync packets",
            packets.len()
        );

        let ipf = is_ipf(first);
        let independent = ipf || is_independent(first);

        let data = SampleLayout {
            sync: self.sync_policy.inserts(self.first_sample, ipf),
            rest: serialized.iter().map(Vec::as_slice).collect(),
            ..Default::default()
        }
        .assemble();

        self.first_sample = false;

        Ok(OutputSample {
            data,
            is_sync_sample: has_config,
            cts_offset: sample.cts_offset,
            duration: sample.duration,
            sample_group: pre_roll_hint(ipf, independent),
        })
    }
}
