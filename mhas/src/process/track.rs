//! Container collaborator interface.
//!
//! The conversion core never touches the container format itself. A track
//! reader hands out metadata, the decoder configuration record and samples;
//! a track writer receives the converted samples.

use std::fmt;

use anyhow::{Result, bail};

use crate::process::sample::OutputSample;

/// Sample entry codec of an MPEG-H track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    /// `mha1` / `mha2`: raw access units, config in the sample entry.
    Mha,
    /// `mhm1` / `mhm2`: MHAS packetized access units.
    Mhm,
    Other(String),
}

impl Codec {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Self {
        match fourcc {
            b"mha1" | b"mha2" => Self::Mha,
            b"mhm1" | b"mhm2" => Self::Mhm,
            other => Self::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mha => f.write_str("mha"),
            Self::Mhm => f.write_str("mhm"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// One input access unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub cts_offset: i64,
    pub duration: u32,
    pub is_sync_sample: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditListEntry {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

/// Opaque user data box, `box_type` plus payload without box header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataEntry {
    pub box_type: [u8; 4],
    pub payload: Vec<u8>,
}

/// `MHADecoderConfigurationRecord()` from the `mhaC` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MhaDecoderConfigRecord {
    pub configuration_version: u8,
    pub profile_level_indication: u8,
    pub reference_channel_layout: u8,
    pub mpegh3da_config: Vec<u8>,
}

impl MhaDecoderConfigRecord {
    pub const HEADER_SIZE: usize = 5;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            bail!(
                "MHADecoderConfigurationRecord too short: {} bytes",
                data.len()
            );
        }

        let config_length = u16::from_be_bytes([data[3], data[4]]) as usize;
        let Some(config) = data.get(Self::HEADER_SIZE..Self::HEADER_SIZE + config_length) else {
            bail!(
                "MHADecoderConfigurationRecord declares {} config bytes, only {} present",
                config_length,
                data.len() - Self::HEADER_SIZE
            );
        };

        Ok(Self {
            configuration_version: data[0],
            profile_level_indication: data[1],
            reference_channel_layout: data[2],
            mpegh3da_config: config.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let Ok(length) = u16::try_from(self.mpegh3da_config.len()) else {
            bail!(
                "mpegh3daConfig of {} bytes does not fit MHADecoderConfigurationRecord",
                self.mpegh3da_config.len()
            );
        };

        let mut out = Vec::with_capacity(Self::HEADER_SIZE + self.mpegh3da_config.len());
        out.push(self.configuration_version);
        out.push(self.profile_level_indication);
        out.push(self.reference_channel_layout);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&self.mpegh3da_config);
        Ok(out)
    }

    /// Replaces only the embedded `mpegh3daConfig()`.
    pub fn set_mpegh3da_config(&mut self, config: Vec<u8>) {
        self.mpegh3da_config = config;
    }
}

/// Everything the converter needs to know about the input track.
#[derive(Debug, Clone)]
pub struct TrackMetadata {
    /// Number of tracks in the file, only one is supported.
    pub track_count: usize,
    pub codec: Codec,
    pub language: String,
    pub timescale: u32,
    pub sample_rate: u32,
    pub sample_count: u64,
    pub movie_timescale: u32,
    pub compatible_brands: Vec<[u8; 4]>,
    pub user_data: Vec<UserDataEntry>,
    pub edit_list: Vec<EditListEntry>,
    pub decoder_config_record: Option<MhaDecoderConfigRecord>,
    pub profile_and_level_compatible_sets: Vec<u8>,
}

/// Parameters of the output track.
#[derive(Debug, Clone)]
pub struct TrackWriterConfig {
    pub major_brand: [u8; 4],
    pub compatible_brands: Vec<[u8; 4]>,
    pub movie_timescale: u32,
    pub language: String,
    pub media_timescale: u32,
    pub sample_rate: u32,
    pub config_record: Option<MhaDecoderConfigRecord>,
    pub profile_and_level_compatible_sets: Vec<u8>,
}

pub trait TrackReader {
    fn metadata(&self) -> &TrackMetadata;

    /// Next sample in decoding order, `None` at the end of the track.
    fn next_sample(&mut self) -> Result<Option<Sample>>;
}

pub trait TrackWriter {
    fn add_sample(&mut self, sample: &OutputSample) -> Result<()>;

    fn add_user_data(&mut self, entry: &UserDataEntry) -> Result<()>;

    fn add_edit_list_entry(&mut self, entry: &EditListEntry) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory track reader and writer.

    use std::collections::VecDeque;

    use super::*;

    pub struct MemoryTrackReader {
        pub metadata: TrackMetadata,
        pub samples: VecDeque<Sample>,
    }

    impl MemoryTrackReader {
        pub fn new(codec: Codec, config: Option<Vec<u8>>, samples: Vec<Sample>) -> Self {
            Self {
                metadata: TrackMetadata {
                    track_count: 1,
                    codec,
                    language: "und".to_string(),
                    timescale: 48000,
                    sample_rate: 48000,
                    sample_count: samples.len() as u64,
                    movie_timescale: 1000,
                    compatible_brands: vec![*b"isom", *b"mp42"],
                    user_data: vec![UserDataEntry {
                        box_type: *b"name",
                        payload: b"test".to_vec(),
                    }],
                    edit_list: vec![EditListEntry {
                        segment_duration: 1000,
                        media_time: 1024,
                        media_rate_integer: 1,
                        media_rate_fraction: 0,
                    }],
                    decoder_config_record: config.map(|mpegh3da_config| MhaDecoderConfigRecord {
                        configuration_version: 1,
                        profile_level_indication: 0x0D,
                        reference_channel_layout: 6,
                        mpegh3da_config,
                    }),
                    profile_and_level_compatible_sets: vec![],
                },
                samples: samples.into(),
            }
        }
    }

    impl TrackReader for MemoryTrackReader {
        fn metadata(&self) -> &TrackMetadata {
            &self.metadata
        }

        fn next_sample(&mut self) -> Result<Option<Sample>> {
            Ok(self.samples.pop_front())
        }
    }

    #[derive(Debug, Default)]
    pub struct MemoryTrackWriter {
        pub config: Option<TrackWriterConfig>,
        pub samples: Vec<OutputSample>,
        pub user_data: Vec<UserDataEntry>,
        pub edit_list: Vec<EditListEntry>,
    }

    impl TrackWriter for MemoryTrackWriter {
        fn add_sample(&mut self, sample: &OutputSample) -> Result<()> {
            self.samples.push(sample.clone());
            Ok(())
        }

        fn add_user_data(&mut self, entry: &UserDataEntry) -> Result<()> {
            self.user_data.push(entry.clone());
            Ok(())
        }

        fn add_edit_list_entry(&mut self, entry: &EditListEntry) -> Result<()> {
            self.edit_list.push(*entry);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_config_record_layout() -> Result<()> {
        let data = [0x01, 0x0D, 0x06, 0x00, 0x03, 0xAA, 0xBB, 0xCC];
        let mut record = MhaDecoderConfigRecord::parse(&data)?;
        assert_eq!(record.profile_level_indication, 0x0D);
        assert_eq!(record.reference_channel_layout, 6);
        assert_eq!(record.mpegh3da_config, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(record.to_bytes()?, data.to_vec());

        record.set_mpegh3da_config(vec![0x11; 4]);
        assert_eq!(
            record.to_bytes()?,
            vec![0x01, 0x0D, 0x06, 0x00, 0x04, 0x11, 0x11, 0x11, 0x11]
        );
        Ok(())
    }

    #[test]
    fn truncated_record_is_rejected() {
        assert!(MhaDecoderConfigRecord::parse(&[0x01, 0x0D]).is_err());
        assert!(MhaDecoderConfigRecord::parse(&[0x01, 0x0D, 0x06, 0x00, 0x05, 0xAA]).is_err());
    }

    #[test]
    fn codec_from_sample_entry() {
        assert_eq!(Codec::from_fourcc(b"mha1"), Codec::Mha);
        assert_eq!(Codec::from_fourcc(b"mhm2"), Codec::Mhm);
        assert_eq!(Codec::from_fourcc(b"mp4a").to_string(), "mp4a");
    }
}
