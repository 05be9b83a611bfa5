use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use log::{debug, warn};
use mhas::process::sample::{OutputSample, SampleGroupHint};
use mhas::process::track::{EditListEntry, TrackWriter, TrackWriterConfig, UserDataEntry};
use mhasconv_macros::{ToBytes, mp4_box_type};

use crate::byteorder::WriteBytesBe;
use crate::join_bytes_be;
use crate::mp4::{MP4_EPOCH_OFFSET, Mp4Box, Mp4Error, full_box_header, write_box};

const TRACK_ID: u32 = 1;
const UNITY_MATRIX: [i32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"ftyp")]
pub struct FileType {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"mvhd")]
pub struct MovieHeader {
    pub version_flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: i32,
    pub volume: i16,
    pub reserved: [u8; 10],
    pub matrix: [i32; 9],
    pub pre_defined: [u32; 6],
    pub next_track_id: u32,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"tkhd")]
pub struct TrackHeader {
    pub version_flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub reserved: u32,
    pub duration: u64,
    pub reserved2: [u32; 2],
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: i16,
    pub reserved3: u16,
    pub matrix: [i32; 9],
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, ToBytes)]
pub struct EditListRecord {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"elst")]
pub struct EditList {
    pub version_flags: u32,
    pub entry_count: u32,
    pub entries: Vec<EditListRecord>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"mdhd")]
pub struct MediaHeader {
    pub version_flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: u16,
    pub pre_defined: u16,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"hdlr")]
pub struct HandlerReference {
    pub version_flags: u32,
    pub pre_defined: u32,
    pub handler_type: [u8; 4],
    pub reserved: [u32; 3],
    /// Null terminated.
    pub name: Vec<u8>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"smhd")]
pub struct SoundMediaHeader {
    pub version_flags: u32,
    pub balance: i16,
    pub reserved: u16,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"url ")]
pub struct DataEntryUrl {
    pub version_flags: u32,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"dref")]
pub struct DataReference {
    pub version_flags: u32,
    pub entry_count: u32,
    pub entries: Vec<u8>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"stsd")]
pub struct SampleDescription {
    pub version_flags: u32,
    pub entry_count: u32,
    pub entries: Vec<u8>,
}

/// `AudioSampleEntry` of an MHAS track.
#[derive(Debug, ToBytes)]
#[mp4_box_type(b"mhm1")]
pub struct MhmSampleEntry {
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub reserved2: [u32; 2],
    pub channel_count: u16,
    pub sample_size: u16,
    pub pre_defined: u16,
    pub reserved3: u16,
    /// 16.16 fixed point.
    pub sample_rate: u32,
    pub children: Vec<u8>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"mhaC")]
pub struct MhaConfiguration {
    pub record: Vec<u8>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"mhaP")]
pub struct MhaProfileLevelCompatibility {
    pub num_compatible_sets: u8,
    pub compatible_set_indication: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct SampleRun {
    pub sample_count: u32,
    pub value: u32,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"stts")]
pub struct TimeToSample {
    pub version_flags: u32,
    pub entry_count: u32,
    pub entries: Vec<SampleRun>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct CompositionRun {
    pub sample_count: u32,
    pub offset: i32,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"ctts")]
pub struct CompositionOffset {
    pub version_flags: u32,
    pub entry_count: u32,
    pub entries: Vec<CompositionRun>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"stsc")]
pub struct SampleToChunk {
    pub version_flags: u32,
    pub entry_count: u32,
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"stsz")]
pub struct SampleSize {
    pub version_flags: u32,
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"co64")]
pub struct ChunkOffset64 {
    pub version_flags: u32,
    pub entry_count: u32,
    pub chunk_offsets: Vec<u64>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"stss")]
pub struct SyncSample {
    pub version_flags: u32,
    pub entry_count: u32,
    pub sample_numbers: Vec<u32>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"sgpd")]
pub struct RollGroupDescription {
    pub version_flags: u32,
    pub grouping_type: [u8; 4],
    pub default_length: u32,
    pub entry_count: u32,
    pub roll_distances: Vec<i16>,
}

#[derive(Debug, ToBytes)]
#[mp4_box_type(b"sbgp")]
pub struct SampleToGroup {
    pub version_flags: u32,
    pub grouping_type: [u8; 4],
    pub entry_count: u32,
    pub entries: Vec<SampleRun>,
}

#[derive(Debug, Clone, Copy)]
struct WrittenSample {
    offset: u64,
    size: u32,
    duration: u32,
    cts_offset: i64,
    is_sync: bool,
    sample_group: Option<SampleGroupHint>,
}

/// Writes a single `mhm1` track.
///
/// Sample data is streamed into a 64-bit `mdat`, the `moov` follows on
/// [`finish`](Mp4Writer::finish).
pub struct Mp4Writer<W: Write + Seek> {
    writer: W,
    config: TrackWriterConfig,
    creation_time: u64,
    mdat_size_position: u64,
    data_start: u64,
    data_written: u64,
    samples: Vec<WrittenSample>,
    user_data: Vec<UserDataEntry>,
    edit_list: Vec<EditListEntry>,
    finished: bool,
}

impl<W: Write + Seek> Mp4Writer<W> {
    /// Writes `ftyp` and the `mdat` header.
    pub fn new(mut writer: W, config: TrackWriterConfig) -> Result<Self> {
        let mut header = Vec::new();
        FileType {
            major_brand: config.major_brand,
            minor_version: 0,
            compatible_brands: config.compatible_brands.clone(),
        }
        .write_box(&mut header);
        writer.write_all(&header)?;

        // size 1 selects the 64-bit largesize field
        writer.write_all(&join_bytes_be!(1u32, *b"mdat"))?;
        let mdat_size_position = writer.stream_position()?;
        writer.write_all(&0u64.to_be_bytes())?;
        let data_start = writer.stream_position()?;

        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() + MP4_EPOCH_OFFSET)
            .unwrap_or(0);

        Ok(Self {
            writer,
            config,
            creation_time,
            mdat_size_position,
            data_start,
            data_written: 0,
            samples: Vec::new(),
            user_data: Vec::new(),
            edit_list: Vec::new(),
            finished: false,
        })
    }

    fn check_not_finished(&self) -> Result<()> {
        if self.finished {
            bail!(Mp4Error::Finished);
        }
        Ok(())
    }

    /// Patches the `mdat` size and appends the `moov`.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let end = self.data_start + self.data_written;
        self.writer.seek(SeekFrom::Start(self.mdat_size_position))?;
        self.writer.write_all(&(self.data_written + 16).to_be_bytes())?;
        self.writer.seek(SeekFrom::Start(end))?;

        let moov = self.build_moov()?;
        self.writer.write_all(&moov)?;
        self.writer.flush()?;

        debug!(
            "Finished MP4 with {} samples, {} bytes of sample data",
            self.samples.len(),
            self.data_written
        );
        Ok(())
    }

    fn media_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    fn movie_duration(&self) -> u64 {
        if !self.edit_list.is_empty() {
            return self.edit_list.iter().map(|e| e.segment_duration).sum();
        }
        if self.config.media_timescale == 0 {
            return 0;
        }
        self.media_duration() * self.config.movie_timescale as u64
            / self.config.media_timescale as u64
    }

    fn build_moov(&self) -> Result<Vec<u8>> {
        let mut moov = Vec::new();

        MovieHeader {
            version_flags: full_box_header(1, 0),
            creation_time: self.creation_time,
            modification_time: self.creation_time,
            timescale: self.config.movie_timescale,
            duration: self.movie_duration(),
            rate: 0x0001_0000,
            volume: 0x0100,
            reserved: [0; 10],
            matrix: UNITY_MATRIX,
            pre_defined: [0; 6],
            next_track_id: TRACK_ID + 1,
        }
        .write_box(&mut moov);

        write_box(&mut moov, b"trak", &self.build_trak()?);

        let mut out = Vec::new();
        write_box(&mut out, b"moov", &moov);
        Ok(out)
    }

    fn build_trak(&self) -> Result<Vec<u8>> {
        let mut trak = Vec::new();

        TrackHeader {
            // enabled, in movie
            version_flags: full_box_header(1, 0x03),
            creation_time: self.creation_time,
            modification_time: self.creation_time,
            track_id: TRACK_ID,
            reserved: 0,
            duration: self.movie_duration(),
            reserved2: [0; 2],
            layer: 0,
            alternate_group: 1,
            volume: 0x0100,
            reserved3: 0,
            matrix: UNITY_MATRIX,
            width: 0,
            height: 0,
        }
        .write_box(&mut trak);

        if !self.edit_list.is_empty() {
            let mut edts = Vec::new();
            EditList {
                version_flags: full_box_header(1, 0),
                entry_count: self.edit_list.len() as u32,
                entries: self
                    .edit_list
                    .iter()
                    .map(|e| EditListRecord {
                        segment_duration: e.segment_duration,
                        media_time: e.media_time,
                        media_rate_integer: e.media_rate_integer,
                        media_rate_fraction: e.media_rate_fraction,
                    })
                    .collect(),
            }
            .write_box(&mut edts);
            write_box(&mut trak, b"edts", &edts);
        }

        write_box(&mut trak, b"mdia", &self.build_mdia()?);

        if !self.user_data.is_empty() {
            let mut udta = Vec::new();
            for entry in &self.user_data {
                write_box(&mut udta, &entry.box_type, &entry.payload);
            }
            write_box(&mut trak, b"udta", &udta);
        }

        Ok(trak)
    }

    fn build_mdia(&self) -> Result<Vec<u8>> {
        let mut mdia = Vec::new();

        MediaHeader {
            version_flags: full_box_header(1, 0),
            creation_time: self.creation_time,
            modification_time: self.creation_time,
            timescale: self.config.media_timescale,
            duration: self.media_duration(),
            language: encode_language(&self.config.language),
            pre_defined: 0,
        }
        .write_box(&mut mdia);

        HandlerReference {
            version_flags: 0,
            pre_defined: 0,
            handler_type: *b"soun",
            reserved: [0; 3],
            name: b"SoundHandler\0".to_vec(),
        }
        .write_box(&mut mdia);

        let mut minf = Vec::new();
        SoundMediaHeader {
            version_flags: 0,
            balance: 0,
            reserved: 0,
        }
        .write_box(&mut minf);

        let mut dref_entries = Vec::new();
        // flag 1: media data in the same file
        DataEntryUrl {
            version_flags: full_box_header(0, 1),
        }
        .write_box(&mut dref_entries);
        let mut dinf = Vec::new();
        DataReference {
            version_flags: 0,
            entry_count: 1,
            entries: dref_entries,
        }
        .write_box(&mut dinf);
        write_box(&mut minf, b"dinf", &dinf);

        write_box(&mut minf, b"stbl", &self.build_stbl()?);
        write_box(&mut mdia, b"minf", &minf);

        Ok(mdia)
    }

    fn build_sample_entry(&self) -> Result<Vec<u8>> {
        let mut children = Vec::new();

        if let Some(record) = &self.config.config_record {
            MhaConfiguration {
                record: record.to_bytes()?,
            }
            .write_box(&mut children);
        }

        let sets = &self.config.profile_and_level_compatible_sets;
        if !sets.is_empty() {
            MhaProfileLevelCompatibility {
                num_compatible_sets: sets.len() as u8,
                compatible_set_indication: sets.clone(),
            }
            .write_box(&mut children);
        }

        let sample_rate = match u16::try_from(self.config.sample_rate) {
            Ok(rate) => (rate as u32) << 16,
            Err(_) => {
                warn!(
                    "Sample rate {} does not fit the sample entry",
                    self.config.sample_rate
                );
                0
            }
        };

        let mut entry = Vec::new();
        MhmSampleEntry {
            reserved: [0; 6],
            data_reference_index: 1,
            reserved2: [0; 2],
            channel_count: 0,
            sample_size: 16,
            pre_defined: 0,
            reserved3: 0,
            sample_rate,
            children,
        }
        .write_box(&mut entry);
        Ok(entry)
    }

    fn build_stbl(&self) -> Result<Vec<u8>> {
        let mut stbl = Vec::new();
        let sample_count = self.samples.len() as u32;

        SampleDescription {
            version_flags: 0,
            entry_count: 1,
            entries: self.build_sample_entry()?,
        }
        .write_box(&mut stbl);

        let durations = runs(self.samples.iter().map(|s| s.duration));
        TimeToSample {
            version_flags: 0,
            entry_count: durations.len() as u32,
            entries: durations,
        }
        .write_box(&mut stbl);

        if self.samples.iter().any(|s| s.cts_offset != 0) {
            let offsets = self
                .samples
                .iter()
                .map(|s| i32::try_from(s.cts_offset).map(|o| o as u32))
                .collect::<Result<Vec<_>, _>>()?;
            let entries = runs(offsets.into_iter())
                .into_iter()
                .map(|run| CompositionRun {
                    sample_count: run.sample_count,
                    offset: run.value as i32,
                })
                .collect::<Vec<_>>();
            CompositionOffset {
                version_flags: full_box_header(1, 0),
                entry_count: entries.len() as u32,
                entries,
            }
            .write_box(&mut stbl);
        }

        // one chunk per sample
        SampleToChunk {
            version_flags: 0,
            entry_count: 1,
            first_chunk: 1,
            samples_per_chunk: 1,
            sample_description_index: 1,
        }
        .write_box(&mut stbl);

        SampleSize {
            version_flags: 0,
            sample_size: 0,
            sample_count,
            entry_sizes: self.samples.iter().map(|s| s.size).collect(),
        }
        .write_box(&mut stbl);

        ChunkOffset64 {
            version_flags: 0,
            entry_count: sample_count,
            chunk_offsets: self.samples.iter().map(|s| s.offset).collect(),
        }
        .write_box(&mut stbl);

        if self.samples.iter().any(|s| !s.is_sync) {
            let sample_numbers = self
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_sync)
                .map(|(i, _)| i as u32 + 1)
                .collect::<Vec<_>>();
            SyncSample {
                version_flags: 0,
                entry_count: sample_numbers.len() as u32,
                sample_numbers,
            }
            .write_box(&mut stbl);
        }

        self.write_sample_groups(&mut stbl);

        Ok(stbl)
    }

    fn write_sample_groups(&self, stbl: &mut Vec<u8>) {
        let mut grouping_types: Vec<[u8; 4]> = Vec::new();
        for hint in self.samples.iter().filter_map(|s| s.sample_group) {
            if !grouping_types.contains(&hint.grouping_type) {
                grouping_types.push(hint.grouping_type);
            }
        }

        for grouping_type in grouping_types {
            let mut roll_distances: Vec<i16> = Vec::new();
            let indices = self.samples.iter().map(|s| match s.sample_group {
                Some(hint) if hint.grouping_type == grouping_type => {
                    let index = match roll_distances.iter().position(|d| *d == hint.roll_distance)
                    {
                        Some(index) => index,
                        None => {
                            roll_distances.push(hint.roll_distance);
                            roll_distances.len() - 1
                        }
                    };
                    index as u32 + 1
                }
                _ => 0,
            });
            let entries = runs(indices);

            RollGroupDescription {
                version_flags: full_box_header(1, 0),
                grouping_type,
                default_length: 2,
                entry_count: roll_distances.len() as u32,
                roll_distances,
            }
            .write_box(stbl);

            SampleToGroup {
                version_flags: 0,
                grouping_type,
                entry_count: entries.len() as u32,
                entries,
            }
            .write_box(stbl);
        }
    }
}

impl<W: Write + Seek> TrackWriter for Mp4Writer<W> {
    fn add_sample(&mut self, sample: &OutputSample) -> Result<()> {
        self.check_not_finished()?;

        let Ok(size) = u32::try_from(sample.data.len()) else {
            bail!("Sample of {} bytes is too large", sample.data.len());
        };

        self.writer.write_all(&sample.data)?;
        self.samples.push(WrittenSample {
            offset: self.data_start + self.data_written,
            size,
            duration: sample.duration,
            cts_offset: sample.cts_offset,
            is_sync: sample.is_sync_sample,
            sample_group: sample.sample_group,
        });
        self.data_written += size as u64;
        Ok(())
    }

    fn add_user_data(&mut self, entry: &UserDataEntry) -> Result<()> {
        self.check_not_finished()?;
        self.user_data.push(entry.clone());
        Ok(())
    }

    fn add_edit_list_entry(&mut self, entry: &EditListEntry) -> Result<()> {
        self.check_not_finished()?;
        self.edit_list.push(*entry);
        Ok(())
    }
}

impl<W: Write + Seek> Drop for Mp4Writer<W> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

/// Packs an ISO-639-2/T code, anything else becomes `und`.
pub fn encode_language(language: &str) -> u16 {
    let bytes = language.as_bytes();
    let code = if bytes.len() == 3 && bytes.iter().all(|b| b.is_ascii_lowercase()) {
        bytes
    } else {
        b"und".as_slice()
    };
    code.iter()
        .fold(0u16, |acc, b| (acc << 5) | (*b - 0x60) as u16)
}

/// Run-length encodes consecutive equal values.
fn runs(values: impl Iterator<Item = u32>) -> Vec<SampleRun> {
    let mut runs: Vec<SampleRun> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some(run) if run.value == value => run.sample_count += 1,
            _ => runs.push(SampleRun {
                sample_count: 1,
                value,
            }),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use mhas::process::sample::AUDIO_PRE_ROLL_HINT;
    use mhas::process::track::{MhaDecoderConfigRecord, TrackReader};

    use super::*;
    use crate::mp4::reader::{Mp4Reader, decode_language};
    use crate::mp4::{BoxIter, find_box};

    fn writer_config() -> TrackWriterConfig {
        TrackWriterConfig {
            major_brand: *b"mp42",
            compatible_brands: vec![*b"isom", *b"mp42"],
            movie_timescale: 1000,
            language: "deu".to_string(),
            media_timescale: 48000,
            sample_rate: 48000,
            config_record: Some(MhaDecoderConfigRecord {
                configuration_version: 1,
                profile_level_indication: 0x0D,
                reference_channel_layout: 6,
                mpegh3da_config: vec![0x0D, 0x01, 0x02],
            }),
            profile_and_level_compatible_sets: vec![0x12],
        }
    }

    fn sample(data: &[u8], is_sync: bool, cts_offset: i64) -> OutputSample {
        OutputSample {
            data: data.to_vec(),
            is_sync_sample: is_sync,
            cts_offset,
            duration: 1024,
            sample_group: is_sync.then_some(AUDIO_PRE_ROLL_HINT),
        }
    }

    fn write_file(samples: &[OutputSample]) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = Mp4Writer::new(&mut cursor, writer_config())?;
            for s in samples {
                writer.add_sample(s)?;
            }
            writer.add_user_data(&UserDataEntry {
                box_type: *b"name",
                payload: b"track".to_vec(),
            })?;
            writer.add_edit_list_entry(&EditListEntry {
                segment_duration: 42,
                media_time: 0,
                media_rate_integer: 1,
                media_rate_fraction: 0,
            })?;
            writer.finish()?;
        }
        Ok(cursor.into_inner())
    }

    fn stbl(file: &[u8]) -> Result<Vec<u8>> {
        let mut moov = None;
        for entry in BoxIter::new(file) {
            let (box_type, payload) = entry?;
            if &box_type == b"moov" {
                moov = Some(payload);
            }
        }
        let moov = moov.ok_or_else(|| anyhow::anyhow!("no moov"))?;
        let stbl = find_box(moov, b"trak")?
            .and_then(|trak| find_box(trak, b"mdia").ok().flatten())
            .and_then(|mdia| find_box(mdia, b"minf").ok().flatten())
            .and_then(|minf| find_box(minf, b"stbl").ok().flatten())
            .ok_or_else(|| anyhow::anyhow!("no stbl"))?;
        Ok(stbl.to_vec())
    }

    #[test]
    fn written_file_reads_back() -> Result<()> {
        let samples = vec![
            sample(&[1, 2, 3], true, 0),
            sample(&[4, 5], false, 0),
            sample(&[6], true, 0),
        ];
        let file = write_file(&samples)?;

        assert_eq!(&file[4..8], b"ftyp");

        let mut reader = Mp4Reader::new(Cursor::new(file))?;
        let meta = reader.metadata().clone();
        assert_eq!(meta.track_count, 1);
        assert_eq!(meta.codec, mhas::process::track::Codec::Mhm);
        assert_eq!(meta.language, "deu");
        assert_eq!(meta.timescale, 48000);
        assert_eq!(meta.movie_timescale, 1000);
        assert_eq!(meta.sample_rate, 48000);
        assert_eq!(meta.sample_count, 3);
        assert_eq!(meta.compatible_brands, vec![*b"isom", *b"mp42"]);
        assert_eq!(meta.profile_and_level_compatible_sets, vec![0x12]);
        assert_eq!(meta.decoder_config_record, writer_config().config_record);
        assert_eq!(meta.user_data.len(), 1);
        assert_eq!(meta.user_data[0].payload, b"track");
        assert_eq!(meta.edit_list.len(), 1);
        assert_eq!(meta.edit_list[0].segment_duration, 42);

        for expected in &samples {
            let read = reader
                .next_sample()?
                .ok_or_else(|| anyhow::anyhow!("missing sample"))?;
            assert_eq!(read.data, expected.data);
            assert_eq!(read.duration, 1024);
            assert_eq!(read.is_sync_sample, expected.is_sync_sample);
        }
        assert!(reader.next_sample()?.is_none());
        Ok(())
    }

    #[test]
    fn composition_offsets_round_trip() -> Result<()> {
        let file = write_file(&[sample(&[1], true, 0), sample(&[2], true, -512)])?;
        assert!(find_box(&stbl(&file)?, b"ctts")?.is_some());

        let mut reader = Mp4Reader::new(Cursor::new(file))?;
        reader.next_sample()?;
        let second = reader
            .next_sample()?
            .ok_or_else(|| anyhow::anyhow!("missing sample"))?;
        assert_eq!(second.cts_offset, -512);
        Ok(())
    }

    #[test]
    fn optional_tables() -> Result<()> {
        let all_sync = write_file(&[sample(&[1], true, 0), sample(&[2], true, 0)])?;
        let stbl_all_sync = stbl(&all_sync)?;
        assert!(find_box(&stbl_all_sync, b"stss")?.is_none());
        assert!(find_box(&stbl_all_sync, b"ctts")?.is_none());

        let mixed = write_file(&[sample(&[1], true, 0), sample(&[2], false, 0)])?;
        let stbl_mixed = stbl(&mixed)?;
        assert!(find_box(&stbl_mixed, b"stss")?.is_some());

        let sgpd = find_box(&stbl_mixed, b"sgpd")?.ok_or_else(|| anyhow::anyhow!("no sgpd"))?;
        // version 1, 'prol', default length 2, one entry, roll distance 1
        assert_eq!(&sgpd[4..8], b"prol");
        assert_eq!(&sgpd[8..], &[0, 0, 0, 2, 0, 0, 0, 1, 0, 1]);

        let sbgp = find_box(&stbl_mixed, b"sbgp")?.ok_or_else(|| anyhow::anyhow!("no sbgp"))?;
        // two runs: sample 1 in group 1, sample 2 in none
        assert_eq!(&sbgp[8..12], &[0, 0, 0, 2]);
        assert_eq!(&sbgp[12..], &[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn finished_writer_rejects_samples() -> Result<()> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = Mp4Writer::new(&mut cursor, writer_config())?;
        writer.finish()?;
        assert!(writer.add_sample(&sample(&[1], true, 0)).is_err());
        Ok(())
    }

    #[test]
    fn language_round_trip() {
        assert_eq!(decode_language(encode_language("jpn")), "jpn");
        assert_eq!(decode_language(encode_language("EN")), "und");
    }

    #[test]
    fn run_length() {
        let r = runs([1024, 1024, 512, 1024].into_iter());
        assert_eq!(
            r,
            vec![
                SampleRun { sample_count: 2, value: 1024 },
                SampleRun { sample_count: 1, value: 512 },
                SampleRun { sample_count: 1, value: 1024 },
            ]
        );
    }
}
