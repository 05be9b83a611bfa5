use std::io::{Read, Seek, SeekFrom};

use anyhow::{Result, bail};
use log::{debug, trace};
use mhas::process::track::{
    Codec, EditListEntry, MhaDecoderConfigRecord, Sample, TrackMetadata, TrackReader,
    UserDataEntry,
};

use crate::mp4::{BoxIter, ByteCursor, Mp4Error, find_box, fourcc, read_box_header};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SampleLocation {
    offset: u64,
    size: u32,
    duration: u32,
    cts_offset: i64,
    is_sync: bool,
}

/// Reads the first track of a non-fragmented MP4 file.
pub struct Mp4Reader<R: Read + Seek> {
    reader: R,
    metadata: TrackMetadata,
    samples: Vec<SampleLocation>,
    next: usize,
}

impl<R: Read + Seek> Mp4Reader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut compatible_brands = Vec::new();
        let mut moov = None;

        while let Some(header) = read_box_header(&mut reader)? {
            trace!("Top level box '{}' {:?}", fourcc(&header.box_type), header.size);

            let Some(payload_size) = header.payload_size() else {
                if &header.box_type == b"moov" {
                    let mut buf = Vec::new();
                    reader.read_to_end(&mut buf)?;
                    moov = Some(buf);
                }
                break;
            };

            match &header.box_type {
                b"ftyp" | b"moov" => {
                    let mut buf = Vec::new();
                    reader.by_ref().take(payload_size).read_to_end(&mut buf)?;
                    if (buf.len() as u64) < payload_size {
                        bail!(Mp4Error::Truncated(fourcc(&header.box_type)));
                    }

                    if &header.box_type == b"ftyp" {
                        compatible_brands = parse_ftyp(&buf)?;
                    } else {
                        moov = Some(buf);
                    }
                }
                _ => {
                    reader.seek(SeekFrom::Current(payload_size as i64))?;
                }
            }
        }

        let Some(moov) = moov else {
            bail!(Mp4Error::MissingBox("moov"));
        };

        let (metadata, samples) = parse_moov(&moov, compatible_brands, file_len)?;
        debug!(
            "Track '{}' with {} samples, timescale {}",
            metadata.codec,
            samples.len(),
            metadata.timescale
        );

        Ok(Self {
            reader,
            metadata,
            samples,
            next: 0,
        })
    }
}

impl<R: Read + Seek> TrackReader for Mp4Reader<R> {
    fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    fn next_sample(&mut self) -> Result<Option<Sample>> {
        let Some(location) = self.samples.get(self.next).copied() else {
            return Ok(None);
        };
        self.next += 1;

        self.reader.seek(SeekFrom::Start(location.offset))?;
        let mut data = vec![0u8; location.size as usize];
        self.reader.read_exact(&mut data)?;

        Ok(Some(Sample {
            data,
            cts_offset: location.cts_offset,
            duration: location.duration,
            is_sync_sample: location.is_sync,
        }))
    }
}

fn parse_ftyp(payload: &[u8]) -> Result<Vec<[u8; 4]>> {
    let mut cursor = ByteCursor::new(payload, b"ftyp");
    cursor.skip(8)?;

    Ok(cursor
        .remaining()
        .chunks_exact(4)
        .map(|brand| [brand[0], brand[1], brand[2], brand[3]])
        .collect())
}

fn parse_moov(
    moov: &[u8],
    compatible_brands: Vec<[u8; 4]>,
    file_len: u64,
) -> Result<(TrackMetadata, Vec<SampleLocation>)> {
    let Some(mvhd) = find_box(moov, b"mvhd")? else {
        bail!(Mp4Error::MissingBox("mvhd"));
    };
    let movie_timescale = parse_timescale(mvhd, b"mvhd")?;

    let mut traks = Vec::new();
    for entry in BoxIter::new(moov) {
        let (box_type, payload) = entry?;
        if &box_type == b"trak" {
            traks.push(payload);
        }
    }

    let Some(trak) = traks.first() else {
        bail!(Mp4Error::MissingBox("trak"));
    };

    let track = parse_trak(trak, file_len)?;

    let metadata = TrackMetadata {
        track_count: traks.len(),
        codec: track.codec,
        language: track.language,
        timescale: track.timescale,
        sample_rate: track.sample_rate,
        sample_count: track.samples.len() as u64,
        movie_timescale,
        compatible_brands,
        user_data: track.user_data,
        edit_list: track.edit_list,
        decoder_config_record: track.decoder_config_record,
        profile_and_level_compatible_sets: track.profile_and_level_compatible_sets,
    };

    Ok((metadata, track.samples))
}

/// Timescale of an `mvhd` or `mdhd` box.
fn parse_timescale(payload: &[u8], box_type: &[u8; 4]) -> Result<u32> {
    let mut cursor = ByteCursor::new(payload, box_type);
    let (version, _) = cursor.full_box()?;
    match version {
        0 => cursor.skip(8)?,
        1 => cursor.skip(16)?,
        v => bail!(cursor.unsupported_version(v)),
    }
    cursor.u32()
}

struct TrackInfo {
    codec: Codec,
    language: String,
    timescale: u32,
    sample_rate: u32,
    user_data: Vec<UserDataEntry>,
    edit_list: Vec<EditListEntry>,
    decoder_config_record: Option<MhaDecoderConfigRecord>,
    profile_and_level_compatible_sets: Vec<u8>,
    samples: Vec<SampleLocation>,
}

fn parse_trak(trak: &[u8], file_len: u64) -> Result<TrackInfo> {
    let edit_list = match find_box(trak, b"edts")? {
        Some(edts) => match find_box(edts, b"elst")? {
            Some(elst) => parse_elst(elst)?,
            None => Vec::new(),
        },
        None => Vec::new(),
    };

    let user_data = match find_box(trak, b"udta")? {
        Some(udta) => BoxIter::new(udta)
            .map(|entry| {
                entry.map(|(box_type, payload)| UserDataEntry {
                    box_type,
                    payload: payload.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let Some(mdia) = find_box(trak, b"mdia")? else {
        bail!(Mp4Error::MissingBox("mdia"));
    };
    let Some(mdhd) = find_box(mdia, b"mdhd")? else {
        bail!(Mp4Error::MissingBox("mdhd"));
    };
    let (timescale, language) = parse_mdhd(mdhd)?;

    let Some(stbl) = find_box(mdia, b"minf")?
        .map(|minf| find_box(minf, b"stbl"))
        .transpose()?
        .flatten()
    else {
        bail!(Mp4Error::MissingBox("stbl"));
    };

    let Some(stsd) = find_box(stbl, b"stsd")? else {
        bail!(Mp4Error::MissingBox("stsd"));
    };
    let entry = parse_stsd(stsd)?;

    Ok(TrackInfo {
        codec: entry.codec,
        language,
        timescale,
        sample_rate: entry.sample_rate,
        user_data,
        edit_list,
        decoder_config_record: entry.decoder_config_record,
        profile_and_level_compatible_sets: entry.profile_and_level_compatible_sets,
        samples: parse_sample_table(stbl, file_len)?,
    })
}

fn parse_elst(payload: &[u8]) -> Result<Vec<EditListEntry>> {
    let mut cursor = ByteCursor::new(payload, b"elst");
    let (version, _) = cursor.full_box()?;
    let entry_count = cursor.u32()?;

    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let (segment_duration, media_time) = match version {
            0 => (cursor.u32()? as u64, cursor.i32()? as i64),
            1 => (cursor.u64()?, cursor.i64()?),
            v => bail!(cursor.unsupported_version(v)),
        };
        entries.push(EditListEntry {
            segment_duration,
            media_time,
            media_rate_integer: cursor.i16()?,
            media_rate_fraction: cursor.i16()?,
        });
    }
    Ok(entries)
}

fn parse_mdhd(payload: &[u8]) -> Result<(u32, String)> {
    let timescale = parse_timescale(payload, b"mdhd")?;

    let mut cursor = ByteCursor::new(payload, b"mdhd");
    let (version, _) = cursor.full_box()?;
    cursor.skip(if version == 1 { 28 } else { 16 })?;

    Ok((timescale, decode_language(cursor.u16()?)))
}

/// ISO-639-2/T code packed as three 5-bit letters.
pub fn decode_language(packed: u16) -> String {
    if packed & 0x7FFF == 0 {
        return "und".to_string();
    }
    [10u16, 5, 0]
        .iter()
        .map(|shift| (((packed >> shift) & 0x1F) as u8 + 0x60) as char)
        .collect()
}

struct SampleEntry {
    codec: Codec,
    sample_rate: u32,
    decoder_config_record: Option<MhaDecoderConfigRecord>,
    profile_and_level_compatible_sets: Vec<u8>,
}

fn parse_stsd(payload: &[u8]) -> Result<SampleEntry> {
    let mut cursor = ByteCursor::new(payload, b"stsd");
    cursor.full_box()?;
    let entry_count = cursor.u32()?;
    if entry_count > 1 {
        debug!("stsd carries {entry_count} sample entries, using the first");
    }

    let Some(first) = BoxIter::new(cursor.remaining()).next() else {
        bail!(Mp4Error::NoSampleEntry);
    };
    let (box_type, entry) = first?;

    let codec = Codec::from_fourcc(&box_type);
    let mut sample_entry = SampleEntry {
        codec,
        sample_rate: 0,
        decoder_config_record: None,
        profile_and_level_compatible_sets: Vec::new(),
    };

    if let Codec::Other(_) = sample_entry.codec {
        return Ok(sample_entry);
    }

    // AudioSampleEntry
    let mut cursor = ByteCursor::new(entry, &box_type);
    cursor.skip(6 + 2 + 8)?;
    let _channel_count = cursor.u16()?;
    cursor.skip(6)?;
    sample_entry.sample_rate = cursor.u32()? >> 16;

    for child in BoxIter::new(cursor.remaining()) {
        let (child_type, child_payload) = child?;
        match &child_type {
            b"mhaC" => {
                sample_entry.decoder_config_record =
                    Some(MhaDecoderConfigRecord::parse(child_payload)?);
            }
            b"mhaP" => {
                let mut mhap = ByteCursor::new(child_payload, b"mhaP");
                let count = mhap.u8()? as usize;
                sample_entry.profile_and_level_compatible_sets = mhap.bytes(count)?.to_vec();
            }
            other => trace!("Skipping sample entry child '{}'", fourcc(other)),
        }
    }

    Ok(sample_entry)
}

/// Sample locations of an `stbl`, every sample must lie within `file_len`.
fn parse_sample_table(stbl: &[u8], file_len: u64) -> Result<Vec<SampleLocation>> {
    let Some(stsz) = find_box(stbl, b"stsz")? else {
        bail!(Mp4Error::MissingBox("stsz"));
    };
    let sizes = parse_stsz(stsz, file_len)?;
    let count = sizes.len();

    let Some(stts) = find_box(stbl, b"stts")? else {
        bail!(Mp4Error::MissingBox("stts"));
    };
    let durations = expand_runs(stts, b"stts", count, |c, _| Ok(c.u32()? as i64))?;
    if durations.len() < count {
        bail!(Mp4Error::InconsistentSampleTable("stts covers fewer samples than stsz"));
    }

    let cts_offsets = match find_box(stbl, b"ctts")? {
        Some(ctts) => expand_runs(ctts, b"ctts", count, |c, version| match version {
            0 => Ok(c.u32()? as i64),
            _ => Ok(c.i32()? as i64),
        })?,
        None => Vec::new(),
    };

    let sync_samples = match find_box(stbl, b"stss")? {
        Some(stss) => {
            let mut cursor = ByteCursor::new(stss, b"stss");
            cursor.full_box()?;
            let entry_count = cursor.u32()?;
            let mut sync = vec![false; count];
            for _ in 0..entry_count {
                let number = cursor.u32()? as usize;
                if let Some(flag) = number.checked_sub(1).and_then(|i| sync.get_mut(i)) {
                    *flag = true;
                }
            }
            Some(sync)
        }
        None => None,
    };

    let chunk_offsets = if let Some(stco) = find_box(stbl, b"stco")? {
        let mut cursor = ByteCursor::new(stco, b"stco");
        cursor.full_box()?;
        (0..cursor.u32()?)
            .map(|_| cursor.u32().map(u64::from))
            .collect::<Result<Vec<_>>>()?
    } else if let Some(co64) = find_box(stbl, b"co64")? {
        let mut cursor = ByteCursor::new(co64, b"co64");
        cursor.full_box()?;
        (0..cursor.u32()?)
            .map(|_| cursor.u64())
            .collect::<Result<Vec<_>>>()?
    } else {
        bail!(Mp4Error::MissingBox("stco"));
    };

    let Some(stsc) = find_box(stbl, b"stsc")? else {
        bail!(Mp4Error::MissingBox("stsc"));
    };
    let mut cursor = ByteCursor::new(stsc, b"stsc");
    cursor.full_box()?;
    let mut chunk_runs = Vec::new();
    for _ in 0..cursor.u32()? {
        let first_chunk = cursor.u32()?;
        let samples_per_chunk = cursor.u32()?;
        cursor.skip(4)?;
        chunk_runs.push((first_chunk, samples_per_chunk));
    }

    let mut samples = Vec::with_capacity(count);
    let mut run = 0;
    for (chunk_index, chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_index as u32 + 1;
        while run + 1 < chunk_runs.len() && chunk_runs[run + 1].0 <= chunk_number {
            run += 1;
        }
        let Some(&(_, samples_per_chunk)) = chunk_runs.get(run) else {
            bail!(Mp4Error::InconsistentSampleTable("stsc is empty"));
        };

        let mut offset = *chunk_offset;
        for _ in 0..samples_per_chunk {
            let index = samples.len();
            if index == count {
                break;
            }
            if offset.saturating_add(sizes[index] as u64) > file_len {
                bail!(Mp4Error::InconsistentSampleTable("sample data beyond end of file"));
            }
            samples.push(SampleLocation {
                offset,
                size: sizes[index],
                duration: durations[index] as u32,
                cts_offset: cts_offsets.get(index).copied().unwrap_or(0),
                is_sync: sync_samples.as_ref().is_none_or(|sync| sync[index]),
            });
            offset += sizes[index] as u64;
        }
    }

    if samples.len() < count {
        bail!(Mp4Error::InconsistentSampleTable("chunks cover fewer samples than stsz"));
    }

    Ok(samples)
}

fn parse_stsz(payload: &[u8], file_len: u64) -> Result<Vec<u32>> {
    let mut cursor = ByteCursor::new(payload, b"stsz");
    cursor.full_box()?;
    let sample_size = cursor.u32()?;
    let sample_count = cursor.u32()?;

    if sample_size != 0 {
        if sample_size as u64 * sample_count as u64 > file_len {
            bail!(Mp4Error::InconsistentSampleTable("stsz exceeds file size"));
        }
        return Ok(vec![sample_size; sample_count as usize]);
    }
    if cursor.remaining().len() < sample_count as usize * 4 {
        bail!(Mp4Error::Truncated("stsz".to_string()));
    }
    (0..sample_count).map(|_| cursor.u32()).collect()
}

/// Expands a run-length `(count, value)` table such as `stts` or `ctts`.
///
/// Stops at `limit` values, runs past the last sample are ignored.
fn expand_runs<F>(
    payload: &[u8],
    box_type: &[u8; 4],
    limit: usize,
    mut read_value: F,
) -> Result<Vec<i64>>
where
    F: FnMut(&mut ByteCursor, u8) -> Result<i64>,
{
    let mut cursor = ByteCursor::new(payload, box_type);
    let (version, _) = cursor.full_box()?;
    let entry_count = cursor.u32()?;

    let mut values = Vec::new();
    for _ in 0..entry_count {
        let run = cursor.u32()? as usize;
        let value = read_value(&mut cursor, version)?;
        let run = run.min(limit - values.len());
        values.extend(std::iter::repeat_n(value, run));
        if values.len() == limit {
            break;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes() {
        // "eng"
        assert_eq!(decode_language(0x15C7), "eng");
        assert_eq!(decode_language(0), "und");
    }

    #[test]
    fn ftyp_brands() -> Result<()> {
        let payload = [b"mp42".as_slice(), &[0u8; 4], b"isom", b"mp42"].concat();
        assert_eq!(parse_ftyp(&payload)?, vec![*b"isom", *b"mp42"]);
        Ok(())
    }

    #[test]
    fn constant_sample_size() -> Result<()> {
        let payload = [0u32, 7, 3]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        assert_eq!(parse_stsz(&payload, 21)?, vec![7, 7, 7]);
        Ok(())
    }

    #[test]
    fn oversized_tables_are_rejected() -> Result<()> {
        let constant = [0u32, 1024, u32::MAX]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        let err = parse_stsz(&constant, 1 << 20).err();
        assert!(matches!(
            err.and_then(|e| e.downcast::<Mp4Error>().ok()),
            Some(Mp4Error::InconsistentSampleTable(_))
        ));

        // per-sample sizes announced but not present
        let listed = [0u32, 0, u32::MAX]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        assert!(parse_stsz(&listed, u64::MAX).is_err());

        let runs = [0u32, 1, u32::MAX, 1024]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        let durations = expand_runs(&runs, b"stts", 3, |c, _| Ok(c.u32()? as i64))?;
        assert_eq!(durations, vec![1024; 3]);
        Ok(())
    }

    #[test]
    fn truncated_moov_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&(u32::MAX).to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 16]);
        let err = Mp4Reader::new(std::io::Cursor::new(data)).err();
        assert!(matches!(
            err.and_then(|e| e.downcast::<Mp4Error>().ok()),
            Some(Mp4Error::Truncated(_))
        ));
    }

    #[test]
    fn time_to_sample_runs() -> Result<()> {
        let payload = [0u32, 2, 2, 1024, 1, 512]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect::<Vec<_>>();
        let durations = expand_runs(&payload, b"stts", 3, |c, _| Ok(c.u32()? as i64))?;
        assert_eq!(durations, vec![1024, 1024, 512]);
        Ok(())
    }

    #[test]
    fn missing_moov() {
        let mut data = Vec::new();
        crate::mp4::write_box(&mut data, b"ftyp", &[b"mp42".as_slice(), &[0u8; 4]].concat());
        let err = Mp4Reader::new(std::io::Cursor::new(data)).err();
        assert!(matches!(
            err.and_then(|e| e.downcast::<Mp4Error>().ok()),
            Some(Mp4Error::MissingBox("moov"))
        ));
    }
}
