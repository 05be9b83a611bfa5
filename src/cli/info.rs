use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;
use serde::Serialize;

use super::command::{Cli, InfoArgs};
use crate::mp4::fourcc;
use crate::mp4::reader::Mp4Reader;
use mhas::process::convert::Converter;
use mhas::process::track::{Codec, MhaDecoderConfigRecord, TrackMetadata, TrackReader};
use mhas::structs::config::{ConfigRewriter, ConfigurationInfo, SpeakerLayout};
use mhas::structs::config_extension::config_extension_name;
use mhas::structs::packet::{MhasPacketType, parse_packets};
use mhas::structs::preroll::{is_independent, is_ipf};
use mhas::structs::profile_level::profile_level_name;

#[derive(Debug, Serialize)]
struct InfoReport {
    input: String,
    track: TrackReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoder_config_record: Option<DecoderConfigReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration: Option<ConfigurationReport>,
    frames: FrameReport,
}

#[derive(Debug, Serialize)]
struct TrackReport {
    track_count: usize,
    codec: String,
    language: String,
    timescale: u32,
    movie_timescale: u32,
    sample_rate: u32,
    compatible_brands: Vec<String>,
    profile_and_level_compatible_sets: Vec<String>,
    edit_list: Vec<EditListReport>,
    user_data: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EditListReport {
    segment_duration: u64,
    media_time: i64,
    media_rate: String,
}

#[derive(Debug, Serialize)]
struct DecoderConfigReport {
    configuration_version: u8,
    profile_level_indication: String,
    reference_channel_layout: u8,
    config_size: usize,
}

#[derive(Debug, Serialize)]
struct ConfigurationReport {
    profile_level: String,
    compatible_profile_level: String,
    baseline_compatible: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    baseline_violations: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversion_error: Option<String>,
    sampling_frequency: Option<u32>,
    core_sbr_frame_length_index: u8,
    reference_layout: Option<String>,
    signal_groups: Vec<SignalGroupReport>,
    transport_index_bits: u32,
    elements: Vec<String>,
    config_extensions: Vec<String>,
    asi_size: Option<usize>,
    converted_config_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SignalGroupReport {
    signal_type: String,
    num_signals: u64,
}

#[derive(Debug, Default, Serialize)]
struct FrameReport {
    sample_count: u64,
    sync_samples: u64,
    independent_frames: u64,
    immediate_playout_frames: u64,
    total_bytes: u64,
}

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing MPEG-H track: {}", args.input.display());

    let input = File::open(&args.input).context("Open input file failed")?;
    let mut reader = Mp4Reader::new(BufReader::new(input)).context("Open input file failed")?;

    let fail_level = if cli.strict {
        Level::Warn
    } else {
        Level::Error
    };

    let meta = reader.metadata().clone();

    let decoder_config_record = meta.decoder_config_record.as_ref().map(decoder_config_report);
    let configuration = meta
        .decoder_config_record
        .as_ref()
        .map(|record| configuration_report(record, fail_level))
        .transpose()?;

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new(meta.sample_count));
            pb.set_style(ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} samples ({percent}%)",
            )?);
            Some(pb)
        }
        None => None,
    };

    let mut frames = FrameReport::default();
    while let Some(sample) = reader.next_sample()? {
        frames.sample_count += 1;
        frames.total_bytes += sample.data.len() as u64;
        if sample.is_sync_sample {
            frames.sync_samples += 1;
        }

        if let Some(first) = first_frame_byte(&meta.codec, &sample.data)? {
            if is_independent(first) {
                frames.independent_frames += 1;
            }
            if is_ipf(first) {
                frames.immediate_playout_frames += 1;
            }
        }

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let report = InfoReport {
        input: args.input.display().to_string(),
        track: track_report(&meta),
        decoder_config_record,
        configuration,
        frames,
    };

    print!("{}", serde_yaml_ng::to_string(&report)?);

    Ok(())
}

/// First byte of the `mpegh3daFrame()` carried by a sample.
fn first_frame_byte(codec: &Codec, data: &[u8]) -> Result<Option<u8>> {
    match codec {
        Codec::Mha => Ok(data.first().copied()),
        Codec::Mhm => Ok(parse_packets(data)?
            .iter()
            .find(|p| p.packet_type == MhasPacketType::Mpegh3daFrame)
            .and_then(|p| p.payload.first().copied())),
        Codec::Other(_) => Ok(None),
    }
}

fn level_name(level: u8) -> String {
    match profile_level_name(level) {
        Some(name) => format!("{name} (0x{level:02X})"),
        None => format!("0x{level:02X}"),
    }
}

fn track_report(meta: &TrackMetadata) -> TrackReport {
    TrackReport {
        track_count: meta.track_count,
        codec: meta.codec.to_string(),
        language: meta.language.clone(),
        timescale: meta.timescale,
        movie_timescale: meta.movie_timescale,
        sample_rate: meta.sample_rate,
        compatible_brands: meta.compatible_brands.iter().map(fourcc).collect(),
        profile_and_level_compatible_sets: meta
            .profile_and_level_compatible_sets
            .iter()
            .map(|level| level_name(*level))
            .collect(),
        edit_list: meta
            .edit_list
            .iter()
            .map(|e| EditListReport {
                segment_duration: e.segment_duration,
                media_time: e.media_time,
                media_rate: format!("{}.{}", e.media_rate_integer, e.media_rate_fraction),
            })
            .collect(),
        user_data: meta
            .user_data
            .iter()
            .map(|entry| format!("{} ({} bytes)", fourcc(&entry.box_type), entry.payload.len()))
            .collect(),
    }
}

fn decoder_config_report(record: &MhaDecoderConfigRecord) -> DecoderConfigReport {
    DecoderConfigReport {
        configuration_version: record.configuration_version,
        profile_level_indication: level_name(record.profile_level_indication),
        reference_channel_layout: record.reference_channel_layout,
        config_size: record.mpegh3da_config.len(),
    }
}

fn configuration_report(
    record: &MhaDecoderConfigRecord,
    fail_level: Level,
) -> Result<ConfigurationReport> {
    let rewritten = ConfigRewriter::new(&record.mpegh3da_config)
        .with_fail_level(fail_level)
        .rewrite()?;

    let mut converter = Converter::new(1)?;
    converter.set_fail_level(fail_level);
    let (converted_config_size, conversion_error) =
        match converter.convert_config(&record.mpegh3da_config) {
            Ok(conversion) => (Some(conversion.full_config.len()), None),
            Err(e) => (None, Some(e.to_string())),
        };

    let info: &ConfigurationInfo = &rewritten.info;

    Ok(ConfigurationReport {
        profile_level: level_name(info.profile_level.get()),
        compatible_profile_level: level_name(info.compatible_profile_level.get()),
        baseline_compatible: info.violations.is_empty(),
        baseline_violations: info.violations.iter().map(|v| v.code()).collect(),
        conversion_error,
        sampling_frequency: info.sampling_frequency(),
        core_sbr_frame_length_index: info.core_sbr_frame_length_index,
        reference_layout: info.reference_layout.map(|layout| match layout {
            SpeakerLayout::Cicp(index) => format!("CICP {index}"),
            SpeakerLayout::CicpSpeakers(count) => format!("{count} CICP loudspeakers"),
            SpeakerLayout::Flexible(count) => format!("{count} flexible loudspeakers"),
        }),
        signal_groups: info
            .signal_groups
            .iter()
            .map(|group| SignalGroupReport {
                signal_type: format!("{:?}", group.signal_type),
                num_signals: group.num_signals,
            })
            .collect(),
        transport_index_bits: info.transport_index_bits,
        elements: info.elements.iter().map(|e| format!("{e:?}")).collect(),
        config_extensions: info
            .extension_types
            .iter()
            .map(|t| config_extension_name(*t).to_string())
            .collect(),
        asi_size: rewritten.asi.as_ref().map(Vec::len),
        converted_config_size,
    })
}
